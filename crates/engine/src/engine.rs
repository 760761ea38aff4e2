//! Issuance and redemption orchestration.
//!
//! The engine owns the collaborator seams and sequences every receive as
//! validate, gate, evaluate, reserve, re-check, commit. Quota is consumed at
//! issuance and never returned by use or expiry; the only path that hands a
//! reserved unit back is a compensating release after a failed commit or a
//! lost window re-check.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use vouchy_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use vouchy_core::domain::coupon::CouponId;
use vouchy_core::domain::member::MemberId;
use vouchy_core::domain::receipt::{Receipt, ReceiptId, ReceiptState};
use vouchy_core::domain::venue::VenueId;
use vouchy_core::eligibility;
use vouchy_core::errors::{CouponError, EngineError};
use vouchy_core::period_key;
use vouchy_db::repositories::{
    CouponCatalog, QuotaLedger, ReceiptStore, RepositoryError, ReserveOutcome, UseOutcome,
};

use crate::directory::{DirectoryError, MemberDirectory, VenueDirectory};
use crate::gate::IssuanceGate;

const ENGINE_ACTOR: &str = "coupon-engine";

/// What a successful receive hands back to the member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IssuedReceipt {
    pub receipt_id: ReceiptId,
    pub received_at: DateTime<Utc>,
    pub expire_date: NaiveDate,
}

/// Audit sink that forwards every event to the tracing subscriber as a
/// structured log line. Wired deployments use this one; tests use
/// `InMemoryAuditSink` and assert on the captured events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let coupon_id = event.coupon_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        let member_id = event.member_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        info!(
            event_name = %event.event_type,
            category = ?event.category,
            outcome = ?event.outcome,
            coupon_id = %coupon_id,
            member_id = %member_id,
            correlation_id = %event.correlation_id,
            actor = %event.actor,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}

pub struct CouponEngine {
    catalog: Arc<dyn CouponCatalog>,
    quota: Arc<dyn QuotaLedger>,
    receipts: Arc<dyn ReceiptStore>,
    members: Arc<dyn MemberDirectory>,
    venues: Arc<dyn VenueDirectory>,
    audit: Arc<dyn AuditSink>,
    gate: IssuanceGate,
}

impl CouponEngine {
    pub fn new(
        catalog: Arc<dyn CouponCatalog>,
        quota: Arc<dyn QuotaLedger>,
        receipts: Arc<dyn ReceiptStore>,
        members: Arc<dyn MemberDirectory>,
        venues: Arc<dyn VenueDirectory>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { catalog, quota, receipts, members, venues, audit, gate: IssuanceGate::default() }
    }

    /// Issues a receipt for `coupon_id` to `member_id` at `venue_id`.
    ///
    /// All temporal decisions derive from the caller-supplied `now`: the
    /// quota period key, the policy window, and the expiry check. Contention
    /// always resolves to a specific denial, never a generic failure.
    pub async fn receive(
        &self,
        coupon_id: &CouponId,
        venue_id: &VenueId,
        member_id: &MemberId,
        now: DateTime<Utc>,
    ) -> Result<IssuedReceipt, EngineError> {
        let audit = AuditContext::new(
            Some(coupon_id.clone()),
            Some(member_id.clone()),
            Uuid::new_v4().to_string(),
            ENGINE_ACTOR,
        );
        let result = self.receive_inner(coupon_id, venue_id, member_id, now, &audit).await;

        match &result {
            Ok(issued) => self.audit.emit(
                success_event(&audit, "coupon.receipt_issued")
                    .with_metadata("receipt_id", issued.receipt_id.0.clone())
                    .with_metadata("venue_id", venue_id.0.to_string()),
            ),
            Err(EngineError::Coupon(denial)) => self.audit.emit(
                denial_event(&audit, denial).with_metadata("venue_id", venue_id.0.to_string()),
            ),
            Err(failure) => self.audit.emit(
                failure_event(&audit, "coupon.receive_failed")
                    .with_metadata("error", failure.to_string()),
            ),
        }

        result
    }

    async fn receive_inner(
        &self,
        coupon_id: &CouponId,
        venue_id: &VenueId,
        member_id: &MemberId,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<IssuedReceipt, EngineError> {
        // Collaborator validation happens before the gate; no lock is held
        // across directory calls.
        self.members
            .find_by_id(member_id)
            .await
            .map_err(directory_failure)?
            .ok_or(CouponError::MemberNotFound)?;
        let coupon = self
            .catalog
            .find_by_id(coupon_id)
            .await
            .map_err(storage_failure)?
            .ok_or(CouponError::CouponNotFound)?;
        self.venues
            .find_by_id(venue_id)
            .await
            .map_err(directory_failure)?
            .ok_or(CouponError::VenueNotFound)?;
        if !coupon.allows_venue(venue_id) {
            return Err(CouponError::VenueNotEligible.into());
        }

        let period_key = period_key(&coupon.policy, now);

        // One critical section per (member, coupon, period): duplicate
        // requests from the same member queue here instead of racing the
        // window check.
        let _guard = self.gate.acquire(member_id, coupon_id, &period_key).await;

        let history = self.receipts.history(member_id, coupon_id).await.map_err(storage_failure)?;
        eligibility::evaluate(&coupon, &history, now)?;

        match self
            .quota
            .try_reserve(coupon_id, &period_key, coupon.quota, now)
            .await
            .map_err(storage_failure)?
        {
            ReserveOutcome::Reserved => {}
            ReserveOutcome::SoldOut => return Err(CouponError::QuotaSoldOut.into()),
            ReserveOutcome::NotInitialized => return Err(CouponError::QuotaNotInitialized.into()),
        }

        // The window check and the reservation are not one atomic step.
        // Re-check against a fresh snapshot before committing; a receipt that
        // landed in between costs this attempt its reservation, not the
        // quota invariant.
        let fresh = self.receipts.history(member_id, coupon_id).await.map_err(storage_failure)?;
        if let Err(denial) = eligibility::evaluate_window(&coupon, &fresh, now) {
            self.release_reservation(coupon_id, &period_key, now, audit).await;
            return Err(denial.into());
        }

        let receipt = Receipt {
            id: ReceiptId(Uuid::new_v4().to_string()),
            coupon_id: coupon_id.clone(),
            member_id: member_id.clone(),
            venue_id: venue_id.clone(),
            state: ReceiptState::Issued,
            received_at: now,
            used_at: None,
        };

        if let Err(failure) = self.receipts.insert(receipt.clone()).await {
            error!(
                event_name = "coupon.receipt_commit_failed",
                coupon_id = %coupon_id.0,
                period_key = %period_key,
                member_id = %member_id.0,
                correlation_id = %audit.correlation_id,
                error = %failure,
                "receipt insert failed after reservation"
            );
            self.release_reservation(coupon_id, &period_key, now, audit).await;
            return Err(EngineError::Persistence(failure.to_string()));
        }

        Ok(IssuedReceipt {
            receipt_id: receipt.id,
            received_at: receipt.received_at,
            expire_date: coupon.expire_date,
        })
    }

    /// Redeems `receipt_id` at the venue the receipt was issued for.
    pub async fn use_receipt(
        &self,
        receipt_id: &ReceiptId,
        member_id: &MemberId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        // The coupon behind the receipt is only known once the lookup
        // succeeds; denials audit without it.
        let mut audit = AuditContext::new(
            None,
            Some(member_id.clone()),
            Uuid::new_v4().to_string(),
            ENGINE_ACTOR,
        );
        let result = self.use_inner(receipt_id, member_id, now).await;

        match &result {
            Ok(used) => {
                audit.coupon_id = Some(used.coupon_id.clone());
                self.audit.emit(
                    event_from(
                        &audit,
                        "coupon.receipt_used",
                        AuditCategory::Redemption,
                        AuditOutcome::Success,
                    )
                    .with_metadata("receipt_id", used.id.0.clone())
                    .with_metadata("venue_id", used.venue_id.0.to_string()),
                );
            }
            Err(EngineError::Coupon(denial)) => self.audit.emit(
                event_from(
                    &audit,
                    "coupon.use_denied",
                    AuditCategory::Redemption,
                    AuditOutcome::Denied,
                )
                .with_metadata("receipt_id", receipt_id.0.clone())
                .with_metadata("reason", denial.code()),
            ),
            Err(failure) => self.audit.emit(
                event_from(
                    &audit,
                    "coupon.use_failed",
                    AuditCategory::Persistence,
                    AuditOutcome::Failed,
                )
                .with_metadata("receipt_id", receipt_id.0.clone())
                .with_metadata("error", failure.to_string()),
            ),
        }

        result.map(|_| ())
    }

    async fn use_inner(
        &self,
        receipt_id: &ReceiptId,
        member_id: &MemberId,
        now: DateTime<Utc>,
    ) -> Result<Receipt, EngineError> {
        let receipt = self
            .receipts
            .find_by_id(receipt_id)
            .await
            .map_err(storage_failure)?
            .ok_or(CouponError::ReceiptNotFound)?;
        if receipt.member_id != *member_id {
            return Err(CouponError::Forbidden.into());
        }
        if receipt.state == ReceiptState::Used {
            return Err(CouponError::AlreadyUsed.into());
        }

        let coupon = self
            .catalog
            .find_by_id(&receipt.coupon_id)
            .await
            .map_err(storage_failure)?
            .ok_or_else(|| {
                EngineError::Persistence(format!(
                    "receipt {} references missing coupon {}",
                    receipt.id.0, receipt.coupon_id.0
                ))
            })?;
        if now.date_naive() > coupon.expire_date {
            return Err(CouponError::CouponExpired.into());
        }

        // State flip and venue counter move in one transaction; the guards
        // downgrade a lost race to the matching denial.
        match self
            .receipts
            .mark_used(&receipt, coupon.same_venue_use, now)
            .await
            .map_err(storage_failure)?
        {
            UseOutcome::Used => {}
            UseOutcome::AlreadyUsed => return Err(CouponError::AlreadyUsed.into()),
            UseOutcome::VenueLimitExceeded => {
                return Err(CouponError::VenueUseLimitExceeded.into())
            }
        }

        let mut used = receipt;
        used.transition_to(ReceiptState::Used, now)?;
        Ok(used)
    }

    /// Hands one reserved unit back after a lost re-check or a failed commit.
    ///
    /// A failed release means a unit stays consumed with no receipt behind
    /// it; that is logged at error level and not surfaced to the caller,
    /// whose attempt already has its own outcome.
    async fn release_reservation(
        &self,
        coupon_id: &CouponId,
        period_key: &str,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) {
        match self.quota.release(coupon_id, period_key, now).await {
            Ok(()) => self.audit.emit(
                success_event(audit, "quota.released").with_metadata("period_key", period_key),
            ),
            Err(failure) => {
                error!(
                    event_name = "quota.release_failed",
                    coupon_id = %coupon_id.0,
                    period_key = %period_key,
                    correlation_id = %audit.correlation_id,
                    error = %failure,
                    "quota release failed; one unit stays consumed for this period"
                );
                self.audit.emit(
                    failure_event(audit, "quota.release_failed")
                        .with_metadata("period_key", period_key)
                        .with_metadata("error", failure.to_string()),
                );
            }
        }
    }
}

fn success_event(audit: &AuditContext, event_type: &str) -> AuditEvent {
    event_from(audit, event_type, AuditCategory::Quota, AuditOutcome::Success)
}

fn denial_event(audit: &AuditContext, denial: &CouponError) -> AuditEvent {
    let category = match denial {
        CouponError::QuotaSoldOut | CouponError::QuotaNotInitialized => AuditCategory::Quota,
        _ => AuditCategory::Eligibility,
    };
    event_from(audit, "coupon.receive_denied", category, AuditOutcome::Denied)
        .with_metadata("reason", denial.code())
}

fn failure_event(audit: &AuditContext, event_type: &str) -> AuditEvent {
    event_from(audit, event_type, AuditCategory::Persistence, AuditOutcome::Failed)
}

fn event_from(
    audit: &AuditContext,
    event_type: &str,
    category: AuditCategory,
    outcome: AuditOutcome,
) -> AuditEvent {
    AuditEvent::new(
        audit.coupon_id.clone(),
        audit.member_id.clone(),
        audit.correlation_id.clone(),
        event_type,
        category,
        audit.actor.clone(),
        outcome,
    )
}

fn storage_failure(error: RepositoryError) -> EngineError {
    EngineError::Persistence(error.to_string())
}

fn directory_failure(error: DirectoryError) -> EngineError {
    EngineError::Persistence(error.to_string())
}
