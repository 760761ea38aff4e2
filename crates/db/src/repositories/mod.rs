use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use vouchy_core::domain::coupon::{Coupon, CouponId};
use vouchy_core::domain::member::MemberId;
use vouchy_core::domain::receipt::{Receipt, ReceiptHistory, ReceiptId};
use vouchy_core::domain::venue::VenueId;

pub mod catalog;
pub mod memory;
pub mod quota;
pub mod receipt;

pub use catalog::SqlCouponCatalog;
pub use memory::{InMemoryCouponCatalog, InMemoryQuotaLedger, InMemoryReceiptStore};
pub use quota::SqlQuotaLedger;
pub use receipt::SqlReceiptStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Outcome of a quota reservation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    Reserved,
    SoldOut,
    NotInitialized,
}

/// Outcome of an atomic redemption attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UseOutcome {
    Used,
    AlreadyUsed,
    VenueLimitExceeded,
}

#[async_trait]
pub trait CouponCatalog: Send + Sync {
    async fn find_by_id(&self, id: &CouponId) -> Result<Option<Coupon>, RepositoryError>;
    async fn save(&self, coupon: Coupon) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Claims one unit of the `(coupon, period)` counter.
    ///
    /// The counter is lazily created at the configured quota on first touch.
    /// The decrement is a guarded compare-and-decrement; callers never
    /// observe a counter below zero. `quota` of `None` reports
    /// `NotInitialized` without touching storage.
    async fn try_reserve(
        &self,
        coupon_id: &CouponId,
        period_key: &str,
        quota: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, RepositoryError>;

    /// Returns one reserved unit after a failed issuance commit.
    ///
    /// Guarded so a stray release can never raise `remaining` above the
    /// configured quota.
    async fn release(
        &self,
        coupon_id: &CouponId,
        period_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn remaining(
        &self,
        coupon_id: &CouponId,
        period_key: &str,
    ) -> Result<Option<u32>, RepositoryError>;
}

#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn insert(&self, receipt: Receipt) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: &ReceiptId) -> Result<Option<Receipt>, RepositoryError>;

    /// Issuance timestamps of all receipts one member holds for one coupon.
    async fn history(
        &self,
        member_id: &MemberId,
        coupon_id: &CouponId,
    ) -> Result<ReceiptHistory, RepositoryError>;

    /// Flips the receipt from issued to used and bumps the per-venue usage
    /// counter, both in one transaction. Concurrent calls for the same
    /// receipt resolve to exactly one `Used`.
    async fn mark_used(
        &self,
        receipt: &Receipt,
        same_venue_use: u32,
        used_at: DateTime<Utc>,
    ) -> Result<UseOutcome, RepositoryError>;

    async fn venue_usage(
        &self,
        member_id: &MemberId,
        coupon_id: &CouponId,
        venue_id: &VenueId,
    ) -> Result<u32, RepositoryError>;
}
