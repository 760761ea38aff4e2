use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use vouchy_core::domain::coupon::{Coupon, CouponId};
use vouchy_core::domain::member::MemberId;
use vouchy_core::domain::receipt::{Receipt, ReceiptHistory, ReceiptId, ReceiptState};
use vouchy_core::domain::venue::VenueId;

use super::{
    CouponCatalog, QuotaLedger, ReceiptStore, RepositoryError, ReserveOutcome, UseOutcome,
};

#[derive(Default)]
pub struct InMemoryCouponCatalog {
    coupons: RwLock<HashMap<String, Coupon>>,
}

#[async_trait::async_trait]
impl CouponCatalog for InMemoryCouponCatalog {
    async fn find_by_id(&self, id: &CouponId) -> Result<Option<Coupon>, RepositoryError> {
        let coupons = self.coupons.read().await;
        Ok(coupons.get(&id.0).cloned())
    }

    async fn save(&self, coupon: Coupon) -> Result<(), RepositoryError> {
        let mut coupons = self.coupons.write().await;
        coupons.insert(coupon.id.0.clone(), coupon);
        Ok(())
    }
}

struct QuotaCounter {
    quota: u32,
    remaining: u32,
}

/// In-memory quota counters with the same semantics as the SQL ledger.
///
/// The whole reserve and release paths run under one mutex, so counters move
/// atomically even when callers race from separate tasks.
#[derive(Default)]
pub struct InMemoryQuotaLedger {
    counters: Mutex<HashMap<(String, String), QuotaCounter>>,
}

#[async_trait::async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn try_reserve(
        &self,
        coupon_id: &CouponId,
        period_key: &str,
        quota: Option<u32>,
        _now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, RepositoryError> {
        let Some(quota) = quota else {
            return Ok(ReserveOutcome::NotInitialized);
        };

        let mut counters = self.counters.lock().await;
        let counter = counters
            .entry((coupon_id.0.clone(), period_key.to_string()))
            .or_insert(QuotaCounter { quota, remaining: quota });

        if counter.remaining > 0 {
            counter.remaining -= 1;
            Ok(ReserveOutcome::Reserved)
        } else {
            Ok(ReserveOutcome::SoldOut)
        }
    }

    async fn release(
        &self,
        coupon_id: &CouponId,
        period_key: &str,
        _now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut counters = self.counters.lock().await;
        if let Some(counter) = counters.get_mut(&(coupon_id.0.clone(), period_key.to_string())) {
            if counter.remaining < counter.quota {
                counter.remaining += 1;
            }
        }
        Ok(())
    }

    async fn remaining(
        &self,
        coupon_id: &CouponId,
        period_key: &str,
    ) -> Result<Option<u32>, RepositoryError> {
        let counters = self.counters.lock().await;
        Ok(counters
            .get(&(coupon_id.0.clone(), period_key.to_string()))
            .map(|counter| counter.remaining))
    }
}

#[derive(Default)]
struct ReceiptRecords {
    receipts: HashMap<String, Receipt>,
    venue_counts: HashMap<(String, String, i64), u32>,
}

/// In-memory receipt store mirroring the SQL store's transactional `mark_used`.
#[derive(Default)]
pub struct InMemoryReceiptStore {
    records: Mutex<ReceiptRecords>,
}

#[async_trait::async_trait]
impl ReceiptStore for InMemoryReceiptStore {
    async fn insert(&self, receipt: Receipt) -> Result<(), RepositoryError> {
        let mut records = self.records.lock().await;
        records.receipts.insert(receipt.id.0.clone(), receipt);
        Ok(())
    }

    async fn find_by_id(&self, id: &ReceiptId) -> Result<Option<Receipt>, RepositoryError> {
        let records = self.records.lock().await;
        Ok(records.receipts.get(&id.0).cloned())
    }

    async fn history(
        &self,
        member_id: &MemberId,
        coupon_id: &CouponId,
    ) -> Result<ReceiptHistory, RepositoryError> {
        let records = self.records.lock().await;
        let mut received_at = records
            .receipts
            .values()
            .filter(|receipt| {
                receipt.member_id == *member_id && receipt.coupon_id == *coupon_id
            })
            .map(|receipt| receipt.received_at)
            .collect::<Vec<_>>();
        received_at.sort();
        Ok(ReceiptHistory::new(received_at))
    }

    async fn mark_used(
        &self,
        receipt: &Receipt,
        same_venue_use: u32,
        used_at: DateTime<Utc>,
    ) -> Result<UseOutcome, RepositoryError> {
        let mut records = self.records.lock().await;

        let Some(stored) = records.receipts.get(&receipt.id.0) else {
            return Ok(UseOutcome::AlreadyUsed);
        };
        if stored.state != ReceiptState::Issued {
            return Ok(UseOutcome::AlreadyUsed);
        }

        let key =
            (receipt.member_id.0.clone(), receipt.coupon_id.0.clone(), receipt.venue_id.0);
        let count = records.venue_counts.get(&key).copied().unwrap_or(0);
        if count >= same_venue_use {
            return Ok(UseOutcome::VenueLimitExceeded);
        }

        records.venue_counts.insert(key, count + 1);
        if let Some(stored) = records.receipts.get_mut(&receipt.id.0) {
            stored.state = ReceiptState::Used;
            stored.used_at = Some(used_at);
        }

        Ok(UseOutcome::Used)
    }

    async fn venue_usage(
        &self,
        member_id: &MemberId,
        coupon_id: &CouponId,
        venue_id: &VenueId,
    ) -> Result<u32, RepositoryError> {
        let records = self.records.lock().await;
        let key = (member_id.0.clone(), coupon_id.0.clone(), venue_id.0);
        Ok(records.venue_counts.get(&key).copied().unwrap_or(0))
    }
}
