use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use vouchy_core::domain::coupon::CouponId;
use vouchy_core::domain::member::MemberId;

type GateKey = (String, String, String);

/// Serializes issuance attempts that share a member, coupon and period.
///
/// Holding the guard for the whole receive flow turns the window check and
/// the receipt insert into one critical section per key, so a member firing
/// the same request twice cannot slip two receipts through one policy window.
/// Attempts under different keys proceed concurrently.
#[derive(Default)]
pub struct IssuanceGate {
    // TODO: evict idle entries; the map grows with each new
    // (member, coupon, period) triple until process restart.
    locks: Mutex<HashMap<GateKey, Arc<Mutex<()>>>>,
}

impl IssuanceGate {
    pub async fn acquire(
        &self,
        member_id: &MemberId,
        coupon_id: &CouponId,
        period_key: &str,
    ) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry((member_id.0.clone(), coupon_id.0.clone(), period_key.to_string()))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
