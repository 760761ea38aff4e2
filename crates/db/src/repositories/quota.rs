use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use vouchy_core::domain::coupon::CouponId;

use super::{QuotaLedger, RepositoryError, ReserveOutcome};
use crate::DbPool;

/// Period-scoped quota counters backed by the `coupon_quota` table.
///
/// Counter rows are created lazily on first reservation and decremented with a
/// guarded single-statement UPDATE, so concurrent reservations never drive
/// `remaining` below zero.
pub struct SqlQuotaLedger {
    pool: DbPool,
}

impl SqlQuotaLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl QuotaLedger for SqlQuotaLedger {
    async fn try_reserve(
        &self,
        coupon_id: &CouponId,
        period_key: &str,
        quota: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome, RepositoryError> {
        let Some(quota) = quota else {
            return Ok(ReserveOutcome::NotInitialized);
        };

        sqlx::query(
            "INSERT OR IGNORE INTO coupon_quota (
                coupon_id,
                period_key,
                quota,
                remaining,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&coupon_id.0)
        .bind(period_key)
        .bind(i64::from(quota))
        .bind(i64::from(quota))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let updated = sqlx::query(
            "UPDATE coupon_quota
             SET remaining = remaining - 1, updated_at = ?
             WHERE coupon_id = ? AND period_key = ? AND remaining > 0",
        )
        .bind(now.to_rfc3339())
        .bind(&coupon_id.0)
        .bind(period_key)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            Ok(ReserveOutcome::Reserved)
        } else {
            Ok(ReserveOutcome::SoldOut)
        }
    }

    async fn release(
        &self,
        coupon_id: &CouponId,
        period_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        // The guard keeps `remaining` capped at the row's recorded quota, so a
        // duplicate release cannot mint budget that was never reserved.
        sqlx::query(
            "UPDATE coupon_quota
             SET remaining = remaining + 1, updated_at = ?
             WHERE coupon_id = ? AND period_key = ? AND remaining < quota",
        )
        .bind(now.to_rfc3339())
        .bind(&coupon_id.0)
        .bind(period_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remaining(
        &self,
        coupon_id: &CouponId,
        period_key: &str,
    ) -> Result<Option<u32>, RepositoryError> {
        let row = sqlx::query(
            "SELECT remaining
             FROM coupon_quota
             WHERE coupon_id = ? AND period_key = ?",
        )
        .bind(&coupon_id.0)
        .bind(period_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(remaining_from_row).transpose()
    }
}

fn remaining_from_row(row: SqliteRow) -> Result<u32, RepositoryError> {
    let value = row.try_get::<i64, _>("remaining")?;
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `remaining` (expected non-negative u32): {value}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, Utc};

    use vouchy_core::domain::coupon::{Coupon, CouponId, IssuePolicy};
    use vouchy_core::domain::venue::VenueId;

    use super::SqlQuotaLedger;
    use crate::migrations;
    use crate::repositories::catalog::SqlCouponCatalog;
    use crate::repositories::{CouponCatalog, QuotaLedger, ReserveOutcome};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn reserve_initializes_the_counter_lazily_and_decrements_it() {
        let pool = setup_pool().await;
        let ledger = SqlQuotaLedger::new(pool.clone());
        let coupon_id = seed_coupon(&pool, "C-Q-001", Some(5)).await;

        let outcome =
            ledger.try_reserve(&coupon_id, "ALL", Some(5), ts("2026-03-01T10:00:00Z")).await.expect("reserve");
        assert_eq!(outcome, ReserveOutcome::Reserved);

        let remaining = ledger.remaining(&coupon_id, "ALL").await.expect("remaining");
        assert_eq!(remaining, Some(4));

        pool.close().await;
    }

    #[tokio::test]
    async fn reserve_sells_out_once_the_counter_reaches_zero() {
        let pool = setup_pool().await;
        let ledger = SqlQuotaLedger::new(pool.clone());
        let coupon_id = seed_coupon(&pool, "C-Q-002", Some(2)).await;
        let now = ts("2026-03-01T10:00:00Z");

        for _ in 0..2 {
            let outcome =
                ledger.try_reserve(&coupon_id, "ALL", Some(2), now).await.expect("reserve");
            assert_eq!(outcome, ReserveOutcome::Reserved);
        }

        let outcome = ledger.try_reserve(&coupon_id, "ALL", Some(2), now).await.expect("reserve");
        assert_eq!(outcome, ReserveOutcome::SoldOut);

        let remaining = ledger.remaining(&coupon_id, "ALL").await.expect("remaining");
        assert_eq!(remaining, Some(0));

        pool.close().await;
    }

    #[tokio::test]
    async fn reserve_without_a_configured_quota_reports_not_initialized() {
        let pool = setup_pool().await;
        let ledger = SqlQuotaLedger::new(pool.clone());
        let coupon_id = seed_coupon(&pool, "C-Q-003", None).await;

        let outcome = ledger
            .try_reserve(&coupon_id, "ALL", None, ts("2026-03-01T10:00:00Z"))
            .await
            .expect("reserve");
        assert_eq!(outcome, ReserveOutcome::NotInitialized);

        // No counter row is created for an unconfigured quota.
        let remaining = ledger.remaining(&coupon_id, "ALL").await.expect("remaining");
        assert_eq!(remaining, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn release_returns_budget_but_never_exceeds_the_quota() {
        let pool = setup_pool().await;
        let ledger = SqlQuotaLedger::new(pool.clone());
        let coupon_id = seed_coupon(&pool, "C-Q-004", Some(3)).await;
        let now = ts("2026-03-01T10:00:00Z");

        ledger.try_reserve(&coupon_id, "ALL", Some(3), now).await.expect("reserve");
        ledger.release(&coupon_id, "ALL", now).await.expect("release");
        assert_eq!(ledger.remaining(&coupon_id, "ALL").await.expect("remaining"), Some(3));

        // A stray second release must not push the counter above the quota.
        ledger.release(&coupon_id, "ALL", now).await.expect("release");
        assert_eq!(ledger.remaining(&coupon_id, "ALL").await.expect("remaining"), Some(3));

        pool.close().await;
    }

    #[tokio::test]
    async fn distinct_period_keys_hold_independent_counters() {
        let pool = setup_pool().await;
        let ledger = SqlQuotaLedger::new(pool.clone());
        let coupon_id = seed_coupon(&pool, "C-Q-005", Some(1)).await;
        let now = ts("2026-03-02T10:00:00Z");

        let monday = ledger
            .try_reserve(&coupon_id, "2026-03-02", Some(1), now)
            .await
            .expect("reserve monday");
        assert_eq!(monday, ReserveOutcome::Reserved);

        let monday_again = ledger
            .try_reserve(&coupon_id, "2026-03-02", Some(1), now)
            .await
            .expect("reserve monday again");
        assert_eq!(monday_again, ReserveOutcome::SoldOut);

        let tuesday = ledger
            .try_reserve(&coupon_id, "2026-03-03", Some(1), now)
            .await
            .expect("reserve tuesday");
        assert_eq!(tuesday, ReserveOutcome::Reserved);

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn seed_coupon(pool: &DbPool, id: &str, quota: Option<u32>) -> CouponId {
        let catalog = SqlCouponCatalog::new(pool.clone());
        let coupon = Coupon {
            id: CouponId(id.to_string()),
            name: "quota test".to_string(),
            policy: IssuePolicy::Once,
            quota,
            expire_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
            enabled: true,
            venue_ids: vec![VenueId(10)],
            max_receive_count_per_user: 1,
            same_venue_use: 1,
            created_at: ts("2026-02-01T09:00:00Z"),
            updated_at: ts("2026-02-01T09:00:00Z"),
        };
        catalog.save(coupon).await.expect("seed coupon");
        CouponId(id.to_string())
    }

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
