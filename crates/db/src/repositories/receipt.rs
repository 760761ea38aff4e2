use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use vouchy_core::domain::coupon::CouponId;
use vouchy_core::domain::member::MemberId;
use vouchy_core::domain::receipt::{Receipt, ReceiptHistory, ReceiptId, ReceiptState};
use vouchy_core::domain::venue::VenueId;

use super::{ReceiptStore, RepositoryError, UseOutcome};
use crate::DbPool;

/// Receipt persistence backed by the `receipt` and `venue_usage` tables.
///
/// `mark_used` performs the issued-to-used flip and the per-venue counter
/// increment inside one transaction. Either both land or neither does.
pub struct SqlReceiptStore {
    pool: DbPool,
}

impl SqlReceiptStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReceiptStore for SqlReceiptStore {
    async fn insert(&self, receipt: Receipt) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO receipt (
                id,
                coupon_id,
                member_id,
                venue_id,
                state,
                received_at,
                used_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&receipt.id.0)
        .bind(&receipt.coupon_id.0)
        .bind(&receipt.member_id.0)
        .bind(receipt.venue_id.0)
        .bind(receipt.state.as_str())
        .bind(receipt.received_at.to_rfc3339())
        .bind(receipt.used_at.map(|used_at| used_at.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &ReceiptId) -> Result<Option<Receipt>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                coupon_id,
                member_id,
                venue_id,
                state,
                received_at,
                used_at
             FROM receipt
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(receipt_from_row).transpose()
    }

    async fn history(
        &self,
        member_id: &MemberId,
        coupon_id: &CouponId,
    ) -> Result<ReceiptHistory, RepositoryError> {
        let rows = sqlx::query(
            "SELECT received_at
             FROM receipt
             WHERE member_id = ? AND coupon_id = ?
             ORDER BY received_at ASC",
        )
        .bind(&member_id.0)
        .bind(&coupon_id.0)
        .fetch_all(&self.pool)
        .await?;

        let received_at = rows
            .into_iter()
            .map(received_at_from_row)
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        Ok(ReceiptHistory::new(received_at))
    }

    async fn mark_used(
        &self,
        receipt: &Receipt,
        same_venue_use: u32,
        used_at: DateTime<Utc>,
    ) -> Result<UseOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let flipped = sqlx::query(
            "UPDATE receipt
             SET state = 'used', used_at = ?
             WHERE id = ? AND state = 'issued'",
        )
        .bind(used_at.to_rfc3339())
        .bind(&receipt.id.0)
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(UseOutcome::AlreadyUsed);
        }

        sqlx::query(
            "INSERT OR IGNORE INTO venue_usage (
                member_id,
                coupon_id,
                venue_id,
                used_count,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, 0, ?, ?)",
        )
        .bind(&receipt.member_id.0)
        .bind(&receipt.coupon_id.0)
        .bind(receipt.venue_id.0)
        .bind(used_at.to_rfc3339())
        .bind(used_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let counted = sqlx::query(
            "UPDATE venue_usage
             SET used_count = used_count + 1, updated_at = ?
             WHERE member_id = ? AND coupon_id = ? AND venue_id = ? AND used_count < ?",
        )
        .bind(used_at.to_rfc3339())
        .bind(&receipt.member_id.0)
        .bind(&receipt.coupon_id.0)
        .bind(receipt.venue_id.0)
        .bind(i64::from(same_venue_use))
        .execute(&mut *tx)
        .await?;

        if counted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(UseOutcome::VenueLimitExceeded);
        }

        tx.commit().await?;

        Ok(UseOutcome::Used)
    }

    async fn venue_usage(
        &self,
        member_id: &MemberId,
        coupon_id: &CouponId,
        venue_id: &VenueId,
    ) -> Result<u32, RepositoryError> {
        let row = sqlx::query(
            "SELECT used_count
             FROM venue_usage
             WHERE member_id = ? AND coupon_id = ? AND venue_id = ?",
        )
        .bind(&member_id.0)
        .bind(&coupon_id.0)
        .bind(venue_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(used_count_from_row).transpose()?.unwrap_or(0))
    }
}

fn receipt_from_row(row: SqliteRow) -> Result<Receipt, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = ReceiptState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown receipt state `{state_raw}`")))?;

    Ok(Receipt {
        id: ReceiptId(row.try_get("id")?),
        coupon_id: CouponId(row.try_get("coupon_id")?),
        member_id: MemberId(row.try_get("member_id")?),
        venue_id: VenueId(row.try_get("venue_id")?),
        state,
        received_at: parse_timestamp("received_at", row.try_get("received_at")?)?,
        used_at: parse_optional_timestamp("used_at", row.try_get("used_at")?)?,
    })
}

fn received_at_from_row(row: SqliteRow) -> Result<DateTime<Utc>, RepositoryError> {
    parse_timestamp("received_at", row.try_get("received_at")?)
}

fn used_count_from_row(row: SqliteRow) -> Result<u32, RepositoryError> {
    let value = row.try_get::<i64, _>("used_count")?;
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `used_count` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|inner| parse_timestamp(column, inner)).transpose()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, Utc};

    use vouchy_core::domain::coupon::{Coupon, CouponId, IssuePolicy};
    use vouchy_core::domain::member::MemberId;
    use vouchy_core::domain::receipt::{Receipt, ReceiptId, ReceiptState};
    use vouchy_core::domain::venue::VenueId;

    use super::SqlReceiptStore;
    use crate::migrations;
    use crate::repositories::catalog::SqlCouponCatalog;
    use crate::repositories::{CouponCatalog, ReceiptStore, UseOutcome};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn sql_store_round_trips_receipts() {
        let pool = setup_pool().await;
        let store = SqlReceiptStore::new(pool.clone());
        seed_coupon(&pool, "C-R-001").await;
        let receipt = sample_receipt("R-001", "C-R-001", "M-1", 10, "2026-03-01T10:00:00Z");

        store.insert(receipt.clone()).await.expect("insert receipt");

        let found = store.find_by_id(&receipt.id).await.expect("find receipt");
        assert_eq!(found, Some(receipt));

        pool.close().await;
    }

    #[tokio::test]
    async fn history_collects_issuance_timestamps_for_one_member_and_coupon() {
        let pool = setup_pool().await;
        let store = SqlReceiptStore::new(pool.clone());
        seed_coupon(&pool, "C-R-002").await;

        for (id, at) in [
            ("R-010", "2026-03-01T10:00:00Z"),
            ("R-011", "2026-03-02T11:00:00Z"),
            ("R-012", "2026-03-03T12:00:00Z"),
        ] {
            store
                .insert(sample_receipt(id, "C-R-002", "M-1", 10, at))
                .await
                .expect("insert receipt");
        }
        // Another member's receipt must not leak into the history.
        store
            .insert(sample_receipt("R-013", "C-R-002", "M-2", 10, "2026-03-01T10:00:00Z"))
            .await
            .expect("insert receipt");

        let history = store
            .history(&MemberId("M-1".to_string()), &CouponId("C-R-002".to_string()))
            .await
            .expect("load history");
        assert_eq!(history.total(), 3);
        assert_eq!(history.count_on(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn mark_used_flips_state_and_counts_the_venue_once() {
        let pool = setup_pool().await;
        let store = SqlReceiptStore::new(pool.clone());
        seed_coupon(&pool, "C-R-003").await;
        let receipt = sample_receipt("R-020", "C-R-003", "M-1", 10, "2026-03-01T10:00:00Z");
        store.insert(receipt.clone()).await.expect("insert receipt");

        let used_at = ts("2026-03-01T12:00:00Z");
        let outcome = store.mark_used(&receipt, 1, used_at).await.expect("mark used");
        assert_eq!(outcome, UseOutcome::Used);

        let reloaded = store.find_by_id(&receipt.id).await.expect("reload").expect("exists");
        assert_eq!(reloaded.state, ReceiptState::Used);
        assert_eq!(reloaded.used_at, Some(used_at));

        let count = store
            .venue_usage(&receipt.member_id, &receipt.coupon_id, &receipt.venue_id)
            .await
            .expect("venue usage");
        assert_eq!(count, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn mark_used_rejects_a_second_use_of_the_same_receipt() {
        let pool = setup_pool().await;
        let store = SqlReceiptStore::new(pool.clone());
        seed_coupon(&pool, "C-R-004").await;
        let receipt = sample_receipt("R-030", "C-R-004", "M-1", 10, "2026-03-01T10:00:00Z");
        store.insert(receipt.clone()).await.expect("insert receipt");

        let first = store.mark_used(&receipt, 5, ts("2026-03-01T12:00:00Z")).await.expect("first");
        assert_eq!(first, UseOutcome::Used);

        let second =
            store.mark_used(&receipt, 5, ts("2026-03-01T13:00:00Z")).await.expect("second");
        assert_eq!(second, UseOutcome::AlreadyUsed);

        // The venue counter must not move on the rejected attempt.
        let count = store
            .venue_usage(&receipt.member_id, &receipt.coupon_id, &receipt.venue_id)
            .await
            .expect("venue usage");
        assert_eq!(count, 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn mark_used_rolls_back_the_flip_when_the_venue_cap_is_exhausted() {
        let pool = setup_pool().await;
        let store = SqlReceiptStore::new(pool.clone());
        seed_coupon(&pool, "C-R-005").await;
        let first = sample_receipt("R-040", "C-R-005", "M-1", 10, "2026-03-01T10:00:00Z");
        let second = sample_receipt("R-041", "C-R-005", "M-1", 10, "2026-03-02T10:00:00Z");
        store.insert(first.clone()).await.expect("insert first");
        store.insert(second.clone()).await.expect("insert second");

        let outcome = store.mark_used(&first, 1, ts("2026-03-01T12:00:00Z")).await.expect("first");
        assert_eq!(outcome, UseOutcome::Used);

        let outcome =
            store.mark_used(&second, 1, ts("2026-03-02T12:00:00Z")).await.expect("second");
        assert_eq!(outcome, UseOutcome::VenueLimitExceeded);

        // The rejected receipt stays issued so it can be redeemed elsewhere.
        let reloaded = store.find_by_id(&second.id).await.expect("reload").expect("exists");
        assert_eq!(reloaded.state, ReceiptState::Issued);
        assert_eq!(reloaded.used_at, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn venue_usage_defaults_to_zero_without_a_counter_row() {
        let pool = setup_pool().await;
        let store = SqlReceiptStore::new(pool.clone());

        let count = store
            .venue_usage(
                &MemberId("M-1".to_string()),
                &CouponId("C-NONE".to_string()),
                &VenueId(10),
            )
            .await
            .expect("venue usage");
        assert_eq!(count, 0);

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn seed_coupon(pool: &DbPool, id: &str) {
        let catalog = SqlCouponCatalog::new(pool.clone());
        let coupon = Coupon {
            id: CouponId(id.to_string()),
            name: "receipt test".to_string(),
            policy: IssuePolicy::Daily,
            quota: Some(10),
            expire_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
            enabled: true,
            venue_ids: vec![VenueId(10)],
            max_receive_count_per_user: 5,
            same_venue_use: 5,
            created_at: ts("2026-02-01T09:00:00Z"),
            updated_at: ts("2026-02-01T09:00:00Z"),
        };
        catalog.save(coupon).await.expect("seed coupon");
    }

    fn sample_receipt(
        id: &str,
        coupon_id: &str,
        member_id: &str,
        venue_id: i64,
        received_at: &str,
    ) -> Receipt {
        Receipt {
            id: ReceiptId(id.to_string()),
            coupon_id: CouponId(coupon_id.to_string()),
            member_id: MemberId(member_id.to_string()),
            venue_id: VenueId(venue_id),
            state: ReceiptState::Issued,
            received_at: ts(received_at),
            used_at: None,
        }
    }

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }
}
