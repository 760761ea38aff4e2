use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use vouchy_core::domain::coupon::{Coupon, CouponId, IssuePolicy};
use vouchy_core::domain::venue::VenueId;

use super::{CouponCatalog, RepositoryError};
use crate::DbPool;

pub struct SqlCouponCatalog {
    pool: DbPool,
}

impl SqlCouponCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CouponCatalog for SqlCouponCatalog {
    async fn find_by_id(&self, id: &CouponId) -> Result<Option<Coupon>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                name,
                policy,
                quota,
                expire_date,
                enabled,
                max_receive_count_per_user,
                same_venue_use,
                created_at,
                updated_at
             FROM coupon
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let venue_rows = sqlx::query(
            "SELECT venue_id
             FROM coupon_venue
             WHERE coupon_id = ?
             ORDER BY venue_id ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let venue_ids = venue_rows
            .into_iter()
            .map(venue_id_from_row)
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        coupon_from_row(row, venue_ids).map(Some)
    }

    async fn save(&self, coupon: Coupon) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO coupon (
                id,
                name,
                policy,
                quota,
                expire_date,
                enabled,
                max_receive_count_per_user,
                same_venue_use,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                policy = excluded.policy,
                quota = excluded.quota,
                expire_date = excluded.expire_date,
                enabled = excluded.enabled,
                max_receive_count_per_user = excluded.max_receive_count_per_user,
                same_venue_use = excluded.same_venue_use,
                updated_at = excluded.updated_at",
        )
        .bind(&coupon.id.0)
        .bind(&coupon.name)
        .bind(coupon.policy.as_str())
        .bind(coupon.quota.map(i64::from))
        .bind(coupon.expire_date.format("%Y-%m-%d").to_string())
        .bind(coupon.enabled)
        .bind(i64::from(coupon.max_receive_count_per_user))
        .bind(i64::from(coupon.same_venue_use))
        .bind(coupon.created_at.to_rfc3339())
        .bind(coupon.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM coupon_venue WHERE coupon_id = ?")
            .bind(&coupon.id.0)
            .execute(&mut *tx)
            .await?;

        for venue_id in &coupon.venue_ids {
            sqlx::query("INSERT INTO coupon_venue (coupon_id, venue_id) VALUES (?, ?)")
                .bind(&coupon.id.0)
                .bind(venue_id.0)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(())
    }
}

fn coupon_from_row(row: SqliteRow, venue_ids: Vec<VenueId>) -> Result<Coupon, RepositoryError> {
    let policy_raw = row.try_get::<String, _>("policy")?;
    let policy = IssuePolicy::parse(&policy_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown issue policy `{policy_raw}`")))?;

    Ok(Coupon {
        id: CouponId(row.try_get("id")?),
        name: row.try_get("name")?,
        policy,
        quota: parse_optional_u32("quota", row.try_get("quota")?)?,
        expire_date: parse_date("expire_date", row.try_get("expire_date")?)?,
        enabled: row.try_get("enabled")?,
        venue_ids,
        max_receive_count_per_user: parse_u32(
            "max_receive_count_per_user",
            row.try_get("max_receive_count_per_user")?,
        )?,
        same_venue_use: parse_u32("same_venue_use", row.try_get("same_venue_use")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn venue_id_from_row(row: SqliteRow) -> Result<VenueId, RepositoryError> {
    Ok(VenueId(row.try_get("venue_id")?))
}

fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

fn parse_optional_u32(column: &str, value: Option<i64>) -> Result<Option<u32>, RepositoryError> {
    value.map(|inner| parse_u32(column, inner)).transpose()
}

fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
