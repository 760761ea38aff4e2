use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Canonical demo seeds and verification contract, one coupon per policy.
const SEED_COUPONS: &[SeedCouponContract] = &[
    SeedCouponContract {
        coupon_id: "coupon-grand-opening",
        name: "Grand Opening Special",
        policy: "once",
        quota: Some(1),
        expire_date: "2026-12-31",
        enabled: true,
        venue_ids: &[10],
        max_receive_count_per_user: 1,
        same_venue_use: 1,
        description: "Single-unit launch giveaway, one per member for life",
    },
    SeedCouponContract {
        coupon_id: "coupon-lunch-daily",
        name: "Weekday Lunch Deal",
        policy: "daily",
        quota: Some(100),
        expire_date: "2026-12-31",
        enabled: true,
        venue_ids: &[10, 20],
        max_receive_count_per_user: 30,
        same_venue_use: 2,
        description: "High-volume daily coupon refreshed every calendar day",
    },
    SeedCouponContract {
        coupon_id: "coupon-weekend-brunch",
        name: "Weekend Brunch Pass",
        policy: "weekly",
        quota: Some(10),
        expire_date: "2026-09-30",
        enabled: true,
        venue_ids: &[1, 2, 3],
        max_receive_count_per_user: 2,
        same_venue_use: 1,
        description: "Weekly multi-venue pass capped at two receipts per ISO week",
    },
];

const SEED_COUPON_IDS: &[&str] =
    &["coupon-grand-opening", "coupon-lunch-daily", "coupon-weekend-brunch"];

/// Demo seed dataset covering the three issuance policies.
///
/// Provides deterministic fixtures for:
/// 1. A lifetime-once coupon with a single unit of quota
/// 2. A daily coupon with a deep per-day budget
/// 3. A weekly multi-venue coupon with a per-user cap
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// SQL fixture content for the demo seed data.
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    /// Load the demo seed dataset into the database.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let coupons_seeded = SEED_COUPONS
            .iter()
            .map(|coupon| CouponSeedInfo {
                coupon_id: coupon.coupon_id,
                policy: coupon.policy,
                description: coupon.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { coupons_seeded })
    }

    /// Verify that seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for coupon in SEED_COUPONS {
            let row_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM coupon
                    WHERE id = ?1 AND name = ?2 AND policy = ?3 AND enabled = ?4
                      AND expire_date = ?5
                )",
            )
            .bind(coupon.coupon_id)
            .bind(coupon.name)
            .bind(coupon.policy)
            .bind(coupon.enabled)
            .bind(coupon.expire_date)
            .fetch_one(pool)
            .await?;
            checks.push((coupon.coupon_id, row_ok == 1));

            let quota_ok: i64 = match coupon.quota {
                Some(quota) => {
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM coupon WHERE id = ?1 AND quota = ?2)")
                        .bind(coupon.coupon_id)
                        .bind(quota)
                        .fetch_one(pool)
                        .await?
                }
                None => {
                    sqlx::query_scalar(
                        "SELECT EXISTS(SELECT 1 FROM coupon WHERE id = ?1 AND quota IS NULL)",
                    )
                    .bind(coupon.coupon_id)
                    .fetch_one(pool)
                    .await?
                }
            };
            checks.push((coupon.quota_label(), quota_ok == 1));

            let venue_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM coupon_venue WHERE coupon_id = ?1")
                    .bind(coupon.coupon_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((coupon.venue_count_label(), venue_count == coupon.venue_ids.len() as i64));

            let limits_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(
                    SELECT 1 FROM coupon
                    WHERE id = ?1 AND max_receive_count_per_user = ?2 AND same_venue_use = ?3
                )",
            )
            .bind(coupon.coupon_id)
            .bind(coupon.max_receive_count_per_user)
            .bind(coupon.same_venue_use)
            .fetch_one(pool)
            .await?;
            checks.push((coupon.limits_label(), limits_ok == 1));

            for venue_id in coupon.venue_ids {
                let venue_ok: i64 = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM coupon_venue WHERE coupon_id = ?1 AND venue_id = ?2)",
                )
                .bind(coupon.coupon_id)
                .bind(venue_id)
                .fetch_one(pool)
                .await?;
                checks.push((coupon.venue_membership_label(), venue_ok == 1));
            }
        }

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Clean up seeded fixtures from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_coupons = sql_array_from_ids(SEED_COUPON_IDS);

        sqlx::query(&format!("DELETE FROM receipt WHERE coupon_id IN {quoted_coupons}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM venue_usage WHERE coupon_id IN {quoted_coupons}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM coupon_quota WHERE coupon_id IN {quoted_coupons}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM coupon_venue WHERE coupon_id IN {quoted_coupons}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM coupon WHERE id IN {quoted_coupons}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedCouponContract {
    coupon_id: &'static str,
    name: &'static str,
    policy: &'static str,
    quota: Option<i64>,
    expire_date: &'static str,
    enabled: bool,
    venue_ids: &'static [i64],
    max_receive_count_per_user: i64,
    same_venue_use: i64,
    description: &'static str,
}

impl SeedCouponContract {
    fn quota_label(&self) -> &'static str {
        match self.policy {
            "once" => "coupon-once-quota",
            "daily" => "coupon-daily-quota",
            _ => "coupon-weekly-quota",
        }
    }

    fn venue_count_label(&self) -> &'static str {
        match self.policy {
            "once" => "coupon-once-venue-count",
            "daily" => "coupon-daily-venue-count",
            _ => "coupon-weekly-venue-count",
        }
    }

    fn venue_membership_label(&self) -> &'static str {
        match self.policy {
            "once" => "coupon-once-venue-membership",
            "daily" => "coupon-daily-venue-membership",
            _ => "coupon-weekly-venue-membership",
        }
    }

    fn limits_label(&self) -> &'static str {
        match self.policy {
            "once" => "coupon-once-limits",
            "daily" => "coupon-daily-limits",
            _ => "coupon-weekly-limits",
        }
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub coupons_seeded: Vec<CouponSeedInfo>,
}

#[derive(Debug)]
pub struct CouponSeedInfo {
    pub coupon_id: &'static str,
    pub policy: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
