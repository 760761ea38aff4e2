//! Startup wiring: configuration, database, migrations, engine.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use vouchy_core::config::{AppConfig, ConfigError, LoadOptions};
use vouchy_core::domain::member::{Member, MemberId};
use vouchy_core::domain::venue::{Venue, VenueId};
use vouchy_db::repositories::{SqlCouponCatalog, SqlQuotaLedger, SqlReceiptStore};
use vouchy_db::{connect_with_settings, migrations, DbPool};

use crate::directory::{StaticMemberDirectory, StaticVenueDirectory};
use crate::engine::{CouponEngine, TracingAuditSink};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: CouponEngine,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

/// Brings the engine up from configuration to a wired [`Application`].
///
/// Order is fixed: load and validate config, open the pool, apply pending
/// migrations, wire the engine. Each milestone logs a structured event so a
/// failed start pinpoints the stage that broke.
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let engine = wire_engine(&db_pool);
    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        "coupon engine wired"
    );

    Ok(Application { config, db_pool, engine })
}

/// Wires a [`CouponEngine`] over an existing pool: SQL-backed repositories,
/// the demo rosters as directories, audit to the log stream.
pub fn wire_engine(pool: &DbPool) -> CouponEngine {
    CouponEngine::new(
        Arc::new(SqlCouponCatalog::new(pool.clone())),
        Arc::new(SqlQuotaLedger::new(pool.clone())),
        Arc::new(SqlReceiptStore::new(pool.clone())),
        Arc::new(StaticMemberDirectory::new(demo_members())),
        Arc::new(StaticVenueDirectory::new(demo_venues())),
        Arc::new(TracingAuditSink),
    )
}

/// Demo member roster. A deployment swaps the static directory for its own
/// membership system; the ids here line up with the seed fixtures and the
/// smoke command.
pub fn demo_members() -> Vec<Member> {
    vec![
        Member { id: MemberId("member-ada".to_string()), name: "Ada Lin".to_string() },
        Member { id: MemberId("member-bruno".to_string()), name: "Bruno Mares".to_string() },
        Member { id: MemberId("member-chloe".to_string()), name: "Chloe Park".to_string() },
        Member { id: MemberId("member-smoke".to_string()), name: "Smoke Probe".to_string() },
    ]
}

/// Demo venue roster covering every venue the seed coupons allow.
pub fn demo_venues() -> Vec<Venue> {
    vec![
        Venue { id: VenueId(1), name: "Dockside Terrace".to_string() },
        Venue { id: VenueId(2), name: "Copper Kettle".to_string() },
        Venue { id: VenueId(3), name: "Juniper Hall".to_string() },
        Venue { id: VenueId(10), name: "Harbor Cafe".to_string() },
        Venue { id: VenueId(20), name: "Old Mill Bakery".to_string() },
    ]
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, Utc};

    use vouchy_core::config::{ConfigOverrides, LoadOptions};
    use vouchy_core::domain::coupon::{Coupon, CouponId, IssuePolicy};
    use vouchy_core::domain::member::MemberId;
    use vouchy_core::domain::venue::VenueId;
    use vouchy_db::repositories::{CouponCatalog, SqlCouponCatalog};

    use super::bootstrap;

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc)
    }

    fn options(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_an_invalid_database_url() {
        let result = bootstrap(options("postgres://elsewhere/vouchy")).await;

        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("database.url"), "got: {message}");
    }

    #[tokio::test]
    async fn bootstrap_wires_a_working_engine_over_a_fresh_database() {
        let app = bootstrap(options("sqlite::memory:?cache=shared"))
            .await
            .expect("bootstrap should succeed against in-memory sqlite");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('coupon', 'coupon_quota', 'receipt', 'venue_usage')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 4, "migrations should create the coupon tables");

        let catalog = SqlCouponCatalog::new(app.db_pool.clone());
        catalog
            .save(Coupon {
                id: CouponId("coupon-boot".to_string()),
                name: "bootstrap check".to_string(),
                policy: IssuePolicy::Daily,
                quota: Some(5),
                expire_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
                enabled: true,
                venue_ids: vec![VenueId(10)],
                max_receive_count_per_user: 3,
                same_venue_use: 1,
                created_at: ts("2026-01-01T00:00:00Z"),
                updated_at: ts("2026-01-01T00:00:00Z"),
            })
            .await
            .expect("seed coupon");

        let now = ts("2026-03-02T09:30:00Z");
        let issued = app
            .engine
            .receive(
                &CouponId("coupon-boot".to_string()),
                &VenueId(10),
                &MemberId("member-ada".to_string()),
                now,
            )
            .await
            .expect("receive through the wired engine");

        app.engine
            .use_receipt(&issued.receipt_id, &MemberId("member-ada".to_string()), now)
            .await
            .expect("use through the wired engine");
    }
}
