use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::commands::CommandResult;
use vouchy_core::config::{AppConfig, LoadOptions};
use vouchy_core::domain::coupon::CouponId;
use vouchy_core::domain::member::MemberId;
use vouchy_core::domain::venue::VenueId;
use vouchy_core::errors::{EngineError, ErrorClass};
use vouchy_db::{connect_with_settings, migrations, DemoSeedDataset};
use vouchy_engine::wire_engine;

// Round-trip probe: the daily demo coupon has the deepest budget, and
// member-smoke exists in the demo roster exactly for this command.
const SMOKE_COUPON: &str = "coupon-lunch-daily";
const SMOKE_MEMBER: &str = "member-smoke";
const SMOKE_VENUE: i64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("db_connectivity"));
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("demo_seed"));
            checks.push(skipped("issue_use_round_trip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("demo_seed"));
            checks.push(skipped("issue_use_round_trip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(async {
        connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
    });

    let pool = match db_result {
        Ok(pool) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("connected using `{}`", config.database.url),
            });
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: db_started.elapsed().as_millis() as u64,
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("migration_visibility"));
            checks.push(skipped("demo_seed"));
            checks.push(skipped("issue_use_round_trip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let migration_started = Instant::now();
    let migration_result = runtime.block_on(async { migrations::run_pending(&pool).await });
    match migration_result {
        Ok(()) => checks.push(SmokeCheck {
            name: "migration_visibility",
            status: SmokeStatus::Pass,
            elapsed_ms: migration_started.elapsed().as_millis() as u64,
            message: "migrations are visible and executable".to_string(),
        }),
        Err(error) => {
            checks.push(SmokeCheck {
                name: "migration_visibility",
                status: SmokeStatus::Fail,
                elapsed_ms: migration_started.elapsed().as_millis() as u64,
                message: format!("migration execution failed: {error}"),
            });
            checks.push(skipped("demo_seed"));
            checks.push(skipped("issue_use_round_trip"));
            runtime.block_on(async { pool.close().await });
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    }

    let seed_started = Instant::now();
    let seed_result = runtime.block_on(async {
        DemoSeedDataset::load(&pool).await.map_err(|error| error.to_string())?;
        let verification =
            DemoSeedDataset::verify(&pool).await.map_err(|error| error.to_string())?;
        if verification.all_present {
            Ok(())
        } else {
            Err("demo seed data does not match the contract".to_string())
        }
    });
    match seed_result {
        Ok(()) => checks.push(SmokeCheck {
            name: "demo_seed",
            status: SmokeStatus::Pass,
            elapsed_ms: seed_started.elapsed().as_millis() as u64,
            message: "demo coupons loaded and verified".to_string(),
        }),
        Err(error) => {
            checks.push(SmokeCheck {
                name: "demo_seed",
                status: SmokeStatus::Fail,
                elapsed_ms: seed_started.elapsed().as_millis() as u64,
                message: error,
            });
            checks.push(skipped("issue_use_round_trip"));
            runtime.block_on(async { pool.close().await });
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    }

    let round_trip_started = Instant::now();
    let round_trip = runtime.block_on(async {
        let engine = wire_engine(&pool);
        let coupon_id = CouponId(SMOKE_COUPON.to_string());
        let member_id = MemberId(SMOKE_MEMBER.to_string());
        let now = Utc::now();

        match engine.receive(&coupon_id, &VenueId(SMOKE_VENUE), &member_id, now).await {
            Ok(issued) => match engine.use_receipt(&issued.receipt_id, &member_id, now).await {
                Ok(()) => Ok(format!(
                    "issued receipt {} for `{SMOKE_COUPON}` and redeemed it at venue {SMOKE_VENUE}",
                    issued.receipt_id.0
                )),
                Err(error) => policy_outcome("redeem", error),
            },
            Err(error) => policy_outcome("issue", error),
        }
    });
    match round_trip {
        Ok(message) => checks.push(SmokeCheck {
            name: "issue_use_round_trip",
            status: SmokeStatus::Pass,
            elapsed_ms: round_trip_started.elapsed().as_millis() as u64,
            message,
        }),
        Err(message) => checks.push(SmokeCheck {
            name: "issue_use_round_trip",
            status: SmokeStatus::Fail,
            elapsed_ms: round_trip_started.elapsed().as_millis() as u64,
            message,
        }),
    }

    runtime.block_on(async { pool.close().await });
    finalize_report(checks, started.elapsed().as_millis() as u64)
}

/// A deterministic policy denial still proves the engine path end to end:
/// repeated smoke runs inside one policy window land here. Anything else
/// (missing demo records, storage faults) fails the check.
fn policy_outcome(stage: &str, error: EngineError) -> Result<String, String> {
    match error.classify() {
        ErrorClass::Deny => {
            Ok(format!("{stage} path verified via policy denial `{}`", error.code()))
        }
        _ => Err(format!("{stage} failed: {error}")),
    }
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
