use crate::commands::CommandResult;
use vouchy_core::config::{AppConfig, LoadOptions};
use vouchy_db::{connect_with_settings, migrations, CouponSeedInfo, DemoSeedDataset};

/// Loads (or with `verify_only` just checks) the demo coupon dataset.
pub fn run(verify_only: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "seed",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let coupons = if verify_only {
            None
        } else {
            let seed_result = DemoSeedDataset::load(&pool)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
            Some(seed_result.coupons_seeded)
        };

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<Option<Vec<CouponSeedInfo>>, (&'static str, String, u8)> =
            if !verification.all_present {
                let failed_checks = verification
                    .checks
                    .iter()
                    .filter_map(|(check, passed)| (!passed).then_some(*check))
                    .collect::<Vec<_>>();
                let message = if failed_checks.is_empty() {
                    "some seed data failed verification".to_string()
                } else {
                    format!("seed verification failed for checks: {}", failed_checks.join(", "))
                };
                Err(("seed_verification", message, 6u8))
            } else {
                Ok(coupons)
            };

        pool.close().await;
        run_result
    });

    match result {
        Ok(Some(coupons)) => {
            let coupon_lines: Vec<String> = coupons
                .iter()
                .map(|coupon| {
                    format!("  - {} ({}): {}", coupon.coupon_id, coupon.policy, coupon.description)
                })
                .collect();
            let message = format!(
                "demo seed dataset loaded, one coupon per issuance policy:\n{}",
                coupon_lines.join("\n")
            );
            CommandResult::success("seed", message)
        }
        Ok(None) => CommandResult::success("seed", "demo seed dataset verified against contract"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}
