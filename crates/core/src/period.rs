//! Quota period keys.
//!
//! Quota counters and issuance windows are scoped by `(coupon, period key)`.
//! The key is derived purely from the caller-supplied clock, so replays and
//! backdated tests produce the same keys as live traffic.

use chrono::{DateTime, Datelike, Utc};

use crate::domain::coupon::IssuePolicy;

/// Period key for the whole coupon lifetime.
pub const ALL_PERIOD_KEY: &str = "ALL";

/// Returns the quota period key the given instant falls into.
///
/// `once` coupons share a single lifetime bucket, `daily` coupons bucket by
/// UTC calendar date, `weekly` coupons by ISO week (week-year aware, so late
/// December days may key into week 1 of the next year).
pub fn period_key(policy: &IssuePolicy, now: DateTime<Utc>) -> String {
    match policy {
        IssuePolicy::Once => ALL_PERIOD_KEY.to_string(),
        IssuePolicy::Daily => now.date_naive().format("%Y-%m-%d").to_string(),
        IssuePolicy::Weekly => {
            let week = now.date_naive().iso_week();
            format!("{:04}-W{:02}", week.year(), week.week())
        }
    }
}
