//! Issuance eligibility checks.
//!
//! Evaluation is a pure function of the coupon definition, the member's
//! receipt history for that coupon, and the caller-supplied clock. No I/O
//! happens here. Checks run in a fixed precedence order so a coupon that is
//! both expired and disabled always reports the same denial.

use chrono::{DateTime, Utc};

use crate::domain::coupon::{Coupon, IssuePolicy};
use crate::domain::receipt::ReceiptHistory;
use crate::errors::CouponError;

/// Full eligibility evaluation in denial-precedence order: expiry, enabled
/// flag, quota configuration, then the per-member policy window and receive
/// cap.
pub fn evaluate(
    coupon: &Coupon,
    history: &ReceiptHistory,
    now: DateTime<Utc>,
) -> Result<(), CouponError> {
    if now.date_naive() > coupon.expire_date {
        return Err(CouponError::CouponExpired);
    }
    if !coupon.enabled {
        return Err(CouponError::CouponDisabled);
    }
    if coupon.quota.is_none() {
        return Err(CouponError::QuotaNotInitialized);
    }

    evaluate_window(coupon, history, now)
}

/// Policy-window and receive-cap checks only.
///
/// The engine runs this a second time against a fresh history snapshot after
/// quota reservation; the static coupon checks of [`evaluate`] cannot change
/// between the two calls and are not repeated.
pub fn evaluate_window(
    coupon: &Coupon,
    history: &ReceiptHistory,
    now: DateTime<Utc>,
) -> Result<(), CouponError> {
    let today = now.date_naive();
    let cap = coupon.max_receive_count_per_user as usize;

    match coupon.policy {
        IssuePolicy::Once => {
            if !history.is_empty() {
                return Err(CouponError::AlreadyReceived);
            }
            if history.total() >= cap {
                return Err(CouponError::ReceiveLimitExceeded);
            }
        }
        IssuePolicy::Daily => {
            if history.count_on(today) > 0 {
                return Err(CouponError::AlreadyReceivedToday);
            }
            if history.total() >= cap {
                return Err(CouponError::ReceiveLimitExceeded);
            }
        }
        IssuePolicy::Weekly => {
            // Window and cap coincide: the cap counts receipts inside the
            // current ISO week.
            if history.count_in_iso_week(today) >= cap {
                return Err(CouponError::ReceiveLimitExceeded);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, Utc};

    use crate::domain::coupon::{Coupon, CouponId, IssuePolicy};
    use crate::domain::receipt::ReceiptHistory;
    use crate::domain::venue::VenueId;
    use crate::errors::CouponError;

    use super::{evaluate, evaluate_window};

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc)
    }

    fn coupon(policy: IssuePolicy, max_receive_count_per_user: u32) -> Coupon {
        Coupon {
            id: CouponId("C-1".to_string()),
            name: "house espresso".to_string(),
            policy,
            quota: Some(100),
            expire_date: NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
            enabled: true,
            venue_ids: vec![VenueId(10)],
            max_receive_count_per_user,
            same_venue_use: 1,
            created_at: ts("2026-01-01T00:00:00Z"),
            updated_at: ts("2026-01-01T00:00:00Z"),
        }
    }

    #[test]
    fn fresh_member_is_eligible() {
        let coupon = coupon(IssuePolicy::Once, 1);
        let result = evaluate(&coupon, &ReceiptHistory::default(), ts("2026-03-01T12:00:00Z"));

        assert_eq!(result, Ok(()));
    }

    #[test]
    fn expire_date_is_inclusive() {
        let coupon = coupon(IssuePolicy::Once, 1);

        let on_the_day = evaluate(&coupon, &ReceiptHistory::default(), ts("2026-06-30T23:59:59Z"));
        assert_eq!(on_the_day, Ok(()));

        let day_after = evaluate(&coupon, &ReceiptHistory::default(), ts("2026-07-01T00:00:00Z"));
        assert_eq!(day_after, Err(CouponError::CouponExpired));
    }

    #[test]
    fn expiry_outranks_the_disabled_flag() {
        let mut coupon = coupon(IssuePolicy::Once, 1);
        coupon.enabled = false;

        let result = evaluate(&coupon, &ReceiptHistory::default(), ts("2026-07-01T00:00:00Z"));
        assert_eq!(result, Err(CouponError::CouponExpired));
    }

    #[test]
    fn disabled_coupon_is_denied() {
        let mut coupon = coupon(IssuePolicy::Once, 1);
        coupon.enabled = false;

        let result = evaluate(&coupon, &ReceiptHistory::default(), ts("2026-03-01T12:00:00Z"));
        assert_eq!(result, Err(CouponError::CouponDisabled));
    }

    #[test]
    fn missing_quota_is_denied_before_window_checks() {
        let mut coupon = coupon(IssuePolicy::Once, 1);
        coupon.quota = None;

        let result = evaluate(&coupon, &ReceiptHistory::default(), ts("2026-03-01T12:00:00Z"));
        assert_eq!(result, Err(CouponError::QuotaNotInitialized));
    }

    #[test]
    fn once_policy_denies_any_second_receive() {
        let coupon = coupon(IssuePolicy::Once, 1);
        let history = ReceiptHistory::new(vec![ts("2026-02-01T12:00:00Z")]);

        let result = evaluate(&coupon, &history, ts("2026-03-01T12:00:00Z"));
        assert_eq!(result, Err(CouponError::AlreadyReceived));
    }

    #[test]
    fn daily_policy_denies_second_receive_on_the_same_day() {
        let coupon = coupon(IssuePolicy::Daily, 5);
        let history = ReceiptHistory::new(vec![ts("2026-03-01T08:00:00Z")]);

        let same_day = evaluate(&coupon, &history, ts("2026-03-01T20:00:00Z"));
        assert_eq!(same_day, Err(CouponError::AlreadyReceivedToday));

        let next_day = evaluate(&coupon, &history, ts("2026-03-02T08:00:00Z"));
        assert_eq!(next_day, Ok(()));
    }

    #[test]
    fn daily_policy_enforces_the_lifetime_cap() {
        let coupon = coupon(IssuePolicy::Daily, 2);
        let history =
            ReceiptHistory::new(vec![ts("2026-03-01T08:00:00Z"), ts("2026-03-02T08:00:00Z")]);

        let result = evaluate(&coupon, &history, ts("2026-03-03T08:00:00Z"));
        assert_eq!(result, Err(CouponError::ReceiveLimitExceeded));
    }

    #[test]
    fn weekly_policy_caps_within_the_iso_week() {
        let coupon = coupon(IssuePolicy::Weekly, 2);
        // Monday and Tuesday of ISO week 2026-W10.
        let history =
            ReceiptHistory::new(vec![ts("2026-03-02T08:00:00Z"), ts("2026-03-03T08:00:00Z")]);

        let same_week = evaluate(&coupon, &history, ts("2026-03-06T08:00:00Z"));
        assert_eq!(same_week, Err(CouponError::ReceiveLimitExceeded));

        let next_week = evaluate(&coupon, &history, ts("2026-03-09T08:00:00Z"));
        assert_eq!(next_week, Ok(()));
    }

    #[test]
    fn zero_receive_cap_always_denies() {
        let coupon = coupon(IssuePolicy::Daily, 0);

        let result = evaluate(&coupon, &ReceiptHistory::default(), ts("2026-03-01T12:00:00Z"));
        assert_eq!(result, Err(CouponError::ReceiveLimitExceeded));
    }

    #[test]
    fn window_recheck_skips_static_coupon_checks() {
        let mut coupon = coupon(IssuePolicy::Once, 1);
        coupon.quota = None;

        let result =
            evaluate_window(&coupon, &ReceiptHistory::default(), ts("2026-03-01T12:00:00Z"));
        assert_eq!(result, Ok(()));
    }
}
