pub mod audit;
pub mod config;
pub mod domain;
pub mod eligibility;
pub mod errors;
pub mod period;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
};
pub use domain::coupon::{Coupon, CouponId, IssuePolicy};
pub use domain::member::{Member, MemberId};
pub use domain::receipt::{Receipt, ReceiptHistory, ReceiptId, ReceiptState};
pub use domain::venue::{Venue, VenueId};
pub use errors::{CouponError, EngineError, ErrorClass};
pub use period::{period_key, ALL_PERIOD_KEY};
