use thiserror::Error;

/// Deterministic issuance and redemption denial reasons.
///
/// Every variant maps to a stable machine-readable code so callers can branch
/// on the outcome without parsing display text. Contention never surfaces as
/// a generic failure: a lost quota race is `QuotaSoldOut`, a lost window race
/// is the matching policy denial.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CouponError {
    #[error("coupon not found")]
    CouponNotFound,
    #[error("member not found")]
    MemberNotFound,
    #[error("venue not found")]
    VenueNotFound,
    #[error("receipt not found")]
    ReceiptNotFound,
    #[error("venue is not eligible for this coupon")]
    VenueNotEligible,
    #[error("coupon is disabled")]
    CouponDisabled,
    #[error("coupon is past its expire date")]
    CouponExpired,
    #[error("coupon quota has not been initialized")]
    QuotaNotInitialized,
    #[error("coupon quota is sold out")]
    QuotaSoldOut,
    #[error("coupon was already received")]
    AlreadyReceived,
    #[error("coupon was already received today")]
    AlreadyReceivedToday,
    #[error("coupon receive limit exceeded")]
    ReceiveLimitExceeded,
    #[error("receipt was already used")]
    AlreadyUsed,
    #[error("receipt belongs to another member")]
    Forbidden,
    #[error("coupon use limit at this venue exceeded")]
    VenueUseLimitExceeded,
}

impl CouponError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CouponNotFound => "COUPON_NOT_FOUND",
            Self::MemberNotFound => "MEMBER_NOT_FOUND",
            Self::VenueNotFound => "VENUE_NOT_FOUND",
            Self::ReceiptNotFound => "RECEIPT_NOT_FOUND",
            Self::VenueNotEligible => "VENUE_NOT_ELIGIBLE",
            Self::CouponDisabled => "COUPON_DISABLED",
            Self::CouponExpired => "COUPON_EXPIRED",
            Self::QuotaNotInitialized => "COUPON_QUOTA_NOT_INITIALIZED",
            Self::QuotaSoldOut => "COUPON_QUOTA_SOLD_OUT",
            Self::AlreadyReceived => "COUPON_ALREADY_RECEIVED",
            Self::AlreadyReceivedToday => "COUPON_ALREADY_RECEIVED_TODAY",
            Self::ReceiveLimitExceeded => "COUPON_RECEIVE_LIMIT_EXCEEDED",
            Self::AlreadyUsed => "COUPON_ALREADY_USED",
            Self::Forbidden => "FORBIDDEN",
            Self::VenueUseLimitExceeded => "COUPON_VENUE_USE_LIMIT_EXCEEDED",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CouponNotFound
            | Self::MemberNotFound
            | Self::VenueNotFound
            | Self::ReceiptNotFound => ErrorClass::NotFound,
            _ => ErrorClass::Deny,
        }
    }
}

/// Transport-facing classification of an engine outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Deny,
    Internal,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Coupon(#[from] CouponError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            Self::Coupon(error) => error.class(),
            Self::Persistence(_) | Self::Configuration(_) => ErrorClass::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Coupon(error) => error.code(),
            Self::Persistence(_) => "PERSISTENCE_FAILURE",
            Self::Configuration(_) => "CONFIGURATION_FAILURE",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self.classify() {
            ErrorClass::NotFound => "The requested record could not be found.",
            ErrorClass::Deny => "The request was denied by coupon policy.",
            ErrorClass::Internal => "The service is temporarily unavailable. Please retry shortly.",
        }
    }
}
