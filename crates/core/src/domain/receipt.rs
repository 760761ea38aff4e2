use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::coupon::CouponId;
use crate::domain::member::MemberId;
use crate::domain::venue::VenueId;
use crate::errors::CouponError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptState {
    Issued,
    Used,
}

impl ReceiptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Used => "used",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "issued" => Some(Self::Issued),
            "used" => Some(Self::Used),
            _ => None,
        }
    }
}

/// Proof of issuance held by a member. Redemption happens at the venue the
/// receipt was issued for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: ReceiptId,
    pub coupon_id: CouponId,
    pub member_id: MemberId,
    pub venue_id: VenueId,
    pub state: ReceiptState,
    pub received_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl Receipt {
    pub fn can_transition_to(&self, next: ReceiptState) -> bool {
        matches!((&self.state, next), (ReceiptState::Issued, ReceiptState::Used))
    }

    pub fn transition_to(&mut self, next: ReceiptState, at: DateTime<Utc>) -> Result<(), CouponError> {
        if !self.can_transition_to(next.clone()) {
            return Err(CouponError::AlreadyUsed);
        }

        self.state = next;
        self.used_at = Some(at);
        Ok(())
    }
}

/// Issuance timestamps of one member's prior receipts for one coupon,
/// ordered as returned by storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceiptHistory {
    received_at: Vec<DateTime<Utc>>,
}

impl ReceiptHistory {
    pub fn new(received_at: Vec<DateTime<Utc>>) -> Self {
        Self { received_at }
    }

    pub fn is_empty(&self) -> bool {
        self.received_at.is_empty()
    }

    pub fn total(&self) -> usize {
        self.received_at.len()
    }

    pub fn count_on(&self, date: NaiveDate) -> usize {
        self.received_at.iter().filter(|at| at.date_naive() == date).count()
    }

    pub fn count_in_iso_week(&self, date: NaiveDate) -> usize {
        let week = date.iso_week();
        self.received_at.iter().filter(|at| at.date_naive().iso_week() == week).count()
    }
}
