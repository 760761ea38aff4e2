use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::venue::VenueId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CouponId(pub String);

/// How often one member may receive the coupon.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuePolicy {
    Once,
    Daily,
    Weekly,
}

impl IssuePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "once" => Some(Self::Once),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            _ => None,
        }
    }
}

/// Coupon definition as published by the catalog.
///
/// `quota` is the per-period issuance budget; a coupon with no quota
/// configured can never be issued. `expire_date` is inclusive: the coupon is
/// still receivable and usable on that calendar date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    pub name: String,
    pub policy: IssuePolicy,
    pub quota: Option<u32>,
    pub expire_date: NaiveDate,
    pub enabled: bool,
    pub venue_ids: Vec<VenueId>,
    pub max_receive_count_per_user: u32,
    pub same_venue_use: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    pub fn allows_venue(&self, venue_id: &VenueId) -> bool {
        self.venue_ids.contains(venue_id)
    }
}
