use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use vouchy_core::domain::member::{Member, MemberId};
use vouchy_core::domain::venue::{Venue, VenueId};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory lookup failed: {0}")]
    Lookup(String),
}

/// Lookup seam for the member population.
///
/// Production deployments back this with whatever system of record owns
/// members; the engine only needs existence checks.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn find_by_id(&self, id: &MemberId) -> Result<Option<Member>, DirectoryError>;
}

#[async_trait]
pub trait VenueDirectory: Send + Sync {
    async fn find_by_id(&self, id: &VenueId) -> Result<Option<Venue>, DirectoryError>;
}

/// Fixed member roster, used by demos and tests.
#[derive(Default)]
pub struct StaticMemberDirectory {
    members: HashMap<String, Member>,
}

impl StaticMemberDirectory {
    pub fn new(members: impl IntoIterator<Item = Member>) -> Self {
        Self {
            members: members.into_iter().map(|member| (member.id.0.clone(), member)).collect(),
        }
    }
}

#[async_trait]
impl MemberDirectory for StaticMemberDirectory {
    async fn find_by_id(&self, id: &MemberId) -> Result<Option<Member>, DirectoryError> {
        Ok(self.members.get(&id.0).cloned())
    }
}

/// Fixed venue roster, used by demos and tests.
#[derive(Default)]
pub struct StaticVenueDirectory {
    venues: HashMap<i64, Venue>,
}

impl StaticVenueDirectory {
    pub fn new(venues: impl IntoIterator<Item = Venue>) -> Self {
        Self { venues: venues.into_iter().map(|venue| (venue.id.0, venue)).collect() }
    }
}

#[async_trait]
impl VenueDirectory for StaticVenueDirectory {
    async fn find_by_id(&self, id: &VenueId) -> Result<Option<Venue>, DirectoryError> {
        Ok(self.venues.get(&id.0).cloned())
    }
}
