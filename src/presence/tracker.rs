//! Presence tracking
//!
//! The tracker never applies presence deltas. Every enter/leave/update event
//! triggers a full member-list fetch, and the fetched list replaces the
//! mapping wholesale. Fetches can resolve out of order, so each one carries a
//! `ResyncTicket`; a result older than the last applied one is dropped.

use serde::Serialize;
use tracing::{debug, warn};

use crate::transport::{MemberData, PresenceMember};
use crate::utils::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub client_id: String,
    pub username: String,
}

impl From<PresenceMember> for Member {
    fn from(member: PresenceMember) -> Self {
        let username = serde_json::from_value::<MemberData>(member.data)
            .map(|data| data.username)
            .unwrap_or_else(|_| member.client_id.clone());
        Self {
            client_id: member.client_id,
            username,
        }
    }
}

/// Sequence number of one member-list request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResyncTicket(u64);

#[derive(Debug, Default)]
pub struct PresenceTracker {
    members: Vec<Member>,
    issued: u64,
    applied: u64,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_resync(&mut self) -> ResyncTicket {
        self.issued += 1;
        ResyncTicket(self.issued)
    }

    /// Replace the membership with `members` unless a newer resync has
    /// already been applied. Returns whether the snapshot changed hands.
    pub fn apply(&mut self, ticket: ResyncTicket, members: Vec<PresenceMember>) -> bool {
        if ticket.0 <= self.applied {
            debug!(
                ticket = ticket.0,
                applied = self.applied,
                "dropping stale presence resync"
            );
            return false;
        }
        self.applied = ticket.0;

        let mut next: Vec<Member> = Vec::with_capacity(members.len());
        for member in members.into_iter().map(Member::from) {
            match next.iter_mut().find(|m| m.client_id == member.client_id) {
                Some(existing) => *existing = member,
                None => next.push(member),
            }
        }
        self.members = next;
        true
    }

    /// A failed fetch keeps the last good snapshot.
    pub fn fail(&mut self, ticket: ResyncTicket, err: &TransportError) {
        warn!(
            ticket = ticket.0,
            "presence resync failed, keeping last snapshot: {err}"
        );
    }

    pub fn snapshot(&self) -> Vec<Member> {
        self.members.clone()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.members.iter().any(|m| m.client_id == client_id)
    }
}
