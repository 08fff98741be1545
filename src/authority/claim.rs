//! Timestamped ownership claims and the tie-break that orders them

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::core::types::{ObjectId, ParticipantId, RequestId, ServerTime};

/// What triggered a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimKind {
    Grab,
    Collision,
}

/// Precedence key of a claim: earlier stamp first, then lower participant id
///
/// Every peer and the server compare claims with this ordering, so all of
/// them agree on the winner without a lock. The smaller key wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimOrder {
    pub stamp: ServerTime,
    pub participant: ParticipantId,
}

impl ClaimOrder {
    pub fn new(stamp: ServerTime, participant: ParticipantId) -> Self {
        Self { stamp, participant }
    }

    /// True when `self` beats `other`
    pub fn precedes(&self, other: &ClaimOrder) -> bool {
        self < other
    }
}

impl Ord for ClaimOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stamp
            .cmp(&other.stamp)
            .then_with(|| self.participant.cmp(&other.participant))
    }
}

impl PartialOrd for ClaimOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A request to become the owner of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub request: RequestId,
    pub object: ObjectId,
    pub claimant: ParticipantId,
    pub kind: ClaimKind,
    /// Server time when the claim was made
    pub stamp: ServerTime,
    /// Ownership timestamp the claimant had last confirmed for the object
    pub basis: ServerTime,
}

impl Claim {
    pub fn order(&self) -> ClaimOrder {
        ClaimOrder::new(self.stamp, self.claimant)
    }
}

/// Server-consistent ownership of one object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub owner: Option<ParticipantId>,
    pub stamp: ServerTime,
    /// The owner is actively holding the object
    pub grabbed: bool,
}

impl OwnershipRecord {
    pub fn unowned(stamp: ServerTime) -> Self {
        Self {
            owner: None,
            stamp,
            grabbed: false,
        }
    }

    pub fn owned_by(owner: ParticipantId, stamp: ServerTime, grabbed: bool) -> Self {
        Self {
            owner: Some(owner),
            stamp,
            grabbed,
        }
    }

    /// Precedence key of the claim that produced this record
    pub fn order(&self) -> Option<ClaimOrder> {
        self.owner.map(|owner| ClaimOrder::new(self.stamp, owner))
    }

    pub fn grabbed_by_other(&self, participant: ParticipantId) -> bool {
        self.grabbed && self.owner.is_some_and(|owner| owner != participant)
    }
}
