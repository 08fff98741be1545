//! Messages exchanged between participants and the authority server

use serde::{Deserialize, Serialize};

use crate::authority::claim::{Claim, OwnershipRecord};
use crate::core::types::{ObjectId, ParticipantId, RequestId, ServerTime};

/// Participant to server, reliable and ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    Claim(Claim),
    Release {
        request: RequestId,
        object: ObjectId,
        participant: ParticipantId,
        stamp: ServerTime,
    },
}

impl ClientMessage {
    pub fn object(&self) -> ObjectId {
        match self {
            ClientMessage::Claim(claim) => claim.object,
            ClientMessage::Release { object, .. } => *object,
        }
    }

    pub fn sender(&self) -> ParticipantId {
        match self {
            ClientMessage::Claim(claim) => claim.claimant,
            ClientMessage::Release { participant, .. } => *participant,
        }
    }

    pub fn request(&self) -> RequestId {
        match self {
            ClientMessage::Claim(claim) => claim.request,
            ClientMessage::Release { request, .. } => *request,
        }
    }

    pub fn stamp(&self) -> ServerTime {
        match self {
            ClientMessage::Claim(claim) => claim.stamp,
            ClientMessage::Release { stamp, .. } => *stamp,
        }
    }
}

/// Server to participants, reliable and ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Reply to the requester: the claim or release took effect
    Accepted {
        request: RequestId,
        object: ObjectId,
        record: OwnershipRecord,
    },
    /// Reply to the requester: nothing changed, `record` is the current truth
    Rejected {
        request: RequestId,
        object: ObjectId,
        record: OwnershipRecord,
    },
    /// Broadcast to everyone else after an accepted change
    OwnershipChanged {
        object: ObjectId,
        record: OwnershipRecord,
    },
}

impl ServerMessage {
    pub fn object(&self) -> ObjectId {
        match self {
            ServerMessage::Accepted { object, .. }
            | ServerMessage::Rejected { object, .. }
            | ServerMessage::OwnershipChanged { object, .. } => *object,
        }
    }
}

/// Who a server message goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    Only(ParticipantId),
    AllExcept(ParticipantId),
    All,
}

impl Recipient {
    pub fn includes(&self, participant: ParticipantId) -> bool {
        match self {
            Recipient::Only(p) => *p == participant,
            Recipient::AllExcept(p) => *p != participant,
            Recipient::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: Recipient,
    pub message: ServerMessage,
}
