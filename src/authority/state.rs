//! Per-object authority state as seen by one participant

use serde::{Deserialize, Serialize};

use crate::authority::claim::{ClaimKind, OwnershipRecord};
use crate::authority::messages::ClientMessage;
use crate::core::types::{ObjectId, ParticipantId, RequestId, ServerTime};

/// Grab protocol state of an object from the local participant's view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrabState {
    #[default]
    Ungrabbed,
    /// Local grab claim in flight; acting as owner optimistically
    PendingGrabbedBySelf,
    GrabbedBySelf,
    GrabbedByOther,
    /// Local release in flight
    PendingUngrabbed,
}

impl GrabState {
    /// Derive the local view of a server-consistent record
    pub fn from_record(record: &OwnershipRecord, local: ParticipantId) -> Self {
        match (record.owner, record.grabbed) {
            (Some(owner), true) if owner == local => GrabState::GrabbedBySelf,
            (Some(_), true) => GrabState::GrabbedByOther,
            _ => GrabState::Ungrabbed,
        }
    }

    pub fn is_held_by_self(self) -> bool {
        matches!(self, GrabState::PendingGrabbedBySelf | GrabState::GrabbedBySelf)
    }

    /// Held by anyone, including optimistic local holds
    pub fn is_grabbed(self) -> bool {
        matches!(
            self,
            GrabState::PendingGrabbedBySelf | GrabState::GrabbedBySelf | GrabState::GrabbedByOther
        )
    }

    pub fn is_pending(self) -> bool {
        matches!(self, GrabState::PendingGrabbedBySelf | GrabState::PendingUngrabbed)
    }
}

/// What an in-flight request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingKind {
    Claim(ClaimKind),
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingRequest {
    pub message: ClientMessage,
    pub kind: PendingKind,
    pub sent_at: ServerTime,
    pub retries: u32,
}

/// Authority transitions reported to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorityEvent {
    /// The server confirmed local ownership
    OwnershipGranted { object: ObjectId, kind: ClaimKind },
    /// Local ownership passed to someone else (or to nobody)
    OwnershipRevoked {
        object: ObjectId,
        new_owner: Option<ParticipantId>,
    },
    /// A local optimistic claim lost; pose prediction made while pending is void
    ClaimRefused {
        object: ObjectId,
        kind: ClaimKind,
        owner: Option<ParticipantId>,
    },
    ReleaseConfirmed { object: ObjectId },
    /// Ownership moved between other participants
    OwnerChanged {
        object: ObjectId,
        owner: Option<ParticipantId>,
        grabbed: bool,
    },
    /// Local participant expects to lose the object and stopped broadcasting it
    BroadcastSuspended { object: ObjectId },
    /// Anticipated loss never materialised; broadcasting as owner again
    BroadcastResumed { object: ObjectId },
}

impl AuthorityEvent {
    pub fn object(&self) -> ObjectId {
        match self {
            AuthorityEvent::OwnershipGranted { object, .. }
            | AuthorityEvent::OwnershipRevoked { object, .. }
            | AuthorityEvent::ClaimRefused { object, .. }
            | AuthorityEvent::ReleaseConfirmed { object }
            | AuthorityEvent::OwnerChanged { object, .. }
            | AuthorityEvent::BroadcastSuspended { object }
            | AuthorityEvent::BroadcastResumed { object } => *object,
        }
    }
}

/// Authority bookkeeping for one networked object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAuthority {
    pub(crate) owner: Option<ParticipantId>,
    pub(crate) ownership_time: ServerTime,
    pub(crate) grab_state: GrabState,
    pub(crate) is_at_rest: bool,
    pub(crate) confirmed: OwnershipRecord,
    pub(crate) pending: Option<PendingRequest>,
    pub(crate) anticipated_loss_until: Option<ServerTime>,
    /// Claim rolled back locally before the server answered it
    pub(crate) abandoned: Option<(RequestId, ClaimKind)>,
}

impl ObjectAuthority {
    pub(crate) fn from_record(record: OwnershipRecord, local: ParticipantId, is_at_rest: bool) -> Self {
        Self {
            owner: record.owner,
            ownership_time: record.stamp,
            grab_state: GrabState::from_record(&record, local),
            is_at_rest,
            confirmed: record,
            pending: None,
            anticipated_loss_until: None,
            abandoned: None,
        }
    }

    /// Adopt a server-consistent record, dropping any optimistic state
    pub(crate) fn apply_record(&mut self, record: OwnershipRecord, local: ParticipantId) {
        self.confirmed = record;
        self.owner = record.owner;
        self.ownership_time = record.stamp;
        self.grab_state = GrabState::from_record(&record, local);
        if record.owner != Some(local) {
            self.anticipated_loss_until = None;
        }
    }

    pub fn owner(&self) -> Option<ParticipantId> {
        self.owner
    }

    pub fn ownership_time(&self) -> ServerTime {
        self.ownership_time
    }

    pub fn grab_state(&self) -> GrabState {
        self.grab_state
    }

    pub fn is_at_rest(&self) -> bool {
        self.is_at_rest
    }

    /// Last record the server confirmed
    pub fn confirmed(&self) -> OwnershipRecord {
        self.confirmed
    }

    pub fn pending_kind(&self) -> Option<PendingKind> {
        self.pending.map(|p| p.kind)
    }

    pub fn is_anticipating_loss(&self) -> bool {
        self.anticipated_loss_until.is_some()
    }
}
