use serde::{Deserialize, Serialize};

use crate::core::types::{ObjectId, Pose};
use crate::session::capability::Capabilities;

/// Lifecycle phase of a networked object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectPhase {
    /// Registered but its asset has not loaded; holds and collisions are refused
    WaitingForAsset,
    #[default]
    Live,
}

/// A shared object as tracked by one session
///
/// Ownership lives in the authority ledger and shared property values in the
/// priority arbiter; this holds what is local to the object itself.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkedObject {
    pub(crate) id: ObjectId,
    pub(crate) phase: ObjectPhase,
    pub(crate) pose: Pose,
    pub(crate) capabilities: Capabilities,
}

impl NetworkedObject {
    pub fn new(id: ObjectId, phase: ObjectPhase, pose: Pose) -> Self {
        Self {
            id,
            phase,
            pose,
            capabilities: Capabilities::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn phase(&self) -> ObjectPhase {
        self.phase
    }

    pub fn is_live(&self) -> bool {
        self.phase == ObjectPhase::Live
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}
