//! Session snapshots loaded from JSON
//!
//! A snapshot is the persistence collaborator's view of a session: the
//! objects with their ownership, and the registered spawn points. It carries
//! no history, so any consistent snapshot can be loaded.

use serde::{Deserialize, Serialize};

use crate::arbiter::PropertyBaseline;
use crate::authority::OwnershipRecord;
use crate::core::error::Result;
use crate::core::types::{ObjectId, ParticipantId, Pose, ServerTime};
use crate::session::capability::CapabilitySpec;
use crate::spawn::SpawnPoint;

fn ready() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    #[serde(default)]
    pub pose: Pose,
    #[serde(default)]
    pub owner: Option<ParticipantId>,
    #[serde(default)]
    pub ownership_time: ServerTime,
    #[serde(default)]
    pub grabbed: bool,
    #[serde(default)]
    pub at_rest: bool,
    /// False while the object's asset is still loading
    #[serde(default = "ready")]
    pub asset_ready: bool,
    #[serde(default)]
    pub baseline: PropertyBaseline,
    #[serde(default)]
    pub capabilities: Vec<CapabilitySpec>,
}

impl ObjectSnapshot {
    /// An unowned, resting, ready object with no capabilities
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            pose: Pose::IDENTITY,
            owner: None,
            ownership_time: ServerTime::ZERO,
            grabbed: false,
            at_rest: true,
            asset_ready: true,
            baseline: PropertyBaseline::default(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: CapabilitySpec) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn owned_by(mut self, owner: ParticipantId, at: ServerTime, grabbed: bool) -> Self {
        self.owner = Some(owner);
        self.ownership_time = at;
        self.grabbed = grabbed;
        self
    }

    pub fn record(&self) -> OwnershipRecord {
        match self.owner {
            Some(owner) => OwnershipRecord::owned_by(owner, self.ownership_time, self.grabbed),
            None => OwnershipRecord::unowned(self.ownership_time),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub objects: Vec<ObjectSnapshot>,
    #[serde(default)]
    pub spawn_points: Vec<SpawnPoint>,
}

impl SessionSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
