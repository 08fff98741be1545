use thiserror::Error;

use crate::core::types::{CapabilityKind, ControllerMask, ObjectId, SpawnPointId};

#[derive(Error, Debug)]
pub enum HoldfastError {
    #[error("Object not found: {0:?}")]
    ObjectNotFound(ObjectId),

    #[error("Object {0:?} is still waiting for its asset")]
    ObjectNotReady(ObjectId),

    #[error("Priority {0} is outside the claimable range")]
    InvalidPriority(u8),

    #[error("The priority-0 baseline cannot be submitted or cleared by a claimant")]
    BaselineNotClearable,

    #[error("Invalid controller combination: {previous:?} -> {new:?}")]
    InvalidControllerCombination {
        previous: ControllerMask,
        new: ControllerMask,
    },

    #[error("Object {object:?} has no {kind:?} capability")]
    CapabilityMissing { object: ObjectId, kind: CapabilityKind },

    #[error("Spawn point not found: {0:?}")]
    SpawnPointNotFound(SpawnPointId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, HoldfastError>;
