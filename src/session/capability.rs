//! Capabilities attached to networked objects
//!
//! An object carries at most one capability of each [`CapabilityKind`],
//! stored in a fixed array indexed by kind.

use serde::{Deserialize, Serialize};

use crate::core::types::{CapabilityKind, Layer, ObjectId, Tag};
use crate::grab::{GrabHandle, HandleMode};

/// Collision classification contributed by a `CollisionType` capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionType {
    pub layer: Layer,
    pub tag: Tag,
    /// Other objects may be carried along or pushed when they land on this one
    #[serde(default)]
    pub walkable: bool,
}

impl CollisionType {
    pub fn walkable() -> Self {
        Self {
            layer: Layer::WALKABLE,
            tag: Tag::new("Walkable"),
            walkable: true,
        }
    }
}

/// Serializable description of a capability, used by snapshots and attach calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CapabilitySpec {
    Grab { mode: HandleMode },
    Physics,
    CollisionType(CollisionType),
    Kinematic,
}

impl CapabilitySpec {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            CapabilitySpec::Grab { .. } => CapabilityKind::Grab,
            CapabilitySpec::Physics => CapabilityKind::Physics,
            CapabilitySpec::CollisionType(_) => CapabilityKind::CollisionType,
            CapabilitySpec::Kinematic => CapabilityKind::Kinematic,
        }
    }
}

/// A live capability instance
#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    Grab(GrabHandle),
    /// Simulated locally only while owned; kinematic otherwise
    Physics,
    CollisionType(CollisionType),
    /// Moving platform: always kinematic
    Kinematic,
}

impl Capability {
    pub fn from_spec(object: ObjectId, spec: CapabilitySpec) -> Self {
        match spec {
            CapabilitySpec::Grab { mode } => Capability::Grab(GrabHandle::new(object, mode)),
            CapabilitySpec::Physics => Capability::Physics,
            CapabilitySpec::CollisionType(collision) => Capability::CollisionType(collision),
            CapabilitySpec::Kinematic => Capability::Kinematic,
        }
    }

    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::Grab(_) => CapabilityKind::Grab,
            Capability::Physics => CapabilityKind::Physics,
            Capability::CollisionType(_) => CapabilityKind::CollisionType,
            Capability::Kinematic => CapabilityKind::Kinematic,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Capabilities {
    slots: [Option<Capability>; CapabilityKind::COUNT],
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, returning whatever capability of the same kind was there
    pub fn insert(&mut self, capability: Capability) -> Option<Capability> {
        let index = capability.kind().index();
        self.slots[index].replace(capability)
    }

    pub fn remove(&mut self, kind: CapabilityKind) -> Option<Capability> {
        self.slots[kind.index()].take()
    }

    pub fn get(&self, kind: CapabilityKind) -> Option<&Capability> {
        self.slots[kind.index()].as_ref()
    }

    pub fn contains(&self, kind: CapabilityKind) -> bool {
        self.slots[kind.index()].is_some()
    }

    pub fn grab(&self) -> Option<&GrabHandle> {
        match self.get(CapabilityKind::Grab) {
            Some(Capability::Grab(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn grab_mut(&mut self) -> Option<&mut GrabHandle> {
        match self.slots[CapabilityKind::Grab.index()].as_mut() {
            Some(Capability::Grab(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn is_walkable(&self) -> bool {
        matches!(
            self.get(CapabilityKind::CollisionType),
            Some(Capability::CollisionType(CollisionType { walkable: true, .. }))
        )
    }
}
