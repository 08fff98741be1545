//! Priority arbitration of object-wide shared properties
//!
//! Several capabilities on one object may each want to dictate its layer, tag
//! or kinematic flag. Each property has an [`ArbitrationSlot`]; the highest
//! priority candidate wins and the object's own baseline sits at priority 0.

pub mod slot;

pub use slot::{ArbitrationSlot, MAX_PRIORITY};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::core::error::{HoldfastError, Result};
use crate::core::types::{CapabilityKind, Layer, ObjectId, Tag};

/// Priorities used by the built-in capabilities
pub mod priority {
    pub const BASELINE: u8 = 0;
    pub const PHYSICS: u8 = 1;
    pub const COLLISION_TYPE: u8 = 1;
    pub const KINEMATIC_PLATFORM: u8 = 2;
    pub const GRAB: u8 = 3;
}

/// Object-wide properties that capabilities compete for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SharedProperty {
    Layer,
    Tag,
    Kinematic,
}

impl SharedProperty {
    pub const ALL: [SharedProperty; 3] = [
        SharedProperty::Layer,
        SharedProperty::Tag,
        SharedProperty::Kinematic,
    ];
}

/// A value for one of the shared properties
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    Layer(Layer),
    Tag(Tag),
    Kinematic(bool),
}

impl PropertyValue {
    pub fn property(&self) -> SharedProperty {
        match self {
            PropertyValue::Layer(_) => SharedProperty::Layer,
            PropertyValue::Tag(_) => SharedProperty::Tag,
            PropertyValue::Kinematic(_) => SharedProperty::Kinematic,
        }
    }
}

/// Values an object starts with before any capability speaks up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBaseline {
    pub layer: Layer,
    pub tag: Tag,
    pub kinematic: bool,
}

impl Default for PropertyBaseline {
    fn default() -> Self {
        Self {
            layer: Layer::DEFAULT,
            tag: Tag::untagged(),
            kinematic: false,
        }
    }
}

#[derive(Debug, Clone)]
struct ObjectSlots {
    layer: ArbitrationSlot<Layer>,
    tag: ArbitrationSlot<Tag>,
    kinematic: ArbitrationSlot<bool>,
}

impl ObjectSlots {
    fn new(baseline: PropertyBaseline) -> Self {
        Self {
            layer: ArbitrationSlot::new(baseline.layer),
            tag: ArbitrationSlot::new(baseline.tag),
            kinematic: ArbitrationSlot::new(baseline.kinematic),
        }
    }

    fn resolve(&self, property: SharedProperty) -> (PropertyValue, u8) {
        match property {
            SharedProperty::Layer => {
                let (v, p) = self.layer.resolve();
                (PropertyValue::Layer(*v), p)
            }
            SharedProperty::Tag => {
                let (v, p) = self.tag.resolve();
                (PropertyValue::Tag(v.clone()), p)
            }
            SharedProperty::Kinematic => {
                let (v, p) = self.kinematic.resolve();
                (PropertyValue::Kinematic(*v), p)
            }
        }
    }
}

/// Session-wide arbitration service holding every object's slots
#[derive(Debug, Default)]
pub struct PriorityArbiter {
    objects: AHashMap<ObjectId, ObjectSlots>,
}

impl PriorityArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, object: ObjectId, baseline: PropertyBaseline) {
        self.objects.insert(object, ObjectSlots::new(baseline));
    }

    pub fn unregister(&mut self, object: ObjectId) {
        self.objects.remove(&object);
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.objects.contains_key(&object)
    }

    fn slots_mut(&mut self, object: ObjectId) -> Result<&mut ObjectSlots> {
        self.objects
            .get_mut(&object)
            .ok_or(HoldfastError::ObjectNotFound(object))
    }

    /// Returns true when the submission is now the top priority for its property
    pub fn submit(
        &mut self,
        object: ObjectId,
        value: PropertyValue,
        claimant: CapabilityKind,
        priority: u8,
    ) -> Result<bool> {
        let slots = self.slots_mut(object)?;
        match value {
            PropertyValue::Layer(v) => slots.layer.submit(v, claimant, priority),
            PropertyValue::Tag(v) => slots.tag.submit(v, claimant, priority),
            PropertyValue::Kinematic(v) => slots.kinematic.submit(v, claimant, priority),
        }
    }

    /// Returns true when the cleared candidate was winning, i.e. the resolved value changed
    pub fn clear(
        &mut self,
        object: ObjectId,
        property: SharedProperty,
        claimant: CapabilityKind,
        priority: u8,
    ) -> Result<bool> {
        let slots = self.slots_mut(object)?;
        match property {
            SharedProperty::Layer => slots.layer.clear(claimant, priority),
            SharedProperty::Tag => slots.tag.clear(claimant, priority),
            SharedProperty::Kinematic => slots.kinematic.clear(claimant, priority),
        }
    }

    pub fn resolve(&self, object: ObjectId, property: SharedProperty) -> Result<(PropertyValue, u8)> {
        self.objects
            .get(&object)
            .map(|slots| slots.resolve(property))
            .ok_or(HoldfastError::ObjectNotFound(object))
    }

    /// Clear every candidate `claimant` holds on `object`
    ///
    /// Returns the new resolved value of each property whose winner changed.
    pub fn remove_claimant(
        &mut self,
        object: ObjectId,
        claimant: CapabilityKind,
    ) -> Result<Vec<PropertyValue>> {
        let slots = self.slots_mut(object)?;
        let mut changed = Vec::new();
        if slots.layer.remove_claimant(claimant) {
            changed.push(slots.resolve(SharedProperty::Layer).0);
        }
        if slots.tag.remove_claimant(claimant) {
            changed.push(slots.resolve(SharedProperty::Tag).0);
        }
        if slots.kinematic.remove_claimant(claimant) {
            changed.push(slots.resolve(SharedProperty::Kinematic).0);
        }
        Ok(changed)
    }

    pub fn conflicts(&self, object: ObjectId) -> u32 {
        self.objects
            .get(&object)
            .map(|s| s.layer.conflicts() + s.tag.conflicts() + s.kinematic.conflicts())
            .unwrap_or(0)
    }
}
