//! Per-participant session context
//!
//! A [`Session`] owns everything one participant knows about the shared
//! world: the authority ledger, the priority arbiter, spawn points and the
//! object table with each object's capabilities. Collaborators drive it
//! through plain method calls and read back messages and events.

pub mod capability;
pub mod object;
pub mod snapshot;
pub mod transport;

pub use capability::{Capabilities, Capability, CapabilitySpec, CollisionType};
pub use object::{NetworkedObject, ObjectPhase};
pub use snapshot::{ObjectSnapshot, SessionSnapshot};
pub use transport::Transport;

use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::arbiter::{priority, PriorityArbiter, PropertyValue, SharedProperty};
use crate::authority::{
    AuthorityEvent, AuthorityLedger, ClaimKind, ClientMessage, CollisionContact, GrabState,
    ObjectAuthority, ServerMessage,
};
use crate::core::clock::ServerClock;
use crate::core::config::SessionConfig;
use crate::core::error::{HoldfastError, Result};
use crate::core::types::{
    CapabilityKind, Controller, ControllerMask, Layer, ObjectId, ParticipantId, Pose, ServerTime,
    SpawnPointId,
};
use crate::grab::{GrabEvent, GrabHandle};
use crate::spawn::{SpawnArbiter, SpawnPoint};

/// Everything a session reports to its collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    Grab(GrabEvent),
    Authority(AuthorityEvent),
    /// The winning value of a shared property changed; apply it to physics/render
    PropertyResolved {
        object: ObjectId,
        value: PropertyValue,
        priority: u8,
    },
    /// Poses predicted while a refused claim was pending must be thrown away
    PredictionDiscarded { object: ObjectId },
    ObjectReady { object: ObjectId },
    ObjectDestroyed { object: ObjectId },
}

pub struct Session {
    local: ParticipantId,
    clock: Arc<dyn ServerClock>,
    ledger: AuthorityLedger,
    arbiter: PriorityArbiter,
    spawns: SpawnArbiter,
    objects: AHashMap<ObjectId, NetworkedObject>,
    /// Last value reported per property, so unchanged values are not re-emitted
    propagated: AHashMap<(ObjectId, SharedProperty), PropertyValue>,
    events: Vec<SessionEvent>,
}

impl Session {
    pub fn new(local: ParticipantId, config: &SessionConfig, clock: Arc<dyn ServerClock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            local,
            clock,
            ledger: AuthorityLedger::new(local, config),
            arbiter: PriorityArbiter::new(),
            spawns: SpawnArbiter::new(config.spawn_seed),
            objects: AHashMap::new(),
            propagated: AHashMap::new(),
            events: Vec::new(),
        })
    }

    pub fn local(&self) -> ParticipantId {
        self.local
    }

    pub fn now(&self) -> ServerTime {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Object lifecycle
    // ------------------------------------------------------------------

    /// Replace the whole session state with a snapshot
    pub fn load_snapshot(&mut self, snapshot: SessionSnapshot) -> Result<()> {
        let existing: Vec<ObjectId> = self.objects.keys().copied().collect();
        for id in existing {
            self.destroy_object(id)?;
        }
        let points: Vec<SpawnPointId> = self.spawns.points().iter().map(|p| p.id).collect();
        for id in points {
            self.spawns.deregister(id)?;
        }

        let object_count = snapshot.objects.len();
        let point_count = snapshot.spawn_points.len();
        for point in snapshot.spawn_points {
            self.spawns.register(point);
        }
        for object in snapshot.objects {
            self.spawn_object(object)?;
        }
        tracing::info!(participant = ?self.local, objects = object_count, spawn_points = point_count, "snapshot loaded");
        Ok(())
    }

    /// Bring an object into the session, replacing any object with the same id
    pub fn spawn_object(&mut self, snapshot: ObjectSnapshot) -> Result<()> {
        let id = snapshot.id;
        if self.objects.contains_key(&id) {
            tracing::debug!(object = ?id, "respawning existing object");
            self.destroy_object(id)?;
        }

        let phase = if snapshot.asset_ready {
            ObjectPhase::Live
        } else {
            ObjectPhase::WaitingForAsset
        };
        let record = snapshot.record();
        self.arbiter.register(id, snapshot.baseline);
        self.ledger.insert(id, record, snapshot.at_rest);
        self.objects
            .insert(id, NetworkedObject::new(id, phase, snapshot.pose));

        for spec in snapshot.capabilities {
            self.attach_capability(id, spec)?;
        }

        // A restored hold has no controller behind it
        if record.grabbed && record.owner == Some(self.local) {
            self.ledger.release(id, self.clock.now())?;
        }

        self.refresh(id)?;
        self.propagate(id)
    }

    /// Resume an object that was waiting for its asset
    pub fn mark_asset_ready(&mut self, id: ObjectId) -> Result<()> {
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(HoldfastError::ObjectNotFound(id))?;
        if object.phase == ObjectPhase::WaitingForAsset {
            object.phase = ObjectPhase::Live;
            self.events.push(SessionEvent::ObjectReady { object: id });
        }
        Ok(())
    }

    /// Remove an object; in-flight requests for it are cancelled
    pub fn destroy_object(&mut self, id: ObjectId) -> Result<()> {
        let mut object = self
            .objects
            .remove(&id)
            .ok_or(HoldfastError::ObjectNotFound(id))?;

        if let Some(handle) = object.capabilities.grab_mut() {
            let mut grab_events = Vec::new();
            handle.abandon(&mut grab_events);
            self.push_grab_events(grab_events);
        }
        self.ledger.remove(id);
        self.arbiter.unregister(id);
        self.propagated.retain(|(object, _), _| *object != id);
        self.events.push(SessionEvent::ObjectDestroyed { object: id });
        tracing::debug!(object = ?id, "object destroyed");
        Ok(())
    }

    pub fn object(&self, id: ObjectId) -> Option<&NetworkedObject> {
        self.objects.get(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &NetworkedObject> + '_ {
        self.objects.values()
    }

    pub fn set_pose(&mut self, id: ObjectId, pose: Pose) -> Result<()> {
        self.objects
            .get_mut(&id)
            .ok_or(HoldfastError::ObjectNotFound(id))?
            .pose = pose;
        Ok(())
    }

    pub fn set_at_rest(&mut self, id: ObjectId, at_rest: bool) -> Result<()> {
        self.ledger.set_at_rest(id, at_rest)
    }

    // ------------------------------------------------------------------
    // Capabilities
    // ------------------------------------------------------------------

    pub fn attach_capability(&mut self, id: ObjectId, spec: CapabilitySpec) -> Result<()> {
        let kind = spec.kind();
        let present = self
            .objects
            .get(&id)
            .ok_or(HoldfastError::ObjectNotFound(id))?
            .capabilities
            .contains(kind);
        if present {
            self.detach_capability(id, kind)?;
        }

        let capability = Capability::from_spec(id, spec);
        match &capability {
            Capability::CollisionType(collision) => {
                self.arbiter.submit(
                    id,
                    PropertyValue::Layer(collision.layer),
                    kind,
                    priority::COLLISION_TYPE,
                )?;
                self.arbiter.submit(
                    id,
                    PropertyValue::Tag(collision.tag.clone()),
                    kind,
                    priority::COLLISION_TYPE,
                )?;
            }
            Capability::Kinematic => {
                self.arbiter.submit(
                    id,
                    PropertyValue::Kinematic(true),
                    kind,
                    priority::KINEMATIC_PLATFORM,
                )?;
            }
            // Driven by authority state in `refresh`
            Capability::Grab(_) | Capability::Physics => {}
        }

        if let Some(object) = self.objects.get_mut(&id) {
            object.capabilities.insert(capability);
        }
        tracing::debug!(object = ?id, ?kind, "capability attached");
        self.refresh(id)?;
        self.propagate(id)
    }

    /// Detach a capability and withdraw everything it submitted
    pub fn detach_capability(&mut self, id: ObjectId, kind: CapabilityKind) -> Result<Capability> {
        let mut capability = self
            .objects
            .get_mut(&id)
            .ok_or(HoldfastError::ObjectNotFound(id))?
            .capabilities
            .remove(kind)
            .ok_or(HoldfastError::CapabilityMissing { object: id, kind })?;

        if let Capability::Grab(handle) = &mut capability {
            if !handle.is_idle() {
                let mut grab_events = Vec::new();
                handle.abandon(&mut grab_events);
                self.push_grab_events(grab_events);
                self.ledger.release(id, self.clock.now())?;
            }
        }

        self.arbiter.remove_claimant(id, kind)?;
        tracing::debug!(object = ?id, ?kind, "capability detached");
        self.refresh(id)?;
        self.propagate(id)?;
        Ok(capability)
    }

    pub fn resolved(&self, id: ObjectId, property: SharedProperty) -> Result<(PropertyValue, u8)> {
        self.arbiter.resolve(id, property)
    }

    // ------------------------------------------------------------------
    // Grabbing
    // ------------------------------------------------------------------

    pub fn begin_hold(&mut self, id: ObjectId, controller: Controller, grabber: &Pose) -> Result<bool> {
        self.begin_hold_mask(id, controller.mask(), grabber)
    }

    /// Grab with several controllers in the same instant
    pub fn begin_hold_mask(
        &mut self,
        id: ObjectId,
        controllers: ControllerMask,
        grabber: &Pose,
    ) -> Result<bool> {
        let now = self.clock.now();
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(HoldfastError::ObjectNotFound(id))?;
        if !object.is_live() {
            return Err(HoldfastError::ObjectNotReady(id));
        }
        let object_pose = object.pose;
        let handle = grab_handle(id, &mut object.capabilities)?;

        let mut grab_events = Vec::new();
        let held = handle.begin_hold_mask(
            controllers,
            grabber,
            &object_pose,
            &mut self.ledger,
            now,
            &mut grab_events,
        )?;
        self.push_grab_events(grab_events);

        self.refresh(id)?;
        self.sync()?;
        Ok(held)
    }

    pub fn end_hold(&mut self, id: ObjectId, controller: Controller) -> Result<()> {
        let now = self.clock.now();
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(HoldfastError::ObjectNotFound(id))?;
        let handle = grab_handle(id, &mut object.capabilities)?;

        let mut grab_events = Vec::new();
        handle.end_hold(controller, &mut self.ledger, now, &mut grab_events)?;
        self.push_grab_events(grab_events);

        self.refresh(id)?;
        self.sync()
    }

    /// Recapture the held relative pose; false when nothing holds the object
    pub fn reorient_grab(&mut self, id: ObjectId, grabber: &Pose) -> Result<bool> {
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(HoldfastError::ObjectNotFound(id))?;
        let object_pose = object.pose;
        Ok(grab_handle(id, &mut object.capabilities)?.reorient(grabber, &object_pose))
    }

    pub fn update_trigger(&mut self, id: ObjectId, controller: Controller, down: bool) -> Result<()> {
        let object = self
            .objects
            .get_mut(&id)
            .ok_or(HoldfastError::ObjectNotFound(id))?;
        let mut grab_events = Vec::new();
        grab_handle(id, &mut object.capabilities)?.update_trigger(controller, down, &mut grab_events);
        self.push_grab_events(grab_events);
        Ok(())
    }

    pub fn grab_handle(&self, id: ObjectId) -> Option<&GrabHandle> {
        self.objects.get(&id).and_then(|o| o.capabilities.grab())
    }

    // ------------------------------------------------------------------
    // Authority
    // ------------------------------------------------------------------

    /// Contact reported by physics: `a` moved into `b`
    ///
    /// Contacts with untracked objects or objects still waiting for their
    /// asset are ignored.
    pub fn on_collision(&mut self, a: ObjectId, b: ObjectId) -> Result<()> {
        let (Some(mover), Some(target)) = (self.objects.get(&a), self.objects.get(&b)) else {
            return Ok(());
        };
        if !mover.is_live() || !target.is_live() {
            return Ok(());
        }

        let contact = CollisionContact {
            a,
            b,
            b_walkable: target.capabilities.is_walkable(),
        };
        self.ledger.on_collision(&contact, self.clock.now());
        self.refresh(b)?;
        self.sync()
    }

    pub fn receive(&mut self, message: ServerMessage) -> Result<()> {
        self.ledger.receive(message, self.clock.now());
        self.sync()
    }

    pub fn tick(&mut self) -> Result<()> {
        self.ledger.tick(self.clock.now());
        self.sync()
    }

    /// Exchange messages with the server over `transport`
    pub fn pump(&mut self, transport: &mut dyn Transport) -> Result<()> {
        for message in self.ledger.drain_outgoing() {
            transport.send(self.local, message);
        }
        for message in transport.poll(self.local) {
            self.receive(message)?;
        }
        Ok(())
    }

    /// The local participant is leaving; optimistic changes are undone and
    /// everything it owned is given up
    pub fn disconnect(&mut self) -> Result<()> {
        let mut grab_events = Vec::new();
        for object in self.objects.values_mut() {
            if let Some(handle) = object.capabilities.grab_mut() {
                handle.abandon(&mut grab_events);
            }
        }
        self.push_grab_events(grab_events);
        self.ledger.disconnect(self.clock.now());
        self.sync()?;

        let ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        for id in ids {
            self.refresh(id)?;
        }
        Ok(())
    }

    pub fn authority(&self, id: ObjectId) -> Option<&ObjectAuthority> {
        self.ledger.get(id)
    }

    pub fn grab_state(&self, id: ObjectId) -> Option<GrabState> {
        self.ledger.get(id).map(ObjectAuthority::grab_state)
    }

    pub fn should_broadcast(&self, id: ObjectId) -> bool {
        self.ledger.should_broadcast(id)
    }

    pub fn accepts_remote_updates(&self, id: ObjectId) -> bool {
        self.ledger.accepts_remote_updates(id)
    }

    pub fn drain_outgoing(&mut self) -> Vec<ClientMessage> {
        self.ledger.drain_outgoing()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Spawn points
    // ------------------------------------------------------------------

    pub fn register_spawn_point(&mut self, point: SpawnPoint) {
        self.spawns.register(point);
    }

    pub fn deregister_spawn_point(&mut self, id: SpawnPointId) -> Result<SpawnPoint> {
        self.spawns.deregister(id)
    }

    /// Choose an entry point for `requester`; `None` means use the default spawn
    pub fn select_spawn_point(&mut self, requester: ParticipantId) -> Option<SpawnPoint> {
        let id = self.spawns.select(requester)?;
        self.spawns.get(id).cloned()
    }

    pub fn release_spawn_point(&mut self, occupant: ParticipantId) -> Vec<SpawnPointId> {
        self.spawns.release_occupant(occupant)
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    fn push_grab_events(&mut self, grab_events: Vec<GrabEvent>) {
        self.events
            .extend(grab_events.into_iter().map(SessionEvent::Grab));
    }

    /// Apply ledger events: undo refused predictions and refresh what changed
    fn sync(&mut self) -> Result<()> {
        let mut touched: Vec<ObjectId> = Vec::new();
        for event in self.ledger.drain_events() {
            let object = event.object();
            self.events.push(SessionEvent::Authority(event));
            match event {
                AuthorityEvent::ClaimRefused { kind, .. } => {
                    self.events
                        .push(SessionEvent::PredictionDiscarded { object });
                    if kind == ClaimKind::Grab {
                        self.abandon_grab(object);
                    }
                }
                AuthorityEvent::OwnershipRevoked { .. } => self.abandon_grab(object),
                _ => {}
            }
            if !touched.contains(&object) {
                touched.push(object);
            }
        }
        for object in touched {
            self.refresh(object)?;
        }
        Ok(())
    }

    fn abandon_grab(&mut self, id: ObjectId) {
        let Some(handle) = self
            .objects
            .get_mut(&id)
            .and_then(|o| o.capabilities.grab_mut())
        else {
            return;
        };
        let mut grab_events = Vec::new();
        handle.abandon(&mut grab_events);
        self.push_grab_events(grab_events);
    }

    /// Re-submit the authority-driven candidates for an object
    fn refresh(&mut self, id: ObjectId) -> Result<()> {
        let (Some(object), Some(authority)) = (self.objects.get(&id), self.ledger.get(id)) else {
            return Ok(());
        };
        let owned_locally = authority.owner() == Some(self.local);
        let grabbed = authority.grab_state().is_grabbed();
        let has_physics = object.capabilities.contains(CapabilityKind::Physics);
        let has_grab = object.capabilities.contains(CapabilityKind::Grab);

        let mut changed = false;
        if has_physics {
            changed |= self.arbiter.submit(
                id,
                PropertyValue::Kinematic(!owned_locally),
                CapabilityKind::Physics,
                priority::PHYSICS,
            )?;
        }
        if has_grab {
            if grabbed {
                changed |= self.arbiter.submit(
                    id,
                    PropertyValue::Layer(Layer::GRABBED),
                    CapabilityKind::Grab,
                    priority::GRAB,
                )?;
                changed |= self.arbiter.submit(
                    id,
                    PropertyValue::Kinematic(true),
                    CapabilityKind::Grab,
                    priority::GRAB,
                )?;
            } else {
                changed |= self.arbiter.clear(
                    id,
                    SharedProperty::Layer,
                    CapabilityKind::Grab,
                    priority::GRAB,
                )?;
                changed |= self.arbiter.clear(
                    id,
                    SharedProperty::Kinematic,
                    CapabilityKind::Grab,
                    priority::GRAB,
                )?;
            }
        }

        if changed {
            self.propagate(id)?;
        }
        Ok(())
    }

    /// Emit `PropertyResolved` for every property whose winner differs from the last report
    fn propagate(&mut self, id: ObjectId) -> Result<()> {
        for property in SharedProperty::ALL {
            let (value, priority) = self.arbiter.resolve(id, property)?;
            if self.propagated.get(&(id, property)) == Some(&value) {
                continue;
            }
            self.propagated.insert((id, property), value.clone());
            self.events.push(SessionEvent::PropertyResolved {
                object: id,
                value,
                priority,
            });
        }
        Ok(())
    }
}

fn grab_handle(id: ObjectId, capabilities: &mut Capabilities) -> Result<&mut GrabHandle> {
    capabilities
        .grab_mut()
        .ok_or(HoldfastError::CapabilityMissing {
            object: id,
            kind: CapabilityKind::Grab,
        })
}
