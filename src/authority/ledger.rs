//! Client-side ownership ledger with optimistic claims and reconciliation
//!
//! The ledger acts on a local intent immediately (it starts behaving as owner
//! before the server answers) and reconciles once a reply or a broadcast
//! arrives. Nothing here blocks waiting on the network: requests go to an
//! outbox and replies are fed back through [`AuthorityLedger::receive`].

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::authority::claim::{Claim, ClaimKind, OwnershipRecord};
use crate::authority::messages::{ClientMessage, ServerMessage};
use crate::authority::state::{AuthorityEvent, GrabState, ObjectAuthority, PendingKind, PendingRequest};
use crate::core::config::SessionConfig;
use crate::core::error::{HoldfastError, Result};
use crate::core::types::{ObjectId, ParticipantId, RequestId, ServerTime};
use crate::grab::GrabAuthority;

/// A contact reported by the physics collaborator
///
/// `a` is the moving body that ran into `b`. Every peer must report the same
/// orientation for the same contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionContact {
    pub a: ObjectId,
    pub b: ObjectId,
    pub b_walkable: bool,
}

pub struct AuthorityLedger {
    local: ParticipantId,
    anticipation_window_ms: u64,
    release_timeout_ms: u64,
    claim_timeout_ms: u64,
    max_claim_retries: u32,
    objects: AHashMap<ObjectId, ObjectAuthority>,
    outbox: Vec<ClientMessage>,
    events: Vec<AuthorityEvent>,
}

impl AuthorityLedger {
    pub fn new(local: ParticipantId, config: &SessionConfig) -> Self {
        Self {
            local,
            anticipation_window_ms: config.anticipation_window_ms,
            release_timeout_ms: config.release_timeout_ms,
            claim_timeout_ms: config.claim_timeout_ms,
            max_claim_retries: config.max_claim_retries,
            objects: AHashMap::new(),
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn local(&self) -> ParticipantId {
        self.local
    }

    /// Track an object starting from an arbitrary server-consistent record
    pub fn insert(&mut self, object: ObjectId, record: OwnershipRecord, is_at_rest: bool) {
        self.objects.insert(
            object,
            ObjectAuthority::from_record(record, self.local, is_at_rest),
        );
    }

    /// Stop tracking an object, cancelling anything still in flight for it
    pub fn remove(&mut self, object: ObjectId) -> Option<ObjectAuthority> {
        let removed = self.objects.remove(&object)?;
        if removed.pending.is_some() {
            tracing::debug!(?object, "object removed with a request in flight; cancelled");
        }
        self.outbox.retain(|m| m.object() != object);
        Some(removed)
    }

    pub fn get(&self, object: ObjectId) -> Option<&ObjectAuthority> {
        self.objects.get(&object)
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &ObjectAuthority)> + '_ {
        self.objects.iter().map(|(id, auth)| (*id, auth))
    }

    pub fn set_at_rest(&mut self, object: ObjectId, at_rest: bool) -> Result<()> {
        self.entry_mut(object)?.is_at_rest = at_rest;
        Ok(())
    }

    fn entry_mut(&mut self, object: ObjectId) -> Result<&mut ObjectAuthority> {
        self.objects
            .get_mut(&object)
            .ok_or(HoldfastError::ObjectNotFound(object))
    }

    /// Local grab intent
    ///
    /// Additive grabs while already holding succeed without a new claim. An
    /// object the server reports as held by someone else is refused locally,
    /// since the server would reject the claim anyway.
    pub fn try_grab(&mut self, object: ObjectId, now: ServerTime) -> Result<bool> {
        let local = self.local;
        let entry = self
            .objects
            .get_mut(&object)
            .ok_or(HoldfastError::ObjectNotFound(object))?;

        match entry.grab_state {
            GrabState::PendingGrabbedBySelf | GrabState::GrabbedBySelf => return Ok(true),
            GrabState::GrabbedByOther => {
                tracing::debug!(?object, owner = ?entry.owner, "grab refused: held by another participant");
                return Ok(false);
            }
            GrabState::Ungrabbed | GrabState::PendingUngrabbed => {}
        }

        let claim = Claim {
            request: RequestId::new(),
            object,
            claimant: local,
            kind: ClaimKind::Grab,
            stamp: now,
            basis: entry.confirmed.stamp,
        };
        entry.grab_state = GrabState::PendingGrabbedBySelf;
        entry.owner = Some(local);
        entry.ownership_time = now;
        entry.anticipated_loss_until = None;

        let message = ClientMessage::Claim(claim);
        entry.pending = Some(PendingRequest {
            message,
            kind: PendingKind::Claim(ClaimKind::Grab),
            sent_at: now,
            retries: 0,
        });
        self.outbox.push(message);
        tracing::debug!(?object, stamp = now.0, "grab claim issued");
        Ok(true)
    }

    /// Local release after the last controller let go
    pub fn release(&mut self, object: ObjectId, now: ServerTime) -> Result<()> {
        let local = self.local;
        let entry = self.entry_mut(object)?;

        if !entry.grab_state.is_held_by_self() {
            tracing::debug!(?object, state = ?entry.grab_state, "release ignored: not held locally");
            return Ok(());
        }

        let message = issue_release(entry, object, local, now);
        self.outbox.push(message);
        tracing::debug!(?object, stamp = now.0, "release issued");
        Ok(())
    }

    /// Collision-triggered transfer
    ///
    /// If the local participant owns the mover `a`, it claims `b`. If it owns
    /// `b` while someone else owns `a`, it expects that peer to claim `b` and
    /// stops broadcasting `b` for the anticipation window. Contacts involving
    /// untracked objects are ignored.
    pub fn on_collision(&mut self, contact: &CollisionContact, now: ServerTime) {
        let local = self.local;
        let (Some(a), Some(b)) = (self.objects.get(&contact.a), self.objects.get(&contact.b)) else {
            return;
        };

        if a.is_at_rest || !contact.b_walkable || b.grab_state != GrabState::Ungrabbed {
            return;
        }

        let a_owner = a.owner;
        let b_owner = b.owner;
        let owned_by_remote = |owner: Option<ParticipantId>| owner.is_some_and(|o| o != local);

        if a_owner == Some(local) && owned_by_remote(b_owner) && b.pending.is_none() {
            self.claim_by_collision(contact.b, now);
        } else if b_owner == Some(local) && owned_by_remote(a_owner) && b.anticipated_loss_until.is_none() {
            let until = now.plus_millis(self.anticipation_window_ms);
            if let Some(entry) = self.objects.get_mut(&contact.b) {
                entry.anticipated_loss_until = Some(until);
            }
            tracing::debug!(object = ?contact.b, by = ?a_owner, until = until.0, "anticipating ownership loss");
            self.events
                .push(AuthorityEvent::BroadcastSuspended { object: contact.b });
        }
    }

    fn claim_by_collision(&mut self, object: ObjectId, now: ServerTime) {
        let local = self.local;
        let Some(entry) = self.objects.get_mut(&object) else {
            return;
        };

        let claim = Claim {
            request: RequestId::new(),
            object,
            claimant: local,
            kind: ClaimKind::Collision,
            stamp: now,
            basis: entry.confirmed.stamp,
        };
        entry.owner = Some(local);
        entry.ownership_time = now;

        let message = ClientMessage::Claim(claim);
        entry.pending = Some(PendingRequest {
            message,
            kind: PendingKind::Claim(ClaimKind::Collision),
            sent_at: now,
            retries: 0,
        });
        self.outbox.push(message);
        tracing::debug!(?object, stamp = now.0, "collision claim issued");
    }

    /// Reconcile with a message from the authority server
    pub fn receive(&mut self, message: ServerMessage, now: ServerTime) {
        match message {
            ServerMessage::Accepted {
                request,
                object,
                record,
            } => self.on_reply(request, object, record, true, now),
            ServerMessage::Rejected {
                request,
                object,
                record,
            } => self.on_reply(request, object, record, false, now),
            ServerMessage::OwnershipChanged { object, record } => {
                self.on_ownership_changed(object, record)
            }
        }
    }

    fn on_reply(
        &mut self,
        request: RequestId,
        object: ObjectId,
        record: OwnershipRecord,
        accepted: bool,
        now: ServerTime,
    ) {
        let local = self.local;
        let Some(entry) = self.objects.get_mut(&object) else {
            tracing::debug!(?object, "reply for an unknown object discarded");
            return;
        };

        let pending = match entry.pending.filter(|p| p.message.request() == request) {
            Some(pending) => pending,
            None => {
                let Some((_, kind)) = entry.abandoned.filter(|(id, _)| *id == request) else {
                    tracing::debug!(?object, "stale reply discarded");
                    return;
                };
                // The server decided a claim this participant already gave up on
                entry.abandoned = None;
                let granted = accepted && record.owner == Some(local);
                let late_grab = granted && kind == ClaimKind::Grab && record.grabbed;
                match entry.pending.map(|p| p.kind) {
                    // The server keeps the grabbed flag through our collision claim
                    Some(PendingKind::Claim(ClaimKind::Collision)) if late_grab => {
                        tracing::debug!(?object, "late grab acceptance behind a collision claim; releasing");
                        entry.confirmed = record;
                        let message = issue_release(entry, object, local, now);
                        self.outbox.push(message);
                        return;
                    }
                    // A new local grab takes over the hold; a pending release settles it
                    Some(_) => {
                        entry.confirmed = record;
                        return;
                    }
                    None => {}
                }
                entry.apply_record(record, local);
                if !granted {
                    return;
                }
                if kind == ClaimKind::Grab {
                    tracing::debug!(?object, "late grab acceptance with nothing holding; releasing");
                    let message = issue_release(entry, object, local, now);
                    self.outbox.push(message);
                } else {
                    self.events
                        .push(AuthorityEvent::OwnershipGranted { object, kind });
                }
                return;
            }
        };

        entry.pending = None;
        let was_owner = entry.owner == Some(local);
        entry.apply_record(record, local);
        let now_owner = record.owner == Some(local);

        let event = match (pending.kind, accepted) {
            (PendingKind::Claim(kind), true) if now_owner => {
                tracing::debug!(?object, ?kind, "claim confirmed");
                AuthorityEvent::OwnershipGranted { object, kind }
            }
            (PendingKind::Claim(kind), _) => {
                tracing::debug!(?object, ?kind, owner = ?record.owner, "claim refused; rolled back");
                AuthorityEvent::ClaimRefused {
                    object,
                    kind,
                    owner: record.owner,
                }
            }
            (PendingKind::Release, true) => AuthorityEvent::ReleaseConfirmed { object },
            (PendingKind::Release, false) if was_owner && !now_owner => {
                AuthorityEvent::OwnershipRevoked {
                    object,
                    new_owner: record.owner,
                }
            }
            (PendingKind::Release, false) => AuthorityEvent::ReleaseConfirmed { object },
        };
        self.events.push(event);
    }

    fn on_ownership_changed(&mut self, object: ObjectId, record: OwnershipRecord) {
        let local = self.local;
        let Some(entry) = self.objects.get_mut(&object) else {
            return;
        };

        match entry.pending.map(|p| p.message) {
            Some(ClientMessage::Claim(claim)) => {
                let ours_wins = record
                    .order()
                    .map_or(true, |theirs| claim.order().precedes(&theirs));
                if ours_wins {
                    entry.confirmed = record;
                    tracing::debug!(?object, "pending claim precedes remote change; awaiting reply");
                    return;
                }
                entry.pending = None;
                entry.abandoned = Some((claim.request, claim.kind));
                entry.apply_record(record, local);
                tracing::debug!(?object, winner = ?record.owner, "pending claim lost the tie-break");
                self.events.push(AuthorityEvent::ClaimRefused {
                    object,
                    kind: claim.kind,
                    owner: record.owner,
                });
                return;
            }
            Some(ClientMessage::Release { .. }) => {
                // The release reply will settle it
                entry.confirmed = record;
                return;
            }
            None => {}
        }

        let previous = entry.owner;
        let was_anticipating = entry.anticipated_loss_until.is_some();
        entry.apply_record(record, local);

        if previous == Some(local) && record.owner != Some(local) {
            if was_anticipating {
                tracing::debug!(?object, "anticipated loss confirmed");
            }
            self.events.push(AuthorityEvent::OwnershipRevoked {
                object,
                new_owner: record.owner,
            });
        } else {
            self.events.push(AuthorityEvent::OwnerChanged {
                object,
                owner: record.owner,
                grabbed: record.grabbed,
            });
        }
    }

    /// Timeouts: anticipation self-heal and request retries
    pub fn tick(&mut self, now: ServerTime) {
        let local = self.local;
        let mut ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        ids.sort();

        for object in ids {
            let Some(entry) = self.objects.get_mut(&object) else {
                continue;
            };

            if let Some(until) = entry.anticipated_loss_until {
                if now >= until {
                    entry.anticipated_loss_until = None;
                    if entry.owner == Some(local) {
                        tracing::info!(?object, "no ownership change arrived; resuming broadcast");
                        self.events.push(AuthorityEvent::BroadcastResumed { object });
                    }
                }
            }

            let Some(mut pending) = entry.pending else {
                continue;
            };
            let timeout = match pending.kind {
                PendingKind::Release => self.release_timeout_ms,
                PendingKind::Claim(_) => self.claim_timeout_ms,
            };
            if now.millis_since(pending.sent_at) < timeout {
                continue;
            }

            match pending.kind {
                PendingKind::Claim(kind) if pending.retries >= self.max_claim_retries => {
                    tracing::warn!(?object, ?kind, "claim never answered; reverting to confirmed state");
                    entry.pending = None;
                    entry.abandoned = Some((pending.message.request(), kind));
                    let confirmed = entry.confirmed;
                    entry.apply_record(confirmed, local);
                    self.events.push(AuthorityEvent::ClaimRefused {
                        object,
                        kind,
                        owner: confirmed.owner,
                    });
                }
                _ => {
                    pending.sent_at = now;
                    pending.retries += 1;
                    entry.pending = Some(pending);
                    tracing::warn!(?object, kind = ?pending.kind, attempt = pending.retries, "request unacknowledged; reissuing");
                    self.outbox.push(pending.message);
                }
            }
        }
    }

    /// The local participant left: discard every optimistic change
    ///
    /// Objects the participant still owned become unowned as of `now`, the
    /// same record the server produces when it sees the participant leave.
    pub fn disconnect(&mut self, now: ServerTime) {
        let local = self.local;
        let mut ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        ids.sort();

        for object in ids {
            let Some(entry) = self.objects.get_mut(&object) else {
                continue;
            };
            entry.anticipated_loss_until = None;
            entry.abandoned = None;
            if let Some(pending) = entry.pending.take() {
                let confirmed = entry.confirmed;
                entry.apply_record(confirmed, local);
                if let PendingKind::Claim(kind) = pending.kind {
                    self.events.push(AuthorityEvent::ClaimRefused {
                        object,
                        kind,
                        owner: confirmed.owner,
                    });
                }
            }
            if entry.owner == Some(local) {
                let record = OwnershipRecord::unowned(entry.confirmed.stamp.max(now));
                entry.apply_record(record, local);
                self.events.push(AuthorityEvent::OwnershipRevoked {
                    object,
                    new_owner: None,
                });
            }
        }
        self.outbox.clear();
        tracing::info!(participant = ?local, "disconnected; pending requests discarded");
    }

    /// True when this participant should send authoritative pose updates
    pub fn should_broadcast(&self, object: ObjectId) -> bool {
        self.objects
            .get(&object)
            .is_some_and(|e| e.owner == Some(self.local) && e.anticipated_loss_until.is_none())
    }

    /// True when remote pose updates for the object should be applied locally
    pub fn accepts_remote_updates(&self, object: ObjectId) -> bool {
        self.objects
            .get(&object)
            .map_or(true, |e| e.owner != Some(self.local))
    }

    pub fn drain_outgoing(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn drain_events(&mut self) -> Vec<AuthorityEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Put `entry` into PendingUngrabbed with a fresh release in flight
fn issue_release(
    entry: &mut ObjectAuthority,
    object: ObjectId,
    local: ParticipantId,
    now: ServerTime,
) -> ClientMessage {
    let message = ClientMessage::Release {
        request: RequestId::new(),
        object,
        participant: local,
        stamp: now,
    };
    entry.owner = Some(local);
    entry.grab_state = GrabState::PendingUngrabbed;
    entry.pending = Some(PendingRequest {
        message,
        kind: PendingKind::Release,
        sent_at: now,
        retries: 0,
    });
    message
}

impl GrabAuthority for AuthorityLedger {
    fn request_grab(&mut self, object: ObjectId, now: ServerTime) -> Result<bool> {
        self.try_grab(object, now)
    }

    fn request_release(&mut self, object: ObjectId, now: ServerTime) -> Result<()> {
        self.release(object, now)
    }
}
