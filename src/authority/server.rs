//! Authoritative ownership sequencer
//!
//! The server holds the single source of truth for every object's owner. It
//! never waits on anything: each message is decided immediately against the
//! current record and answered with an [`Envelope`] list.

use std::collections::VecDeque;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::authority::claim::{Claim, ClaimKind, ClaimOrder, OwnershipRecord};
use crate::authority::messages::{ClientMessage, Envelope, Recipient, ServerMessage};
use crate::core::types::{ObjectId, ParticipantId, RequestId, ServerTime};

/// Replies remembered per object for duplicate detection
const REMEMBERED_REQUESTS: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    pub claims: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub releases: u64,
    pub duplicates: u64,
}

#[derive(Debug, Default)]
struct ObjectEntry {
    record: OwnershipRecord,
    recent: VecDeque<(RequestId, bool)>,
}

impl ObjectEntry {
    fn remember(&mut self, request: RequestId, accepted: bool) {
        if self.recent.len() == REMEMBERED_REQUESTS {
            self.recent.pop_front();
        }
        self.recent.push_back((request, accepted));
    }

    fn replay(&self, request: RequestId) -> Option<bool> {
        self.recent
            .iter()
            .find(|(id, _)| *id == request)
            .map(|(_, accepted)| *accepted)
    }
}

enum Decision {
    Accept(OwnershipRecord),
    Reject,
}

/// Decide a claim against the current record
///
/// Grabbed objects are first-come-first-served: nobody but the holder can
/// take them. A collision claim made with knowledge of the current record is
/// sequential and always wins; a concurrent one (made against an older
/// record) is settled by [`ClaimOrder`].
fn decide(record: &OwnershipRecord, claim: &Claim) -> Decision {
    let grabbed = claim.kind == ClaimKind::Grab;

    if record.owner == Some(claim.claimant) {
        return Decision::Accept(OwnershipRecord::owned_by(
            claim.claimant,
            record.stamp.max(claim.stamp),
            grabbed || record.grabbed,
        ));
    }
    if record.grabbed {
        return Decision::Reject;
    }

    let sequential = claim.basis >= record.stamp;
    match (claim.kind, record.order()) {
        (ClaimKind::Grab, _) | (ClaimKind::Collision, None) => Decision::Accept(
            OwnershipRecord::owned_by(claim.claimant, record.stamp.max(claim.stamp), grabbed),
        ),
        (ClaimKind::Collision, Some(_)) if sequential => Decision::Accept(
            OwnershipRecord::owned_by(claim.claimant, record.stamp.max(claim.stamp), false),
        ),
        (ClaimKind::Collision, Some(current)) if claim.order().precedes(&current) => {
            Decision::Accept(OwnershipRecord::owned_by(claim.claimant, claim.stamp, false))
        }
        (ClaimKind::Collision, Some(_)) => Decision::Reject,
    }
}

#[derive(Debug, Default)]
pub struct AuthorityServer {
    objects: AHashMap<ObjectId, ObjectEntry>,
    stats: ServerStats,
}

impl AuthorityServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object: ObjectId, record: OwnershipRecord) {
        self.objects.insert(
            object,
            ObjectEntry {
                record,
                recent: VecDeque::new(),
            },
        );
    }

    pub fn remove(&mut self, object: ObjectId) -> Option<OwnershipRecord> {
        self.objects.remove(&object).map(|e| e.record)
    }

    pub fn record(&self, object: ObjectId) -> Option<OwnershipRecord> {
        self.objects.get(&object).map(|e| e.record)
    }

    pub fn records(&self) -> impl Iterator<Item = (ObjectId, OwnershipRecord)> + '_ {
        self.objects.iter().map(|(id, e)| (*id, e.record))
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    /// Sequence a batch that arrived in the same server step
    ///
    /// Messages are ordered by stamp then sender, so the outcome does not
    /// depend on arrival order within the batch.
    pub fn process_batch(&mut self, mut batch: Vec<ClientMessage>) -> Vec<Envelope> {
        batch.sort_by_key(|m| ClaimOrder::new(m.stamp(), m.sender()));
        let mut out = Vec::new();
        for message in batch {
            out.extend(self.handle(message));
        }
        out
    }

    pub fn handle(&mut self, message: ClientMessage) -> Vec<Envelope> {
        let object = message.object();
        let request = message.request();
        let sender = message.sender();
        // Objects spawned at runtime become known on first contact
        let entry = self.objects.entry(object).or_default();

        if let Some(accepted) = entry.replay(request) {
            self.stats.duplicates += 1;
            tracing::debug!(?object, ?sender, "duplicate request; replaying outcome");
            return vec![reply(sender, request, object, entry.record, accepted)];
        }

        match message {
            ClientMessage::Claim(claim) => {
                self.stats.claims += 1;
                match decide(&entry.record, &claim) {
                    Decision::Accept(record) => {
                        let changed = record != entry.record;
                        entry.record = record;
                        entry.remember(request, true);
                        self.stats.accepted += 1;
                        tracing::debug!(?object, owner = ?sender, kind = ?claim.kind, stamp = record.stamp.0, "claim accepted");

                        let mut out = vec![reply(sender, request, object, record, true)];
                        if changed {
                            out.push(broadcast(Recipient::AllExcept(sender), object, record));
                        }
                        out
                    }
                    Decision::Reject => {
                        entry.remember(request, false);
                        self.stats.rejected += 1;
                        tracing::debug!(?object, claimant = ?sender, owner = ?entry.record.owner, "claim rejected");
                        vec![reply(sender, request, object, entry.record, false)]
                    }
                }
            }
            ClientMessage::Release { stamp, .. } => {
                self.stats.releases += 1;
                match entry.record.owner {
                    Some(owner) if owner == sender => {
                        let record = OwnershipRecord::unowned(entry.record.stamp.max(stamp));
                        entry.record = record;
                        entry.remember(request, true);
                        tracing::debug!(?object, ?sender, "released");
                        vec![
                            reply(sender, request, object, record, true),
                            broadcast(Recipient::AllExcept(sender), object, record),
                        ]
                    }
                    None => {
                        entry.remember(request, true);
                        vec![reply(sender, request, object, entry.record, true)]
                    }
                    Some(_) => {
                        entry.remember(request, false);
                        tracing::debug!(?object, ?sender, owner = ?entry.record.owner, "release by non-owner rejected");
                        vec![reply(sender, request, object, entry.record, false)]
                    }
                }
            }
        }
    }

    /// Clear everything a departed participant owned
    pub fn participant_left(&mut self, participant: ParticipantId, now: ServerTime) -> Vec<Envelope> {
        let mut cleared: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, e)| e.record.owner == Some(participant))
            .map(|(id, _)| *id)
            .collect();
        cleared.sort();

        let mut out = Vec::with_capacity(cleared.len());
        for object in cleared {
            if let Some(entry) = self.objects.get_mut(&object) {
                let record = OwnershipRecord::unowned(entry.record.stamp.max(now));
                entry.record = record;
                out.push(broadcast(Recipient::All, object, record));
            }
        }
        tracing::info!(?participant, released = out.len(), "participant left");
        out
    }
}

fn reply(
    to: ParticipantId,
    request: RequestId,
    object: ObjectId,
    record: OwnershipRecord,
    accepted: bool,
) -> Envelope {
    let message = if accepted {
        ServerMessage::Accepted {
            request,
            object,
            record,
        }
    } else {
        ServerMessage::Rejected {
            request,
            object,
            record,
        }
    };
    Envelope {
        to: Recipient::Only(to),
        message,
    }
}

fn broadcast(to: Recipient, object: ObjectId, record: OwnershipRecord) -> Envelope {
    Envelope {
        to,
        message: ServerMessage::OwnershipChanged { object, record },
    }
}
