//! Authority ledger and server integration tests

use holdfast::authority::*;
use holdfast::core::config::SessionConfig;
use holdfast::core::types::{ObjectId, ParticipantId, ServerTime};

const OBJ: ObjectId = ObjectId(1);

fn ledger(local: u32, record: OwnershipRecord) -> AuthorityLedger {
    let mut ledger = AuthorityLedger::new(ParticipantId(local), &SessionConfig::default());
    ledger.insert(OBJ, record, false);
    ledger
}

/// Hand every envelope to the ledgers it addresses, in order
fn deliver(envelopes: &[Envelope], ledgers: &mut [&mut AuthorityLedger], now: ServerTime) {
    for envelope in envelopes {
        for ledger in ledgers.iter_mut() {
            if envelope.to.includes(ledger.local()) {
                ledger.receive(envelope.message, now);
            }
        }
    }
}

fn simultaneous_grab(first: u32, second: u32) {
    let start = OwnershipRecord::unowned(ServerTime(0));
    let mut server = AuthorityServer::new();
    server.insert(OBJ, start);
    let mut a = ledger(first, start);
    let mut b = ledger(second, start);

    let now = ServerTime(100);
    assert!(a.try_grab(OBJ, now).unwrap());
    assert!(b.try_grab(OBJ, now).unwrap());

    // Arrival order at the server is irrelevant for equal stamps
    let mut batch = a.drain_outgoing();
    batch.extend(b.drain_outgoing());
    let envelopes = server.process_batch(batch);
    deliver(&envelopes, &mut [&mut a, &mut b], now);

    let winner = ParticipantId(first.min(second));
    let truth = server.record(OBJ).unwrap();
    assert_eq!(truth.owner, Some(winner));
    assert!(truth.grabbed);

    for ledger in [&a, &b] {
        let state = ledger.get(OBJ).unwrap();
        assert_eq!(state.confirmed(), truth);
        assert!(state.pending_kind().is_none());
        let expected = if ledger.local() == winner {
            GrabState::GrabbedBySelf
        } else {
            GrabState::GrabbedByOther
        };
        assert_eq!(state.grab_state(), expected);
    }
}

#[test]
fn test_equal_stamp_grabs_lower_id_wins() {
    simultaneous_grab(3, 7);
}

#[test]
fn test_equal_stamp_grabs_lower_id_wins_from_either_side() {
    simultaneous_grab(7, 3);
}

#[test]
fn test_grab_release_round_trip() {
    let start = OwnershipRecord::unowned(ServerTime(0));
    let mut server = AuthorityServer::new();
    server.insert(OBJ, start);
    let mut me = ledger(1, start);
    let mut other = ledger(2, start);

    assert!(me.try_grab(OBJ, ServerTime(10)).unwrap());
    assert_eq!(me.get(OBJ).unwrap().grab_state(), GrabState::PendingGrabbedBySelf);
    let envelopes = server.process_batch(me.drain_outgoing());
    deliver(&envelopes, &mut [&mut me, &mut other], ServerTime(20));

    assert_eq!(me.get(OBJ).unwrap().grab_state(), GrabState::GrabbedBySelf);
    assert_eq!(other.get(OBJ).unwrap().grab_state(), GrabState::GrabbedByOther);
    assert!(me
        .drain_events()
        .contains(&AuthorityEvent::OwnershipGranted {
            object: OBJ,
            kind: ClaimKind::Grab
        }));

    // Held by someone else: refused without a round trip
    assert!(!other.try_grab(OBJ, ServerTime(30)).unwrap());
    assert!(other.drain_outgoing().is_empty());

    me.release(OBJ, ServerTime(40)).unwrap();
    assert_eq!(me.get(OBJ).unwrap().grab_state(), GrabState::PendingUngrabbed);
    let envelopes = server.process_batch(me.drain_outgoing());
    deliver(&envelopes, &mut [&mut me, &mut other], ServerTime(50));

    let truth = server.record(OBJ).unwrap();
    assert_eq!(truth, OwnershipRecord::unowned(ServerTime(40)));
    assert_eq!(me.get(OBJ).unwrap().grab_state(), GrabState::Ungrabbed);
    assert_eq!(other.get(OBJ).unwrap().grab_state(), GrabState::Ungrabbed);
    assert_eq!(me.get(OBJ).unwrap().confirmed(), truth);
    assert_eq!(other.get(OBJ).unwrap().confirmed(), truth);
    assert_eq!(server.stats().releases, 1);
}

#[test]
fn test_anticipated_loss_self_heals() {
    let mover = ObjectId(2);
    let mut me = AuthorityLedger::new(ParticipantId(1), &SessionConfig::default());
    me.insert(OBJ, OwnershipRecord::owned_by(ParticipantId(1), ServerTime(0), false), false);
    me.insert(mover, OwnershipRecord::owned_by(ParticipantId(2), ServerTime(0), false), false);
    assert!(me.should_broadcast(OBJ));

    let contact = CollisionContact {
        a: mover,
        b: OBJ,
        b_walkable: true,
    };
    me.on_collision(&contact, ServerTime(1000));
    assert!(!me.should_broadcast(OBJ));
    assert!(me.get(OBJ).unwrap().is_anticipating_loss());

    // Still within the window
    me.tick(ServerTime(1299));
    assert!(!me.should_broadcast(OBJ));

    // The other participant never claimed
    me.tick(ServerTime(1300));
    assert!(me.should_broadcast(OBJ));
    let events = me.drain_events();
    assert_eq!(
        events,
        vec![
            AuthorityEvent::BroadcastSuspended { object: OBJ },
            AuthorityEvent::BroadcastResumed { object: OBJ },
        ]
    );
}

#[test]
fn test_collision_transfer_reaches_everyone() {
    let mover = ObjectId(2);
    let p1 = ParticipantId(1);
    let p2 = ParticipantId(2);
    let mut server = AuthorityServer::new();
    let target_record = OwnershipRecord::owned_by(p1, ServerTime(0), false);
    let mover_record = OwnershipRecord::owned_by(p2, ServerTime(0), false);
    server.insert(OBJ, target_record);
    server.insert(mover, mover_record);

    let mut first = AuthorityLedger::new(p1, &SessionConfig::default());
    let mut second = AuthorityLedger::new(p2, &SessionConfig::default());
    for ledger in [&mut first, &mut second] {
        ledger.insert(OBJ, target_record, false);
        ledger.insert(mover, mover_record, false);
    }

    let contact = CollisionContact {
        a: mover,
        b: OBJ,
        b_walkable: true,
    };
    let now = ServerTime(500);
    first.on_collision(&contact, now);
    second.on_collision(&contact, now);
    assert!(!first.should_broadcast(OBJ));
    assert!(second.should_broadcast(OBJ));

    let envelopes = server.process_batch(second.drain_outgoing());
    deliver(&envelopes, &mut [&mut first, &mut second], ServerTime(520));

    let truth = server.record(OBJ).unwrap();
    assert_eq!(truth.owner, Some(p2));
    assert!(!truth.grabbed);
    assert_eq!(first.get(OBJ).unwrap().owner(), Some(p2));
    assert!(first
        .drain_events()
        .contains(&AuthorityEvent::OwnershipRevoked {
            object: OBJ,
            new_owner: Some(p2)
        }));
    assert!(second.should_broadcast(OBJ));
}

#[test]
fn test_abandoned_grab_granted_behind_collision_claim_is_released() {
    let p1 = ParticipantId(1);
    let p2 = ParticipantId(2);
    let mover1 = ObjectId(11);
    let mover2 = ObjectId(12);
    let target = OwnershipRecord::owned_by(ParticipantId(3), ServerTime(0), false);

    let mut server = AuthorityServer::new();
    server.insert(OBJ, target);
    server.insert(mover1, OwnershipRecord::owned_by(p1, ServerTime(0), false));
    server.insert(mover2, OwnershipRecord::owned_by(p2, ServerTime(0), false));

    let mut first = AuthorityLedger::new(p1, &SessionConfig::default());
    let mut second = AuthorityLedger::new(p2, &SessionConfig::default());
    for ledger in [&mut first, &mut second] {
        ledger.insert(OBJ, target, false);
        ledger.insert(mover1, server.record(mover1).unwrap(), false);
        ledger.insert(mover2, server.record(mover2).unwrap(), false);
    }

    // Participant 2 knocks the object at 150; participant 1 grabs it at 200
    second.on_collision(
        &CollisionContact {
            a: mover2,
            b: OBJ,
            b_walkable: true,
        },
        ServerTime(150),
    );
    assert!(first.try_grab(OBJ, ServerTime(200)).unwrap());
    let mut batch = first.drain_outgoing();
    batch.extend(second.drain_outgoing());
    let envelopes = server.process_batch(batch);
    deliver(&envelopes, &mut [&mut second], ServerTime(210));

    // Participant 1 hears about the collision before its own grab reply
    let mut to_first = envelopes.iter().filter(|e| e.to.includes(p1));
    let broadcast = *to_first.next().unwrap();
    deliver(&[broadcast], &mut [&mut first], ServerTime(210));
    assert_eq!(first.get(OBJ).unwrap().grab_state(), GrabState::Ungrabbed);

    first.on_collision(
        &CollisionContact {
            a: mover1,
            b: OBJ,
            b_walkable: true,
        },
        ServerTime(220),
    );
    let rest: Vec<Envelope> = to_first.copied().collect();
    deliver(&rest, &mut [&mut first], ServerTime(230));

    for step in 0..4u64 {
        let now = ServerTime(240 + step * 20);
        let mut batch = first.drain_outgoing();
        batch.extend(second.drain_outgoing());
        let envelopes = server.process_batch(batch);
        deliver(&envelopes, &mut [&mut first, &mut second], now);
        first.tick(now);
        second.tick(now);
    }

    let truth = server.record(OBJ).unwrap();
    assert_eq!(truth.owner, None);
    assert!(!truth.grabbed);
    for ledger in [&first, &second] {
        let state = ledger.get(OBJ).unwrap();
        assert_eq!(state.grab_state(), GrabState::Ungrabbed);
        assert_eq!(state.confirmed(), truth);
        assert!(state.pending_kind().is_none());
    }

    // Nothing left holding it, so the other participant can take it
    assert!(second.try_grab(OBJ, ServerTime(400)).unwrap());
    let envelopes = server.process_batch(second.drain_outgoing());
    deliver(&envelopes, &mut [&mut first, &mut second], ServerTime(410));
    assert_eq!(second.get(OBJ).unwrap().grab_state(), GrabState::GrabbedBySelf);
}

#[test]
fn test_participant_leaving_frees_its_objects() {
    let p1 = ParticipantId(1);
    let mut server = AuthorityServer::new();
    server.insert(OBJ, OwnershipRecord::owned_by(p1, ServerTime(10), true));

    let envelopes = server.participant_left(p1, ServerTime(90));
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].to, Recipient::All);
    assert_eq!(
        server.record(OBJ),
        Some(OwnershipRecord::unowned(ServerTime(90)))
    );
}
