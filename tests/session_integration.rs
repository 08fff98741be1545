//! Session-level integration tests: several participants, one server, a simulated network

use std::sync::Arc;

use holdfast::arbiter::{PropertyValue, SharedProperty};
use holdfast::authority::{AuthorityServer, GrabState, OwnershipRecord};
use holdfast::core::clock::ManualClock;
use holdfast::core::config::SessionConfig;
use holdfast::core::error::HoldfastError;
use holdfast::core::types::{BodyPart, Controller, ObjectId, ParticipantId, Pose, ServerTime};
use holdfast::grab::HandleMode;
use holdfast::session::{CapabilitySpec, ObjectSnapshot, Session, SessionSnapshot};
use holdfast::sim::SimNetwork;

const OBJ: ObjectId = ObjectId(1);

struct World {
    clock: Arc<ManualClock>,
    sessions: Vec<Session>,
    server: AuthorityServer,
    network: SimNetwork,
}

impl World {
    fn new(peers: u32) -> Self {
        let clock = Arc::new(ManualClock::new(ServerTime(1_000)));
        let mut network = SimNetwork::new(1, 0, 7);
        let mut server = AuthorityServer::new();
        let object = ObjectSnapshot::new(OBJ)
            .with_capability(CapabilitySpec::Grab {
                mode: HandleMode::ObjectFollowsHand,
            })
            .with_capability(CapabilitySpec::Physics);
        server.insert(OBJ, object.record());

        let sessions = (1..=peers)
            .map(|p| {
                network.connect(ParticipantId(p));
                let mut session =
                    Session::new(ParticipantId(p), &SessionConfig::default(), clock.clone()).unwrap();
                session.spawn_object(object.clone()).unwrap();
                session
            })
            .collect();

        Self {
            clock,
            sessions,
            server,
            network,
        }
    }

    fn session(&mut self, participant: u32) -> &mut Session {
        &mut self.sessions[participant as usize - 1]
    }

    fn exchange(&mut self, steps: u32) {
        for _ in 0..steps {
            self.clock.advance(20);
            self.network.advance();
            for session in &mut self.sessions {
                session.tick().unwrap();
                session.pump(&mut self.network).unwrap();
            }
            let arrived = self.network.take_for_server();
            let envelopes = self.server.process_batch(arrived);
            self.network.deliver(envelopes);
        }
    }
}

#[test]
fn test_two_handed_grab_across_participants() {
    let mut world = World::new(2);

    assert!(world
        .session(2)
        .begin_hold(OBJ, Controller::Left, &Pose::IDENTITY)
        .unwrap());
    assert!(world
        .session(2)
        .begin_hold(OBJ, Controller::Right, &Pose::IDENTITY)
        .unwrap());
    assert_eq!(
        world.session(2).grab_handle(OBJ).unwrap().body_part(),
        Some(BodyPart::LeftPrimaryRightSecondary)
    );
    world.exchange(6);

    assert_eq!(world.session(2).grab_state(OBJ), Some(GrabState::GrabbedBySelf));
    assert_eq!(world.session(1).grab_state(OBJ), Some(GrabState::GrabbedByOther));
    assert!(world.session(2).should_broadcast(OBJ));
    assert!(world.session(1).accepts_remote_updates(OBJ));

    // Someone else already holds it
    assert!(!world
        .session(1)
        .begin_hold(OBJ, Controller::Left, &Pose::IDENTITY)
        .unwrap());
    assert!(world.session(1).grab_handle(OBJ).unwrap().is_idle());

    // One hand off keeps the hold
    world.session(2).end_hold(OBJ, Controller::Left).unwrap();
    world.exchange(6);
    assert_eq!(world.session(2).grab_state(OBJ), Some(GrabState::GrabbedBySelf));
    assert_eq!(
        world.session(2).grab_handle(OBJ).unwrap().body_part(),
        Some(BodyPart::RightHand)
    );

    world.session(2).end_hold(OBJ, Controller::Right).unwrap();
    world.exchange(6);

    let truth = world.server.record(OBJ).unwrap();
    assert_eq!(truth.owner, None);
    for participant in 1..=2 {
        let session = world.session(participant);
        assert_eq!(session.grab_state(OBJ), Some(GrabState::Ungrabbed));
        assert_eq!(session.authority(OBJ).unwrap().confirmed(), truth);
    }
}

#[test]
fn test_grab_handover_between_participants() {
    let mut world = World::new(3);

    world
        .session(3)
        .begin_hold(OBJ, Controller::Right, &Pose::IDENTITY)
        .unwrap();
    world.exchange(6);
    world.session(3).end_hold(OBJ, Controller::Right).unwrap();
    world.exchange(6);

    assert!(world
        .session(1)
        .begin_hold(OBJ, Controller::Left, &Pose::IDENTITY)
        .unwrap());
    world.exchange(6);

    let truth = world.server.record(OBJ).unwrap();
    assert_eq!(truth.owner, Some(ParticipantId(1)));
    assert!(truth.grabbed);
    assert_eq!(world.session(1).grab_state(OBJ), Some(GrabState::GrabbedBySelf));
    assert_eq!(world.session(2).grab_state(OBJ), Some(GrabState::GrabbedByOther));
    assert_eq!(world.session(3).grab_state(OBJ), Some(GrabState::GrabbedByOther));
    assert_eq!(world.server.stats().releases, 1);
}

const SNAPSHOT: &str = r#"{
    "objects": [
        {
            "id": 1,
            "owner": 2,
            "ownership_time": 400,
            "capabilities": [
                { "kind": "Grab", "mode": "ObjectFollowsHand" },
                { "kind": "Physics" }
            ]
        },
        { "id": 2, "asset_ready": false }
    ],
    "spawn_points": [
        { "id": 0, "order": 0, "allows_multiple_occupants": false },
        { "id": 1, "order": 0, "allows_multiple_occupants": false },
        { "id": 2, "order": 1, "allows_multiple_occupants": false }
    ]
}"#;

#[test]
fn test_snapshot_restores_objects_and_spawn_points() {
    let clock = Arc::new(ManualClock::new(ServerTime(500)));
    let mut session = Session::new(ParticipantId(1), &SessionConfig::default(), clock).unwrap();
    session
        .load_snapshot(SessionSnapshot::from_json(SNAPSHOT).unwrap())
        .unwrap();

    let authority = session.authority(OBJ).unwrap();
    assert_eq!(
        authority.confirmed(),
        OwnershipRecord::owned_by(ParticipantId(2), ServerTime(400), false)
    );
    // Simulated by its remote owner
    assert_eq!(
        session.resolved(OBJ, SharedProperty::Kinematic).unwrap().0,
        PropertyValue::Kinematic(true)
    );
    assert!(session.accepts_remote_updates(OBJ));

    let loading = ObjectId(2);
    assert!(matches!(
        session.begin_hold(loading, Controller::Left, &Pose::IDENTITY),
        Err(HoldfastError::ObjectNotReady(_))
    ));
    session.mark_asset_ready(loading).unwrap();
    assert!(session.object(loading).unwrap().is_live());

    let first = session.select_spawn_point(ParticipantId(1)).unwrap();
    let second = session.select_spawn_point(ParticipantId(2)).unwrap();
    let third = session.select_spawn_point(ParticipantId(3)).unwrap();
    assert_eq!(first.order, 0);
    assert_eq!(second.order, 0);
    assert_ne!(first.id, second.id);
    assert_eq!(third.order, 1);
    assert!(session.select_spawn_point(ParticipantId(4)).is_none());

    assert_eq!(session.release_spawn_point(ParticipantId(1)), vec![first.id]);
    assert_eq!(
        session.select_spawn_point(ParticipantId(4)).map(|p| p.id),
        Some(first.id)
    );
}

#[test]
fn test_reloading_snapshot_replaces_state() {
    let clock = Arc::new(ManualClock::new(ServerTime(500)));
    let mut session = Session::new(ParticipantId(1), &SessionConfig::default(), clock).unwrap();
    session.spawn_object(ObjectSnapshot::new(ObjectId(9))).unwrap();

    session
        .load_snapshot(SessionSnapshot::from_json(SNAPSHOT).unwrap())
        .unwrap();
    assert!(session.object(ObjectId(9)).is_none());
    assert_eq!(session.objects().count(), 2);

    session.load_snapshot(SessionSnapshot::default()).unwrap();
    assert_eq!(session.objects().count(), 0);
    assert!(session.select_spawn_point(ParticipantId(1)).is_none());
}
