//! Multi-participant contention harness
//!
//! Runs N sessions against one authority server over a [`SimNetwork`] with a
//! shared server clock, drives random grabs, releases and collisions, and
//! checks after every step that no object has two confirmed holders.

use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::authority::{AuthorityServer, GrabState, OwnershipRecord};
use crate::core::clock::{ManualClock, ServerClock};
use crate::core::config::SessionConfig;
use crate::core::error::Result;
use crate::core::types::{Controller, ObjectId, ParticipantId, Pose, ServerTime};
use crate::grab::HandleMode;
use crate::session::{CapabilitySpec, CollisionType, ObjectSnapshot, Session};
use crate::sim::network::SimNetwork;

/// Shape of one simulated run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub peers: u32,
    pub objects: u32,
    /// Server-clock milliseconds per step
    pub tick_ms: u64,
    /// One-way latency in steps
    pub latency_ticks: u64,
    pub jitter_ticks: u64,
    pub seed: u64,
    /// Per-step chance that an idle participant reaches for an object
    pub grab_chance: f64,
    /// Per-step chance that a holding participant lets go
    pub release_chance: f64,
    /// Per-step chance that a participant reports a collision
    pub collision_chance: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            peers: 4,
            objects: 3,
            tick_ms: 20,
            latency_ticks: 3,
            jitter_ticks: 2,
            seed: 1,
            grab_chance: 0.2,
            release_chance: 0.1,
            collision_chance: 0.1,
        }
    }
}

/// Two or more participants confirmed as holding the same object at once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub step: u64,
    pub object: ObjectId,
    pub holders: Vec<ParticipantId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimReport {
    pub steps: u64,
    pub claims: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub releases: u64,
    pub violations: Vec<Violation>,
    /// (participant, object) pairs whose confirmed record differs from the server after settling
    pub diverged: u32,
}

pub struct SimHarness {
    config: SimConfig,
    clock: Arc<ManualClock>,
    sessions: Vec<Session>,
    server: AuthorityServer,
    network: SimNetwork,
    rng: ChaCha8Rng,
    step: u64,
    violations: Vec<Violation>,
}

impl SimHarness {
    pub fn new(config: SimConfig, session_config: &SessionConfig) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(ServerTime(0)));
        let mut network = SimNetwork::new(config.latency_ticks, config.jitter_ticks, config.seed);
        let mut server = AuthorityServer::new();

        let participants: Vec<ParticipantId> = (1..=config.peers).map(ParticipantId).collect();
        let objects: Vec<ObjectSnapshot> = (0..config.objects)
            .map(|i| {
                let snapshot = ObjectSnapshot {
                    at_rest: false,
                    ..ObjectSnapshot::new(ObjectId(i))
                }
                .with_capability(CapabilitySpec::Grab {
                    mode: HandleMode::ObjectFollowsHand,
                })
                .with_capability(CapabilitySpec::Physics)
                .with_capability(CapabilitySpec::CollisionType(CollisionType::walkable()));
                // Spread initial physics ownership so collisions have someone to take from
                match participants.get(i as usize % participants.len().max(1)) {
                    Some(owner) => snapshot.owned_by(*owner, ServerTime(0), false),
                    None => snapshot,
                }
            })
            .collect();

        for object in &objects {
            server.insert(object.id, object.record());
        }

        let mut sessions = Vec::with_capacity(participants.len());
        for participant in &participants {
            network.connect(*participant);
            let mut session = Session::new(*participant, session_config, clock.clone())?;
            for object in &objects {
                session.spawn_object(object.clone())?;
            }
            session.drain_events();
            sessions.push(session);
        }

        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            clock,
            sessions,
            server,
            network,
            step: 0,
            violations: Vec::new(),
        })
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session_mut(&mut self, participant: ParticipantId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.local() == participant)
    }

    pub fn server(&self) -> &AuthorityServer {
        &self.server
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Advance time by one step and move every message one hop
    pub fn step(&mut self) -> Result<()> {
        self.step += 1;
        self.clock.advance(self.config.tick_ms);
        self.network.advance();

        for session in &mut self.sessions {
            session.tick()?;
            session.pump(&mut self.network)?;
        }

        let arrived = self.network.take_for_server();
        if !arrived.is_empty() {
            let envelopes = self.server.process_batch(arrived);
            self.network.deliver(envelopes);
        }

        if let Some(violation) = self.check_single_writer() {
            tracing::error!(step = self.step, object = ?violation.object, holders = ?violation.holders, "single-writer violation");
            self.violations.push(violation);
        }
        Ok(())
    }

    /// Drop a participant mid-session
    ///
    /// Its session gives up everything, the network cuts its links and the
    /// server frees what it owned. The departed session is handed back.
    pub fn disconnect(&mut self, participant: ParticipantId) -> Result<Option<Session>> {
        let Some(index) = self.sessions.iter().position(|s| s.local() == participant) else {
            return Ok(None);
        };
        let mut session = self.sessions.remove(index);
        session.disconnect()?;
        session.drain_events();

        self.network.disconnect(participant);
        let envelopes = self.server.participant_left(participant, self.clock.now());
        self.network.deliver(envelopes);
        tracing::info!(?participant, remaining = self.sessions.len(), "participant dropped out");
        Ok(Some(session))
    }

    /// Participants confirmed as holding each object; more than one is a violation
    pub fn check_single_writer(&self) -> Option<Violation> {
        (0..self.config.objects).map(ObjectId).find_map(|object| {
            let holders: Vec<ParticipantId> = self
                .sessions
                .iter()
                .filter(|s| s.grab_state(object) == Some(GrabState::GrabbedBySelf))
                .map(Session::local)
                .collect();
            (holders.len() > 1).then(|| Violation {
                step: self.step,
                object,
                holders,
            })
        })
    }

    /// One random input per participant, then a step
    pub fn random_step(&mut self) -> Result<()> {
        let objects = self.config.objects;
        if objects == 0 {
            return self.step();
        }

        for index in 0..self.sessions.len() {
            let object = ObjectId(self.rng.gen_range(0..objects));
            let roll: f64 = self.rng.gen();
            let controller = if self.rng.gen_bool(0.5) {
                Controller::Left
            } else {
                Controller::Right
            };
            let other = ObjectId(self.rng.gen_range(0..objects));
            let session = &mut self.sessions[index];

            let holding = session.grab_handle(object).is_some_and(|h| !h.is_idle());
            if holding {
                if roll < self.config.release_chance {
                    let held: Vec<Controller> = session
                        .grab_handle(object)
                        .map(|h| h.held().controllers().collect())
                        .unwrap_or_default();
                    for controller in held {
                        session.end_hold(object, controller)?;
                    }
                }
            } else if roll < self.config.grab_chance {
                session.begin_hold(object, controller, &Pose::IDENTITY)?;
            } else if roll < self.config.grab_chance + self.config.collision_chance && other != object {
                session.on_collision(object, other)?;
            }
            session.drain_events();
        }
        self.step()
    }

    /// Let go of everything and run until the network drains
    pub fn settle(&mut self) -> Result<()> {
        for session in &mut self.sessions {
            for index in 0..self.config.objects {
                let object = ObjectId(index);
                let held: Vec<Controller> = session
                    .grab_handle(object)
                    .map(|h| h.held().controllers().collect())
                    .unwrap_or_default();
                for controller in held {
                    session.end_hold(object, controller)?;
                }
            }
        }

        let quiet_steps = 4 * (self.config.latency_ticks + self.config.jitter_ticks + 1);
        let mut quiet = 0;
        // Retries keep traffic alive until replies land; bound it anyway
        for _ in 0..10_000 {
            self.step()?;
            for session in &mut self.sessions {
                session.drain_events();
            }
            if self.network.in_flight() == 0 && self.no_pending() {
                quiet += 1;
                if quiet >= quiet_steps {
                    break;
                }
            } else {
                quiet = 0;
            }
        }
        Ok(())
    }

    fn no_pending(&self) -> bool {
        self.sessions.iter().all(|s| {
            (0..self.config.objects)
                .map(ObjectId)
                .all(|o| s.authority(o).is_some_and(|a| a.pending_kind().is_none()))
        })
    }

    /// Count (participant, object) pairs disagreeing with the server
    pub fn divergence(&self) -> u32 {
        let mut diverged = 0;
        for index in 0..self.config.objects {
            let object = ObjectId(index);
            let truth: Option<OwnershipRecord> = self.server.record(object);
            for session in &self.sessions {
                let view = session.authority(object).map(|a| a.confirmed());
                if view != truth {
                    tracing::warn!(participant = ?session.local(), ?object, ?view, ?truth, "participant diverged from server");
                    diverged += 1;
                }
            }
        }
        diverged
    }

    pub fn run(mut self, steps: u64) -> Result<SimReport> {
        for _ in 0..steps {
            self.random_step()?;
        }
        self.settle()?;

        let stats = self.server.stats();
        Ok(SimReport {
            steps: self.step,
            claims: stats.claims,
            accepted: stats.accepted,
            rejected: stats.rejected,
            releases: stats.releases,
            diverged: self.divergence(),
            violations: self.violations,
        })
    }
}
