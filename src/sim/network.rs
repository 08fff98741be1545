//! In-memory network with per-link latency
//!
//! Every participant has one link to the server and one back. Each link is
//! a FIFO, so messages on a link arrive in the order they were sent even
//! when jitter is enabled.

use std::collections::VecDeque;

use ahash::AHashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::authority::{ClientMessage, Envelope, ServerMessage};
use crate::core::types::ParticipantId;
use crate::session::Transport;

#[derive(Debug)]
struct Link<T> {
    queue: VecDeque<(u64, T)>,
    last_arrival: u64,
}

impl<T> Link<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            last_arrival: 0,
        }
    }

    fn push(&mut self, arrival: u64, message: T) {
        // Never overtake an earlier message on the same link
        let arrival = arrival.max(self.last_arrival);
        self.last_arrival = arrival;
        self.queue.push_back((arrival, message));
    }

    fn pop_arrived(&mut self, tick: u64) -> Vec<T> {
        let mut out = Vec::new();
        while self.queue.front().is_some_and(|(at, _)| *at <= tick) {
            if let Some((_, message)) = self.queue.pop_front() {
                out.push(message);
            }
        }
        out
    }
}

#[derive(Debug)]
pub struct SimNetwork {
    tick: u64,
    latency_ticks: u64,
    jitter_ticks: u64,
    participants: Vec<ParticipantId>,
    uplinks: AHashMap<ParticipantId, Link<ClientMessage>>,
    downlinks: AHashMap<ParticipantId, Link<ServerMessage>>,
    /// Participants whose links are cut; their traffic is dropped
    disconnected: Vec<ParticipantId>,
    rng: ChaCha8Rng,
}

impl SimNetwork {
    pub fn new(latency_ticks: u64, jitter_ticks: u64, seed: u64) -> Self {
        Self {
            tick: 0,
            latency_ticks,
            jitter_ticks,
            participants: Vec::new(),
            uplinks: AHashMap::new(),
            downlinks: AHashMap::new(),
            disconnected: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn connect(&mut self, participant: ParticipantId) {
        if !self.participants.contains(&participant) {
            self.participants.push(participant);
        }
        self.disconnected.retain(|p| *p != participant);
        self.uplinks.entry(participant).or_insert_with(Link::new);
        self.downlinks.entry(participant).or_insert_with(Link::new);
    }

    /// Cut a participant off, dropping anything still in flight to or from it
    pub fn disconnect(&mut self, participant: ParticipantId) {
        self.participants.retain(|p| *p != participant);
        self.uplinks.remove(&participant);
        self.downlinks.remove(&participant);
        self.disconnected.push(participant);
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn advance(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn arrival(&mut self) -> u64 {
        let jitter = if self.jitter_ticks > 0 {
            self.rng.gen_range(0..=self.jitter_ticks)
        } else {
            0
        };
        self.tick + self.latency_ticks + jitter
    }

    /// Everything that has reached the server by now, across all uplinks
    pub fn take_for_server(&mut self) -> Vec<ClientMessage> {
        let tick = self.tick;
        let mut arrived = Vec::new();
        for participant in &self.participants {
            if let Some(link) = self.uplinks.get_mut(participant) {
                arrived.extend(link.pop_arrived(tick));
            }
        }
        arrived
    }

    /// Fan server output out to the addressed participants
    pub fn deliver(&mut self, envelopes: Vec<Envelope>) {
        for envelope in envelopes {
            for index in 0..self.participants.len() {
                let participant = self.participants[index];
                if !envelope.to.includes(participant) {
                    continue;
                }
                let arrival = self.arrival();
                if let Some(link) = self.downlinks.get_mut(&participant) {
                    link.push(arrival, envelope.message);
                }
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.uplinks.values().map(|l| l.queue.len()).sum::<usize>()
            + self.downlinks.values().map(|l| l.queue.len()).sum::<usize>()
    }
}

impl Transport for SimNetwork {
    fn send(&mut self, from: ParticipantId, message: ClientMessage) {
        if self.disconnected.contains(&from) {
            return;
        }
        let arrival = self.arrival();
        if let Some(link) = self.uplinks.get_mut(&from) {
            link.push(arrival, message);
        }
    }

    fn poll(&mut self, participant: ParticipantId) -> Vec<ServerMessage> {
        let tick = self.tick;
        self.downlinks
            .get_mut(&participant)
            .map(|link| link.pop_arrived(tick))
            .unwrap_or_default()
    }
}
