//! Spawn point selection for joining participants

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::core::error::{HoldfastError, Result};
use crate::core::types::{ParticipantId, Pose, SpawnPointId};

/// A registered entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub id: SpawnPointId,
    /// Lower orders fill first; several points may share an order
    pub order: u32,
    pub allows_multiple_occupants: bool,
    #[serde(default)]
    pub occupant: Option<ParticipantId>,
    #[serde(default)]
    pub pose: Pose,
}

impl SpawnPoint {
    pub fn new(id: SpawnPointId, order: u32, allows_multiple_occupants: bool) -> Self {
        Self {
            id,
            order,
            allows_multiple_occupants,
            occupant: None,
            pose: Pose::IDENTITY,
        }
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    fn is_available(&self) -> bool {
        self.allows_multiple_occupants || self.occupant.is_none()
    }
}

/// Assigns joining participants to spawn points
///
/// Points fill level by level: every point at the lowest order is used
/// before the next order opens. Among the points of one level the pick is
/// uniformly random from a seeded generator, so runs are reproducible.
#[derive(Debug)]
pub struct SpawnArbiter {
    points: Vec<SpawnPoint>,
    next_order: u32,
    needs_sort: bool,
    rng: ChaCha8Rng,
}

impl SpawnArbiter {
    pub fn new(seed: u64) -> Self {
        Self {
            points: Vec::new(),
            next_order: 0,
            needs_sort: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Register a point, replacing any point with the same id
    pub fn register(&mut self, point: SpawnPoint) {
        self.points.retain(|p| p.id != point.id);
        self.points.push(point);
        self.needs_sort = true;
    }

    pub fn deregister(&mut self, id: SpawnPointId) -> Result<SpawnPoint> {
        let index = self
            .points
            .iter()
            .position(|p| p.id == id)
            .ok_or(HoldfastError::SpawnPointNotFound(id))?;
        Ok(self.points.remove(index))
    }

    pub fn get(&self, id: SpawnPointId) -> Option<&SpawnPoint> {
        self.points.iter().find(|p| p.id == id)
    }

    pub fn points(&self) -> &[SpawnPoint] {
        &self.points
    }

    pub fn next_order(&self) -> u32 {
        self.next_order
    }

    fn ensure_sorted(&mut self) {
        if self.needs_sort {
            self.points.sort_by_key(|p| (p.order, p.id));
            self.needs_sort = false;
        }
    }

    /// Pick a point for `requester`, or `None` when every point is taken
    pub fn select(&mut self, requester: ParticipantId) -> Option<SpawnPointId> {
        self.ensure_sorted();

        loop {
            let cursor = self.next_order;
            let level = self
                .points
                .iter()
                .filter(|p| p.order >= cursor && p.is_available())
                .map(|p| p.order)
                .min();

            if let Some(order) = level {
                return Some(self.occupy(order, requester));
            }
            if cursor == 0 {
                tracing::debug!(?requester, "no spawn point available");
                return None;
            }
            // Lower levels may have freed up since the cursor passed them
            self.next_order = 0;
        }
    }

    fn occupy(&mut self, order: u32, requester: ParticipantId) -> SpawnPointId {
        let candidates: Vec<usize> = self
            .points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.order == order && p.is_available())
            .map(|(i, _)| i)
            .collect();

        let pick = candidates[self.rng.gen_range(0..candidates.len())];
        let point = &mut self.points[pick];
        point.occupant = Some(requester);
        let id = point.id;

        let exhausted = !self
            .points
            .iter()
            .any(|p| p.order == order && p.is_available());
        if exhausted {
            let highest = self.points.iter().map(|p| p.order).max().unwrap_or(0);
            self.next_order = if order >= highest { 0 } else { order + 1 };
        }

        tracing::debug!(?requester, point = ?id, order, next_order = self.next_order, "spawn point assigned");
        id
    }

    /// Free every point held by a departing participant
    pub fn release_occupant(&mut self, occupant: ParticipantId) -> Vec<SpawnPointId> {
        self.points
            .iter_mut()
            .filter(|p| p.occupant == Some(occupant))
            .map(|p| {
                p.occupant = None;
                p.id
            })
            .collect()
    }
}
