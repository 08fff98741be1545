//! Single shared-property slot resolving competing capability requests

use crate::core::error::{HoldfastError, Result};
use crate::core::types::CapabilityKind;

/// Highest claimable priority; priority 0 is the object's baseline
pub const MAX_PRIORITY: u8 = 5;

const LEVELS: usize = MAX_PRIORITY as usize + 1;

#[derive(Debug, Clone, PartialEq)]
struct Candidate<T> {
    value: T,
    claimant: CapabilityKind,
}

/// Per-property table holding at most one candidate per priority level
///
/// The baseline at priority 0 is always present, so `resolve` never fails.
#[derive(Debug, Clone)]
pub struct ArbitrationSlot<T> {
    baseline: T,
    candidates: [Option<Candidate<T>>; LEVELS],
    conflicts: u32,
}

impl<T: Clone + PartialEq + std::fmt::Debug> ArbitrationSlot<T> {
    pub fn new(baseline: T) -> Self {
        Self {
            baseline,
            candidates: std::array::from_fn(|_| None),
            conflicts: 0,
        }
    }

    /// Offer `value` at `priority` on behalf of `claimant`
    ///
    /// Returns true when `priority` is now the highest present priority, which
    /// means the resolved value is `value` and should be propagated.
    pub fn submit(&mut self, value: T, claimant: CapabilityKind, priority: u8) -> Result<bool> {
        let index = claimable_index(priority)?;

        if let Some(existing) = &self.candidates[index] {
            if existing.claimant != claimant {
                self.conflicts += 1;
                tracing::warn!(
                    priority,
                    previous = ?existing.claimant,
                    incoming = ?claimant,
                    "two capabilities share an arbitration priority; latest submission wins"
                );
            }
        }

        self.candidates[index] = Some(Candidate { value, claimant });
        Ok(self.top_priority() == priority)
    }

    /// Withdraw the candidate `claimant` holds at `priority`
    ///
    /// Returns true when the withdrawn candidate was the winning one, so the
    /// resolved value has changed. Clearing a level held by another claimant
    /// (or an empty level) is a no-op.
    pub fn clear(&mut self, claimant: CapabilityKind, priority: u8) -> Result<bool> {
        let index = claimable_index(priority)?;
        let was_top = self.top_priority() == priority;

        match &self.candidates[index] {
            Some(existing) if existing.claimant == claimant => {
                self.candidates[index] = None;
                Ok(was_top)
            }
            Some(existing) => {
                tracing::debug!(
                    priority,
                    holder = ?existing.claimant,
                    requester = ?claimant,
                    "ignoring clear for a level held by another claimant"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Drop every candidate held by `claimant`; returns true if the winner changed
    pub fn remove_claimant(&mut self, claimant: CapabilityKind) -> bool {
        let before = self.top_priority();
        let mut removed_top = false;
        for (priority, slot) in self.candidates.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|c| c.claimant == claimant) {
                *slot = None;
                removed_top |= priority == before as usize;
            }
        }
        removed_top
    }

    /// Winning value and the priority it was submitted at
    pub fn resolve(&self) -> (&T, u8) {
        for priority in (1..LEVELS).rev() {
            if let Some(candidate) = &self.candidates[priority] {
                return (&candidate.value, priority as u8);
            }
        }
        (&self.baseline, 0)
    }

    pub fn top_priority(&self) -> u8 {
        self.resolve().1
    }

    pub fn claimant_at(&self, priority: u8) -> Option<CapabilityKind> {
        self.candidates
            .get(priority as usize)
            .and_then(|c| c.as_ref())
            .map(|c| c.claimant)
    }

    /// Number of submissions that overwrote another claimant's candidate
    pub fn conflicts(&self) -> u32 {
        self.conflicts
    }
}

fn claimable_index(priority: u8) -> Result<usize> {
    match priority {
        0 => Err(HoldfastError::BaselineNotClearable),
        p if p > MAX_PRIORITY => Err(HoldfastError::InvalidPriority(p)),
        p => Ok(p as usize),
    }
}
