//! Shared server-time oracle

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::types::ServerTime;

/// Monotonic server clock shared by every participant of a session
pub trait ServerClock: Send + Sync {
    fn now(&self) -> ServerTime;
}

/// Clock advanced explicitly by the caller (simulation and tests)
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start: ServerTime) -> Self {
        Self {
            millis: AtomicU64::new(start.0),
        }
    }

    pub fn advance(&self, ms: u64) -> ServerTime {
        ServerTime(self.millis.fetch_add(ms, Ordering::SeqCst) + ms)
    }

    /// Moves the clock forward to `time`; never moves it backwards
    pub fn set(&self, time: ServerTime) {
        self.millis.fetch_max(time.0, Ordering::SeqCst);
    }
}

impl ServerClock for ManualClock {
    fn now(&self) -> ServerTime {
        ServerTime(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_is_monotonic() {
        let clock = ManualClock::new(ServerTime(10));
        assert_eq!(clock.advance(5), ServerTime(15));
        clock.set(ServerTime(12));
        assert_eq!(clock.now(), ServerTime(15));
        clock.set(ServerTime(40));
        assert_eq!(clock.now(), ServerTime(40));
    }
}
