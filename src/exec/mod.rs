//! Execute stage: child supervision, bounded capture and the verdict
//! state machine.

pub mod executor;

pub use executor::Executor;

use std::time::{Duration, Instant};

/// Effective limits for one execute phase.
#[derive(Clone, Copy, Debug)]
pub struct ExecLimits {
    pub wall_limit: Duration,
    /// Memory cap in KB; <= 0 disables the check.
    pub memory_limit_kb: i64,
}

/// Absolute point in time after which a run is abandoned. The monitor's
/// timer is the primary enforcement; this is the outer belt-and-suspenders
/// deadline covering the whole request.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self {
            at: Instant::now() + duration,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time left, clamped at zero.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_expiry() {
        let d = Deadline::after(Duration::from_millis(20));
        assert!(!d.expired());
        assert!(d.remaining() > Duration::ZERO);
        std::thread::sleep(Duration::from_millis(30));
        assert!(d.expired());
        assert_eq!(d.remaining(), Duration::ZERO);
    }
}
