//! Logical time for the consensus layer.
//!
//! Election and heartbeat timers count logical ticks rather than sampling the
//! wall clock. A partition driver turns one heartbeat interval of wall time
//! into one tick; deterministic tests call `tick()` directly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum ratio between election timeout and heartbeat interval.
pub const MIN_ELECTION_TICKS: u32 = 3;

/// Consensus timing for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Base election timeout in milliseconds. Each node randomizes its
    /// effective timeout in `[base, 2 * base)`.
    pub election_timeout_ms: u64,

    /// Heartbeat interval in milliseconds; also the driver tick period.
    pub heartbeat_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            election_timeout_ms: 1_000,
            heartbeat_interval_ms: 100,
        }
    }
}

impl TimingConfig {
    pub fn new(election_timeout: Duration, heartbeat_interval: Duration) -> anyhow::Result<Self> {
        let timing = Self {
            election_timeout_ms: election_timeout.as_millis() as u64,
            heartbeat_interval_ms: heartbeat_interval.as_millis() as u64,
        };
        timing.validate()?;
        Ok(timing)
    }

    /// Validate timer constraints.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_interval_ms == 0 {
            anyhow::bail!("heartbeat_interval_ms must be > 0");
        }
        if self.election_ticks() < MIN_ELECTION_TICKS {
            anyhow::bail!(
                "election_timeout_ms ({}) must be at least {}x heartbeat_interval_ms ({})",
                self.election_timeout_ms,
                MIN_ELECTION_TICKS,
                self.heartbeat_interval_ms
            );
        }
        Ok(())
    }

    /// Wall-clock duration of one tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Base election timeout expressed in ticks.
    pub fn election_ticks(&self) -> u32 {
        if self.heartbeat_interval_ms == 0 {
            return 0;
        }
        (self.election_timeout_ms / self.heartbeat_interval_ms) as u32
    }

    /// Heartbeat interval expressed in ticks.
    pub fn heartbeat_ticks(&self) -> u32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_from_durations() {
        let timing =
            TimingConfig::new(Duration::from_millis(500), Duration::from_millis(50)).unwrap();
        assert_eq!(timing.election_ticks(), 10);
        assert_eq!(timing.heartbeat_ticks(), 1);
        assert_eq!(timing.tick_interval(), Duration::from_millis(50));
    }

    #[test]
    fn election_timeout_must_dominate_heartbeat() {
        assert!(TimingConfig::new(Duration::from_millis(100), Duration::from_millis(50)).is_err());
        assert!(TimingConfig::new(Duration::from_millis(100), Duration::ZERO).is_err());
    }
}
