/*!
 * Synchronizer Configuration
 *
 * Runtime tuning for the acquire engine
 */

use std::time::Duration;

/// Default threshold below which timed waits spin instead of parking
pub const DEFAULT_SPIN_THRESHOLD: Duration = Duration::from_nanos(1_000);

/// Synchronizer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Remaining time under which a timed wait busy-spins rather than parking
    pub spin_threshold: Duration,
    /// Record park/cancel/propagation counters
    pub collect_stats: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            spin_threshold: DEFAULT_SPIN_THRESHOLD,
            collect_stats: true,
        }
    }
}

impl SyncConfig {
    /// Configuration optimized for low-latency (< 1ms wait expected)
    pub const fn low_latency() -> Self {
        Self {
            spin_threshold: Duration::from_micros(10),
            collect_stats: false,
        }
    }

    /// Configuration optimized for long waits (> 1ms expected)
    pub const fn long_wait() -> Self {
        Self {
            spin_threshold: Duration::from_nanos(500),
            collect_stats: true,
        }
    }

    /// Whether a timed wait with `remaining` left should park
    #[inline(always)]
    pub fn should_park_for(&self, remaining: Duration) -> bool {
        remaining > self.spin_threshold
    }
}
