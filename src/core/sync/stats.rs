/*!
 * Synchronizer Statistics
 * Lock-free counters for the slow paths of the acquire engine
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of synchronizer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatsSnapshot {
    pub parks: u64,
    pub timed_parks: u64,
    pub spins: u64,
    pub cancellations: u64,
    pub timeouts: u64,
    pub interrupts: u64,
    pub successor_unparks: u64,
    pub shared_releases: u64,
    pub condition_waits: u64,
    pub signal_transfers: u64,
}

/// Atomic counters updated on slow paths only
///
/// # Note
/// Counters are relaxed and independent, so a snapshot taken under load is
/// not a consistent cut. This is acceptable for monitoring.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct SyncStats {
    parks: AtomicU64,
    timed_parks: AtomicU64,
    spins: AtomicU64,
    cancellations: AtomicU64,
    timeouts: AtomicU64,
    interrupts: AtomicU64,
    successor_unparks: AtomicU64,
    shared_releases: AtomicU64,
    condition_waits: AtomicU64,
    signal_transfers: AtomicU64,
}

macro_rules! counter {
    ($($(#[$doc:meta])* $name:ident => $field:ident;)*) => {
        $(
            $(#[$doc])*
            #[inline(always)]
            pub(crate) fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        /// Untimed park
        inc_parks => parks;
        /// Park with a deadline
        inc_timed_parks => timed_parks;
        /// Timed wait iteration too short to park
        inc_spins => spins;
        inc_cancellations => cancellations;
        inc_timeouts => timeouts;
        inc_interrupts => interrupts;
        inc_successor_unparks => successor_unparks;
        /// Pass through the shared release loop
        inc_shared_releases => shared_releases;
        inc_condition_waits => condition_waits;
        inc_signal_transfers => signal_transfers;
    }

    /// Get snapshot of current stats (no locks required)
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            parks: self.parks.load(Ordering::Relaxed),
            timed_parks: self.timed_parks.load(Ordering::Relaxed),
            spins: self.spins.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            successor_unparks: self.successor_unparks.load(Ordering::Relaxed),
            shared_releases: self.shared_releases.load(Ordering::Relaxed),
            condition_waits: self.condition_waits.load(Ordering::Relaxed),
            signal_transfers: self.signal_transfers.load(Ordering::Relaxed),
        }
    }
}
