/*!
 * Synchronization Core
 *
 * A queue-based blocking synchronizer that concrete primitives (mutexes,
 * semaphores, latches, barriers) build on by supplying a handful of hooks.
 *
 * # Architecture
 *
 * - `SyncCore`: atomic state word plus a CLH-style queue of parked threads
 * - `QueuedSynchronizer<H>`: exclusive and shared acquire/release engines,
 *   with timed and interruptible variants
 * - `ConditionObject<H>`: wait/signal lists bound to an exclusive synchronizer
 * - `ThreadToken`: per-thread permit used for every park and unpark
 *
 * # Performance
 *
 * - Uncontended acquire and release are a single hook call (usually one CAS)
 * - The queue is only allocated on first contention
 * - Timed waits spin instead of parking when little time remains
 */

mod condition;
mod config;
mod node;
mod park;
mod queue;
mod stats;
mod synchronizer;
mod traits;

#[cfg(test)]
mod test_hooks;

pub use condition::{ConditionObject, WaitTimeoutResult};
pub use config::{SyncConfig, DEFAULT_SPIN_THRESHOLD};
pub use node::{Mode, WaitStatus};
pub use park::ThreadToken;
pub use queue::{AcquireOutcome, SyncCore};
pub use stats::{SyncStats, SyncStatsSnapshot};
pub use synchronizer::QueuedSynchronizer;
pub use traits::{ExclusiveHooks, SharedHooks};
