/*!
 * Queued Synchronizer Library
 * Queue-based blocking synchronizer core exposed as a library
 */

pub mod core;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{SyncError, SyncResult};
pub use crate::core::sync::{
    AcquireOutcome, ConditionObject, ExclusiveHooks, Mode, QueuedSynchronizer, SharedHooks,
    SyncConfig, SyncCore, SyncStatsSnapshot, ThreadToken, WaitStatus, WaitTimeoutResult,
};
pub use monitoring::{init_tracing, span_operation};
