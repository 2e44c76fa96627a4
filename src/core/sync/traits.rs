/*!
 * Synchronizer Hooks
 *
 * The contract between the queue engine and a concrete primitive.
 *
 * # Design: Trait-Based Hooks
 *
 * The engine never interprets the state word. A concrete mutex, semaphore or
 * latch implements one or both hook traits and the engine calls them around
 * queueing and parking. Exclusive entry points require `ExclusiveHooks` and
 * shared entry points require `SharedHooks`, so asking for a mode the type
 * does not support fails to compile.
 *
 * Hooks must not block. They may inspect the queue through `SyncCore`
 * (for example `has_queued_predecessors` to implement fairness).
 */

use super::queue::SyncCore;
use crate::core::errors::{SyncError, SyncResult};

/// Hooks for exclusive-mode acquisition
pub trait ExclusiveHooks: Send + Sync {
    /// Try to acquire in exclusive mode without blocking
    ///
    /// Called by the acquiring thread, both on the fast path and every time
    /// it reaches the front of the queue.
    fn try_acquire(&self, sync: &SyncCore, arg: i64) -> SyncResult<bool>;

    /// Try to set the state to reflect an exclusive release
    ///
    /// Returns `true` if the object is now fully released and a waiter may
    /// acquire it.
    fn try_release(&self, sync: &SyncCore, arg: i64) -> SyncResult<bool>;

    /// Whether the calling thread holds the synchronizer exclusively
    ///
    /// Only condition objects need this, so the default reports the hook as
    /// unsupported.
    fn is_held_exclusively(&self, sync: &SyncCore) -> SyncResult<bool> {
        let _ = sync;
        Err(SyncError::Unsupported {
            hook: "is_held_exclusively",
        })
    }
}

/// Hooks for shared-mode acquisition
pub trait SharedHooks: Send + Sync {
    /// Try to acquire in shared mode without blocking
    ///
    /// - negative: failed
    /// - zero: succeeded, later shared acquires cannot succeed
    /// - positive: succeeded, later shared acquires may also succeed
    fn try_acquire_shared(&self, sync: &SyncCore, arg: i64) -> SyncResult<i64>;

    /// Try to set the state to reflect a shared release
    ///
    /// Returns `true` if a waiting acquire (shared or exclusive) may now
    /// succeed.
    fn try_release_shared(&self, sync: &SyncCore, arg: i64) -> SyncResult<bool>;
}
