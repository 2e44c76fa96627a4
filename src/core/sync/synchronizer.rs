/*!
 * Queued Synchronizer
 *
 * Blocking acquire/release entry points layered over `SyncCore` and a set of
 * hooks supplied by the concrete primitive.
 *
 * # Modes
 *
 * - **Exclusive** (`H: ExclusiveHooks`): one holder at a time
 * - **Shared** (`H: SharedHooks`): many holders, with wake-ups propagated
 *   along the queue when a release frees room for more than one
 *
 * # Interrupts
 *
 * - `acquire*` without suffix: interrupts are absorbed while waiting and
 *   re-asserted on the caller's token once the acquire completes
 * - `*_interruptibly`: fails with `SyncError::Interrupted`
 * - timed variants: return `Ok(false)` on expiry, fail on interrupt
 *
 * Every failure path cancels the caller's node before returning, so the
 * queue is left acquired, cleanly failed or cleanly cancelled.
 */

use super::condition::ConditionObject;
use super::config::SyncConfig;
use super::node::{Mode, Node, WaitStatus};
use super::park::ThreadToken;
use super::queue::{AcquireOutcome, SyncCore};
use super::stats::SyncStatsSnapshot;
use super::traits::{ExclusiveHooks, SharedHooks};
use crate::core::errors::{SyncError, SyncResult};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Wait-queue based synchronizer parameterized by its hooks
///
/// # Examples
///
/// ```
/// use queued_sync::core::sync::{ExclusiveHooks, QueuedSynchronizer, SyncCore};
/// use queued_sync::SyncResult;
///
/// struct BinaryMutex;
///
/// impl ExclusiveHooks for BinaryMutex {
///     fn try_acquire(&self, sync: &SyncCore, _arg: i64) -> SyncResult<bool> {
///         Ok(sync.compare_and_set_state(0, 1))
///     }
///
///     fn try_release(&self, sync: &SyncCore, _arg: i64) -> SyncResult<bool> {
///         Ok(sync.compare_and_set_state(1, 0))
///     }
/// }
///
/// let mutex = QueuedSynchronizer::new(BinaryMutex, 0);
/// mutex.acquire(1).unwrap();
/// assert_eq!(mutex.state(), 1);
/// mutex.release(1).unwrap();
/// assert_eq!(mutex.state(), 0);
/// ```
pub struct QueuedSynchronizer<H> {
    core: SyncCore,
    hooks: H,
}

/// Deadline for a timed wait; `None` when `timeout` cannot be represented
#[inline]
fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

impl<H> QueuedSynchronizer<H> {
    pub fn new(hooks: H, initial_state: i64) -> Self {
        Self::with_config(hooks, initial_state, SyncConfig::default())
    }

    pub fn with_config(hooks: H, initial_state: i64, config: SyncConfig) -> Self {
        Self {
            core: SyncCore::with_config(initial_state, config),
            hooks,
        }
    }

    /// Queue, state word and introspection
    #[inline]
    pub fn core(&self) -> &SyncCore {
        &self.core
    }

    #[inline]
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    #[inline]
    pub fn state(&self) -> i64 {
        self.core.state()
    }

    #[inline]
    pub fn set_state(&self, new_state: i64) {
        self.core.set_state(new_state);
    }

    #[inline]
    pub fn compare_and_set_state(&self, expect: i64, update: i64) -> bool {
        self.core.compare_and_set_state(expect, update)
    }

    pub fn has_queued_threads(&self) -> bool {
        self.core.has_queued_threads()
    }

    pub fn queue_length(&self) -> usize {
        self.core.queue_length()
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.core.stats().snapshot()
    }
}

// =============================================================================
// Exclusive mode
// =============================================================================

impl<H: ExclusiveHooks> QueuedSynchronizer<H> {
    /// Acquire in exclusive mode, ignoring interrupts
    ///
    /// An interrupt received while waiting is re-asserted on the caller's
    /// token after the acquire completes. Errors come from the hooks only.
    pub fn acquire(&self, arg: i64) -> SyncResult<()> {
        if self.hooks.try_acquire(&self.core, arg)? {
            return Ok(());
        }

        let node = self.core.add_waiter(Mode::Exclusive);
        if let AcquireOutcome::Acquired { interrupted: true } =
            self.acquire_queued(&node, arg, false, None)?
        {
            ThreadToken::current().interrupt();
        }
        Ok(())
    }

    /// Acquire in exclusive mode, aborting if interrupted
    pub fn acquire_interruptibly(&self, arg: i64) -> SyncResult<()> {
        if ThreadToken::current().take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.hooks.try_acquire(&self.core, arg)? {
            return Ok(());
        }

        let node = self.core.add_waiter(Mode::Exclusive);
        match self.acquire_queued(&node, arg, true, None)? {
            AcquireOutcome::Interrupted => {
                debug!("exclusive acquire interrupted");
                Err(SyncError::Interrupted)
            }
            _ => Ok(()),
        }
    }

    /// Acquire in exclusive mode within `nanos_timeout` nanoseconds
    ///
    /// Non-positive timeouts only try the fast path.
    pub fn try_acquire_nanos(&self, arg: i64, nanos_timeout: i64) -> SyncResult<bool> {
        let nanos = u64::try_from(nanos_timeout).unwrap_or(0);
        self.try_acquire_for(arg, Duration::from_nanos(nanos))
    }

    /// Acquire in exclusive mode within `timeout`
    ///
    /// Returns `Ok(false)` if the timeout elapsed.
    pub fn try_acquire_for(&self, arg: i64, timeout: Duration) -> SyncResult<bool> {
        if ThreadToken::current().take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.hooks.try_acquire(&self.core, arg)? {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }

        let node = self.core.add_waiter(Mode::Exclusive);
        match self.acquire_queued(&node, arg, true, deadline_after(timeout))? {
            AcquireOutcome::Acquired { .. } => Ok(true),
            AcquireOutcome::Cancelled => Ok(false),
            AcquireOutcome::Interrupted => {
                debug!("timed exclusive acquire interrupted");
                Err(SyncError::Interrupted)
            }
        }
    }

    /// Release in exclusive mode, waking the next waiter if fully released
    pub fn release(&self, arg: i64) -> SyncResult<bool> {
        if !self.hooks.try_release(&self.core, arg)? {
            return Ok(false);
        }
        if let Some(head) = self.core.head() {
            if head.status() != WaitStatus::Neutral {
                self.core.unpark_successor(&head);
            }
        }
        Ok(true)
    }

    /// Whether the caller holds this synchronizer exclusively
    pub fn is_held_exclusively(&self) -> SyncResult<bool> {
        self.hooks.is_held_exclusively(&self.core)
    }

    /// Exclusive acquire loop for an already-queued node
    pub(crate) fn acquire_queued(
        &self,
        node: &Arc<Node>,
        arg: i64,
        interruptible: bool,
        deadline: Option<Instant>,
    ) -> SyncResult<AcquireOutcome> {
        self.core.acquire_queued(node, interruptible, deadline, || {
            Ok(self.hooks.try_acquire(&self.core, arg)?.then_some(0))
        })
    }

    /// Release the entire hold count on behalf of a condition wait
    ///
    /// Returns the released state so the waiter can restore it.
    pub(crate) fn fully_release(&self, node: &Arc<Node>) -> SyncResult<i64> {
        let saved = self.core.state();
        match self.release(saved) {
            Ok(true) => Ok(saved),
            Ok(false) => {
                node.set_status(WaitStatus::Cancelled);
                warn!(state = saved, "release hook refused a full release");
                Err(SyncError::IllegalState(
                    "release hook refused to fully release the synchronizer",
                ))
            }
            Err(e) => {
                node.set_status(WaitStatus::Cancelled);
                debug!(error = %e, "full release failed");
                Err(e)
            }
        }
    }

    /// Create a condition bound to this synchronizer
    pub fn new_condition(self: &Arc<Self>) -> ConditionObject<H> {
        ConditionObject::new(Arc::clone(self))
    }

    /// Whether `condition` was created by this synchronizer
    pub fn owns(&self, condition: &ConditionObject<H>) -> bool {
        condition.is_owned_by(self)
    }

    fn check_owns(&self, condition: &ConditionObject<H>) -> SyncResult<()> {
        if self.owns(condition) {
            Ok(())
        } else {
            Err(SyncError::IllegalArgument(
                "condition belongs to another synchronizer",
            ))
        }
    }

    /// Whether any thread waits on `condition`; requires exclusive ownership
    pub fn has_waiters(&self, condition: &ConditionObject<H>) -> SyncResult<bool> {
        self.check_owns(condition)?;
        condition.has_waiters()
    }

    /// Estimate of the threads waiting on `condition`
    pub fn wait_queue_length(&self, condition: &ConditionObject<H>) -> SyncResult<usize> {
        self.check_owns(condition)?;
        condition.wait_queue_length()
    }

    /// Tokens of the threads waiting on `condition`
    pub fn waiting_threads(&self, condition: &ConditionObject<H>) -> SyncResult<Vec<ThreadToken>> {
        self.check_owns(condition)?;
        condition.waiting_threads()
    }
}

// =============================================================================
// Shared mode
// =============================================================================

impl<H: SharedHooks> QueuedSynchronizer<H> {
    /// Acquire in shared mode, ignoring interrupts
    pub fn acquire_shared(&self, arg: i64) -> SyncResult<()> {
        if self.hooks.try_acquire_shared(&self.core, arg)? >= 0 {
            return Ok(());
        }

        let node = self.core.add_waiter(Mode::Shared);
        if let AcquireOutcome::Acquired { interrupted: true } =
            self.acquire_shared_queued(&node, arg, false, None)?
        {
            ThreadToken::current().interrupt();
        }
        Ok(())
    }

    /// Acquire in shared mode, aborting if interrupted
    pub fn acquire_shared_interruptibly(&self, arg: i64) -> SyncResult<()> {
        if ThreadToken::current().take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.hooks.try_acquire_shared(&self.core, arg)? >= 0 {
            return Ok(());
        }

        let node = self.core.add_waiter(Mode::Shared);
        match self.acquire_shared_queued(&node, arg, true, None)? {
            AcquireOutcome::Interrupted => {
                debug!("shared acquire interrupted");
                Err(SyncError::Interrupted)
            }
            _ => Ok(()),
        }
    }

    /// Acquire in shared mode within `nanos_timeout` nanoseconds
    pub fn try_acquire_shared_nanos(&self, arg: i64, nanos_timeout: i64) -> SyncResult<bool> {
        let nanos = u64::try_from(nanos_timeout).unwrap_or(0);
        self.try_acquire_shared_for(arg, Duration::from_nanos(nanos))
    }

    /// Acquire in shared mode within `timeout`
    pub fn try_acquire_shared_for(&self, arg: i64, timeout: Duration) -> SyncResult<bool> {
        if ThreadToken::current().take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        if self.hooks.try_acquire_shared(&self.core, arg)? >= 0 {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }

        let node = self.core.add_waiter(Mode::Shared);
        match self.acquire_shared_queued(&node, arg, true, deadline_after(timeout))? {
            AcquireOutcome::Acquired { .. } => Ok(true),
            AcquireOutcome::Cancelled => Ok(false),
            AcquireOutcome::Interrupted => {
                debug!("timed shared acquire interrupted");
                Err(SyncError::Interrupted)
            }
        }
    }

    /// Release in shared mode, propagating wake-ups along the queue
    pub fn release_shared(&self, arg: i64) -> SyncResult<bool> {
        if !self.hooks.try_release_shared(&self.core, arg)? {
            return Ok(false);
        }
        self.core.do_release_shared();
        Ok(true)
    }

    fn acquire_shared_queued(
        &self,
        node: &Arc<Node>,
        arg: i64,
        interruptible: bool,
        deadline: Option<Instant>,
    ) -> SyncResult<AcquireOutcome> {
        self.core.acquire_queued(node, interruptible, deadline, || {
            let remaining = self.hooks.try_acquire_shared(&self.core, arg)?;
            Ok((remaining >= 0).then_some(remaining))
        })
    }
}

impl<H> fmt::Display for QueuedSynchronizer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.core, f)
    }
}

impl<H> fmt::Debug for QueuedSynchronizer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedSynchronizer")
            .field("hooks", &std::any::type_name::<H>())
            .field("core", &self.core)
            .finish()
    }
}
