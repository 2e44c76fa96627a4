/*!
 * Condition Objects
 *
 * Wait/signal lists bound to an exclusive `QueuedSynchronizer`.
 *
 * # Protocol
 *
 * A waiter appends a node to the condition list, fully releases the
 * synchronizer, and parks until its node shows up on the sync queue. A signal
 * moves the first live node from the condition list to the sync queue; the
 * woken thread then reacquires with the hold count it released.
 *
 * The condition list itself is only touched while the synchronizer is held
 * exclusively, so plain loads and stores suffice there. The status CAS in
 * `transfer_for_signal` / `transfer_after_cancelled_wait` settles the race
 * between a signal and a timeout or interrupt.
 *
 * # Interrupts
 *
 * An interrupt seen before the node was signalled makes the wait fail with
 * `SyncError::Interrupted` after reacquiring. One seen after the signal is
 * re-asserted on the caller's token instead, so no signal is lost.
 */

use super::node::{Node, WaitStatus};
use super::park::ThreadToken;
use super::queue::AcquireOutcome;
use super::stats::SyncStats;
use super::synchronizer::QueuedSynchronizer;
use super::traits::ExclusiveHooks;
use crate::core::errors::{SyncError, SyncResult};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::hint;
use std::ptr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How an interrupt observed during a wait is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptMode {
    None,
    /// Interrupted after the signal: re-assert on exit
    Reinterrupt,
    /// Interrupted before the signal: fail on exit
    Throw,
}

/// Outcome of a timed condition wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTimeoutResult {
    remaining: Duration,
    timed_out: bool,
}

impl WaitTimeoutResult {
    /// Time left before the deadline when the wait returned
    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// Whether the wait returned because the deadline passed
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

/// Condition variable for an exclusive `QueuedSynchronizer`
///
/// Every operation requires the calling thread to hold the synchronizer
/// exclusively, as reported by `ExclusiveHooks::is_held_exclusively`.
pub struct ConditionObject<H: ExclusiveHooks> {
    sync: Arc<QueuedSynchronizer<H>>,
    first_waiter: ArcSwapOption<Node>,
    last_waiter: ArcSwapOption<Node>,
}

impl<H: ExclusiveHooks> ConditionObject<H> {
    pub fn new(sync: Arc<QueuedSynchronizer<H>>) -> Self {
        Self {
            sync,
            first_waiter: ArcSwapOption::empty(),
            last_waiter: ArcSwapOption::empty(),
        }
    }

    /// The synchronizer this condition is bound to
    pub fn synchronizer(&self) -> &Arc<QueuedSynchronizer<H>> {
        &self.sync
    }

    /// Whether this condition was created by `sync`
    pub fn is_owned_by(&self, sync: &QueuedSynchronizer<H>) -> bool {
        ptr::eq(Arc::as_ptr(&self.sync), sync)
    }

    fn ensure_held(&self) -> SyncResult<()> {
        if self.sync.is_held_exclusively()? {
            Ok(())
        } else {
            Err(SyncError::IllegalState(
                "condition used without holding its synchronizer",
            ))
        }
    }

    // =========================================================================
    // Condition list
    // =========================================================================

    fn add_condition_waiter(&self) -> Arc<Node> {
        if let Some(last) = self.last_waiter.load_full() {
            if last.status() != WaitStatus::Condition {
                self.unlink_cancelled_waiters();
            }
        }

        let node = Node::condition(ThreadToken::current());
        match self.last_waiter.load_full() {
            None => self.first_waiter.store(Some(Arc::clone(&node))),
            Some(last) => last.set_next_waiter(Some(Arc::clone(&node))),
        }
        self.last_waiter.store(Some(Arc::clone(&node)));
        node
    }

    /// Drop nodes whose wait was cancelled from the condition list
    fn unlink_cancelled_waiters(&self) {
        let mut trail: Option<Arc<Node>> = None;
        let mut cursor = self.first_waiter.load_full();

        while let Some(node) = cursor {
            let next = node.next_waiter();
            if node.status() == WaitStatus::Condition {
                trail = Some(node);
            } else {
                node.set_next_waiter(None);
                match &trail {
                    None => self.first_waiter.store(next.clone()),
                    Some(t) => t.set_next_waiter(next.clone()),
                }
                if next.is_none() {
                    self.last_waiter.store(trail.clone());
                }
            }
            cursor = next;
        }
    }

    /// Transfer the first node that has not been cancelled
    fn do_signal(&self, mut first: Arc<Node>) {
        loop {
            let next = first.next_waiter();
            self.first_waiter.store(next.clone());
            if next.is_none() {
                self.last_waiter.store(None);
            }
            first.set_next_waiter(None);

            if self.sync.core().transfer_for_signal(&first) {
                return;
            }
            match next {
                Some(node) => first = node,
                None => return,
            }
        }
    }

    fn do_signal_all(&self, first: Arc<Node>) {
        self.first_waiter.store(None);
        self.last_waiter.store(None);

        let mut cursor = Some(first);
        while let Some(node) = cursor {
            cursor = node.next_waiter();
            node.set_next_waiter(None);
            self.sync.core().transfer_for_signal(&node);
        }
    }

    /// Move the longest-waiting thread to the synchronizer's queue
    pub fn signal(&self) -> SyncResult<()> {
        self.ensure_held()?;
        if let Some(first) = self.first_waiter.load_full() {
            trace!("signalling condition waiter");
            self.do_signal(first);
        }
        Ok(())
    }

    /// Move every waiting thread to the synchronizer's queue
    pub fn signal_all(&self) -> SyncResult<()> {
        self.ensure_held()?;
        if let Some(first) = self.first_waiter.load_full() {
            trace!("signalling all condition waiters");
            self.do_signal_all(first);
        }
        Ok(())
    }

    // =========================================================================
    // Waiting
    // =========================================================================

    /// Release, wait for a signal, then reacquire; fails on interrupt
    pub fn wait(&self) -> SyncResult<()> {
        self.wait_deadline(None).map(|_| ())
    }

    /// Like `wait`, but interrupts are re-asserted on return instead
    pub fn wait_uninterruptibly(&self) -> SyncResult<()> {
        self.ensure_held()?;
        let token = ThreadToken::current();
        let node = self.add_condition_waiter();
        let saved = self.sync.fully_release(&node)?;
        self.sync.core().record(SyncStats::inc_condition_waits);

        let mut interrupted = false;
        while !self.sync.core().is_on_sync_queue(&node) {
            token.park();
            if token.take_interrupt() {
                interrupted = true;
            }
        }

        if let AcquireOutcome::Acquired { interrupted: true } =
            self.sync.acquire_queued(&node, saved, false, None)?
        {
            interrupted = true;
        }
        if interrupted {
            token.interrupt();
        }
        Ok(())
    }

    /// Wait for at most `nanos_timeout` nanoseconds
    ///
    /// Returns an estimate of the nanoseconds left before the deadline. A
    /// value `<= 0` means the wait timed out.
    pub fn wait_nanos(&self, nanos_timeout: i64) -> SyncResult<i64> {
        let start = Instant::now();
        let timeout = Duration::from_nanos(u64::try_from(nanos_timeout).unwrap_or(0));
        let timed_out = self.wait_deadline(start.checked_add(timeout))?;

        let elapsed = i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX);
        let remaining = nanos_timeout.saturating_sub(elapsed);
        Ok(if timed_out { remaining.min(0) } else { remaining })
    }

    /// Wait for at most `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> SyncResult<WaitTimeoutResult> {
        let start = Instant::now();
        let timed_out = self.wait_deadline(start.checked_add(timeout))?;
        Ok(WaitTimeoutResult {
            remaining: timeout.saturating_sub(start.elapsed()),
            timed_out,
        })
    }

    /// Wait for at most `timeout`; `false` if the deadline passed first
    pub fn wait_for(&self, timeout: Duration) -> SyncResult<bool> {
        Ok(!self.wait_timeout(timeout)?.timed_out())
    }

    /// Wait until `deadline`; `false` if the deadline passed first
    pub fn wait_until(&self, deadline: Instant) -> SyncResult<bool> {
        Ok(!self.wait_deadline(Some(deadline))?)
    }

    /// Interruptible wait with an optional deadline; returns whether it timed out
    fn wait_deadline(&self, deadline: Option<Instant>) -> SyncResult<bool> {
        let token = ThreadToken::current();
        if token.take_interrupt() {
            return Err(SyncError::Interrupted);
        }
        self.ensure_held()?;

        let core = self.sync.core();
        let node = self.add_condition_waiter();
        let saved = self.sync.fully_release(&node)?;
        core.record(SyncStats::inc_condition_waits);

        let mut timed_out = false;
        let mut mode = InterruptMode::None;
        while !core.is_on_sync_queue(&node) {
            match deadline {
                None => {
                    core.record(SyncStats::inc_parks);
                    token.park();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        timed_out = core.transfer_after_cancelled_wait(&node);
                        if timed_out {
                            core.record(SyncStats::inc_timeouts);
                        }
                        break;
                    }
                    let remaining = deadline - now;
                    if core.config().should_park_for(remaining) {
                        core.record(SyncStats::inc_timed_parks);
                        token.park_timeout(remaining);
                    } else {
                        core.record(SyncStats::inc_spins);
                        hint::spin_loop();
                    }
                }
            }

            mode = self.check_interrupt_while_waiting(&node, &token);
            if mode != InterruptMode::None {
                break;
            }
        }

        self.reacquire(&node, saved, mode, &token)?;
        Ok(timed_out)
    }

    fn check_interrupt_while_waiting(&self, node: &Arc<Node>, token: &ThreadToken) -> InterruptMode {
        if !token.take_interrupt() {
            return InterruptMode::None;
        }
        self.sync.core().record(SyncStats::inc_interrupts);
        if self.sync.core().transfer_after_cancelled_wait(node) {
            InterruptMode::Throw
        } else {
            InterruptMode::Reinterrupt
        }
    }

    /// Reacquire with the saved state, then report a pending interrupt
    fn reacquire(
        &self,
        node: &Arc<Node>,
        saved: i64,
        mut mode: InterruptMode,
        token: &ThreadToken,
    ) -> SyncResult<()> {
        if let AcquireOutcome::Acquired { interrupted: true } =
            self.sync.acquire_queued(node, saved, false, None)?
        {
            if mode != InterruptMode::Throw {
                mode = InterruptMode::Reinterrupt;
            }
        }

        // Cancelled before a signal: still linked on the condition list
        if node.has_next_waiter() {
            self.unlink_cancelled_waiters();
        }

        match mode {
            InterruptMode::None => Ok(()),
            InterruptMode::Reinterrupt => {
                token.interrupt();
                Ok(())
            }
            InterruptMode::Throw => {
                debug!("condition wait interrupted");
                Err(SyncError::Interrupted)
            }
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    fn iter_waiters(&self) -> impl Iterator<Item = Arc<Node>> {
        std::iter::successors(self.first_waiter.load_full(), |node| node.next_waiter())
            .filter(|node| node.status() == WaitStatus::Condition)
    }

    /// Whether any thread waits on this condition
    pub fn has_waiters(&self) -> SyncResult<bool> {
        self.ensure_held()?;
        Ok(self.iter_waiters().next().is_some())
    }

    /// Estimate of the number of threads waiting on this condition
    pub fn wait_queue_length(&self) -> SyncResult<usize> {
        self.ensure_held()?;
        Ok(self.iter_waiters().count())
    }

    /// Tokens of the threads waiting on this condition, oldest first
    pub fn waiting_threads(&self) -> SyncResult<Vec<ThreadToken>> {
        self.ensure_held()?;
        Ok(self.iter_waiters().filter_map(|node| node.thread()).collect())
    }
}

impl<H: ExclusiveHooks> fmt::Debug for ConditionObject<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionObject")
            .field("sync", &self.sync)
            .field("has_waiters", &self.first_waiter.load().is_some())
            .finish()
    }
}
