/*!
 * Sync Queue
 *
 * CLH-style wait queue plus the state word it guards.
 *
 * # Architecture
 *
 * `SyncCore` owns everything the engine shares between threads: the state
 * word, the exclusive owner, and the `head`/`tail` of the queue. The head is
 * a sentinel created on first contention; the node after it belongs to the
 * thread next in line. No lock is taken: contended fields only change by CAS.
 *
 * Hooks receive a `&SyncCore` so concrete primitives can read and update the
 * state and consult the queue (for fairness) without seeing node internals.
 */

use super::config::SyncConfig;
use super::node::{as_ptr, cas_link, cas_link_from, same, Mode, Node, WaitStatus};
use super::park::ThreadToken;
use super::stats::SyncStats;
use crate::core::errors::{SyncError, SyncResult};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::hint;
use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::trace;

/// Result of the queued acquire loop
///
/// Entry points decide how to surface each outcome: uninterruptible calls
/// re-assert an absorbed interrupt, interruptible calls turn `Interrupted`
/// into an error and timed calls turn `Cancelled` into `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Acquired; `interrupted` reports an interrupt absorbed while waiting
    Acquired { interrupted: bool },
    /// Deadline passed and the node was cancelled
    Cancelled,
    /// Interrupted during an interruptible wait and the node was cancelled
    Interrupted,
}

impl AcquireOutcome {
    #[inline]
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }
}

/// State word, exclusive owner and wait queue
pub struct SyncCore {
    state: AtomicI64,
    head: ArcSwapOption<Node>,
    tail: ArcSwapOption<Node>,
    /// Token id of the exclusive owner, 0 when unowned
    owner: AtomicU64,
    config: SyncConfig,
    stats: SyncStats,
}

impl SyncCore {
    pub fn new(initial_state: i64) -> Self {
        Self::with_config(initial_state, SyncConfig::default())
    }

    pub fn with_config(initial_state: i64, config: SyncConfig) -> Self {
        Self {
            state: AtomicI64::new(initial_state),
            head: ArcSwapOption::empty(),
            tail: ArcSwapOption::empty(),
            owner: AtomicU64::new(0),
            config,
            stats: SyncStats::new(),
        }
    }

    // =========================================================================
    // State word
    // =========================================================================

    #[inline(always)]
    pub fn state(&self) -> i64 {
        self.state.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn set_state(&self, new_state: i64) {
        self.state.store(new_state, Ordering::Release);
    }

    #[inline(always)]
    pub fn compare_and_set_state(&self, expect: i64, update: i64) -> bool {
        self.state
            .compare_exchange(expect, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // =========================================================================
    // Exclusive owner
    // =========================================================================

    pub fn set_exclusive_owner(&self, owner: Option<&ThreadToken>) {
        self.owner
            .store(owner.map_or(0, ThreadToken::id), Ordering::Release);
    }

    /// Token id of the current exclusive owner
    pub fn exclusive_owner(&self) -> Option<u64> {
        match self.owner.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    #[inline]
    pub fn is_owned_by(&self, token: &ThreadToken) -> bool {
        self.owner.load(Ordering::Acquire) == token.id()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    #[inline(always)]
    pub(crate) fn record(&self, update: impl FnOnce(&SyncStats)) {
        if self.config.collect_stats {
            update(&self.stats);
        }
    }

    // =========================================================================
    // Queue plumbing
    // =========================================================================

    #[inline]
    pub(crate) fn head(&self) -> Option<Arc<Node>> {
        self.head.load_full()
    }

    #[inline]
    fn head_is(&self, node: &Arc<Node>) -> bool {
        ptr::eq(as_ptr(&self.head.load()), Arc::as_ptr(node))
    }

    #[inline]
    fn head_is_link(&self, link: &Option<Arc<Node>>) -> bool {
        ptr::eq(as_ptr(&self.head.load()), as_ptr(link))
    }

    /// Insert `node` at the tail, creating the sentinel head if needed
    ///
    /// Returns the node's predecessor.
    pub(crate) fn enq(&self, node: &Arc<Node>) -> Arc<Node> {
        loop {
            match self.tail.load_full() {
                None => {
                    let sentinel = Node::sentinel();
                    if cas_link(&self.head, &None, Some(Arc::clone(&sentinel))) {
                        trace!("sync queue initialized");
                        self.tail.store(Some(sentinel));
                    }
                }
                Some(tail) => {
                    node.set_prev(Some(Arc::clone(&tail)));
                    if cas_link_from(&self.tail, &tail, Some(Arc::clone(node))) {
                        tail.set_next(Some(Arc::clone(node)));
                        return tail;
                    }
                }
            }
        }
    }

    /// Create a node for the calling thread and enqueue it
    pub(crate) fn add_waiter(&self, mode: Mode) -> Arc<Node> {
        let node = Node::waiter(mode, ThreadToken::current());

        // Fast path: one CAS onto an existing tail
        if let Some(pred) = self.tail.load_full() {
            node.set_prev(Some(Arc::clone(&pred)));
            if cas_link_from(&self.tail, &pred, Some(Arc::clone(&node))) {
                pred.set_next(Some(Arc::clone(&node)));
                return node;
            }
        }

        self.enq(&node);
        node
    }

    /// Make `node` the new head, dropping its thread and backward link
    pub(crate) fn set_head(&self, node: &Arc<Node>) {
        self.head.store(Some(Arc::clone(node)));
        node.clear_thread();
        node.set_prev(None);
    }

    /// Become head after a shared acquire and wake the next shared waiter if
    /// more acquires may succeed
    pub(crate) fn set_head_and_propagate(&self, node: &Arc<Node>, propagate: i64) {
        let old_head = self.head.load_full();
        self.set_head(node);

        let owes_wakeup =
            |head: &Option<Arc<Node>>| head.as_ref().map_or(true, |h| h.status().is_pending());

        if propagate > 0 || owes_wakeup(&old_head) || owes_wakeup(&self.head.load_full()) {
            let next_is_shared = node.next().map_or(true, |s| s.is_shared());
            if next_is_shared {
                self.do_release_shared();
            }
        }
    }

    /// Wake the first live successor of `node`
    pub(crate) fn unpark_successor(&self, node: &Arc<Node>) {
        let status = node.status();
        if status.is_pending() {
            node.cas_status(status, WaitStatus::Neutral);
        }

        // The forward link may lag, so fall back to a walk from the tail
        let mut successor = node.next().filter(|s| !s.status().is_cancelled());
        if successor.is_none() {
            let mut cursor = self.tail.load_full();
            while let Some(candidate) = cursor {
                if Arc::ptr_eq(&candidate, node) {
                    break;
                }
                if !candidate.status().is_cancelled() {
                    successor = Some(Arc::clone(&candidate));
                }
                cursor = candidate.prev();
            }
        }

        if let Some(thread) = successor.and_then(|s| s.thread()) {
            self.record(SyncStats::inc_successor_unparks);
            thread.unpark();
        }
    }

    /// Release loop for shared mode
    ///
    /// Signals the successor, or marks the head `Propagate` so an acquirer
    /// that has not linked yet still sees the owed wake-up.
    pub(crate) fn do_release_shared(&self) {
        self.record(SyncStats::inc_shared_releases);
        loop {
            let head = self.head.load_full();
            if let Some(h) = &head {
                if !ptr::eq(Arc::as_ptr(h), as_ptr(&self.tail.load())) {
                    match h.status() {
                        WaitStatus::Signal => {
                            if !h.cas_status(WaitStatus::Signal, WaitStatus::Neutral) {
                                continue;
                            }
                            self.unpark_successor(h);
                        }
                        WaitStatus::Neutral => {
                            if !h.cas_status(WaitStatus::Neutral, WaitStatus::Propagate) {
                                continue;
                            }
                        }
                        _ => {}
                    }
                }
            }
            if self.head_is_link(&head) {
                break;
            }
        }
    }

    /// Decide whether a thread that failed to acquire should park
    ///
    /// Parking is only safe once the predecessor is marked `Signal`. Cancelled
    /// predecessors are skipped and unlinked on the way.
    pub(crate) fn should_park_after_failed_acquire(&self, pred: &Arc<Node>, node: &Arc<Node>) -> bool {
        let status = pred.status();
        if status == WaitStatus::Signal {
            return true;
        }

        if status.is_cancelled() {
            let mut live = Arc::clone(pred);
            while live.status().is_cancelled() {
                let Some(prev) = live.prev() else { break };
                live = prev;
            }
            node.set_prev(Some(Arc::clone(&live)));
            live.set_next(Some(Arc::clone(node)));
        } else {
            // Neutral or propagate: ask for a signal, then retry before parking
            pred.cas_status(status, WaitStatus::Signal);
        }
        false
    }

    /// Cancel an in-progress acquire
    ///
    /// Leaves the queue consistent and guarantees that the node's successor
    /// is either reachable from a signalling predecessor or woken now.
    pub(crate) fn cancel_acquire(&self, node: &Arc<Node>) {
        node.clear_thread();
        self.record(SyncStats::inc_cancellations);

        let Some(mut pred) = node.prev() else {
            node.set_status(WaitStatus::Cancelled);
            return;
        };
        while pred.status().is_cancelled() {
            let Some(prev) = pred.prev() else { break };
            pred = prev;
        }
        node.set_prev(Some(Arc::clone(&pred)));

        // Apparent node to unsplice; CAS below fails if we lost a race
        let pred_next = pred.next();

        // Other nodes can skip past us from here on
        node.set_status(WaitStatus::Cancelled);
        trace!(status = ?pred.status(), "cancelling queued acquire");

        // At the tail: remove ourselves
        if cas_link_from(&self.tail, node, Some(Arc::clone(&pred))) {
            pred.cas_next(&pred_next, None);
            return;
        }

        // With a signalling predecessor, splice next past us. Otherwise wake
        // the successor so it can find a live predecessor on its own.
        let status = pred.status();
        let pred_will_signal = !self.head_is(&pred)
            && (status == WaitStatus::Signal
                || (!status.is_cancelled() && pred.cas_status(status, WaitStatus::Signal)))
            && pred.has_thread();

        if pred_will_signal {
            if let Some(next) = node.next() {
                if !next.status().is_cancelled() {
                    pred.cas_next(&pred_next, Some(next));
                }
            }
        } else {
            self.unpark_successor(node);
        }

        node.set_next(None);
    }

    /// Whether a node that started on a condition list is now on the sync queue
    pub(crate) fn is_on_sync_queue(&self, node: &Arc<Node>) -> bool {
        if node.status() == WaitStatus::Condition || !node.has_prev() {
            return false;
        }
        if node.has_next() {
            return true;
        }
        // prev is set before the tail CAS commits, so confirm from the tail
        self.find_node_from_tail(node)
    }

    fn find_node_from_tail(&self, node: &Arc<Node>) -> bool {
        let mut cursor = self.tail.load_full();
        while let Some(candidate) = cursor {
            if Arc::ptr_eq(&candidate, node) {
                return true;
            }
            cursor = candidate.prev();
        }
        false
    }

    /// Move a condition node onto the sync queue
    ///
    /// Returns `false` if the node was cancelled before the signal.
    pub(crate) fn transfer_for_signal(&self, node: &Arc<Node>) -> bool {
        if !node.cas_status(WaitStatus::Condition, WaitStatus::Neutral) {
            return false;
        }

        self.record(SyncStats::inc_signal_transfers);
        let pred = self.enq(node);
        let status = pred.status();
        if status.is_cancelled() || !pred.cas_status(status, WaitStatus::Signal) {
            // Nobody will signal it, let it resync itself
            if let Some(thread) = node.thread() {
                thread.unpark();
            }
        }
        true
    }

    /// Transfer a condition node after its wait was cancelled
    ///
    /// Returns `true` if the cancellation won the race against a signal.
    pub(crate) fn transfer_after_cancelled_wait(&self, node: &Arc<Node>) -> bool {
        if node.cas_status(WaitStatus::Condition, WaitStatus::Neutral) {
            self.enq(node);
            return true;
        }

        // A signal is mid-transfer; wait for the enqueue to finish
        while !self.is_on_sync_queue(node) {
            thread::yield_now();
        }
        false
    }

    // =========================================================================
    // Acquire loop
    // =========================================================================

    /// Wait in the queue until `attempt` succeeds at the front
    ///
    /// `attempt` returns the propagate value on success (ignored for
    /// exclusive nodes) and `None` on failure. Any outcome other than
    /// `Acquired`, including a hook error, cancels the node first.
    pub(crate) fn acquire_queued<F>(
        &self,
        node: &Arc<Node>,
        interruptible: bool,
        deadline: Option<Instant>,
        mut attempt: F,
    ) -> SyncResult<AcquireOutcome>
    where
        F: FnMut() -> SyncResult<Option<i64>>,
    {
        let token = ThreadToken::current();
        let mut interrupted = false;

        let outcome = loop {
            let Some(pred) = node.prev() else {
                break Err(SyncError::IllegalState("queued node has no predecessor"));
            };

            if self.head_is(&pred) {
                match attempt() {
                    Ok(Some(propagate)) => {
                        if node.is_shared() {
                            self.set_head_and_propagate(node, propagate);
                        } else {
                            self.set_head(node);
                        }
                        pred.set_next(None);
                        break Ok(AcquireOutcome::Acquired { interrupted });
                    }
                    Ok(None) => {}
                    Err(e) => break Err(e),
                }
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.record(SyncStats::inc_timeouts);
                        break Ok(AcquireOutcome::Cancelled);
                    }
                    Some(deadline - now)
                }
                None => None,
            };

            if self.should_park_after_failed_acquire(&pred, node) {
                match remaining {
                    None => {
                        self.record(SyncStats::inc_parks);
                        token.park();
                    }
                    Some(remaining) if self.config.should_park_for(remaining) => {
                        self.record(SyncStats::inc_timed_parks);
                        token.park_timeout(remaining);
                    }
                    Some(_) => {
                        self.record(SyncStats::inc_spins);
                        hint::spin_loop();
                    }
                }
            }

            if token.take_interrupt() {
                if interruptible {
                    self.record(SyncStats::inc_interrupts);
                    break Ok(AcquireOutcome::Interrupted);
                }
                interrupted = true;
            }
        };

        if !outcome.as_ref().is_ok_and(AcquireOutcome::is_acquired) {
            self.cancel_acquire(node);
        }
        outcome
    }

    // =========================================================================
    // Introspection (weakly consistent, O(n))
    // =========================================================================

    /// Whether any thread may be waiting to acquire
    pub fn has_queued_threads(&self) -> bool {
        !same(&self.head.load_full(), &self.tail.load_full())
    }

    /// Whether any thread has ever contended (the queue was initialized)
    pub fn has_contended(&self) -> bool {
        self.head.load().is_some()
    }

    /// Longest-waiting thread, if any
    pub fn first_queued_thread(&self) -> Option<ThreadToken> {
        if !self.has_queued_threads() {
            return None;
        }

        // Fast path: the head's successor, if its links look settled
        if let Some(head) = self.head.load_full() {
            if let Some(next) = head.next() {
                if ptr::eq(as_ptr(&next.prev()), Arc::as_ptr(&head)) {
                    if let Some(thread) = next.thread() {
                        return Some(thread);
                    }
                }
            }
        }

        let mut first = None;
        let mut cursor = self.tail.load_full();
        while let Some(node) = cursor {
            if self.head_is(&node) {
                break;
            }
            if let Some(thread) = node.thread() {
                first = Some(thread);
            }
            cursor = node.prev();
        }
        first
    }

    /// Whether `token`'s thread is currently queued
    pub fn is_queued(&self, token: &ThreadToken) -> bool {
        self.iter_from_tail()
            .any(|node| node.thread().is_some_and(|t| t == *token))
    }

    /// Whether some other thread has been waiting longer than the caller
    ///
    /// Fair primitives call this at the top of their acquire hook and fail the
    /// fast path when it returns `true`.
    pub fn has_queued_predecessors(&self) -> bool {
        // Read order matters: tail before head
        let tail = self.tail.load_full();
        let head = self.head.load_full();
        if same(&head, &tail) {
            return false;
        }
        let Some(head) = head else { return false };
        match head.next() {
            None => true,
            Some(next) => next
                .thread()
                .map_or(true, |thread| thread != ThreadToken::current()),
        }
    }

    /// Whether the first queued thread waits in exclusive mode
    pub fn apparently_first_queued_is_exclusive(&self) -> bool {
        self.head
            .load_full()
            .and_then(|head| head.next())
            .is_some_and(|next| !next.is_shared() && next.has_thread())
    }

    /// Estimate of the number of waiting threads
    pub fn queue_length(&self) -> usize {
        self.iter_from_tail().filter(|node| node.has_thread()).count()
    }

    /// Tokens of waiting threads, most recent first
    pub fn queued_threads(&self) -> Vec<ThreadToken> {
        self.collect_threads(|_| true)
    }

    pub fn exclusive_queued_threads(&self) -> Vec<ThreadToken> {
        self.collect_threads(|node| !node.is_shared())
    }

    pub fn shared_queued_threads(&self) -> Vec<ThreadToken> {
        self.collect_threads(Node::is_shared)
    }

    fn collect_threads(&self, filter: impl Fn(&Node) -> bool) -> Vec<ThreadToken> {
        self.iter_from_tail()
            .filter(|node| filter(node.as_ref()))
            .filter_map(|node| node.thread())
            .collect()
    }

    fn iter_from_tail(&self) -> impl Iterator<Item = Arc<Node>> {
        std::iter::successors(self.tail.load_full(), |node| node.prev())
    }
}

impl fmt::Display for SyncCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = if self.has_queued_threads() {
            "nonempty"
        } else {
            "empty"
        };
        write!(f, "[state = {}, {} queue]", self.state(), queue)
    }
}

impl fmt::Debug for SyncCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncCore")
            .field("state", &self.state())
            .field("owner", &self.exclusive_owner())
            .field("queue_length", &self.queue_length())
            .field("config", &self.config)
            .finish()
    }
}
