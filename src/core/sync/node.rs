/*!
 * Queue Nodes
 *
 * One node per blocked (or just-woken) thread. Nodes live on the sync queue,
 * on a condition list, or briefly on both while a signal transfers them.
 *
 * # Links
 *
 * - `prev` is authoritative: walking backward from the tail always reaches
 *   every live node
 * - `next` is a best-effort cache that may lag an enqueue
 * - `next_waiter` is used only on condition lists
 *
 * Links are reference counted. Unlinking clears whichever side could keep a
 * cycle alive, so a node is freed once no queue reaches it.
 */

use super::park::{ThreadToken, TokenState};
use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Wait status of a queue node
///
/// The numeric values matter: positive means cancelled, negative means the
/// node owes or expects a wake-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum WaitStatus {
    /// Timed out or interrupted; terminal
    Cancelled = 1,
    /// No pending action
    Neutral = 0,
    /// Successor is (or will be) parked and must be unparked on release
    Signal = -1,
    /// Waiting on a condition list
    Condition = -2,
    /// A shared release must propagate to the next acquirer
    Propagate = -3,
}

impl WaitStatus {
    #[inline(always)]
    pub const fn raw(self) -> i32 {
        self as i32
    }

    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            1 => WaitStatus::Cancelled,
            -1 => WaitStatus::Signal,
            -2 => WaitStatus::Condition,
            -3 => WaitStatus::Propagate,
            _ => WaitStatus::Neutral,
        }
    }

    #[inline(always)]
    pub const fn is_cancelled(self) -> bool {
        self.raw() > 0
    }

    /// Negative status: signal, condition or propagate
    #[inline(always)]
    pub const fn is_pending(self) -> bool {
        self.raw() < 0
    }
}

/// Acquisition mode of a queued node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Exclusive,
    Shared,
}

/// A sync-queue or condition-list entry
pub(crate) struct Node {
    status: AtomicI32,
    prev: ArcSwapOption<Node>,
    next: ArcSwapOption<Node>,
    thread: ArcSwapOption<TokenState>,
    next_waiter: ArcSwapOption<Node>,
    mode: Mode,
}

impl Node {
    fn with(mode: Mode, status: WaitStatus, token: Option<ThreadToken>) -> Arc<Self> {
        Arc::new(Self {
            status: AtomicI32::new(status.raw()),
            prev: ArcSwapOption::empty(),
            next: ArcSwapOption::empty(),
            thread: ArcSwapOption::new(token.map(|t| Arc::clone(t.state()))),
            next_waiter: ArcSwapOption::empty(),
            mode,
        })
    }

    /// Lazily created head with no owning thread
    pub(crate) fn sentinel() -> Arc<Self> {
        Self::with(Mode::Exclusive, WaitStatus::Neutral, None)
    }

    /// Sync-queue node for a thread that failed its fast path
    pub(crate) fn waiter(mode: Mode, token: ThreadToken) -> Arc<Self> {
        Self::with(mode, WaitStatus::Neutral, Some(token))
    }

    /// Condition-list node; condition waits are always exclusive
    pub(crate) fn condition(token: ThreadToken) -> Arc<Self> {
        Self::with(Mode::Exclusive, WaitStatus::Condition, Some(token))
    }

    #[inline]
    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub(crate) fn is_shared(&self) -> bool {
        self.mode == Mode::Shared
    }

    #[inline]
    pub(crate) fn status(&self) -> WaitStatus {
        WaitStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_status(&self, status: WaitStatus) {
        self.status.store(status.raw(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn cas_status(&self, current: WaitStatus, new: WaitStatus) -> bool {
        self.status
            .compare_exchange(current.raw(), new.raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub(crate) fn prev(&self) -> Option<Arc<Node>> {
        self.prev.load_full()
    }

    #[inline]
    pub(crate) fn set_prev(&self, prev: Option<Arc<Node>>) {
        self.prev.store(prev);
    }

    #[inline]
    pub(crate) fn has_prev(&self) -> bool {
        self.prev.load().is_some()
    }

    #[inline]
    pub(crate) fn next(&self) -> Option<Arc<Node>> {
        self.next.load_full()
    }

    #[inline]
    pub(crate) fn set_next(&self, next: Option<Arc<Node>>) {
        self.next.store(next);
    }

    #[inline]
    pub(crate) fn has_next(&self) -> bool {
        self.next.load().is_some()
    }

    #[inline]
    pub(crate) fn cas_next(&self, current: &Option<Arc<Node>>, new: Option<Arc<Node>>) -> bool {
        cas_link(&self.next, current, new)
    }

    pub(crate) fn thread(&self) -> Option<ThreadToken> {
        self.thread.load_full().map(ThreadToken::from_state)
    }

    #[inline]
    pub(crate) fn has_thread(&self) -> bool {
        self.thread.load().is_some()
    }

    #[inline]
    pub(crate) fn clear_thread(&self) {
        self.thread.store(None);
    }

    #[inline]
    pub(crate) fn next_waiter(&self) -> Option<Arc<Node>> {
        self.next_waiter.load_full()
    }

    #[inline]
    pub(crate) fn set_next_waiter(&self, next: Option<Arc<Node>>) {
        self.next_waiter.store(next);
    }

    #[inline]
    pub(crate) fn has_next_waiter(&self) -> bool {
        self.next_waiter.load().is_some()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("status", &self.status())
            .field("mode", &self.mode())
            .field("thread", &self.thread().map(|t| t.id()))
            .finish_non_exhaustive()
    }
}

#[inline(always)]
pub(crate) fn as_ptr(link: &Option<Arc<Node>>) -> *const Node {
    link.as_ref().map_or(ptr::null(), Arc::as_ptr)
}

/// Identity comparison of two optional links
#[inline(always)]
pub(crate) fn same(a: &Option<Arc<Node>>, b: &Option<Arc<Node>>) -> bool {
    ptr::eq(as_ptr(a), as_ptr(b))
}

/// Compare-and-swap on a link slot by node identity
pub(crate) fn cas_link(
    slot: &ArcSwapOption<Node>,
    current: &Option<Arc<Node>>,
    new: Option<Arc<Node>>,
) -> bool {
    let expected = as_ptr(current);
    let previous = slot.compare_and_swap(current, new);
    ptr::eq(as_ptr(&previous), expected)
}

/// Compare-and-swap on a link slot expected to hold `current`
pub(crate) fn cas_link_from(
    slot: &ArcSwapOption<Node>,
    current: &Arc<Node>,
    new: Option<Arc<Node>>,
) -> bool {
    let expected = Arc::as_ptr(current);
    let previous = slot.compare_and_swap(current, new);
    ptr::eq(as_ptr(&previous), expected)
}
