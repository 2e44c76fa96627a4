/*!
 * Thread Parking
 *
 * Permit-based per-thread suspend/resume built on parking_lot_core.
 *
 * # Design
 *
 * Every thread owns one `ThreadToken`. The token is the only handle needed to
 * wake that thread, so it is handed explicitly to whoever may wake it (a queue
 * node, a test harness) instead of being looked up by thread identity.
 *
 * - At most one permit: `unpark` before `park` is never lost
 * - `park` may return spuriously; callers re-check their condition
 * - `interrupt` sets a sticky flag and releases the permit
 */

use parking_lot_core::{park, unpark_one, ParkResult, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// No permit available and nobody parked
const EMPTY: u8 = 0;
/// Owner is (about to be) blocked in parking_lot_core
const PARKED: u8 = 1;
/// Permit available
const NOTIFIED: u8 = 2;

/// Token ids start at 1 so 0 can mean "no owner"
static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadToken = ThreadToken::for_current_thread();
}

/// Shared parking state behind a token
#[repr(C, align(64))] // Cache-line aligned, it is the parking address
pub(crate) struct TokenState {
    permit: AtomicU8,
    interrupted: AtomicBool,
    id: u64,
    name: Option<String>,
}

/// Handle used to park, unpark and interrupt one thread
///
/// Cloning is cheap and every clone refers to the same thread.
#[derive(Clone)]
pub struct ThreadToken {
    state: Arc<TokenState>,
}

impl ThreadToken {
    /// Token of the calling thread
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    fn for_current_thread() -> Self {
        Self {
            state: Arc::new(TokenState {
                permit: AtomicU8::new(EMPTY),
                interrupted: AtomicBool::new(false),
                id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
                name: thread::current().name().map(str::to_owned),
            }),
        }
    }

    pub(crate) fn from_state(state: Arc<TokenState>) -> Self {
        Self { state }
    }

    pub(crate) fn state(&self) -> &Arc<TokenState> {
        &self.state
    }

    /// Process-unique id of the owning thread (never 0)
    #[inline]
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Name of the owning thread when the token was created
    pub fn name(&self) -> Option<&str> {
        self.state.name.as_deref()
    }

    /// Stable parking address (same as in unpark)
    #[inline]
    fn addr(&self) -> usize {
        &self.state.permit as *const AtomicU8 as usize
    }

    /// Block until a permit is available or the thread is interrupted
    ///
    /// Must only be called by the owning thread.
    pub fn park(&self) {
        self.park_deadline(None);
    }

    /// Block for at most `timeout`
    pub fn park_timeout(&self, timeout: Duration) {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.park_deadline(Some(deadline)),
            None => self.park_deadline(None),
        }
    }

    /// Block for at most `nanos` nanoseconds; zero returns immediately
    pub fn park_nanos(&self, nanos: u64) {
        if nanos > 0 {
            self.park_timeout(Duration::from_nanos(nanos));
        }
    }

    /// Block until `deadline` at the latest
    pub fn park_until(&self, deadline: Instant) {
        self.park_deadline(Some(deadline));
    }

    fn park_deadline(&self, deadline: Option<Instant>) {
        debug_assert!(
            CURRENT.with(|current| current.id() == self.id()),
            "park called from a thread that does not own the token"
        );

        let permit = &self.state.permit;

        // Fast path: consume a pending permit
        if permit
            .compare_exchange(NOTIFIED, EMPTY, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            return;
        }
        if self.is_interrupted() {
            return;
        }
        if permit
            .compare_exchange(EMPTY, PARKED, Ordering::Acquire, Ordering::Acquire)
            .is_err()
        {
            // Only unpark can have changed EMPTY, so the permit is ours
            permit.swap(EMPTY, Ordering::Acquire);
            return;
        }

        loop {
            // Validate runs under the bucket lock, serialized with unpark_one
            let result = unsafe {
                park(
                    self.addr(),
                    || permit.load(Ordering::Acquire) == PARKED,
                    || {},
                    |_, _| {},
                    DEFAULT_PARK_TOKEN,
                    deadline,
                )
            };

            if permit
                .compare_exchange(NOTIFIED, EMPTY, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }

            if let ParkResult::TimedOut = result {
                permit.swap(EMPTY, Ordering::Acquire);
                return;
            }
        }
    }

    /// Make a permit available, waking the owner if it is parked
    pub fn unpark(&self) {
        if self.state.permit.swap(NOTIFIED, Ordering::Release) == PARKED {
            unsafe {
                unpark_one(self.addr(), |_| DEFAULT_UNPARK_TOKEN);
            }
        }
    }

    /// Set the interrupt flag and wake the owner
    pub fn interrupt(&self) {
        self.state.interrupted.store(true, Ordering::Release);
        self.unpark();
    }

    /// Check the interrupt flag without clearing it
    #[inline]
    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::Acquire)
    }

    /// Test and clear the interrupt flag
    #[inline]
    pub fn take_interrupt(&self) -> bool {
        self.is_interrupted() && self.state.interrupted.swap(false, Ordering::AcqRel)
    }
}

impl PartialEq for ThreadToken {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ThreadToken {}

impl fmt::Debug for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadToken")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}
