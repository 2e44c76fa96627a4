/*!
 * Test Hooks
 * Minimal primitives and thread helpers shared by the unit tests
 */

use super::park::ThreadToken;
use super::queue::SyncCore;
use super::traits::{ExclusiveHooks, SharedHooks};
use crate::core::errors::{SyncError, SyncResult};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Non-reentrant mutex: 0 unlocked, 1 locked
pub(crate) struct MutexHooks;

impl ExclusiveHooks for MutexHooks {
    fn try_acquire(&self, sync: &SyncCore, _arg: i64) -> SyncResult<bool> {
        if sync.compare_and_set_state(0, 1) {
            sync.set_exclusive_owner(Some(&ThreadToken::current()));
            return Ok(true);
        }
        Ok(false)
    }

    fn try_release(&self, sync: &SyncCore, _arg: i64) -> SyncResult<bool> {
        if sync.state() == 0 || !sync.is_owned_by(&ThreadToken::current()) {
            return Err(SyncError::IllegalState("mutex not held by caller"));
        }
        sync.set_exclusive_owner(None);
        sync.set_state(0);
        Ok(true)
    }

    fn is_held_exclusively(&self, sync: &SyncCore) -> SyncResult<bool> {
        Ok(sync.state() != 0 && sync.is_owned_by(&ThreadToken::current()))
    }
}

/// Reentrant mutex: state is the hold count
pub(crate) struct ReentrantHooks;

impl ExclusiveHooks for ReentrantHooks {
    fn try_acquire(&self, sync: &SyncCore, arg: i64) -> SyncResult<bool> {
        let me = ThreadToken::current();
        let held = sync.state();
        if held == 0 {
            if sync.compare_and_set_state(0, arg) {
                sync.set_exclusive_owner(Some(&me));
                return Ok(true);
            }
        } else if sync.is_owned_by(&me) {
            sync.set_state(held + arg);
            return Ok(true);
        }
        Ok(false)
    }

    fn try_release(&self, sync: &SyncCore, arg: i64) -> SyncResult<bool> {
        if !sync.is_owned_by(&ThreadToken::current()) {
            return Err(SyncError::IllegalState("mutex not held by caller"));
        }
        let remaining = sync.state() - arg;
        if remaining == 0 {
            sync.set_exclusive_owner(None);
        }
        sync.set_state(remaining);
        Ok(remaining == 0)
    }

    fn is_held_exclusively(&self, sync: &SyncCore) -> SyncResult<bool> {
        Ok(sync.is_owned_by(&ThreadToken::current()))
    }
}

/// Counting semaphore: state is the number of free permits
pub(crate) struct PermitHooks;

impl SharedHooks for PermitHooks {
    fn try_acquire_shared(&self, sync: &SyncCore, arg: i64) -> SyncResult<i64> {
        loop {
            let available = sync.state();
            let remaining = available - arg;
            if remaining < 0 || sync.compare_and_set_state(available, remaining) {
                return Ok(remaining);
            }
        }
    }

    fn try_release_shared(&self, sync: &SyncCore, arg: i64) -> SyncResult<bool> {
        loop {
            let current = sync.state();
            if sync.compare_and_set_state(current, current + arg) {
                return Ok(true);
            }
        }
    }
}

/// Spawn a thread and hand back its token
pub(crate) fn spawn_with_token<F, T>(f: F) -> (JoinHandle<T>, ThreadToken)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        tx.send(ThreadToken::current()).unwrap();
        f()
    });
    (handle, rx.recv().unwrap())
}

/// Block until at least `n` threads are queued on `core`
pub(crate) fn wait_until_queued(core: &SyncCore, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while core.queue_length() < n {
        assert!(Instant::now() < deadline, "timed out waiting for {n} queued threads");
        thread::sleep(Duration::from_millis(1));
    }
}
