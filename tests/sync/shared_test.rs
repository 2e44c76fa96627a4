/*!
 * Shared Mode Tests
 * Propagation of shared releases along the queue
 */

use crate::common::{eventually, wait_until_queued, Latch, Semaphore};
use pretty_assertions::assert_eq;
use queued_sync::core::sync::QueuedSynchronizer;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
#[serial]
fn test_latch_wakes_every_shared_waiter() {
    const WAITERS: usize = 8;
    let latch = Arc::new(QueuedSynchronizer::new(Latch, 1));
    let passed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let (latch, passed) = (latch.clone(), passed.clone());
            thread::spawn(move || {
                latch.acquire_shared(1).unwrap();
                passed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    wait_until_queued(latch.core(), WAITERS);
    assert_eq!(passed.load(Ordering::SeqCst), 0);
    assert!(latch.release_shared(1).unwrap());

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(passed.load(Ordering::SeqCst), WAITERS);
    assert_eq!(latch.queue_length(), 0);
    assert!(latch.stats().shared_releases >= 1);
    // Already open: a further release is not a transition
    assert!(!latch.release_shared(1).unwrap());

    // Open latch: shared acquires no longer block
    latch.acquire_shared(1).unwrap();
    assert!(latch.try_acquire_shared_for(1, Duration::ZERO).unwrap());
}

#[test]
#[serial]
fn test_semaphore_wakes_only_acquirable_waiters() {
    let semaphore = Arc::new(QueuedSynchronizer::new(Semaphore, 0));
    let passed = Arc::new(AtomicUsize::new(0));

    // Waiters keep their permit, so only released permits let anyone through
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let (semaphore, passed) = (semaphore.clone(), passed.clone());
            thread::spawn(move || {
                semaphore.acquire_shared(1).unwrap();
                passed.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    wait_until_queued(semaphore.core(), 5);
    assert_eq!(semaphore.core().shared_queued_threads().len(), 5);
    assert!(!semaphore.core().apparently_first_queued_is_exclusive());

    semaphore.release_shared(2).unwrap();
    eventually("two permits taken", || passed.load(Ordering::SeqCst) == 2);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(passed.load(Ordering::SeqCst), 2);
    assert_eq!(semaphore.state(), 0);
    assert_eq!(semaphore.queue_length(), 3);

    semaphore.release_shared(3).unwrap();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(passed.load(Ordering::SeqCst), 5);
    assert_eq!(semaphore.state(), 0);
    assert_eq!(semaphore.queue_length(), 0);
}

#[test]
fn test_interruptible_shared_acquire() {
    let semaphore = Arc::new(QueuedSynchronizer::new(Semaphore, 0));

    let s = semaphore.clone();
    let (handle, token) =
        crate::common::spawn_with_token(move || s.acquire_shared_interruptibly(1));
    wait_until_queued(semaphore.core(), 1);
    token.interrupt();

    assert_eq!(handle.join().unwrap(), Err(queued_sync::SyncError::Interrupted));
    assert_eq!(semaphore.queue_length(), 0);

    // A permit released afterwards is still available
    semaphore.release_shared(1).unwrap();
    assert!(semaphore.try_acquire_shared_nanos(1, 1_000_000).unwrap());
}
