/*!
 * Condition Tests
 * Wait/signal symmetry and hand-off through the sync queue
 */

use crate::common::{acquire_with_waiters, spawn_with_token, Mutex, Reentrant};
use pretty_assertions::assert_eq;
use queued_sync::core::sync::{QueuedSynchronizer, ThreadToken};
use queued_sync::SyncError;
use serial_test::serial;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_signal_on_empty_condition_is_noop() {
    let mutex = Arc::new(QueuedSynchronizer::new(Mutex::barging(), 0));
    let condition = mutex.new_condition();

    mutex.acquire(1).unwrap();
    condition.signal().unwrap();
    condition.signal_all().unwrap();
    assert_eq!(mutex.has_waiters(&condition), Ok(false));
    assert_eq!(mutex.state(), 1);
    assert_eq!(mutex.queue_length(), 0);
    mutex.release(1).unwrap();
    assert_eq!(mutex.stats().signal_transfers, 0);
}

#[test]
fn test_wait_restores_hold_count() {
    let mutex = Arc::new(QueuedSynchronizer::new(Reentrant, 0));
    let condition = Arc::new(mutex.new_condition());

    let (m, c) = (mutex.clone(), condition.clone());
    let handle = thread::spawn(move || {
        for _ in 0..3 {
            m.acquire(1).unwrap();
        }
        c.wait().unwrap();
        let restored = m.state();
        for _ in 0..3 {
            m.release(1).unwrap();
        }
        restored
    });

    acquire_with_waiters(&mutex, &condition, 1);
    // The waiter gave up all three holds
    assert_eq!(mutex.state(), 1);
    condition.signal().unwrap();
    mutex.release(1).unwrap();

    assert_eq!(handle.join().unwrap(), 3);
    assert_eq!(mutex.state(), 0);
}

#[test]
#[serial]
fn test_signal_all_releases_everyone() {
    let mutex = Arc::new(QueuedSynchronizer::new(Mutex::barging(), 0));
    let condition = Arc::new(mutex.new_condition());

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let (m, c) = (mutex.clone(), condition.clone());
            thread::spawn(move || {
                m.acquire(1).unwrap();
                c.wait().unwrap();
                m.release(1).unwrap();
            })
        })
        .collect();

    acquire_with_waiters(&mutex, &condition, 5);
    assert_eq!(mutex.wait_queue_length(&condition), Ok(5));
    assert_eq!(mutex.waiting_threads(&condition).unwrap().len(), 5);
    condition.signal_all().unwrap();
    assert_eq!(mutex.has_waiters(&condition), Ok(false));
    mutex.release(1).unwrap();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(mutex.queue_length(), 0);
    assert_eq!(mutex.stats().signal_transfers, 5);
}

#[test]
#[serial]
fn test_single_slot_producer_consumer() {
    const ITEMS: u64 = 1_000;
    const EMPTY: i64 = -1;

    let mutex = Arc::new(QueuedSynchronizer::new(Mutex::barging(), 0));
    let not_empty = Arc::new(mutex.new_condition());
    let not_full = Arc::new(mutex.new_condition());
    let slot = Arc::new(AtomicI64::new(EMPTY));

    let producer = {
        let (m, not_empty, not_full, slot) =
            (mutex.clone(), not_empty.clone(), not_full.clone(), slot.clone());
        thread::spawn(move || {
            for item in 0..ITEMS {
                m.acquire(1).unwrap();
                while slot.load(Ordering::Relaxed) != EMPTY {
                    not_full.wait().unwrap();
                }
                slot.store(item as i64, Ordering::Relaxed);
                not_empty.signal().unwrap();
                m.release(1).unwrap();
            }
        })
    };

    let consumer = {
        let (m, not_empty, not_full, slot) =
            (mutex.clone(), not_empty.clone(), not_full.clone(), slot.clone());
        thread::spawn(move || {
            let sum = AtomicU64::new(0);
            for _ in 0..ITEMS {
                m.acquire(1).unwrap();
                let mut item = slot.load(Ordering::Relaxed);
                while item == EMPTY {
                    not_empty.wait().unwrap();
                    item = slot.load(Ordering::Relaxed);
                }
                slot.store(EMPTY, Ordering::Relaxed);
                sum.fetch_add(item as u64, Ordering::Relaxed);
                not_full.signal().unwrap();
                m.release(1).unwrap();
            }
            sum.into_inner()
        })
    };

    producer.join().unwrap();
    assert_eq!(consumer.join().unwrap(), ITEMS * (ITEMS - 1) / 2);
    assert_eq!(slot.load(Ordering::SeqCst), EMPTY);
    assert_eq!(mutex.state(), 0);
}

#[test]
fn test_signalled_waiter_keeps_late_interrupt() {
    let mutex = Arc::new(QueuedSynchronizer::new(Mutex::barging(), 0));
    let condition = Arc::new(mutex.new_condition());

    let (m, c) = (mutex.clone(), condition.clone());
    let (handle, token) = spawn_with_token(move || {
        m.acquire(1).unwrap();
        let result = c.wait();
        let interrupted = ThreadToken::current().take_interrupt();
        m.release(1).unwrap();
        (result, interrupted)
    });

    acquire_with_waiters(&mutex, &condition, 1);
    condition.signal().unwrap();
    // Signalled first, so the interrupt must not turn into an error
    token.interrupt();
    thread::sleep(Duration::from_millis(10));
    mutex.release(1).unwrap();

    let (result, interrupted) = handle.join().unwrap();
    assert_eq!(result, Ok(()));
    assert!(interrupted);
}

#[test]
fn test_wait_without_hold_is_rejected() {
    let mutex = Arc::new(QueuedSynchronizer::new(Mutex::barging(), 0));
    let condition = mutex.new_condition();

    assert!(matches!(condition.wait(), Err(SyncError::IllegalState(_))));
    assert!(matches!(
        condition.wait_for(Duration::from_millis(1)),
        Err(SyncError::IllegalState(_))
    ));

    let other = Arc::new(QueuedSynchronizer::new(Mutex::barging(), 0));
    other.acquire(1).unwrap();
    assert!(matches!(
        other.has_waiters(&condition),
        Err(SyncError::IllegalArgument(_))
    ));
    other.release(1).unwrap();
}
