/*!
 * Cancellation Tests
 * Timeouts and interrupts must leave the queue usable
 */

use crate::common::{spawn_with_token, wait_until_queued, Mutex};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use queued_sync::core::sync::{QueuedSynchronizer, SyncConfig, SyncStatsSnapshot};
use queued_sync::SyncError;
use serial_test::serial;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn cycles_complete(mutex: &Arc<QueuedSynchronizer<Mutex>>, threads: usize, cycles: u64) -> u64 {
    let counter = Arc::new(AtomicU64::new(0));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let (mutex, counter) = (mutex.clone(), counter.clone());
            thread::spawn(move || {
                for _ in 0..cycles {
                    mutex.acquire(1).unwrap();
                    counter.fetch_add(1, Ordering::Relaxed);
                    mutex.release(1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    counter.load(Ordering::SeqCst)
}

#[test]
#[serial]
fn test_interrupted_waiters_do_not_block_others() {
    let mutex = Arc::new(QueuedSynchronizer::new(Mutex::barging(), 0));
    mutex.acquire(1).unwrap();

    let mut waiters = Vec::new();
    for i in 0..6 {
        let m = mutex.clone();
        let (handle, token) = spawn_with_token(move || {
            let result = m.acquire_interruptibly(1);
            if result.is_ok() {
                m.release(1).unwrap();
            }
            result
        });
        wait_until_queued(mutex.core(), i + 1);
        waiters.push((handle, token));
    }

    // Let every waiter park, then interrupt every other one while the lock is held
    thread::sleep(Duration::from_millis(20));
    for (_, token) in waiters.iter().step_by(2) {
        token.interrupt();
    }
    mutex.release(1).unwrap();

    for (i, (handle, _)) in waiters.into_iter().enumerate() {
        let result = handle.join().unwrap();
        if i % 2 == 0 {
            assert_eq!(result, Err(SyncError::Interrupted));
        } else {
            assert_eq!(result, Ok(()));
        }
    }

    assert_eq!(mutex.queue_length(), 0);
    assert_eq!(cycles_complete(&mutex, 2, 1_000), 2_000);
    assert!(mutex.stats().interrupts >= 3);
}

#[test]
#[serial]
fn test_timed_out_waiters_do_not_block_others() {
    let mutex = Arc::new(QueuedSynchronizer::with_config(
        Mutex::barging(),
        0,
        SyncConfig::long_wait(),
    ));
    mutex.acquire(1).unwrap();

    let timed: Vec<_> = (0..4)
        .map(|i| {
            let m = mutex.clone();
            thread::spawn(move || m.try_acquire_for(1, Duration::from_millis(5 + 5 * i)))
        })
        .collect();
    for handle in timed {
        assert_eq!(handle.join().unwrap(), Ok(false));
    }
    assert_eq!(mutex.queue_length(), 0);
    assert_eq!(mutex.stats().timeouts, 4);

    mutex.release(1).unwrap();
    assert_eq!(cycles_complete(&mutex, 4, 1_000), 4_000);
    assert_eq!(mutex.state(), 0);
}

#[test]
fn test_stats_can_be_disabled() {
    let mutex = Arc::new(QueuedSynchronizer::with_config(
        Mutex::barging(),
        0,
        SyncConfig::low_latency(),
    ));
    mutex.acquire(1).unwrap();
    let m = mutex.clone();
    let timed_out = thread::spawn(move || m.try_acquire_for(1, Duration::from_millis(2)))
        .join()
        .unwrap();
    assert_eq!(timed_out, Ok(false));
    mutex.release(1).unwrap();

    assert_eq!(mutex.stats(), SyncStatsSnapshot::default());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    #[serial]
    fn prop_random_timeouts_leave_queue_clean(
        timeouts_us in prop::collection::vec(0u64..3_000, 1..6),
        hold_us in 0u64..4_000,
    ) {
        let mutex = Arc::new(QueuedSynchronizer::new(Mutex::barging(), 0));
        mutex.acquire(1).unwrap();

        let handles: Vec<_> = timeouts_us
            .iter()
            .map(|&timeout| {
                let m = mutex.clone();
                thread::spawn(move || {
                    let acquired = m.try_acquire_for(1, Duration::from_micros(timeout)).unwrap();
                    if acquired {
                        m.release(1).unwrap();
                    }
                    acquired
                })
            })
            .collect();

        thread::sleep(Duration::from_micros(hold_us));
        mutex.release(1).unwrap();

        for handle in handles {
            handle.join().unwrap();
        }

        prop_assert_eq!(mutex.state(), 0);
        prop_assert_eq!(mutex.queue_length(), 0);
        prop_assert_eq!(cycles_complete(&mutex, 2, 200), 400);
    }
}
