/*!
 * Sync Stress - Main Entry Point
 *
 * Hammers a queued synchronizer from several threads and checks that no
 * update was lost. Configured through the environment:
 * - SYNC_STRESS_THREADS: worker threads (default: 4)
 * - SYNC_STRESS_ITERATIONS: acquire/release cycles per thread (default: 10000)
 * - SYNC_STRESS_MODE: `mutex`, `fair` or `shared` (default: mutex)
 */

use miette::{bail, miette, IntoDiagnostic, Result};
use queued_sync::{
    init_tracing, span_operation, ExclusiveHooks, QueuedSynchronizer, SharedHooks, SyncCore,
    SyncResult, SyncStatsSnapshot, ThreadToken,
};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum StressMode {
    Mutex,
    Fair,
    Shared,
}

impl FromStr for StressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mutex" => Ok(StressMode::Mutex),
            "fair" => Ok(StressMode::Fair),
            "shared" => Ok(StressMode::Shared),
            other => Err(format!("unknown stress mode `{}`", other)),
        }
    }
}

impl fmt::Display for StressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StressMode::Mutex => "mutex",
            StressMode::Fair => "fair",
            StressMode::Shared => "shared",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
struct StressConfig {
    threads: usize,
    iterations: u64,
    mode: StressMode,
}

impl StressConfig {
    fn from_env() -> Result<Self> {
        let config = Self {
            threads: env_or("SYNC_STRESS_THREADS", 4)?,
            iterations: env_or("SYNC_STRESS_ITERATIONS", 10_000)?,
            mode: env_or("SYNC_STRESS_MODE", StressMode::Mutex)?,
        };
        if config.threads == 0 {
            bail!("SYNC_STRESS_THREADS must be at least 1");
        }
        Ok(config)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| miette!("invalid {}={:?}: {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

/// CAS binary mutex, optionally refusing to barge past queued threads
struct BinaryMutex {
    fair: bool,
}

impl ExclusiveHooks for BinaryMutex {
    fn try_acquire(&self, sync: &SyncCore, _arg: i64) -> SyncResult<bool> {
        if self.fair && sync.has_queued_predecessors() {
            return Ok(false);
        }
        if sync.compare_and_set_state(0, 1) {
            sync.set_exclusive_owner(Some(&ThreadToken::current()));
            return Ok(true);
        }
        Ok(false)
    }

    fn try_release(&self, sync: &SyncCore, _arg: i64) -> SyncResult<bool> {
        sync.set_exclusive_owner(None);
        sync.set_state(0);
        Ok(true)
    }

    fn is_held_exclusively(&self, sync: &SyncCore) -> SyncResult<bool> {
        Ok(sync.state() == 1 && sync.is_owned_by(&ThreadToken::current()))
    }
}

/// Counting semaphore over the state word
struct Permits;

impl SharedHooks for Permits {
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

#[derive(Debug, Serialize)]
struct StressReport {
    mode: StressMode,
    threads: usize,
    iterations: u64,
    expected: u64,
    counter: u64,
    final_state: i64,
    /// Highest number of simultaneous holders observed
    max_holders: i64,
    elapsed_ms: u128,
    stats: SyncStatsSnapshot,
}

fn run_exclusive(config: StressConfig) -> Result<StressReport> {
    let mutex = Arc::new(QueuedSynchronizer::new(
        BinaryMutex {
            fair: config.mode == StressMode::Fair,
        },
        0,
    ));
    let counter = Arc::new(AtomicU64::new(0));
    let holders = Arc::new(AtomicI64::new(0));
    let max_holders = Arc::new(AtomicI64::new(0));
    let start = Instant::now();

    let workers: Vec<_> = (0..config.threads)
        .map(|_| {
            let (mutex, counter) = (mutex.clone(), counter.clone());
            let (holders, max_holders) = (holders.clone(), max_holders.clone());
            thread::spawn(move || -> SyncResult<()> {
                for _ in 0..config.iterations {
                    mutex.acquire(1)?;
                    let inside = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_holders.fetch_max(inside, Ordering::SeqCst);
                    // Unsynchronized read-modify-write: only exclusion keeps it exact
                    let value = counter.load(Ordering::Relaxed);
                    counter.store(value + 1, Ordering::Relaxed);
                    holders.fetch_sub(1, Ordering::SeqCst);
                    mutex.release(1)?;
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        worker
            .join()
            .map_err(|_| miette!("stress worker panicked"))??;
    }

    Ok(StressReport {
        mode: config.mode,
        threads: config.threads,
        iterations: config.iterations,
        expected: config.threads as u64 * config.iterations,
        counter: counter.load(Ordering::SeqCst),
        final_state: mutex.state(),
        max_holders: max_holders.load(Ordering::SeqCst),
        elapsed_ms: start.elapsed().as_millis(),
        stats: mutex.stats(),
    })
}

fn run_shared(config: StressConfig) -> Result<(StressReport, i64)> {
    let permits = i64::try_from((config.threads / 2).max(1)).into_diagnostic()?;
    let semaphore = Arc::new(QueuedSynchronizer::new(Permits, permits));
    let counter = Arc::new(AtomicU64::new(0));
    let holders = Arc::new(AtomicI64::new(0));
    let max_holders = Arc::new(AtomicI64::new(0));
    let start = Instant::now();

    let workers: Vec<_> = (0..config.threads)
        .map(|_| {
            let (semaphore, counter) = (semaphore.clone(), counter.clone());
            let (holders, max_holders) = (holders.clone(), max_holders.clone());
            thread::spawn(move || -> SyncResult<()> {
                for _ in 0..config.iterations {
                    semaphore.acquire_shared(1)?;
                    let inside = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_holders.fetch_max(inside, Ordering::SeqCst);
                    counter.fetch_add(1, Ordering::Relaxed);
                    holders.fetch_sub(1, Ordering::SeqCst);
                    semaphore.release_shared(1)?;
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        worker
            .join()
            .map_err(|_| miette!("stress worker panicked"))??;
    }

    let report = StressReport {
        mode: config.mode,
        threads: config.threads,
        iterations: config.iterations,
        expected: config.threads as u64 * config.iterations,
        counter: counter.load(Ordering::SeqCst),
        final_state: semaphore.state(),
        max_holders: max_holders.load(Ordering::SeqCst),
        elapsed_ms: start.elapsed().as_millis(),
        stats: semaphore.stats(),
    };
    Ok((report, permits))
}

fn main() -> Result<()> {
    init_tracing();

    let config = StressConfig::from_env()?;
    info!(
        threads = config.threads,
        iterations = config.iterations,
        mode = %config.mode,
        "sync stress starting"
    );

    let span = span_operation("sync_stress");
    let (report, holder_limit, idle_state) = match config.mode {
        StressMode::Mutex | StressMode::Fair => (run_exclusive(config)?, 1, 0),
        StressMode::Shared => {
            let (report, permits) = run_shared(config)?;
            (report, permits, permits)
        }
    };
    span.record_items_processed(report.counter);

    let ok = report.counter == report.expected
        && report.final_state == idle_state
        && report.max_holders <= holder_limit;
    span.record_result(ok);
    drop(span);

    println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);

    if !ok {
        warn!(?report, "sync stress detected a violation");
        bail!(
            "expected counter {} and state {}, got counter {} and state {} (max holders {})",
            report.expected,
            idle_state,
            report.counter,
            report.final_state,
            report.max_holders
        );
    }

    info!(elapsed_ms = report.elapsed_ms as u64, "sync stress passed");
    Ok(())
}
