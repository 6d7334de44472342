//! Self-scaling pool of reusable worker threads ("charges").

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{PoolError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Sizing and lifecycle knobs for a [`ChargePool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Resident charges; the pool never trims below this while alive.
    pub min_charges: usize,
    /// How long a charge blocks waiting for work before re-checking
    /// whether it was retired.
    pub idle_wait: Duration,
    /// Idle time after which a charge beyond `min_charges` may be swept.
    pub live_time: Duration,
    /// Idle time after which the whole pool is disposed.
    pub dead_time: Duration,
    /// How often the sweep thread wakes.
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_charges: 2,
            idle_wait: Duration::from_millis(500),
            live_time: Duration::from_secs(30),
            dead_time: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// A pool of worker threads that grows on demand and shrinks when idle.
///
/// The pool is built lazily on the first [`execute`](Self::execute) with
/// `min_charges` resident charges and a sweep thread. Each charge runs at
/// most one job at a time; a burst of calls with no idle charge grows the
/// pool by exactly the deficit. Once every charge has sat idle past
/// `dead_time` the whole pool winds down and is rebuilt on next use.
#[derive(Clone)]
pub struct ChargePool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    config: PoolConfig,
    state: Mutex<Option<PoolInner>>,
    next_generation: AtomicU64,
}

struct PoolInner {
    charges: Vec<Charge>,
    generation: u64,
}

struct Charge {
    sender: SyncSender<Job>,
    shared: Arc<ChargeShared>,
}

struct ChargeShared {
    busy: AtomicBool,
    retired: AtomicBool,
    last_used: Mutex<Instant>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Charge {
    fn spawn(config: &PoolConfig) -> Self {
        let (sender, receiver) = sync_channel::<Job>(1);
        let shared = Arc::new(ChargeShared {
            busy: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
        });

        let worker = Arc::clone(&shared);
        let idle_wait = config.idle_wait;
        thread::spawn(move || {
            trace!("charge started");
            loop {
                match receiver.recv_timeout(idle_wait) {
                    Ok(job) => {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            warn!("job panicked on charge thread");
                        }
                        *lock(&worker.last_used) = Instant::now();
                        worker.busy.store(false, Ordering::Release);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if worker.retired.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            trace!("charge stopped");
        });

        Self { sender, shared }
    }

    /// Claim an idle charge for one job. Fails if busy or retired.
    fn try_claim(&self) -> bool {
        !self.shared.retired.load(Ordering::Acquire)
            && self
                .shared
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    fn claim(&self) {
        self.shared.busy.store(true, Ordering::Release);
    }

    fn retire(&self) {
        self.shared.retired.store(true, Ordering::Release);
    }

    fn is_retired(&self) -> bool {
        self.shared.retired.load(Ordering::Acquire)
    }

    /// Idle duration as of `now`, or `None` while busy.
    fn idle_for(&self, now: Instant) -> Option<Duration> {
        if self.shared.busy.load(Ordering::Acquire) {
            return None;
        }
        let last = *lock(&self.shared.last_used);
        Some(now.saturating_duration_since(last))
    }
}

impl ChargePool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(None),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Run `job` on an idle charge, growing the pool by one if none is
    /// free. Builds the pool on first use.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut job: Job = Box::new(job);
        let mut state = lock(&self.shared.state);
        let inner = state.get_or_insert_with(|| build_pool(&self.shared));

        for charge in &inner.charges {
            if !charge.try_claim() {
                continue;
            }
            match charge.sender.try_send(job) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(returned)) | Err(TrySendError::Disconnected(returned)) => {
                    // The worker went away under us; drop the charge and
                    // keep looking.
                    charge.retire();
                    job = returned;
                }
            }
        }

        let charge = Charge::spawn(&self.shared.config);
        charge.claim();
        let handed = charge.sender.send(job).map_err(|_| PoolError::ChargeGone);
        inner.charges.push(charge);
        trace!(charges = inner.charges.len(), "pool grew by one charge");
        handed
    }

    /// Number of charges currently resident (0 after disposal).
    pub fn charge_count(&self) -> usize {
        lock(&self.shared.state)
            .as_ref()
            .map_or(0, |inner| inner.charges.len())
    }

    /// Number of charges not currently running a job.
    pub fn idle_count(&self) -> usize {
        let now = Instant::now();
        lock(&self.shared.state).as_ref().map_or(0, |inner| {
            inner
                .charges
                .iter()
                .filter(|c| c.idle_for(now).is_some())
                .count()
        })
    }

    /// Whether a pool instance currently exists.
    pub fn is_alive(&self) -> bool {
        lock(&self.shared.state).is_some()
    }

    /// Dispose the pool immediately; it is rebuilt on the next `execute`.
    pub fn shutdown(&self) {
        let mut state = lock(&self.shared.state);
        if state.take().is_some() {
            debug!("worker pool shut down");
        }
    }
}

fn build_pool(shared: &Arc<PoolShared>) -> PoolInner {
    let generation = shared.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
    let charges = (0..shared.config.min_charges)
        .map(|_| Charge::spawn(&shared.config))
        .collect();
    spawn_sweeper(Arc::clone(shared), generation);
    debug!(
        generation,
        min_charges = shared.config.min_charges,
        "worker pool created"
    );
    PoolInner {
        charges,
        generation,
    }
}

fn spawn_sweeper(shared: Arc<PoolShared>, generation: u64) {
    thread::spawn(move || loop {
        thread::sleep(shared.config.sweep_interval);

        let mut state = lock(&shared.state);
        let inner = match state.as_mut() {
            Some(inner) if inner.generation == generation => inner,
            _ => return,
        };

        inner.charges.retain(|c| !c.is_retired());

        let now = Instant::now();
        let all_expired = !inner.charges.is_empty()
            && inner
                .charges
                .iter()
                .all(|c| c.idle_for(now).is_some_and(|d| d > shared.config.dead_time));
        if all_expired {
            debug!(
                generation,
                charges = inner.charges.len(),
                "pool idle past dead time, disposing"
            );
            for charge in &inner.charges {
                charge.retire();
            }
            *state = None;
            return;
        }

        let excess = inner
            .charges
            .len()
            .saturating_sub(shared.config.min_charges);
        if excess == 0 {
            continue;
        }
        // Trim at most ~30% of the excess per sweep so a short lull does
        // not flush a warm pool.
        let quota = (excess * 3 + 9) / 10;
        let mut removed = 0usize;
        inner.charges.retain(|c| {
            if removed >= quota {
                return true;
            }
            if c.idle_for(now).is_some_and(|d| d > shared.config.live_time) {
                c.retire();
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(removed, remaining = inner.charges.len(), "swept idle charges");
        }
    });
}
