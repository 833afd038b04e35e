//! Bounded pool of renderer processes.
//!
//! Requests borrow a process through [`RendererPool::acquire`] and hand it
//! back with [`RendererPool::release`] (healthy) or [`RendererPool::destroy`]
//! (broken). When every process is busy and the pool is at `max`, callers
//! queue in arrival order; a released process goes straight to the oldest
//! waiter.

mod lease;
#[cfg(test)]
mod tests;

pub use lease::Lease;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};

use crate::browser::{BrowserResult, RendererFactory, RendererProcess};
use crate::error::{PrintdError, Result};

pub const DEFAULT_MIN: usize = 1;
pub const DEFAULT_MAX: usize = 4;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_WAITING_CLIENTS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Processes kept warm when `eager` is set.
    pub min: usize,
    /// Hard cap on idle + leased + starting processes.
    pub max: usize,
    /// How long a queued request waits; `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
    pub max_waiting_clients: usize,
    /// Launch `min` processes during [`RendererPool::init`].
    pub eager: bool,
    /// Probe idle processes for liveness before handing them out.
    pub validate_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN,
            max: DEFAULT_MAX,
            acquire_timeout: Some(DEFAULT_ACQUIRE_TIMEOUT),
            max_waiting_clients: DEFAULT_MAX_WAITING_CLIENTS,
            eager: true,
            validate_on_borrow: false,
        }
    }
}

/// Point-in-time counters, reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub idle: usize,
    pub leased: usize,
    pub pending: usize,
    pub waiting: usize,
    pub max: usize,
    pub draining: bool,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Draining,
    Closed,
}

struct Slot {
    id: u64,
    process: Arc<dyn RendererProcess>,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Result<Lease>>,
}

/// Who receives a process once its launch completes.
enum Delivery {
    /// The acquirer that reserved the capacity.
    Direct(oneshot::Sender<Result<Lease>>),
    /// Whoever is at the head of the queue, else the idle set.
    Queue,
}

struct PoolState {
    phase: Phase,
    initialized: bool,
    idle: VecDeque<Slot>,
    leased: HashMap<u64, Arc<dyn RendererProcess>>,
    /// Launches in flight, all kinds.
    pending: usize,
    /// Launches in flight whose result goes to the queue.
    pending_queue: usize,
    waiters: VecDeque<Waiter>,
    next_id: u64,
}

impl PoolState {
    fn total(&self) -> usize {
        self.idle.len() + self.leased.len() + self.pending
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn RendererFactory>,
    state: Mutex<PoolState>,
    changed: Notify,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn return_process(self: &Arc<Self>, id: u64, process: Arc<dyn RendererProcess>) {
        let mut state = self.lock();
        if state.leased.remove(&id).is_none() {
            warn!(renderer = id, "release of unknown renderer ignored");
            return;
        }
        self.hand_off(&mut state, Slot { id, process });
        drop(state);
        self.changed.notify_waiters();
    }

    /// Gives `slot` to the oldest live waiter, or parks it as idle.
    fn hand_off(self: &Arc<Self>, state: &mut PoolState, slot: Slot) {
        while let Some(Waiter { id: waiter, tx }) = state.waiters.pop_front() {
            state.leased.insert(slot.id, Arc::clone(&slot.process));
            let lease = Lease::new(slot.id, Arc::clone(&slot.process), Arc::clone(self));
            match tx.send(Ok(lease)) {
                Ok(()) => {
                    debug!(renderer = slot.id, waiter, "handed renderer to queued request");
                    return;
                }
                Err(returned) => {
                    state.leased.remove(&slot.id);
                    if let Ok(lease) = returned {
                        lease.disarm();
                    }
                }
            }
        }
        state.idle.push_back(slot);
    }

    fn start_creation(self: &Arc<Self>, delivery: Delivery) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let launched = inner.factory.launch().await;
            inner.finish_creation(launched, delivery);
        });
    }

    fn finish_creation(
        self: &Arc<Self>,
        launched: BrowserResult<Box<dyn RendererProcess>>,
        delivery: Delivery,
    ) {
        let mut state = self.lock();
        state.pending -= 1;
        if matches!(delivery, Delivery::Queue) {
            state.pending_queue -= 1;
        }

        let process: Arc<dyn RendererProcess> = match launched {
            Ok(process) => Arc::from(process),
            Err(err) => {
                warn!(error = %err, "renderer launch failed");
                let failed = match delivery {
                    Delivery::Direct(tx) => Some(tx),
                    Delivery::Queue => state.waiters.pop_front().map(|w| w.tx),
                };
                self.refill(&mut state, false);
                drop(state);
                self.changed.notify_waiters();
                if let Some(tx) = failed {
                    let _ = tx.send(Err(PrintdError::CreateFailed(err.to_string())));
                }
                return;
            }
        };

        let id = state.next_id();
        if state.phase == Phase::Closed {
            drop(state);
            self.changed.notify_waiters();
            debug!(renderer = id, "pool closed during launch; shutting renderer down");
            tokio::spawn(async move { process.shutdown().await });
            if let Delivery::Direct(tx) = delivery {
                let _ = tx.send(Err(PrintdError::PoolClosed));
            }
            return;
        }

        debug!(renderer = id, "renderer started");
        match delivery {
            Delivery::Direct(tx) => {
                state.leased.insert(id, Arc::clone(&process));
                drop(state);
                self.changed.notify_waiters();
                // An abandoned acquirer drops the lease, which parks the process.
                let _ = tx.send(Ok(Lease::new(id, process, Arc::clone(self))));
            }
            Delivery::Queue => {
                self.hand_off(&mut state, Slot { id, process });
                drop(state);
                self.changed.notify_waiters();
            }
        }
    }

    /// Starts launches for uncovered waiters and, when `warm`, tops up to `min`.
    fn refill(self: &Arc<Self>, state: &mut PoolState, warm: bool) {
        if state.phase != Phase::Running {
            return;
        }
        while state.total() < self.config.max && state.waiters.len() > state.pending_queue {
            state.pending += 1;
            state.pending_queue += 1;
            self.start_creation(Delivery::Queue);
        }
        if warm && self.config.eager {
            while state.total() < self.config.min.min(self.config.max) {
                state.pending += 1;
                state.pending_queue += 1;
                self.start_creation(Delivery::Queue);
            }
        }
    }

    fn remove_waiter(&self, id: u64) -> bool {
        let mut state = self.lock();
        match state.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                state.waiters.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Removes a queued request when its acquire future goes away.
struct QueueGuard<'a> {
    inner: &'a PoolInner,
    id: u64,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.inner.remove_waiter(self.id);
    }
}

enum Plan {
    Ready(Lease),
    Launching(oneshot::Receiver<Result<Lease>>),
    Queued(u64, oneshot::Receiver<Result<Lease>>),
}

/// Shared handle to the pool. Clones refer to the same processes.
#[derive(Clone)]
pub struct RendererPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for RendererPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererPool")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl RendererPool {
    pub fn new(config: PoolConfig, factory: Arc<dyn RendererFactory>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState {
                    phase: Phase::Running,
                    initialized: false,
                    idle: VecDeque::new(),
                    leased: HashMap::new(),
                    pending: 0,
                    pending_queue: 0,
                    waiters: VecDeque::new(),
                    next_id: 0,
                }),
                changed: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Launches the warm set when `eager` is configured. Calling it again is a
    /// no-op. Any launch failure is returned so startup can abort.
    pub async fn init(&self) -> Result<()> {
        {
            let mut state = self.inner.lock();
            if state.phase != Phase::Running {
                return Err(PrintdError::PoolClosed);
            }
            if state.initialized {
                return Ok(());
            }
            state.initialized = true;
        }

        let config = &self.inner.config;
        let target = config.min.min(config.max);
        if !config.eager || target == 0 {
            info!(max = config.max, "renderer pool ready; renderers start on demand");
            return Ok(());
        }

        let mut warmed = Vec::with_capacity(target);
        for _ in 0..target {
            let rx = {
                let mut state = self.inner.lock();
                if state.total() >= config.max {
                    break;
                }
                state.pending += 1;
                let (tx, rx) = oneshot::channel();
                self.inner.start_creation(Delivery::Direct(tx));
                rx
            };
            let launched = rx.await.unwrap_or_else(|_| {
                Err(PrintdError::CreateFailed("renderer launch was aborted".into()))
            });
            match launched {
                Ok(lease) => warmed.push(lease),
                Err(err) => {
                    self.inner.lock().initialized = false;
                    for lease in warmed {
                        self.release(lease);
                    }
                    return Err(err);
                }
            }
        }

        let count = warmed.len();
        for lease in warmed {
            self.release(lease);
        }
        info!(renderers = count, max = config.max, "renderer pool warmed");
        Ok(())
    }

    /// Borrows a process: an idle one if available, a new one if below `max`,
    /// otherwise a place in the queue.
    pub async fn acquire(&self) -> Result<Lease> {
        let mut stale = Vec::new();
        let plan = {
            let mut state = self.inner.lock();
            self.plan_acquire(&mut state, &mut stale)
        };
        for process in stale {
            tokio::spawn(async move { process.shutdown().await });
        }

        match plan? {
            Plan::Ready(lease) => Ok(lease),
            Plan::Launching(rx) => rx.await.unwrap_or_else(|_| {
                Err(PrintdError::CreateFailed("renderer launch was aborted".into()))
            }),
            Plan::Queued(id, rx) => self.wait_in_queue(id, rx).await,
        }
    }

    fn plan_acquire(
        &self,
        state: &mut PoolState,
        stale: &mut Vec<Arc<dyn RendererProcess>>,
    ) -> Result<Plan> {
        if state.phase != Phase::Running {
            return Err(PrintdError::PoolClosed);
        }
        let config = &self.inner.config;

        while let Some(slot) = state.idle.pop_front() {
            if config.validate_on_borrow && !slot.process.is_connected() {
                warn!(renderer = slot.id, "discarding disconnected idle renderer");
                stale.push(slot.process);
                continue;
            }
            state.leased.insert(slot.id, Arc::clone(&slot.process));
            return Ok(Plan::Ready(Lease::new(
                slot.id,
                slot.process,
                Arc::clone(&self.inner),
            )));
        }

        if state.waiters.is_empty() && state.total() < config.max {
            state.pending += 1;
            let (tx, rx) = oneshot::channel();
            self.inner.start_creation(Delivery::Direct(tx));
            return Ok(Plan::Launching(rx));
        }

        if state.waiters.len() >= config.max_waiting_clients {
            return Err(PrintdError::PoolExhausted {
                waiting: state.waiters.len(),
            });
        }

        let id = state.next_id();
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(Waiter { id, tx });
        self.inner.refill(state, false);
        debug!(waiter = id, queued = state.waiters.len(), "request queued for a renderer");
        Ok(Plan::Queued(id, rx))
    }

    async fn wait_in_queue(
        &self,
        id: u64,
        mut rx: oneshot::Receiver<Result<Lease>>,
    ) -> Result<Lease> {
        let _guard = QueueGuard {
            inner: &self.inner,
            id,
        };
        let received = match self.inner.config.acquire_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(received) => received,
                Err(_) => {
                    if self.inner.remove_waiter(id) {
                        warn!(
                            waiter = id,
                            timeout_ms = limit.as_millis() as u64,
                            "timed out waiting for a renderer"
                        );
                        return Err(PrintdError::AcquireTimeout(limit));
                    }
                    // Fulfilled concurrently with the timeout.
                    rx.await
                }
            },
            None => rx.await,
        };
        received.unwrap_or_else(|_| Err(PrintdError::PoolClosed))
    }

    /// Returns a healthy process for reuse.
    pub fn release(&self, lease: Lease) {
        let (id, process) = lease.disarm();
        self.inner.return_process(id, process);
    }

    /// Drops a broken process from the books, starts replacements for queued
    /// requests and the warm set, then shuts the process down.
    pub async fn destroy(&self, lease: Lease) {
        let (id, process) = lease.disarm();
        let known = {
            let mut state = self.inner.lock();
            let known = state.leased.remove(&id).is_some();
            if known {
                self.inner.refill(&mut state, true);
            }
            known
        };
        if !known {
            warn!(renderer = id, "destroy of unknown renderer ignored");
            return;
        }
        self.inner.changed.notify_waiters();

        info!(renderer = id, "destroying renderer");
        // Detached so the shutdown still completes if this future is dropped.
        let shutdown = tokio::spawn(async move { process.shutdown().await });
        if let Err(err) = shutdown.await {
            warn!(renderer = id, error = %err, "renderer shutdown task failed");
        }
    }

    /// Stops accepting work, rejects queued requests and shuts every process
    /// down once outstanding leases come back. After `grace`, leases still out
    /// are force-destroyed and their later release is ignored.
    pub async fn drain(&self, grace: Option<Duration>) {
        let rejected = {
            let mut state = self.inner.lock();
            match state.phase {
                Phase::Closed => return,
                Phase::Draining => None,
                Phase::Running => {
                    state.phase = Phase::Draining;
                    Some(std::mem::take(&mut state.waiters))
                }
            }
        };
        let Some(rejected) = rejected else {
            self.wait_until(|state| state.phase == Phase::Closed).await;
            return;
        };
        self.inner.changed.notify_waiters();

        info!(rejected = rejected.len(), "draining renderer pool");
        for waiter in rejected {
            let _ = waiter.tx.send(Err(PrintdError::PoolClosed));
        }

        let settled = self.wait_until(|state| state.leased.is_empty() && state.pending == 0);
        let forced = match grace {
            Some(grace) => tokio::time::timeout(grace, settled).await.is_err(),
            None => {
                settled.await;
                false
            }
        };

        let (idle, leased) = {
            let mut state = self.inner.lock();
            state.phase = Phase::Closed;
            let idle: Vec<_> = state.idle.drain(..).map(|slot| slot.process).collect();
            let leased: Vec<_> = state.leased.drain().map(|(_, process)| process).collect();
            (idle, leased)
        };
        self.inner.changed.notify_waiters();

        if forced {
            warn!(
                leased = leased.len(),
                "drain grace period elapsed; destroying leased renderers"
            );
        }
        let count = idle.len() + leased.len();
        join_all(idle.iter().chain(leased.iter()).map(|process| process.shutdown())).await;
        info!(renderers = count, "renderer pool closed");
    }

    async fn wait_until(&self, done: impl Fn(&PoolState) -> bool) {
        loop {
            let notified = self.inner.changed.notified();
            let ready = {
                let state = self.inner.lock();
                done(&*state)
            };
            if ready {
                return;
            }
            notified.await;
        }
    }

    /// False once draining has started.
    pub fn is_accepting(&self) -> bool {
        self.inner.lock().phase == Phase::Running
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            idle: state.idle.len(),
            leased: state.leased.len(),
            pending: state.pending,
            waiting: state.waiters.len(),
            max: self.inner.config.max,
            draining: state.phase == Phase::Draining,
            closed: state.phase == Phase::Closed,
        }
    }
}
