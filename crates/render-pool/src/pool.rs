//! Worker pool scheduler
//!
//! The pool is the single point of admission control over concurrent renders.
//!
//! # Architecture
//!
//! ```text
//!   submit(job) ──▶ acquire ──┬── idle worker? ──────────────▶ lease ──▶ render task
//!                             │                                               │
//!                             └── FIFO waiter queue ◀── offer ◀── release ◀───┤
//!                                    ▲                   ▲                    │
//!                           grow (≤ max_concurrency)   restart ◀── crash ◀───┘
//! ```
//!
//! All state transitions happen under one mutex (`PoolState`) that is never held
//! across an await. A worker is moved, never shared, so it can only ever be
//! leased to one job. Freed workers go to the oldest waiter first, which makes
//! dispatch FIFO in submission order.
//!
//! Renders run on their own task: a caller that stops waiting does not interrupt
//! a render in progress, and the worker returns to the pool when it finishes.
//! Crashed workers are rebuilt on a separate task so recovery never blocks
//! unrelated jobs. A supervisor task keeps the warm size and retires surplus
//! idle workers.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::config::PoolConfig;
use crate::error::{PoolError, RenderFailure};
use crate::job::{Job, JobId, JobState};
use crate::options::PdfOptions;
use crate::stats::PoolStats;
use crate::worker::{create_with_retry, RenderLimits, RendererFactory, Worker, WorkerId};

/// How [`WorkerPool::close`] treats jobs that are still queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Run every queued job before closing
    Graceful,
    /// Reject queued jobs with [`PoolError::Closed`]; in-flight renders still finish
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Draining,
    Closed,
}

type Assignment = Result<Worker, PoolError>;

struct Waiter {
    job_id: JobId,
    tx: oneshot::Sender<Assignment>,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    rejected: u64,
    crashes: u64,
    restarts: u64,
    created: u64,
    closed: u64,
    peak_busy: usize,
}

struct PoolState {
    phase: Phase,
    idle: VecDeque<Worker>,
    busy: HashSet<WorkerId>,
    /// Workers being created (growth or warm top-up)
    spawning: usize,
    /// Crashed workers being rebuilt
    restarting: usize,
    /// Workers whose renderer is being released
    closing: usize,
    waiters: VecDeque<Waiter>,
    counters: Counters,
}

impl PoolState {
    fn live(&self) -> usize {
        self.idle.len() + self.busy.len()
    }

    fn pending(&self) -> usize {
        self.spawning + self.restarting
    }

    fn record(&mut self, state: JobState) {
        match state {
            JobState::Completed => self.counters.completed += 1,
            JobState::Failed => self.counters.failed += 1,
            JobState::Rejected => self.counters.rejected += 1,
            JobState::Queued | JobState::Assigned => {}
        }
    }

    fn lease(&mut self, worker: &mut Worker) {
        worker.mark_busy();
        let inserted = self.busy.insert(worker.id());
        debug_assert!(inserted, "{} leased twice", worker.id());
        self.counters.peak_busy = self.counters.peak_busy.max(self.busy.len());
    }

    /// Hand a free worker to the oldest waiter that is still listening, or park it.
    ///
    /// Returns the worker if nobody needs it and the pool has stopped accepting
    /// jobs; the caller must close it.
    fn offer(&mut self, mut worker: Worker) -> Option<Worker> {
        while let Some(waiter) = self.waiters.pop_front() {
            self.lease(&mut worker);
            match waiter.tx.send(Ok(worker)) {
                Ok(()) => {
                    debug!(job_id = %waiter.job_id, "Dispatched queued job");
                    return None;
                }
                Err(returned) => match returned.ok() {
                    // Waiter went away between queueing and dispatch
                    Some(w) => {
                        self.busy.remove(&w.id());
                        worker = w;
                    }
                    None => return None,
                },
            }
        }

        if self.phase != Phase::Running {
            return Some(worker);
        }
        worker.mark_idle();
        self.idle.push_back(worker);
        None
    }

    fn quiescent(&self) -> bool {
        self.waiters.is_empty()
            && self.busy.is_empty()
            && self.spawning == 0
            && self.restarting == 0
            && self.closing == 0
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            live: self.live(),
            idle: self.idle.len(),
            busy: self.busy.len(),
            spawning: self.pending(),
            queued: self.waiters.len(),
            peak_busy: self.counters.peak_busy,
            completed: self.counters.completed,
            failed: self.counters.failed,
            rejected: self.counters.rejected,
            crashes: self.counters.crashes,
            restarts: self.counters.restarts,
            renderers_created: self.counters.created,
            renderers_closed: self.counters.closed,
            accepting: self.phase == Phase::Running,
        }
    }
}

struct Shared {
    config: PoolConfig,
    factory: Arc<dyn RendererFactory>,
    state: Mutex<PoolState>,
    changed: Notify,
    next_worker_id: AtomicU64,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

/// A bounded pool of render workers.
///
/// Cloning is cheap and every clone drives the same pool, so a clone can be
/// handed to each HTTP handler.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Create the warm workers and start the supervisor.
    ///
    /// # Errors
    ///
    /// [`PoolError::Startup`] if the configuration is invalid or any warm worker
    /// fails to start. Workers created before the failure are closed.
    #[instrument(skip_all, fields(concurrency = config.concurrency, max_concurrency = config.max_concurrency))]
    pub async fn launch<F: RendererFactory>(config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        config
            .validate()
            .map_err(|e| PoolError::Startup(e.to_string()))?;

        let factory: Arc<dyn RendererFactory> = Arc::new(factory);
        let ids: Vec<WorkerId> = (1..=config.concurrency as u64).map(WorkerId).collect();
        let results = join_all(ids.iter().map(|&id| factory.create(id))).await;

        let mut workers = Vec::with_capacity(ids.len());
        let mut failure = None;
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(renderer) => workers.push(Worker::new(id, renderer)),
                Err(e) => {
                    error!(worker_id = %id, error = %e, "Failed to start worker");
                    failure.get_or_insert_with(|| format!("{}: {:#}", id, e));
                }
            }
        }

        if let Some(message) = failure {
            join_all(workers.into_iter().map(Worker::close)).await;
            return Err(PoolError::Startup(message));
        }

        let state = PoolState {
            phase: Phase::Running,
            counters: Counters {
                created: workers.len() as u64,
                ..Counters::default()
            },
            idle: workers.into(),
            busy: HashSet::new(),
            spawning: 0,
            restarting: 0,
            closing: 0,
            waiters: VecDeque::new(),
        };

        let shared = Arc::new(Shared {
            next_worker_id: AtomicU64::new(config.concurrency as u64 + 1),
            config,
            factory,
            state: Mutex::new(state),
            changed: Notify::new(),
            supervisor: Mutex::new(None),
        });

        let handle = tokio::spawn(supervise(
            Arc::downgrade(&shared),
            shared.config.supervisor_interval(),
        ));
        *shared
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!("Worker pool ready");
        Ok(Self { shared })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Validate and render one document
    pub async fn render(
        &self,
        html: impl Into<String>,
        options: PdfOptions,
    ) -> Result<Vec<u8>, PoolError> {
        let job = Job::new(html, options)?;
        self.submit(job).await
    }

    /// Run a job on the next free worker, waiting in FIFO order if none is free.
    ///
    /// Dropping the returned future while the job is queued removes it from the
    /// queue. Dropping it after a worker was assigned lets the render finish in
    /// the background and discards the result.
    #[instrument(skip(self, job), fields(job_id = %job.id(), html_len = job.html().len()))]
    pub async fn submit(&self, job: Job) -> Result<Vec<u8>, PoolError> {
        let worker = self.shared.acquire(job.id()).await?;
        let shared = self.shared.clone();
        let task = tokio::spawn(shared.run(worker, job).in_current_span());

        task.await
            .unwrap_or_else(|e| Err(PoolError::Render(format!("render task failed: {}", e))))
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.lock().snapshot()
    }

    /// Stop accepting jobs, finish queued and in-flight ones, and release every browser
    pub async fn drain(&self) {
        self.close(ShutdownMode::Graceful).await
    }

    /// Stop accepting jobs, reject queued ones, wait for in-flight renders, and
    /// release every browser
    pub async fn shutdown(&self) {
        self.close(ShutdownMode::Immediate).await
    }

    /// Close the pool. Safe to call more than once.
    #[instrument(skip(self))]
    pub async fn close(&self, mode: ShutdownMode) {
        let shared = &self.shared;
        let rejected: Vec<Waiter> = {
            let mut state = shared.lock();
            if state.phase == Phase::Running {
                state.phase = Phase::Draining;
            }
            match mode {
                ShutdownMode::Graceful => Vec::new(),
                ShutdownMode::Immediate => {
                    let waiters: Vec<Waiter> = state.waiters.drain(..).collect();
                    state.counters.rejected += waiters.len() as u64;
                    waiters
                }
            }
        };
        if !rejected.is_empty() {
            info!(count = rejected.len(), "Rejecting queued jobs");
        }
        for waiter in rejected {
            let _ = waiter.tx.send(Err(PoolError::Closed));
        }
        shared.changed.notify_waiters();

        info!("Draining worker pool");
        shared.wait_until(PoolState::quiescent).await;

        let idle: Vec<Worker> = {
            let mut state = shared.lock();
            state.phase = Phase::Closed;
            let idle: Vec<Worker> = state.idle.drain(..).collect();
            state.closing += idle.len();
            idle
        };

        if let Some(handle) = shared
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        // Still counted in `closing`, so a concurrent drain waits for these
        let count = idle.len();
        join_all(idle.into_iter().map(Worker::close)).await;
        {
            let mut state = shared.lock();
            state.closing -= count;
            state.counters.closed += count as u64;
        }
        shared.changed.notify_waiters();

        let stats = self.stats();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            rejected = stats.rejected,
            crashes = stats.crashes,
            "Worker pool closed"
        );
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn limits(&self) -> RenderLimits {
        RenderLimits {
            render_timeout: self.config.render_timeout(),
            health_check_timeout: self.config.health_check_timeout(),
        }
    }

    async fn wait_until(&self, done: impl Fn(&PoolState) -> bool) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if done(&*self.lock()) {
                return;
            }
            notified.await;
        }
    }

    /// Take an idle worker, or queue and wait for one
    async fn acquire(self: &Arc<Self>, job_id: JobId) -> Result<Worker, PoolError> {
        let rx = {
            let mut state = self.lock();
            if state.phase != Phase::Running {
                state.record(JobState::Rejected);
                return Err(PoolError::Closed);
            }

            if state.waiters.is_empty() {
                if let Some(mut worker) = state.idle.pop_back() {
                    state.lease(&mut worker);
                    debug!(worker_id = %worker.id(), "Assigned idle worker");
                    return Ok(worker);
                }
            }

            if let Some(limit) = self.config.max_queue_depth {
                if state.waiters.len() >= limit {
                    state.record(JobState::Rejected);
                    warn!(limit, "Queue depth limit reached, rejecting job");
                    return Err(PoolError::Exhausted(format!(
                        "queue depth limit of {} reached",
                        limit
                    )));
                }
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { job_id, tx });

            // Grow only while queued jobs outnumber the workers already on their way
            if state.live() + state.pending() < self.config.max_concurrency
                && state.waiters.len() > state.pending()
            {
                self.spawn_worker(&mut state);
            }

            debug!(
                state = ?JobState::Queued,
                queued = state.waiters.len(),
                live = state.live(),
                "Job queued"
            );
            rx
        };

        Ticket {
            shared: self.clone(),
            job_id,
            rx,
            settled: false,
        }
        .wait(self.config.queue_timeout())
        .await
    }

    async fn run(self: Arc<Self>, mut worker: Worker, job: Job) -> Result<Vec<u8>, PoolError> {
        let worker_id = worker.id();
        debug!(%worker_id, state = ?JobState::Assigned, "Rendering");

        let outcome = match AssertUnwindSafe(worker.execute(&job, self.limits()))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_panic) => {
                worker.mark_crashed();
                Err(RenderFailure::Fatal("render panicked".to_string()))
            }
        };

        match outcome {
            Ok(pdf) => {
                self.lock().record(JobState::Completed);
                info!(%worker_id, bytes = pdf.len(), "Render completed");
                self.release(worker);
                Ok(pdf)
            }
            Err(RenderFailure::Recoverable(message)) => {
                self.lock().record(JobState::Failed);
                warn!(%worker_id, error = %message, "Render failed");
                self.release(worker);
                Err(PoolError::Render(message))
            }
            Err(RenderFailure::Fatal(message)) => {
                self.lock().record(JobState::Failed);
                error!(
                    %worker_id,
                    jobs_completed = worker.jobs_completed(),
                    restarts = worker.restarts(),
                    error = %message,
                    "Worker crashed"
                );
                self.recover(worker);
                Err(PoolError::WorkerCrashed {
                    worker_id: worker_id.0,
                })
            }
        }
    }

    /// Return a healthy worker after a job
    fn release(self: &Arc<Self>, worker: Worker) {
        let surplus = {
            let mut state = self.lock();
            state.busy.remove(&worker.id());
            let surplus = state.offer(worker);
            if surplus.is_some() {
                state.closing += 1;
            }
            surplus
        };
        self.changed.notify_waiters();
        if let Some(worker) = surplus {
            self.spawn_close(worker);
        }
    }

    /// Take a crashed worker out of rotation and rebuild it in the background
    fn recover(self: &Arc<Self>, worker: Worker) {
        let restart = {
            let mut state = self.lock();
            state.busy.remove(&worker.id());
            state.counters.crashes += 1;
            if state.phase != Phase::Running && state.waiters.is_empty() {
                state.closing += 1;
                false
            } else {
                state.restarting += 1;
                true
            }
        };
        self.changed.notify_waiters();

        if !restart {
            self.spawn_close(worker);
            return;
        }

        let shared = self.clone();
        spawn_detached(async move {
            let mut worker = worker;
            let worker_id = worker.id();
            warn!(%worker_id, "Restarting crashed worker");

            let result = worker
                .restart(
                    shared.factory.as_ref(),
                    shared.config.max_restart_attempts,
                    shared.config.restart_backoff(),
                )
                .await;

            let surplus = {
                let mut state = shared.lock();
                state.restarting -= 1;
                // The crashed renderer was closed by restart()
                state.counters.closed += 1;
                match result {
                    Ok(()) => {
                        state.counters.restarts += 1;
                        state.counters.created += 1;
                        info!(%worker_id, restarts = worker.restarts(), "Worker restarted");
                        let surplus = state.offer(worker);
                        if surplus.is_some() {
                            state.closing += 1;
                        }
                        surplus
                    }
                    Err(e) => {
                        error!(%worker_id, error = %e, "Giving up on crashed worker");
                        fail_stranded_waiters(&mut state);
                        None
                    }
                }
            };
            shared.changed.notify_waiters();
            if let Some(worker) = surplus {
                shared.spawn_close(worker);
            }
        });
    }

    /// Start a new worker in the background; the caller holds the state lock
    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState) {
        state.spawning += 1;
        let worker_id = WorkerId(self.next_worker_id.fetch_add(1, Ordering::Relaxed));
        debug!(%worker_id, "Spawning worker");

        let shared = self.clone();
        spawn_detached(async move {
            let created = create_with_retry(
                shared.factory.as_ref(),
                worker_id,
                shared.config.max_restart_attempts,
                shared.config.restart_backoff(),
            )
            .await;

            let surplus = {
                let mut state = shared.lock();
                state.spawning -= 1;
                match created {
                    Ok(renderer) => {
                        state.counters.created += 1;
                        debug!(%worker_id, "Worker started");
                        let surplus = state.offer(Worker::new(worker_id, renderer));
                        if surplus.is_some() {
                            state.closing += 1;
                        }
                        surplus
                    }
                    Err(e) => {
                        error!(%worker_id, error = %e, "Failed to spawn worker");
                        fail_stranded_waiters(&mut state);
                        None
                    }
                }
            };
            shared.changed.notify_waiters();
            if let Some(worker) = surplus {
                shared.spawn_close(worker);
            }
        });
    }

    /// Release a worker's renderer; the caller already counted it in `closing`
    fn spawn_close(self: &Arc<Self>, worker: Worker) {
        let shared = self.clone();
        spawn_detached(async move {
            let worker_id = worker.id();
            worker.close().await;
            {
                let mut state = shared.lock();
                state.closing -= 1;
                state.counters.closed += 1;
            }
            debug!(%worker_id, "Worker closed");
            shared.changed.notify_waiters();
        });
    }

    /// Remove a queued job whose caller stopped waiting
    fn withdraw(self: &Arc<Self>, job_id: JobId, rx: &mut oneshot::Receiver<Assignment>) {
        {
            let mut state = self.lock();
            if let Some(position) = state.waiters.iter().position(|w| w.job_id == job_id) {
                state.waiters.remove(position);
                debug!(%job_id, "Job withdrawn from queue");
                drop(state);
                self.changed.notify_waiters();
                return;
            }
        }

        // Already dispatched: hand the worker back
        if let Ok(Ok(worker)) = rx.try_recv() {
            debug!(%job_id, worker_id = %worker.id(), "Returning worker of abandoned job");
            self.release(worker);
        }
    }

    /// Retire surplus idle workers and restore the warm size.
    /// Returns false once the pool has stopped accepting jobs.
    fn maintain(self: &Arc<Self>) -> bool {
        let retired = {
            let mut state = self.lock();
            if state.phase != Phase::Running {
                return false;
            }

            let mut retired = Vec::new();
            let idle_timeout = self.config.idle_timeout();
            while state.live() > self.config.concurrency {
                let expired = state
                    .idle
                    .front()
                    .map_or(false, |worker| worker.idle_for() >= idle_timeout);
                if !expired {
                    break;
                }
                if let Some(worker) = state.idle.pop_front() {
                    state.closing += 1;
                    retired.push(worker);
                }
            }

            let deficit = self
                .config
                .concurrency
                .saturating_sub(state.live() + state.pending());
            if deficit > 0 {
                info!(deficit, "Restoring warm workers");
            }
            for _ in 0..deficit {
                self.spawn_worker(&mut state);
            }
            retired
        };

        for worker in retired {
            info!(worker_id = %worker.id(), "Retiring idle worker");
            self.spawn_close(worker);
        }
        true
    }
}

/// Fail every queued job when no worker is alive or on its way
fn fail_stranded_waiters(state: &mut PoolState) {
    if state.live() + state.pending() > 0 || state.waiters.is_empty() {
        return;
    }
    let waiters: Vec<Waiter> = state.waiters.drain(..).collect();
    state.counters.rejected += waiters.len() as u64;
    warn!(count = waiters.len(), "No render workers available, rejecting queued jobs");
    for waiter in waiters {
        let _ = waiter
            .tx
            .send(Err(PoolError::Exhausted("no render workers available".to_string())));
    }
}

/// A queued job's claim on the next free worker
struct Ticket {
    shared: Arc<Shared>,
    job_id: JobId,
    rx: oneshot::Receiver<Assignment>,
    settled: bool,
}

impl Ticket {
    async fn wait(mut self, limit: Option<Duration>) -> Result<Worker, PoolError> {
        let received = match limit {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    self.shared.lock().record(JobState::Rejected);
                    warn!(job_id = %self.job_id, "Job timed out in queue");
                    return Err(PoolError::Exhausted(format!(
                        "no worker became available within {}ms",
                        limit.as_millis()
                    )));
                }
            },
            None => (&mut self.rx).await,
        };

        self.settled = true;
        received.unwrap_or(Err(PoolError::Closed))
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.withdraw(self.job_id, &mut self.rx);
        }
    }
}

async fn supervise(pool: Weak<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(shared) = pool.upgrade() else {
            break;
        };
        if !shared.maintain() {
            break;
        }
    }
    debug!("Supervisor stopped");
}

/// Spawn onto the current runtime; outside a runtime the task is dropped
fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future.in_current_span());
        }
        Err(_) => warn!("No Tokio runtime available, dropping pool task"),
    }
}
