//! Render workers
//!
//! A [`Worker`] owns one [`Renderer`], the handle to a single browser process.
//! The pool leases a worker to exactly one job at a time. A worker whose renderer
//! fails fatally is marked [`WorkerState::Crashed`] and rebuilt in place through
//! [`Worker::restart`], keeping its id.
//!
//! ```text
//!            lease             fatal failure          restart ok
//!   Idle ─────────────▶ Busy ────────────────▶ Crashed ──▶ Restarting ──▶ Idle
//!    ▲                   │
//!    └───────────────────┘
//!     completed / recoverable failure
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RenderFailure;
use crate::job::Job;
use crate::options::PdfOptions;

/// Pool-unique worker identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Busy,
    Crashed,
    Restarting,
}

/// The render capability: turns HTML into PDF bytes.
///
/// Implementations must reset page state on every call (no leftovers from the
/// previous document) and must report a dead browser as [`RenderFailure::Fatal`].
#[async_trait]
pub trait Renderer: Send {
    async fn render(&mut self, html: &str, options: &PdfOptions) -> Result<Vec<u8>, RenderFailure>;

    /// Cheap liveness probe, used after a render times out
    async fn health_check(&mut self) -> bool;

    /// Release the underlying browser. Must be safe to call on a dead renderer.
    async fn close(&mut self);
}

/// Creates renderers for new and restarted workers
#[async_trait]
pub trait RendererFactory: Send + Sync + 'static {
    async fn create(&self, worker_id: WorkerId) -> anyhow::Result<Box<dyn Renderer>>;
}

/// Timeouts applied around a single render call
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderLimits {
    pub render_timeout: Duration,
    pub health_check_timeout: Duration,
}

pub struct Worker {
    id: WorkerId,
    state: WorkerState,
    renderer: Box<dyn Renderer>,
    jobs_completed: u64,
    restarts: u32,
    idle_since: Instant,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, renderer: Box<dyn Renderer>) -> Self {
        Self {
            id,
            state: WorkerState::Idle,
            renderer,
            jobs_completed: 0,
            restarts: 0,
            idle_since: Instant::now(),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.idle_since.elapsed()
    }

    pub(crate) fn mark_busy(&mut self) {
        self.state = WorkerState::Busy;
    }

    pub(crate) fn mark_idle(&mut self) {
        self.state = WorkerState::Idle;
        self.idle_since = Instant::now();
    }

    /// Run one job under the render timeout.
    ///
    /// A timed-out render is recoverable only if the browser still answers a
    /// health check afterwards; otherwise the worker is considered crashed.
    pub(crate) async fn execute(
        &mut self,
        job: &Job,
        limits: RenderLimits,
    ) -> Result<Vec<u8>, RenderFailure> {
        debug_assert_eq!(self.state, WorkerState::Busy);

        let rendered = tokio::time::timeout(
            limits.render_timeout,
            self.renderer.render(job.html(), job.options()),
        )
        .await;

        let result = match rendered {
            Ok(Ok(pdf)) if pdf.is_empty() => Err(RenderFailure::Recoverable(
                "renderer produced no output".to_string(),
            )),
            Ok(Ok(pdf)) => Ok(pdf),
            Ok(Err(failure)) => Err(failure),
            Err(_elapsed) => {
                let timeout_ms = limits.render_timeout.as_millis();
                let responsive =
                    tokio::time::timeout(limits.health_check_timeout, self.renderer.health_check())
                        .await
                        .unwrap_or(false);
                if responsive {
                    debug!(worker_id = %self.id, "render timed out, browser still responsive");
                    Err(RenderFailure::Recoverable(format!(
                        "render timed out after {}ms",
                        timeout_ms
                    )))
                } else {
                    Err(RenderFailure::Fatal(format!(
                        "render timed out after {}ms and the browser stopped responding",
                        timeout_ms
                    )))
                }
            }
        };

        match &result {
            Ok(_) => self.jobs_completed += 1,
            Err(failure) if failure.is_fatal() => self.state = WorkerState::Crashed,
            Err(_) => {}
        }
        result
    }

    /// Mark a worker crashed without a render result (e.g. the render task panicked)
    pub(crate) fn mark_crashed(&mut self) {
        self.state = WorkerState::Crashed;
    }

    /// Replace the renderer of a crashed worker.
    ///
    /// The old renderer is closed first. Creation is retried up to `attempts`
    /// times with `backoff` between tries.
    pub(crate) async fn restart(
        &mut self,
        factory: &dyn RendererFactory,
        attempts: u32,
        backoff: Duration,
    ) -> anyhow::Result<()> {
        self.state = WorkerState::Restarting;
        self.renderer.close().await;

        let renderer = create_with_retry(factory, self.id, attempts, backoff).await?;
        self.renderer = renderer;
        self.restarts += 1;
        self.mark_idle();
        Ok(())
    }

    pub(crate) async fn close(mut self) {
        self.renderer.close().await;
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("jobs_completed", &self.jobs_completed)
            .field("restarts", &self.restarts)
            .finish()
    }
}

/// Ask the factory for a renderer, retrying with a fixed backoff
pub(crate) async fn create_with_retry(
    factory: &dyn RendererFactory,
    worker_id: WorkerId,
    attempts: u32,
    backoff: Duration,
) -> anyhow::Result<Box<dyn Renderer>> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match factory.create(worker_id).await {
            Ok(renderer) => return Ok(renderer),
            Err(e) => {
                warn!(
                    %worker_id,
                    attempt,
                    attempts,
                    error = %e,
                    "Failed to create renderer"
                );
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("renderer creation failed")))
}
