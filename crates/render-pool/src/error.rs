//! Error types for the render pool

use thiserror::Error;

/// Errors surfaced by the pool to callers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The job was rejected before any worker was touched
    #[error("Invalid job: {0}")]
    Validation(String),

    /// The renderer could not produce output; the worker stays in rotation
    #[error("Render failed: {0}")]
    Render(String),

    /// The worker died while rendering this job and is being replaced
    #[error("Render failed: worker {worker_id} crashed")]
    WorkerCrashed { worker_id: u64 },

    /// The pool or its warm workers could not be created
    #[error("Failed to start worker pool: {0}")]
    Startup(String),

    /// Queue depth or queue wait limit exceeded
    #[error("Pool exhausted: {0}")]
    Exhausted(String),

    /// The pool is draining or shut down
    #[error("Pool is closed")]
    Closed,

    /// Configuration values are inconsistent
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl PoolError {
    /// True for failures a client may retry without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::Exhausted(_) | PoolError::WorkerCrashed { .. })
    }

    /// True for failures caused by the request itself
    pub fn is_client_error(&self) -> bool {
        matches!(self, PoolError::Validation(_))
    }
}

/// Outcome of a failed call into a [`Renderer`](crate::worker::Renderer)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderFailure {
    /// Bad input or a render that gave up; the renderer is still usable
    #[error("{0}")]
    Recoverable(String),

    /// The underlying browser is gone or unresponsive
    #[error("fatal: {0}")]
    Fatal(String),
}

impl RenderFailure {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderFailure::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(PoolError::Exhausted("queue full".into()).is_retryable());
        assert!(PoolError::WorkerCrashed { worker_id: 3 }.is_retryable());
        assert!(!PoolError::Validation("empty".into()).is_retryable());
        assert!(!PoolError::Render("bad".into()).is_retryable());
        assert!(!PoolError::Closed.is_retryable());
    }

    #[test]
    fn test_crash_message_does_not_leak_internals() {
        let msg = PoolError::WorkerCrashed { worker_id: 7 }.to_string();
        assert_eq!(msg, "Render failed: worker 7 crashed");
    }

    #[test]
    fn test_render_failure_fatality() {
        assert!(RenderFailure::Fatal("gone".into()).is_fatal());
        assert!(!RenderFailure::Recoverable("timeout".into()).is_fatal());
    }
}
