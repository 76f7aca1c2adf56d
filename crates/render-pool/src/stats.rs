//! Point-in-time pool statistics

use serde::Serialize;

/// Snapshot returned by [`WorkerPool::stats`](crate::pool::WorkerPool::stats)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Workers able to take a job now or running one (idle + busy)
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
    /// Workers being created or restarted
    pub spawning: usize,
    /// Jobs waiting for a worker
    pub queued: usize,
    /// Highest `busy` ever observed
    pub peak_busy: usize,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub crashes: u64,
    pub restarts: u64,
    pub renderers_created: u64,
    pub renderers_closed: u64,
    /// False once draining or shut down
    pub accepting: bool,
}
