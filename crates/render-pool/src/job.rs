//! Render jobs
//!
//! A [`Job`] is an immutable message: it carries its own HTML and options, and the
//! worker that executes it never reaches back into caller state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::options::PdfOptions;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identifier used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl JobId {
    fn next() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a job inside the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Assigned,
    Completed,
    Failed,
    Rejected,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Rejected
        )
    }
}

/// One render request
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    html: String,
    options: PdfOptions,
}

impl Job {
    /// Build a job, rejecting empty or whitespace-only content
    pub fn new(html: impl Into<String>, options: PdfOptions) -> Result<Self, PoolError> {
        let html = html.into();
        if html.trim().is_empty() {
            return Err(PoolError::Validation("Content can't be empty".to_string()));
        }
        Ok(Self {
            id: JobId::next(),
            html,
            options,
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn options(&self) -> &PdfOptions {
        &self.options
    }
}
