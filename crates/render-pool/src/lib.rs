//! Bounded pool of headless-browser workers for HTML to PDF rendering
//!
//! This crate provides the scheduling core of the PDF service:
//! - A fixed-ceiling pool of render workers, each owning one browser process
//! - FIFO dispatch with optional queue depth and queue wait limits
//! - Crash detection and in-place worker restarts
//! - Graceful drain and hard shutdown that release every browser
//!
//! # Feature Flags
//!
//! - `chromium` (default): Headless Chrome renderer via `chromiumoxide`
//! - `test-utils`: In-process mock renderer for tests of downstream crates
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "chromium")]
//! use render_pool::{ChromiumConfig, ChromiumFactory, PdfOptions, PoolConfig, WorkerPool};
//!
//! # #[cfg(feature = "chromium")]
//! # async fn example() -> Result<(), render_pool::PoolError> {
//! let factory = ChromiumFactory::new(ChromiumConfig::default());
//! let pool = WorkerPool::launch(PoolConfig::new(2, 5), factory).await?;
//!
//! let pdf = pool.render("<h1>Hello</h1>", PdfOptions::default()).await?;
//! assert!(pdf.starts_with(b"%PDF"));
//!
//! pool.drain().await;
//! # Ok(())
//! # }
//! # fn main() {}
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod options;
pub mod pool;
pub mod stats;
pub mod worker;

#[cfg(feature = "chromium")]
pub mod chromium;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use config::PoolConfig;
pub use error::{PoolError, RenderFailure};
pub use job::{Job, JobId, JobState};
pub use options::{Length, Margin, OptionsError, PageLayout, PaperFormat, PdfOptions};
pub use pool::{ShutdownMode, WorkerPool};
pub use stats::PoolStats;
pub use worker::{Renderer, RendererFactory, WorkerId, WorkerState};

#[cfg(feature = "chromium")]
pub use chromium::{ChromiumConfig, ChromiumFactory};
