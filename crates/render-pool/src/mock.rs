//! In-process renderer for tests
//!
//! Behaviour is scripted through markers embedded in the HTML:
//!
//! | Marker | Effect |
//! |--------|--------|
//! | [`MockFactory::FAIL_MARKER`] | recoverable render error |
//! | [`MockFactory::CRASH_MARKER`] | fatal error, renderer stays dead |
//! | [`MockFactory::HANG_MARKER`] | never finishes, health check passes |
//! | [`MockFactory::HANG_DEAD_MARKER`] | never finishes, health check fails |
//!
//! Any other document renders to `%PDF-1.4\n<html>\n%%EOF` after the configured
//! delay, so output always reflects exactly the input it was given.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RenderFailure;
use crate::options::PdfOptions;
use crate::worker::{Renderer, RendererFactory, WorkerId};

#[derive(Default)]
struct MockState {
    render_delay_ms: AtomicU64,
    close_delay_ms: AtomicU64,
    fail_creates: AtomicUsize,
    created: AtomicUsize,
    closed: AtomicUsize,
    renders: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    overlap: AtomicBool,
    rendering: Mutex<HashSet<WorkerId>>,
}

/// Factory for [`MockRenderer`]s with shared counters
#[derive(Clone, Default)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    pub const FAIL_MARKER: &'static str = "<!--mock:fail-->";
    pub const CRASH_MARKER: &'static str = "<!--mock:crash-->";
    pub const HANG_MARKER: &'static str = "<!--mock:hang-->";
    pub const HANG_DEAD_MARKER: &'static str = "<!--mock:hang-dead-->";

    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful render sleeps this long first
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state
            .render_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Closing a renderer sleeps this long before it counts as closed
    pub fn with_close_delay(self, delay: Duration) -> Self {
        self.state
            .close_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Make the next `n` calls to `create` fail
    pub fn fail_next_creates(&self, n: usize) {
        self.state.fail_creates.store(n, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Renderers created and not yet closed
    pub fn open_renderers(&self) -> usize {
        self.created() - self.closed()
    }

    pub fn renders(&self) -> usize {
        self.state.renders.load(Ordering::SeqCst)
    }

    pub fn active_renders(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Highest number of renders that were in progress at once
    pub fn peak_active_renders(&self) -> usize {
        self.state.peak_active.load(Ordering::SeqCst)
    }

    /// True if a worker id was ever seen rendering two documents at once
    pub fn overlap_detected(&self) -> bool {
        self.state.overlap.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RendererFactory for MockFactory {
    async fn create(&self, worker_id: WorkerId) -> anyhow::Result<Box<dyn Renderer>> {
        let should_fail = self
            .state
            .fail_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            anyhow::bail!("mock browser failed to launch");
        }

        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockRenderer {
            worker_id,
            state: self.state.clone(),
            alive: true,
            closed: false,
        }))
    }
}

pub struct MockRenderer {
    worker_id: WorkerId,
    state: Arc<MockState>,
    alive: bool,
    closed: bool,
}

/// Tracks one in-progress render; dropping it (including on timeout) ends the render
struct ActiveRender {
    worker_id: WorkerId,
    state: Arc<MockState>,
}

impl ActiveRender {
    fn begin(worker_id: WorkerId, state: &Arc<MockState>) -> Self {
        let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak_active.fetch_max(active, Ordering::SeqCst);
        if let Ok(mut rendering) = state.rendering.lock() {
            if !rendering.insert(worker_id) {
                state.overlap.store(true, Ordering::SeqCst);
            }
        }
        Self {
            worker_id,
            state: state.clone(),
        }
    }
}

impl Drop for ActiveRender {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut rendering) = self.state.rendering.lock() {
            rendering.remove(&self.worker_id);
        }
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn render(&mut self, html: &str, _options: &PdfOptions) -> Result<Vec<u8>, RenderFailure> {
        if !self.alive {
            return Err(RenderFailure::Fatal("browser is not running".to_string()));
        }

        let _active = ActiveRender::begin(self.worker_id, &self.state);
        self.state.renders.fetch_add(1, Ordering::SeqCst);

        if html.contains(MockFactory::CRASH_MARKER) {
            self.alive = false;
            return Err(RenderFailure::Fatal("browser process exited".to_string()));
        }
        if html.contains(MockFactory::FAIL_MARKER) {
            return Err(RenderFailure::Recoverable("mock render error".to_string()));
        }
        if html.contains(MockFactory::HANG_DEAD_MARKER) {
            self.alive = false;
            futures::future::pending::<()>().await;
        }
        if html.contains(MockFactory::HANG_MARKER) {
            futures::future::pending::<()>().await;
        }

        let delay = self.state.render_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut pdf = b"%PDF-1.4\n".to_vec();
        pdf.extend_from_slice(html.as_bytes());
        pdf.extend_from_slice(b"\n%%EOF");
        Ok(pdf)
    }

    async fn health_check(&mut self) -> bool {
        self.alive
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.alive = false;
            let delay = self.state.close_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
