//! Headless Chrome renderer
//!
//! Each worker owns one browser process with its own profile directory and a
//! single reusable tab. Every render replaces the tab's document with
//! `set_content`, so nothing from the previous job survives into the next one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RenderFailure;
use crate::options::{PageLayout, PdfOptions};
use crate::worker::{Renderer, RendererFactory, WorkerId};

/// Flags passed to every browser process
pub const CHROME_ARGS: &[&str] = &[
    "--autoplay-policy=user-gesture-required",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-domain-reliability",
    "--disable-extensions",
    "--disable-features=AudioServiceOutOfProcess",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-notifications",
    "--disable-offer-store-unmasked-wallet-cards",
    "--disable-popup-blocking",
    "--disable-print-preview",
    "--disable-prompt-on-repost",
    "--disable-renderer-backgrounding",
    "--disable-setuid-sandbox",
    "--disable-speech-api",
    "--disable-sync",
    "--hide-scrollbars",
    "--ignore-gpu-blacklist",
    "--metrics-recording-only",
    "--mute-audio",
    "--no-default-browser-check",
    "--no-first-run",
    "--no-pings",
    "--no-zygote",
    "--password-store=basic",
    "--use-gl=swiftshader",
    "--use-mock-keychain",
    "--ignore-certificate-errors",
    "--disable-accelerated-2d-canvas",
    "--disable-gpu",
];

#[derive(Debug, Clone)]
pub struct ChromiumConfig {
    /// Browser binary; auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Appended after [`CHROME_ARGS`]
    pub extra_args: Vec<String>,
    /// Timeout for a single CDP request
    pub request_timeout: Duration,
    pub launch_timeout: Duration,
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            extra_args: Vec::new(),
            request_timeout: Duration::from_secs(30),
            launch_timeout: Duration::from_secs(20),
        }
    }
}

/// Launches one browser per worker
pub struct ChromiumFactory {
    config: ChromiumConfig,
    generation: AtomicU64,
}

impl ChromiumFactory {
    pub fn new(config: ChromiumConfig) -> Self {
        Self {
            config,
            generation: AtomicU64::new(0),
        }
    }

    fn browser_config(&self, user_data_dir: &Path) -> anyhow::Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .args(CHROME_ARGS.iter().copied())
            .args(self.config.extra_args.iter().map(String::as_str))
            .request_timeout(self.config.request_timeout)
            .launch_timeout(self.config.launch_timeout)
            .user_data_dir(user_data_dir);

        if let Some(path) = &self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(|e| anyhow::anyhow!("{}", e))
    }
}

#[async_trait]
impl RendererFactory for ChromiumFactory {
    async fn create(&self, worker_id: WorkerId) -> anyhow::Result<Box<dyn Renderer>> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let user_data_dir = std::env::temp_dir().join(format!(
            "pdf-render-{}-{}-{}",
            std::process::id(),
            worker_id.0,
            generation
        ));

        let config = self.browser_config(&user_data_dir)?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(%worker_id, error = %e, "Browser handler error");
                }
            }
            debug!(%worker_id, "Browser connection closed");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler.abort();
                let _ = tokio::fs::remove_dir_all(&user_data_dir).await;
                return Err(e).context("Failed to open page");
            }
        };

        info!(%worker_id, "Browser launched");
        Ok(Box::new(ChromiumRenderer {
            worker_id,
            browser,
            page: Some(page),
            handler,
            user_data_dir,
            closed: false,
        }))
    }
}

pub struct ChromiumRenderer {
    worker_id: WorkerId,
    browser: Browser,
    page: Option<Page>,
    handler: JoinHandle<()>,
    user_data_dir: PathBuf,
    closed: bool,
}

impl ChromiumRenderer {
    async fn render_on_page(
        page: &Page,
        html: &str,
        params: PrintToPdfParams,
    ) -> Result<Vec<u8>, CdpError> {
        page.set_content(html).await?;
        page.pdf(params).await
    }

    /// Swap the tab for a fresh one after a failed render
    async fn reset_page(&mut self) -> Result<(), RenderFailure> {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderFailure::Fatal(format!("failed to open a new page: {}", e)))?;
        self.page = Some(page);
        Ok(())
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn render(&mut self, html: &str, options: &PdfOptions) -> Result<Vec<u8>, RenderFailure> {
        if self.closed || self.handler.is_finished() {
            return Err(RenderFailure::Fatal("browser is not running".to_string()));
        }

        let layout = options
            .layout()
            .map_err(|e| RenderFailure::Recoverable(e.to_string()))?;
        let params = print_params(options, &layout);

        if self.page.is_none() {
            self.reset_page().await?;
        }
        let Some(page) = self.page.as_ref() else {
            return Err(RenderFailure::Fatal("no page available".to_string()));
        };

        match Self::render_on_page(page, html, params).await {
            Ok(pdf) => Ok(pdf),
            Err(e) if is_fatal(&e) => Err(RenderFailure::Fatal(e.to_string())),
            Err(e) => {
                warn!(worker_id = %self.worker_id, error = %e, "Render failed, resetting page");
                self.reset_page().await?;
                Err(RenderFailure::Recoverable(e.to_string()))
            }
        }
    }

    async fn health_check(&mut self) -> bool {
        !self.closed && !self.handler.is_finished() && self.browser.version().await.is_ok()
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.page = None;
        if let Err(e) = self.browser.close().await {
            debug!(worker_id = %self.worker_id, error = %e, "Browser close failed, killing");
            let _ = self.browser.kill().await;
        }
        let _ = self.browser.wait().await;
        self.handler.abort();

        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!(
                worker_id = %self.worker_id,
                path = %self.user_data_dir.display(),
                error = %e,
                "Failed to remove profile directory"
            );
        }
        info!(worker_id = %self.worker_id, "Browser closed");
    }
}

impl Drop for ChromiumRenderer {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Errors that mean the browser connection itself is gone
fn is_fatal(error: &CdpError) -> bool {
    matches!(
        error,
        CdpError::Ws(_) | CdpError::Io(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse
    )
}

/// Map validated options onto Chrome's print parameters (inches)
pub fn print_params(options: &PdfOptions, layout: &PageLayout) -> PrintToPdfParams {
    PrintToPdfParams {
        landscape: options.landscape,
        display_header_footer: options.display_header_footer,
        print_background: options.print_background,
        scale: Some(layout.scale),
        paper_width: Some(layout.paper_width),
        paper_height: Some(layout.paper_height),
        margin_top: Some(layout.margin_top),
        margin_bottom: Some(layout.margin_bottom),
        margin_left: Some(layout.margin_left),
        margin_right: Some(layout.margin_right),
        page_ranges: options.page_ranges.clone(),
        header_template: options.header_template.clone(),
        footer_template: options.footer_template.clone(),
        prefer_css_page_size: options.prefer_css_page_size,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Length, Margin};

    #[test]
    fn test_print_params_defaults_to_letter() {
        let options = PdfOptions::default();
        let params = print_params(&options, &options.layout().unwrap());

        assert_eq!(params.paper_width, Some(8.5));
        assert_eq!(params.paper_height, Some(11.0));
        assert_eq!(params.margin_top, Some(0.0));
        assert_eq!(params.scale, Some(1.0));
        assert_eq!(params.landscape, None);
    }

    #[test]
    fn test_print_params_carries_options() {
        let options = PdfOptions {
            format: Some("A4".to_string()),
            landscape: Some(true),
            print_background: Some(true),
            margin: Some(Margin {
                top: Some(Length::Css("1in".to_string())),
                ..Default::default()
            }),
            page_ranges: Some("1-2".to_string()),
            ..Default::default()
        };
        let params = print_params(&options, &options.layout().unwrap());

        assert_eq!(params.landscape, Some(true));
        assert_eq!(params.print_background, Some(true));
        assert_eq!(params.margin_top, Some(1.0));
        assert_eq!(params.page_ranges.as_deref(), Some("1-2"));
        let width = params.paper_width.unwrap();
        assert!((width - 8.27).abs() < 0.01, "A4 width was {}", width);
    }

    #[test]
    fn test_connection_errors_are_fatal() {
        assert!(is_fatal(&CdpError::NoResponse));
        assert!(!is_fatal(&CdpError::Timeout));
    }

    #[test]
    fn test_args_keep_sandbox_flags_out_of_list() {
        // no_sandbox() on the builder adds these
        assert!(!CHROME_ARGS.contains(&"--no-sandbox"));
        assert!(CHROME_ARGS.contains(&"--disable-dev-shm-usage"));
    }

    #[test]
    fn test_browser_config_builds() {
        let factory = ChromiumFactory::new(ChromiumConfig {
            chrome_path: Some(PathBuf::from("/usr/bin/chromium")),
            extra_args: vec!["--lang=en-US".to_string()],
            ..Default::default()
        });
        let dir = std::env::temp_dir().join("pdf-render-config-test");
        assert!(factory.browser_config(&dir).is_ok());
    }
}
