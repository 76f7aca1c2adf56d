//! Headless Chrome integration tests for render-pool
//!
//! These tests require Chrome/Chromium to be installed.
//! Run with: cargo test -p render-pool --test chromium_tests
//!
//! To skip these tests locally when Chrome isn't installed:
//!   SKIP_BROWSER_TESTS=1 cargo test -p render-pool --test chromium_tests

#![cfg(feature = "chromium")]

use std::path::PathBuf;
use std::time::Duration;

use render_pool::{
    ChromiumConfig, ChromiumFactory, Length, Margin, PdfOptions, PoolConfig, PoolError, WorkerPool,
};
use tokio_test::assert_ok;

/// Check if browser tests should be skipped (when Chrome isn't available)
fn should_skip() -> bool {
    std::env::var("SKIP_BROWSER_TESTS").is_ok()
}

/// Macro to skip test if Chrome isn't available
macro_rules! skip_if_no_chrome {
    () => {
        if should_skip() {
            eprintln!("Skipping test: SKIP_BROWSER_TESTS is set");
            return;
        }
    };
}

/// CHROME_PATH, then Chrome for Testing installed by Puppeteer
fn find_chrome() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_PATH") {
        return Some(PathBuf::from(path));
    }

    let home = std::env::var("HOME").ok()?;
    let puppeteer_cache = std::path::Path::new(&home).join(".cache/puppeteer/chrome");
    let mut versions: Vec<_> = std::fs::read_dir(&puppeteer_cache)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    versions.sort_by_key(|p| std::cmp::Reverse(p.clone()));

    versions.into_iter().find_map(|dir| {
        [
            "chrome-linux64/chrome",
            "chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
            "chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
        ]
        .iter()
        .map(|rel| dir.join(rel))
        .find(|p| p.exists())
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Launch a Chrome-backed pool, or `None` when Chrome isn't installed
async fn require_pool(config: PoolConfig) -> Option<WorkerPool> {
    init_tracing();
    let factory = ChromiumFactory::new(ChromiumConfig {
        chrome_path: find_chrome(),
        ..Default::default()
    });

    match WorkerPool::launch(config, factory).await {
        Ok(pool) => Some(pool),
        Err(PoolError::Startup(message)) if message.contains("Could not auto detect") => {
            eprintln!("Skipping: Chrome not installed ({})", message);
            None
        }
        Err(e) => panic!("Unexpected browser error: {}", e),
    }
}

fn pool_config() -> PoolConfig {
    PoolConfig {
        render_timeout_ms: 20_000,
        ..PoolConfig::new(1, 2)
    }
}

#[tokio::test]
async fn test_renders_simple_document() {
    skip_if_no_chrome!();

    let Some(pool) = require_pool(pool_config()).await else {
        return;
    };

    let pdf = assert_ok!(
        pool.render("<h1>Hello PDF</h1>", PdfOptions::default())
            .await
    );
    assert!(pdf.starts_with(b"%PDF"), "output should be a PDF");
    assert!(pdf.len() > 500);

    pool.drain().await;
}

#[tokio::test]
async fn test_options_change_output() {
    skip_if_no_chrome!();

    let Some(pool) = require_pool(pool_config()).await else {
        return;
    };

    let html = "<p>Options</p>";
    let portrait = assert_ok!(pool.render(html, PdfOptions::default()).await);
    let landscape = assert_ok!(
        pool.render(
            html,
            PdfOptions {
                format: Some("A4".to_string()),
                landscape: Some(true),
                margin: Some(Margin {
                    top: Some(Length::Css("2cm".to_string())),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .await
    );
    assert_ne!(portrait, landscape);

    pool.drain().await;
}

#[tokio::test]
async fn test_invalid_option_is_render_error() {
    skip_if_no_chrome!();

    let Some(pool) = require_pool(pool_config()).await else {
        return;
    };

    let err = pool
        .render(
            "<p>x</p>",
            PdfOptions {
                format: Some("postcard".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Render(_)));

    // Worker is still usable
    assert_ok!(pool.render("<p>after</p>", PdfOptions::default()).await);
    assert_eq!(pool.stats().crashes, 0);

    pool.drain().await;
}

#[tokio::test]
async fn test_concurrent_renders_and_drain() {
    skip_if_no_chrome!();

    let Some(pool) = require_pool(PoolConfig {
        idle_timeout_ms: 500,
        ..pool_config()
    })
    .await
    else {
        return;
    };

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.render(format!("<h2>Document {}</h2>", i), PdfOptions::default())
                    .await
            })
        })
        .collect();

    for handle in handles {
        let pdf = handle.await.expect("task panicked").expect("render failed");
        assert!(pdf.starts_with(b"%PDF"));
    }

    let stats = pool.stats();
    assert!(stats.peak_busy <= 2);
    assert_eq!(stats.completed, 4);

    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.drain().await;

    let stats = pool.stats();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.renderers_created, stats.renderers_closed);
}
