//! Tests for the PDF server
//!
//! HTTP tests run against the real router over a pool of mock renderers, so no
//! browser is needed.

mod property_tests {
    use proptest::prelude::*;
    use render_pool::PoolError;
    use serde_json::json;

    use crate::api::GenerateRequest;
    use crate::error::ServerError;

    const KNOWN_OPTIONS: &[&str] = &["format", "width", "height", "landscape", "scale", "margin"];

    proptest! {
        #[test]
        fn any_content_deserializes(content in ".{0,200}") {
            let request: GenerateRequest =
                serde_json::from_value(json!({ "content": content.clone() })).unwrap();
            prop_assert_eq!(request.content, content);
        }

        #[test]
        fn unknown_option_keys_are_ignored(
            key in "[a-z]{3,10}".prop_filter("known option", |k| !KNOWN_OPTIONS.contains(&k.as_str()))
        ) {
            let body = json!({ "content": "<p>x</p>", "options": { key: true } });
            let request: Result<GenerateRequest, _> = serde_json::from_value(body);
            prop_assert!(request.is_ok());
        }

        #[test]
        fn render_errors_are_server_errors(message in ".{0,50}") {
            let error = ServerError::Pool(PoolError::Render(message));
            prop_assert!(error.status().is_server_error());
        }

        #[test]
        fn validation_errors_are_client_errors(message in ".{0,50}") {
            let error = ServerError::Pool(PoolError::Validation(message));
            prop_assert!(error.status().is_client_error());
        }
    }
}

mod http_endpoint_tests {
    //! HTTP endpoint integration tests using axum-test

    use std::time::Duration;

    use axum::http::{header, StatusCode};
    use axum_test::TestServer;
    use pretty_assertions::assert_eq;
    use render_pool::mock::MockFactory;
    use render_pool::{PoolConfig, WorkerPool};
    use serde_json::json;
    use tokio_test::assert_ok;

    use crate::{router, AppState};

    /// Create a test server with the full router over a mock pool
    async fn create_test_server() -> (TestServer, WorkerPool) {
        create_test_server_with(PoolConfig::new(1, 2), MockFactory::new()).await
    }

    async fn create_test_server_with(
        config: PoolConfig,
        factory: MockFactory,
    ) -> (TestServer, WorkerPool) {
        let pool = WorkerPool::launch(config, factory).await.unwrap();
        let app = router(AppState { pool: pool.clone() }, 1024 * 1024);
        (TestServer::new(app).unwrap(), pool)
    }

    #[tokio::test]
    async fn test_health_returns_200() {
        let (server, _pool) = create_test_server().await;
        let response = server.get("/health").await;
        response.assert_status_ok();

        let json = response.json::<serde_json::Value>();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "pdf-server");
        assert_eq!(json["pool"]["live"], 1);
        assert_eq!(json["pool"]["accepting"], true);
    }

    #[tokio::test]
    async fn test_generate_returns_pdf() {
        let (server, _pool) = create_test_server().await;

        let response = server
            .post("/pdf/generate")
            .json(&json!({ "content": "<h1>Invoice 42</h1>" }))
            .await;

        response.assert_status_ok();
        assert_eq!(response.header(header::CONTENT_TYPE), "application/pdf");
        let body = response.as_bytes();
        assert!(body.starts_with(b"%PDF"));
        assert!(String::from_utf8_lossy(body).contains("<h1>Invoice 42</h1>"));
    }

    #[tokio::test]
    async fn test_legacy_root_route_renders() {
        let (server, _pool) = create_test_server().await;

        let response = server
            .post("/")
            .json(&json!({ "content": "<p>legacy</p>" }))
            .await;

        response.assert_status_ok();
        assert_eq!(response.header(header::CONTENT_TYPE), "application/pdf");
    }

    #[tokio::test]
    async fn test_generate_accepts_options() {
        let (server, _pool) = create_test_server().await;

        let response = server
            .post("/pdf/generate")
            .json(&json!({
                "content": "<p>options</p>",
                "options": {
                    "format": "A4",
                    "printBackground": true,
                    "margin": { "top": "1cm", "bottom": 20 }
                }
            }))
            .await;

        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_empty_content_is_bad_request() {
        let factory = MockFactory::new();
        let (server, _pool) = create_test_server_with(PoolConfig::new(1, 1), factory.clone()).await;

        for body in [json!({ "content": "" }), json!({ "content": "   " }), json!({})] {
            let response = server.post("/pdf/generate").json(&body).await;
            response.assert_status_bad_request();
            assert_eq!(response.text(), "Content can't be empty");
        }
        assert_eq!(factory.renders(), 0);
    }

    #[tokio::test]
    async fn test_non_json_body_is_bad_request() {
        let (server, _pool) = create_test_server().await;

        let response = server.post("/pdf/generate").text("<h1>raw html</h1>").await;
        response.assert_status_bad_request();
    }

    #[tokio::test]
    async fn test_render_failure_is_plain_text_500() {
        let (server, _pool) = create_test_server().await;

        let response = server
            .post("/pdf/generate")
            .json(&json!({ "content": MockFactory::FAIL_MARKER }))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response
            .header(header::CONTENT_TYPE)
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert!(response.text().contains("Render failed"));
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[tokio::test]
    async fn test_crash_is_retryable_and_service_recovers() {
        let (server, pool) = create_test_server().await;

        let response = server
            .post("/pdf/generate")
            .json(&json!({ "content": MockFactory::CRASH_MARKER }))
            .await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.header(header::RETRY_AFTER), "1");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while pool.stats().live == 0 {
            assert!(tokio::time::Instant::now() < deadline, "worker was not restarted");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let response = server
            .post("/pdf/generate")
            .json(&json!({ "content": "<p>after crash</p>" }))
            .await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_full_queue_is_retryable_500() {
        let config = PoolConfig {
            max_queue_depth: Some(1),
            queue_timeout_ms: Some(20),
            ..PoolConfig::new(1, 1)
        };
        let factory = MockFactory::new().with_delay(Duration::from_millis(300));
        let (server, pool) = create_test_server_with(config, factory).await;

        let busy = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.render("<p>slow</p>", Default::default()).await
            })
        };
        while pool.stats().busy == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let response = server
            .post("/pdf/generate")
            .json(&json!({ "content": "<p>waiting</p>" }))
            .await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.text().contains("Pool exhausted"));
        assert_eq!(response.header(header::RETRY_AFTER), "1");

        assert_ok!(busy.await.unwrap());
    }

    #[tokio::test]
    async fn test_pool_renders_beside_http_requests() {
        let (server, pool) = create_test_server().await;

        let direct = assert_ok!(pool.render("<p>direct</p>", Default::default()).await);
        let response = server
            .post("/pdf/generate")
            .json(&json!({ "content": "<p>direct</p>" }))
            .await;

        response.assert_status_ok();
        assert_eq!(&response.as_bytes()[..], direct.as_slice());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_requests() {
        let (server, pool) = create_test_server().await;
        pool.drain().await;

        let response = server
            .post("/pdf/generate")
            .json(&json!({ "content": "<p>late</p>" }))
            .await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.text(), "Pool is closed");

        let json = server.get("/health").await.json::<serde_json::Value>();
        assert_eq!(json["status"], "draining");
    }

    #[tokio::test]
    async fn test_api_docs_describe_render_endpoint() {
        let (server, _pool) = create_test_server().await;

        let response = server.get("/v3/api-docs").await;
        response.assert_status_ok();

        let json = response.json::<serde_json::Value>();
        assert_eq!(json["openapi"], "3.0.0");
        assert_eq!(json["info"]["title"], "HTML to PDF API");
        assert!(json["paths"]["/pdf/generate"]["post"].is_object());
    }

    #[tokio::test]
    async fn test_swagger_ui_served_at_root() {
        let (server, _pool) = create_test_server().await;

        let response = server.get("/").await;
        response.assert_status_ok();
        let html = response.text();
        assert!(html.contains("swagger-ui"));
        assert!(html.contains("/v3/api-docs"));
    }

    #[tokio::test]
    async fn test_identical_requests_render_independently() {
        let factory = MockFactory::new();
        let (server, _pool) = create_test_server_with(PoolConfig::new(1, 1), factory.clone()).await;
        let body = json!({ "content": "<p>same</p>" });

        let first = server.post("/pdf/generate").json(&body).await;
        let second = server.post("/pdf/generate").json(&body).await;

        first.assert_status_ok();
        second.assert_status_ok();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(factory.renders(), 2);
    }
}
