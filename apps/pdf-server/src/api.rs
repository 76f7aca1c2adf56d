//! API handlers for the PDF server
//!
//! Provides REST endpoints for:
//! - HTML to PDF rendering
//! - Health and pool statistics
//! - OpenAPI document and Swagger UI

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use render_pool::{PdfOptions, PoolStats};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::ServerError;
use crate::AppState;

/// Body of a render request
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Missing content is reported as empty content
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub options: PdfOptions,
}

/// Handler: POST /pdf/generate (and the legacy POST /)
#[instrument(skip_all)]
pub async fn handle_generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, ServerError> {
    let Json(request) = payload?;
    debug!(html_len = request.content.len(), "Render requested");

    let pdf = state.pool.render(request.content, request.options).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/pdf")],
        pdf,
    )
        .into_response())
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub pool: PoolStats,
}

/// Handler: GET /health
pub async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = state.pool.stats();
    let status = match (pool.accepting, pool.live) {
        (false, _) => "draining",
        (true, 0) => "degraded",
        (true, _) => "healthy",
    };

    Json(HealthResponse {
        status,
        service: "pdf-server",
        version: env!("CARGO_PKG_VERSION"),
        pool,
    })
}

/// Handler: GET /v3/api-docs
pub async fn handle_api_docs() -> Json<Value> {
    Json(openapi_spec())
}

/// Handler: GET /
pub async fn handle_swagger_ui() -> Html<&'static str> {
    Html(SWAGGER_UI_HTML)
}

/// OpenAPI 3.0 description of the render endpoint
pub fn openapi_spec() -> Value {
    let render_operation = json!({
        "summary": "Generate a PDF from HTML content",
        "requestBody": {
            "required": true,
            "content": {
                "application/json": {
                    "schema": { "$ref": "#/components/schemas/GenerateRequest" }
                }
            }
        },
        "responses": {
            "200": {
                "description": "The rendered PDF",
                "content": {
                    "application/pdf": {
                        "schema": { "type": "string", "format": "binary" }
                    }
                }
            },
            "400": {
                "description": "Empty content or malformed request body",
                "content": { "text/plain": { "schema": { "type": "string" } } }
            },
            "500": {
                "description": "Rendering failed, timed out, or no worker was available",
                "content": { "text/plain": { "schema": { "type": "string" } } }
            }
        }
    });

    let length = json!({
        "oneOf": [
            { "type": "number", "description": "Pixels" },
            { "type": "string", "example": "1.5cm" }
        ]
    });

    json!({
        "openapi": "3.0.0",
        "info": {
            "title": "HTML to PDF API",
            "version": "1.0.0"
        },
        "paths": {
            "/pdf/generate": { "post": render_operation },
            "/health": {
                "get": {
                    "summary": "Service health and worker pool statistics",
                    "responses": { "200": { "description": "Health report" } }
                }
            }
        },
        "components": {
            "schemas": {
                "GenerateRequest": {
                    "type": "object",
                    "required": ["content"],
                    "properties": {
                        "content": { "type": "string", "description": "HTML document" },
                        "options": { "$ref": "#/components/schemas/PdfOptions" }
                    }
                },
                "PdfOptions": {
                    "type": "object",
                    "properties": {
                        "format": {
                            "type": "string",
                            "enum": ["Letter", "Legal", "Tabloid", "Ledger", "A0", "A1", "A2", "A3", "A4", "A5", "A6"]
                        },
                        "width": length,
                        "height": length,
                        "landscape": { "type": "boolean" },
                        "printBackground": { "type": "boolean" },
                        "scale": { "type": "number", "minimum": 0.1, "maximum": 2.0 },
                        "margin": {
                            "type": "object",
                            "properties": {
                                "top": length,
                                "right": length,
                                "bottom": length,
                                "left": length
                            }
                        },
                        "pageRanges": { "type": "string", "example": "1-3, 5" },
                        "displayHeaderFooter": { "type": "boolean" },
                        "headerTemplate": { "type": "string" },
                        "footerTemplate": { "type": "string" },
                        "preferCSSPageSize": { "type": "boolean" }
                    }
                }
            }
        }
    })
}

const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <title>API Docs</title>
  <link rel="stylesheet" type="text/css" href="https://petstore.swagger.io/swagger-ui.css">
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://petstore.swagger.io/swagger-ui-bundle.js"></script>
  <script src="https://petstore.swagger.io/swagger-ui-standalone-preset.js"></script>
  <script>
    window.onload = function () {
      window.ui = SwaggerUIBundle({
        url: "/v3/api-docs",
        dom_id: "#swagger-ui",
        deepLinking: true,
        presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
        plugins: [SwaggerUIBundle.plugins.DownloadUrl],
        layout: "StandaloneLayout"
      });
    };
  </script>
</body>
</html>
"##;
