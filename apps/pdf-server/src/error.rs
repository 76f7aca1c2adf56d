//! Error types for the PDF server
//!
//! Every failure is answered with a plain-text body. Client mistakes are 400,
//! everything else is 500.

use axum::{
    extract::rejection::JsonRejection,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use render_pool::PoolError;
use thiserror::Error;
use tracing::error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Pool(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ServerError::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        ServerError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::Pool(PoolError::Validation(msg)) => msg.clone(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "Request failed");
        }

        let retry = matches!(&self, ServerError::Pool(e) if e.is_retryable());
        let mut response = (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            message,
        )
            .into_response();
        if retry {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ServerError::Pool(PoolError::Validation("Content can't be empty".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServerError::InvalidRequest("bad json".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServerError::Pool(PoolError::Render("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServerError::Pool(PoolError::Exhausted("full".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ServerError::Pool(PoolError::Closed),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status(), expected, "{:?}", error);
        }
    }

    #[test]
    fn test_retryable_errors_set_retry_after() {
        let response = ServerError::Pool(PoolError::WorkerCrashed { worker_id: 3 }).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");

        let response = ServerError::Pool(PoolError::Render("bad".into())).into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
