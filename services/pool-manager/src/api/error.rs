//! Failure responses for the HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::PoolError;

/// Body of a failed operation.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct FailureBody {
    pub op: String,
    pub state: String,
    pub message: String,
}

/// An operation that failed. Always answered with 500.
#[derive(Debug)]
pub struct ApiError {
    pub op: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
        }
    }

    pub fn from_pool(op: &'static str, err: PoolError) -> Self {
        Self::new(op, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(op = self.op, error = %self.message, "Pool operation failed");

        let body = FailureBody {
            op: self.op.to_string(),
            state: "failed".to_string(),
            message: self.message,
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::from_pool("start", PoolError::NoRuntime).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: FailureBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.op, "start");
        assert_eq!(body.state, "failed");
        assert_eq!(body.message, "pool workers need a running tokio runtime");
    }
}
