//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::pool::Pool;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Always "ok" while the process answers.
    pub status: String,

    pub service: String,
    pub version: String,

    /// Whether the pool's background loops are active.
    pub running: bool,
}

pub fn routes<V>() -> Router<Pool<V>>
where
    V: Clone + Send + Sync + 'static,
{
    Router::new().route("/healthz", get(healthz::<V>))
}

async fn healthz<V>(State(pool): State<Pool<V>>) -> Json<HealthResponse>
where
    V: Clone + Send + Sync + 'static,
{
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "pool-manager".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        running: pool.is_running(),
    })
}
