//! HTTP surface over a [`Pool`].
//!
//! Every route maps one verb onto one façade call. Successful calls answer
//! 200 with `{op, state, result}`; failures answer 500 with
//! `{op, state: "failed", message}`.

pub mod error;
mod health;

use axum::{
    extract::{Path, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use warmpool_id::ItemId;

use crate::item::Item;
use crate::pool::Pool;
use error::ApiError;

pub use health::HealthResponse;

/// Body of a successful operation.
#[derive(Debug, Serialize)]
pub struct OpResponse<T> {
    pub op: &'static str,

    /// "done" when the call completed, "started" when work was queued.
    pub state: &'static str,

    pub result: T,
}

impl<T> OpResponse<T> {
    fn done(op: &'static str, result: T) -> Json<Self> {
        Json(Self {
            op,
            state: "done",
            result,
        })
    }

    fn started(op: &'static str, result: T) -> Json<Self> {
        Json(Self {
            op,
            state: "started",
            result,
        })
    }
}

/// Create the router serving `pool`.
pub fn create_router<V>(pool: Pool<V>) -> Router
where
    V: Serialize + Clone + Send + Sync + 'static,
{
    Router::new()
        .merge(health::routes::<V>())
        .route("/start", post(start::<V>))
        .route("/stop", post(stop::<V>))
        .route("/useItem", post(use_item::<V>))
        .route("/getItems", get(get_items::<V>))
        .route("/createItem", post(create_item::<V>))
        .route("/deleteItem/{id}", post(delete_item::<V>))
        .layer(middleware::from_fn_with_state(pool.clone(), log_request::<V>))
        .layer(TraceLayer::new_for_http())
        .with_state(pool)
}

/// Mirror each request into the pool logger.
async fn log_request<V>(State(pool): State<Pool<V>>, request: Request, next: Next) -> Response
where
    V: Clone + Send + Sync + 'static,
{
    pool.log(format!("{} {}", request.method(), request.uri().path()));
    next.run(request).await
}

async fn start<V>(State(pool): State<Pool<V>>) -> Result<Json<OpResponse<()>>, ApiError>
where
    V: Clone + Send + Sync + 'static,
{
    pool.start().map_err(|e| ApiError::from_pool("start", e))?;
    Ok(OpResponse::done("start", ()))
}

async fn stop<V>(State(pool): State<Pool<V>>) -> Json<OpResponse<()>>
where
    V: Clone + Send + Sync + 'static,
{
    pool.stop();
    OpResponse::done("stop", ())
}

async fn use_item<V>(State(pool): State<Pool<V>>) -> Json<OpResponse<Option<Item<V>>>>
where
    V: Serialize + Clone + Send + Sync + 'static,
{
    OpResponse::done("useItem", pool.use_item())
}

async fn get_items<V>(State(pool): State<Pool<V>>) -> Json<OpResponse<Vec<Item<V>>>>
where
    V: Serialize + Clone + Send + Sync + 'static,
{
    OpResponse::done("getItems", pool.get_items())
}

async fn create_item<V>(State(pool): State<Pool<V>>) -> Json<OpResponse<()>>
where
    V: Clone + Send + Sync + 'static,
{
    pool.create_item();
    OpResponse::started("createItem", ())
}

async fn delete_item<V>(
    State(pool): State<Pool<V>>,
    Path(id): Path<String>,
) -> Result<Json<OpResponse<ItemId>>, ApiError>
where
    V: Clone + Send + Sync + 'static,
{
    let id: ItemId = id
        .parse()
        .map_err(|e| ApiError::new("deleteItem", format!("invalid item id {id:?}: {e}")))?;
    pool.delete_item(id);
    Ok(OpResponse::started("deleteItem", id))
}
