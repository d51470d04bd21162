//! HTTP surface tests, driving the router with `oneshot`.

use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use warmpool_manager::{api, ItemState, Pool, PoolSettings};

struct Harness {
    pool: Pool<String>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new() -> Self {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let pool = Pool::builder(PoolSettings::default())
            .item_factory(|| async { Ok::<_, anyhow::Error>("item".to_string()) })
            .logger({
                let lines = lines.clone();
                move |line: &str| lines.lock().unwrap().push(line.to_string())
            })
            .build()
            .unwrap();
        Self { pool, lines }
    }

    fn router(&self) -> Router {
        api::create_router(self.pool.clone())
    }

    async fn call(&self, method: Method, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    /// Fill the pool without the background loops.
    async fn warm(&self) {
        self.pool.reconcile_once();
        while self.pool.create_next().await {}
    }
}

#[tokio::test]
async fn test_healthz_reports_running() {
    let harness = Harness::new();

    let (status, body) = harness.call(Method::GET, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "pool-manager");
    assert_eq!(body["running"], false);
}

#[tokio::test]
async fn test_start_and_stop() {
    let harness = Harness::new();

    let (status, body) = harness.call(Method::POST, "/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["op"], "start");
    assert_eq!(body["state"], "done");
    assert!(harness.pool.is_running());

    let (_, health) = harness.call(Method::GET, "/healthz").await;
    assert_eq!(health["running"], true);

    let (status, body) = harness.call(Method::POST, "/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["op"], "stop");
    assert!(!harness.pool.is_running());

    harness.pool.shutdown().await;
}

#[tokio::test]
async fn test_use_item_returns_item() {
    let harness = Harness::new();
    harness.warm().await;

    let (status, body) = harness.call(Method::POST, "/useItem").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["op"], "useItem");
    assert_eq!(body["state"], "done");
    assert_eq!(body["result"]["state"], "inUse");
    assert!(body["result"]["lastChange"].is_string());
    assert_eq!(body["result"]["value"], "item");
    assert_eq!(body["result"]["type"], "Pool-Object");
}

#[tokio::test]
async fn test_use_item_on_empty_pool_returns_null() {
    let harness = Harness::new();

    let (status, body) = harness.call(Method::POST, "/useItem").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["result"].is_null());
    assert_eq!(harness.pool.pending_creations(), 1);
}

#[tokio::test]
async fn test_get_items() {
    let harness = Harness::new();
    harness.warm().await;

    let (status, body) = harness.call(Method::GET, "/getItems").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["op"], "getItems");
    let items = body["result"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["state"], "ready");
}

#[tokio::test]
async fn test_create_item_is_queued() {
    let harness = Harness::new();

    let (status, body) = harness.call(Method::POST, "/createItem").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["op"], "createItem");
    assert_eq!(body["state"], "started");
    assert_eq!(harness.pool.pending_creations(), 1);
}

#[tokio::test]
async fn test_delete_item() {
    let harness = Harness::new();
    harness.warm().await;
    let id = harness.pool.get_items()[0].id();

    let (status, body) = harness
        .call(Method::POST, &format!("/deleteItem/{id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["op"], "deleteItem");
    assert_eq!(body["state"], "started");
    assert_eq!(body["result"], id.to_string());

    assert!(harness.pool.delete_next().await);
    assert!(harness.pool.get_items().is_empty());
}

#[tokio::test]
async fn test_delete_item_with_bad_id_fails() {
    let harness = Harness::new();

    let (status, body) = harness.call(Method::POST, "/deleteItem/not-an-id").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["op"], "deleteItem");
    assert_eq!(body["state"], "failed");
    assert!(body["message"].as_str().unwrap().contains("not-an-id"));
}

#[tokio::test]
async fn test_requests_are_logged_through_pool_logger() {
    let harness = Harness::new();
    harness.warm().await;
    harness.lines.lock().unwrap().clear();

    harness.call(Method::GET, "/getItems").await;
    harness.call(Method::POST, "/useItem").await;

    let lines = harness.lines.lock().unwrap();
    assert_eq!(*lines, vec!["GET /getItems".to_string(), "POST /useItem".to_string()]);
    assert_eq!(
        harness.pool.get_items()[0].state(),
        ItemState::InUse
    );
}
