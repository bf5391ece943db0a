//! Mock order REST backend for integration tests.
//!
//! - `GET /orders` returns the current order list
//! - `POST /orders/{id}/status` records the request and answers with the
//!   configured status code; on success it also updates the stored order

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Backend {
    orders: Mutex<Vec<Value>>,
    status_requests: Mutex<Vec<(String, Value)>>,
    snapshot_calls: AtomicU32,
    /// 0 means 200 with the updated order echoed back.
    status_code: AtomicU16,
}

/// A mock REST server for testing.
pub struct MockRestServer {
    addr: SocketAddr,
    backend: Arc<Backend>,
    task: JoinHandle<()>,
}

impl MockRestServer {
    /// Start a new mock REST server on an available port.
    pub async fn start() -> Self {
        let backend = Arc::new(Backend::default());
        let app = Router::new()
            .route("/orders", get(list_orders))
            .route("/orders/{id}/status", post(update_status))
            .with_state(backend.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            backend,
            task,
        }
    }

    /// Base URL for both `snapshot_url` and `status_url`.
    pub fn orders_url(&self) -> String {
        format!("http://{}/orders", self.addr)
    }

    /// Replace the order list served by `GET /orders`.
    pub fn set_orders(&self, orders: Vec<Value>) {
        *self.backend.orders.lock() = orders;
    }

    /// Answer status updates with this non-2xx code.
    pub fn fail_status_updates(&self, code: u16) {
        self.backend.status_code.store(code, Ordering::SeqCst);
    }

    pub fn snapshot_calls(&self) -> u32 {
        self.backend.snapshot_calls.load(Ordering::SeqCst)
    }

    /// Recorded `(id, body)` pairs of status updates.
    pub fn status_requests(&self) -> Vec<(String, Value)> {
        self.backend.status_requests.lock().clone()
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn list_orders(State(backend): State<Arc<Backend>>) -> Json<Value> {
    backend.snapshot_calls.fetch_add(1, Ordering::SeqCst);
    Json(Value::Array(backend.orders.lock().clone()))
}

async fn update_status(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    backend
        .status_requests
        .lock()
        .push((id.clone(), body.clone()));

    let code = backend.status_code.load(Ordering::SeqCst);
    if code != 0 {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(json!({"error": "rejected"})));
    }

    let mut orders = backend.orders.lock();
    let updated = orders
        .iter_mut()
        .find(|order| order["id"] == id.as_str())
        .map(|order| {
            order["status"] = body["status"].clone();
            order.clone()
        });
    match updated {
        Some(order) => (StatusCode::OK, Json(json!({ "order": order }))),
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "unknown order"}))),
    }
}
