//! HTTP client for the order snapshot and status-update endpoints.

use crate::error::{ApiError, ApiResult};
use orderflow_core::{OrderId, OrderPatch, OrderRecord, OrderStatus};
use parking_lot::Mutex;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Records decoded from one snapshot response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotBatch {
    pub records: Vec<OrderRecord>,
    /// Records that failed to decode and were skipped.
    pub skipped: usize,
}

/// Body of `POST {status_url}/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
}

/// Optional body of a successful status update.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateResponse {
    #[serde(default)]
    pub order: Option<OrderPatch>,
}

/// Trait for the order backend.
///
/// Abstracts the REST endpoints so the engine can be driven by a test
/// double.
pub trait OrderApi: Send + Sync {
    /// Fetch the full order collection.
    fn fetch_orders(&self) -> BoxFuture<'_, ApiResult<SnapshotBatch>>;

    /// Request a status change. Resolves to the updated order if the server
    /// returned one.
    fn update_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> BoxFuture<'_, ApiResult<Option<OrderPatch>>>;
}

/// Arc wrapper for OrderApi trait objects.
pub type DynOrderApi = Arc<dyn OrderApi>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct OrderClientConfig {
    pub snapshot_url: String,
    pub status_url: String,
    /// Sent as `Authorization: Bearer <token>` when set.
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

/// reqwest-backed `OrderApi`.
pub struct OrderClient {
    client: Client,
    config: OrderClientConfig,
}

impl OrderClient {
    pub fn new(config: OrderClientConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// `{status_url}/{id}/status`, with the id path-escaped.
    pub fn status_endpoint(&self, id: &OrderId) -> ApiResult<Url> {
        let mut url = Url::parse(&self.config.status_url)
            .map_err(|e| ApiError::HttpClient(format!("Invalid status_url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| ApiError::HttpClient("status_url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(id.as_str())
            .push("status");
        Ok(url)
    }

    async fn get_snapshot(&self) -> ApiResult<SnapshotBatch> {
        debug!(url = %self.config.snapshot_url, "Fetching order snapshot");

        let response = self
            .authorized(self.client.get(&self.config.snapshot_url))
            .send()
            .await
            .map_err(|e| ApiError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ApiError::HttpClient(format!("Failed to parse response: {e}")))?;

        parse_snapshot(body)
    }

    async fn post_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> ApiResult<Option<OrderPatch>> {
        let url = self.status_endpoint(&id)?;
        info!(order_id = %id, %status, "Sending status update");

        let response = self
            .authorized(self.client.post(url))
            .json(&StatusUpdateRequest { status })
            .send()
            .await
            .map_err(|e| ApiError::HttpClient(format!("HTTP request failed: {e}")))?;

        let http_status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !http_status.is_success() {
            return Err(ApiError::Status {
                status: http_status.as_u16(),
                body,
            });
        }

        Ok(parse_status_response(&id, &body))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }
}

impl OrderApi for OrderClient {
    fn fetch_orders(&self) -> BoxFuture<'_, ApiResult<SnapshotBatch>> {
        Box::pin(self.get_snapshot())
    }

    fn update_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> BoxFuture<'_, ApiResult<Option<OrderPatch>>> {
        Box::pin(self.post_status(id.clone(), status))
    }
}

/// Decode a snapshot body. The body must be an array; records that fail
/// to decode are skipped individually.
pub fn parse_snapshot(body: serde_json::Value) -> ApiResult<SnapshotBatch> {
    let serde_json::Value::Array(entries) = body else {
        return Err(ApiError::UnexpectedResponse(
            "snapshot response is not an array".to_string(),
        ));
    };

    let mut batch = SnapshotBatch::default();
    for (idx, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<OrderRecord>(entry) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                warn!(idx, error = %e, "Skipping malformed snapshot record");
                batch.skipped += 1;
            }
        }
    }
    Ok(batch)
}

/// Extract the updated order from a status-update body, if any.
///
/// Empty, non-JSON, or order-less bodies yield `None`, as does an order
/// whose id differs from the one requested.
pub fn parse_status_response(id: &OrderId, body: &str) -> Option<OrderPatch> {
    if body.trim().is_empty() {
        return None;
    }
    let response: StatusUpdateResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            debug!(order_id = %id, error = %e, "Status update body carries no order");
            return None;
        }
    };

    match response.order {
        Some(order) if &order.id == id => Some(order),
        Some(order) => {
            warn!(requested = %id, returned = %order.id, "Status update returned another order");
            None
        }
        None => None,
    }
}

/// Scripted result for `MockOrderApi::update_status`.
#[derive(Debug, Clone)]
pub enum MockStatusResult {
    /// Success, optionally echoing an order.
    Ok(Option<OrderPatch>),
    /// Non-2xx answer with this status code.
    Rejected(u16),
    /// Transport failure.
    Unreachable,
}

/// Mock order backend for testing.
#[derive(Debug)]
pub struct MockOrderApi {
    snapshot: Mutex<Vec<OrderRecord>>,
    snapshot_fails: AtomicBool,
    snapshot_calls: AtomicU32,
    update_result: Mutex<MockStatusResult>,
    update_delay: Mutex<Duration>,
    updates: Mutex<Vec<(OrderId, OrderStatus)>>,
}

impl Default for MockOrderApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOrderApi {
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(Vec::new()),
            snapshot_fails: AtomicBool::new(false),
            snapshot_calls: AtomicU32::new(0),
            update_result: Mutex::new(MockStatusResult::Ok(None)),
            update_delay: Mutex::new(Duration::ZERO),
            updates: Mutex::new(Vec::new()),
        }
    }

    /// Set the records returned by `fetch_orders`.
    pub fn set_snapshot(&self, records: Vec<OrderRecord>) {
        *self.snapshot.lock() = records;
    }

    pub fn set_snapshot_fails(&self, fails: bool) {
        self.snapshot_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_update_result(&self, result: MockStatusResult) {
        *self.update_result.lock() = result;
    }

    /// Delay before `update_status` resolves.
    pub fn set_update_delay(&self, delay: Duration) {
        *self.update_delay.lock() = delay;
    }

    pub fn snapshot_calls(&self) -> u32 {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    /// Recorded status updates.
    pub fn updates(&self) -> Vec<(OrderId, OrderStatus)> {
        self.updates.lock().clone()
    }
}

impl OrderApi for MockOrderApi {
    fn fetch_orders(&self) -> BoxFuture<'_, ApiResult<SnapshotBatch>> {
        Box::pin(async move {
            self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
            if self.snapshot_fails.load(Ordering::SeqCst) {
                return Err(ApiError::HttpClient("mock snapshot failure".to_string()));
            }
            Ok(SnapshotBatch {
                records: self.snapshot.lock().clone(),
                skipped: 0,
            })
        })
    }

    fn update_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> BoxFuture<'_, ApiResult<Option<OrderPatch>>> {
        let id = id.clone();
        Box::pin(async move {
            self.updates.lock().push((id, status));
            let delay = *self.update_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = self.update_result.lock().clone();
            match result {
                MockStatusResult::Ok(order) => Ok(order),
                MockStatusResult::Rejected(status) => Err(ApiError::Status {
                    status,
                    body: "mock rejection".to_string(),
                }),
                MockStatusResult::Unreachable => {
                    Err(ApiError::HttpClient("mock transport failure".to_string()))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    fn id(s: &str) -> OrderId {
        OrderId::new(s).unwrap()
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str, token: Option<&str>) -> OrderClient {
        OrderClient::new(OrderClientConfig {
            snapshot_url: format!("{base}/orders"),
            status_url: format!("{base}/orders"),
            auth_token: token.map(str::to_string),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_snapshot_skips_bad_records() {
        let body = json!([
            {"id": "A1", "status": "pending", "customer": "X", "date": "2025-01-01", "time": "10:00", "amount": 100},
            {"id": "A2", "status": "pending"},
            {"id": "A3", "status": "cancelled", "customer": "Y", "date": "18/11/2025", "time": "17:26", "amount": "PKR 1,500.00"}
        ]);
        let batch = parse_snapshot(body).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.records[1].amount.minor_units, 150_000);
    }

    #[test]
    fn test_parse_snapshot_requires_array() {
        let result = parse_snapshot(json!({"orders": []}));
        assert!(matches!(result, Err(ApiError::UnexpectedResponse(_))));
    }

    #[test]
    fn test_parse_status_response() {
        let a1 = id("A1");
        assert!(parse_status_response(&a1, "").is_none());
        assert!(parse_status_response(&a1, "OK").is_none());
        assert!(parse_status_response(&a1, r#"{"success":true}"#).is_none());
        assert!(
            parse_status_response(&a1, r#"{"order":{"id":"B9","status":"confirmed"}}"#).is_none()
        );

        let order =
            parse_status_response(&a1, r#"{"order":{"id":"A1","status":"confirmed"}}"#).unwrap();
        assert_eq!(order.status, Some(OrderStatus::Confirmed));
    }

    #[test]
    fn test_status_endpoint_escapes_id() {
        let client = client("http://localhost:9000", None);
        let url = client.status_endpoint(&id("A 1/x")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/orders/A%201%2Fx/status");
    }

    #[tokio::test]
    async fn test_fetch_orders_sends_bearer_token() {
        let app = Router::new().route(
            "/orders",
            get(|headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if auth != "Bearer secret" {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"error": "no"})));
                }
                (
                    StatusCode::OK,
                    Json(json!([{"id": "A1", "status": "pending", "customer": "X",
                                 "date": "2025-01-01", "time": "10:00", "amount": 100}])),
                )
            }),
        );
        let base = serve(app).await;

        let batch = client(&base, Some("secret")).fetch_orders().await.unwrap();
        assert_eq!(batch.records.len(), 1);

        let err = client(&base, None).fetch_orders().await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 401, .. }));
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_update_status_round_trip() {
        let app = Router::new().route(
            "/orders/{id}/status",
            post(|Path(id): Path<String>, Json(body): Json<Value>| async move {
                let status = body["status"].clone();
                match id.as_str() {
                    "A1" => (
                        StatusCode::OK,
                        Json(json!({"order": {"id": "A1", "status": status}})),
                    ),
                    _ => (StatusCode::CONFLICT, Json(json!({"error": "illegal"}))),
                }
            }),
        );
        let base = serve(app).await;
        let client = client(&base, None);

        let order = client
            .update_status(&id("A1"), OrderStatus::Preparing)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, Some(OrderStatus::Preparing));

        let err = client
            .update_status(&id("B2"), OrderStatus::Preparing)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"), None)
            .fetch_orders()
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::HttpClient(_)));
        assert!(!err.is_rejection());
    }

    #[tokio::test]
    async fn test_mock_records_updates() {
        let mock = MockOrderApi::new();
        mock.set_update_result(MockStatusResult::Rejected(500));

        let err = mock
            .update_status(&id("A1"), OrderStatus::Confirmed)
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(mock.updates(), vec![(id("A1"), OrderStatus::Confirmed)]);

        mock.set_snapshot_fails(true);
        assert!(mock.fetch_orders().await.is_err());
        assert_eq!(mock.snapshot_calls(), 1);
    }
}
