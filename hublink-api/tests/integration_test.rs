use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use hublink_api::{app, AppState, Backends};
use hublink_core::{CoreResult, RateLimiter};
use hublink_catalog::{Catalog, Courier, Hub, Zone};
use hublink_order::{MockCourierAdapter, MockRefundConnector};
use hublink_store::{Config, LocalLocks, MemoryStore, RecordingPublisher};

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    courier: Arc<MockCourierAdapter>,
    refunds: Arc<MockRefundConnector>,
    hub_a: Uuid,
    hub_b: Uuid,
}

fn config(webhook_secret: Option<&str>) -> Config {
    serde_json::from_value(json!({
        "server": {"port": 0},
        "database": {"url": "postgres://unused"},
        "redis": {"url": "redis://unused"},
        "courier": {
            "environment": "sandbox",
            "sandbox_url": "http://courier.invalid",
            "live_url": "http://courier.invalid",
            "username": "u",
            "password": "p",
            "quote_timeout_ms": 50
        },
        "commerce": {
            "base_url": "http://shop.invalid",
            "consumer_key": "ck",
            "consumer_secret": "cs",
            "webhook_secret": webhook_secret
        },
        "fulfillment": {
            "default_hub_id": null,
            "fallback_base_rate": "2500",
            "fallback_min_weight_kg": "0",
            "fallback_per_kg_rate": "500",
            "fallback_vat_percentage": "7.5"
        }
    }))
    .unwrap()
}

fn catalog() -> (Catalog, Uuid, Uuid) {
    let courier = Courier {
        id: Uuid::new_v4(),
        name: "Test Logistics".to_string(),
        code: "test".to_string(),
        supports_live_quotes: false,
        is_active: true,
    };
    let hub = |name: &str, state: &str| Hub {
        id: Uuid::new_v4(),
        name: name.to_string(),
        address: format!("1 {} Road", name),
        city: name.to_string(),
        state: state.to_string(),
        phone: None,
        default_courier_id: Some(courier.id),
        is_active: true,
        created_at: Utc::now(),
    };
    let a = hub("Ikeja", "Lagos");
    let b = hub("Bodija", "Oyo");
    let (hub_a, hub_b) = (a.id, b.id);

    let catalog = Catalog {
        hubs: vec![a, b],
        couriers: vec![courier],
        zones: vec![Zone {
            id: Uuid::new_v4(),
            name: "South West".to_string(),
            states: vec!["Lagos".to_string(), "Oyo".to_string()],
            position: 1,
        }],
        rates: vec![],
    };
    (catalog, hub_a, hub_b)
}

/// Refuses every request.
struct ExhaustedLimiter;

#[async_trait]
impl RateLimiter for ExhaustedLimiter {
    async fn allow(&self, _key: &str, _limit: i64, _window_seconds: i64) -> CoreResult<bool> {
        Ok(false)
    }
}

fn setup_with(webhook_secret: Option<&str>, refunds: MockRefundConnector) -> TestApp {
    build(webhook_secret, refunds, None)
}

fn build(
    webhook_secret: Option<&str>,
    refunds: MockRefundConnector,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
) -> TestApp {
    let (catalog, hub_a, hub_b) = catalog();
    let store = Arc::new(MemoryStore::with_catalog(catalog));
    let courier = Arc::new(MockCourierAdapter::new());
    let refunds = Arc::new(refunds);

    let backends = Backends {
        orders: store.clone(),
        returns: store.clone(),
        catalog: store.clone(),
        courier: courier.clone(),
        refunds: refunds.clone(),
        locks: Arc::new(LocalLocks::new()),
        events: Arc::new(RecordingPublisher::new()),
        rate_limiter,
    };
    let state = AppState::new(&config(webhook_secret), backends);

    TestApp {
        router: app(state),
        store,
        courier,
        refunds,
        hub_a,
        hub_b,
    }
}

fn setup() -> TestApp {
    setup_with(None, MockRefundConnector::new())
}

fn order_payload(t: &TestApp, external_id: &str) -> Value {
    let line = |name: &str, weight: &str, price: &str, hub: Uuid| {
        json!({
            "name": name,
            "quantity": 1,
            "price": price,
            "total": price,
            "weight": weight,
            "meta_data": [{"key": "_hub_id", "value": hub.to_string()}]
        })
    };
    json!({
        "id": external_id,
        "status": "processing",
        "billing": {"first_name": "Ada", "last_name": "Obi", "email": "ada@example.com", "phone": "0803"},
        "shipping": {"address_1": "4 Ring Rd", "city": "Ibadan", "state": "Oyo"},
        "line_items": [
            line("Kettle", "1", "5000", t.hub_a),
            line("Blender", "2", "12000", t.hub_a),
            line("Mug", "0.5", "1500", t.hub_b)
        ],
        "total": "24500",
        "shipping_total": "6000"
    })
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    send_request(router, request).await
}

async fn send_request(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn ingest(t: &TestApp, external_id: &str) -> Value {
    let (status, body) = send(
        &t.router,
        "POST",
        "/webhooks/commerce/order-created",
        Some(order_payload(t, external_id)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn test_order_webhook_is_idempotent() {
    let t = setup();
    let first = ingest(&t, "5001").await;
    assert_eq!(first["sub_order_ids"].as_array().unwrap().len(), 2);

    let (status, second) = send(
        &t.router,
        "POST",
        "/webhooks/commerce/order-created",
        Some(order_payload(&t, "5001")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["created"], json!(false));
    assert_eq!(second["order_id"], first["order_id"]);
    assert_eq!(t.store.order_count().await, 1);

    let (status, order) = send(&t.router, "GET", &format!("/api/orders/{}", first["order_id"].as_str().unwrap()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["external_id"], json!("5001"));
    assert_eq!(order["sub_orders"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_order_webhook_validation_error() {
    let t = setup();
    let (status, body) = send(
        &t.router,
        "POST",
        "/webhooks/commerce/order-created",
        Some(json!({"id": "5002", "line_items": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("billing.email"));
    assert_eq!(t.store.order_count().await, 0);
}

#[tokio::test]
async fn test_order_webhook_signature() {
    let t = setup_with(Some("s3cret"), MockRefundConnector::new());
    let body = order_payload(&t, "5003").to_string();

    let unsigned = Request::builder()
        .method("POST")
        .uri("/webhooks/commerce/order-created")
        .header("x-wc-webhook-signature", "bm9wZQ==")
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, _) = send_request(&t.router, unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(t.store.order_count().await, 0);

    let mut mac = Hmac::<Sha256>::new_from_slice(b"s3cret").unwrap();
    mac.update(body.as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    let signed = Request::builder()
        .method("POST")
        .uri("/webhooks/commerce/order-created")
        .header("x-wc-webhook-signature", signature)
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send_request(&t.router, signed).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_courier_webhook_always_acknowledges() {
    let t = setup();

    let (status, body) = send(&t.router, "POST", "/webhooks/courier", Some(json!({"orderNo": "NOPE", "status": "Delivered"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acknowledged"], json!(true));

    let garbage = Request::builder()
        .method("POST")
        .uri("/webhooks/courier")
        .body(Body::from("not json"))
        .unwrap();
    let (status, _) = send_request(&t.router, garbage).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_dispatch_and_courier_webhook() {
    let t = setup();
    let ingested = ingest(&t, "5004").await;
    let sub_order_id = ingested["sub_order_ids"][0].as_str().unwrap().to_string();

    let (status, dispatched) = send(&t.router, "POST", &format!("/api/sub-orders/{}/dispatch", sub_order_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dispatched["created"], json!(true));
    let tracking = dispatched["sub_order"]["tracking_number"].as_str().unwrap().to_string();

    let (status, _) = send(
        &t.router,
        "POST",
        "/webhooks/courier",
        Some(json!({"orderNo": tracking, "orderStatus": "In Transit", "description": "left Ikeja hub"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, log) = send(&t.router, "GET", &format!("/api/sub-orders/{}/tracking", sub_order_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let statuses: Vec<&str> = log.as_array().unwrap().iter().map(|e| e["status"].as_str().unwrap()).collect();
    assert_eq!(statuses, vec!["pending", "assigned", "in_transit"]);
}

#[tokio::test]
async fn test_dispatch_courier_down_is_bad_gateway() {
    let t = setup();
    let ingested = ingest(&t, "5005").await;
    t.courier.fail_bookings(true);

    let uri = format!("/api/sub-orders/{}/dispatch", ingested["sub_order_ids"][0].as_str().unwrap());
    let (status, _) = send(&t.router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

fn dropoff_return(order_id: &str, email: &str) -> Value {
    json!({
        "order_id": order_id,
        "customer_email": email,
        "method": "dropoff",
        "resolution": "refund",
        "reason": "Arrived cracked",
        "evidence": ["https://img.example.com/1.jpg"]
    })
}

#[tokio::test]
async fn test_return_refund_flow() {
    let t = setup();
    let ingested = ingest(&t, "5006").await;
    let order_id = ingested["order_id"].as_str().unwrap();

    let (status, created) = send(&t.router, "POST", "/api/returns", Some(dropoff_return(order_id, "ada@example.com"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], json!("awaiting_dropoff"));
    let id = created["id"].as_str().unwrap().to_string();

    let (status, shipment) = send(
        &t.router,
        "PATCH",
        &format!("/api/returns/{}/tracking", id),
        Some(json!({"tracking_id": "GIG-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shipment["tracking_id"], json!("GIG-1"));

    let (status, received) = send(&t.router, "POST", &format!("/api/returns/{}/received", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(received["shipment"]["status"], json!("delivered_to_hub"));

    let decision_uri = format!("/api/returns/{}/decision", id);
    let (status, _) = send(&t.router, "POST", &decision_uri, Some(json!({"status": "approved"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, done) = send(
        &t.router,
        "POST",
        &decision_uri,
        Some(json!({"status": "approved", "inspection_result": "damaged", "approved_refund_amount": "5000"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], json!("refund_completed"));
    assert_eq!(done["shipment"]["status"], json!("refund_completed"));
    assert!(done["refund_reference"].is_string());
}

#[tokio::test]
async fn test_return_guards() {
    let t = setup();
    let ingested = ingest(&t, "5007").await;
    let order_id = ingested["order_id"].as_str().unwrap();

    let (status, _) = send(&t.router, "POST", "/api/returns", Some(dropoff_return(order_id, "eve@example.com"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let unknown = Uuid::new_v4().to_string();
    let (status, _) = send(&t.router, "POST", "/api/returns", Some(dropoff_return(&unknown, "ada@example.com"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.router, "GET", &format!("/api/returns/{}", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(t.store.return_count().await, 0);
}

#[tokio::test]
async fn test_failed_refund_surfaces_and_persists() {
    let t = setup_with(None, MockRefundConnector::failing());
    let ingested = ingest(&t, "5008").await;
    let order_id = ingested["order_id"].as_str().unwrap();

    let (_, created) = send(&t.router, "POST", "/api/returns", Some(dropoff_return(order_id, "ada@example.com"))).await;
    let id = created["id"].as_str().unwrap().to_string();
    send(&t.router, "POST", &format!("/api/returns/{}/received", id), None).await;

    let (status, _) = send(
        &t.router,
        "POST",
        &format!("/api/returns/{}/decision", id),
        Some(json!({"status": "approved", "approved_refund_amount": 5000})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, stored) = send(&t.router, "GET", &format!("/api/returns/{}", id), None).await;
    assert_eq!(stored["status"], json!("refund_failed"));
    assert!(stored["refund_completed_at"].is_null());
    assert!(stored["refund_raw"].to_string().contains("payment gateway declined the refund"));

    t.refunds.set_failing(false);
    let (status, retried) = send(&t.router, "POST", &format!("/api/returns/{}/retry-refund", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retried["status"], json!("refund_completed"));
}

#[tokio::test]
async fn test_manual_sync_run() {
    let t = setup();
    let ingested = ingest(&t, "5009").await;
    let sub_order_id = ingested["sub_order_ids"][0].as_str().unwrap();
    let (_, dispatched) = send(&t.router, "POST", &format!("/api/sub-orders/{}/dispatch", sub_order_id), None).await;
    let tracking = dispatched["sub_order"]["tracking_number"].as_str().unwrap().to_string();
    t.courier.set_tracking_status(&tracking, "Out for delivery");

    let (status, report) = send(&t.router, "POST", "/api/sync/run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["checked"], json!(1));
    assert_eq!(report["updated"], json!(1));
}

#[tokio::test]
async fn test_rate_limit_spares_courier_webhook() {
    let t = build(None, MockRefundConnector::new(), Some(Arc::new(ExhaustedLimiter)));
    let from_client = |uri: &str, body: Value| {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 40000))));
        request
    };

    let (status, _) = send_request(
        &t.router,
        from_client("/webhooks/commerce/order-created", order_payload(&t, "9001")),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, body) = send_request(
        &t.router,
        from_client("/webhooks/courier", json!({"orderNo": "FZ-NONE", "status": "Delivered"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"acknowledged": true}));
}
