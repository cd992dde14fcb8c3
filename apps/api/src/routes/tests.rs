use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::services::{Notification, RecordingNotifier, StaticPaymentGateway};
use crate::{router, ApiConfig, AppState};
use pharma_core::{Role, User};
use pharma_db::repository::user::NewUser;
use pharma_db::{Database, DbConfig};

struct TestApp {
    app: Router,
    state: AppState,
    notifier: Arc<RecordingNotifier>,
    customer: User,
    manager: User,
    pharmacist: User,
    driver: User,
    unassigned: User,
}

async fn exec(db: &Database, sql: &str) {
    sqlx::query(sql).execute(db.pool()).await.unwrap();
}

async fn user(db: &Database, email: &str, role: Role, branch_id: Option<i64>) -> User {
    db.users()
        .create(&NewUser {
            email: email.to_string(),
            first_name: "Test".to_string(),
            last_name: role.to_string(),
            role,
            branch_id,
        })
        .await
        .unwrap()
}

/// Two branches, Panadol (id 1, OTC) and Amoxicillin (id 2, prescription only).
async fn test_app() -> TestApp {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    exec(&db, "INSERT INTO branches (id, name) VALUES (1, 'Manama Branch'), (2, 'Riffa Branch')").await;
    exec(&db, "INSERT INTO cities (id, name, branch_id) VALUES (1, 'Manama', 1), (2, 'Riffa', 2)").await;
    exec(&db, "INSERT INTO categories (id, name) VALUES (1, 'Pain Relief')").await;
    exec(&db, "INSERT INTO product_types (id, name) VALUES (1, 'Tablet')").await;
    exec(&db, "INSERT INTO suppliers (id, name, email) VALUES (1, 'Gulf Pharma', 'orders@gulfpharma.bh')").await;
    exec(
        &db,
        "INSERT INTO products (id, name, price_fils, is_controlled, requires_prescription, category_id, product_type_id, supplier_id) VALUES
            (1, 'Panadol', 1500, 0, 0, 1, 1, 1),
            (2, 'Amoxicillin', 2500, 0, 1, 1, 1, 1)",
    )
    .await;

    let customer = user(&db, "customer@test.bh", Role::Customer, None).await;
    let manager = user(&db, "manager@test.bh", Role::Manager, Some(1)).await;
    let pharmacist = user(&db, "pharmacist@test.bh", Role::Pharmacist, Some(1)).await;
    let driver = user(&db, "driver@test.bh", Role::Driver, Some(1)).await;
    let unassigned = user(&db, "floating@test.bh", Role::Manager, None).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::new(
        db,
        ApiConfig::for_tests(),
        notifier.clone(),
        Arc::new(StaticPaymentGateway::with_paid(&["sess_paid"])),
    );

    TestApp {
        app: router(state.clone()),
        state,
        notifier,
        customer,
        manager,
        pharmacist,
        driver,
        unassigned,
    }
}

impl TestApp {
    fn token(&self, user: &User) -> String {
        self.state.jwt.generate_token(user).unwrap()
    }

    async fn send(&self, method: &str, uri: &str, as_user: Option<&User>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(u) = as_user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", self.token(u)));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn add_batch(&self, product_id: i64, branch_id: i64, quantity: i64) -> i64 {
        sqlx::query_scalar("INSERT INTO inventory (product_id, branch_id, quantity) VALUES (?1, ?2, ?3) RETURNING id")
            .bind(product_id)
            .bind(branch_id)
            .bind(quantity)
            .fetch_one(self.state.db.pool())
            .await
            .unwrap()
    }

    async fn batch_quantity(&self, id: i64) -> i64 {
        sqlx::query_scalar("SELECT quantity FROM inventory WHERE id = ?1")
            .bind(id)
            .fetch_one(self.state.db.pool())
            .await
            .unwrap()
    }

    async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(self.state.db.pool())
            .await
            .unwrap()
    }
}

fn pickup_cash(branch_id: i64) -> Value {
    json!({ "mode": "Pickup", "branchId": branch_id, "paymentMethod": "Cash" })
}

#[tokio::test]
async fn test_health() {
    let t = test_app().await;
    let (status, body) = t.send("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn test_cart_requires_token() {
    let t = test_app().await;
    let (status, body) = t.send("GET", "/api/Cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_product_search_rejects_bad_page_size() {
    let t = test_app().await;
    let (status, body) = t.send("GET", "/api/Products?pageSize=0", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = t.send("GET", "/api/Products?search=pana&pageSize=5", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCount"], 1);
    assert_eq!(body["items"][0]["name"], "Panadol");
}

#[tokio::test]
async fn test_checkout_pickup_in_stock() {
    let t = test_app().await;
    let batch = t.add_batch(1, 1, 5).await;

    let (status, _) = t
        .send("POST", "/api/Cart", Some(&t.customer), Some(json!({ "productId": 1, "quantity": 2, "branchId": 1 })))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = t.send("POST", "/api/Checkout", Some(&t.customer), Some(pickup_cash(1))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let order_id = body["orderId"].as_i64().unwrap();

    assert_eq!(t.batch_quantity(batch).await, 3);
    assert_eq!(t.count("cart_items").await, 0);
    assert_eq!(
        t.notifier.sent(),
        vec![Notification::OrderPlaced {
            email: "customer@test.bh".to_string(),
            order_id,
            total_fils: 3000,
        }]
    );
}

#[tokio::test]
async fn test_checkout_prescribed_item_without_prescription() {
    let t = test_app().await;
    let batch = t.add_batch(2, 1, 5).await;
    t.send("POST", "/api/Cart", Some(&t.customer), Some(json!({ "productId": 2, "quantity": 1, "branchId": 1 })))
        .await;

    let (status, body) = t.send("POST", "/api/Checkout", Some(&t.customer), Some(pickup_cash(1))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], "Approved prescription is required for prescribed items");
    assert_eq!(body["details"]["reason"], "PRESCRIPTION_REQUIRED");

    assert_eq!(t.count("orders").await, 0);
    assert_eq!(t.batch_quantity(batch).await, 5);
    assert!(t.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_checkout_online_needs_paid_session() {
    let t = test_app().await;
    t.add_batch(1, 1, 5).await;
    t.send("POST", "/api/Cart", Some(&t.customer), Some(json!({ "productId": 1, "quantity": 1, "branchId": 1 })))
        .await;

    let unpaid = json!({ "mode": "Pickup", "branchId": 1, "paymentMethod": "Online", "paymentSessionId": "sess_open" });
    let (status, body) = t.send("POST", "/api/Checkout", Some(&t.customer), Some(unpaid)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"]["reason"], "PAYMENT_NOT_COMPLETED");

    let paid = json!({ "mode": "Pickup", "branchId": 1, "paymentMethod": "Online", "paymentSessionId": "sess_paid" });
    let (status, _) = t.send("POST", "/api/Checkout", Some(&t.customer), Some(paid)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_checkout_is_customer_only() {
    let t = test_app().await;
    let (status, _) = t.send("POST", "/api/Checkout", Some(&t.manager), Some(pickup_cash(1))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_supplier_order_without_branch() {
    let t = test_app().await;
    let (status, body) = t
        .send(
            "POST",
            "/api/SupplierOrders",
            Some(&t.unassigned),
            Some(json!({ "supplierId": 1, "productId": 1, "quantity": 50 })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Employee branch not found");
    assert_eq!(t.count("supplier_orders").await, 0);
}

#[tokio::test]
async fn test_delivery_status_change_notifies_customer() {
    let t = test_app().await;
    t.add_batch(1, 1, 5).await;
    t.send("POST", "/api/Cart", Some(&t.customer), Some(json!({ "productId": 1, "quantity": 1, "branchId": 1 })))
        .await;
    let (_, placed) = t.send("POST", "/api/Checkout", Some(&t.customer), Some(pickup_cash(1))).await;
    let order_id = placed["orderId"].as_i64().unwrap();

    let uri = format!("/api/DeliveryRequests/{order_id}/status");
    let (status, _) = t.send("PUT", &uri, Some(&t.customer), Some(json!({ "status": "Confirmed" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t.send("PUT", &uri, Some(&t.driver), Some(json!({ "status": "Confirmed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Confirmed");

    let sent = t.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[1],
        Notification::OrderStatusChanged {
            email: "customer@test.bh".to_string(),
            order_id,
            status: "Confirmed".to_string(),
        }
    );

    let (status, _) = t.send("PUT", &uri, Some(&t.driver), Some(json!({ "status": "Pending" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_prescription_rejection_notifies_owner() {
    let t = test_app().await;
    let upload = json!({
        "name": "Antibiotics",
        "document": "aGVsbG8=",
        "cprDocument": "aGVsbG8=",
        "branchId": 1,
    });
    let (status, body) = t.send("POST", "/api/Prescription", Some(&t.customer), Some(upload)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["id"].as_i64().unwrap();

    let (status, pending) = t.send("GET", "/api/Prescription/pending", Some(&t.pharmacist), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["totalCount"], 1);

    let uri = format!("/api/Prescription/{id}/reject");
    let (status, _) = t.send("POST", &uri, Some(&t.customer), Some(json!({ "reason": "Unreadable" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t
        .send("POST", &uri, Some(&t.pharmacist), Some(json!({ "reason": "Unreadable" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Rejected");
    assert_eq!(
        t.notifier.sent(),
        vec![Notification::PrescriptionRejected {
            email: "customer@test.bh".to_string(),
            prescription_name: "Antibiotics".to_string(),
            reason: "Unreadable".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_dashboard_is_staff_only() {
    let t = test_app().await;
    let (status, _) = t.send("GET", "/api/Dashboard", Some(&t.customer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t.send("GET", "/api/Dashboard", Some(&t.manager), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["branchId"], 1);
}

#[tokio::test]
async fn test_dev_token() {
    let t = test_app().await;
    let (status, body) = t
        .send("POST", "/api/Auth/dev-token", None, Some(json!({ "email": "customer@test.bh" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], t.customer.id);
    let claims = t.state.jwt.validate_token(body["token"].as_str().unwrap()).unwrap();
    assert_eq!(claims.sub, t.customer.id.to_string());

    let (status, _) = t
        .send("POST", "/api/Auth/dev-token", None, Some(json!({ "email": "nobody@test.bh" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
