//! Shared fixtures for repository tests.

use chrono::{NaiveDate, Utc};

use crate::repository::user::NewUser;
use crate::{Database, DbConfig};
use pharma_core::{Role, User};

pub(crate) struct Fixture {
    pub db: Database,
    pub today: NaiveDate,
    /// City with no branch mapping.
    pub unmapped_city: i64,
    pub branch: i64,
    pub other_branch: i64,
    /// Over-the-counter product, "Panadol", 1.500 BHD.
    pub product: i64,
    /// Prescription-only product, "Amoxicillin", 2.500 BHD.
    pub prescribed: i64,
    /// Controlled prescription product, "Tramadol", 4.000 BHD.
    pub controlled: i64,
    pub customer: User,
    pub admin: User,
    pub manager: User,
    pub pharmacist: User,
    pub driver: User,
    /// A Manager with no branch assigned.
    pub unassigned: User,
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

pub(crate) async fn fixture() -> Fixture {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();

    exec(&db, "INSERT INTO branches (id, name) VALUES (1, 'Manama Branch'), (2, 'Riffa Branch')").await;
    exec(
        &db,
        "INSERT INTO cities (id, name, branch_id) VALUES (1, 'Manama', 1), (2, 'Riffa', 2), (3, 'Hawar', NULL)",
    )
    .await;
    exec(&db, "UPDATE branches SET city_id = id").await;
    exec(&db, "INSERT INTO categories (id, name) VALUES (1, 'Pain Relief')").await;
    exec(&db, "INSERT INTO product_types (id, name) VALUES (1, 'Tablet')").await;
    exec(&db, "INSERT INTO suppliers (id, name, email) VALUES (1, 'Gulf Pharma', 'orders@gulfpharma.bh')").await;
    exec(
        &db,
        "INSERT INTO products (id, name, price_fils, is_controlled, requires_prescription, category_id, product_type_id, supplier_id) VALUES
            (1, 'Panadol', 1500, 0, 0, 1, 1, 1),
            (2, 'Amoxicillin', 2500, 0, 1, 1, 1, 1),
            (3, 'Tramadol', 4000, 1, 1, 1, 1, 1)",
    )
    .await;

    let customer = user(&db, "customer@test.bh", Role::Customer, None).await;
    let admin = user(&db, "admin@test.bh", Role::Admin, None).await;
    let manager = user(&db, "manager@test.bh", Role::Manager, Some(1)).await;
    let pharmacist = user(&db, "pharmacist@test.bh", Role::Pharmacist, Some(1)).await;
    let driver = user(&db, "driver@test.bh", Role::Driver, Some(1)).await;
    let unassigned = user(&db, "floating@test.bh", Role::Manager, None).await;

    let address = db
        .users()
        .set_profile_address(
            customer.id,
            &pharma_core::checkout::AddressInput {
                city_id: Some(1),
                block: "304".into(),
                road: "3802".into(),
                building: "12".into(),
            },
        )
        .await
        .unwrap();
    let customer = User {
        profile_address_id: Some(address.id),
        ..customer
    };

    Fixture {
        db,
        today: Utc::now().date_naive(),
        unmapped_city: 3,
        branch: 1,
        other_branch: 2,
        product: 1,
        prescribed: 2,
        controlled: 3,
        customer,
        admin,
        manager,
        pharmacist,
        driver,
        unassigned,
    }
}

/// Inserts a batch and returns its id.
pub(crate) async fn add_batch(
    db: &Database,
    product_id: i64,
    branch_id: i64,
    quantity: Option<i64>,
    expiry: Option<NaiveDate>,
) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO inventory (product_id, branch_id, quantity, expiry_date) VALUES (?1, ?2, ?3, ?4) RETURNING id",
    )
    .bind(product_id)
    .bind(branch_id)
    .bind(quantity)
    .bind(expiry)
    .fetch_one(db.pool())
    .await
    .unwrap()
}

/// Puts a product in the user's cart directly.
pub(crate) async fn add_to_cart(db: &Database, user_id: i64, product_id: i64, quantity: i64) {
    sqlx::query("INSERT INTO cart_items (user_id, product_id, quantity) VALUES (?1, ?2, ?3)")
        .bind(user_id)
        .bind(product_id)
        .bind(quantity)
        .execute(db.pool())
        .await
        .unwrap();
}

/// Row count of a table.
pub(crate) async fn count(db: &Database, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(db.pool())
        .await
        .unwrap()
}
