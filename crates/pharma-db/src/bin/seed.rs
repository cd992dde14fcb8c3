//! # Seed Data Generator
//!
//! Populates the database with branches, a pharmacy catalog, staff accounts
//! and stock batches for local development.
//!
//! ## Usage
//! ```bash
//! cargo run -p pharma-db --bin seed
//!
//! # Specify database path
//! cargo run -p pharma-db --bin seed -- --db ./data/quickpharma.db
//! ```
//!
//! ## Generated Data
//! - Two branches (Manama, Riffa) and four cities, one of them unserved
//! - Categories, product types and suppliers
//! - Over-the-counter, prescription and controlled products
//! - One account per role, all on the Manama branch except the Admin
//! - Stock batches with staggered expiry dates, including one already expired

use chrono::{Duration, Utc};
use std::env;

use pharma_core::checkout::AddressInput;
use pharma_core::health::ConditionKind;
use pharma_core::{Role, User};
use pharma_db::repository::inventory::NewBatch;
use pharma_db::repository::product::ProductInput;
use pharma_db::repository::user::NewUser;
use pharma_db::{Database, DbConfig};

/// (name, price in fils, controlled, requires prescription, category index)
const PRODUCTS: &[(&str, i64, bool, bool, usize)] = &[
    ("Panadol 500mg", 1500, false, false, 0),
    ("Brufen 400mg", 1800, false, false, 0),
    ("Vitamin C 1000mg", 3200, false, false, 1),
    ("Omega 3 Capsules", 5400, false, false, 1),
    ("Amoxicillin 500mg", 2500, false, true, 2),
    ("Azithromycin 250mg", 3800, false, true, 2),
    ("Tramadol 50mg", 4000, true, true, 0),
    ("Diazepam 5mg", 3500, true, true, 3),
    ("Cetirizine 10mg", 1200, false, false, 4),
    ("Salbutamol Inhaler", 2900, false, true, 4),
];

const CATEGORIES: &[&str] = &["Pain Relief", "Vitamins", "Antibiotics", "Sedatives", "Allergy"];

/// (email, role, branch)
const STAFF: &[(&str, Role, Option<i64>)] = &[
    ("admin@quickpharma.bh", Role::Admin, None),
    ("manager@quickpharma.bh", Role::Manager, Some(1)),
    ("pharmacist@quickpharma.bh", Role::Pharmacist, Some(1)),
    ("driver@quickpharma.bh", Role::Driver, Some(1)),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./quickpharma.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("QuickPharmaPlus Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./quickpharma.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 QuickPharmaPlus Seed Data Generator");
    println!("=====================================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    if !db.catalog().branches().await?.is_empty() {
        println!("⚠ Database already has branches");
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    // Branches and the city → branch mapping
    sqlx::query("INSERT INTO branches (id, name) VALUES (1, 'Manama Branch'), (2, 'Riffa Branch')")
        .execute(db.pool())
        .await?;
    sqlx::query(
        "INSERT INTO cities (id, name, branch_id) VALUES
            (1, 'Manama', 1), (2, 'Riffa', 2), (3, 'Isa Town', 2), (4, 'Hawar', NULL)",
    )
    .execute(db.pool())
    .await?;
    sqlx::query("UPDATE branches SET city_id = id").execute(db.pool()).await?;
    println!("✓ Branches and cities");

    let mut staff: Vec<User> = Vec::new();
    for (email, role, branch_id) in STAFF {
        let user = db
            .users()
            .create(&NewUser {
                email: email.to_string(),
                first_name: role.to_string(),
                last_name: "Account".to_string(),
                role: *role,
                branch_id: *branch_id,
            })
            .await?;
        staff.push(user);
    }
    let admin = staff[0].clone();

    let customer = db
        .users()
        .create(&NewUser {
            email: "customer@quickpharma.bh".to_string(),
            first_name: "Fatima".to_string(),
            last_name: "Ali".to_string(),
            role: Role::Customer,
            branch_id: None,
        })
        .await?;
    db.users()
        .set_profile_address(
            customer.id,
            &AddressInput {
                city_id: Some(1),
                block: "304".into(),
                road: "3802".into(),
                building: "12".into(),
            },
        )
        .await?;
    println!("✓ {} users", staff.len() + 1);

    let mut category_ids = Vec::new();
    for name in CATEGORIES {
        category_ids.push(db.catalog().create_category(admin.id, name, None).await?.id);
    }
    let tablet = db.catalog().create_product_type(admin.id, "Tablet").await?;
    let supplier = db
        .catalog()
        .create_supplier(admin.id, "Gulf Pharma", Some("orders@gulfpharma.bh"))
        .await?;

    let today = Utc::now().date_naive();
    let mut generated = 0;
    for (idx, (name, price_fils, is_controlled, requires_prescription, category)) in PRODUCTS.iter().enumerate() {
        let product = db
            .products()
            .create(
                admin.id,
                &ProductInput {
                    name: name.to_string(),
                    description: None,
                    price_fils: *price_fils,
                    is_controlled: *is_controlled,
                    requires_prescription: *requires_prescription,
                    category_id: category_ids[*category],
                    product_type_id: tablet.id,
                    supplier_id: Some(supplier.id),
                },
            )
            .await?;

        // Two batches in Manama with different expiries so FEFO has a choice,
        // one in Riffa. Every fourth product gets an already-expired batch.
        let batches = [
            (1, 20 + idx as i64, Some(today + Duration::days(30 + idx as i64 * 7))),
            (1, 40, Some(today + Duration::days(365))),
            (2, 15, None),
        ];
        for (branch_id, quantity, expiry_date) in batches {
            db.inventory()
                .create(
                    &admin,
                    &NewBatch {
                        product_id: product.id,
                        branch_id,
                        quantity,
                        expiry_date,
                    },
                )
                .await?;
        }
        if idx % 4 == 0 {
            sqlx::query("INSERT INTO inventory (product_id, branch_id, quantity, expiry_date) VALUES (?1, 1, 5, ?2)")
                .bind(product.id)
                .bind(today - Duration::days(3))
                .execute(db.pool())
                .await?;
        }
        generated += 1;
    }
    println!("✓ {} products with stock", generated);

    // A penicillin allergy so the Amoxicillin page shows a warning.
    sqlx::query("INSERT INTO ingredients (id, name) VALUES (1, 'Paracetamol'), (2, 'Amoxicillin'), (3, 'Ibuprofen')")
        .execute(db.pool())
        .await?;
    sqlx::query("INSERT INTO product_ingredients (product_id, ingredient_id) VALUES (1, 1), (2, 3), (5, 2)")
        .execute(db.pool())
        .await?;
    sqlx::query("INSERT INTO allergies (id, name) VALUES (1, 'Penicillin')")
        .execute(db.pool())
        .await?;
    sqlx::query("INSERT INTO allergy_ingredients (allergy_id, ingredient_id) VALUES (1, 2)")
        .execute(db.pool())
        .await?;
    db.users().add_condition(customer.id, ConditionKind::Allergy, 1).await?;
    println!("✓ Health profile data");

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
