//! # QuickPharmaPlus API
//!
//! REST server for the pharmacy storefront and the staff portal.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            API Server                                   │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────────┐│
//! │  │  Storefront    │  │  Pharmacy      │  │  Back office               ││
//! │  │                │  │                │  │                            ││
//! │  │ • Products     │  │ • Prescription │  │ • Inventory                ││
//! │  │ • Cart         │  │ • Prescription │  │ • SupplierOrders           ││
//! │  │ • Wishlist     │  │   Plan         │  │ • DeliveryRequests         ││
//! │  │ • Slots        │  │                │  │ • Dashboard / Reports      ││
//! │  │ • Checkout     │  │                │  │ • Logs                     ││
//! │  └────────────────┘  └────────────────┘  └────────────────────────────┘│
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      Infrastructure                               │  │
//! │  │                                                                   │  │
//! │  │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────────┐│  │
//! │  │  │  SQLite      │  │  Notifier    │  │    JWT Auth              ││  │
//! │  │  │  (pharma-db) │  │  Payments    │  │                          ││  │
//! │  │  └──────────────┘  └──────────────┘  └──────────────────────────┘│  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! Environment variables, see [`config::ApiConfig::load`]:
//! - `HTTP_PORT` - listen port (default: 8080)
//! - `DATABASE_PATH` - SQLite file (default: ./quickpharma.db)
//! - `JWT_SECRET` - Secret for JWT verification
//! - `PAYMENT_GATEWAY_URL` / `NOTIFY_WEBHOOK_URL` - external collaborators
//! - `RUST_LOG` - tracing filter (default: info)

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod services;

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Utc};

use crate::auth::JwtManager;
use crate::services::{
    HttpPaymentGateway, LogNotifier, NoPaymentGateway, Notifier, PaymentGateway, WebhookNotifier,
};
use pharma_db::Database;

// Re-exports
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::router;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<ApiConfig>,
    pub jwt: Arc<JwtManager>,
    pub notifier: Arc<dyn Notifier>,
    pub payments: Arc<dyn PaymentGateway>,
}

impl AppState {
    /// Wires the collaborators named by the configuration.
    pub fn from_config(db: Database, config: ApiConfig) -> Self {
        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url)),
            None => Arc::new(LogNotifier),
        };
        let payments: Arc<dyn PaymentGateway> = match &config.payment_gateway_url {
            Some(url) => Arc::new(HttpPaymentGateway::new(url)),
            None => Arc::new(NoPaymentGateway),
        };
        AppState::new(db, config, notifier, payments)
    }

    pub fn new(
        db: Database,
        config: ApiConfig,
        notifier: Arc<dyn Notifier>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        let jwt = Arc::new(JwtManager::new(config.jwt_secret.clone(), config.jwt_lifetime_secs));
        AppState {
            db,
            config: Arc::new(config),
            jwt,
            notifier,
            payments,
        }
    }
}

/// Server clock. All dates and slot cut-offs use UTC.
pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}
