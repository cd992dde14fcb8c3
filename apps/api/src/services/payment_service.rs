//! Payment session verification.
//!
//! Online checkout is accepted only when the provider reports the session
//! as paid. The check happens before the checkout transaction opens.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;

use crate::error::{ApiError, ErrorCode};

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("network error: {0}")]
    Network(String),
    #[error("payment provider error: {0}")]
    Provider(String),
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        tracing::error!(error = %err, "Payment verification failed");
        ApiError::new(ErrorCode::PaymentError, "Payment provider unavailable")
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Whether the external session has completed payment.
    async fn is_paid(&self, session_id: &str) -> Result<bool, PaymentError>;
}

#[derive(Deserialize)]
struct SessionResponse {
    status: String,
}

/// Asks the provider at `GET {base_url}/sessions/{id}`.
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str) -> Self {
        HttpPaymentGateway {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn is_paid(&self, session_id: &str) -> Result<bool, PaymentError> {
        let response = self
            .client
            .get(format!("{}/sessions/{}", self.base_url, session_id))
            .send()
            .await
            .map_err(|e| PaymentError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(PaymentError::Provider(format!("status {}", response.status())));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;
        debug!(session_id, status = %session.status, "Payment session checked");
        Ok(session.status.eq_ignore_ascii_case("paid"))
    }
}

/// No provider configured: nothing is ever paid.
pub struct NoPaymentGateway;

#[async_trait]
impl PaymentGateway for NoPaymentGateway {
    async fn is_paid(&self, _session_id: &str) -> Result<bool, PaymentError> {
        Ok(false)
    }
}

/// Fixed set of paid sessions. For tests.
#[derive(Default)]
pub struct StaticPaymentGateway {
    paid: HashSet<String>,
}

impl StaticPaymentGateway {
    pub fn with_paid(sessions: &[&str]) -> Self {
        StaticPaymentGateway {
            paid: sessions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl PaymentGateway for StaticPaymentGateway {
    async fn is_paid(&self, session_id: &str) -> Result<bool, PaymentError> {
        Ok(self.paid.contains(session_id))
    }
}
