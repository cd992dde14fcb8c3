//! Outbound customer notifications.
//!
//! Emails are fire-and-forget from the handlers' point of view: a failed
//! send is logged and never fails the request that triggered it.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

/// Something worth telling a customer about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    OrderPlaced {
        email: String,
        order_id: i64,
        total_fils: i64,
    },
    PrescriptionApproved {
        email: String,
        prescription_name: String,
        order_id: Option<i64>,
    },
    PrescriptionRejected {
        email: String,
        prescription_name: String,
        reason: String,
    },
    OrderStatusChanged {
        email: String,
        order_id: i64,
        status: String,
    },
    PlanReminder {
        email: String,
        product_name: String,
        total_fils: i64,
    },
}

fn bhd(fils: i64) -> String {
    format!("{}.{:03} BHD", fils / 1000, fils % 1000)
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Notification::OrderPlaced { email, .. }
            | Notification::PrescriptionApproved { email, .. }
            | Notification::PrescriptionRejected { email, .. }
            | Notification::OrderStatusChanged { email, .. }
            | Notification::PlanReminder { email, .. } => email,
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Notification::OrderPlaced { order_id, .. } => format!("Order #{} received", order_id),
            Notification::PrescriptionApproved { prescription_name, .. } => {
                format!("Prescription '{}' approved", prescription_name)
            }
            Notification::PrescriptionRejected { prescription_name, .. } => {
                format!("Prescription '{}' rejected", prescription_name)
            }
            Notification::OrderStatusChanged { order_id, status, .. } => {
                format!("Order #{} is now {}", order_id, status)
            }
            Notification::PlanReminder { product_name, .. } => format!("Time to refill {}", product_name),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::OrderPlaced { order_id, total_fils, .. } => {
                format!("We received order #{} for {}.", order_id, bhd(*total_fils))
            }
            Notification::PrescriptionApproved { order_id: Some(id), .. } => {
                format!("Your prescription was approved and order #{} has been created.", id)
            }
            Notification::PrescriptionApproved { .. } => {
                "Your prescription was approved. You can now check out or start a plan.".to_string()
            }
            Notification::PrescriptionRejected { reason, .. } => {
                format!("Your prescription could not be approved: {}", reason)
            }
            Notification::OrderStatusChanged { order_id, status, .. } => {
                format!("Order #{} status: {}.", order_id, status)
            }
            Notification::PlanReminder { product_name, total_fils, .. } => {
                format!("Your {} refill ({}) is due.", product_name, bhd(*total_fils))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("network error: {0}")]
    Network(String),
    #[error("webhook returned {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Sends and swallows failures.
pub async fn notify(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.send(&notification).await {
        warn!(to = notification.recipient(), error = %e, "Notification failed");
    }
}

/// Writes notifications to the log. Used when no webhook is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(to = notification.recipient(), subject = %notification.subject(), "Notification");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookEmail<'a> {
    to: &'a str,
    subject: String,
    body: String,
}

/// Posts each notification as JSON to a mail relay webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        WebhookNotifier {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let email = WebhookEmail {
            to: notification.recipient(),
            subject: notification.subject(),
            body: notification.body(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&email)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Keeps every notification in memory. For tests.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let n = Notification::PlanReminder {
            email: "a@b.bh".into(),
            product_name: "Metformin".into(),
            total_fils: 12_500,
        };
        assert_eq!(n.recipient(), "a@b.bh");
        assert_eq!(n.subject(), "Time to refill Metformin");
        assert!(n.body().contains("12.500 BHD"));

        let approved = Notification::PrescriptionApproved {
            email: "a@b.bh".into(),
            prescription_name: "Antibiotics".into(),
            order_id: Some(4),
        };
        assert!(approved.body().contains("order #4"));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let recorder = RecordingNotifier::default();
        notify(
            &recorder,
            Notification::OrderStatusChanged {
                email: "a@b.bh".into(),
                order_id: 1,
                status: "Delivered".into(),
            },
        )
        .await;
        assert_eq!(recorder.sent().len(), 1);
    }
}
