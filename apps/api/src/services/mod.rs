//! Collaborators outside the database: email notifications, the payment
//! provider, and the reminder job.

pub mod notification_service;
pub mod payment_service;
pub mod reminder_service;

pub use notification_service::{notify, LogNotifier, Notification, Notifier, RecordingNotifier, WebhookNotifier};
pub use payment_service::{HttpPaymentGateway, NoPaymentGateway, PaymentGateway, StaticPaymentGateway};
