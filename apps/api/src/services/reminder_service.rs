//! Background job: expiry sweep and prescription plan reminders.
//!
//! ```text
//! every REMINDER_JOB_INTERVAL_SECS
//!     │
//!     ├── prescriptions().sweep_all(today)     Approved → Expired, plans too
//!     │
//!     └── plans().due_reminders(today)
//!             │
//!             ├── notify(PlanReminder)
//!             └── advance_reminder(+interval)  only after a successful send
//! ```
//! The job is the only long-lived task in the server.

use chrono::{NaiveDate, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::services::notification_service::Notification;
use crate::AppState;
use pharma_db::DbResult;

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderRun {
    pub expired_prescriptions: usize,
    pub reminders_sent: usize,
}

pub async fn run_once(state: &AppState, today: NaiveDate) -> DbResult<ReminderRun> {
    let expired = state.db.prescriptions().sweep_all(today).await?;

    let plans = state.db.plans();
    let mut sent = 0;
    for due in plans.due_reminders(today).await? {
        let notification = Notification::PlanReminder {
            email: due.email.clone(),
            product_name: due.product_name.clone(),
            total_fils: due.total_fils,
        };
        match state.notifier.send(&notification).await {
            Ok(()) => {
                let next = plans
                    .advance_reminder(due.plan_id, today, state.config.plan_reminder_interval_days)
                    .await?;
                debug!(plan_id = due.plan_id, %next, "Plan reminder sent");
                sent += 1;
            }
            Err(e) => warn!(plan_id = due.plan_id, error = %e, "Plan reminder failed, retrying next run"),
        }
    }

    Ok(ReminderRun {
        expired_prescriptions: expired.len(),
        reminders_sent: sent,
    })
}

/// Runs the job on an interval until `shutdown` flips to true.
pub fn spawn(state: AppState, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.reminder_job_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match run_once(&state, Utc::now().date_naive()).await {
                        Ok(run) if run != ReminderRun::default() => info!(
                            expired = run.expired_prescriptions,
                            reminders = run.reminders_sent,
                            "Reminder job finished"
                        ),
                        Ok(_) => debug!("Reminder job: nothing to do"),
                        Err(e) => error!(error = %e, "Reminder job failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Reminder job stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::RecordingNotifier;
    use crate::services::StaticPaymentGateway;
    use crate::ApiConfig;
    use pharma_db::{Database, DbConfig};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_once_on_empty_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::new(
            db,
            ApiConfig::for_tests(),
            notifier.clone(),
            Arc::new(StaticPaymentGateway::with_paid(&[])),
        );

        let run = run_once(&state, Utc::now().date_naive()).await.unwrap();
        assert_eq!(run, ReminderRun::default());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_job_stops_on_shutdown() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let state = AppState::from_config(db, ApiConfig::for_tests());
        let (tx, rx) = watch::channel(false);

        let handle = spawn(state, rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
