//! # Prescription Lifecycle
//!
//! ```text
//!              approve                 latest approval expiry < today
//!   Pending ─────────────► Approved ─────────────────────────────► Expired
//!      │                                (health prescriptions only,
//!      │ reject                          swept when read)
//!      ▼
//!   Rejected
//! ```
//!
//! Transitions only move forward. The one automatic transition is the
//! expiry sweep, which the database layer runs before prescriptions are
//! listed.

use chrono::{Duration, NaiveDate};

use crate::checkout::DELIVERY_FEE;
use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{Approval, PrescriptionStatus};

/// Checks a manual status change.
pub fn check_transition(from: PrescriptionStatus, to: PrescriptionStatus) -> CoreResult<()> {
    use PrescriptionStatus::*;
    let allowed = matches!((from, to), (Pending, Approved) | (Pending, Rejected));
    if allowed {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            entity: "Prescription",
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Whether an approved health prescription should now read as Expired.
pub fn should_expire(
    status: PrescriptionStatus,
    is_health: bool,
    latest_expiry: Option<NaiveDate>,
    today: NaiveDate,
) -> bool {
    status == PrescriptionStatus::Approved
        && is_health
        && latest_expiry.is_some_and(|exp| exp < today)
}

/// Snapshot total of a plan cycle: approved quantity at today's price,
/// plus the delivery fee when delivered.
pub fn plan_total(unit_price: Money, quantity: i64, is_delivery: bool) -> Money {
    let goods = unit_price.multiply_quantity(quantity);
    if is_delivery {
        goods + DELIVERY_FEE
    } else {
        goods
    }
}

/// Checks that an approval can back a new prescription plan.
pub fn check_plan_eligible(
    status: PrescriptionStatus,
    is_health: bool,
    approval: &Approval,
    today: NaiveDate,
) -> CoreResult<()> {
    if !is_health {
        return Err(CoreError::PlanNotAllowed(
            "only health-profile prescriptions can become plans".to_string(),
        ));
    }
    if status != PrescriptionStatus::Approved {
        return Err(CoreError::PlanNotAllowed(format!(
            "prescription is {}",
            status
        )));
    }
    if approval.expiry_date < today {
        return Err(CoreError::PlanNotAllowed(
            "prescription approval has expired".to_string(),
        ));
    }
    Ok(())
}

/// Next reminder date after `from`.
pub fn next_reminder(from: NaiveDate, interval_days: i64) -> NaiveDate {
    from + Duration::days(interval_days.max(1))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn approval(expiry: NaiveDate) -> Approval {
        Approval {
            id: 1,
            prescription_id: 1,
            pharmacist_id: 1,
            product_id: 1,
            product_name: "Metformin".into(),
            quantity: 2,
            dosage: "500mg".into(),
            expiry_date: expiry,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_transitions_only_from_pending() {
        use PrescriptionStatus::*;
        assert!(check_transition(Pending, Approved).is_ok());
        assert!(check_transition(Pending, Rejected).is_ok());
        assert!(check_transition(Approved, Rejected).is_err());
        assert!(check_transition(Rejected, Approved).is_err());
        assert!(check_transition(Expired, Approved).is_err());
    }

    #[test]
    fn test_expires_day_after_approval_expiry() {
        let yesterday = today().pred_opt().unwrap();
        assert!(should_expire(PrescriptionStatus::Approved, true, Some(yesterday), today()));
        assert!(!should_expire(PrescriptionStatus::Approved, true, Some(today()), today()));
        assert!(!should_expire(PrescriptionStatus::Approved, false, Some(yesterday), today()));
        assert!(!should_expire(PrescriptionStatus::Pending, true, Some(yesterday), today()));
        assert!(!should_expire(PrescriptionStatus::Approved, true, None, today()));
    }

    #[test]
    fn test_plan_total() {
        let price = Money::from_fils(2500);
        assert_eq!(plan_total(price, 2, false).fils(), 5000);
        assert_eq!(plan_total(price, 2, true).fils(), 6000);
    }

    #[test]
    fn test_plan_eligibility() {
        let valid = approval(today());
        assert!(check_plan_eligible(PrescriptionStatus::Approved, true, &valid, today()).is_ok());
        assert!(check_plan_eligible(PrescriptionStatus::Approved, false, &valid, today()).is_err());
        assert!(check_plan_eligible(PrescriptionStatus::Expired, true, &valid, today()).is_err());

        let stale = approval(today().pred_opt().unwrap());
        assert!(check_plan_eligible(PrescriptionStatus::Approved, true, &stale, today()).is_err());
    }

    #[test]
    fn test_next_reminder() {
        assert_eq!(
            next_reminder(today(), 30),
            NaiveDate::from_ymd_opt(2026, 4, 9).unwrap()
        );
    }
}
