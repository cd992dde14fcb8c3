//! # Validation Module
//!
//! Input validation for QuickPharmaPlus requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Handler (axum)                                               │
//! │  ├── Type validation (JSON / query deserialization)                    │
//! │  └── THIS MODULE: ids, quantities, search terms, paging                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Repository                                                   │
//! │  └── Business rules (stock, slots, prescriptions) via CoreError        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── UNIQUE (cart, wishlist, payment session)                          │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here runs before any query is issued.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use crate::error::ValidationError;
use crate::{DEFAULT_PAGE_SIZE, MAX_ITEM_QUANTITY, MAX_PAGE_SIZE};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_SEARCH_LEN: usize = 100;
const MAX_NAME_LEN: usize = 200;

fn search_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[\p{L}\p{N} \-]*$").ok())
        .as_ref()
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates a free-text search term.
///
/// ## Rules
/// - Empty means "no filter" and yields `None`
/// - At most 100 characters
/// - Letters, digits, spaces and hyphens only
///
/// ## Example
/// ```rust
/// use pharma_core::validation::validate_search;
///
/// assert_eq!(validate_search(Some("  panadol ")).unwrap(), Some("panadol".to_string()));
/// assert_eq!(validate_search(None).unwrap(), None);
/// assert!(validate_search(Some("'; DROP TABLE")).is_err());
/// ```
pub fn validate_search(term: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };

    if term.chars().count() > MAX_SEARCH_LEN {
        return Err(ValidationError::TooLong {
            field: "search".to_string(),
            max: MAX_SEARCH_LEN,
        });
    }

    if !search_pattern().is_some_and(|re| re.is_match(term)) {
        return Err(ValidationError::InvalidFormat {
            field: "search".to_string(),
            reason: "only letters, numbers, spaces and hyphens are allowed".to_string(),
        });
    }

    Ok(Some(term.to_string()))
}

/// Validates a required display name (products, categories, suppliers...).
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

/// Validates a required free-text field such as a dosage or rejection reason.
pub fn validate_required_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Ids are positive.
pub fn validate_id(field: &str, id: i64) -> ValidationResult<()> {
    if id <= 0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Optional id filters, when present, must be positive.
pub fn validate_optional_id(field: &str, id: Option<i64>) -> ValidationResult<()> {
    id.map_or(Ok(()), |id| validate_id(field, id))
}

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (100)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Stock quantity on a batch: zero allowed, negative not.
pub fn validate_stock_quantity(qty: i64) -> ValidationResult<()> {
    if qty < 0 {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 0,
            max: i64::MAX,
        });
    }
    Ok(())
}

/// Validates a price in fils.
///
/// ```rust
/// use pharma_core::validation::validate_price_fils;
///
/// assert!(validate_price_fils(1250).is_ok());
/// assert!(validate_price_fils(0).is_err());
/// ```
pub fn validate_price_fils(fils: i64) -> ValidationResult<()> {
    if fils <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "price".to_string(),
        });
    }
    Ok(())
}

/// An approval expiry date may not lie in the past.
pub fn validate_expiry_not_past(expiry: NaiveDate, today: NaiveDate) -> ValidationResult<()> {
    if expiry < today {
        return Err(ValidationError::InvalidFormat {
            field: "expiryDate".to_string(),
            reason: "must not be in the past".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Paging
// =============================================================================

/// Normalised page request: 1-based page number, bounded page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: i64,
    pub size: i64,
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.number - 1) * self.size
    }
}

/// Validates `pageNumber` / `pageSize` query parameters.
pub fn validate_page(number: Option<i64>, size: Option<i64>) -> ValidationResult<Page> {
    let number = number.unwrap_or(1);
    let size = size.unwrap_or(DEFAULT_PAGE_SIZE);

    if number < 1 {
        return Err(ValidationError::MustBePositive {
            field: "pageNumber".to_string(),
        });
    }
    if !(1..=MAX_PAGE_SIZE).contains(&size) {
        return Err(ValidationError::OutOfRange {
            field: "pageSize".to_string(),
            min: 1,
            max: MAX_PAGE_SIZE,
        });
    }

    Ok(Page { number, size })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_search() {
        assert_eq!(validate_search(Some("Vitamin C-1000")).unwrap(), Some("Vitamin C-1000".into()));
        assert_eq!(validate_search(Some("   ")).unwrap(), None);
        assert_eq!(validate_search(Some("بنادول")).unwrap(), Some("بنادول".into()));

        assert!(validate_search(Some("a%")).is_err());
        assert!(validate_search(Some("x' OR 1=1")).is_err());
        assert!(validate_search(Some(&"a".repeat(101))).is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("name", "Panadol Extra").is_ok());
        assert!(validate_name("name", " ").is_err());
        assert!(validate_name("name", &"A".repeat(300)).is_err());
    }

    #[test]
    fn test_validate_ids() {
        assert!(validate_id("productId", 1).is_ok());
        assert!(validate_id("productId", 0).is_err());
        assert!(validate_id("productId", -4).is_err());
        assert!(validate_optional_id("branchId", None).is_ok());
        assert!(validate_optional_id("branchId", Some(0)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(100).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(101).is_err());

        assert!(validate_stock_quantity(0).is_ok());
        assert!(validate_stock_quantity(-1).is_err());
    }

    #[test]
    fn test_validate_page() {
        assert_eq!(validate_page(None, None).unwrap(), Page { number: 1, size: 20 });
        assert_eq!(validate_page(Some(3), Some(10)).unwrap().offset(), 20);
        assert!(validate_page(Some(0), None).is_err());
        assert!(validate_page(None, Some(500)).is_err());
    }

    #[test]
    fn test_validate_expiry() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert!(validate_expiry_not_past(today, today).is_ok());
        assert!(validate_expiry_not_past(today.pred_opt().unwrap(), today).is_err());
    }
}
