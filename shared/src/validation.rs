//! Validation utilities for build orders
//!
//! Serial number ranges are entered as text such as `"1,3,5-10"`; the parser
//! here is shared by the server and the browser helpers so both report the
//! same problems.

use std::collections::HashSet;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{is_whole_quantity, unit_count};

/// Longest accepted build reference
pub const MAX_REFERENCE_LENGTH: usize = 64;

/// Most units a single trackable build may produce
pub const MAX_TRACKABLE_UNITS: usize = 10_000;

/// Problems found while parsing a serial number string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .messages.join("; "))]
pub struct SerialNumberError {
    pub messages: Vec<String>,
}

impl SerialNumberError {
    fn single(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }
}

// ============================================================================
// Serial Numbers
// ============================================================================

/// Extract a list of serial numbers from user-entered text.
///
/// Groups are separated by commas or whitespace. A group is either a single
/// number (`"7"`) or an ascending inclusive range (`"5-10"`). The number of
/// distinct serials must equal `expected_quantity`. A range is sized before
/// it is expanded, so text naming more serials than expected is rejected
/// without enumerating them.
pub fn extract_serial_numbers(
    serials: &str,
    expected_quantity: i64,
) -> Result<Vec<i64>, SerialNumberError> {
    let serials = serials.trim();

    if serials.is_empty() {
        return Err(SerialNumberError::single("Empty serial number string"));
    }

    let expected = usize::try_from(expected_quantity)
        .ok()
        .filter(|expected| *expected <= MAX_TRACKABLE_UNITS)
        .ok_or_else(|| SerialNumberError::single(format!("Invalid quantity: {}", expected_quantity)))?;

    let mut numbers: Vec<i64> = Vec::new();
    let mut seen: HashSet<i64> = HashSet::new();
    let mut errors: Vec<String> = Vec::new();

    let groups = serials
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|g| !g.is_empty());

    for group in groups {
        let Some((first, last)) = parse_group(group) else {
            errors.push(format!("Invalid group: {}", group));
            continue;
        };

        if first == last && seen.contains(&first) {
            errors.push(format!("Duplicate serial: {}", first));
            continue;
        }

        let size = last
            .checked_sub(first)
            .and_then(|span| usize::try_from(span).ok())
            .and_then(|span| span.checked_add(1));
        let fits = size.is_some_and(|size| numbers.len().saturating_add(size) <= expected);
        if !fits {
            errors.push(format!(
                "Number of serial numbers exceeds quantity ({})",
                expected_quantity
            ));
            break;
        }

        for n in first..=last {
            if seen.insert(n) {
                numbers.push(n);
            } else {
                errors.push(format!("Duplicate serial: {}", n));
            }
        }
    }

    if !errors.is_empty() {
        return Err(SerialNumberError { messages: errors });
    }

    if numbers.is_empty() {
        return Err(SerialNumberError::single("No serial numbers found"));
    }

    if numbers.len() != expected {
        return Err(SerialNumberError::single(format!(
            "Number of unique serial numbers ({}) must match quantity ({})",
            numbers.len(),
            expected_quantity
        )));
    }

    Ok(numbers)
}

/// Bounds of a single number or an ascending `a-b` range
fn parse_group(group: &str) -> Option<(i64, i64)> {
    match group.split_once('-') {
        Some((a, b)) => {
            let first = a.trim().parse::<i64>().ok()?;
            let last = b.trim().parse::<i64>().ok()?;
            (first < last).then_some((first, last))
        }
        None => group.parse::<i64>().ok().map(|n| (n, n)),
    }
}

/// Serials appearing more than once, in first-seen order
pub fn duplicate_serials(serials: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for serial in serials {
        if !seen.insert(*serial) && !duplicates.contains(serial) {
            duplicates.push(*serial);
        }
    }
    duplicates
}

/// Placeholder text suggesting `count` serials starting at `first`, or None
/// when the range would run past the largest serial number
pub fn format_serial_range(first: i64, count: i64) -> Option<String> {
    if count <= 1 {
        return Some(first.to_string());
    }
    let last = first.checked_add(count - 1)?;
    Some(format!("{}-{}", first, last))
}

/// Render serials as a comma separated list
pub fn join_serials(serials: &[i64]) -> String {
    serials
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// Quantities and References
// ============================================================================

/// Validate the quantity of a build order
pub fn validate_build_quantity(quantity: Decimal, trackable: bool) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Build quantity must be greater than zero");
    }
    if trackable {
        if !is_whole_quantity(quantity) {
            return Err("Trackable parts must be built in whole units");
        }
        match unit_count(quantity) {
            Some(units) if units <= MAX_TRACKABLE_UNITS => {}
            _ => return Err("Trackable builds are limited to 10000 units"),
        }
    }
    Ok(())
}

/// Validate the quantity of a single allocation
pub fn validate_allocation_quantity(
    quantity: Decimal,
    trackable: bool,
) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Allocation quantity must be greater than zero");
    }
    if trackable && quantity != Decimal::ONE {
        return Err("Quantity must be 1 for serialized stock");
    }
    Ok(())
}

/// Validate a build reference
pub fn validate_reference(reference: &str) -> Result<(), &'static str> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err("Build reference cannot be empty");
    }
    if reference.len() > MAX_REFERENCE_LENGTH {
        return Err("Build reference is too long");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    // ========================================================================
    // Serial Number Tests
    // ========================================================================

    #[test]
    fn test_extract_single_numbers() {
        assert_eq!(extract_serial_numbers("1, 3, 5", 3).unwrap(), vec![1, 3, 5]);
        assert_eq!(extract_serial_numbers("  42 ", 1).unwrap(), vec![42]);
    }

    #[test]
    fn test_extract_ranges() {
        assert_eq!(extract_serial_numbers("10-12", 3).unwrap(), vec![10, 11, 12]);
        assert_eq!(
            extract_serial_numbers("1,3,5-10", 8).unwrap(),
            vec![1, 3, 5, 6, 7, 8, 9, 10]
        );
    }

    #[test]
    fn test_extract_whitespace_separated() {
        assert_eq!(extract_serial_numbers("1 2\t3", 3).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_extract_empty() {
        let err = extract_serial_numbers("   ", 1).unwrap_err();
        assert_eq!(err.messages, vec!["Empty serial number string".to_string()]);
    }

    #[test]
    fn test_extract_invalid_groups() {
        let err = extract_serial_numbers("1,abc,5-3", 3).unwrap_err();
        assert_eq!(
            err.messages,
            vec!["Invalid group: abc".to_string(), "Invalid group: 5-3".to_string()]
        );

        assert!(extract_serial_numbers("1-2-3", 3).is_err());
        assert!(extract_serial_numbers("4-4", 1).is_err());
    }

    #[test]
    fn test_extract_duplicates() {
        let err = extract_serial_numbers("1,2,2", 3).unwrap_err();
        assert_eq!(err.messages, vec!["Duplicate serial: 2".to_string()]);

        let err = extract_serial_numbers("1-3,3", 4).unwrap_err();
        assert_eq!(err.messages, vec!["Duplicate serial: 3".to_string()]);
    }

    #[test]
    fn test_extract_quantity_mismatch() {
        let err = extract_serial_numbers("1-3", 5).unwrap_err();
        assert_eq!(
            err.messages,
            vec!["Number of unique serial numbers (3) must match quantity (5)".to_string()]
        );
    }

    #[test]
    fn test_extract_rejects_oversized_ranges() {
        let err = extract_serial_numbers("1-9000000000", 3).unwrap_err();
        assert_eq!(
            err.messages,
            vec!["Number of serial numbers exceeds quantity (3)".to_string()]
        );

        assert!(extract_serial_numbers("1-200000", 3).is_err());
        assert!(extract_serial_numbers("0-9223372036854775807", 10).is_err());
        assert!(extract_serial_numbers("-9223372036854775808-9223372036854775807", 1).is_err());
        assert!(extract_serial_numbers("1,2,3,4", 3).is_err());
        assert!(extract_serial_numbers("1", -1).is_err());
        assert!(extract_serial_numbers("1-9000000000", i64::MAX).is_err());
    }

    #[test]
    fn test_extract_near_largest_serial() {
        assert_eq!(
            extract_serial_numbers("9223372036854775806-9223372036854775807", 2).unwrap(),
            vec![i64::MAX - 1, i64::MAX]
        );
        assert!(extract_serial_numbers("9223372036854775808", 1).is_err());
    }

    #[test]
    fn test_duplicate_serials() {
        assert_eq!(duplicate_serials(&[1, 2, 3]), Vec::<i64>::new());
        assert_eq!(duplicate_serials(&[1, 2, 1, 1, 3, 2]), vec![1, 2]);
    }

    #[test]
    fn test_format_serial_range() {
        assert_eq!(format_serial_range(7, 1).as_deref(), Some("7"));
        assert_eq!(format_serial_range(11, 3).as_deref(), Some("11-13"));
        assert_eq!(
            format_serial_range(i64::MAX - 1, 2).as_deref(),
            Some("9223372036854775806-9223372036854775807")
        );
        assert_eq!(format_serial_range(i64::MAX, 2), None);
    }

    #[test]
    fn test_join_serials() {
        assert_eq!(join_serials(&[11]), "11");
        assert_eq!(join_serials(&[10, 12]), "10,12");
    }

    // ========================================================================
    // Quantity Tests
    // ========================================================================

    #[test]
    fn test_validate_build_quantity() {
        assert!(validate_build_quantity(Decimal::from(5), false).is_ok());
        assert!(validate_build_quantity(Decimal::from_str("2.5").unwrap(), false).is_ok());
        assert!(validate_build_quantity(Decimal::from_str("2.5").unwrap(), true).is_err());
        assert!(validate_build_quantity(Decimal::ZERO, false).is_err());
        assert!(validate_build_quantity(Decimal::from(-1), false).is_err());
    }

    #[test]
    fn test_validate_trackable_unit_limit() {
        let limit = Decimal::from(MAX_TRACKABLE_UNITS as u64);
        assert!(validate_build_quantity(limit, true).is_ok());
        assert!(validate_build_quantity(limit + Decimal::ONE, true).is_err());
        assert!(validate_build_quantity(Decimal::from_str("100000000000000000000").unwrap(), true).is_err());
        assert!(validate_build_quantity(Decimal::from_str("100000000000000000000").unwrap(), false).is_ok());
    }

    #[test]
    fn test_validate_allocation_quantity() {
        assert!(validate_allocation_quantity(Decimal::from(3), false).is_ok());
        assert!(validate_allocation_quantity(Decimal::ONE, true).is_ok());
        assert!(validate_allocation_quantity(Decimal::from(2), true).is_err());
        assert!(validate_allocation_quantity(Decimal::ZERO, false).is_err());
    }

    #[test]
    fn test_validate_reference() {
        assert!(validate_reference("BO-0001").is_ok());
        assert!(validate_reference("  ").is_err());
        assert!(validate_reference(&"X".repeat(MAX_REFERENCE_LENGTH + 1)).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A formatted range always parses back to the same serials
        #[test]
        fn prop_formatted_range_parses(first in 1i64..100_000, count in 1i64..50) {
            let text = format_serial_range(first, count).unwrap();
            let serials = extract_serial_numbers(&text, count).unwrap();
            prop_assert_eq!(serials.len() as i64, count);
            prop_assert_eq!(serials[0], first);
            prop_assert_eq!(*serials.last().unwrap(), first + count - 1);
        }

        /// Parsed serials are always distinct
        #[test]
        fn prop_extracted_serials_unique(values in proptest::collection::vec(1i64..500, 1..20)) {
            let text = join_serials(&values);
            let unique = values.iter().collect::<HashSet<_>>().len() as i64;
            if let Ok(serials) = extract_serial_numbers(&text, unique) {
                prop_assert!(duplicate_serials(&serials).is_empty());
            }
        }
    }
}
