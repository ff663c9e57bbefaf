//! Common types used across the platform

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// True when the quantity has no fractional part
pub fn is_whole_quantity(quantity: Decimal) -> bool {
    quantity.fract().is_zero()
}

/// Number of discrete units in a whole, non-negative quantity
pub fn unit_count(quantity: Decimal) -> Option<usize> {
    if quantity.is_sign_negative() || !is_whole_quantity(quantity) {
        return None;
    }
    quantity.trunc().to_usize()
}

/// Builds grouped the way the build index presents them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupedBuilds<T> {
    pub builds: Vec<T>,
    pub active: Vec<T>,
    pub completed: Vec<T>,
    pub cancelled: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_whole_quantity() {
        assert!(is_whole_quantity(Decimal::from(3)));
        assert!(is_whole_quantity(Decimal::from_str("3.000").unwrap()));
        assert!(!is_whole_quantity(Decimal::from_str("2.5").unwrap()));
    }

    #[test]
    fn test_unit_count() {
        assert_eq!(unit_count(Decimal::from(3)), Some(3));
        assert_eq!(unit_count(Decimal::ZERO), Some(0));
        assert_eq!(unit_count(Decimal::from(-1)), None);
        assert_eq!(unit_count(Decimal::from_str("1.5").unwrap()), None);
    }
}
