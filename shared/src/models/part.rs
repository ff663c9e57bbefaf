//! Part and bill-of-materials models

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A manufacturable (or purchasable) item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Part {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Individual units carry serial numbers (stock quantity is always 1)
    pub trackable: bool,
    /// Part can be built from other parts
    pub assembly: bool,
    pub default_location_id: Option<Uuid>,
    /// Bill of materials, in declaration order
    pub bom: Vec<BomItem>,
}

/// A single bill-of-materials line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BomItem {
    pub sub_part_id: Uuid,
    /// Quantity of the sub-part required per unit of the parent part
    pub quantity: Decimal,
}

impl Part {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            trackable: false,
            assembly: false,
            default_location_id: None,
            bom: Vec::new(),
        }
    }

    /// BOM line for a sub-part, if the part uses it
    pub fn bom_item(&self, sub_part_id: Uuid) -> Option<&BomItem> {
        self.bom.iter().find(|b| b.sub_part_id == sub_part_id)
    }

    /// Quantity of a sub-part needed to build `quantity` units of this part
    pub fn required_quantity(&self, sub_part_id: Uuid, quantity: Decimal) -> Decimal {
        self.bom_item(sub_part_id)
            .map(|b| b.quantity * quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn uses(&self, sub_part_id: Uuid) -> bool {
        self.bom_item(sub_part_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_quantity_scales_with_build() {
        let screw = Uuid::new_v4();
        let mut widget = Part::new("Widget");
        widget.bom.push(BomItem {
            sub_part_id: screw,
            quantity: Decimal::from(4),
        });

        assert_eq!(widget.required_quantity(screw, Decimal::from(5)), Decimal::from(20));
        assert_eq!(
            widget.required_quantity(Uuid::new_v4(), Decimal::from(5)),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_uses() {
        let screw = Uuid::new_v4();
        let mut widget = Part::new("Widget");
        assert!(!widget.uses(screw));
        widget.bom.push(BomItem {
            sub_part_id: screw,
            quantity: Decimal::ONE,
        });
        assert!(widget.uses(screw));
    }
}
