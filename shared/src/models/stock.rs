//! Stock location and stock item models

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node in the storage location tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockLocation {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
}

impl StockLocation {
    pub fn new(name: impl Into<String>, parent_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            parent_id,
        }
    }
}

/// Condition of a stock item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    #[default]
    Ok,
    Attention,
    Damaged,
    Destroyed,
    Rejected,
    Lost,
    Returned,
}

impl StockStatus {
    /// Statuses which still count as usable stock
    pub const AVAILABLE: [StockStatus; 3] =
        [StockStatus::Ok, StockStatus::Attention, StockStatus::Damaged];

    pub fn code(&self) -> i16 {
        match self {
            StockStatus::Ok => 10,
            StockStatus::Attention => 50,
            StockStatus::Damaged => 55,
            StockStatus::Destroyed => 60,
            StockStatus::Rejected => 65,
            StockStatus::Lost => 70,
            StockStatus::Returned => 85,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            10 => Some(StockStatus::Ok),
            50 => Some(StockStatus::Attention),
            55 => Some(StockStatus::Damaged),
            60 => Some(StockStatus::Destroyed),
            65 => Some(StockStatus::Rejected),
            70 => Some(StockStatus::Lost),
            85 => Some(StockStatus::Returned),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        Self::AVAILABLE.contains(self)
    }
}

/// A physical quantity of a part at a location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockItem {
    pub id: Uuid,
    pub part_id: Uuid,
    pub location_id: Option<Uuid>,
    pub quantity: Decimal,
    /// Present only for trackable parts (quantity is then exactly 1)
    pub serial: Option<i64>,
    pub status: StockStatus,
    pub batch: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    /// Item is the in-progress output of `build_id`
    pub is_building: bool,
    /// Owning build while building, provenance afterwards
    pub build_id: Option<Uuid>,
    /// Finished output reserved for a sales order
    pub sales_order_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl StockItem {
    pub fn new(part_id: Uuid, quantity: Decimal, location_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            part_id,
            location_id,
            quantity,
            serial: None,
            status: StockStatus::Ok,
            batch: None,
            expiry_date: None,
            is_building: false,
            build_id: None,
            sales_order_id: None,
            updated_at: Utc::now(),
        }
    }

    /// A single serialized unit
    pub fn serialized(part_id: Uuid, serial: i64, location_id: Option<Uuid>) -> Self {
        let mut item = Self::new(part_id, Decimal::ONE, location_id);
        item.serial = Some(serial);
        item
    }

    /// An in-progress output owned by a build
    pub fn build_output(
        part_id: Uuid,
        build_id: Uuid,
        quantity: Decimal,
        location_id: Option<Uuid>,
    ) -> Self {
        let mut item = Self::new(part_id, quantity, location_id);
        item.is_building = true;
        item.build_id = Some(build_id);
        item
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.map(|d| d <= today).unwrap_or(false)
    }

    pub fn is_serialized(&self) -> bool {
        self.serial.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_round_trip() {
        for status in [
            StockStatus::Ok,
            StockStatus::Attention,
            StockStatus::Damaged,
            StockStatus::Destroyed,
            StockStatus::Rejected,
            StockStatus::Lost,
            StockStatus::Returned,
        ] {
            assert_eq!(StockStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(StockStatus::from_code(11), None);
    }

    #[test]
    fn test_available_statuses() {
        assert!(StockStatus::Ok.is_available());
        assert!(StockStatus::Damaged.is_available());
        assert!(!StockStatus::Rejected.is_available());
        assert!(!StockStatus::Lost.is_available());
    }

    #[test]
    fn test_expiry() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut item = StockItem::new(Uuid::new_v4(), Decimal::TEN, None);
        assert!(!item.is_expired(today));

        item.expiry_date = NaiveDate::from_ymd_opt(2024, 6, 1);
        assert!(item.is_expired(today));

        item.expiry_date = NaiveDate::from_ymd_opt(2024, 7, 1);
        assert!(!item.is_expired(today));
    }

    #[test]
    fn test_build_output_flags() {
        let build = Uuid::new_v4();
        let item = StockItem::build_output(Uuid::new_v4(), build, Decimal::from(3), None);
        assert!(item.is_building);
        assert_eq!(item.build_id, Some(build));
        assert!(!item.is_serialized());
    }
}
