//! Stock history entries

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only record of something that happened to a stock item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockTrackingEntry {
    pub id: Uuid,
    pub stock_item_id: Uuid,
    pub part_id: Uuid,
    pub title: String,
    pub quantity: Decimal,
    pub build_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub date: DateTime<Utc>,
}

impl StockTrackingEntry {
    pub fn new(
        stock_item_id: Uuid,
        part_id: Uuid,
        title: impl Into<String>,
        quantity: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stock_item_id,
            part_id,
            title: title.into(),
            quantity,
            build_id: None,
            user_id: None,
            date: Utc::now(),
        }
    }

    pub fn for_build(mut self, build_id: Uuid, user_id: Uuid) -> Self {
        self.build_id = Some(build_id);
        self.user_id = Some(user_id);
        self
    }
}
