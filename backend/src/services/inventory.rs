//! Inventory ledger: stock quantities, serial numbers and the location tree

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use shared::models::{Build, StockItem, StockTrackingEntry};
use shared::validation::format_serial_range;

use crate::config::StockConfig;
use crate::error::{AppError, AppResult};
use crate::store::StoreTx;

/// Which stock may be allocated to a build
#[derive(Debug, Clone, Copy, Default)]
pub struct StockPolicy {
    pub allow_expired: bool,
}

impl StockPolicy {
    pub fn from_config(config: &StockConfig) -> Self {
        Self {
            allow_expired: config.allow_expired_stock,
        }
    }

    /// Eligibility of a stock item as allocation source on the given day
    pub fn in_stock(&self, item: &StockItem, today: NaiveDate) -> bool {
        item.quantity > Decimal::ZERO
            && !item.is_building
            && item.sales_order_id.is_none()
            && item.status.is_available()
            && (self.allow_expired || !item.is_expired(today))
    }
}

/// A stock item together with its free quantity
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StockCandidate {
    pub item: StockItem,
    pub unallocated: Decimal,
}

/// Inventory ledger
#[derive(Debug, Clone, Default)]
pub struct InventoryLedger {
    policy: StockPolicy,
}

impl InventoryLedger {
    /// Create a new InventoryLedger instance
    pub fn new(policy: StockPolicy) -> Self {
        Self { policy }
    }

    /// Whether the item can currently be allocated
    pub fn in_stock(&self, item: &StockItem) -> bool {
        self.policy.in_stock(item, Utc::now().date_naive())
    }

    /// Total quantity minus every outstanding allocation against it
    pub async fn unallocated_quantity<T: StoreTx>(
        &self,
        tx: &mut T,
        item: &StockItem,
    ) -> AppResult<Decimal> {
        let allocated: Decimal = tx
            .allocations_for_stock(item.id)
            .await?
            .iter()
            .map(|a| a.quantity)
            .sum();

        Ok((item.quantity - allocated).max(Decimal::ZERO))
    }

    /// The location and every location below it
    pub async fn unique_children<T: StoreTx>(
        &self,
        tx: &mut T,
        location_id: Uuid,
    ) -> AppResult<HashSet<Uuid>> {
        let mut seen = HashSet::from([location_id]);
        let mut queue = vec![location_id];

        while let Some(current) = queue.pop() {
            for child in tx.child_locations(current).await? {
                if seen.insert(child.id) {
                    queue.push(child.id);
                }
            }
        }

        Ok(seen)
    }

    pub async fn check_serial_number_exists<T: StoreTx>(
        &self,
        tx: &mut T,
        part_id: Uuid,
        serial: i64,
    ) -> AppResult<bool> {
        tx.serial_exists(part_id, serial).await
    }

    /// Highest serial of the part plus one, starting at 1
    pub async fn next_serial_number<T: StoreTx>(&self, tx: &mut T, part_id: Uuid) -> AppResult<i64> {
        match tx.max_serial(part_id).await? {
            None => Ok(1),
            Some(max) => max.checked_add(1).ok_or_else(|| {
                AppError::validation(
                    "serial_numbers",
                    format!("Part {} has no serial numbers left after {}", part_id, max),
                )
            }),
        }
    }

    /// Suggested serial text for `count` new units of a part
    pub async fn serial_number_placeholder<T: StoreTx>(
        &self,
        tx: &mut T,
        part_id: Uuid,
        count: i64,
    ) -> AppResult<String> {
        let next = self.next_serial_number(tx, part_id).await?;
        format_serial_range(next, count).ok_or_else(|| {
            AppError::validation(
                "serial_numbers",
                format!("Not enough serial numbers left for {} units after {}", count, next),
            )
        })
    }

    /// Allocatable stock of a part, optionally limited to a location subtree
    pub async fn available_stock<T: StoreTx>(
        &self,
        tx: &mut T,
        part_id: Uuid,
        take_from: Option<Uuid>,
    ) -> AppResult<Vec<StockCandidate>> {
        let scope = match take_from {
            Some(location_id) => Some(self.unique_children(tx, location_id).await?),
            None => None,
        };

        let mut candidates = Vec::new();
        for item in tx.stock_for_part(part_id).await? {
            if !self.in_stock(&item) {
                continue;
            }
            if let Some(scope) = &scope {
                match item.location_id {
                    Some(location_id) if scope.contains(&location_id) => {}
                    _ => continue,
                }
            }

            let unallocated = self.unallocated_quantity(tx, &item).await?;
            if unallocated > Decimal::ZERO {
                candidates.push(StockCandidate { item, unallocated });
            }
        }

        Ok(candidates)
    }

    /// Consume stock for a build.
    ///
    /// The item is decremented by `quantity`, or deleted when nothing is left,
    /// and a tracking entry is written either way.
    pub async fn take_stock<T: StoreTx>(
        &self,
        tx: &mut T,
        stock_item_id: Uuid,
        quantity: Decimal,
        build: &Build,
        actor: Uuid,
    ) -> AppResult<()> {
        let mut item = tx
            .lock_stock_item(stock_item_id)
            .await?
            .ok_or_else(|| AppError::Integrity(format!("Stock item {} vanished", stock_item_id)))?;

        if quantity > item.quantity {
            return Err(AppError::Integrity(format!(
                "Cannot take {} from stock item {} holding {}",
                quantity, item.id, item.quantity
            )));
        }

        let entry = StockTrackingEntry::new(
            item.id,
            item.part_id,
            format!("Used in build {}", build.reference),
            -quantity,
        )
        .for_build(build.id, actor);
        tx.add_tracking_entry(&entry).await?;

        item.quantity -= quantity;
        if item.quantity.is_zero() {
            tracing::debug!(stock_item = %item.id, build = %build.reference, "Stock item fully consumed");
            tx.delete_stock_item(item.id).await
        } else {
            item.updated_at = Utc::now();
            tx.save_stock_item(&item).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::StockStatus;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn test_policy_rejects_unavailable_stock() {
        let policy = StockPolicy::default();
        let part = Uuid::new_v4();

        let item = StockItem::new(part, Decimal::TEN, None);
        assert!(policy.in_stock(&item, today()));

        let mut empty = item.clone();
        empty.quantity = Decimal::ZERO;
        assert!(!policy.in_stock(&empty, today()));

        let mut building = item.clone();
        building.is_building = true;
        assert!(!policy.in_stock(&building, today()));

        let mut rejected = item.clone();
        rejected.status = StockStatus::Rejected;
        assert!(!policy.in_stock(&rejected, today()));

        let mut sold = item.clone();
        sold.sales_order_id = Some(Uuid::new_v4());
        assert!(!policy.in_stock(&sold, today()));
    }

    #[test]
    fn test_policy_expiry_is_configurable() {
        let mut item = StockItem::new(Uuid::new_v4(), Decimal::ONE, None);
        item.expiry_date = NaiveDate::from_ymd_opt(2024, 1, 1);

        assert!(!StockPolicy::default().in_stock(&item, today()));
        assert!(StockPolicy { allow_expired: true }.in_stock(&item, today()));
    }
}
