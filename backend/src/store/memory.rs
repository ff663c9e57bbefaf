//! In-memory store.
//!
//! Holds every table in a single [`MemoryState`] behind a `tokio` mutex. A
//! transaction owns the lock for its whole lifetime and mutates a private copy
//! of the state; `commit` publishes the copy, `rollback` (or drop) discards
//! it. Transactions are therefore fully serialised, which gives the same
//! guarantees as row locking for the workloads the core issues.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{Build, BuildItem, Part, StockItem, StockLocation, StockTrackingEntry};

use super::{Store, StoreTx};
use crate::error::AppResult;

/// Every table, in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    pub parts: Vec<Part>,
    pub locations: Vec<StockLocation>,
    pub stock_items: Vec<StockItem>,
    pub builds: Vec<Build>,
    pub build_items: Vec<BuildItem>,
    pub tracking: Vec<StockTrackingEntry>,
    pub build_sequence: i64,
}

/// Replace the row with the same id, or append it
fn upsert<T: Clone>(rows: &mut Vec<T>, row: &T, id: impl Fn(&T) -> Uuid) {
    let key = id(row);
    match rows.iter_mut().find(|r| id(r) == key) {
        Some(existing) => *existing = row.clone(),
        None => rows.push(row.clone()),
    }
}

/// Shared in-memory backend
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> AppResult<MemoryTx> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx { guard, working })
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Open in-memory transaction
pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_part(&mut self, id: Uuid) -> AppResult<Option<Part>> {
        Ok(self.working.parts.iter().find(|p| p.id == id).cloned())
    }

    async fn save_part(&mut self, part: &Part) -> AppResult<()> {
        upsert(&mut self.working.parts, part, |p| p.id);
        Ok(())
    }

    async fn get_location(&mut self, id: Uuid) -> AppResult<Option<StockLocation>> {
        Ok(self.working.locations.iter().find(|l| l.id == id).cloned())
    }

    async fn save_location(&mut self, location: &StockLocation) -> AppResult<()> {
        upsert(&mut self.working.locations, location, |l| l.id);
        Ok(())
    }

    async fn child_locations(&mut self, parent_id: Uuid) -> AppResult<Vec<StockLocation>> {
        Ok(self
            .working
            .locations
            .iter()
            .filter(|l| l.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn get_stock_item(&mut self, id: Uuid) -> AppResult<Option<StockItem>> {
        Ok(self.working.stock_items.iter().find(|s| s.id == id).cloned())
    }

    async fn lock_stock_item(&mut self, id: Uuid) -> AppResult<Option<StockItem>> {
        self.get_stock_item(id).await
    }

    async fn save_stock_item(&mut self, item: &StockItem) -> AppResult<()> {
        upsert(&mut self.working.stock_items, item, |s| s.id);
        Ok(())
    }

    async fn delete_stock_item(&mut self, id: Uuid) -> AppResult<()> {
        self.working.stock_items.retain(|s| s.id != id);
        Ok(())
    }

    async fn stock_for_part(&mut self, part_id: Uuid) -> AppResult<Vec<StockItem>> {
        Ok(self
            .working
            .stock_items
            .iter()
            .filter(|s| s.part_id == part_id)
            .cloned()
            .collect())
    }

    async fn build_outputs(&mut self, build_id: Uuid) -> AppResult<Vec<StockItem>> {
        Ok(self
            .working
            .stock_items
            .iter()
            .filter(|s| s.build_id == Some(build_id))
            .cloned()
            .collect())
    }

    async fn serial_exists(&mut self, part_id: Uuid, serial: i64) -> AppResult<bool> {
        Ok(self
            .working
            .stock_items
            .iter()
            .any(|s| s.part_id == part_id && s.serial == Some(serial)))
    }

    async fn max_serial(&mut self, part_id: Uuid) -> AppResult<Option<i64>> {
        Ok(self
            .working
            .stock_items
            .iter()
            .filter(|s| s.part_id == part_id)
            .filter_map(|s| s.serial)
            .max())
    }

    async fn get_build(&mut self, id: Uuid) -> AppResult<Option<Build>> {
        Ok(self.working.builds.iter().find(|b| b.id == id).cloned())
    }

    async fn lock_build(&mut self, id: Uuid) -> AppResult<Option<Build>> {
        self.get_build(id).await
    }

    async fn save_build(&mut self, build: &Build) -> AppResult<()> {
        upsert(&mut self.working.builds, build, |b| b.id);
        Ok(())
    }

    async fn delete_build(&mut self, id: Uuid) -> AppResult<()> {
        self.working.builds.retain(|b| b.id != id);
        self.working.build_items.retain(|i| i.build_id != id);
        Ok(())
    }

    async fn list_builds(&mut self) -> AppResult<Vec<Build>> {
        Ok(self.working.builds.clone())
    }

    async fn child_builds(&mut self, parent_id: Uuid) -> AppResult<Vec<Build>> {
        Ok(self
            .working
            .builds
            .iter()
            .filter(|b| b.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn reference_exists(&mut self, reference: &str) -> AppResult<bool> {
        Ok(self.working.builds.iter().any(|b| b.reference == reference))
    }

    async fn next_build_number(&mut self) -> AppResult<i64> {
        self.working.build_sequence += 1;
        Ok(self.working.build_sequence)
    }

    async fn get_build_item(&mut self, id: Uuid) -> AppResult<Option<BuildItem>> {
        Ok(self.working.build_items.iter().find(|i| i.id == id).cloned())
    }

    async fn save_build_item(&mut self, item: &BuildItem) -> AppResult<()> {
        upsert(&mut self.working.build_items, item, |i| i.id);
        Ok(())
    }

    async fn delete_build_item(&mut self, id: Uuid) -> AppResult<()> {
        self.working.build_items.retain(|i| i.id != id);
        Ok(())
    }

    async fn build_items(&mut self, build_id: Uuid) -> AppResult<Vec<BuildItem>> {
        Ok(self
            .working
            .build_items
            .iter()
            .filter(|i| i.build_id == build_id)
            .cloned()
            .collect())
    }

    async fn allocations_for_stock(&mut self, stock_item_id: Uuid) -> AppResult<Vec<BuildItem>> {
        Ok(self
            .working
            .build_items
            .iter()
            .filter(|i| i.stock_item_id == stock_item_id)
            .cloned()
            .collect())
    }

    async fn add_tracking_entry(&mut self, entry: &StockTrackingEntry) -> AppResult<()> {
        self.working.tracking.push(entry.clone());
        Ok(())
    }

    async fn tracking_for_item(
        &mut self,
        stock_item_id: Uuid,
    ) -> AppResult<Vec<StockTrackingEntry>> {
        Ok(self
            .working
            .tracking
            .iter()
            .filter(|t| t.stock_item_id == stock_item_id)
            .cloned()
            .collect())
    }

    async fn commit(self) -> AppResult<()> {
        let MemoryTx { mut guard, working } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = MemoryStore::new();
        let part = Part::new("Widget");

        let mut tx = store.begin().await.unwrap();
        tx.save_part(&part).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.snapshot().await.parts, vec![part]);
    }

    #[tokio::test]
    async fn test_drop_discards_changes() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.save_part(&Part::new("Widget")).await.unwrap();
        }
        let mut tx = store.begin().await.unwrap();
        tx.save_part(&Part::new("Gadget")).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.snapshot().await.parts.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_keeps_insertion_order() {
        let store = MemoryStore::new();
        let part = Part::new("Widget");
        let mut first = StockItem::new(part.id, Decimal::ONE, None);
        let second = StockItem::new(part.id, Decimal::from(2), None);

        let mut tx = store.begin().await.unwrap();
        tx.save_stock_item(&first).await.unwrap();
        tx.save_stock_item(&second).await.unwrap();
        first.quantity = Decimal::TEN;
        tx.save_stock_item(&first).await.unwrap();

        let items = tx.stock_for_part(part.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, first.id);
        assert_eq!(items[0].quantity, Decimal::TEN);
    }

    #[tokio::test]
    async fn test_build_sequence_is_monotonic() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_build_number().await.unwrap(), 1);
        assert_eq!(tx.next_build_number().await.unwrap(), 2);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_build_number().await.unwrap(), 3);
    }
}
