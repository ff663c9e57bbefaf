//! Persistence abstraction.
//!
//! Core operations run against a [`StoreTx`]: a unit of work opened with
//! [`Store::begin`] and finished with [`StoreTx::commit`] or
//! [`StoreTx::rollback`]. A transaction dropped without commit is rolled back.
//!
//! Backends:
//! - PostgreSQL (`PgStore`), row locks via `SELECT ... FOR UPDATE`
//! - In-memory (`MemoryStore`), transactions serialised behind a mutex

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Build, BuildItem, Part, StockItem, StockLocation, StockTrackingEntry};

use crate::error::AppResult;

mod memory;
mod postgres;

pub use memory::{MemoryState, MemoryStore};
pub use postgres::PgStore;

/// A source of transactions
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx;

    /// Open a new unit of work
    async fn begin(&self) -> AppResult<Self::Tx>;

    /// Check that the backend is reachable
    async fn ping(&self) -> AppResult<()>;
}

/// A unit of work over parts, locations, stock, builds and allocations.
///
/// `lock_*` methods read a row and hold it against concurrent writers until
/// the transaction ends. `save_*` inserts or replaces by id.
#[async_trait]
pub trait StoreTx: Send {
    // Parts
    async fn get_part(&mut self, id: Uuid) -> AppResult<Option<Part>>;
    async fn save_part(&mut self, part: &Part) -> AppResult<()>;

    // Locations
    async fn get_location(&mut self, id: Uuid) -> AppResult<Option<StockLocation>>;
    async fn save_location(&mut self, location: &StockLocation) -> AppResult<()>;
    async fn child_locations(&mut self, parent_id: Uuid) -> AppResult<Vec<StockLocation>>;

    // Stock items
    async fn get_stock_item(&mut self, id: Uuid) -> AppResult<Option<StockItem>>;
    async fn lock_stock_item(&mut self, id: Uuid) -> AppResult<Option<StockItem>>;
    async fn save_stock_item(&mut self, item: &StockItem) -> AppResult<()>;
    async fn delete_stock_item(&mut self, id: Uuid) -> AppResult<()>;
    /// All stock of a part, oldest first
    async fn stock_for_part(&mut self, part_id: Uuid) -> AppResult<Vec<StockItem>>;
    /// Stock owned by (or produced by) a build, oldest first
    async fn build_outputs(&mut self, build_id: Uuid) -> AppResult<Vec<StockItem>>;
    async fn serial_exists(&mut self, part_id: Uuid, serial: i64) -> AppResult<bool>;
    async fn max_serial(&mut self, part_id: Uuid) -> AppResult<Option<i64>>;

    // Builds
    async fn get_build(&mut self, id: Uuid) -> AppResult<Option<Build>>;
    async fn lock_build(&mut self, id: Uuid) -> AppResult<Option<Build>>;
    async fn save_build(&mut self, build: &Build) -> AppResult<()>;
    async fn delete_build(&mut self, id: Uuid) -> AppResult<()>;
    async fn list_builds(&mut self) -> AppResult<Vec<Build>>;
    async fn child_builds(&mut self, parent_id: Uuid) -> AppResult<Vec<Build>>;
    async fn reference_exists(&mut self, reference: &str) -> AppResult<bool>;
    /// Next value of the monotonic build number sequence
    async fn next_build_number(&mut self) -> AppResult<i64>;

    // Build items
    async fn get_build_item(&mut self, id: Uuid) -> AppResult<Option<BuildItem>>;
    async fn save_build_item(&mut self, item: &BuildItem) -> AppResult<()>;
    async fn delete_build_item(&mut self, id: Uuid) -> AppResult<()>;
    /// Allocations of a build, oldest first
    async fn build_items(&mut self, build_id: Uuid) -> AppResult<Vec<BuildItem>>;
    /// Allocations (from any build) drawing on a stock item
    async fn allocations_for_stock(&mut self, stock_item_id: Uuid) -> AppResult<Vec<BuildItem>>;

    // Stock history
    async fn add_tracking_entry(&mut self, entry: &StockTrackingEntry) -> AppResult<()>;
    async fn tracking_for_item(&mut self, stock_item_id: Uuid)
        -> AppResult<Vec<StockTrackingEntry>>;

    async fn commit(self) -> AppResult<()>;
    async fn rollback(self) -> AppResult<()>;
}
