//! PostgreSQL store.
//!
//! Every unit of work is a database transaction. Rows read through `lock_*`
//! are taken with `SELECT ... FOR UPDATE`, so two requests allocating the same
//! stock item queue behind each other instead of both passing validation.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{
    BomItem, Build, BuildItem, BuildStatus, Part, StockItem, StockLocation, StockStatus,
    StockTrackingEntry,
};

use super::{Store, StoreTx};
use crate::error::{AppError, AppResult};

const STOCK_COLUMNS: &str = "id, part_id, location_id, quantity, serial, status, batch, \
     expiry_date, is_building, build_id, sales_order_id, updated_at";

const BUILD_COLUMNS: &str = "id, reference, title, part_id, quantity, status, batch, parent_id, \
     sales_order_id, take_from_id, destination_id, notes, created_at, created_by, \
     completed_at, completed_by";

const BUILD_ITEM_COLUMNS: &str = "id, build_id, stock_item_id, install_into_id, quantity, created_at";

/// PostgreSQL backend
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> AppResult<PgTx> {
        let tx = self.pool.begin().await?;
        Ok(PgTx { tx })
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Open database transaction
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// ============================================================================
// Row types
// ============================================================================

#[derive(Debug, FromRow)]
struct PartRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    trackable: bool,
    assembly: bool,
    default_location_id: Option<Uuid>,
}

#[derive(Debug, FromRow)]
struct BomRow {
    sub_part_id: Uuid,
    quantity: Decimal,
}

#[derive(Debug, FromRow)]
struct LocationRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    parent_id: Option<Uuid>,
}

impl From<LocationRow> for StockLocation {
    fn from(r: LocationRow) -> Self {
        StockLocation {
            id: r.id,
            name: r.name,
            description: r.description,
            parent_id: r.parent_id,
        }
    }
}

#[derive(Debug, FromRow)]
struct StockItemRow {
    id: Uuid,
    part_id: Uuid,
    location_id: Option<Uuid>,
    quantity: Decimal,
    serial: Option<i64>,
    status: i16,
    batch: Option<String>,
    expiry_date: Option<NaiveDate>,
    is_building: bool,
    build_id: Option<Uuid>,
    sales_order_id: Option<Uuid>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StockItemRow> for StockItem {
    type Error = AppError;

    fn try_from(r: StockItemRow) -> AppResult<Self> {
        let status = StockStatus::from_code(r.status)
            .ok_or_else(|| AppError::Integrity(format!("Unknown stock status {}", r.status)))?;
        Ok(StockItem {
            id: r.id,
            part_id: r.part_id,
            location_id: r.location_id,
            quantity: r.quantity,
            serial: r.serial,
            status,
            batch: r.batch,
            expiry_date: r.expiry_date,
            is_building: r.is_building,
            build_id: r.build_id,
            sales_order_id: r.sales_order_id,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BuildRow {
    id: Uuid,
    reference: String,
    title: String,
    part_id: Uuid,
    quantity: Decimal,
    status: i16,
    batch: Option<String>,
    parent_id: Option<Uuid>,
    sales_order_id: Option<Uuid>,
    take_from_id: Option<Uuid>,
    destination_id: Option<Uuid>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    created_by: Option<Uuid>,
    completed_at: Option<DateTime<Utc>>,
    completed_by: Option<Uuid>,
}

impl TryFrom<BuildRow> for Build {
    type Error = AppError;

    fn try_from(r: BuildRow) -> AppResult<Self> {
        let status = BuildStatus::from_code(r.status)
            .ok_or_else(|| AppError::Integrity(format!("Unknown build status {}", r.status)))?;
        Ok(Build {
            id: r.id,
            reference: r.reference,
            title: r.title,
            part_id: r.part_id,
            quantity: r.quantity,
            status,
            batch: r.batch,
            parent_id: r.parent_id,
            sales_order_id: r.sales_order_id,
            take_from_id: r.take_from_id,
            destination_id: r.destination_id,
            notes: r.notes,
            created_at: r.created_at,
            created_by: r.created_by,
            completed_at: r.completed_at,
            completed_by: r.completed_by,
        })
    }
}

#[derive(Debug, FromRow)]
struct BuildItemRow {
    id: Uuid,
    build_id: Uuid,
    stock_item_id: Uuid,
    install_into_id: Option<Uuid>,
    quantity: Decimal,
    created_at: DateTime<Utc>,
}

impl From<BuildItemRow> for BuildItem {
    fn from(r: BuildItemRow) -> Self {
        BuildItem {
            id: r.id,
            build_id: r.build_id,
            stock_item_id: r.stock_item_id,
            install_into_id: r.install_into_id,
            quantity: r.quantity,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TrackingRow {
    id: Uuid,
    stock_item_id: Uuid,
    part_id: Uuid,
    title: String,
    quantity: Decimal,
    build_id: Option<Uuid>,
    user_id: Option<Uuid>,
    date: DateTime<Utc>,
}

impl From<TrackingRow> for StockTrackingEntry {
    fn from(r: TrackingRow) -> Self {
        StockTrackingEntry {
            id: r.id,
            stock_item_id: r.stock_item_id,
            part_id: r.part_id,
            title: r.title,
            quantity: r.quantity,
            build_id: r.build_id,
            user_id: r.user_id,
            date: r.date,
        }
    }
}

fn stock_items(rows: Vec<StockItemRow>) -> AppResult<Vec<StockItem>> {
    rows.into_iter().map(StockItem::try_from).collect()
}

fn builds(rows: Vec<BuildRow>) -> AppResult<Vec<Build>> {
    rows.into_iter().map(Build::try_from).collect()
}

// ============================================================================
// Unit of work
// ============================================================================

impl PgTx {
    async fn fetch_stock_item(&mut self, id: Uuid, lock: bool) -> AppResult<Option<StockItem>> {
        let sql = format!(
            "SELECT {} FROM stock_items WHERE id = $1{}",
            STOCK_COLUMNS,
            if lock { " FOR UPDATE" } else { "" }
        );
        sqlx::query_as::<_, StockItemRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(StockItem::try_from)
            .transpose()
    }

    async fn fetch_build(&mut self, id: Uuid, lock: bool) -> AppResult<Option<Build>> {
        let sql = format!(
            "SELECT {} FROM builds WHERE id = $1{}",
            BUILD_COLUMNS,
            if lock { " FOR UPDATE" } else { "" }
        );
        sqlx::query_as::<_, BuildRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Build::try_from)
            .transpose()
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn get_part(&mut self, id: Uuid) -> AppResult<Option<Part>> {
        let row = sqlx::query_as::<_, PartRow>(
            "SELECT id, name, description, trackable, assembly, default_location_id FROM parts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let bom = sqlx::query_as::<_, BomRow>(
            "SELECT sub_part_id, quantity FROM bom_items WHERE part_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(Some(Part {
            id: row.id,
            name: row.name,
            description: row.description,
            trackable: row.trackable,
            assembly: row.assembly,
            default_location_id: row.default_location_id,
            bom: bom
                .into_iter()
                .map(|b| BomItem {
                    sub_part_id: b.sub_part_id,
                    quantity: b.quantity,
                })
                .collect(),
        }))
    }

    async fn save_part(&mut self, part: &Part) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO parts (id, name, description, trackable, assembly, default_location_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, description = EXCLUDED.description,
                trackable = EXCLUDED.trackable, assembly = EXCLUDED.assembly,
                default_location_id = EXCLUDED.default_location_id
            "#,
        )
        .bind(part.id)
        .bind(&part.name)
        .bind(&part.description)
        .bind(part.trackable)
        .bind(part.assembly)
        .bind(part.default_location_id)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query("DELETE FROM bom_items WHERE part_id = $1")
            .bind(part.id)
            .execute(&mut *self.tx)
            .await?;

        for (position, line) in part.bom.iter().enumerate() {
            sqlx::query(
                "INSERT INTO bom_items (part_id, position, sub_part_id, quantity) VALUES ($1, $2, $3, $4)",
            )
            .bind(part.id)
            .bind(position as i32)
            .bind(line.sub_part_id)
            .bind(line.quantity)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn get_location(&mut self, id: Uuid) -> AppResult<Option<StockLocation>> {
        let row = sqlx::query_as::<_, LocationRow>(
            "SELECT id, name, description, parent_id FROM stock_locations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(StockLocation::from))
    }

    async fn save_location(&mut self, location: &StockLocation) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_locations (id, name, description, parent_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, description = EXCLUDED.description,
                parent_id = EXCLUDED.parent_id
            "#,
        )
        .bind(location.id)
        .bind(&location.name)
        .bind(&location.description)
        .bind(location.parent_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn child_locations(&mut self, parent_id: Uuid) -> AppResult<Vec<StockLocation>> {
        let rows = sqlx::query_as::<_, LocationRow>(
            "SELECT id, name, description, parent_id FROM stock_locations WHERE parent_id = $1 ORDER BY name",
        )
        .bind(parent_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(StockLocation::from).collect())
    }

    async fn get_stock_item(&mut self, id: Uuid) -> AppResult<Option<StockItem>> {
        self.fetch_stock_item(id, false).await
    }

    async fn lock_stock_item(&mut self, id: Uuid) -> AppResult<Option<StockItem>> {
        self.fetch_stock_item(id, true).await
    }

    async fn save_stock_item(&mut self, item: &StockItem) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_items (id, part_id, location_id, quantity, serial, status, batch,
                                     expiry_date, is_building, build_id, sales_order_id, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE
            SET location_id = EXCLUDED.location_id, quantity = EXCLUDED.quantity,
                serial = EXCLUDED.serial, status = EXCLUDED.status, batch = EXCLUDED.batch,
                expiry_date = EXCLUDED.expiry_date, is_building = EXCLUDED.is_building,
                build_id = EXCLUDED.build_id, sales_order_id = EXCLUDED.sales_order_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(item.id)
        .bind(item.part_id)
        .bind(item.location_id)
        .bind(item.quantity)
        .bind(item.serial)
        .bind(item.status.code())
        .bind(&item.batch)
        .bind(item.expiry_date)
        .bind(item.is_building)
        .bind(item.build_id)
        .bind(item.sales_order_id)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_stock_item(&mut self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM stock_items WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn stock_for_part(&mut self, part_id: Uuid) -> AppResult<Vec<StockItem>> {
        let sql = format!(
            "SELECT {} FROM stock_items WHERE part_id = $1 ORDER BY seq",
            STOCK_COLUMNS
        );
        let rows = sqlx::query_as::<_, StockItemRow>(&sql)
            .bind(part_id)
            .fetch_all(&mut *self.tx)
            .await?;
        stock_items(rows)
    }

    async fn build_outputs(&mut self, build_id: Uuid) -> AppResult<Vec<StockItem>> {
        let sql = format!(
            "SELECT {} FROM stock_items WHERE build_id = $1 ORDER BY seq",
            STOCK_COLUMNS
        );
        let rows = sqlx::query_as::<_, StockItemRow>(&sql)
            .bind(build_id)
            .fetch_all(&mut *self.tx)
            .await?;
        stock_items(rows)
    }

    async fn serial_exists(&mut self, part_id: Uuid, serial: i64) -> AppResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM stock_items WHERE part_id = $1 AND serial = $2)",
        )
        .bind(part_id)
        .bind(serial)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn max_serial(&mut self, part_id: Uuid) -> AppResult<Option<i64>> {
        let max = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(serial) FROM stock_items WHERE part_id = $1",
        )
        .bind(part_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(max)
    }

    async fn get_build(&mut self, id: Uuid) -> AppResult<Option<Build>> {
        self.fetch_build(id, false).await
    }

    async fn lock_build(&mut self, id: Uuid) -> AppResult<Option<Build>> {
        self.fetch_build(id, true).await
    }

    async fn save_build(&mut self, build: &Build) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO builds (id, reference, title, part_id, quantity, status, batch, parent_id,
                                sales_order_id, take_from_id, destination_id, notes, created_at,
                                created_by, completed_at, completed_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE
            SET reference = EXCLUDED.reference, title = EXCLUDED.title,
                quantity = EXCLUDED.quantity, status = EXCLUDED.status, batch = EXCLUDED.batch,
                parent_id = EXCLUDED.parent_id, sales_order_id = EXCLUDED.sales_order_id,
                take_from_id = EXCLUDED.take_from_id, destination_id = EXCLUDED.destination_id,
                notes = EXCLUDED.notes, completed_at = EXCLUDED.completed_at,
                completed_by = EXCLUDED.completed_by
            "#,
        )
        .bind(build.id)
        .bind(&build.reference)
        .bind(&build.title)
        .bind(build.part_id)
        .bind(build.quantity)
        .bind(build.status.code())
        .bind(&build.batch)
        .bind(build.parent_id)
        .bind(build.sales_order_id)
        .bind(build.take_from_id)
        .bind(build.destination_id)
        .bind(&build.notes)
        .bind(build.created_at)
        .bind(build.created_by)
        .bind(build.completed_at)
        .bind(build.completed_by)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return AppError::validation(
                        "reference",
                        format!("Build reference '{}' already exists", build.reference),
                    );
                }
            }
            e.into()
        })?;
        Ok(())
    }

    async fn delete_build(&mut self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM builds WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn list_builds(&mut self) -> AppResult<Vec<Build>> {
        let sql = format!("SELECT {} FROM builds ORDER BY seq", BUILD_COLUMNS);
        let rows = sqlx::query_as::<_, BuildRow>(&sql)
            .fetch_all(&mut *self.tx)
            .await?;
        builds(rows)
    }

    async fn child_builds(&mut self, parent_id: Uuid) -> AppResult<Vec<Build>> {
        let sql = format!(
            "SELECT {} FROM builds WHERE parent_id = $1 ORDER BY seq",
            BUILD_COLUMNS
        );
        let rows = sqlx::query_as::<_, BuildRow>(&sql)
            .bind(parent_id)
            .fetch_all(&mut *self.tx)
            .await?;
        builds(rows)
    }

    async fn reference_exists(&mut self, reference: &str) -> AppResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM builds WHERE reference = $1)",
        )
        .bind(reference)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn next_build_number(&mut self) -> AppResult<i64> {
        let next = sqlx::query_scalar::<_, i64>("SELECT nextval('build_reference_seq')")
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(next)
    }

    async fn get_build_item(&mut self, id: Uuid) -> AppResult<Option<BuildItem>> {
        let sql = format!("SELECT {} FROM build_items WHERE id = $1", BUILD_ITEM_COLUMNS);
        let row = sqlx::query_as::<_, BuildItemRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(BuildItem::from))
    }

    async fn save_build_item(&mut self, item: &BuildItem) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO build_items (id, build_id, stock_item_id, install_into_id, quantity, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(item.id)
        .bind(item.build_id)
        .bind(item.stock_item_id)
        .bind(item.install_into_id)
        .bind(item.quantity)
        .bind(item.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_build_item(&mut self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM build_items WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn build_items(&mut self, build_id: Uuid) -> AppResult<Vec<BuildItem>> {
        let sql = format!(
            "SELECT {} FROM build_items WHERE build_id = $1 ORDER BY seq",
            BUILD_ITEM_COLUMNS
        );
        let rows = sqlx::query_as::<_, BuildItemRow>(&sql)
            .bind(build_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(BuildItem::from).collect())
    }

    async fn allocations_for_stock(&mut self, stock_item_id: Uuid) -> AppResult<Vec<BuildItem>> {
        let sql = format!(
            "SELECT {} FROM build_items WHERE stock_item_id = $1 ORDER BY seq",
            BUILD_ITEM_COLUMNS
        );
        let rows = sqlx::query_as::<_, BuildItemRow>(&sql)
            .bind(stock_item_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(BuildItem::from).collect())
    }

    async fn add_tracking_entry(&mut self, entry: &StockTrackingEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_tracking (id, stock_item_id, part_id, title, quantity, build_id, user_id, date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.stock_item_id)
        .bind(entry.part_id)
        .bind(&entry.title)
        .bind(entry.quantity)
        .bind(entry.build_id)
        .bind(entry.user_id)
        .bind(entry.date)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn tracking_for_item(
        &mut self,
        stock_item_id: Uuid,
    ) -> AppResult<Vec<StockTrackingEntry>> {
        let rows = sqlx::query_as::<_, TrackingRow>(
            r#"
            SELECT id, stock_item_id, part_id, title, quantity, build_id, user_id, date
            FROM stock_tracking
            WHERE stock_item_id = $1
            ORDER BY seq
            "#,
        )
        .bind(stock_item_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(StockTrackingEntry::from).collect())
    }

    async fn commit(self) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
