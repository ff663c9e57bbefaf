//! Build order service
//!
//! Public entry point for everything that happens to a build. Each method is
//! one unit of work: it opens a transaction, validates, mutates and commits.
//! Returning early with an error drops the transaction, which rolls back
//! anything written so far.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use shared::models::{
    AllocationProposal, BomLineAllocation, Build, BuildItem, BuildStatus, Part, StockItem,
    StockLocation, StockTrackingEntry,
};
use shared::types::{unit_count, GroupedBuilds};
use shared::validation::{
    duplicate_serials, extract_serial_numbers, join_serials, validate_build_quantity,
    validate_reference, MAX_TRACKABLE_UNITS,
};

use super::allocation::{AllocationEngine, AllocationSuggestion};
use super::hierarchy::{HierarchyCoordinator, ParentAvailability};
use super::inventory::{InventoryLedger, StockPolicy};
use crate::config::{BuildConfig, StockConfig};
use crate::error::{AppError, AppResult};
use crate::store::{Store, StoreTx};

// ============================================================================
// Inputs
// ============================================================================

/// Input for creating a build order
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateBuildInput {
    pub part_id: Uuid,
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 64))]
    pub reference: Option<String>,
    #[validate(length(max = 100))]
    pub title: Option<String>,
    #[validate(length(max = 100))]
    pub batch: Option<String>,
    pub parent_id: Option<Uuid>,
    pub sales_order_id: Option<Uuid>,
    pub take_from_id: Option<Uuid>,
    pub destination_id: Option<Uuid>,
    pub notes: Option<String>,
}

/// Input for editing a build order; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateBuildInput {
    #[validate(length(min = 1, max = 64))]
    pub reference: Option<String>,
    #[validate(length(max = 100))]
    pub title: Option<String>,
    #[validate(length(max = 100))]
    pub batch: Option<String>,
    pub quantity: Option<Decimal>,
    pub parent_id: Option<Uuid>,
    pub sales_order_id: Option<Uuid>,
    pub take_from_id: Option<Uuid>,
    pub destination_id: Option<Uuid>,
}

/// Input for a manual allocation
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAllocationInput {
    pub build_id: Uuid,
    pub stock_item_id: Uuid,
    pub quantity: Decimal,
    pub install_into_id: Option<Uuid>,
}

/// Input for completing a build
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteBuildInput {
    pub location_id: Uuid,
    #[serde(default)]
    pub serial_numbers: Vec<i64>,
}

// ============================================================================
// Outputs
// ============================================================================

/// Build with its outputs, allocations and allocation progress
#[derive(Debug, Clone, Serialize)]
pub struct BuildDetail {
    pub build: Build,
    pub part: Part,
    pub outputs: Vec<StockItem>,
    pub allocations: Vec<BuildItem>,
    pub summary: Vec<BomLineAllocation>,
    pub children: Vec<Build>,
}

/// Defaults offered by the completion form
#[derive(Debug, Clone, Serialize)]
pub struct CompletionDefaults {
    pub build_id: Uuid,
    pub location_id: Option<Uuid>,
    pub quantity: Decimal,
    /// Suggested serial range for trackable parts
    pub serial_numbers: Option<String>,
    /// Allocations that completion will consume
    pub allocations: Vec<BuildItem>,
}

/// Result of a successful completion
#[derive(Debug, Clone, Serialize)]
pub struct CompletedBuild {
    pub build: Build,
    pub outputs: Vec<StockItem>,
    pub consumed: Vec<BuildItem>,
    pub parent: Option<ParentAvailability>,
}

/// Stock item with its reservations and history
#[derive(Debug, Clone, Serialize)]
pub struct StockDetail {
    pub item: StockItem,
    pub unallocated: Decimal,
    pub allocations: Vec<BuildItem>,
    pub tracking: Vec<StockTrackingEntry>,
}

/// Next free serial number of a part
#[derive(Debug, Clone, Serialize)]
pub struct NextSerial {
    pub part_id: Uuid,
    pub next: i64,
}

// ============================================================================
// Service
// ============================================================================

/// Build order service
pub struct BuildService<S: Store> {
    store: S,
    config: BuildConfig,
    allocation: AllocationEngine,
    hierarchy: HierarchyCoordinator,
}

impl<S: Store> BuildService<S> {
    /// Create a new BuildService instance
    pub fn new(store: S, config: BuildConfig, stock: &StockConfig) -> Self {
        let ledger = InventoryLedger::new(StockPolicy::from_config(stock));
        let allocation = AllocationEngine::new(ledger);
        let hierarchy = HierarchyCoordinator::new(allocation.clone());
        Self {
            store,
            config,
            allocation,
            hierarchy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn ledger(&self) -> &InventoryLedger {
        self.allocation.ledger()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Create a build order in the Pending state
    pub async fn create_build(&self, input: CreateBuildInput, actor: Uuid) -> AppResult<Build> {
        input.validate()?;

        let mut tx = self.store.begin().await?;

        let part = tx
            .get_part(input.part_id)
            .await?
            .ok_or_else(|| AppError::validation("part_id", "Part does not exist"))?;

        if !part.assembly {
            return Err(AppError::validation(
                "part_id",
                format!("Part {} is not an assembly", part.name),
            ));
        }

        validate_build_quantity(input.quantity, part.trackable)
            .map_err(|msg| AppError::validation("quantity", msg))?;

        let reference = match input.reference {
            Some(reference) => {
                let reference = reference.trim().to_string();
                self.check_reference(&mut tx, &reference).await?;
                reference
            }
            None => self.generate_reference(&mut tx).await?,
        };

        if let Some(parent_id) = input.parent_id {
            if tx.get_build(parent_id).await?.is_none() {
                return Err(AppError::validation("parent_id", "Parent build does not exist"));
            }
        }
        check_location(&mut tx, "take_from_id", input.take_from_id).await?;
        check_location(&mut tx, "destination_id", input.destination_id).await?;

        let mut build = Build::new(reference, part.id, input.quantity);
        build.title = input.title.unwrap_or_default();
        build.batch = input.batch;
        build.parent_id = input.parent_id;
        build.sales_order_id = input.sales_order_id;
        build.take_from_id = input.take_from_id;
        build.destination_id = input.destination_id;
        build.notes = input.notes;
        build.created_by = Some(actor);

        tx.save_build(&build).await?;

        if self.config.create_initial_outputs {
            self.create_initial_outputs(&mut tx, &part, &build).await?;
        }

        tx.commit().await?;

        tracing::info!(
            build = %build.reference,
            part = %part.name,
            quantity = %build.quantity,
            actor = %actor,
            "Build created"
        );

        Ok(build)
    }

    /// Build with derived status, outputs, allocations and child builds
    pub async fn get_build(&self, build_id: Uuid) -> AppResult<BuildDetail> {
        let mut tx = self.store.begin().await?;

        let build = load_build(&mut tx, build_id).await?;
        let part = load_part(&mut tx, build.part_id).await?;
        let summary = self.allocation.allocation_summary(&mut tx, &part, &build).await?;
        let outputs = tx.build_outputs(build.id).await?;
        let allocations = tx.build_items(build.id).await?;
        let children = tx.child_builds(build.id).await?;

        tx.rollback().await?;

        Ok(BuildDetail {
            build: with_derived_status(build, &summary),
            part,
            outputs,
            allocations,
            summary,
            children,
        })
    }

    /// All builds ordered by status then most recent completion, plus the
    /// active / completed / cancelled groupings
    pub async fn list_builds(&self) -> AppResult<GroupedBuilds<Build>> {
        let mut tx = self.store.begin().await?;

        let mut builds = Vec::new();
        for build in tx.list_builds().await? {
            let build = if build.is_active() {
                let part = load_part(&mut tx, build.part_id).await?;
                let summary = self.allocation.allocation_summary(&mut tx, &part, &build).await?;
                with_derived_status(build, &summary)
            } else {
                build
            };
            builds.push(build);
        }

        tx.rollback().await?;

        builds.sort_by(|a, b| {
            a.status
                .code()
                .cmp(&b.status.code())
                .then_with(|| b.completed_at.cmp(&a.completed_at))
        });

        let pick = |status: &[BuildStatus]| -> Vec<Build> {
            builds
                .iter()
                .filter(|b| status.contains(&b.status))
                .cloned()
                .collect()
        };

        Ok(GroupedBuilds {
            active: pick(&BuildStatus::ACTIVE),
            completed: pick(&[BuildStatus::Complete]),
            cancelled: pick(&[BuildStatus::Cancelled]),
            builds,
        })
    }

    /// Edit an active build
    pub async fn update_build(
        &self,
        build_id: Uuid,
        input: UpdateBuildInput,
        actor: Uuid,
    ) -> AppResult<Build> {
        input.validate()?;

        let mut tx = self.store.begin().await?;

        let mut build = lock_build(&mut tx, build_id).await?;
        ensure_active(&build, "edit")?;
        let part = load_part(&mut tx, build.part_id).await?;

        if let Some(reference) = input.reference {
            let reference = reference.trim().to_string();
            if reference != build.reference {
                self.check_reference(&mut tx, &reference).await?;
                build.reference = reference;
            }
        }

        if let Some(quantity) = input.quantity {
            validate_build_quantity(quantity, part.trackable)
                .map_err(|msg| AppError::validation("quantity", msg))?;
            if quantity < build.quantity {
                return Err(AppError::validation(
                    "quantity",
                    format!("Build quantity cannot be reduced below {}", build.quantity),
                ));
            }
            build.quantity = quantity;
        }

        if let Some(parent_id) = input.parent_id {
            if tx.get_build(parent_id).await?.is_none() {
                return Err(AppError::validation("parent_id", "Parent build does not exist"));
            }
            if self.hierarchy.would_create_cycle(&mut tx, build.id, parent_id).await? {
                return Err(AppError::validation(
                    "parent_id",
                    "A build cannot be its own ancestor",
                ));
            }
            build.parent_id = Some(parent_id);
        }

        check_location(&mut tx, "take_from_id", input.take_from_id).await?;
        check_location(&mut tx, "destination_id", input.destination_id).await?;

        if let Some(title) = input.title {
            build.title = title;
        }
        if input.batch.is_some() {
            build.batch = input.batch;
        }
        if input.sales_order_id.is_some() {
            build.sales_order_id = input.sales_order_id;
        }
        if input.take_from_id.is_some() {
            build.take_from_id = input.take_from_id;
        }
        if input.destination_id.is_some() {
            build.destination_id = input.destination_id;
        }

        tx.save_build(&build).await?;
        self.resize_outputs(&mut tx, &part, &build).await?;
        tx.commit().await?;

        tracing::info!(build = %build.reference, actor = %actor, "Build updated");
        Ok(build)
    }

    /// Replace the notes of a build, whatever its state
    pub async fn update_notes(&self, build_id: Uuid, notes: Option<String>) -> AppResult<Build> {
        let mut tx = self.store.begin().await?;
        let mut build = lock_build(&mut tx, build_id).await?;
        build.notes = notes;
        tx.save_build(&build).await?;
        tx.commit().await?;
        Ok(build)
    }

    /// Delete a build with its allocations and unfinished outputs. Finished
    /// outputs stay in stock without provenance; child builds are detached.
    pub async fn delete_build(&self, build_id: Uuid, actor: Uuid) -> AppResult<()> {
        let mut tx = self.store.begin().await?;

        let build = lock_build(&mut tx, build_id).await?;

        self.allocation.release_all_allocations(&mut tx, build.id).await?;

        for mut output in tx.build_outputs(build.id).await? {
            if output.is_building {
                tx.delete_stock_item(output.id).await?;
            } else {
                output.build_id = None;
                tx.save_stock_item(&output).await?;
            }
        }

        for mut child in tx.child_builds(build.id).await? {
            child.parent_id = None;
            tx.save_build(&child).await?;
        }

        tx.delete_build(build.id).await?;
        tx.commit().await?;

        tracing::info!(build = %build.reference, actor = %actor, "Build deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Proposed allocations, without applying them
    pub async fn get_auto_allocations(&self, build_id: Uuid) -> AppResult<Vec<AllocationProposal>> {
        let mut tx = self.store.begin().await?;
        let build = load_build(&mut tx, build_id).await?;
        let part = load_part(&mut tx, build.part_id).await?;
        let proposals = self
            .allocation
            .compute_auto_allocations(&mut tx, &part, &build)
            .await?;
        tx.rollback().await?;
        Ok(proposals)
    }

    /// Allocate every unambiguous BOM line. Only the remaining gap is
    /// allocated, so repeating the call is harmless.
    pub async fn auto_allocate(&self, build_id: Uuid, actor: Uuid) -> AppResult<Vec<BuildItem>> {
        let mut tx = self.store.begin().await?;

        let build = lock_build(&mut tx, build_id).await?;
        ensure_active(&build, "allocate stock to")?;
        let part = load_part(&mut tx, build.part_id).await?;

        let proposals = self
            .allocation
            .compute_auto_allocations(&mut tx, &part, &build)
            .await?;
        if proposals.is_empty() {
            tracing::debug!(build = %build.reference, "Nothing to auto-allocate");
            return Ok(Vec::new());
        }

        let created = self
            .allocation
            .apply_allocations(&mut tx, &build, &proposals)
            .await
            .inspect_err(|e| tracing::warn!(build = %build.reference, error = %e, "Auto-allocation failed"))?;

        tx.commit().await?;

        tracing::info!(
            build = %build.reference,
            allocations = created.len(),
            actor = %actor,
            "Stock auto-allocated"
        );
        Ok(created)
    }

    /// Release every allocation of the build; the build stays Pending
    pub async fn unallocate_stock(&self, build_id: Uuid, actor: Uuid) -> AppResult<usize> {
        let mut tx = self.store.begin().await?;

        let build = lock_build(&mut tx, build_id).await?;
        ensure_active(&build, "unallocate stock from")?;

        let released = self.allocation.release_all_allocations(&mut tx, build.id).await?;
        tx.commit().await?;

        tracing::info!(build = %build.reference, released, actor = %actor, "Stock unallocated");
        Ok(released)
    }

    pub async fn create_allocation(&self, input: CreateAllocationInput) -> AppResult<BuildItem> {
        let mut tx = self.store.begin().await?;

        let build = lock_build(&mut tx, input.build_id).await?;
        ensure_active(&build, "allocate stock to")?;
        let part = load_part(&mut tx, build.part_id).await?;

        let allocation = self
            .allocation
            .create_allocation(
                &mut tx,
                &part,
                &build,
                input.stock_item_id,
                input.quantity,
                input.install_into_id,
            )
            .await?;
        tx.commit().await?;

        tracing::info!(
            build = %build.reference,
            stock_item = %allocation.stock_item_id,
            quantity = %allocation.quantity,
            "Stock allocated"
        );
        Ok(allocation)
    }

    pub async fn update_allocation(&self, allocation_id: Uuid, quantity: Decimal) -> AppResult<BuildItem> {
        let mut tx = self.store.begin().await?;

        let allocation = tx
            .get_build_item(allocation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Build item".to_string()))?;
        let build = lock_build(&mut tx, allocation.build_id).await?;
        ensure_active(&build, "change allocations of")?;

        let updated = self
            .allocation
            .update_allocation(&mut tx, allocation, quantity)
            .await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn delete_allocation(&self, allocation_id: Uuid) -> AppResult<()> {
        let mut tx = self.store.begin().await?;

        let allocation = tx
            .get_build_item(allocation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Build item".to_string()))?;
        let build = lock_build(&mut tx, allocation.build_id).await?;
        ensure_active(&build, "change allocations of")?;

        self.allocation.release_allocation(&mut tx, allocation.id).await?;
        tx.commit().await?;

        tracing::info!(build = %build.reference, allocation = %allocation.id, "Allocation removed");
        Ok(())
    }

    /// Outstanding requirement of one BOM line
    pub async fn get_unallocated_quantity(&self, build_id: Uuid, part_id: Uuid) -> AppResult<Decimal> {
        let mut tx = self.store.begin().await?;
        let build = load_build(&mut tx, build_id).await?;
        let part = load_part(&mut tx, build.part_id).await?;
        let quantity = self
            .allocation
            .unallocated_quantity(&mut tx, &part, &build, part_id)
            .await?;
        tx.rollback().await?;
        Ok(quantity)
    }

    pub async fn allocation_summary(&self, build_id: Uuid) -> AppResult<Vec<BomLineAllocation>> {
        let mut tx = self.store.begin().await?;
        let build = load_build(&mut tx, build_id).await?;
        let part = load_part(&mut tx, build.part_id).await?;
        let summary = self.allocation.allocation_summary(&mut tx, &part, &build).await?;
        tx.rollback().await?;
        Ok(summary)
    }

    pub async fn suggest_allocation(
        &self,
        build_id: Uuid,
        part_id: Uuid,
        stock_item_id: Option<Uuid>,
        quantity: Option<Decimal>,
        install_into_id: Option<Uuid>,
    ) -> AppResult<AllocationSuggestion> {
        let mut tx = self.store.begin().await?;
        let build = load_build(&mut tx, build_id).await?;
        let part = load_part(&mut tx, build.part_id).await?;
        let suggestion = self
            .allocation
            .suggest_allocation(
                &mut tx,
                &part,
                &build,
                part_id,
                stock_item_id,
                quantity,
                install_into_id,
            )
            .await?;
        tx.rollback().await?;
        Ok(suggestion)
    }

    // ------------------------------------------------------------------------
    // Completion and cancellation
    // ------------------------------------------------------------------------

    pub async fn completion_defaults(&self, build_id: Uuid) -> AppResult<CompletionDefaults> {
        let mut tx = self.store.begin().await?;

        let build = load_build(&mut tx, build_id).await?;
        ensure_active(&build, "complete")?;
        let part = load_part(&mut tx, build.part_id).await?;

        let serial_numbers = if part.trackable {
            let count = trackable_units(&build)? as i64;
            Some(
                self.ledger()
                    .serial_number_placeholder(&mut tx, part.id, count)
                    .await?,
            )
        } else {
            None
        };
        let allocations = tx.build_items(build.id).await?;

        tx.rollback().await?;

        Ok(CompletionDefaults {
            build_id: build.id,
            location_id: build.destination_id.or(part.default_location_id),
            quantity: build.quantity,
            serial_numbers,
            allocations,
        })
    }

    /// Parse the serial number text of a completion request. Non-trackable
    /// parts take no serials and the text is ignored.
    pub async fn parse_serial_numbers(&self, build_id: Uuid, text: Option<&str>) -> AppResult<Vec<i64>> {
        let mut tx = self.store.begin().await?;
        let build = load_build(&mut tx, build_id).await?;
        let part = load_part(&mut tx, build.part_id).await?;
        tx.rollback().await?;

        if !part.trackable {
            return Ok(Vec::new());
        }

        let expected = trackable_units(&build)?;

        extract_serial_numbers(text.unwrap_or_default(), expected as i64).map_err(|e| {
            AppError::Validation {
                field: "serial_numbers".to_string(),
                messages: e.messages,
            }
        })
    }

    /// Complete a build.
    ///
    /// Serial numbers and the target location are validated before anything
    /// is written. Allocated stock is then consumed, outputs are finalized at
    /// the location and the build is marked Complete, all in one transaction.
    pub async fn complete_build(
        &self,
        build_id: Uuid,
        input: CompleteBuildInput,
        actor: Uuid,
    ) -> AppResult<CompletedBuild> {
        let mut tx = self.store.begin().await?;

        let mut build = lock_build(&mut tx, build_id).await?;
        ensure_transition(&build, BuildStatus::Complete, "complete")?;
        let part = load_part(&mut tx, build.part_id).await?;

        let location = tx
            .get_location(input.location_id)
            .await?
            .ok_or_else(|| AppError::validation("location", "Location does not exist"))?;

        let serials = if part.trackable {
            self.check_serials(&mut tx, &part, &build, &input.serial_numbers)
                .await
                .inspect_err(|e| tracing::warn!(build = %build.reference, error = %e, "Completion rejected"))?;
            input.serial_numbers
        } else {
            if !input.serial_numbers.is_empty() {
                tracing::debug!(build = %build.reference, "Ignoring serial numbers for untracked part");
            }
            Vec::new()
        };

        if self.config.require_full_allocation {
            let summary = self.allocation.allocation_summary(&mut tx, &part, &build).await?;
            if summary.iter().any(|line| !line.fully_allocated) {
                return Err(AppError::validation(
                    "allocations",
                    "Build is not fully allocated",
                ));
            }
        }

        // Consume allocated stock
        let consumed = tx.build_items(build.id).await?;
        for allocation in &consumed {
            tx.delete_build_item(allocation.id).await?;
            self.ledger()
                .take_stock(&mut tx, allocation.stock_item_id, allocation.quantity, &build, actor)
                .await?;
        }

        // Finalize outputs
        let mut outputs = self
            .finalize_outputs(&mut tx, &part, &build, &location, &serials, actor)
            .await?;

        build.status = BuildStatus::Complete;
        build.completed_at = Some(Utc::now());
        build.completed_by = Some(actor);
        tx.save_build(&build).await?;

        let parent = self
            .hierarchy
            .on_completed(&mut tx, &build, &mut outputs)
            .await?;

        tx.commit().await?;

        tracing::info!(
            build = %build.reference,
            outputs = outputs.len(),
            consumed = consumed.len(),
            location = %location.name,
            actor = %actor,
            "Build completed"
        );

        Ok(CompletedBuild {
            build,
            outputs,
            consumed,
            parent,
        })
    }

    /// Cancel a build: release allocations, drop unfinished outputs. There is
    /// no way back from Cancelled.
    pub async fn cancel_build(&self, build_id: Uuid, actor: Uuid) -> AppResult<Build> {
        let mut tx = self.store.begin().await?;

        let mut build = lock_build(&mut tx, build_id).await?;
        ensure_transition(&build, BuildStatus::Cancelled, "cancel")?;

        let released = self.allocation.release_all_allocations(&mut tx, build.id).await?;

        for output in tx.build_outputs(build.id).await? {
            if output.is_building {
                tx.delete_stock_item(output.id).await?;
            }
        }

        build.status = BuildStatus::Cancelled;
        build.completed_at = Some(Utc::now());
        build.completed_by = Some(actor);
        tx.save_build(&build).await?;

        self.hierarchy.on_cancelled(&mut tx, &build).await?;

        tx.commit().await?;

        tracing::info!(build = %build.reference, released, actor = %actor, "Build cancelled");
        Ok(build)
    }

    // ------------------------------------------------------------------------
    // Stock queries
    // ------------------------------------------------------------------------

    pub async fn stock_detail(&self, stock_item_id: Uuid) -> AppResult<StockDetail> {
        let mut tx = self.store.begin().await?;
        let item = tx
            .get_stock_item(stock_item_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Stock item".to_string()))?;
        let unallocated = self.ledger().unallocated_quantity(&mut tx, &item).await?;
        let allocations = tx.allocations_for_stock(item.id).await?;
        let tracking = tx.tracking_for_item(item.id).await?;
        tx.rollback().await?;

        Ok(StockDetail {
            item,
            unallocated,
            allocations,
            tracking,
        })
    }

    /// Every location in the subtree below `location_id`, itself included
    pub async fn location_subtree(&self, location_id: Uuid) -> AppResult<Vec<StockLocation>> {
        let mut tx = self.store.begin().await?;
        if tx.get_location(location_id).await?.is_none() {
            return Err(AppError::NotFound("Location".to_string()));
        }

        let ids = self.ledger().unique_children(&mut tx, location_id).await?;
        let mut locations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(location) = tx.get_location(id).await? {
                locations.push(location);
            }
        }
        tx.rollback().await?;

        locations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(locations)
    }

    pub async fn next_serial_number(&self, part_id: Uuid) -> AppResult<NextSerial> {
        let mut tx = self.store.begin().await?;
        load_part(&mut tx, part_id).await?;
        let next = self.ledger().next_serial_number(&mut tx, part_id).await?;
        tx.rollback().await?;
        Ok(NextSerial { part_id, next })
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn check_reference(&self, tx: &mut S::Tx, reference: &str) -> AppResult<()> {
        validate_reference(reference).map_err(|msg| AppError::validation("reference", msg))?;
        if tx.reference_exists(reference).await? {
            return Err(AppError::validation(
                "reference",
                format!("Build reference '{}' already exists", reference),
            ));
        }
        Ok(())
    }

    async fn generate_reference(&self, tx: &mut S::Tx) -> AppResult<String> {
        loop {
            let number = tx.next_build_number().await?;
            let reference = format!("{}{:04}", self.config.reference_prefix, number);
            if !tx.reference_exists(&reference).await? {
                return Ok(reference);
            }
        }
    }

    async fn create_initial_outputs(&self, tx: &mut S::Tx, part: &Part, build: &Build) -> AppResult<()> {
        let location = build.destination_id.or(part.default_location_id);

        let outputs: Vec<StockItem> = if part.trackable {
            let count = trackable_units(build)?;
            (0..count)
                .map(|_| StockItem::build_output(part.id, build.id, Decimal::ONE, location))
                .collect()
        } else {
            vec![StockItem::build_output(part.id, build.id, build.quantity, location)]
        };

        for mut output in outputs {
            output.batch = build.batch.clone();
            tx.save_stock_item(&output).await?;
        }
        Ok(())
    }

    /// Keep existing in-progress outputs in step with a grown build quantity
    async fn resize_outputs(&self, tx: &mut S::Tx, part: &Part, build: &Build) -> AppResult<()> {
        let in_progress: Vec<StockItem> = tx
            .build_outputs(build.id)
            .await?
            .into_iter()
            .filter(|s| s.is_building)
            .collect();
        let Some(first) = in_progress.first() else {
            return Ok(());
        };

        if part.trackable {
            let wanted = trackable_units(build)?;
            for _ in in_progress.len()..wanted {
                let mut output =
                    StockItem::build_output(part.id, build.id, Decimal::ONE, first.location_id);
                output.batch = build.batch.clone();
                tx.save_stock_item(&output).await?;
            }
        } else if first.quantity != build.quantity {
            let mut output = first.clone();
            output.quantity = build.quantity;
            output.updated_at = Utc::now();
            tx.save_stock_item(&output).await?;
        }
        Ok(())
    }

    async fn check_serials(
        &self,
        tx: &mut S::Tx,
        part: &Part,
        build: &Build,
        serials: &[i64],
    ) -> AppResult<()> {
        let expected = trackable_units(build)?;
        if serials.len() != expected {
            return Err(AppError::validation(
                "serial_numbers",
                format!(
                    "Number of serial numbers ({}) must match quantity ({})",
                    serials.len(),
                    expected
                ),
            ));
        }

        let duplicates = duplicate_serials(serials);
        if !duplicates.is_empty() {
            return Err(AppError::validation(
                "serial_numbers",
                format!("Duplicate serial numbers: {}", join_serials(&duplicates)),
            ));
        }

        let mut existing = Vec::new();
        for serial in serials {
            if self.ledger().check_serial_number_exists(tx, part.id, *serial).await? {
                existing.push(*serial);
            }
        }
        if !existing.is_empty() {
            return Err(AppError::validation(
                "serial_numbers",
                format!(
                    "The following serial numbers already exist: {}",
                    join_serials(&existing)
                ),
            ));
        }

        Ok(())
    }

    async fn finalize_outputs(
        &self,
        tx: &mut S::Tx,
        part: &Part,
        build: &Build,
        location: &StockLocation,
        serials: &[i64],
        actor: Uuid,
    ) -> AppResult<Vec<StockItem>> {
        let mut in_progress = tx
            .build_outputs(build.id)
            .await?
            .into_iter()
            .filter(|s| s.is_building);

        let mut outputs = Vec::new();
        if part.trackable {
            for serial in serials {
                let mut output = in_progress.next().unwrap_or_else(|| {
                    StockItem::build_output(part.id, build.id, Decimal::ONE, None)
                });
                output.quantity = Decimal::ONE;
                output.serial = Some(*serial);
                outputs.push(output);
            }
        } else {
            let mut output = in_progress.next().unwrap_or_else(|| {
                StockItem::build_output(part.id, build.id, build.quantity, None)
            });
            output.quantity = build.quantity;
            outputs.push(output);
        }

        for surplus in in_progress {
            tx.delete_stock_item(surplus.id).await?;
        }

        let now = Utc::now();
        for output in &mut outputs {
            output.location_id = Some(location.id);
            output.is_building = false;
            if build.batch.is_some() {
                output.batch = build.batch.clone();
            }
            output.updated_at = now;
            tx.save_stock_item(output).await?;

            let entry = StockTrackingEntry::new(
                output.id,
                part.id,
                format!("Completed build {}", build.reference),
                output.quantity,
            )
            .for_build(build.id, actor);
            tx.add_tracking_entry(&entry).await?;
        }

        Ok(outputs)
    }
}

// ============================================================================
// Free helpers
// ============================================================================

async fn load_build<T: StoreTx>(tx: &mut T, build_id: Uuid) -> AppResult<Build> {
    tx.get_build(build_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Build".to_string()))
}

async fn lock_build<T: StoreTx>(tx: &mut T, build_id: Uuid) -> AppResult<Build> {
    tx.lock_build(build_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Build".to_string()))
}

async fn load_part<T: StoreTx>(tx: &mut T, part_id: Uuid) -> AppResult<Part> {
    tx.get_part(part_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Part".to_string()))
}

async fn check_location<T: StoreTx>(
    tx: &mut T,
    field: &str,
    location_id: Option<Uuid>,
) -> AppResult<()> {
    if let Some(id) = location_id {
        if tx.get_location(id).await?.is_none() {
            return Err(AppError::validation(field, "Location does not exist"));
        }
    }
    Ok(())
}

/// Number of unit outputs of a trackable build
fn trackable_units(build: &Build) -> AppResult<usize> {
    unit_count(build.quantity)
        .filter(|units| *units <= MAX_TRACKABLE_UNITS)
        .ok_or_else(|| {
            AppError::validation(
                "quantity",
                format!(
                    "Trackable builds must be a whole number of at most {} units",
                    MAX_TRACKABLE_UNITS
                ),
            )
        })
}

fn ensure_active(build: &Build, action: &str) -> AppResult<()> {
    if build.is_terminal() {
        tracing::warn!(build = %build.reference, status = %build.status, "Rejected attempt to {} build", action);
        return Err(AppError::InvalidStateTransition(format!(
            "Cannot {} build {}: it is already {}",
            action, build.reference, build.status
        )));
    }
    Ok(())
}

fn ensure_transition(build: &Build, next: BuildStatus, action: &str) -> AppResult<()> {
    if !build.status.can_transition_to(next) {
        tracing::warn!(build = %build.reference, status = %build.status, next = %next, "Rejected attempt to {} build", action);
        return Err(AppError::InvalidStateTransition(format!(
            "Cannot {} build {}: it is already {}",
            action, build.reference, build.status
        )));
    }
    Ok(())
}

/// Report a Pending build whose every BOM line is covered as Allocated
fn with_derived_status(mut build: Build, summary: &[BomLineAllocation]) -> Build {
    if build.status == BuildStatus::Pending
        && !summary.is_empty()
        && summary.iter().all(|line| line.fully_allocated)
    {
        build.status = BuildStatus::Allocated;
    }
    build
}
