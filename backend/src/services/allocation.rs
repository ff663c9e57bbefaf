//! Allocation engine: reserving stock against builds
//!
//! A [`BuildItem`] reserves part of a stock item for a build without touching
//! the stock quantity. Every mutating call here locks the source stock row
//! first and re-checks its unallocated quantity, so the sum of allocations
//! against an item can never exceed the item's quantity.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use shared::models::{AllocationProposal, BomLineAllocation, Build, BuildItem, Part, StockItem};
use shared::validation::validate_allocation_quantity;

use super::inventory::{InventoryLedger, StockCandidate};
use crate::error::{AppError, AppResult};
use crate::store::StoreTx;

/// Form defaults for a new allocation
#[derive(Debug, Clone, Serialize)]
pub struct AllocationSuggestion {
    pub build_id: Uuid,
    pub part_id: Uuid,
    /// Stock that may be allocated to this BOM line
    pub candidates: Vec<StockCandidate>,
    /// Pre-selected stock item
    pub stock_item_id: Option<Uuid>,
    pub quantity: Decimal,
    pub install_into_id: Option<Uuid>,
}

/// Allocation engine
#[derive(Debug, Clone, Default)]
pub struct AllocationEngine {
    ledger: InventoryLedger,
}

impl AllocationEngine {
    /// Create a new AllocationEngine instance
    pub fn new(ledger: InventoryLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Quantity of a sub-part the build needs in total
    pub fn required_quantity(&self, part: &Part, build: &Build, sub_part_id: Uuid) -> Decimal {
        part.required_quantity(sub_part_id, build.quantity)
    }

    /// Allocations of a build paired with their source stock
    pub async fn allocations_with_stock<T: StoreTx>(
        &self,
        tx: &mut T,
        build_id: Uuid,
    ) -> AppResult<Vec<(BuildItem, StockItem)>> {
        let mut pairs = Vec::new();
        for allocation in tx.build_items(build_id).await? {
            let stock = tx.get_stock_item(allocation.stock_item_id).await?.ok_or_else(|| {
                AppError::Integrity(format!(
                    "Build item {} references missing stock item {}",
                    allocation.id, allocation.stock_item_id
                ))
            })?;
            pairs.push((allocation, stock));
        }
        Ok(pairs)
    }

    /// Quantity of a sub-part currently allocated to the build
    pub async fn allocated_quantity<T: StoreTx>(
        &self,
        tx: &mut T,
        build_id: Uuid,
        sub_part_id: Uuid,
    ) -> AppResult<Decimal> {
        Ok(self
            .allocations_with_stock(tx, build_id)
            .await?
            .iter()
            .filter(|(_, stock)| stock.part_id == sub_part_id)
            .map(|(allocation, _)| allocation.quantity)
            .sum())
    }

    /// Remaining requirement for a sub-part, never negative
    pub async fn unallocated_quantity<T: StoreTx>(
        &self,
        tx: &mut T,
        part: &Part,
        build: &Build,
        sub_part_id: Uuid,
    ) -> AppResult<Decimal> {
        let required = self.required_quantity(part, build, sub_part_id);
        let allocated = self.allocated_quantity(tx, build.id, sub_part_id).await?;
        Ok((required - allocated).max(Decimal::ZERO))
    }

    /// Required, allocated and outstanding quantity of every BOM line
    pub async fn allocation_summary<T: StoreTx>(
        &self,
        tx: &mut T,
        part: &Part,
        build: &Build,
    ) -> AppResult<Vec<BomLineAllocation>> {
        let pairs = self.allocations_with_stock(tx, build.id).await?;

        Ok(part
            .bom
            .iter()
            .map(|line| {
                let allocated = pairs
                    .iter()
                    .filter(|(_, stock)| stock.part_id == line.sub_part_id)
                    .map(|(allocation, _)| allocation.quantity)
                    .sum();
                BomLineAllocation::new(
                    line.sub_part_id,
                    self.required_quantity(part, build, line.sub_part_id),
                    allocated,
                )
            })
            .collect())
    }

    /// Available stock for a BOM line, minus items this build already holds.
    /// For a specific output only allocations into that output count as held.
    pub async fn candidates<T: StoreTx>(
        &self,
        tx: &mut T,
        build: &Build,
        sub_part_id: Uuid,
        install_into_id: Option<Uuid>,
    ) -> AppResult<Vec<StockCandidate>> {
        let held: HashSet<Uuid> = tx
            .build_items(build.id)
            .await?
            .into_iter()
            .filter(|a| install_into_id.is_none() || a.install_into_id == install_into_id)
            .map(|a| a.stock_item_id)
            .collect();

        Ok(self
            .ledger
            .available_stock(tx, sub_part_id, build.take_from_id)
            .await?
            .into_iter()
            .filter(|c| !held.contains(&c.item.id))
            .collect())
    }

    // ========================================================================
    // Auto-allocation
    // ========================================================================

    /// Propose allocations for every outstanding BOM line.
    ///
    /// A line is only filled when exactly one candidate stock item exists;
    /// ambiguous lines are left for the user. Trackable builds are filled
    /// per in-progress output, so every proposal names the unit it is
    /// installed into.
    pub async fn compute_auto_allocations<T: StoreTx>(
        &self,
        tx: &mut T,
        part: &Part,
        build: &Build,
    ) -> AppResult<Vec<AllocationProposal>> {
        let targets: Vec<Option<StockItem>> = if part.trackable {
            tx.build_outputs(build.id)
                .await?
                .into_iter()
                .filter(|o| o.is_building)
                .map(Some)
                .collect()
        } else {
            vec![None]
        };
        let pairs = self.allocations_with_stock(tx, build.id).await?;

        let mut proposals = Vec::new();
        let mut proposed: HashMap<Uuid, Decimal> = HashMap::new();

        for line in &part.bom {
            for target in &targets {
                let install_into_id = target.as_ref().map(|o| o.id);
                let gap = match target {
                    Some(output) => {
                        let allocated: Decimal = pairs
                            .iter()
                            .filter(|(a, stock)| {
                                stock.part_id == line.sub_part_id
                                    && a.install_into_id == install_into_id
                            })
                            .map(|(a, _)| a.quantity)
                            .sum();
                        (line.quantity * output.quantity - allocated).max(Decimal::ZERO)
                    }
                    None => self.unallocated_quantity(tx, part, build, line.sub_part_id).await?,
                };
                if gap <= Decimal::ZERO {
                    continue;
                }

                let candidates: Vec<StockCandidate> = self
                    .candidates(tx, build, line.sub_part_id, install_into_id)
                    .await?
                    .into_iter()
                    .map(|mut c| {
                        c.unallocated -= proposed.get(&c.item.id).copied().unwrap_or_default();
                        c
                    })
                    .filter(|c| c.unallocated > Decimal::ZERO)
                    .collect();

                let [candidate] = candidates.as_slice() else {
                    tracing::debug!(
                        build = %build.reference,
                        part = %line.sub_part_id,
                        candidates = candidates.len(),
                        "No unambiguous stock for BOM line"
                    );
                    continue;
                };

                let quantity = gap.min(candidate.unallocated);
                *proposed.entry(candidate.item.id).or_default() += quantity;
                proposals.push(AllocationProposal {
                    stock_item_id: candidate.item.id,
                    part_id: line.sub_part_id,
                    quantity,
                    install_into_id,
                });
            }
        }

        tracing::debug!(build = %build.reference, proposals = proposals.len(), "Computed auto allocations");
        Ok(proposals)
    }

    /// Persist proposals, re-validating each against locked stock
    pub async fn apply_allocations<T: StoreTx>(
        &self,
        tx: &mut T,
        build: &Build,
        proposals: &[AllocationProposal],
    ) -> AppResult<Vec<BuildItem>> {
        let mut created = Vec::with_capacity(proposals.len());

        for proposal in proposals {
            let stock = tx.lock_stock_item(proposal.stock_item_id).await?.ok_or_else(|| {
                AppError::Allocation(format!(
                    "Stock item {} is no longer available",
                    proposal.stock_item_id
                ))
            })?;

            let available = self.ledger.unallocated_quantity(tx, &stock).await?;
            if proposal.quantity > available {
                return Err(AppError::Allocation(format!(
                    "Cannot allocate {} from stock item {}: only {} unallocated",
                    proposal.quantity, stock.id, available
                )));
            }

            let allocation = BuildItem::new(
                build.id,
                stock.id,
                proposal.quantity,
                proposal.install_into_id,
            );
            tx.save_build_item(&allocation).await?;
            created.push(allocation);
        }

        Ok(created)
    }

    // ========================================================================
    // Manual allocation
    // ========================================================================

    /// Allocate stock to a build after validating every precondition
    pub async fn create_allocation<T: StoreTx>(
        &self,
        tx: &mut T,
        part: &Part,
        build: &Build,
        stock_item_id: Uuid,
        quantity: Decimal,
        install_into_id: Option<Uuid>,
    ) -> AppResult<BuildItem> {
        let stock = tx
            .lock_stock_item(stock_item_id)
            .await?
            .ok_or_else(|| AppError::validation("stock_item_id", "Stock item does not exist"))?;

        validate_allocation_quantity(quantity, stock.is_serialized())
            .map_err(|msg| AppError::validation("quantity", msg))?;

        if !part.uses(stock.part_id) {
            return Err(AppError::validation(
                "stock_item_id",
                format!("Part {} is not in the bill of materials of {}", stock.part_id, part.name),
            ));
        }

        if !self.ledger.in_stock(&stock) {
            return Err(AppError::validation(
                "stock_item_id",
                "Stock item is not available for allocation",
            ));
        }

        if let Some(take_from) = build.take_from_id {
            let scope = self.ledger.unique_children(tx, take_from).await?;
            if !stock.location_id.is_some_and(|l| scope.contains(&l)) {
                return Err(AppError::validation(
                    "stock_item_id",
                    "Stock item is outside the build's source location",
                ));
            }
        }

        if part.trackable && install_into_id.is_none() {
            return Err(AppError::validation(
                "install_into_id",
                "Allocations to a trackable build must name the output they are installed into",
            ));
        }

        if let Some(output_id) = install_into_id {
            let output = tx.get_stock_item(output_id).await?;
            let owned = output.is_some_and(|o| o.is_building && o.build_id == Some(build.id));
            if !owned {
                return Err(AppError::validation(
                    "install_into_id",
                    "Output must be an in-progress stock item of this build",
                ));
            }
        }

        let duplicate = tx.build_items(build.id).await?.into_iter().any(|a| {
            a.stock_item_id == stock.id && a.install_into_id == install_into_id
        });
        if duplicate {
            return Err(AppError::validation(
                "stock_item_id",
                "Stock item is already allocated to this build",
            ));
        }

        let available = self.ledger.unallocated_quantity(tx, &stock).await?;
        if quantity > available {
            return Err(AppError::validation(
                "quantity",
                format!("Allocated quantity ({}) must not exceed available stock quantity ({})", quantity, available),
            ));
        }

        let allocation = BuildItem::new(build.id, stock.id, quantity, install_into_id);
        tx.save_build_item(&allocation).await?;

        Ok(allocation)
    }

    /// Change the quantity of an existing allocation
    pub async fn update_allocation<T: StoreTx>(
        &self,
        tx: &mut T,
        allocation: BuildItem,
        quantity: Decimal,
    ) -> AppResult<BuildItem> {
        let stock = tx
            .lock_stock_item(allocation.stock_item_id)
            .await?
            .ok_or_else(|| AppError::Integrity("Allocated stock item vanished".to_string()))?;

        validate_allocation_quantity(quantity, stock.is_serialized())
            .map_err(|msg| AppError::validation("quantity", msg))?;

        let available = self.ledger.unallocated_quantity(tx, &stock).await? + allocation.quantity;
        if quantity > available {
            return Err(AppError::validation(
                "quantity",
                format!("Allocated quantity ({}) must not exceed available stock quantity ({})", quantity, available),
            ));
        }

        let updated = BuildItem {
            quantity,
            ..allocation
        };
        tx.save_build_item(&updated).await?;

        Ok(updated)
    }

    /// Drop one reservation; the stock quantity is untouched
    pub async fn release_allocation<T: StoreTx>(&self, tx: &mut T, allocation_id: Uuid) -> AppResult<()> {
        tx.delete_build_item(allocation_id).await
    }

    /// Drop every reservation of a build, returning how many were released
    pub async fn release_all_allocations<T: StoreTx>(
        &self,
        tx: &mut T,
        build_id: Uuid,
    ) -> AppResult<usize> {
        let allocations = tx.build_items(build_id).await?;
        for allocation in &allocations {
            tx.delete_build_item(allocation.id).await?;
        }
        Ok(allocations.len())
    }

    /// Defaults for the allocation form of one BOM line
    pub async fn suggest_allocation<T: StoreTx>(
        &self,
        tx: &mut T,
        part: &Part,
        build: &Build,
        sub_part_id: Uuid,
        stock_item_id: Option<Uuid>,
        quantity: Option<Decimal>,
        install_into_id: Option<Uuid>,
    ) -> AppResult<AllocationSuggestion> {
        let gap = match quantity {
            Some(q) => q,
            None => self.unallocated_quantity(tx, part, build, sub_part_id).await?,
        };
        let candidates = self.candidates(tx, build, sub_part_id, install_into_id).await?;

        let selected = match stock_item_id {
            Some(id) => match tx.get_stock_item(id).await? {
                Some(item) => {
                    let unallocated = self.ledger.unallocated_quantity(tx, &item).await?;
                    Some(StockCandidate { item, unallocated })
                }
                None => None,
            },
            None if candidates.len() == 1 => candidates.first().cloned(),
            None => None,
        };

        let (stock_item_id, quantity) = match &selected {
            Some(c) => (Some(c.item.id), gap.min(c.unallocated)),
            None => (None, gap),
        };

        Ok(AllocationSuggestion {
            build_id: build.id,
            part_id: sub_part_id,
            candidates,
            stock_item_id,
            quantity,
            install_into_id,
        })
    }
}
