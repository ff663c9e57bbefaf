//! Build hierarchy: parent/child builds and what completion means for them

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use shared::models::{Build, StockItem};

use super::allocation::AllocationEngine;
use crate::error::{AppError, AppResult};
use crate::store::StoreTx;

/// Stock a completed child build made available to its parent
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParentAvailability {
    pub parent_id: Uuid,
    pub parent_reference: String,
    pub part_id: Uuid,
    /// Quantity the completed build produced
    pub produced: Decimal,
    /// Parent's outstanding requirement for the part
    pub unallocated: Decimal,
}

/// Build hierarchy coordinator
#[derive(Debug, Clone, Default)]
pub struct HierarchyCoordinator {
    allocation: AllocationEngine,
}

impl HierarchyCoordinator {
    pub fn new(allocation: AllocationEngine) -> Self {
        Self { allocation }
    }

    /// Parent chain, nearest first
    pub async fn ancestors<T: StoreTx>(&self, tx: &mut T, build: &Build) -> AppResult<Vec<Build>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([build.id]);
        let mut next = build.parent_id;

        while let Some(parent_id) = next {
            if !seen.insert(parent_id) {
                return Err(AppError::Integrity(format!(
                    "Build hierarchy of {} contains a cycle",
                    build.reference
                )));
            }
            let Some(parent) = tx.get_build(parent_id).await? else {
                break;
            };
            next = parent.parent_id;
            chain.push(parent);
        }

        Ok(chain)
    }

    /// Every build below this one, breadth first
    pub async fn descendants<T: StoreTx>(&self, tx: &mut T, build_id: Uuid) -> AppResult<Vec<Build>> {
        let mut found = Vec::new();
        let mut seen = HashSet::from([build_id]);
        let mut frontier = vec![build_id];

        while !frontier.is_empty() {
            let mut next = Vec::new();
            for id in frontier {
                for child in tx.child_builds(id).await? {
                    if seen.insert(child.id) {
                        next.push(child.id);
                        found.push(child);
                    }
                }
            }
            frontier = next;
        }

        Ok(found)
    }

    /// Whether making `parent_id` the parent of `build_id` would close a loop
    pub async fn would_create_cycle<T: StoreTx>(
        &self,
        tx: &mut T,
        build_id: Uuid,
        parent_id: Uuid,
    ) -> AppResult<bool> {
        if build_id == parent_id {
            return Ok(true);
        }
        Ok(self
            .descendants(tx, build_id)
            .await?
            .iter()
            .any(|b| b.id == parent_id))
    }

    /// Finished stock produced by a build and everything below it
    pub async fn stock_from_build_tree<T: StoreTx>(
        &self,
        tx: &mut T,
        build_id: Uuid,
    ) -> AppResult<Vec<StockItem>> {
        let mut ids = vec![build_id];
        ids.extend(self.descendants(tx, build_id).await?.into_iter().map(|b| b.id));

        let mut stock = Vec::new();
        for id in ids {
            stock.extend(
                tx.build_outputs(id)
                    .await?
                    .into_iter()
                    .filter(|s| !s.is_building),
            );
        }
        Ok(stock)
    }

    /// Record provenance on the finished outputs and report what the parent
    /// build can now draw on. Nothing is allocated to the parent.
    pub async fn on_completed<T: StoreTx>(
        &self,
        tx: &mut T,
        build: &Build,
        outputs: &mut [StockItem],
    ) -> AppResult<Option<ParentAvailability>> {
        for output in outputs.iter_mut() {
            output.build_id = Some(build.id);
            if build.sales_order_id.is_some() {
                output.sales_order_id = build.sales_order_id;
            }
            tx.save_stock_item(output).await?;
        }

        let Some(parent_id) = build.parent_id else {
            return Ok(None);
        };
        let Some(parent) = tx.get_build(parent_id).await? else {
            return Ok(None);
        };
        if parent.is_terminal() {
            return Ok(None);
        }
        let Some(parent_part) = tx.get_part(parent.part_id).await? else {
            return Ok(None);
        };
        if !parent_part.uses(build.part_id) {
            return Ok(None);
        }

        let unallocated = self
            .allocation
            .unallocated_quantity(tx, &parent_part, &parent, build.part_id)
            .await?;

        let report = ParentAvailability {
            parent_id: parent.id,
            parent_reference: parent.reference.clone(),
            part_id: build.part_id,
            produced: outputs.iter().map(|o| o.quantity).sum(),
            unallocated,
        };

        tracing::info!(
            build = %build.reference,
            parent = %report.parent_reference,
            produced = %report.produced,
            unallocated = %report.unallocated,
            "Build output available to parent build"
        );

        Ok(Some(report))
    }

    /// Cancellation leaves children and parent allocations alone; active
    /// children are only reported.
    pub async fn on_cancelled<T: StoreTx>(&self, tx: &mut T, build: &Build) -> AppResult<Vec<Build>> {
        let active: Vec<Build> = tx
            .child_builds(build.id)
            .await?
            .into_iter()
            .filter(|b| b.is_active())
            .collect();

        if !active.is_empty() {
            tracing::warn!(
                build = %build.reference,
                children = active.len(),
                "Cancelled build still has active child builds"
            );
        }

        Ok(active)
    }
}
