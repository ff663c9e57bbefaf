//! Business logic services for build orders

pub mod allocation;
pub mod build;
pub mod hierarchy;
pub mod inventory;

pub use allocation::{AllocationEngine, AllocationSuggestion};
pub use build::{
    BuildDetail, BuildService, CompleteBuildInput, CompletedBuild, CompletionDefaults,
    CreateAllocationInput, CreateBuildInput, NextSerial, StockDetail, UpdateBuildInput,
};
pub use hierarchy::{HierarchyCoordinator, ParentAvailability};
pub use inventory::{InventoryLedger, StockCandidate, StockPolicy};
