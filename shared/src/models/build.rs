//! Build order and allocation models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a build order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    /// Every BOM line is covered by allocations (derived, never persisted)
    Allocated,
    Cancelled,
    Complete,
}

impl BuildStatus {
    pub const ACTIVE: [BuildStatus; 2] = [BuildStatus::Pending, BuildStatus::Allocated];

    pub fn code(&self) -> i16 {
        match self {
            BuildStatus::Pending => 10,
            BuildStatus::Allocated => 20,
            BuildStatus::Cancelled => 30,
            BuildStatus::Complete => 40,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            10 => Some(BuildStatus::Pending),
            20 => Some(BuildStatus::Allocated),
            30 => Some(BuildStatus::Cancelled),
            40 => Some(BuildStatus::Complete),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Complete | BuildStatus::Cancelled)
    }

    /// Transitions only move forward; terminal states are final
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        match (self, next) {
            (BuildStatus::Pending, BuildStatus::Allocated)
            | (BuildStatus::Allocated, BuildStatus::Pending) => true,
            (BuildStatus::Pending | BuildStatus::Allocated, BuildStatus::Complete)
            | (BuildStatus::Pending | BuildStatus::Allocated, BuildStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Pending => write!(f, "Pending"),
            BuildStatus::Allocated => write!(f, "Allocated"),
            BuildStatus::Cancelled => write!(f, "Cancelled"),
            BuildStatus::Complete => write!(f, "Complete"),
        }
    }
}

/// A manufacturing order for a quantity of a part
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Build {
    pub id: Uuid,
    /// Unique, human readable reference (e.g. "BO-0042")
    pub reference: String,
    pub title: String,
    pub part_id: Uuid,
    pub quantity: Decimal,
    pub status: BuildStatus,
    pub batch: Option<String>,
    pub parent_id: Option<Uuid>,
    pub sales_order_id: Option<Uuid>,
    /// Only stock inside this location subtree may be allocated
    pub take_from_id: Option<Uuid>,
    pub destination_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<Uuid>,
}

impl Build {
    pub fn new(reference: impl Into<String>, part_id: Uuid, quantity: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference: reference.into(),
            title: String::new(),
            part_id,
            quantity,
            status: BuildStatus::Pending,
            batch: None,
            parent_id: None,
            sales_order_id: None,
            take_from_id: None,
            destination_id: None,
            notes: None,
            created_at: Utc::now(),
            created_by: None,
            completed_at: None,
            completed_by: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Reservation of (part of) a stock item against a build
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildItem {
    pub id: Uuid,
    pub build_id: Uuid,
    pub stock_item_id: Uuid,
    /// In-progress output the stock will be installed into
    pub install_into_id: Option<Uuid>,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

impl BuildItem {
    pub fn new(
        build_id: Uuid,
        stock_item_id: Uuid,
        quantity: Decimal,
        install_into_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            build_id,
            stock_item_id,
            install_into_id,
            quantity,
            created_at: Utc::now(),
        }
    }
}

/// A proposed allocation, not yet persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationProposal {
    pub stock_item_id: Uuid,
    pub part_id: Uuid,
    pub quantity: Decimal,
    pub install_into_id: Option<Uuid>,
}

/// Allocation state of one BOM line of a build
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BomLineAllocation {
    pub part_id: Uuid,
    pub required: Decimal,
    pub allocated: Decimal,
    pub unallocated: Decimal,
    pub fully_allocated: bool,
}

impl BomLineAllocation {
    pub fn new(part_id: Uuid, required: Decimal, allocated: Decimal) -> Self {
        let unallocated = (required - allocated).max(Decimal::ZERO);
        Self {
            part_id,
            required,
            allocated,
            unallocated,
            fully_allocated: unallocated.is_zero(),
        }
    }
}
