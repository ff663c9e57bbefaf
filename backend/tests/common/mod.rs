//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::str::FromStr;

use rust_decimal::Decimal;
use uuid::Uuid;

use build_order_backend::config::{BuildConfig, StockConfig};
use build_order_backend::services::{BuildService, CreateBuildInput};
use build_order_backend::store::{MemoryStore, Store, StoreTx};
use shared::models::{BomItem, Build, Part, StockItem, StockLocation};

// Helper to create Decimal from string
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub struct Fixture {
    pub store: MemoryStore,
    pub service: BuildService<MemoryStore>,
    pub actor: Uuid,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(BuildConfig::default(), StockConfig::default())
    }

    pub fn with_config(build: BuildConfig, stock: StockConfig) -> Self {
        let store = MemoryStore::new();
        let service = BuildService::new(store.clone(), build, &stock);
        Self {
            store,
            service,
            actor: Uuid::new_v4(),
        }
    }

    pub async fn location(&self, name: &str, parent: Option<Uuid>) -> StockLocation {
        let location = StockLocation::new(name, parent);
        let mut tx = self.store.begin().await.unwrap();
        tx.save_location(&location).await.unwrap();
        tx.commit().await.unwrap();
        location
    }

    pub async fn part(&self, part: Part) -> Part {
        let mut tx = self.store.begin().await.unwrap();
        tx.save_part(&part).await.unwrap();
        tx.commit().await.unwrap();
        part
    }

    /// A plain purchasable component
    pub async fn component(&self, name: &str) -> Part {
        self.part(Part::new(name)).await
    }

    /// An assembly built from `(component, quantity per unit)` lines
    pub async fn assembly(&self, name: &str, trackable: bool, bom: &[(&Part, i64)]) -> Part {
        let mut part = Part::new(name);
        part.assembly = true;
        part.trackable = trackable;
        part.bom = bom
            .iter()
            .map(|(sub, qty)| BomItem {
                sub_part_id: sub.id,
                quantity: Decimal::from(*qty),
            })
            .collect();
        self.part(part).await
    }

    pub async fn stock(&self, item: StockItem) -> StockItem {
        let mut tx = self.store.begin().await.unwrap();
        tx.save_stock_item(&item).await.unwrap();
        tx.commit().await.unwrap();
        item
    }

    pub async fn stock_of(&self, part: &Part, quantity: i64, location: Option<Uuid>) -> StockItem {
        self.stock(StockItem::new(part.id, Decimal::from(quantity), location))
            .await
    }

    pub async fn build(&self, part: &Part, quantity: i64) -> Build {
        self.service
            .create_build(
                CreateBuildInput {
                    part_id: part.id,
                    quantity: Decimal::from(quantity),
                    ..Default::default()
                },
                self.actor,
            )
            .await
            .unwrap()
    }

    pub async fn stock_item(&self, id: Uuid) -> Option<StockItem> {
        self.store
            .snapshot()
            .await
            .stock_items
            .into_iter()
            .find(|s| s.id == id)
    }

    pub async fn stock_for(&self, part: &Part) -> Vec<StockItem> {
        self.store
            .snapshot()
            .await
            .stock_items
            .into_iter()
            .filter(|s| s.part_id == part.id)
            .collect()
    }

    /// Sum of outstanding allocations against a stock item
    pub async fn allocated_against(&self, stock_item_id: Uuid) -> Decimal {
        self.store
            .snapshot()
            .await
            .build_items
            .iter()
            .filter(|b| b.stock_item_id == stock_item_id)
            .map(|b| b.quantity)
            .sum()
    }
}
