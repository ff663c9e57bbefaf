//! Inventory ledger tests
//!
//! Location subtrees, serial numbers, unallocated quantity and stock
//! consumption history.

mod common;

use common::{dec, Fixture};
use rust_decimal::Decimal;
use uuid::Uuid;

use build_order_backend::services::{CompleteBuildInput, CreateAllocationInput, InventoryLedger};
use build_order_backend::store::{Store, StoreTx};
use build_order_backend::AppError;
use shared::models::{Build, BuildItem, StockItem};

#[tokio::test]
async fn test_unique_children_covers_subtree() {
    let fx = Fixture::new();
    let warehouse = fx.location("Warehouse", None).await;
    let aisle = fx.location("Aisle 1", Some(warehouse.id)).await;
    let shelf = fx.location("Shelf 3", Some(aisle.id)).await;
    let office = fx.location("Office", None).await;

    let ledger = InventoryLedger::default();
    let mut tx = fx.store.begin().await.unwrap();
    let scope = ledger.unique_children(&mut tx, warehouse.id).await.unwrap();
    let leaf = ledger.unique_children(&mut tx, shelf.id).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(scope.len(), 3);
    assert!(scope.contains(&warehouse.id));
    assert!(scope.contains(&shelf.id));
    assert!(!scope.contains(&office.id));
    assert_eq!(leaf.len(), 1);
}

#[tokio::test]
async fn test_location_subtree_sorted_by_name() {
    let fx = Fixture::new();
    let warehouse = fx.location("Warehouse", None).await;
    fx.location("Shelf B", Some(warehouse.id)).await;
    fx.location("Shelf A", Some(warehouse.id)).await;

    let names: Vec<String> = fx
        .service
        .location_subtree(warehouse.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.name)
        .collect();
    assert_eq!(names, vec!["Shelf A", "Shelf B", "Warehouse"]);

    assert!(matches!(
        fx.service.location_subtree(Uuid::new_v4()).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_next_serial_number() {
    let fx = Fixture::new();
    let gizmo = fx.assembly("Gizmo", true, &[]).await;
    let other = fx.assembly("Other", true, &[]).await;

    assert_eq!(fx.service.next_serial_number(gizmo.id).await.unwrap().next, 1);

    fx.stock(StockItem::serialized(gizmo.id, 4, None)).await;
    fx.stock(StockItem::serialized(gizmo.id, 17, None)).await;
    fx.stock(StockItem::serialized(other.id, 99, None)).await;

    assert_eq!(fx.service.next_serial_number(gizmo.id).await.unwrap().next, 18);

    let ledger = InventoryLedger::default();
    let mut tx = fx.store.begin().await.unwrap();
    assert!(ledger.check_serial_number_exists(&mut tx, gizmo.id, 17).await.unwrap());
    assert!(!ledger.check_serial_number_exists(&mut tx, gizmo.id, 99).await.unwrap());
    assert_eq!(
        ledger.serial_number_placeholder(&mut tx, gizmo.id, 2).await.unwrap(),
        "18-19"
    );
    tx.rollback().await.unwrap();

    assert!(matches!(
        fx.service.next_serial_number(Uuid::new_v4()).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_unallocated_quantity_never_negative() {
    let fx = Fixture::new();
    let screw = fx.component("Screw").await;
    let source = fx.stock_of(&screw, 5, None).await;

    // Over-allocation can only come from outside the engine
    let mut tx = fx.store.begin().await.unwrap();
    tx.save_build_item(&BuildItem::new(Uuid::new_v4(), source.id, dec("7.5"), None))
        .await
        .unwrap();

    let ledger = InventoryLedger::default();
    let free = ledger.unallocated_quantity(&mut tx, &source).await.unwrap();
    assert_eq!(free, Decimal::ZERO);
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_take_stock_rejects_more_than_held() {
    let fx = Fixture::new();
    let screw = fx.component("Screw").await;
    let source = fx.stock_of(&screw, 5, None).await;
    let build = Build::new("BO-9999", Uuid::new_v4(), Decimal::ONE);

    let ledger = InventoryLedger::default();
    let mut tx = fx.store.begin().await.unwrap();
    let err = ledger
        .take_stock(&mut tx, source.id, Decimal::from(6), &build, fx.actor)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Integrity(_)));

    ledger
        .take_stock(&mut tx, source.id, dec("1.5"), &build, fx.actor)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let item = fx.stock_item(source.id).await.unwrap();
    assert_eq!(item.quantity, dec("3.5"));

    let tracking = fx.store.snapshot().await.tracking;
    assert_eq!(tracking.len(), 1);
    assert_eq!(tracking[0].quantity, dec("-1.5"));
    assert_eq!(tracking[0].title, "Used in build BO-9999");
}

#[tokio::test]
async fn test_stock_detail_after_partial_consumption() {
    let fx = Fixture::new();
    let stores = fx.location("Stores", None).await;
    let screw = fx.component("Screw").await;
    let widget = fx.assembly("Widget", false, &[(&screw, 2)]).await;
    let source = fx.stock_of(&screw, 20, None).await;

    let first = fx.build(&widget, 3).await;
    let second = fx.build(&widget, 4).await;

    fx.service.auto_allocate(first.id, fx.actor).await.unwrap();
    fx.service
        .create_allocation(CreateAllocationInput {
            build_id: second.id,
            stock_item_id: source.id,
            quantity: Decimal::from(5),
            install_into_id: None,
        })
        .await
        .unwrap();

    let detail = fx.service.stock_detail(source.id).await.unwrap();
    assert_eq!(detail.unallocated, Decimal::from(9));
    assert_eq!(detail.allocations.len(), 2);
    assert!(detail.tracking.is_empty());

    fx.service
        .complete_build(
            first.id,
            CompleteBuildInput {
                location_id: stores.id,
                serial_numbers: Vec::new(),
            },
            fx.actor,
        )
        .await
        .unwrap();

    let detail = fx.service.stock_detail(source.id).await.unwrap();
    assert_eq!(detail.item.quantity, Decimal::from(14));
    assert_eq!(detail.unallocated, Decimal::from(9));
    assert_eq!(detail.allocations.len(), 1);
    assert_eq!(detail.allocations[0].build_id, second.id);
    assert_eq!(detail.tracking.len(), 1);
    assert_eq!(detail.tracking[0].build_id, Some(first.id));
    assert_eq!(detail.tracking[0].user_id, Some(fx.actor));

    assert!(matches!(
        fx.service.stock_detail(Uuid::new_v4()).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_available_stock_skips_fully_allocated_items() {
    let fx = Fixture::new();
    let screw = fx.component("Screw").await;
    let widget = fx.assembly("Widget", false, &[(&screw, 1)]).await;
    let held = fx.stock_of(&screw, 2, None).await;
    let build = fx.build(&widget, 2).await;
    fx.service.auto_allocate(build.id, fx.actor).await.unwrap();

    let free = fx.stock_of(&screw, 3, None).await;

    let ledger = InventoryLedger::default();
    let mut tx = fx.store.begin().await.unwrap();
    let candidates = ledger.available_stock(&mut tx, screw.id, None).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].item.id, free.id);
    assert_eq!(candidates[0].unallocated, Decimal::from(3));
    assert_ne!(candidates[0].item.id, held.id);
}
