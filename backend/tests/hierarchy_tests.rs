//! Build hierarchy tests
//!
//! Parent/child builds: what completion reports to the parent, cycle
//! protection and how cancellation leaves the rest of the tree alone.

mod common;

use common::Fixture;
use rust_decimal::Decimal;
use uuid::Uuid;

use build_order_backend::services::{
    CompleteBuildInput, CreateAllocationInput, CreateBuildInput, HierarchyCoordinator,
    UpdateBuildInput,
};
use build_order_backend::store::{Store, StoreTx};
use build_order_backend::AppError;
use shared::models::{Build, BuildStatus, Part};

async fn child_build(fx: &Fixture, part: &Part, quantity: i64, parent: &Build) -> Build {
    fx.service
        .create_build(
            CreateBuildInput {
                part_id: part.id,
                quantity: Decimal::from(quantity),
                parent_id: Some(parent.id),
                ..Default::default()
            },
            fx.actor,
        )
        .await
        .unwrap()
}

async fn complete(fx: &Fixture, build: &Build, location_id: Uuid) {
    fx.service
        .complete_build(
            build.id,
            CompleteBuildInput {
                location_id,
                serial_numbers: Vec::new(),
            },
            fx.actor,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_child_completion_reports_to_parent() {
    let fx = Fixture::new();
    let stores = fx.location("Stores", None).await;
    let motor = fx.assembly("Motor", false, &[]).await;
    let robot = fx.assembly("Robot", false, &[(&motor, 2)]).await;

    let parent = fx.build(&robot, 2).await;
    let child = child_build(&fx, &motor, 3, &parent).await;

    let completed = fx
        .service
        .complete_build(
            child.id,
            CompleteBuildInput {
                location_id: stores.id,
                serial_numbers: Vec::new(),
            },
            fx.actor,
        )
        .await
        .unwrap();

    let report = completed.parent.unwrap();
    assert_eq!(report.parent_id, parent.id);
    assert_eq!(report.parent_reference, parent.reference);
    assert_eq!(report.produced, Decimal::from(3));
    assert_eq!(report.unallocated, Decimal::from(4));

    // Completion does not allocate to the parent
    let detail = fx.service.get_build(parent.id).await.unwrap();
    assert!(detail.allocations.is_empty());
    assert_eq!(detail.children.len(), 1);

    // The finished motors are now ordinary stock the parent may draw on
    let proposals = fx.service.get_auto_allocations(parent.id).await.unwrap();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].stock_item_id, completed.outputs[0].id);
    assert_eq!(proposals[0].quantity, Decimal::from(3));
}

#[tokio::test]
async fn test_no_report_when_parent_does_not_use_part() {
    let fx = Fixture::new();
    let stores = fx.location("Stores", None).await;
    let motor = fx.assembly("Motor", false, &[]).await;
    let robot = fx.assembly("Robot", false, &[]).await;

    let parent = fx.build(&robot, 1).await;
    let child = child_build(&fx, &motor, 1, &parent).await;

    let completed = fx
        .service
        .complete_build(
            child.id,
            CompleteBuildInput {
                location_id: stores.id,
                serial_numbers: Vec::new(),
            },
            fx.actor,
        )
        .await
        .unwrap();
    assert!(completed.parent.is_none());
}

#[tokio::test]
async fn test_sales_order_outputs_are_not_allocatable() {
    let fx = Fixture::new();
    let stores = fx.location("Stores", None).await;
    let motor = fx.assembly("Motor", false, &[]).await;
    let robot = fx.assembly("Robot", false, &[(&motor, 1)]).await;
    let sales_order = Uuid::new_v4();

    let parent = fx.build(&robot, 1).await;
    let child = fx
        .service
        .create_build(
            CreateBuildInput {
                part_id: motor.id,
                quantity: Decimal::ONE,
                parent_id: Some(parent.id),
                sales_order_id: Some(sales_order),
                ..Default::default()
            },
            fx.actor,
        )
        .await
        .unwrap();

    complete(&fx, &child, stores.id).await;

    let outputs = fx.stock_for(&motor).await;
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].sales_order_id, Some(sales_order));
    assert_eq!(outputs[0].build_id, Some(child.id));

    assert!(fx.service.get_auto_allocations(parent.id).await.unwrap().is_empty());
    let manual = fx
        .service
        .create_allocation(CreateAllocationInput {
            build_id: parent.id,
            stock_item_id: outputs[0].id,
            quantity: Decimal::ONE,
            install_into_id: None,
        })
        .await;
    assert!(matches!(manual, Err(AppError::Validation { .. })));
}

#[tokio::test]
async fn test_parent_cycle_rejected() {
    let fx = Fixture::new();
    let widget = fx.assembly("Widget", false, &[]).await;

    let top = fx.build(&widget, 1).await;
    let middle = child_build(&fx, &widget, 1, &top).await;
    let bottom = child_build(&fx, &widget, 1, &middle).await;

    let own = fx
        .service
        .update_build(
            top.id,
            UpdateBuildInput {
                parent_id: Some(top.id),
                ..Default::default()
            },
            fx.actor,
        )
        .await;
    assert!(matches!(own, Err(AppError::Validation { ref field, .. }) if field == "parent_id"));

    let loop_back = fx
        .service
        .update_build(
            top.id,
            UpdateBuildInput {
                parent_id: Some(bottom.id),
                ..Default::default()
            },
            fx.actor,
        )
        .await;
    assert!(matches!(loop_back, Err(AppError::Validation { ref field, .. }) if field == "parent_id"));

    // Re-parenting within the tree without a loop is fine
    let moved = fx
        .service
        .update_build(
            bottom.id,
            UpdateBuildInput {
                parent_id: Some(top.id),
                ..Default::default()
            },
            fx.actor,
        )
        .await
        .unwrap();
    assert_eq!(moved.parent_id, Some(top.id));
}

#[tokio::test]
async fn test_ancestors_and_descendants() {
    let fx = Fixture::new();
    let stores = fx.location("Stores", None).await;
    let widget = fx.assembly("Widget", false, &[]).await;

    let top = fx.build(&widget, 1).await;
    let middle = child_build(&fx, &widget, 2, &top).await;
    let bottom = child_build(&fx, &widget, 3, &middle).await;
    let sibling = child_build(&fx, &widget, 4, &top).await;

    complete(&fx, &bottom, stores.id).await;

    let hierarchy = HierarchyCoordinator::default();
    let mut tx = fx.store.begin().await.unwrap();

    let bottom = tx.get_build(bottom.id).await.unwrap().unwrap();
    let ancestors: Vec<Uuid> = hierarchy
        .ancestors(&mut tx, &bottom)
        .await
        .unwrap()
        .iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ancestors, vec![middle.id, top.id]);

    let mut descendants: Vec<Uuid> = hierarchy
        .descendants(&mut tx, top.id)
        .await
        .unwrap()
        .iter()
        .map(|b| b.id)
        .collect();
    descendants.sort();
    let mut expected = vec![middle.id, bottom.id, sibling.id];
    expected.sort();
    assert_eq!(descendants, expected);

    assert!(hierarchy.would_create_cycle(&mut tx, top.id, bottom.id).await.unwrap());
    assert!(!hierarchy.would_create_cycle(&mut tx, bottom.id, sibling.id).await.unwrap());

    // Only finished outputs count; unfinished outputs of the others are skipped
    let tree_stock = hierarchy.stock_from_build_tree(&mut tx, top.id).await.unwrap();
    assert_eq!(tree_stock.len(), 1);
    assert_eq!(tree_stock[0].build_id, Some(bottom.id));
    assert_eq!(tree_stock[0].quantity, Decimal::from(3));

    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_cancel_child_keeps_parent_allocations() {
    let fx = Fixture::new();
    let motor = fx.assembly("Motor", false, &[]).await;
    let robot = fx.assembly("Robot", false, &[(&motor, 1)]).await;
    let spare = fx.stock_of(&motor, 1, None).await;

    let parent = fx.build(&robot, 2).await;
    let child = child_build(&fx, &motor, 1, &parent).await;
    fx.service.auto_allocate(parent.id, fx.actor).await.unwrap();

    fx.service.cancel_build(child.id, fx.actor).await.unwrap();

    assert_eq!(fx.allocated_against(spare.id).await, Decimal::ONE);
    let parent = fx.service.get_build(parent.id).await.unwrap();
    assert_eq!(parent.build.status, BuildStatus::Pending);
}

#[tokio::test]
async fn test_cancel_parent_leaves_children_active() {
    let fx = Fixture::new();
    let motor = fx.assembly("Motor", false, &[]).await;
    let robot = fx.assembly("Robot", false, &[(&motor, 1)]).await;

    let parent = fx.build(&robot, 1).await;
    let child = child_build(&fx, &motor, 1, &parent).await;

    fx.service.cancel_build(parent.id, fx.actor).await.unwrap();

    let child = fx.service.get_build(child.id).await.unwrap().build;
    assert_eq!(child.status, BuildStatus::Pending);
    assert_eq!(child.parent_id, Some(parent.id));
}

#[tokio::test]
async fn test_delete_detaches_children() {
    let fx = Fixture::new();
    let widget = fx.assembly("Widget", false, &[]).await;

    let parent = fx.build(&widget, 1).await;
    let child = child_build(&fx, &widget, 1, &parent).await;

    fx.service.delete_build(parent.id, fx.actor).await.unwrap();

    let child = fx.service.get_build(child.id).await.unwrap().build;
    assert_eq!(child.parent_id, None);
    assert!(matches!(
        fx.service.get_build(parent.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_create_with_missing_parent() {
    let fx = Fixture::new();
    let widget = fx.assembly("Widget", false, &[]).await;

    let result = fx
        .service
        .create_build(
            CreateBuildInput {
                part_id: widget.id,
                quantity: Decimal::ONE,
                parent_id: Some(Uuid::new_v4()),
                ..Default::default()
            },
            fx.actor,
        )
        .await;
    assert!(matches!(result, Err(AppError::Validation { ref field, .. }) if field == "parent_id"));
}
