//! Allocation HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::{check_permission, Actor};
use crate::services::CreateAllocationInput;
use crate::store::Store;
use crate::AppState;

/// Query of the allocation form defaults
#[derive(Debug, Deserialize)]
pub struct SuggestQuery {
    pub part_id: Uuid,
    pub stock_item_id: Option<Uuid>,
    pub quantity: Option<Decimal>,
    pub install_into_id: Option<Uuid>,
}

/// Body of an allocation quantity change
#[derive(Debug, Deserialize)]
pub struct UpdateAllocationRequest {
    pub quantity: Decimal,
}

/// Allocation progress per BOM line
pub async fn allocation_summary<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "view") {
        return e.into_response();
    }

    match state.builds.allocation_summary(build_id).await {
        Ok(summary) => (StatusCode::OK, Json(serde_json::json!({ "lines": summary }))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Preview auto-allocation
pub async fn get_auto_allocations<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "view") {
        return e.into_response();
    }

    match state.builds.get_auto_allocations(build_id).await {
        Ok(proposals) => {
            (StatusCode::OK, Json(serde_json::json!({ "proposals": proposals }))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Apply auto-allocation
pub async fn auto_allocate<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "change") {
        return e.into_response();
    }

    match state.builds.auto_allocate(build_id, actor.user_id).await {
        Ok(created) => {
            (StatusCode::OK, Json(serde_json::json!({ "allocations": created }))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Release every allocation of a build
pub async fn unallocate<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "change") {
        return e.into_response();
    }

    match state.builds.unallocate_stock(build_id, actor.user_id).await {
        Ok(released) => {
            (StatusCode::OK, Json(serde_json::json!({ "released": released }))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Outstanding quantity of one BOM line
pub async fn get_unallocated_quantity<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path((build_id, part_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "view") {
        return e.into_response();
    }

    match state.builds.get_unallocated_quantity(build_id, part_id).await {
        Ok(quantity) => (
            StatusCode::OK,
            Json(serde_json::json!({ "part_id": part_id, "unallocated": quantity })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Defaults for the allocation form
pub async fn suggest_allocation<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
    Query(query): Query<SuggestQuery>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "view") {
        return e.into_response();
    }

    match state
        .builds
        .suggest_allocation(
            build_id,
            query.part_id,
            query.stock_item_id,
            query.quantity,
            query.install_into_id,
        )
        .await
    {
        Ok(suggestion) => (StatusCode::OK, Json(suggestion)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Allocate a stock item to a build
pub async fn create_allocation<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Json(input): Json<CreateAllocationInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "change") {
        return e.into_response();
    }

    match state.builds.create_allocation(input).await {
        Ok(allocation) => (StatusCode::CREATED, Json(allocation)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Change an allocation's quantity
pub async fn update_allocation<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(allocation_id): Path<Uuid>,
    Json(input): Json<UpdateAllocationRequest>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "change") {
        return e.into_response();
    }

    match state.builds.update_allocation(allocation_id, input.quantity).await {
        Ok(allocation) => (StatusCode::OK, Json(allocation)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Remove an allocation
pub async fn delete_allocation<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(allocation_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "change") {
        return e.into_response();
    }

    match state.builds.delete_allocation(allocation_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
