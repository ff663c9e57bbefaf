//! Build order HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::middleware::{check_permission, Actor};
use crate::services::{CompleteBuildInput, CreateBuildInput, UpdateBuildInput};
use crate::store::Store;
use crate::AppState;

/// Body of a completion request
#[derive(Debug, Deserialize, Validate)]
pub struct CompleteBuildRequest {
    pub location_id: Uuid,
    /// Serial number text such as "1,3,5-10"
    #[validate(length(max = 1000))]
    pub serial_numbers: Option<String>,
}

/// Body of a cancellation request
#[derive(Debug, Deserialize)]
pub struct CancelBuildRequest {
    #[serde(default)]
    pub confirm: bool,
}

/// Body of a notes update
#[derive(Debug, Deserialize)]
pub struct UpdateNotesRequest {
    pub notes: Option<String>,
}

/// List builds with their groupings
pub async fn list_builds<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "view") {
        return e.into_response();
    }

    match state.builds.list_builds().await {
        Ok(builds) => (StatusCode::OK, Json(builds)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get a build with outputs and allocations
pub async fn get_build<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "view") {
        return e.into_response();
    }

    match state.builds.get_build(build_id).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Create a new build order
pub async fn create_build<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Json(input): Json<CreateBuildInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "add") {
        return e.into_response();
    }

    match state.builds.create_build(input, actor.user_id).await {
        Ok(build) => (StatusCode::CREATED, Json(build)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Edit a build order
pub async fn update_build<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
    Json(input): Json<UpdateBuildInput>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "change") {
        return e.into_response();
    }

    match state.builds.update_build(build_id, input, actor.user_id).await {
        Ok(build) => (StatusCode::OK, Json(build)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Replace build notes
pub async fn update_notes<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
    Json(input): Json<UpdateNotesRequest>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "change") {
        return e.into_response();
    }

    match state.builds.update_notes(build_id, input.notes).await {
        Ok(build) => (StatusCode::OK, Json(build)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Delete a build order
pub async fn delete_build<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "delete") {
        return e.into_response();
    }

    match state.builds.delete_build(build_id, actor.user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Defaults for the completion form
pub async fn completion_defaults<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "view") {
        return e.into_response();
    }

    match state.builds.completion_defaults(build_id).await {
        Ok(defaults) => (StatusCode::OK, Json(defaults)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Complete a build
pub async fn complete_build<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
    Json(input): Json<CompleteBuildRequest>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "change") {
        return e.into_response();
    }
    if let Err(e) = input.validate() {
        return AppError::from(e).into_response();
    }

    let serial_numbers = match state
        .builds
        .parse_serial_numbers(build_id, input.serial_numbers.as_deref())
        .await
    {
        Ok(serials) => serials,
        Err(e) => return e.into_response(),
    };

    let request = CompleteBuildInput {
        location_id: input.location_id,
        serial_numbers,
    };

    match state.builds.complete_build(build_id, request, actor.user_id).await {
        Ok(completed) => (StatusCode::OK, Json(completed)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Cancel a build
pub async fn cancel_build<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(build_id): Path<Uuid>,
    Json(input): Json<CancelBuildRequest>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "change") {
        return e.into_response();
    }
    if !input.confirm {
        return AppError::validation("confirm", "Confirm build cancellation").into_response();
    }

    match state.builds.cancel_build(build_id, actor.user_id).await {
        Ok(build) => (StatusCode::OK, Json(build)).into_response(),
        Err(e) => e.into_response(),
    }
}
