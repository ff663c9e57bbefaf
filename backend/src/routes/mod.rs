//! Route definitions for the build order API

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, store::Store, AppState};

/// Create API routes, all behind bearer-token authentication
pub fn api_routes<S: Store>(state: AppState<S>) -> Router<AppState<S>> {
    Router::new()
        .nest("/builds", build_routes::<S>())
        .nest("/build-items", build_item_routes::<S>())
        .route("/stock/:stock_item_id", get(handlers::get_stock_item::<S>))
        .route(
            "/locations/:location_id/children",
            get(handlers::location_children::<S>),
        )
        .route(
            "/parts/:part_id/serials/next",
            get(handlers::next_serial_number::<S>),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware::<S>))
}

/// Build order routes
fn build_routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route(
            "/",
            get(handlers::list_builds::<S>).post(handlers::create_build::<S>),
        )
        .route(
            "/:build_id",
            get(handlers::get_build::<S>)
                .put(handlers::update_build::<S>)
                .delete(handlers::delete_build::<S>),
        )
        .route("/:build_id/notes", put(handlers::update_notes::<S>))
        .route(
            "/:build_id/allocation",
            get(handlers::allocation_summary::<S>),
        )
        .route(
            "/:build_id/auto-allocate",
            get(handlers::get_auto_allocations::<S>).post(handlers::auto_allocate::<S>),
        )
        .route("/:build_id/unallocate", post(handlers::unallocate::<S>))
        .route(
            "/:build_id/complete",
            get(handlers::completion_defaults::<S>).post(handlers::complete_build::<S>),
        )
        .route("/:build_id/cancel", post(handlers::cancel_build::<S>))
        .route(
            "/:build_id/unallocated/:part_id",
            get(handlers::get_unallocated_quantity::<S>),
        )
        .route(
            "/:build_id/allocations/suggest",
            get(handlers::suggest_allocation::<S>),
        )
}

/// Allocation record routes
fn build_item_routes<S: Store>() -> Router<AppState<S>> {
    Router::new()
        .route("/", post(handlers::create_allocation::<S>))
        .route(
            "/:allocation_id",
            put(handlers::update_allocation::<S>).delete(handlers::delete_allocation::<S>),
        )
}
