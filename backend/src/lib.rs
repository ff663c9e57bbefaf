//! Build order server
//!
//! Tracks the manufacture of parts: stock is allocated to build orders,
//! consumed on completion and replaced by finished output stock.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};

use services::BuildService;
use store::Store;

/// Application state shared across handlers
pub struct AppState<S: Store> {
    pub builds: Arc<BuildService<S>>,
    pub config: Arc<Config>,
}

impl<S: Store> AppState<S> {
    pub fn new(store: S, config: Config) -> Self {
        let builds = BuildService::new(store, config.build.clone(), &config.stock);
        Self {
            builds: Arc::new(builds),
            config: Arc::new(config),
        }
    }
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            builds: Arc::clone(&self.builds),
            config: Arc::clone(&self.config),
        }
    }
}

/// Create the application router with all routes and middleware
pub fn create_app<S: Store>(state: AppState<S>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check::<S>))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Build Order API v1"
}
