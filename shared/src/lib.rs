//! Shared types and models for the build order platform
//!
//! This crate contains the domain types shared between the backend, the
//! browser helpers (via WASM) and the test suites.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
