//! Domain models used by the server
//!
//! Re-exports models from the shared crate

pub use shared::models::*;
pub use shared::types::GroupedBuilds;
