//! HTTP handlers

pub mod allocation;
pub mod build;
pub mod health;
pub mod stock;

pub use allocation::*;
pub use build::*;
pub use health::health_check;
pub use stock::*;
