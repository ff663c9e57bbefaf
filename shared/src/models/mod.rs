//! Domain models for build orders and the stock they consume

mod build;
mod part;
mod stock;
mod tracking;

pub use build::*;
pub use part::*;
pub use stock::*;
pub use tracking::*;
