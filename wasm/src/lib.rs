//! WebAssembly module for the build order platform
//!
//! Provides client-side helpers for the build forms:
//! - Serial number parsing and placeholder ranges
//! - Allocation quantity suggestions
//! - Build quantity validation before submission

use std::str::FromStr;

use rust_decimal::Decimal;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    // Set up panic hook for better error messages in browser console
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn parse_decimal(value: &str) -> Option<Decimal> {
    Decimal::from_str(value.trim()).ok()
}

/// Parse serial number text into a list of numbers
#[wasm_bindgen]
pub fn parse_serial_numbers(serials: &str, expected_quantity: i64) -> Result<js_sys::Array, JsValue> {
    match extract_serial_numbers(serials, expected_quantity) {
        Ok(numbers) => Ok(numbers
            .into_iter()
            .map(|n| JsValue::from_f64(n as f64))
            .collect()),
        Err(e) => {
            web_sys::console::warn_1(&JsValue::from_str(&e.to_string()));
            Err(JsValue::from_str(&e.to_string()))
        }
    }
}

/// Problems with serial number text, or None when it is acceptable
#[wasm_bindgen]
pub fn serial_numbers_error(serials: &str, expected_quantity: i64) -> Option<String> {
    extract_serial_numbers(serials, expected_quantity)
        .err()
        .map(|e| e.to_string())
}

/// Placeholder for the serial number field of the completion form, or None
/// when the range would pass the largest serial number
#[wasm_bindgen]
pub fn suggest_serial_range(next_serial: i64, quantity: i64) -> Option<String> {
    format_serial_range(next_serial, quantity)
}

/// Quantity to pre-fill when allocating from a stock item: the outstanding
/// requirement, capped by what the item still has free
#[wasm_bindgen]
pub fn suggest_allocation_quantity(required: &str, allocated: &str, available: &str) -> String {
    let (Some(required), Some(allocated), Some(available)) = (
        parse_decimal(required),
        parse_decimal(allocated),
        parse_decimal(available),
    ) else {
        return Decimal::ZERO.to_string();
    };

    let outstanding = (required - allocated).max(Decimal::ZERO);
    outstanding.min(available.max(Decimal::ZERO)).normalize().to_string()
}

/// Validate the quantity field of the build form
#[wasm_bindgen]
pub fn build_quantity_error(quantity: &str, trackable: bool) -> Option<String> {
    match parse_decimal(quantity) {
        Some(q) => validate_build_quantity(q, trackable).err().map(str::to_string),
        None => Some("Quantity must be a number".to_string()),
    }
}

/// Validate the quantity field of the allocation form
#[wasm_bindgen]
pub fn allocation_quantity_error(quantity: &str, serialized: bool) -> Option<String> {
    match parse_decimal(quantity) {
        Some(q) => validate_allocation_quantity(q, serialized).err().map(str::to_string),
        None => Some("Quantity must be a number".to_string()),
    }
}
