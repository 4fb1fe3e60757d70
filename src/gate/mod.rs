// ABOUTME: Gate module for bounded-concurrency job batches.
// ABOUTME: Contains the admission gate and its configuration record.

mod config;
mod gate;

pub use config::{DEFAULT_WINDOW, GateConfig};
pub use gate::{Gate, GateState};
