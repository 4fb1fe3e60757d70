// ABOUTME: Root module for pipeliner - bounded-concurrency execution gate.
// ABOUTME: Re-exports the gate, its configuration, and the error type.

pub mod error;
pub mod gate;
pub mod prelude;

pub use error::GateError;
pub use gate::{Gate, GateConfig, GateState};
