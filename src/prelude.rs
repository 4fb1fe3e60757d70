// ABOUTME: Prelude module - convenient imports for common use cases.
// ABOUTME: Use `use pipeliner::prelude::*;` to get started quickly.

pub use crate::error::GateError;
pub use crate::gate::{DEFAULT_WINDOW, Gate, GateConfig, GateState};
