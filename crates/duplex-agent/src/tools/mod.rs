//! Tool modules for the Duplex agent.

pub mod base;
pub mod calculator;
pub mod executor;
pub mod registry;

pub use base::{require_f64, require_string, Tool};
pub use calculator::CalculatorTool;
pub use executor::{ConcurrentToolExecutor, ToolExecutor};
pub use registry::ToolRegistry;
