//! Duplex Agent: bidirectional streaming agent runtime.
//!
//! This crate contains:
//! - **tools**: Tool trait, registry, executor, and the built-in calculator
//! - **connection**: per-conversation state shared by the event-loop tasks
//! - **event_loop**: event classification, tool dispatch
//! - **reconnect**: transport-error handling and bounded reconnection
//! - **agent**: the `BidiAgent` facade
//! - **io**: callable inputs/outputs for `BidiAgent::run`

pub mod agent;
pub mod connection;
pub mod error;
mod event_loop;
pub mod io;
pub mod reconnect;
pub mod tools;

pub use agent::{input_from_json, BidiAgent, BidiAgentBuilder};
pub use connection::BidirectionalConnection;
pub use error::AgentError;
pub use io::{BidiInput, BidiOutput};
pub use reconnect::{handle_connection_error, is_reconnectable, reconnect};
pub use tools::{CalculatorTool, ConcurrentToolExecutor, Tool, ToolExecutor, ToolRegistry};
