//! Model session layer for Duplex.
//!
//! # Architecture
//!
//! - [`traits::ModelSession`]: trait every streaming model backend implements
//! - [`scripted::ScriptedSession`]: deterministic in-process session for demos and tests

pub mod scripted;
pub mod traits;

pub use scripted::{ConnectRecord, ScriptedSession, CALCULATOR_TOOL};
pub use traits::ModelSession;
