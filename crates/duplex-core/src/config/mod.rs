//! Configuration system: schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use duplex_core::config;
//!
//! let cfg = config::load_config(None);
//! println!("Reconnect attempts: {}", cfg.agent.max_reconnection_attempts);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{get_config_path, load_config, save_config};
pub use schema::{AgentConfig, Config, DEFAULT_MAX_RECONNECTION_ATTEMPTS};
