//! Config loader: reads `~/.duplex/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.duplex/config.json`
//! 3. Environment variables `DUPLEX_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

/// Load config from a specific file path.
fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config JSON: {}", e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Env var format: `DUPLEX_AGENT__<FIELD>` (double underscore as delimiter).
///
/// Supported overrides:
/// - `DUPLEX_AGENT__SYSTEM_PROMPT`
/// - `DUPLEX_AGENT__ENABLE_RECONNECTION` (`true`/`1` or `false`/`0`)
/// - `DUPLEX_AGENT__MAX_RECONNECTION_ATTEMPTS`
/// - `DUPLEX_AGENT__RECONNECT_BACKOFF_MS`
/// - `DUPLEX_AGENT__RECEIVE_POLL_INTERVAL_MS`
/// - `DUPLEX_AGENT__TOOL_TIMEOUT_SECS`
/// - `DUPLEX_AGENT__SHUTDOWN_GRACE_MS`
/// - `DUPLEX_AGENT__AUDIO_BUFFER_LIMIT`
fn apply_env_overrides(mut config: Config) -> Config {
    let agent = &mut config.agent;

    if let Ok(val) = std::env::var("DUPLEX_AGENT__SYSTEM_PROMPT") {
        agent.system_prompt = if val.is_empty() { None } else { Some(val) };
    }
    if let Ok(val) = std::env::var("DUPLEX_AGENT__ENABLE_RECONNECTION") {
        match val.as_str() {
            "true" | "1" => agent.enable_reconnection = true,
            "false" | "0" => agent.enable_reconnection = false,
            other => warn!(value = other, "ignoring invalid DUPLEX_AGENT__ENABLE_RECONNECTION"),
        }
    }
    override_parsed("DUPLEX_AGENT__MAX_RECONNECTION_ATTEMPTS", &mut agent.max_reconnection_attempts);
    override_parsed("DUPLEX_AGENT__RECONNECT_BACKOFF_MS", &mut agent.reconnect_backoff_ms);
    override_parsed("DUPLEX_AGENT__RECEIVE_POLL_INTERVAL_MS", &mut agent.receive_poll_interval_ms);
    override_parsed("DUPLEX_AGENT__TOOL_TIMEOUT_SECS", &mut agent.tool_timeout_secs);
    override_parsed("DUPLEX_AGENT__SHUTDOWN_GRACE_MS", &mut agent.shutdown_grace_ms);
    override_parsed("DUPLEX_AGENT__AUDIO_BUFFER_LIMIT", &mut agent.audio_buffer_limit);

    config
}

/// Overwrite `target` with the parsed value of `var`, if set and valid.
fn override_parsed<T: FromStr>(var: &str, target: &mut T) {
    if let Ok(val) = std::env::var(var) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(var = var, value = %val, "ignoring unparseable env override"),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp_json(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_missing_file() {
        let config = load_config_from_path(Path::new("/nonexistent/path/config.json"));
        assert_eq!(config.agent.tool_timeout_secs, 60);
        assert_eq!(config.agent.audio_buffer_limit, 512);
    }

    #[test]
    fn test_load_valid_json() {
        let file = write_temp_json(r#"{
            "agent": {
                "systemPrompt": "Keep responses brief.",
                "enableReconnection": false
            }
        }"#);

        let config = load_config_from_path(file.path());
        assert_eq!(config.agent.system_prompt.as_deref(), Some("Keep responses brief."));
        assert!(!config.agent.enable_reconnection);
        // Default preserved
        assert_eq!(config.agent.receive_poll_interval_ms, 100);
    }

    #[test]
    fn test_load_invalid_json_returns_defaults() {
        let file = write_temp_json("not valid json {{{");
        let config = load_config_from_path(file.path());
        assert_eq!(config.agent.shutdown_grace_ms, 200);
    }

    #[test]
    fn test_load_empty_json() {
        let file = write_temp_json("{}");
        let config = load_config_from_path(file.path());
        assert_eq!(config.agent.reconnect_backoff_ms, 250);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.agent.system_prompt = Some("You are a calculator.".to_string());
        config.agent.tool_timeout_secs = 5;

        save_config(&config, Some(&path)).unwrap();

        let reloaded = load_config_from_path(&path);
        assert_eq!(reloaded.agent.system_prompt.as_deref(), Some("You are a calculator."));
        assert_eq!(reloaded.agent.tool_timeout_secs, 5);
    }

    #[test]
    fn test_saved_json_uses_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        save_config(&Config::default(), Some(&path)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert!(raw["agent"].get("maxReconnectionAttempts").is_some());
        assert!(raw["agent"].get("max_reconnection_attempts").is_none());
    }

    #[test]
    fn test_env_override_max_attempts() {
        std::env::set_var("DUPLEX_AGENT__MAX_RECONNECTION_ATTEMPTS", "7");
        let config = apply_env_overrides(Config::default());
        assert_eq!(config.agent.max_reconnection_attempts, 7);
        std::env::remove_var("DUPLEX_AGENT__MAX_RECONNECTION_ATTEMPTS");
    }

    #[test]
    fn test_env_override_disable_reconnection() {
        std::env::set_var("DUPLEX_AGENT__ENABLE_RECONNECTION", "0");
        let config = apply_env_overrides(Config::default());
        assert!(!config.agent.enable_reconnection);
        std::env::remove_var("DUPLEX_AGENT__ENABLE_RECONNECTION");
    }

    #[test]
    fn test_env_override_unparseable_ignored() {
        std::env::set_var("DUPLEX_AGENT__TOOL_TIMEOUT_SECS", "soon");
        let config = apply_env_overrides(Config::default());
        assert_eq!(config.agent.tool_timeout_secs, 60);
        std::env::remove_var("DUPLEX_AGENT__TOOL_TIMEOUT_SECS");
    }
}
