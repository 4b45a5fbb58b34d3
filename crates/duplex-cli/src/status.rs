//! `duplex status`: show configuration.

use anyhow::Result;
use colored::Colorize;

use duplex_core::config::{get_config_path, load_config, AgentConfig};
use duplex_core::utils::get_data_path;

use crate::helpers::{display_path, exists_marker};

/// Run the status command.
pub fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();
    let data_dir = get_data_path();

    println!();
    println!("{}", "Duplex Status".cyan().bold());
    println!();

    println!(
        "  {:<22} {} {}",
        "Config:".bold(),
        display_path(&config_path),
        exists_marker(&config_path)
    );
    println!(
        "  {:<22} {} {}",
        "Data dir:".bold(),
        display_path(&data_dir),
        exists_marker(&data_dir)
    );

    println!();
    println!("  {}", "Agent:".bold());
    for (label, value) in agent_rows(&config.agent) {
        println!("    {:<20} {}", label, value);
    }
    println!();

    Ok(())
}

/// Label/value pairs for the agent section.
fn agent_rows(agent: &AgentConfig) -> Vec<(&'static str, String)> {
    let reconnection = if agent.enable_reconnection {
        format!(
            "{} ({} attempts, {} ms apart)",
            "on".green(),
            agent.max_reconnection_attempts,
            agent.reconnect_backoff_ms
        )
    } else {
        "off".yellow().to_string()
    };

    vec![
        (
            "System prompt:",
            agent
                .system_prompt
                .as_deref()
                .map(|p| duplex_core::utils::truncate_string(p, 48))
                .unwrap_or_else(|| "(none)".dimmed().to_string()),
        ),
        ("Reconnection:", reconnection),
        ("Receive poll:", format!("{} ms", agent.receive_poll_interval_ms)),
        ("Tool timeout:", format!("{} s", agent.tool_timeout_secs)),
        ("Shutdown grace:", format!("{} ms", agent.shutdown_grace_ms)),
        ("Audio buffer:", format!("{} chunks", agent.audio_buffer_limit)),
    ]
}
