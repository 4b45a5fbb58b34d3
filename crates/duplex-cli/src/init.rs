//! `duplex init`: write the default configuration.
//!
//! Creates `~/.duplex/config.json` (unless it already exists) and the
//! history directory used by `duplex chat`.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use duplex_core::config::{get_config_path, save_config, Config};
use duplex_core::utils::get_data_path;

use crate::helpers::display_path;

/// Run the init command.
pub fn run() -> Result<()> {
    println!();
    println!("{}", "Duplex Setup".cyan().bold());
    println!();

    let config_path = get_config_path();
    if write_default_config(&config_path)? {
        println!("  {} created config at {}", "✓".green(), display_path(&config_path));
    } else {
        println!(
            "  {} config already exists at {}",
            "✓".green(),
            display_path(&config_path)
        );
    }

    let history_dir = get_data_path().join("history");
    std::fs::create_dir_all(&history_dir)
        .with_context(|| format!("failed to create {}", history_dir.display()))?;
    println!("  {} history dir at {}", "✓".green(), display_path(&history_dir));

    println!();
    println!("{}", "  Setup complete! Run `duplex chat` to start talking.".green());
    println!();

    Ok(())
}

/// Write the default config to `path` unless a file is already there.
/// Returns whether a file was written.
fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    save_config(&Config::default(), Some(path))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}
