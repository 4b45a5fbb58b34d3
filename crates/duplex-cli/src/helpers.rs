//! Shared CLI helpers: event rendering, banner, path display.

use std::path::{Path, PathBuf};

use colored::Colorize;
use duplex_core::types::{ModelEvent, Role};

/// Render an output event as a console line, or `None` for events that are
/// not worth showing (audio chunks, the user's own final transcript, ...).
pub fn render_event(event: &ModelEvent) -> Option<String> {
    match event {
        ModelEvent::Transcript(t) if t.source == Role::Assistant && t.is_final => {
            Some(format!("{} {}", "Duplex:".cyan().bold(), t.text))
        }
        ModelEvent::Transcript(t) if t.source == Role::User && !t.is_final => {
            Some(format!("… {}", t.text).dimmed().to_string())
        }
        ModelEvent::Transcript(_) => None,
        ModelEvent::ToolUse(stream) => stream
            .current_tool_use
            .complete()
            .map(|tool_use| format!("  ⚙ {}({})", tool_use.name, tool_use.input).yellow().to_string()),
        ModelEvent::Interruption(i) => {
            Some(format!("  ⏹ interrupted ({})", i.reason).red().to_string())
        }
        ModelEvent::AudioStream(_) | ModelEvent::Other(_) => None,
    }
}

/// Print the banner shown when a conversation starts.
pub fn print_banner(model: &str, tools: &[String]) {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "Duplex".cyan().bold(), version.dimmed());
    println!(
        "{}",
        format!("model: {model} | tools: {}", tools.join(", ")).dimmed()
    );
    println!(
        "{}",
        "Type a message, \"/interrupt\" to cut a reply short, or \"exit\" to quit.".dimmed()
    );
    println!();
}

/// Show `path` with the home directory abbreviated to `~`.
pub fn display_path(path: &Path) -> String {
    match dirs_next::home_dir() {
        Some(home) => match path.strip_prefix(&home) {
            Ok(rest) => PathBuf::from("~").join(rest).display().to_string(),
            Err(_) => path.display().to_string(),
        },
        None => path.display().to_string(),
    }
}

/// `✓` when the path exists, `(not found)` otherwise.
pub fn exists_marker(path: &Path) -> String {
    if path.exists() {
        "✓".green().to_string()
    } else {
        "(not found)".red().to_string()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_core::types::ToolUse;
    use serde_json::json;

    #[test]
    fn render_final_assistant_transcript() {
        colored::control::set_override(false);
        let line = render_event(&ModelEvent::transcript(Role::Assistant, "The answer is 4.", true));
        assert_eq!(line.as_deref(), Some("Duplex: The answer is 4."));
    }

    #[test]
    fn render_skips_final_user_and_audio() {
        assert!(render_event(&ModelEvent::transcript(Role::User, "hi", true)).is_none());
        assert!(render_event(&ModelEvent::audio("AAAA", "pcm", 16000, 1)).is_none());
        assert!(render_event(&ModelEvent::transcript(Role::Assistant, "The", false)).is_none());
    }

    #[test]
    fn render_tool_use() {
        colored::control::set_override(false);
        let event = ModelEvent::tool_use(ToolUse::new("t1", "calculator", json!({"x": 1})));
        let line = render_event(&event).unwrap();
        assert!(line.contains("calculator"));
    }

    #[test]
    fn display_path_outside_home() {
        assert_eq!(display_path(Path::new("/definitely/not/here")), "/definitely/not/here");
    }

    #[test]
    fn display_path_abbreviates_home() {
        if let Some(home) = dirs_next::home_dir() {
            let shown = display_path(&home.join(".duplex").join("config.json"));
            assert_eq!(shown, "~/.duplex/config.json");
        }
    }

    #[test]
    fn exists_marker_missing() {
        colored::control::set_override(false);
        assert_eq!(exists_marker(Path::new("/definitely/not/here")), "(not found)");
    }
}
