//! Utility helpers: path resolution and string previews.

use std::path::PathBuf;

/// Get the Duplex data directory (e.g. `~/.duplex/`).
pub fn get_data_path() -> PathBuf {
    let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".duplex")
}

/// Truncate a string to `max_len` characters, adding "..." if truncated.
/// Unicode-safe. Used to keep transcript text in log lines short.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_exact_length() {
        assert_eq!(truncate_string("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate_string("hello world", 8), "hello...");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_string("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn test_data_path_suffix() {
        assert!(get_data_path().ends_with(".duplex"));
    }
}
