//! Cross-platform paths.

use std::path::PathBuf;

const APP_DIR: &str = "wayfare-chat";

/// Get the configuration directory.
///
/// - Linux: `~/.config/wayfare-chat`
/// - Windows: `%APPDATA%\wayfare-chat`
/// - macOS: `~/Library/Application Support/wayfare-chat`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Get the path to the main config file.
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.json")
}
