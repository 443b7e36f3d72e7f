//! Filesystem locations for config and logs

use std::path::PathBuf;

use crate::constants;

/// Root config directory (`~/.parley`), falling back to the working directory
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(constants::ui::CONFIG_DIR_NAME)
}

/// Default settings file
pub fn config_file() -> PathBuf {
    config_dir().join(constants::ui::CONFIG_FILE_NAME)
}

/// Directory for log files
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_nest_under_config_dir() {
        let root = config_dir();
        assert!(config_file().starts_with(&root));
        assert!(logs_dir().starts_with(&root));
        assert!(config_file().ends_with("config.toml"));
    }
}
