// ABOUTME: Where streamtalk keeps its files: config.toml, rolling logs, and chat history
// ABOUTME: Platform directories via ProjectDirs, with ./data and ./config.toml when there is no home

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const SENTINEL_FILE: &str = "BACKUP_NOW";

fn project() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "streamtalk", "streamtalk")
}

/// Root for everything streamtalk writes: logs, chat history, the latest synthesized clip
pub fn data_dir() -> PathBuf {
    project()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Daily rolling `streamtalk.log` files
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Default `[memory].history_dir`: summary.json plus the summaries/ and backups/ snapshots
pub fn history_dir() -> PathBuf {
    data_dir().join("chat_history")
}

/// Last place the config loader looks, after STREAMTALK_CONFIG_PATH and ./config.toml
pub fn config_file() -> PathBuf {
    project()
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

/// Touching this file asks the running reply loop for one manual memory backup
pub fn backup_sentinel(history_dir: &Path) -> PathBuf {
    history_dir.join(SENTINEL_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_and_logs_live_under_data_dir() {
        let data = data_dir();
        assert!(log_dir().starts_with(&data));
        assert!(history_dir().starts_with(&data));
        assert!(config_file().ends_with("config.toml"));
    }

    #[test]
    fn test_sentinel_sits_in_history_dir() {
        let dir = Path::new("/tmp/history");
        assert_eq!(backup_sentinel(dir), dir.join("BACKUP_NOW"));
    }
}
