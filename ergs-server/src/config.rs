use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Process configuration, loaded from (or written as a default to) a TOML
/// file on first run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory holding one `<datasource>.db` file per registered datasource.
    pub storage_dir: PathBuf,
    /// Optional local socket path for the event bridge. `None` disables it.
    pub event_bridge_socket: Option<PathBuf>,
    /// Seconds between `manager.optimize_all()` sweeps; 0 disables the loop.
    pub optimize_interval_secs: u64,
    /// In-process hub subscriber queue capacity.
    pub hub_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("./ergs-data"),
            event_bridge_socket: Some(PathBuf::from("./ergs-data/ergs.sock")),
            optimize_interval_secs: 3600,
            hub_capacity: ergs_firehose::DEFAULT_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Reads `path`, or writes and returns [`Self::default`] if it does not exist yet.
    pub fn load_or_create(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if !path.exists() {
            let config = Self::default();
            fs::write(path, toml::to_string_pretty(&config)?)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_default_on_first_run_and_reloads_identically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let first = ServerConfig::load_or_create(&path).unwrap();
        assert!(path.exists());

        let second = ServerConfig::load_or_create(&path).unwrap();
        assert_eq!(first.storage_dir, second.storage_dir);
        assert_eq!(first.optimize_interval_secs, second.optimize_interval_secs);
    }
}
