use crate::domain::config::{BridgeConfig, RelayConfig};
use crate::domain::error::{BridgeError, BridgeResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A configuration document that can be located, loaded and validated
pub trait ConfigDocument: Serialize + DeserializeOwned + Default {
    /// File name looked up in each search directory
    const FILE_NAME: &'static str;

    /// Comment block written at the top of a generated file
    const HEADER: &'static str;

    fn validate(&self) -> BridgeResult<()>;
}

impl ConfigDocument for BridgeConfig {
    const FILE_NAME: &'static str = "serbridge.toml";
    const HEADER: &'static str = "\
# serbridge serial bridge configuration
#
# [serial]   port, baud_rate, data_bits (5-8), stop_bits (1-2),
#            parity (none|odd|even|mark|space), flow_control (none|rts_cts|xon_xoff)
#            port = \"/dev/null\" selects the in-memory test device
# [network]  listen_port and bind_address; `serbridge dial` connects to this address
";

    fn validate(&self) -> BridgeResult<()> {
        BridgeConfig::validate(self)
    }
}

impl ConfigDocument for RelayConfig {
    const FILE_NAME: &'static str = "relay.toml";
    const HEADER: &'static str = "\
# serbridge TCP relay configuration
#
# [server]   address clients connect to
# [target]   upstream every client is forwarded to
# [clients]  max_connections (>= 1), connection_timeout and sweep_interval
#            as durations such as \"250ms\", \"30s\", \"5m\"
";

    fn validate(&self) -> BridgeResult<()> {
        RelayConfig::validate(self)
    }
}

/// Configuration manager
pub struct ConfigManager {
    search_dirs: Vec<PathBuf>,
}

impl ConfigManager {
    /// Search the working directory, `./configs`, `/etc/serbridge` and `~/.serbridge`
    pub fn new() -> Self {
        let mut search_dirs = vec![
            PathBuf::from("."),
            PathBuf::from("configs"),
            PathBuf::from("/etc/serbridge"),
        ];
        if let Some(home) = dirs::home_dir() {
            search_dirs.push(home.join(".serbridge"));
        }
        Self { search_dirs }
    }

    pub fn with_search_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// First existing file for `T` in search order
    pub fn find<T: ConfigDocument>(&self) -> Option<PathBuf> {
        self.search_dirs
            .iter()
            .map(|dir| dir.join(T::FILE_NAME))
            .find(|path| path.is_file())
    }

    /// Load and validate a document.
    ///
    /// An explicit path must exist. Without one the search directories are
    /// tried in order and defaults are used when nothing is found. Returns
    /// the file the configuration came from, if any.
    pub fn load<T: ConfigDocument>(&self, explicit: Option<&Path>) -> BridgeResult<(T, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(BridgeError::config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => self.find::<T>(),
        };

        let config = match &path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                self.load_from_path::<T>(path)?
            }
            None => {
                debug!("No {} found, using defaults", T::FILE_NAME);
                T::default()
            }
        };

        config.validate()?;
        Ok((config, path))
    }

    /// Parse a document without validating it
    pub fn load_from_path<T: ConfigDocument>(&self, path: &Path) -> BridgeResult<T> {
        let content = fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            BridgeError::config(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Parse and validate a document at `path`
    pub fn validate_file<T: ConfigDocument>(&self, path: &Path) -> BridgeResult<T> {
        let config = self.load_from_path::<T>(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to specific path
    pub fn save_to_path<T: ConfigDocument>(&self, path: &Path, config: &T) -> BridgeResult<()> {
        let content = render(config)?;
        fs::write(path, content).map_err(|e| {
            BridgeError::config(format!("Failed to write config file {}: {}", path.display(), e))
        })
    }

    /// Write a commented default document; never overwrites an existing file
    pub fn init_config<T: ConfigDocument>(&self, path: &Path) -> BridgeResult<()> {
        if path.exists() {
            return Err(BridgeError::config(format!(
                "{} already exists",
                path.display()
            )));
        }

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                BridgeError::config(format!("Failed to create config directory: {}", e))
            })?;
        }

        self.save_to_path(path, &T::default())?;
        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// TOML text for a document, headed by its comment block
pub fn render<T: ConfigDocument>(config: &T) -> BridgeResult<String> {
    let body = toml::to_string_pretty(config)
        .map_err(|e| BridgeError::config(format!("Failed to serialize config: {}", e)))?;
    Ok(format!("{}\n{}", T::HEADER, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_nothing_found() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_search_dirs(vec![temp_dir.path().to_path_buf()]);

        let (config, source) = manager.load::<BridgeConfig>(None).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert!(source.is_none());
    }

    #[test]
    fn test_search_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(
            second.path().join("serbridge.toml"),
            "[network]\nlisten_port = 9100\n",
        )
        .unwrap();

        let manager = ConfigManager::with_search_dirs(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        let (config, source) = manager.load::<BridgeConfig>(None).unwrap();
        assert_eq!(config.network.listen_port, 9100);
        assert_eq!(source.unwrap(), second.path().join("serbridge.toml"));

        fs::write(
            first.path().join("serbridge.toml"),
            "[network]\nlisten_port = 9200\n",
        )
        .unwrap();
        let (config, _) = manager.load::<BridgeConfig>(None).unwrap();
        assert_eq!(config.network.listen_port, 9200);
    }

    #[test]
    fn test_relay_uses_its_own_file_name() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("serbridge.toml"), "[network]\nlisten_port = 1\n").unwrap();

        let manager = ConfigManager::with_search_dirs(vec![temp_dir.path().to_path_buf()]);
        assert!(manager.find::<RelayConfig>().is_none());
        assert!(manager.find::<BridgeConfig>().is_some());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_search_dirs(Vec::new());
        let missing = temp_dir.path().join("missing.toml");

        assert!(matches!(
            manager.load::<BridgeConfig>(Some(&missing)),
            Err(BridgeError::Config { .. })
        ));
    }

    #[test]
    fn test_invalid_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("serbridge.toml");
        fs::write(&path, "[serial]\nbaud_rate = 1234\n").unwrap();

        let manager = ConfigManager::with_search_dirs(Vec::new());
        assert!(manager.load::<BridgeConfig>(Some(&path)).is_err());
        assert!(manager.load_from_path::<BridgeConfig>(&path).is_ok());
    }

    #[test]
    fn test_init_config_round_trips_and_refuses_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("relay.toml");
        let manager = ConfigManager::new();

        manager.init_config::<RelayConfig>(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# serbridge TCP relay configuration"));

        let config = manager.validate_file::<RelayConfig>(&path).unwrap();
        assert_eq!(config, RelayConfig::default());

        assert!(manager.init_config::<RelayConfig>(&path).is_err());
    }
}
