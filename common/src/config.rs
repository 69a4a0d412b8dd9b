use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("thermostat_mac_address is empty")]
    MissingMacAddress,
    #[error("value_file_path is not configured")]
    MissingValueFile,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BluetoothConfig {
    pub adapter_interface: String,
    pub command_timeout_secs: u64,
    pub scan_timeout_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter_interface: "hci0".to_string(),
            command_timeout_secs: 10,
            scan_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoomSensorConfig {
    pub devices_dir: PathBuf,
    pub csv_path: PathBuf,
    pub last_value_path: PathBuf,
    pub load_modules: bool,
    pub read_attempts: u32,
    pub read_retry_ms: u64,
}

impl Default for RoomSensorConfig {
    fn default() -> Self {
        Self {
            devices_dir: PathBuf::from("/sys/bus/w1/devices"),
            csv_path: PathBuf::from("temperature_log.csv"),
            last_value_path: PathBuf::from("temperature_last.txt"),
            load_modules: true,
            read_attempts: 10,
            read_retry_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub room_temp_file: Option<PathBuf>,
    pub eq3_temp_file: Option<PathBuf>,
    pub web_root: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            room_temp_file: None,
            eq3_temp_file: None,
            web_root: None,
        }
    }
}

/// Process-wide settings, loaded once from `config.json` and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub thermostat_mac_address: String,
    #[serde(default)]
    pub value_file_path: Option<PathBuf>,
    #[serde(default = "default_status_file")]
    pub status_file_path: PathBuf,
    #[serde(default = "default_log_file")]
    pub log_file_path: PathBuf,
    #[serde(default)]
    pub eq3_temperature_csv: Option<PathBuf>,
    #[serde(default)]
    pub skip_unchanged: bool,
    #[serde(default)]
    pub bluetooth: BluetoothConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub room_sensor: RoomSensorConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

fn default_status_file() -> PathBuf {
    PathBuf::from("status.txt")
}

fn default_log_file() -> PathBuf {
    PathBuf::from("control.log")
}

impl AppConfig {
    /// Reads the config and resolves relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thermostat_mac_address.trim().is_empty() {
            return Err(ConfigError::MissingMacAddress);
        }
        Ok(())
    }

    pub fn value_file(&self) -> Result<&Path, ConfigError> {
        self.value_file_path
            .as_deref()
            .ok_or(ConfigError::MissingValueFile)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };

        if let Some(path) = self.value_file_path.as_mut() {
            resolve(path);
        }
        resolve(&mut self.status_file_path);
        resolve(&mut self.log_file_path);
        if let Some(path) = self.eq3_temperature_csv.as_mut() {
            resolve(path);
        }
        resolve(&mut self.room_sensor.csv_path);
        resolve(&mut self.room_sensor.last_value_path);
        for path in [
            self.http.room_temp_file.as_mut(),
            self.http.eq3_temp_file.as_mut(),
            self.http.web_root.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            resolve(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"thermostat_mac_address": "00:1A:22:0C:55:44", "value_file_path": "value.txt"}}"#
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();

        assert_eq!(config.value_file().unwrap(), dir.path().join("value.txt"));
        assert_eq!(config.status_file_path, dir.path().join("status.txt"));
        assert_eq!(config.log_file_path, dir.path().join("control.log"));
        assert!(!config.skip_unchanged);
        assert_eq!(config.bluetooth, BluetoothConfig::default());
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.telegram, None);
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn absolute_paths_are_kept() {
        let mut config: AppConfig = serde_json::from_str(
            r#"{
                "thermostat_mac_address": "00:1A:22:0C:55:44",
                "eq3_temperature_csv": "/var/log/eq3.csv",
                "skip_unchanged": true,
                "telegram": {"bot_token": "t", "chat_id": "42"}
            }"#,
        )
        .unwrap();
        config.resolve_paths(Path::new("/opt/thermostat"));

        assert_eq!(
            config.eq3_temperature_csv,
            Some(PathBuf::from("/var/log/eq3.csv"))
        );
        assert_eq!(
            config.status_file_path,
            PathBuf::from("/opt/thermostat/status.txt")
        );
        assert!(config.skip_unchanged);
        assert!(matches!(
            config.value_file(),
            Err(ConfigError::MissingValueFile)
        ));
    }

    #[test]
    fn missing_file_and_empty_mac_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = AppConfig::load(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"thermostat_mac_address": " "}"#).unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::MissingMacAddress)
        ));
    }
}
