use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use thermostat_common::{
    onewire::{parse_w1_slave, W1ParseError, DS18B20_FAMILY_PREFIX},
    RoomSensorConfig,
};

const KERNEL_MODULES: [&str; 2] = ["w1-gpio", "w1-therm"];

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to list 1-Wire devices in {dir}")]
    ListDevices {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no DS18B20 sensor found in {0}")]
    NoDevice(PathBuf),
}

/// Best effort; the modules may be built in or already loaded.
pub async fn load_kernel_modules() {
    for module in KERNEL_MODULES {
        match Command::new("modprobe").arg(module).status().await {
            Ok(status) if status.success() => debug!("loaded kernel module {module}"),
            Ok(status) => warn!("modprobe {module} exited with {status}"),
            Err(err) => warn!("failed to run modprobe {module}: {err}"),
        }
    }
}

/// A DS18B20 exposed by the kernel's `w1-therm` driver.
#[derive(Debug)]
pub struct Ds18b20 {
    slave_file: PathBuf,
    attempts: u32,
    retry_delay: Duration,
}

impl Ds18b20 {
    /// Picks the first `28-*` device, in name order.
    pub async fn discover(config: &RoomSensorConfig) -> Result<Self, SensorError> {
        let device_dir = first_device(&config.devices_dir).await?;
        Ok(Self {
            slave_file: device_dir.join("w1_slave"),
            attempts: config.read_attempts.max(1),
            retry_delay: Duration::from_millis(config.read_retry_ms),
        })
    }

    /// Reads until the CRC check passes. `None` when no valid reading arrives in time.
    pub async fn read_celsius(&self) -> Option<f32> {
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }
            let contents = match tokio::fs::read_to_string(&self.slave_file).await {
                Ok(contents) => contents,
                Err(err) => {
                    debug!("read {} failed: {err}", self.slave_file.display());
                    continue;
                }
            };
            match parse_w1_slave(&contents) {
                Ok(celsius) => return Some(celsius),
                Err(W1ParseError::NotReady) => debug!("reading {attempt} not ready"),
                Err(err) => {
                    warn!("unusable reading from {}: {err}", self.slave_file.display());
                    return None;
                }
            }
        }
        None
    }
}

impl fmt::Display for Ds18b20 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slave_file.display())
    }
}

async fn first_device(devices_dir: &Path) -> Result<PathBuf, SensorError> {
    let list_err = |source| SensorError::ListDevices {
        dir: devices_dir.to_path_buf(),
        source,
    };
    let mut entries = match tokio::fs::read_dir(devices_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(SensorError::NoDevice(devices_dir.to_path_buf()))
        }
        Err(err) => return Err(list_err(err)),
    };

    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with(DS18B20_FAMILY_PREFIX)
        {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| SensorError::NoDevice(devices_dir.to_path_buf()))
}
