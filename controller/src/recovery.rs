use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use thermostat_common::{BluetoothConfig, RetryConfig};

/// Last-resort recovery between retry attempts.
#[async_trait]
pub trait AdapterRecovery: Send + Sync {
    async fn reset(&self) -> anyhow::Result<()>;
}

/// Power-cycles the local adapter with `hciconfig`.
///
/// This is a global side effect: every other user of the adapter loses its links and
/// nothing coordinates with them.
pub struct HciconfigRecovery {
    interface: String,
    down_delay: Duration,
    settle_delay: Duration,
}

impl HciconfigRecovery {
    pub fn new(bluetooth: &BluetoothConfig, retry: &RetryConfig) -> Self {
        Self {
            interface: bluetooth.adapter_interface.clone(),
            down_delay: Duration::from_millis(retry.adapter_down_ms),
            settle_delay: Duration::from_millis(retry.adapter_settle_ms),
        }
    }

    async fn hciconfig(&self, state: &str) -> anyhow::Result<()> {
        let status = Command::new("hciconfig")
            .arg(&self.interface)
            .arg(state)
            .status()
            .await
            .with_context(|| format!("failed to run hciconfig {} {state}", self.interface))?;
        if !status.success() {
            warn!("hciconfig {} {state} exited with {status}", self.interface);
        }
        Ok(())
    }
}

#[async_trait]
impl AdapterRecovery for HciconfigRecovery {
    async fn reset(&self) -> anyhow::Result<()> {
        info!("power cycling bluetooth adapter {}", self.interface);
        self.hciconfig("down").await?;
        tokio::time::sleep(self.down_delay).await;
        self.hciconfig("up").await?;
        tokio::time::sleep(self.settle_delay).await;
        Ok(())
    }
}
