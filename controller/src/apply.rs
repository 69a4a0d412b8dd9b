use std::sync::Arc;

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use tracing::{debug, warn};

use thermostat_common::{
    away_until,
    store::{read_trimmed, CsvLog, StatusStore, EQ3_CSV_HEADER},
    AppConfig, CommandRequest, ThermostatMode,
};

use crate::{
    ble::BleConnection,
    device::{DeviceError, Thermostat, ThermostatDevice},
    journal::Journal,
    notify::{self, Notifier},
    recovery::{AdapterRecovery, HciconfigRecovery},
    retry::run_with_retry,
};

/// Performs the single device write a request maps to and returns its description.
pub async fn execute<D>(
    device: &mut D,
    command: &CommandRequest,
    now: NaiveDateTime,
) -> Result<String, DeviceError>
where
    D: ThermostatDevice + ?Sized,
{
    match command {
        CommandRequest::Away => {
            let eco = device.eco_temperature().ok_or(DeviceError::MissingPresets)?;
            device.set_away(away_until(now), eco).await?;
        }
        CommandRequest::Home => device.set_mode(ThermostatMode::Auto).await?,
        CommandRequest::SetTemperature(temp) => device.set_target_temperature(*temp).await?,
        CommandRequest::Invalid(raw) => debug!("not sending unrecognised value {raw:?}"),
    }
    Ok(command.describe(device.comfort_temperature(), device.eco_temperature()))
}

/// Everything one invocation needs to talk to the thermostat and report on it.
#[derive(Clone)]
pub struct Controller {
    config: Arc<AppConfig>,
    notifier: Arc<dyn Notifier>,
    recovery: Arc<dyn AdapterRecovery>,
    journal: Journal,
}

impl Controller {
    pub fn new(
        config: AppConfig,
        notifier: Arc<dyn Notifier>,
        recovery: Arc<dyn AdapterRecovery>,
    ) -> Self {
        let journal = Journal::new(config.log_file_path.clone());
        Self {
            config: Arc::new(config),
            notifier,
            recovery,
            journal,
        }
    }

    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let notifier = notify::from_config(config.telegram.as_ref())?;
        let recovery = Arc::new(HciconfigRecovery::new(&config.bluetooth, &config.retry));
        Ok(Self::new(config, notifier, recovery))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The link is opened lazily by the first request.
    pub fn connect_device(&self) -> Thermostat<BleConnection> {
        Thermostat::new(BleConnection::new(
            &self.config.thermostat_mac_address,
            &self.config.bluetooth,
        ))
    }

    pub async fn forward_failure<T>(&self, result: anyhow::Result<T>) -> anyhow::Result<T> {
        notify::forward_failure(self.notifier.as_ref(), result).await
    }

    pub async fn read_target<D>(&self, device: &mut D) -> Result<f32, DeviceError>
    where
        D: ThermostatDevice + ?Sized + 'static,
    {
        let outcome = run_with_retry(
            device,
            &self.config.retry,
            self.recovery.as_ref(),
            &self.journal,
            |device| {
                Box::pin(async move {
                    device.update().await?;
                    Ok::<_, DeviceError>(device.target_temperature())
                })
            },
        )
        .await;
        debug!("status read took {} attempt(s)", outcome.attempts.len());
        outcome.result
    }

    /// Refreshes the device, applies `command` and reports the outcome.
    ///
    /// Returns the report line. `raw` is the value as requested, recorded verbatim in the
    /// thermostat CSV.
    pub async fn apply_command<D>(
        &self,
        device: &mut D,
        command: &CommandRequest,
        raw: &str,
    ) -> anyhow::Result<String>
    where
        D: ThermostatDevice + ?Sized + 'static,
    {
        let outcome = run_with_retry(
            device,
            &self.config.retry,
            self.recovery.as_ref(),
            &self.journal,
            |device| {
                let command = command.clone();
                Box::pin(async move {
                    device.update().await?;
                    execute(device, &command, Local::now().naive_local()).await
                })
            },
        )
        .await;
        debug!("command took {} attempt(s)", outcome.attempts.len());
        let description = outcome.result?;

        let report = format!("{device} // requested={description}");
        if let Err(err) = notify::notify(self.notifier.as_ref(), &report).await {
            warn!("failed to send status notification: {err:#}");
        }
        self.journal.record(&report).await;

        if let Some(csv_path) = &self.config.eq3_temperature_csv {
            CsvLog::new(csv_path, EQ3_CSV_HEADER)
                .append_row(Local::now().naive_local(), raw)
                .await
                .with_context(|| format!("failed to append to {}", csv_path.display()))?;
        }
        Ok(report)
    }

    /// Runs the change-detection gate against the configured value file.
    pub async fn apply_requested_on<D>(&self, device: &mut D) -> anyhow::Result<()>
    where
        D: ThermostatDevice + ?Sized + 'static,
    {
        let store = StatusStore::new(&self.config.status_file_path);
        let previous = store.load().await.with_context(|| {
            format!(
                "failed to read status file {}",
                self.config.status_file_path.display()
            )
        })?;
        let value_file = self.config.value_file()?;
        let value = read_trimmed(value_file)
            .await
            .with_context(|| format!("failed to read value file {}", value_file.display()))?;

        if self.config.skip_unchanged && value == previous {
            self.journal.record(&format!("value={value}, no change")).await;
            return Ok(());
        }

        let command = CommandRequest::parse(&value);
        self.apply_command(device, &command, &value).await?;
        store.save(&value).await.with_context(|| {
            format!(
                "failed to write status file {}",
                self.config.status_file_path.display()
            )
        })?;
        Ok(())
    }

    pub async fn apply_requested(&self) -> anyhow::Result<()> {
        let mut device = self.connect_device();
        let result = self.apply_requested_on(&mut device).await;
        device.disconnect().await;
        result
    }

    pub async fn apply_value(&self, raw: &str) -> anyhow::Result<String> {
        let raw = raw.trim();
        let command = CommandRequest::parse(raw);
        let mut device = self.connect_device();
        let result = self.apply_command(&mut device, &command, raw).await;
        device.disconnect().await;
        result
    }

    pub async fn current_target(&self) -> anyhow::Result<f32> {
        let mut device = self.connect_device();
        let result = self.read_target(&mut device).await;
        device.disconnect().await;
        Ok(result?)
    }
}
