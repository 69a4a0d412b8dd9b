use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use thermostat_common::{
    store::{CsvLog, ROOM_CSV_HEADER},
    AppConfig, RoomSensorConfig, TOPIC_SENSOR_STATUS, TOPIC_SENSOR_TEMP,
};

use crate::ds18b20::{load_kernel_modules, Ds18b20};

const MQTT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "thermostat-sensor", about = "Log the DS18B20 room temperature")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "THERMOSTAT_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Keep sampling at this interval instead of taking a single reading.
    #[arg(long, value_name = "SECONDS")]
    interval_secs: Option<u64>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    let sensor_config = &config.room_sensor;

    if sensor_config.load_modules {
        load_kernel_modules().await;
    }
    let sensor = Ds18b20::discover(sensor_config).await?;
    info!("using temperature sensor {sensor}");

    let recorder = RoomRecorder::new(sensor_config);
    let publisher = Publisher::from_env().await?;

    let Some(interval_secs) = cli.interval_secs else {
        let result = sample(&sensor, &recorder, publisher.as_ref()).await;
        if let Some(publisher) = publisher {
            publisher.close().await;
        }
        return result;
    };

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        if let Err(err) = sample(&sensor, &recorder, publisher.as_ref()).await {
            warn!("room temperature sample failed: {err:#}");
        }
    }
}

async fn sample(
    sensor: &Ds18b20,
    recorder: &RoomRecorder,
    publisher: Option<&Publisher>,
) -> anyhow::Result<()> {
    let Some(celsius) = sensor.read_celsius().await else {
        warn!("no valid reading from {sensor}");
        return Ok(());
    };

    let value = recorder.record(Local::now().naive_local(), celsius).await?;
    if let Some(publisher) = publisher {
        publisher.publish_temperature(&value).await?;
    }
    info!("room temperature {value}C");
    Ok(())
}

/// Room CSV plus the single-value file the web page polls.
struct RoomRecorder {
    csv: CsvLog,
    last_value_path: PathBuf,
}

impl RoomRecorder {
    fn new(config: &RoomSensorConfig) -> Self {
        Self {
            csv: CsvLog::new(&config.csv_path, ROOM_CSV_HEADER),
            last_value_path: config.last_value_path.clone(),
        }
    }

    async fn record(&self, now: NaiveDateTime, celsius: f32) -> anyhow::Result<String> {
        let value = format!("{celsius:.1}");
        self.csv
            .append_row(now, &value)
            .await
            .context("failed to append room temperature row")?;
        tokio::fs::write(&self.last_value_path, &value)
            .await
            .with_context(|| {
                format!(
                    "failed to write last value to {}",
                    self.last_value_path.display()
                )
            })?;
        Ok(value)
    }
}

/// Present only when `MQTT_HOST` is set.
struct Publisher {
    mqtt: AsyncClient,
    driver: JoinHandle<()>,
}

impl Publisher {
    async fn from_env() -> anyhow::Result<Option<Self>> {
        let Ok(mqtt_host) = std::env::var("MQTT_HOST") else {
            return Ok(None);
        };
        let mqtt_port = std::env::var("MQTT_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(1883);

        let mut mqtt_options = MqttOptions::new("thermostat-sensor-rust", mqtt_host, mqtt_port);
        if let Ok(user) = std::env::var("MQTT_USER") {
            let pass = std::env::var("MQTT_PASS").unwrap_or_default();
            mqtt_options.set_credentials(user, pass);
        }

        let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);
        mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "online")
            .await
            .context("failed to publish sensor online status")?;

        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("sensor mqtt poll error: {err}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        info!("sensor publisher started");
        Ok(Some(Self { mqtt, driver }))
    }

    async fn publish_temperature(&self, value: &str) -> anyhow::Result<()> {
        self.mqtt
            .publish(TOPIC_SENSOR_TEMP, QoS::AtLeastOnce, true, value.to_string())
            .await
            .context("failed to publish sensor temperature")
    }

    /// Flushes queued publishes before a one-shot run exits.
    async fn close(self) {
        if let Err(err) = self
            .mqtt
            .publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "offline")
            .await
        {
            warn!("failed to publish sensor offline status: {err}");
        }
        if let Err(err) = self.mqtt.disconnect().await {
            warn!("failed to request mqtt disconnect: {err}");
            return;
        }
        if tokio::time::timeout(MQTT_FLUSH_TIMEOUT, self.driver)
            .await
            .is_err()
        {
            warn!("mqtt broker did not drain within {MQTT_FLUSH_TIMEOUT:?}");
        }
    }
}
