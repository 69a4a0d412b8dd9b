use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use clap::{Args, Parser};
use tracing::info;

use thermostat_common::{format_temp, store::csv_timestamp, AppConfig};

use crate::{apply::Controller, server};

#[derive(Debug, Parser)]
#[command(
    name = "thermostat-controller",
    about = "Control an eQ-3 Bluetooth radiator thermostat"
)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, env = "THERMOSTAT_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[command(flatten)]
    action: Action,
}

#[derive(Debug, Args)]
#[group(multiple = false)]
struct Action {
    /// Print the current target temperature.
    #[arg(long)]
    get_temperature: bool,

    /// Set a manual target temperature, rounded to half a degree.
    #[arg(long, value_name = "CELSIUS", allow_negative_numbers = true)]
    set_temperature: Option<f32>,

    /// Apply the value in `value_file_path`.
    #[arg(long)]
    apply: bool,

    /// Serve the status and control HTTP API.
    #[arg(long)]
    serve: bool,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    let controller = Controller::from_config(config)?;

    let result = dispatch(&controller, &cli.action).await;
    controller.forward_failure(result).await
}

async fn dispatch(controller: &Controller, action: &Action) -> anyhow::Result<()> {
    if action.serve {
        return server::serve(controller.clone()).await;
    }
    if action.apply {
        return controller.apply_requested().await;
    }
    if let Some(temp) = action.set_temperature {
        let report = controller.apply_value(&requested_value(temp)).await?;
        info!("{report}");
        return Ok(());
    }

    let target = controller.current_target().await?;
    if action.get_temperature {
        println!("{}", format_temp(target));
    } else {
        println!(
            "{}, {}",
            csv_timestamp(Local::now().naive_local()),
            format_temp(target)
        );
    }
    Ok(())
}

// `21` is recorded as `21.0`, the way the value file would carry it.
fn requested_value(temp: f32) -> String {
    if temp.fract() == 0.0 {
        format!("{temp:.1}")
    } else {
        temp.to_string()
    }
}

#[cfg(test)]
mod tests {
    use thermostat_common::CommandRequest;

    use super::*;

    #[test]
    fn actions_are_mutually_exclusive() {
        let err = Cli::try_parse_from(["thermostat-controller", "--apply", "--serve"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

        let err = Cli::try_parse_from([
            "thermostat-controller",
            "--get-temperature",
            "--set-temperature=21",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_set_temperature() {
        let cli = Cli::try_parse_from(["thermostat-controller", "--set-temperature=21.3"]).unwrap();
        assert_eq!(cli.action.set_temperature, Some(21.3));
        assert!(!cli.action.apply);
        assert!(!cli.action.serve);
        assert!(!cli.action.get_temperature);
    }

    #[test]
    fn no_flag_is_a_plain_read() {
        let cli = Cli::try_parse_from(["thermostat-controller", "--config", "/etc/eq3.json"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/eq3.json"));
        assert_eq!(cli.action.set_temperature, None);
        assert!(!cli.action.get_temperature);
    }

    #[test]
    fn requested_value_keeps_a_decimal() {
        assert_eq!(requested_value(21.0), "21.0");
        assert_eq!(requested_value(21.3), "21.3");
        assert_eq!(
            CommandRequest::parse(&requested_value(21.3)),
            CommandRequest::SetTemperature(21.5)
        );
        assert_eq!(
            CommandRequest::parse(&requested_value(-3.0)),
            CommandRequest::Invalid("-3.0".to_string())
        );
    }
}
