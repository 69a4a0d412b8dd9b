use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use thermostat_common::{escape_str, TelegramConfig};

const TELEGRAM_API: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Outbound channel for operator-facing messages. Callers escape the text first.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("failed to build telegram http client")?;
        Ok(Self {
            client,
            endpoint: format!("{TELEGRAM_API}/bot{}/sendMessage", config.bot_token),
            chat_id: config.chat_id.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
                parse_mode: "HTML",
            })
            .send()
            .await
            .context("telegram request failed")?
            .error_for_status()
            .context("telegram rejected message")?;
        Ok(())
    }
}

/// Used when no chat is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        info!("notification: {text}");
        Ok(())
    }
}

pub fn from_config(config: Option<&TelegramConfig>) -> anyhow::Result<Arc<dyn Notifier>> {
    match config {
        Some(telegram) => Ok(Arc::new(TelegramNotifier::new(telegram)?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

pub async fn notify(notifier: &dyn Notifier, text: &str) -> anyhow::Result<()> {
    notifier.send(&escape_str(text)).await
}

/// Reports a top-level failure to the operator and hands the error back untouched.
pub async fn forward_failure<T>(
    notifier: &dyn Notifier,
    result: anyhow::Result<T>,
) -> anyhow::Result<T> {
    let err = match result {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    let message = format!("Thermostat set Error: {err:#}\n\n{err:?}");
    if let Err(send_err) = notify(notifier, &message).await {
        warn!("failed to deliver error notification: {send_err:#}");
    }
    Err(err)
}
