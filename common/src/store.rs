//! Plain-text files shared with cron jobs and the web front end.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{Local, NaiveDateTime};
use tokio::io::AsyncWriteExt;

pub const STATUS_PLACEHOLDER: &str = "NONE";
pub const EQ3_CSV_HEADER: &str = "Timestamp, value";
pub const ROOM_CSV_HEADER: &str = "Timestamp, Celsius";

const LOG_TIMESTAMP: &str = "%y-%m-%d %H:%M:%S";
const CSV_TIMESTAMP: &str = "%Y-%m-%d %H:%M";

pub fn log_line(now: NaiveDateTime, message: &str) -> String {
    format!("[{}] {message}\n", now.format(LOG_TIMESTAMP))
}

pub fn csv_timestamp(now: NaiveDateTime) -> String {
    now.format(CSV_TIMESTAMP).to_string()
}

/// Append-only operator log, `[YY-MM-DD HH:MM:SS] message` per line.
#[derive(Debug, Clone)]
pub struct OperatorLog {
    path: PathBuf,
}

impl OperatorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn append(&self, message: &str) -> std::io::Result<()> {
        self.append_at(Local::now().naive_local(), message).await
    }

    pub async fn append_at(&self, now: NaiveDateTime, message: &str) -> std::io::Result<()> {
        append(&self.path, log_line(now, message).as_bytes()).await
    }
}

/// CSV file that gets its header on first write.
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
    header: &'static str,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>, header: &'static str) -> Self {
        Self {
            path: path.into(),
            header,
        }
    }

    pub async fn append_row(&self, now: NaiveDateTime, value: &str) -> std::io::Result<()> {
        let mut payload = String::new();
        if !tokio::fs::try_exists(&self.path).await? {
            payload.push_str(self.header);
            payload.push('\n');
        }
        payload.push_str(&format!("{}, {value}\n", csv_timestamp(now)));
        append(&self.path, payload.as_bytes()).await
    }
}

/// Last successfully applied raw value.
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the stored value, seeding the file with `NONE` when it is missing.
    pub async fn load(&self) -> std::io::Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Ok(raw.trim().to_string()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.save(STATUS_PLACEHOLDER).await?;
                Ok(STATUS_PLACEHOLDER.to_string())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn save(&self, value: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, value).await
    }
}

pub async fn read_trimmed(path: &Path) -> std::io::Result<String> {
    Ok(tokio::fs::read_to_string(path).await?.trim().to_string())
}

/// Last non-empty line of a text file; `None` when the file does not exist.
pub async fn last_line(path: &Path) -> std::io::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

async fn append(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(payload).await?;
    file.flush().await
}
