use std::path::PathBuf;

use tracing::{info, warn};

use thermostat_common::store::OperatorLog;

/// Mirrors operator-facing messages into the tracing log and the operator log file.
#[derive(Debug, Clone)]
pub struct Journal {
    log: OperatorLog,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            log: OperatorLog::new(path),
        }
    }

    pub async fn record(&self, message: &str) {
        info!("{message}");
        if let Err(err) = self.log.append(message).await {
            warn!("failed to append to operator log: {err}");
        }
    }
}
