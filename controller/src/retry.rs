use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use thermostat_common::{
    retry::MAX_ATTEMPTS, RecoveryAction, RetryAttempt, RetryConfig, RetryPolicy,
};

use crate::{device::DeviceError, journal::Journal, recovery::AdapterRecovery};

pub struct RetryOutcome<T> {
    pub result: Result<T, DeviceError>,
    pub attempts: Vec<RetryAttempt>,
}

/// Runs one Bluetooth round trip under the fixed retry schedule.
///
/// Transient failures back off, then power-cycle the adapter, then give up with the
/// error of the last attempt. Any other error is returned at once.
pub async fn run_with_retry<S, T, F>(
    target: &mut S,
    config: &RetryConfig,
    recovery: &dyn AdapterRecovery,
    journal: &Journal,
    mut operation: F,
) -> RetryOutcome<T>
where
    S: ?Sized + Send,
    F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T, DeviceError>>,
{
    let mut policy = RetryPolicy::new();

    loop {
        let attempt = policy.begin_attempt();
        let err = match operation(target).await {
            Ok(value) => {
                policy.record_success();
                return RetryOutcome {
                    result: Ok(value),
                    attempts: policy.into_history(),
                };
            }
            Err(err) if !err.is_transient() => {
                return RetryOutcome {
                    result: Err(err),
                    attempts: policy.into_history(),
                };
            }
            Err(err) => err,
        };

        journal
            .record(&format!(
                "Bluetooth command failed on attempt {attempt}/{MAX_ATTEMPTS}: {err}"
            ))
            .await;

        match policy.record_failure() {
            None => {
                return RetryOutcome {
                    result: Err(err),
                    attempts: policy.into_history(),
                };
            }
            Some(RecoveryAction::SleepBackoff) => {
                journal
                    .record(&format!(
                        "First attempt failed. Retrying in {} seconds...",
                        config.backoff_ms as f64 / 1000.0
                    ))
                    .await;
                tokio::time::sleep(Duration::from_millis(config.backoff_ms)).await;
            }
            Some(RecoveryAction::AdapterReset) => {
                journal
                    .record("Second attempt failed. Restarting Bluetooth adapter...")
                    .await;
                if let Err(reset_err) = recovery.reset().await {
                    warn!("bluetooth adapter reset failed: {reset_err:#}");
                }
            }
            Some(RecoveryAction::None) => {}
        }
    }
}
