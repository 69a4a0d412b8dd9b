use std::{fmt, time::Duration};

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use uuid::Uuid;

use thermostat_common::{
    protocol::{self, ProtocolError},
    types::{MAX_TEMP_C, MIN_TEMP_C, OFF_TEMP_C, ON_TEMP_C},
    DeviceStatus, StatusLine, ThermostatMode,
};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("bluetooth {action} failed: {source}")]
    Backend {
        action: &'static str,
        #[source]
        source: btleplug::Error,
    },
    #[error("no response from {address} within {timeout:?}")]
    Timeout { address: String, timeout: Duration },
    #[error("thermostat {0} not found during scan")]
    NotFound(String),
    #[error("thermostat {0} is not connected")]
    NotConnected(String),
    #[error("characteristic {0} not available")]
    MissingCharacteristic(Uuid),
    #[error("notification stream closed")]
    StreamClosed,
    #[error("no bluetooth adapter available")]
    NoAdapter,
    #[error("invalid thermostat address {0:?}")]
    InvalidAddress(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("thermostat did not report its comfort/eco presets")]
    MissingPresets,
    #[error("mode {0:?} cannot be set directly")]
    UnsupportedMode(ThermostatMode),
}

impl DeviceError {
    /// Only link-level failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Backend { .. }
                | Self::Timeout { .. }
                | Self::NotFound(_)
                | Self::NotConnected(_)
                | Self::MissingCharacteristic(_)
                | Self::StreamClosed
        )
    }
}

/// A link to one thermostat. Implementations do not retry.
#[async_trait]
pub trait Connection: Send {
    fn address(&self) -> &str;

    /// Writes `request` and returns the status frame the device answers with.
    async fn request(&mut self, request: &[u8]) -> Result<Vec<u8>, DeviceError>;

    async fn disconnect(&mut self);
}

/// Capabilities the controller needs from a thermostat.
///
/// Not safe to drive two sessions against the same device address at once; callers
/// serialize access.
#[async_trait]
pub trait ThermostatDevice: Send + fmt::Display {
    async fn update(&mut self) -> Result<(), DeviceError>;

    async fn set_mode(&mut self, mode: ThermostatMode) -> Result<(), DeviceError>;

    async fn set_away(&mut self, until: NaiveDateTime, temp: f32) -> Result<(), DeviceError>;

    async fn set_target_temperature(&mut self, temp: f32) -> Result<(), DeviceError>;

    async fn disconnect(&mut self);

    fn target_temperature(&self) -> f32;

    fn comfort_temperature(&self) -> Option<f32>;

    fn eco_temperature(&self) -> Option<f32>;
}

pub struct Thermostat<C> {
    conn: C,
    status: DeviceStatus,
}

impl<C: Connection> Thermostat<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            status: DeviceStatus::default(),
        }
    }

    async fn send(&mut self, request: Vec<u8>) -> Result<(), DeviceError> {
        let frame = self.conn.request(&request).await?;
        self.status = protocol::parse_status(&frame)?;
        Ok(())
    }
}

#[async_trait]
impl<C: Connection> ThermostatDevice for Thermostat<C> {
    async fn update(&mut self) -> Result<(), DeviceError> {
        let request = protocol::status_query(Local::now().naive_local())?;
        self.send(request).await
    }

    async fn set_mode(&mut self, mode: ThermostatMode) -> Result<(), DeviceError> {
        let request = match mode {
            ThermostatMode::Auto => protocol::mode_auto(),
            ThermostatMode::Manual => {
                let temp = self.status.target_temp.clamp(MIN_TEMP_C, MAX_TEMP_C);
                protocol::mode_manual(temp)?
            }
            ThermostatMode::Closed => protocol::mode_manual(OFF_TEMP_C)?,
            ThermostatMode::Open => protocol::mode_manual(ON_TEMP_C)?,
            ThermostatMode::Boost => protocol::boost(true),
            ThermostatMode::Away | ThermostatMode::Unknown => {
                return Err(DeviceError::UnsupportedMode(mode))
            }
        };
        self.send(request).await
    }

    async fn set_away(&mut self, until: NaiveDateTime, temp: f32) -> Result<(), DeviceError> {
        let request = protocol::away(until, temp)?;
        self.send(request).await
    }

    async fn set_target_temperature(&mut self, temp: f32) -> Result<(), DeviceError> {
        let request = protocol::target_temperature(temp)?;
        self.send(request).await
    }

    async fn disconnect(&mut self) {
        self.conn.disconnect().await;
    }

    fn target_temperature(&self) -> f32 {
        self.status.target_temp
    }

    fn comfort_temperature(&self) -> Option<f32> {
        self.status.comfort_temp()
    }

    fn eco_temperature(&self) -> Option<f32> {
        self.status.eco_temp()
    }
}

impl<C: Connection> fmt::Display for Thermostat<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        StatusLine {
            mac_address: self.conn.address(),
            status: &self.status,
        }
        .fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    const MAC: &str = "00:1A:22:0C:55:44";
    const AUTO_FRAME: [u8; 15] = [
        0x02, 0x01, 0x00, 0x10, 0x04, 42, 0, 0, 0, 0, 24, 3, 42, 34, 7,
    ];

    struct ScriptedConnection {
        replies: VecDeque<Result<Vec<u8>, DeviceError>>,
        requests: Vec<Vec<u8>>,
    }

    impl ScriptedConnection {
        fn new(replies: Vec<Result<Vec<u8>, DeviceError>>) -> Self {
            Self {
                replies: replies.into(),
                requests: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Connection for ScriptedConnection {
        fn address(&self) -> &str {
            MAC
        }

        async fn request(&mut self, request: &[u8]) -> Result<Vec<u8>, DeviceError> {
            self.requests.push(request.to_vec());
            self.replies
                .pop_front()
                .unwrap_or(Err(DeviceError::StreamClosed))
        }

        async fn disconnect(&mut self) {}
    }

    #[tokio::test]
    async fn update_refreshes_status() {
        let mut thermostat = Thermostat::new(ScriptedConnection::new(vec![Ok(AUTO_FRAME.to_vec())]));
        thermostat.update().await.unwrap();

        assert_eq!(thermostat.conn.requests[0][0], 0x03);
        assert_eq!(thermostat.target_temperature(), 21.0);
        assert_eq!(thermostat.comfort_temperature(), Some(21.0));
        assert_eq!(thermostat.eco_temperature(), Some(17.0));
        assert_eq!(
            thermostat.to_string(),
            "[00:1A:22:0C:55:44] Target 21.0 (mode: auto, away: no)"
        );
    }

    #[tokio::test]
    async fn writes_use_device_frames() {
        let mut thermostat = Thermostat::new(ScriptedConnection::new(vec![
            Ok(AUTO_FRAME.to_vec()),
            Ok(AUTO_FRAME.to_vec()),
        ]));
        thermostat.set_target_temperature(21.5).await.unwrap();
        thermostat.set_mode(ThermostatMode::Auto).await.unwrap();

        assert_eq!(
            thermostat.conn.requests,
            vec![vec![0x41, 43], vec![0x40, 0x00]]
        );
    }

    #[tokio::test]
    async fn manual_modes_encode_their_temperature() {
        let replies = (0..5).map(|_| Ok(AUTO_FRAME.to_vec())).collect();
        let mut thermostat = Thermostat::new(ScriptedConnection::new(replies));
        thermostat.update().await.unwrap();
        thermostat.set_mode(ThermostatMode::Manual).await.unwrap();
        thermostat.set_mode(ThermostatMode::Closed).await.unwrap();
        thermostat.set_mode(ThermostatMode::Open).await.unwrap();
        thermostat.set_mode(ThermostatMode::Boost).await.unwrap();

        assert_eq!(
            thermostat.conn.requests[1..],
            [
                vec![0x40, 0x40 | 42],
                vec![0x40, 0x40 | 9],
                vec![0x40, 0x40 | 60],
                vec![0x45, 0x01],
            ]
        );
    }

    #[tokio::test]
    async fn out_of_range_target_is_fatal_and_not_sent() {
        let mut thermostat = Thermostat::new(ScriptedConnection::new(vec![]));
        let err = thermostat.set_target_temperature(35.0).await.unwrap_err();

        assert!(matches!(
            err,
            DeviceError::Protocol(ProtocolError::TemperatureOutOfRange(_))
        ));
        assert!(!err.is_transient());
        assert!(thermostat.conn.requests.is_empty());
    }

    #[tokio::test]
    async fn away_mode_cannot_be_set_without_end_date() {
        let mut thermostat = Thermostat::new(ScriptedConnection::new(vec![]));
        let err = thermostat.set_mode(ThermostatMode::Away).await.unwrap_err();
        assert!(matches!(err, DeviceError::UnsupportedMode(ThermostatMode::Away)));
    }

    #[tokio::test]
    async fn garbled_reply_is_fatal() {
        let mut thermostat =
            Thermostat::new(ScriptedConnection::new(vec![Ok(vec![0x01, 0x02, 0x03])]));
        let err = thermostat.update().await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn link_errors_are_transient() {
        let timeout = DeviceError::Timeout {
            address: MAC.to_string(),
            timeout: Duration::from_secs(10),
        };
        assert!(timeout.is_transient());
        assert!(DeviceError::NotFound(MAC.to_string()).is_transient());
        assert!(DeviceError::Backend {
            action: "write",
            source: btleplug::Error::NotConnected,
        }
        .is_transient());
        assert!(!DeviceError::NoAdapter.is_transient());
        assert!(!DeviceError::MissingPresets.is_transient());
    }
}
