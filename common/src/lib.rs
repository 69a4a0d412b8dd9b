pub mod command;
pub mod config;
pub mod markup;
pub mod onewire;
pub mod protocol;
pub mod retry;
pub mod store;
pub mod topics;
pub mod types;

pub use command::{away_until, quantize, CommandRequest};
pub use config::{
    AppConfig, BluetoothConfig, ConfigError, HttpConfig, RoomSensorConfig, TelegramConfig,
};
pub use markup::{escape, escape_str};
pub use retry::{
    AttemptOutcome, RecoveryAction, RetryAttempt, RetryConfig, RetryPolicy, RetryState,
};
pub use topics::*;
pub use types::{format_temp, DeviceStatus, ModeFlags, Presets, StatusLine, ThermostatMode};
