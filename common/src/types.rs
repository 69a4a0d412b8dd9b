use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub const MIN_TEMP_C: f32 = 5.0;
pub const MAX_TEMP_C: f32 = 29.5;
pub const OFF_TEMP_C: f32 = 4.5;
pub const ON_TEMP_C: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThermostatMode {
    Closed,
    Open,
    Auto,
    Manual,
    Away,
    Boost,
    Unknown,
}

impl ThermostatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
            Self::Away => "AWAY",
            Self::Boost => "BOOST",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// Raw mode byte of a status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeFlags(pub u8);

impl ModeFlags {
    pub const MANUAL: u8 = 0x01;
    pub const AWAY: u8 = 0x02;
    pub const BOOST: u8 = 0x04;
    pub const DST: u8 = 0x08;
    pub const WINDOW: u8 = 0x10;
    pub const LOCKED: u8 = 0x20;
    pub const LOW_BATTERY: u8 = 0x80;

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Presets {
    pub window_open_temp: f32,
    pub window_open_minutes: u16,
    pub comfort_temp: f32,
    pub eco_temp: f32,
    pub offset: f32,
}

/// Last status frame reported by the thermostat.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub flags: ModeFlags,
    pub valve_percent: u8,
    pub target_temp: f32,
    pub away_end: Option<NaiveDateTime>,
    pub presets: Option<Presets>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            flags: ModeFlags(0),
            valve_percent: 0,
            target_temp: 0.0,
            away_end: None,
            presets: None,
        }
    }
}

impl DeviceStatus {
    pub fn mode(&self) -> ThermostatMode {
        if self.flags.contains(ModeFlags::BOOST) {
            ThermostatMode::Boost
        } else if self.flags.contains(ModeFlags::AWAY) {
            ThermostatMode::Away
        } else if self.flags.contains(ModeFlags::MANUAL) {
            if self.target_temp <= OFF_TEMP_C {
                ThermostatMode::Closed
            } else if self.target_temp >= ON_TEMP_C {
                ThermostatMode::Open
            } else {
                ThermostatMode::Manual
            }
        } else {
            ThermostatMode::Auto
        }
    }

    pub fn mode_readable(&self) -> String {
        let mut readable = if self.flags.contains(ModeFlags::MANUAL) {
            if self.target_temp < MIN_TEMP_C {
                "manual off".to_string()
            } else if self.target_temp >= MAX_TEMP_C {
                "manual on".to_string()
            } else {
                format!("manual ({}C)", format_temp(self.target_temp))
            }
        } else {
            "auto".to_string()
        };

        let suffixes = [
            (ModeFlags::AWAY, " holiday"),
            (ModeFlags::BOOST, " boost"),
            (ModeFlags::DST, " dst"),
            (ModeFlags::WINDOW, " window"),
            (ModeFlags::LOCKED, " locked"),
            (ModeFlags::LOW_BATTERY, " low battery"),
        ];
        for (flag, suffix) in suffixes {
            if self.flags.contains(flag) {
                readable.push_str(suffix);
            }
        }
        readable
    }

    pub fn comfort_temp(&self) -> Option<f32> {
        self.presets.map(|presets| presets.comfort_temp)
    }

    pub fn eco_temp(&self) -> Option<f32> {
        self.presets.map(|presets| presets.eco_temp)
    }
}

/// Renders a half-degree temperature with one decimal (`17.0`, `21.5`).
pub fn format_temp(temp: f32) -> String {
    format!("{temp:.1}")
}

/// `[mac] Target 21.5 (mode: auto, away: no)`
pub struct StatusLine<'a> {
    pub mac_address: &'a str,
    pub status: &'a DeviceStatus,
}

impl fmt::Display for StatusLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] Target {} (mode: {}, away: ",
            self.mac_address,
            format_temp(self.status.target_temp),
            self.status.mode_readable()
        )?;
        match self.status.away_end {
            Some(end) => write!(f, "end: {})", end.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "no)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;

    fn status(flags: u8, target_temp: f32) -> DeviceStatus {
        DeviceStatus {
            flags: ModeFlags(flags),
            target_temp,
            ..DeviceStatus::default()
        }
    }

    #[test]
    fn manual_mode_distinguishes_closed_and_open() {
        assert_eq!(status(ModeFlags::MANUAL, 4.5).mode(), ThermostatMode::Closed);
        assert_eq!(status(ModeFlags::MANUAL, 30.0).mode(), ThermostatMode::Open);
        assert_eq!(status(ModeFlags::MANUAL, 21.0).mode(), ThermostatMode::Manual);
        assert_eq!(status(0, 21.0).mode(), ThermostatMode::Auto);
    }

    #[test]
    fn boost_and_away_take_precedence() {
        let flags = ModeFlags::MANUAL | ModeFlags::AWAY;
        assert_eq!(status(flags, 17.0).mode(), ThermostatMode::Away);
        assert_eq!(
            status(flags | ModeFlags::BOOST, 17.0).mode(),
            ThermostatMode::Boost
        );
    }

    #[test]
    fn readable_mode_lists_active_flags() {
        let readable =
            status(ModeFlags::MANUAL | ModeFlags::AWAY | ModeFlags::LOW_BATTERY, 17.0)
                .mode_readable();
        assert_eq!(readable, "manual (17.0C) holiday low battery");
        assert_eq!(status(ModeFlags::MANUAL, 4.5).mode_readable(), "manual off");
        assert_eq!(status(ModeFlags::DST, 20.0).mode_readable(), "auto dst");
    }

    #[test]
    fn status_line_matches_operator_format() {
        let mut current = status(0, 21.5);
        let line = StatusLine {
            mac_address: "00:1A:22:0C:55:44",
            status: &current,
        }
        .to_string();
        assert_eq!(line, "[00:1A:22:0C:55:44] Target 21.5 (mode: auto, away: no)");

        current.flags = ModeFlags(ModeFlags::MANUAL | ModeFlags::AWAY);
        current.target_temp = 17.0;
        current.away_end = NaiveDate::from_ymd_opt(2027, 1, 8)
            .and_then(|date| date.and_hms_opt(14, 30, 0));
        let line = StatusLine {
            mac_address: "00:1A:22:0C:55:44",
            status: &current,
        }
        .to_string();
        assert_eq!(
            line,
            "[00:1A:22:0C:55:44] Target 17.0 (mode: manual (17.0C) holiday, away: end: 2027-01-08 14:30:00)"
        );
    }
}
