use chrono::{Duration, NaiveDateTime};

use crate::types::format_temp;

/// Away mode needs an end date even when the stay is open-ended.
pub const AWAY_DURATION_DAYS: i64 = 12 * 7;

#[derive(Debug, Clone, PartialEq)]
pub enum CommandRequest {
    Away,
    Home,
    SetTemperature(f32),
    Invalid(String),
}

impl CommandRequest {
    /// Classifies a raw requested value. Total: anything unrecognised is `Invalid`.
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        match value {
            "away" => Self::Away,
            "home" => Self::Home,
            _ => match parse_plain_decimal(value) {
                Some(temp) => Self::SetTemperature(quantize(temp)),
                None => Self::Invalid(value.to_string()),
            },
        }
    }

    pub fn describe(&self, comfort_temp: Option<f32>, eco_temp: Option<f32>) -> String {
        match self {
            Self::Away => format!("away=> {}", format_optional_temp(eco_temp)),
            Self::Home => format!("home=> {}", format_optional_temp(comfort_temp)),
            Self::SetTemperature(temp) => format!("manual => value={}", format_temp(*temp)),
            Self::Invalid(raw) => format!("ERROR, value={raw}, unknown"),
        }
    }
}

/// Rounds to the nearest half degree, exact quarters away from zero.
///
/// Works on the parsed double; every half degree is exact in `f32`.
pub fn quantize(temp: f64) -> f32 {
    ((temp * 2.0).round() / 2.0) as f32
}

pub fn away_until(now: NaiveDateTime) -> NaiveDateTime {
    now + Duration::days(AWAY_DURATION_DAYS)
}

// Digits with at most one decimal point; no sign or exponent.
fn parse_plain_decimal(value: &str) -> Option<f64> {
    let mut digits = 0usize;
    let mut points = 0usize;
    for ch in value.chars() {
        match ch {
            '0'..='9' => digits += 1,
            '.' => points += 1,
            _ => return None,
        }
    }
    if digits == 0 || points > 1 {
        return None;
    }
    value.parse::<f64>().ok().filter(|temp| temp.is_finite())
}

fn format_optional_temp(temp: Option<f32>) -> String {
    temp.map(format_temp).unwrap_or_else(|| "unknown".to_string())
}
