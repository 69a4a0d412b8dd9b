//! eQ-3 radiator thermostat GATT frames.
//!
//! Requests are written to [`WRITE_CHARACTERISTIC`]; the device answers every request with
//! one notification on [`NOTIFY_CHARACTERISTIC`] carrying a status frame.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

use crate::types::{DeviceStatus, ModeFlags, Presets, OFF_TEMP_C, ON_TEMP_C};

pub const WRITE_CHARACTERISTIC: u128 = 0x3fa4585a_ce4a_3bad_db4b_b8df8179ea09;
pub const NOTIFY_CHARACTERISTIC: u128 = 0xd0e8434d_cd29_0996_af41_6c90f4e0eb2a;

const PROP_INFO_QUERY: u8 = 0x03;
const PROP_INFO_RETURN: u8 = 0x02;
const PROP_MODE_WRITE: u8 = 0x40;
const PROP_TEMPERATURE_WRITE: u8 = 0x41;
const PROP_BOOST: u8 = 0x45;

const MODE_AUTO: u8 = 0x00;
const MODE_MANUAL: u8 = 0x40;
const MODE_AWAY: u8 = 0x80;

const STATUS_LEN: usize = 6;
const AWAY_LEN: usize = 10;
const PRESETS_LEN: usize = 15;

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("status frame too short ({0} bytes)")]
    TooShort(usize),
    #[error("unexpected frame header {0:#04x} {1:#04x}")]
    UnexpectedHeader(u8, u8),
    #[error("temperature {0} outside supported range 4.5-30.0")]
    TemperatureOutOfRange(f32),
    #[error("invalid away end date in status frame")]
    InvalidAwayDate,
    #[error("year {0} cannot be encoded")]
    YearOutOfRange(i32),
}

/// Status query; also sets the device clock to `now`.
pub fn status_query(now: NaiveDateTime) -> Result<Vec<u8>, ProtocolError> {
    Ok(vec![
        PROP_INFO_QUERY,
        encode_year(now.year())?,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    ])
}

pub fn mode_auto() -> Vec<u8> {
    vec![PROP_MODE_WRITE, MODE_AUTO]
}

/// Manual mode holding `temp`.
pub fn mode_manual(temp: f32) -> Result<Vec<u8>, ProtocolError> {
    Ok(vec![PROP_MODE_WRITE, MODE_MANUAL | encode_temp(temp)?])
}

pub fn boost(enabled: bool) -> Vec<u8> {
    vec![PROP_BOOST, u8::from(enabled)]
}

pub fn target_temperature(temp: f32) -> Result<Vec<u8>, ProtocolError> {
    Ok(vec![PROP_TEMPERATURE_WRITE, encode_temp(temp)?])
}

/// Manual mode at `temp` until `until`, rounded down to the half hour.
pub fn away(until: NaiveDateTime, temp: f32) -> Result<Vec<u8>, ProtocolError> {
    let half_hours = until.hour() as u8 * 2 + u8::from(until.minute() >= 30);
    Ok(vec![
        PROP_MODE_WRITE,
        MODE_AWAY | encode_temp(temp)?,
        until.day() as u8,
        encode_year(until.year())?,
        half_hours,
        until.month() as u8,
    ])
}

pub fn parse_status(frame: &[u8]) -> Result<DeviceStatus, ProtocolError> {
    if frame.len() < STATUS_LEN {
        return Err(ProtocolError::TooShort(frame.len()));
    }
    if frame[0] != PROP_INFO_RETURN || frame[1] != 0x01 {
        return Err(ProtocolError::UnexpectedHeader(frame[0], frame[1]));
    }

    let flags = ModeFlags(frame[2]);
    let away_end = if flags.contains(ModeFlags::AWAY) && frame.len() >= AWAY_LEN {
        Some(decode_away(&frame[6..AWAY_LEN])?)
    } else {
        None
    };

    let presets = (frame.len() >= PRESETS_LEN).then(|| Presets {
        window_open_temp: decode_temp(frame[10]),
        window_open_minutes: u16::from(frame[11]) * 5,
        comfort_temp: decode_temp(frame[12]),
        eco_temp: decode_temp(frame[13]),
        offset: (f32::from(frame[14]) - 7.0) / 2.0,
    });

    Ok(DeviceStatus {
        flags,
        valve_percent: frame[3],
        target_temp: decode_temp(frame[5]),
        away_end,
        presets,
    })
}

fn encode_temp(temp: f32) -> Result<u8, ProtocolError> {
    if !temp.is_finite() || !(OFF_TEMP_C..=ON_TEMP_C).contains(&temp) {
        return Err(ProtocolError::TemperatureOutOfRange(temp));
    }
    Ok((temp * 2.0).round() as u8)
}

fn decode_temp(raw: u8) -> f32 {
    f32::from(raw) / 2.0
}

fn encode_year(year: i32) -> Result<u8, ProtocolError> {
    u8::try_from(year - 2000).map_err(|_| ProtocolError::YearOutOfRange(year))
}

fn decode_away(raw: &[u8]) -> Result<NaiveDateTime, ProtocolError> {
    let (day, year, half_hours, month) = (raw[0], raw[1], raw[2], raw[3]);
    let minute = if half_hours % 2 == 1 { 30 } else { 0 };
    NaiveDate::from_ymd_opt(2000 + i32::from(year), u32::from(month), u32::from(day))
        .and_then(|date| date.and_hms_opt(u32::from(half_hours / 2), minute, 0))
        .ok_or(ProtocolError::InvalidAwayDate)
}
