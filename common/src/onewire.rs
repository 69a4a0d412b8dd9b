use thiserror::Error;

/// DS18B20 family prefix in the 1-Wire devices directory.
pub const DS18B20_FAMILY_PREFIX: &str = "28";

#[derive(Debug, Error, PartialEq)]
pub enum W1ParseError {
    #[error("reading not ready (crc line does not end in YES)")]
    NotReady,
    #[error("temperature field missing")]
    MissingTemperature,
    #[error("invalid temperature field {0:?}")]
    InvalidTemperature(String),
}

/// Parses the two-line `w1_slave` file into degrees Celsius.
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub fn parse_w1_slave(contents: &str) -> Result<f32, W1ParseError> {
    let mut lines = contents.lines();
    let crc_line = lines.next().unwrap_or_default();
    if !crc_line.trim_end().ends_with("YES") {
        return Err(W1ParseError::NotReady);
    }

    let data_line = lines.next().ok_or(W1ParseError::MissingTemperature)?;
    let position = data_line
        .find("t=")
        .ok_or(W1ParseError::MissingTemperature)?;
    let raw = data_line[position + 2..].trim();
    let millidegrees = raw
        .parse::<i32>()
        .map_err(|_| W1ParseError::InvalidTemperature(raw.to_string()))?;
    Ok(millidegrees as f32 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ready_reading() {
        let contents = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        assert_eq!(parse_w1_slave(contents), Ok(23.125));
    }

    #[test]
    fn parses_negative_reading() {
        let contents = "5e ff 4b 46 7f ff 02 10 2d : crc=2d YES\n5e ff 4b 46 7f ff 02 10 2d t=-10125\n";
        assert_eq!(parse_w1_slave(contents), Ok(-10.125));
    }

    #[test]
    fn crc_failure_is_not_ready() {
        let contents = "72 01 4b 46 7f ff 0e 10 57 : crc=57 NO\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        assert_eq!(parse_w1_slave(contents), Err(W1ParseError::NotReady));
        assert_eq!(parse_w1_slave(""), Err(W1ParseError::NotReady));
    }

    #[test]
    fn missing_or_garbled_temperature() {
        assert_eq!(
            parse_w1_slave("crc=57 YES\n72 01 4b"),
            Err(W1ParseError::MissingTemperature)
        );
        assert_eq!(
            parse_w1_slave("crc=57 YES\nt=abc"),
            Err(W1ParseError::InvalidTemperature("abc".to_string()))
        );
    }
}
