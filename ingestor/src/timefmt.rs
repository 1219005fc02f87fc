use crate::errors::IngestError;
use chrono::{DateTime, FixedOffset};

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse an offset such as `+09:00`, `-0330` or `Z`.
pub fn parse_offset(value: &str) -> Option<FixedOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match *value.as_bytes().first()? {
        b'+' => (1, &value[1..]),
        b'-' => (-1, &value[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Render a unix timestamp as `YYYY-MM-DD HH:MM:SS` in the given fixed offset.
pub fn display_timestamp(unix_seconds: i64, offset: FixedOffset) -> Result<String, IngestError> {
    let utc = DateTime::from_timestamp(unix_seconds, 0)
        .ok_or(IngestError::InvalidTimestamp(unix_seconds))?;
    Ok(utc.with_timezone(&offset).format(DISPLAY_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_in_seoul_offset() {
        let seoul = parse_offset("+09:00").unwrap();
        assert_eq!(
            display_timestamp(1_700_000_000, seoul).unwrap(),
            "2023-11-15 07:13:20"
        );
    }

    #[test]
    fn test_display_in_utc() {
        let utc = parse_offset("Z").unwrap();
        assert_eq!(display_timestamp(1000, utc).unwrap(), "1970-01-01 00:16:40");
    }

    #[test]
    fn test_unrepresentable_timestamp() {
        let utc = parse_offset("UTC").unwrap();
        assert!(matches!(
            display_timestamp(i64::MAX, utc),
            Err(IngestError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_parse_offset_forms() {
        assert_eq!(parse_offset("-0330").unwrap().local_minus_utc(), -(3 * 3600 + 30 * 60));
        assert_eq!(parse_offset("+10:00").unwrap().local_minus_utc(), 36000);
        assert!(parse_offset("09:00").is_none());
        assert!(parse_offset("+9").is_none());
        assert!(parse_offset("+09:75").is_none());
    }
}
