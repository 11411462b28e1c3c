//! Utility functions for minicluster

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h", "7d")
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = match s.strip_suffix("ms") {
        Some(num) => (num, "ms"),
        None => s.split_at(s.len() - s.chars().last().map_or(0, char::len_utf8)),
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let seconds_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    num.checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| crate::Error::InvalidConfig(format!("duration out of range: {}", s)))
}

/// Whole milliseconds in `d`, failing when they do not fit a `u64`
pub fn duration_millis(d: Duration) -> crate::Result<u64> {
    u64::try_from(d.as_millis())
        .map_err(|_| crate::Error::InvalidConfig(format!("duration out of range: {:?}", d)))
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Hostname this process advertises when none is configured
pub fn local_hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Format a millisecond timestamp for humans
pub fn format_timestamp_millis(millis: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604800));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        let huge = format!("{}d", u64::MAX / 86400 + 1);
        assert!(matches!(
            parse_duration(&huge),
            Err(crate::Error::InvalidConfig(_))
        ));
        assert!(parse_duration(&format!("{}s", u64::MAX)).is_ok());
        assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
        assert_eq!(
            parse_duration(&format!("{}d", u64::MAX / 86400)).unwrap(),
            Duration::from_secs(u64::MAX / 86400 * 86400)
        );
    }

    #[test]
    fn test_duration_millis() {
        assert_eq!(duration_millis(Duration::from_secs(2)).unwrap(), 2000);
        assert!(matches!(
            duration_millis(Duration::from_secs(u64::MAX)),
            Err(crate::Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_local_hostname_not_blank() {
        assert!(!local_hostname().trim().is_empty());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp_millis(0), "1970-01-01 00:00:00.000 UTC");
    }

    #[test]
    fn test_timestamp_is_recent() {
        // 2020-01-01
        assert!(timestamp_now_millis() > 1_577_836_800_000);
    }
}
