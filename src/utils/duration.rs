// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Duration parsing for timeouts
//!
//! Timeouts in pipeline files and on the command line are written as a bare
//! number of seconds or with an `ms`/`s`/`m`/`h` suffix.

use std::time::Duration;

use crate::errors::StagehandError;

/// Parse a human-written duration like `90`, `90s`, `5m`, `1h`
pub fn parse(value: &str) -> Result<Duration, StagehandError> {
    let v = value.trim();

    let invalid = || StagehandError::InvalidDuration {
        value: value.to_string(),
    };

    let (number, unit_ms) = if let Some(n) = v.strip_suffix("ms") {
        (n, 1u64)
    } else if let Some(n) = v.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = v.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = v.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (v, 1_000)
    };

    let number: u64 = number.trim().parse().map_err(|_| invalid())?;

    Ok(Duration::from_millis(number * unit_ms))
}

/// Render a duration in the shortest exact suffixed form
pub fn format(duration: &Duration) -> String {
    let ms = duration.as_millis();

    if ms % 3_600_000 == 0 && ms > 0 {
        format!("{}h", ms / 3_600_000)
    } else if ms % 60_000 == 0 && ms > 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{}ms", ms)
    }
}

/// Serde adapter for `Option<Duration>` fields written as duration strings
pub mod serde_opt {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_str(&format(d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| parse(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Serde adapter serializing a `Duration` as fractional seconds
pub mod serde_secs {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_seconds() {
        assert_eq!(parse("90").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_suffixed() {
        assert_eq!(parse("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("fast").is_err());
        assert!(parse("1.5s").is_err());
        assert!(parse("-3s").is_err());
    }

    #[test]
    fn test_format_round_trips() {
        for value in ["90s", "5m", "1h", "250ms"] {
            let parsed = parse(value).unwrap();
            assert_eq!(format(&parsed), value);
            assert_eq!(parse(&format(&parsed)).unwrap(), parsed);
        }
    }

    #[test]
    fn test_format_normalizes() {
        assert_eq!(format(&parse("60s").unwrap()), "1m");
        assert_eq!(format(&parse("300").unwrap()), "5m");
    }
}
