//! Duration strings in configuration
//!
//! Timeouts are written the way etcd and the container tooling write them:
//! a sequence of decimal numbers with a unit suffix, e.g. `"30s"`,
//! `"1m30s"`, `"1.5h"` or `"250ms"`. A bare `"0"` is also accepted.

use std::time::Duration;

use crate::error::ConfigError;

/// Parse a duration string.
///
/// Returns a human readable reason on failure; use [`parse_field`] to get a
/// [`ConfigError`] naming the offending field.
pub fn parse(value: &str) -> Result<Duration, String> {
    let s = value.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        return Err("negative durations are not allowed".to_string());
    }
    let mut rest = s.strip_prefix('+').unwrap_or(s);
    let mut total = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("expected a number at {:?}", rest));
        }
        let number: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid number {:?}", &rest[..number_len]))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err("missing unit".to_string()),
            unit => return Err(format!("unknown unit {:?}", unit)),
        };
        rest = &rest[unit_len..];
        total += number * scale;
    }

    Duration::try_from_secs_f64(total).map_err(|e| e.to_string())
}

/// Parse the duration stored in `field`, reporting failures as configuration errors.
pub fn parse_field(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse(value).map_err(|reason| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
        reason,
    })
}
