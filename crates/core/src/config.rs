//! Environment-variable parsing helpers.
//!
//! Each binary builds its configuration structs from the process
//! environment. These helpers keep the "default if unset, error if
//! malformed" rule in one place so every variable reports its own name
//! when it fails to parse.

use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;

const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Read `name` from the environment, falling back to `default` when unset.
///
/// A variable that is set but cannot be parsed is an error, not a silent
/// fallback.
pub fn env_or<T>(name: &str, default: T) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

/// Read an optional variable; empty strings count as unset.
pub fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a string variable with a default.
pub fn env_string(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

/// Read a boolean flag. Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn env_flag(name: &str, default: bool) -> Result<bool, CoreError> {
    match env_opt(name) {
        Some(raw) => parse_flag(name, &raw),
        None => Ok(default),
    }
}

/// Read a whole number of seconds as a [`Duration`].
pub fn env_secs(name: &str, default_secs: u64) -> Result<Duration, CoreError> {
    env_or(name, default_secs).map(Duration::from_secs)
}

/// Read a whole number of milliseconds as a [`Duration`].
pub fn env_millis(name: &str, default_ms: u64) -> Result<Duration, CoreError> {
    env_or(name, default_ms).map(Duration::from_millis)
}

/// Read a size given in GiB (fractions allowed) and return it in bytes.
pub fn env_gigabytes(name: &str, default_gb: f64) -> Result<u64, CoreError> {
    let gb: f64 = env_or(name, default_gb)?;
    if !gb.is_finite() || gb < 0.0 {
        return Err(CoreError::Config(format!(
            "{name} must be a non-negative number of GB, got {gb}"
        )));
    }
    Ok(gigabytes_to_bytes(gb))
}

/// Convert GiB to bytes, truncating any fractional byte.
pub fn gigabytes_to_bytes(gb: f64) -> u64 {
    (gb * BYTES_PER_GB as f64) as u64
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| CoreError::Config(format!("{name} has invalid value '{raw}': {e}")))
}

fn parse_flag(name: &str, raw: &str) -> Result<bool, CoreError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CoreError::Config(format!(
            "{name} must be a boolean (true/false), got '{raw}'"
        ))),
    }
}
