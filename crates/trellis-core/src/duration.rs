//! Parsing of human-readable timeout strings (`"5s"`, `"2m"`, `"1h"`, `"3d"`)

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

use crate::error::EngineError;

/// Default wait applied to user tasks that do not specify a timeout
pub const DEFAULT_USER_TASK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default bound on a single activity invocation
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

static TIMEOUT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)([smhd])$").unwrap());

/// Parse a timeout string into a [`Duration`].
///
/// Accepts an integer followed by one unit suffix: seconds, minutes, hours
/// or days. Anything else fails with [`EngineError::InvalidTimeoutFormat`];
/// the caller decides whether to substitute a default or propagate.
pub fn parse_timeout(input: &str) -> Result<Duration, EngineError> {
    let captures = TIMEOUT_RE
        .captures(input)
        .ok_or_else(|| EngineError::InvalidTimeoutFormat(input.to_string()))?;

    let amount: u64 = captures[1]
        .parse()
        .map_err(|_| EngineError::InvalidTimeoutFormat(input.to_string()))?;

    let millis = match &captures[2] {
        "s" => amount.saturating_mul(1_000),
        "m" => amount.saturating_mul(60 * 1_000),
        "h" => amount.saturating_mul(60 * 60 * 1_000),
        "d" => amount.saturating_mul(24 * 60 * 60 * 1_000),
        _ => unreachable!("unit constrained by regex"),
    };

    Ok(Duration::from_millis(millis))
}
