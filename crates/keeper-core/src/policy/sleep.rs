//! Sleep guard: vetoes shell commands that wait too long.
//!
//! A long `sleep` leaves the agent idle, so the guard denies any command
//! whose first `sleep <count>[s|m|h]` exceeds the limit. This is a pattern
//! match over free text, not a shell parser: `sleep $((60))`, `sleep 1.5m`
//! and aliases slip through, and the match is not anchored to a word
//! boundary. Counts may use any Unicode decimal digits (`sleep ２０`).

use std::sync::LazyLock;

use regex::Regex;

use super::{ActionRequest, PolicyDecision, PolicyRule};

/// Longest sleep allowed, in seconds.
pub const DEFAULT_MAX_SLEEP_SECS: u64 = 15;

static SLEEP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"sleep\s+(\d+)([smh]?)").expect("sleep pattern is a valid regex")
});

static DECIMAL_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d$").expect("digit pattern is a valid regex"));

fn is_decimal_digit(c: char) -> bool {
    let mut buf = [0u8; 4];
    DECIMAL_DIGIT.is_match(c.encode_utf8(&mut buf))
}

/// Value of a Unicode decimal digit.
///
/// Decimal digits come in contiguous runs from zero to nine, so a digit's
/// value is its distance from the start of its run.
fn digit_value(c: char) -> Option<u64> {
    if let Some(d) = c.to_digit(10) {
        return Some(u64::from(d));
    }
    if !is_decimal_digit(c) {
        return None;
    }
    let mut run = 0u64;
    let mut code = c as u32;
    while let Some(prev) = code.checked_sub(1).and_then(char::from_u32) {
        if !is_decimal_digit(prev) {
            break;
        }
        run += 1;
        code -= 1;
    }
    Some(run % 10)
}

/// Parse a run of decimal digits, saturating at `u64::MAX`.
fn parse_count(digits: &str) -> u64 {
    digits
        .chars()
        .filter_map(digit_value)
        .fold(0u64, |acc, d| acc.saturating_mul(10).saturating_add(d))
}

/// Unit suffix of a sleep count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Seconds,
    Minutes,
    Hours,
}

impl DurationUnit {
    /// `""` and `"s"` are seconds, `"m"` minutes, `"h"` hours.
    fn from_suffix(suffix: &str) -> Self {
        match suffix {
            "m" => Self::Minutes,
            "h" => Self::Hours,
            _ => Self::Seconds,
        }
    }

    pub fn seconds_per_unit(self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3600,
        }
    }
}

/// A sleep found in a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepRequest {
    pub count: u64,
    pub unit: DurationUnit,
}

impl SleepRequest {
    /// Duration normalized to seconds, saturating at `u64::MAX`.
    pub fn seconds(&self) -> u64 {
        self.count.saturating_mul(self.unit.seconds_per_unit())
    }
}

/// Find the leftmost sleep in `command`.
///
/// Counts too large for a `u64` saturate, which always exceeds the limit.
pub fn find_sleep(command: &str) -> Option<SleepRequest> {
    let caps = SLEEP_PATTERN.captures(command)?;
    let count = parse_count(&caps[1]);
    let unit = DurationUnit::from_suffix(caps.get(2).map_or("", |m| m.as_str()));
    Some(SleepRequest { count, unit })
}

/// Denies shell commands sleeping longer than `max_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepGuard {
    max_secs: u64,
}

impl SleepGuard {
    pub fn with_limit(max_secs: u64) -> Self {
        Self { max_secs }
    }

    pub fn max_secs(&self) -> u64 {
        self.max_secs
    }

    /// Decide on a raw command line.
    pub fn check_command(&self, command: &str) -> PolicyDecision {
        match find_sleep(command) {
            Some(sleep) if sleep.seconds() > self.max_secs => PolicyDecision::deny(format!(
                "HOOK BLOCKED: Sleep {}s exceeds {}s limit! \
                 Use shorter sleeps and stay active. Command: {command}",
                sleep.seconds(),
                self.max_secs,
            )),
            _ => PolicyDecision::Allow,
        }
    }
}

impl Default for SleepGuard {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_SLEEP_SECS)
    }
}

impl PolicyRule for SleepGuard {
    fn name(&self) -> &str {
        "sleep-limit"
    }

    fn evaluate(&self, request: &ActionRequest) -> PolicyDecision {
        if !request.is_shell_command() {
            return PolicyDecision::Allow;
        }
        self.check_command(request.command())
    }
}
