//! Normalization of human-friendly memory and time expressions.
//!
//! Memory is normalized to whole megabytes (decimal units, so `1g` is 1000 MB).
//! Durations are normalized to `HH:MM:SS`, with hours allowed to exceed 24.

use std::fmt;

use logos::Logos;

use crate::error::{SchedError, SchedResult};

/// An amount of memory as it will be requested from the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Memory {
    /// A parsed amount, in megabytes.
    Megabytes(u64),
    /// Text that could not be parsed, passed through for the scheduler to judge.
    Verbatim(String),
}

impl Memory {
    /// The amount in megabytes, when it could be parsed.
    pub fn megabytes(&self) -> Option<u64> {
        match self {
            Memory::Megabytes(mb) => Some(*mb),
            Memory::Verbatim(_) => None,
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Memory::Megabytes(mb) => write!(f, "{mb}"),
            Memory::Verbatim(text) => f.write_str(text),
        }
    }
}

/// Normalize a memory expression such as `4g`, `512mb` or `4096k` to megabytes.
///
/// Accepts digits with an optional unit in `k`, `m`, `g` or `t` (any case),
/// optionally followed by `b`. No unit means megabytes. Anything else is
/// returned unchanged as [`Memory::Verbatim`].
pub fn normalize_memory(text: &str) -> Memory {
    match parse_memory(text) {
        Some(mb) => Memory::Megabytes(mb),
        None => {
            tracing::warn!("Could not parse memory amount {text:?}; passing it through");
            Memory::Verbatim(text.to_string())
        }
    }
}

fn parse_memory(text: &str) -> Option<u64> {
    let digits_end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    if digits_end == 0 {
        return None;
    }
    let amount: u64 = text[..digits_end].parse().ok()?;
    let suffix = text[digits_end..].to_ascii_lowercase();

    let unit = match suffix.as_str() {
        "" => 'm',
        s => {
            let mut chars = s.chars();
            let unit = chars.next()?;
            match chars.as_str() {
                "" | "b" => unit,
                _ => return None,
            }
        }
    };

    match unit {
        'k' => Some(amount / 1000),
        'm' => Some(amount),
        'g' => amount.checked_mul(1000),
        't' => amount.checked_mul(1_000_000),
        _ => None,
    }
}

/// Components of a parsed duration. Each part may be fractional.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeParts {
    pub days: f64,
    pub hours: f64,
    pub minutes: f64,
    pub seconds: f64,
}

impl TimeParts {
    /// Total length in seconds.
    pub fn total_seconds(&self) -> f64 {
        self.days * 86_400.0 + self.hours * 3_600.0 + self.minutes * 60.0 + self.seconds
    }

    /// Render as `HH:MM:SS`, rounding any fractional second up.
    pub fn to_time_string(&self) -> String {
        // Snap to microseconds first so float noise (1.99h) doesn't add a second.
        let total = ((self.total_seconds() * 1e6).round() / 1e6).ceil() as u64;
        let hours = total / 3_600;
        let minutes = (total % 3_600) / 60;
        let seconds = total % 60;
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

/// Normalize a duration to `HH:MM:SS`.
///
/// Two grammars are accepted:
///
/// - delimited: `[[days-]hours:]minutes[:seconds]`, where days may also be
///   separated by a colon (`2:10:20:50`);
/// - unit-suffixed: numbers followed by `d`, `h`, `m` or `s` in any order,
///   repeated units summing (`1d12h`, `90m 30s`). A number closing the text
///   with no unit counts as seconds.
pub fn normalize_time(text: &str) -> SchedResult<String> {
    Ok(parse_time(text)?.to_time_string())
}

/// Parse a duration into its components without normalizing.
pub fn parse_time(text: &str) -> SchedResult<TimeParts> {
    let parts = match parse_delimited(text) {
        Some(parts) => parts,
        None => parse_unit_suffixed(text)?,
    };

    if parts.total_seconds() <= 0.0 {
        return Err(SchedError::Value(format!(
            "Could not parse a positive time value from {text:?}"
        )));
    }

    Ok(parts)
}

fn parse_unit_suffixed(text: &str) -> SchedResult<TimeParts> {
    let mut lexer = TimeToken::lexer(text);
    let mut parts = TimeParts::default();
    let mut saw_unit = false;

    while let Some(token) = lexer.next() {
        let slice = lexer.slice();
        let value = |s: &str| s[..s.len() - 1].parse::<f64>().unwrap_or(0.0);
        match token {
            Ok(TimeToken::Days) => {
                parts.days += value(slice);
                saw_unit = true;
            }
            Ok(TimeToken::Hours) => {
                parts.hours += value(slice);
                saw_unit = true;
            }
            Ok(TimeToken::Minutes) => {
                parts.minutes += value(slice);
                saw_unit = true;
            }
            Ok(TimeToken::Seconds) => {
                parts.seconds += value(slice);
                saw_unit = true;
            }
            Ok(TimeToken::Bare) => {
                if lexer.span().end == text.len() {
                    parts.seconds += slice.parse::<f64>().unwrap_or(0.0);
                }
            }
            Err(()) => {}
        }
    }

    if !saw_unit {
        return Err(SchedError::TimeSyntax(format!(
            "Could not find a time in {text:?}"
        )));
    }

    Ok(parts)
}

/// Tokens of the unit-suffixed duration grammar.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
enum TimeToken {
    #[regex(r"[0-9]+(\.[0-9]+)?d")]
    Days,

    #[regex(r"[0-9]+(\.[0-9]+)?h")]
    Hours,

    #[regex(r"[0-9]+(\.[0-9]+)?m")]
    Minutes,

    #[regex(r"[0-9]+(\.[0-9]+)?s")]
    Seconds,

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Bare,
}

/// The delimited grammar. A `days-` prefix needs at least `hours:minutes`
/// after it. Without one, days and hours are only recognized when every
/// smaller field is present.
fn parse_delimited(text: &str) -> Option<TimeParts> {
    if let Some((days, rest)) = text.split_once('-') {
        let fields: Vec<&str> = rest.split(':').collect();
        let (hours, minutes, seconds) = match fields.as_slice() {
            [hours, minutes] => (number(hours)?, number(minutes)?, 0.0),
            [hours, minutes, seconds] => (number(hours)?, number(minutes)?, number(seconds)?),
            _ => return None,
        };
        return Some(TimeParts {
            days: optional_number(days)?,
            hours,
            minutes,
            seconds,
        });
    }

    let fields: Vec<&str> = text.split(':').collect();
    match fields.as_slice() {
        [minutes] => Some(TimeParts {
            minutes: number(minutes)?,
            ..TimeParts::default()
        }),
        [minutes, seconds] => Some(TimeParts {
            minutes: number(minutes)?,
            seconds: number(seconds)?,
            ..TimeParts::default()
        }),
        [hours, minutes, seconds] => Some(TimeParts {
            days: 0.0,
            hours: optional_number(hours)?,
            minutes: number(minutes)?,
            seconds: number(seconds)?,
        }),
        [days, hours, minutes, seconds] => Some(TimeParts {
            days: optional_number(days)?,
            hours: number(hours)?,
            minutes: number(minutes)?,
            seconds: number(seconds)?,
        }),
        _ => None,
    }
}

/// A non-negative decimal number: digits with an optional fractional part.
fn number(field: &str) -> Option<f64> {
    let (whole, fraction) = match field.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (field, None),
    };
    let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !digits(whole) || fraction.is_some_and(|f| !digits(f)) {
        return None;
    }
    field.parse().ok()
}

fn optional_number(field: &str) -> Option<f64> {
    if field.is_empty() {
        Some(0.0)
    } else {
        number(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_parsing() {
        let checks = [
            ("4096k", 4),
            ("128", 128),
            ("128m", 128),
            ("4g", 4000),
            ("4gB", 4000),
            ("4gb", 4000),
            ("1t", 1_000_000),
            ("1Tb", 1_000_000),
            ("1TB", 1_000_000),
        ];
        for (original, expected) in checks {
            assert_eq!(
                normalize_memory(original),
                Memory::Megabytes(expected),
                "{original}"
            );
        }
    }

    #[test]
    fn test_memory_passthrough() {
        assert_eq!(
            normalize_memory("lots"),
            Memory::Verbatim("lots".to_string())
        );
        assert_eq!(
            normalize_memory("4 gb"),
            Memory::Verbatim("4 gb".to_string())
        );
        assert_eq!(normalize_memory("4gbb").megabytes(), None);
        assert_eq!(normalize_memory("").to_string(), "");
    }

    #[test]
    fn test_good_times() {
        let checks = [
            (":15:00", "00:15:00"),
            ("00:15:00", "00:15:00"),
            (":15:00:00", "15:00:00"),
            ("0:15:00:00", "15:00:00"),
            ("15:00:00", "15:00:00"),
            ("1d", "24:00:00"),
            ("1d12h", "36:00:00"),
            ("1d25h30m", "49:30:00"),
            ("1d25h90m45s", "50:30:45"),
            ("10", "00:10:00"),
            ("10:20", "00:10:20"),
            ("10:20:50", "10:20:50"),
            ("10:20:50.5", "10:20:51"),
            ("2-10:20:50.5", "58:20:51"),
            ("2-10:20", "58:20:00"),
            ("2:10:20:50.5", "58:20:51"),
            ("1d2d24h24h30s30s15", "120:01:15"),
        ];
        for (original, expected) in checks {
            assert_eq!(normalize_time(original).unwrap(), expected, "{original}");
        }
    }

    #[test]
    fn test_bad_times() {
        for bad in ["15:00:00:00:00", "15:00:", "", "2-10"] {
            assert!(
                matches!(normalize_time(bad), Err(SchedError::TimeSyntax(_))),
                "{bad:?} should be a syntax error"
            );
        }
    }

    #[test]
    fn test_zero_time_is_value_error() {
        assert!(matches!(normalize_time("0h"), Err(SchedError::Value(_))));
        assert!(matches!(normalize_time("0d0m"), Err(SchedError::Value(_))));
        assert!(matches!(normalize_time("00:00"), Err(SchedError::Value(_))));
    }

    #[test]
    fn test_time_idempotent_on_canonical_output() {
        for original in ["1d25h90m45s", "2-10:20:50.5", ":15:00", "10"] {
            let once = normalize_time(original).unwrap();
            assert_eq!(normalize_time(&once).unwrap(), once);
        }
    }

    #[test]
    fn test_time_parts() {
        let parts = parse_time("2-01:02:03").unwrap();
        assert_eq!(parts.days, 2.0);
        assert_eq!(parts.hours, 1.0);
        assert_eq!(parts.minutes, 2.0);
        assert_eq!(parts.seconds, 3.0);
    }
}
