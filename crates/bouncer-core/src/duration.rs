//! Parsing of decision durations.
//!
//! The decision source reports remaining ban time as a signed sequence of
//! decimal numbers with unit suffixes, e.g. `4h`, `3h59m44.513s`, `-2m`.
//! Accepted units: `ns`, `us` (`µs`, `μs`), `ms`, `s`, `m`, `h`.

use std::time::Duration;

use thiserror::Error;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Duration parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration {0:?} out of range")]
    Overflow(String),
}

/// A signed decision duration with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DecisionDuration {
    nanos: i128,
}

impl DecisionDuration {
    pub fn from_nanos(nanos: i128) -> Self {
        Self { nanos }
    }

    pub fn as_nanos(&self) -> i128 {
        self.nanos
    }

    /// Whole seconds, truncated toward zero.
    pub fn whole_seconds(&self) -> i64 {
        (self.nanos / NANOS_PER_SECOND) as i64
    }

    /// Cache TTL for this duration, or `None` when less than one second remains.
    pub fn ttl(&self) -> Option<Duration> {
        let secs = self.whole_seconds();
        (secs > 0).then(|| Duration::from_secs(secs as u64))
    }

    /// Cache TTL capped at `ceiling`.
    pub fn ttl_capped(&self, ceiling: Duration) -> Option<Duration> {
        self.ttl().map(|ttl| ttl.min(ceiling))
    }
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60_000_000_000,
        "h" => 3_600_000_000_000,
        _ => return None,
    })
}

/// Parses a decision duration string.
pub fn parse_decision_duration(input: &str) -> Result<DecisionDuration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(DecisionDuration::from_nanos(0));
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    // Magnitude limit matches a signed 64-bit nanosecond count.
    let limit: u128 = if negative {
        1u128 << 63
    } else {
        (1u128 << 63) - 1
    };
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let first = rest.as_bytes()[0];
        if !(first == b'.' || first.is_ascii_digit()) {
            return Err(invalid());
        }

        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let int_digits = &rest[..int_len];
        rest = &rest[int_len..];

        let mut frac_digits = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
            frac_digits = &after_dot[..frac_len];
            rest = &after_dot[frac_len..];
        }

        if int_digits.is_empty() && frac_digits.is_empty() {
            return Err(invalid());
        }

        let unit_len = rest
            .char_indices()
            .find(|(_, c)| *c == '.' || c.is_ascii_digit())
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(DurationError::MissingUnit(input.to_string()));
        }
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        let overflow = || DurationError::Overflow(input.to_string());

        let whole: u128 = if int_digits.is_empty() {
            0
        } else {
            int_digits.parse().map_err(|_| overflow())?
        };
        let mut value = whole.checked_mul(scale).ok_or_else(overflow)?;

        if !frac_digits.is_empty() {
            // Digits beyond nanosecond precision carry no information.
            let kept = &frac_digits[..frac_digits.len().min(18)];
            let numerator: u128 = kept.parse().map_err(|_| invalid())?;
            let denominator = 10u128.pow(kept.len() as u32);
            value = value
                .checked_add(numerator * scale / denominator)
                .ok_or_else(overflow)?;
        }

        total = total.checked_add(value).ok_or_else(overflow)?;
        if total > limit {
            return Err(overflow());
        }
    }

    let nanos = total as i128;
    Ok(DecisionDuration::from_nanos(if negative { -nanos } else { nanos }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(input: &str) -> i64 {
        parse_decision_duration(input).unwrap().whole_seconds()
    }

    #[test]
    fn parses_simple_units() {
        assert_eq!(secs("4h"), 4 * 3600);
        assert_eq!(secs("30m"), 1800);
        assert_eq!(secs("45s"), 45);
        assert_eq!(secs("0"), 0);
    }

    #[test]
    fn parses_compound_and_fractional() {
        assert_eq!(secs("3h59m44.513s"), 3 * 3600 + 59 * 60 + 44);
        assert_eq!(secs("1.5h"), 5400);
        assert_eq!(
            parse_decision_duration("1500ms").unwrap().as_nanos(),
            1_500_000_000
        );
        assert_eq!(parse_decision_duration("2µs").unwrap().as_nanos(), 2_000);
    }

    #[test]
    fn parses_negative_durations() {
        let d = parse_decision_duration("-2m30s").unwrap();
        assert_eq!(d.whole_seconds(), -150);
        assert!(d.ttl().is_none());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            parse_decision_duration(""),
            Err(DurationError::Invalid(_))
        ));
        assert!(matches!(
            parse_decision_duration("12"),
            Err(DurationError::MissingUnit(_))
        ));
        assert!(matches!(
            parse_decision_duration("3d"),
            Err(DurationError::UnknownUnit { .. })
        ));
        assert!(parse_decision_duration("h").is_err());
        assert!(parse_decision_duration(".s").is_err());
    }

    #[test]
    fn rejects_overflow() {
        assert!(matches!(
            parse_decision_duration("9999999999999h"),
            Err(DurationError::Overflow(_))
        ));
    }

    #[test]
    fn ttl_is_capped_by_ceiling() {
        let d = parse_decision_duration("4h").unwrap();
        assert_eq!(
            d.ttl_capped(Duration::from_secs(60)),
            Some(Duration::from_secs(60))
        );
        let short = parse_decision_duration("10s").unwrap();
        assert_eq!(
            short.ttl_capped(Duration::from_secs(60)),
            Some(Duration::from_secs(10))
        );
        assert_eq!(parse_decision_duration("500ms").unwrap().ttl(), None);
    }
}
