// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Utility functions for parsing configuration values.

use crate::errors::DurationParseError;
use std::time::Duration;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;
// Longest duration a monotonic clock deadline can be armed with.
const MAX_NANOS: u128 = i64::MAX as u128;

/// Parses a duration string such as `"300ms"`, `"1.5h"` or `"2h45m"`.
///
/// A duration string is a sequence of decimal numbers, each with an optional fraction and a
/// mandatory unit suffix. Valid units are `ns`, `us` (or `µs`/`μs`), `ms`, `s`, `m` and `h`.
/// Only strictly positive durations are accepted; a leading `+` is allowed. Durations longer
/// than `i64::MAX` nanoseconds (about 292 years) are rejected as overflowing.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use webhook_batcher::util::parse_duration;
///
/// assert_eq!(parse_duration("300ms"), Ok(Duration::from_millis(300)));
/// assert_eq!(parse_duration("2h45m"), Ok(Duration::from_secs(9900)));
/// assert!(parse_duration("10").is_err());
/// assert!(parse_duration("0s").is_err());
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let mut rest = input.strip_prefix('+').unwrap_or(input);
    if input.is_empty() {
        return Err(DurationParseError::Empty);
    }
    if rest.starts_with('-') {
        return Err(DurationParseError::NotPositive(input.to_string()));
    }
    if rest.is_empty() {
        return Err(DurationParseError::Invalid(input.to_string()));
    }

    let overflow = || DurationParseError::Overflow(input.to_string());
    let mut total: u128 = 0;

    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, after_int) = rest.split_at(int_len);

        let (frac_part, after_number) = match after_int.strip_prefix('.') {
            Some(after_dot) => {
                let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
                after_dot.split_at(frac_len)
            }
            None => ("", after_int),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(DurationParseError::Invalid(input.to_string()));
        }

        let unit_len = after_number
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(after_number.len());
        let (unit, remaining) = after_number.split_at(unit_len);
        if unit.is_empty() {
            return Err(DurationParseError::MissingUnit(input.to_string()));
        }
        let scale = unit_scale(unit).ok_or_else(|| DurationParseError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        let whole = if int_part.is_empty() {
            0
        } else {
            int_part.parse::<u128>().map_err(|_| overflow())?
        };
        let mut nanos = whole.checked_mul(scale).ok_or_else(overflow)?;

        // Digits past nanosecond precision of the largest unit cannot contribute.
        let mut divisor: u128 = 1;
        let mut fraction: u128 = 0;
        for digit in frac_part.bytes().take(20) {
            fraction = fraction * 10 + u128::from(digit - b'0');
            divisor *= 10;
        }
        if fraction > 0 {
            nanos = nanos
                .checked_add(fraction * scale / divisor)
                .ok_or_else(overflow)?;
        }

        total = total
            .checked_add(nanos)
            .filter(|total| *total <= MAX_NANOS)
            .ok_or_else(overflow)?;
        rest = remaining;
    }

    if total == 0 {
        return Err(DurationParseError::NotPositive(input.to_string()));
    }
    let nanos = u64::try_from(total).map_err(|_| overflow())?;
    Ok(Duration::from_nanos(nanos))
}

fn unit_scale(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "\u{00b5}s" | "\u{03bc}s" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SECOND),
        "m" => Some(NANOS_PER_MINUTE),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplicate::duplicate_item;
    use proptest::prelude::*;

    #[duplicate_item(
        test_name                       input           expected;
        [test_parse_nanoseconds]        ["15ns"]        [Duration::from_nanos(15)];
        [test_parse_micro_ascii]        ["7us"]         [Duration::from_micros(7)];
        [test_parse_micro_sign]         ["7\u{00b5}s"]  [Duration::from_micros(7)];
        [test_parse_micro_greek]        ["7\u{03bc}s"]  [Duration::from_micros(7)];
        [test_parse_milliseconds]       ["300ms"]       [Duration::from_millis(300)];
        [test_parse_seconds]            ["5s"]          [Duration::from_secs(5)];
        [test_parse_minutes]            ["2m"]          [Duration::from_secs(120)];
        [test_parse_compound]           ["2h45m"]       [Duration::from_secs(2 * 3600 + 45 * 60)];
        [test_parse_fraction]           ["1.5h"]        [Duration::from_secs(5400)];
        [test_parse_leading_dot]        [".5s"]         [Duration::from_millis(500)];
        [test_parse_trailing_dot]       ["5.s"]         [Duration::from_secs(5)];
        [test_parse_plus_sign]          ["+10ms"]       [Duration::from_millis(10)];
        [test_parse_mixed_units]        ["1m30s250ms"]  [Duration::from_millis(90_250)];
    )]
    #[test]
    fn test_name() {
        assert_eq!(parse_duration(input), Ok(expected));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
        assert_eq!(
            parse_duration("10"),
            Err(DurationParseError::MissingUnit("10".to_string()))
        );
        assert_eq!(
            parse_duration("10d"),
            Err(DurationParseError::UnknownUnit {
                unit: "d".to_string(),
                input: "10d".to_string()
            })
        );
        assert_eq!(
            parse_duration("."),
            Err(DurationParseError::Invalid(".".to_string()))
        );
        assert_eq!(
            parse_duration("ms"),
            Err(DurationParseError::Invalid("ms".to_string()))
        );
        assert_eq!(
            parse_duration("+"),
            Err(DurationParseError::Invalid("+".to_string()))
        );
        assert_eq!(
            parse_duration("1s "),
            Err(DurationParseError::UnknownUnit {
                unit: "s ".to_string(),
                input: "1s ".to_string()
            })
        );
    }

    #[test]
    fn test_parse_rejects_non_positive() {
        assert_eq!(
            parse_duration("0s"),
            Err(DurationParseError::NotPositive("0s".to_string()))
        );
        assert_eq!(
            parse_duration("-5s"),
            Err(DurationParseError::NotPositive("-5s".to_string()))
        );
    }

    #[test]
    fn test_parse_overflow() {
        assert!(matches!(
            parse_duration("99999999999999999999999999999999999999999h"),
            Err(DurationParseError::Overflow(_))
        ));
        // Fits in a `Duration` but not in a clock deadline.
        assert_eq!(
            parse_duration("3000000000000000h"),
            Err(DurationParseError::Overflow("3000000000000000h".to_string()))
        );
        assert_eq!(
            parse_duration("2562047h47m16.854775807s"),
            Ok(Duration::from_nanos(i64::MAX as u64))
        );
        assert!(matches!(
            parse_duration("2562047h47m16.854775808s"),
            Err(DurationParseError::Overflow(_))
        ));
    }

    proptest! {
        #[test]
        fn test_parse_milliseconds_roundtrip(ms in 1u64..10_000_000) {
            prop_assert_eq!(parse_duration(&format!("{ms}ms")), Ok(Duration::from_millis(ms)));
        }

        #[test]
        fn test_parse_hours_minutes_is_sum(h in 0u64..1_000, m in 1u64..60) {
            prop_assert_eq!(
                parse_duration(&format!("{h}h{m}m")),
                Ok(Duration::from_secs(h * 3600 + m * 60))
            );
        }

        #[test]
        fn test_parse_never_panics(input in "\\PC{0,16}") {
            let _ = parse_duration(&input);
        }
    }
}
