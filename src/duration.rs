//! ISO-8601 durations of the `PnDTnHnMn.nS` form, as accepted on the command
//! line and rendered in log lines.
//!
//! Parsing follows the day-time subset of ISO-8601: an optional sign, the
//! `P` designator, an optional day component, and an optional `T` section
//! with hours, minutes and (fractional) seconds, in that order. Components
//! may carry their own sign; a day is exactly 24 hours. Letters are
//! case-insensitive and `,` is accepted as the decimal separator. The
//! resulting duration must not be negative.

use crate::error::ChurnError;
use std::time::{Duration, Instant};

const NANOS_PER_SECOND: i128 = 1_000_000_000;
const NANOS_PER_MINUTE: i128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: i128 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: i128 = 24 * NANOS_PER_HOUR;
const MAX_FRACTION_DIGITS: usize = 9;
/// Stand-in for "never" when a deadline cannot be represented.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

pub fn parse_iso8601(input: &str) -> Result<Duration, ChurnError> {
    let upper = input.to_ascii_uppercase();
    let mut rest = upper.as_str();
    let negate = match rest.as_bytes().first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };
    let rest = rest
        .strip_prefix('P')
        .ok_or_else(|| ChurnError::malformed_duration(input, "expected leading 'P'"))?;

    let (date_part, time_part) = match rest.split_once('T') {
        Some((_, "")) => {
            return Err(ChurnError::malformed_duration(
                input,
                "'T' must be followed by at least one time component",
            ));
        }
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut total: i128 = 0;
    let mut components = 0usize;

    if !date_part.is_empty() {
        let amount = date_part.strip_suffix('D').ok_or_else(|| {
            ChurnError::malformed_duration(input, "only a day component may precede 'T'")
        })?;
        total += parse_whole(input, amount)? * NANOS_PER_DAY;
        components += 1;
    }

    if let Some(mut time) = time_part {
        for (designator, scale) in [('H', NANOS_PER_HOUR), ('M', NANOS_PER_MINUTE)] {
            if let Some(idx) = time.find(designator) {
                total += parse_whole(input, &time[..idx])? * scale;
                time = &time[idx + 1..];
                components += 1;
            }
        }
        if !time.is_empty() {
            let amount = time.strip_suffix('S').ok_or_else(|| {
                ChurnError::malformed_duration(input, format!("unexpected trailing '{time}'"))
            })?;
            total += parse_seconds(input, amount)?;
            components += 1;
        }
    }

    if components == 0 {
        return Err(ChurnError::malformed_duration(
            input,
            "at least one component is required",
        ));
    }
    if negate {
        total = -total;
    }
    if total < 0 {
        return Err(ChurnError::malformed_duration(
            input,
            "negative durations are not supported",
        ));
    }

    let secs = u64::try_from(total / NANOS_PER_SECOND)
        .map_err(|_| ChurnError::malformed_duration(input, "duration is too large"))?;
    let nanos = (total % NANOS_PER_SECOND) as u32;
    Ok(Duration::new(secs, nanos))
}

fn parse_whole(input: &str, amount: &str) -> Result<i128, ChurnError> {
    amount
        .parse::<i64>()
        .map(i128::from)
        .map_err(|_| ChurnError::malformed_duration(input, format!("invalid number '{amount}'")))
}

fn parse_seconds(input: &str, amount: &str) -> Result<i128, ChurnError> {
    let Some(split_at) = amount.find(['.', ',']) else {
        return Ok(parse_whole(input, amount)? * NANOS_PER_SECOND);
    };
    let (whole, fraction) = (&amount[..split_at], &amount[split_at + 1..]);
    if fraction.len() > MAX_FRACTION_DIGITS || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChurnError::malformed_duration(
            input,
            format!("invalid fractional seconds '{fraction}'"),
        ));
    }
    let whole_nanos = parse_whole(input, whole)? * NANOS_PER_SECOND;
    let mut fraction_nanos: i128 = 0;
    for (idx, digit) in fraction.bytes().enumerate() {
        fraction_nanos += i128::from(digit - b'0') * 10i128.pow((8 - idx) as u32);
    }
    if whole.starts_with('-') {
        Ok(whole_nanos - fraction_nanos)
    } else {
        Ok(whole_nanos + fraction_nanos)
    }
}

/// `start + duration`, clamped to a far-future instant when the sum does not
/// fit the platform clock.
pub fn deadline_after(start: Instant, duration: Duration) -> Instant {
    start
        .checked_add(duration)
        .or_else(|| start.checked_add(FAR_FUTURE))
        .unwrap_or(start)
}

/// Renders `duration` as `PT#H#M#.#S`, omitting zero components; the zero
/// duration renders as `PT0S`.
pub fn format_iso8601(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let nanos = duration.subsec_nanos();
    if total_secs == 0 && nanos == 0 {
        return "PT0S".to_string();
    }
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    if seconds > 0 || nanos > 0 {
        out.push_str(&seconds.to_string());
        if nanos > 0 {
            let fraction = format!("{nanos:09}");
            out.push('.');
            out.push_str(fraction.trim_end_matches('0'));
        }
        out.push('S');
    }
    out
}
