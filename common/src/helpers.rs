use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{0:?} is not a number followed by an optional unit")]
    Malformed(String),
    #[error("unknown unit {unit:?} in {input:?}")]
    UnknownUnit { input: String, unit: String },
    #[error("{0:?} is too large")]
    Overflow(String),
    #[error("{0:?} must be longer than zero")]
    Zero(String),
}

fn split_unit(input: &str) -> Result<(u64, String), ParseError> {
    let trimmed = input.trim();
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return Err(ParseError::Malformed(input.to_string()));
    }
    let (number, unit) = trimmed.split_at(digits);
    let number = number
        .parse::<u64>()
        .map_err(|_| ParseError::Overflow(input.to_string()))?;
    Ok((number, unit.trim().to_ascii_lowercase()))
}

/// Parses sizes such as `30MB` or `512kb` into bytes. Multiples are binary.
pub fn parse_size(input: &str) -> Result<u64, ParseError> {
    let (number, unit) = split_unit(input)?;
    let multiplier: u64 = match unit.as_str() {
        "" | "b" => 1,
        "kb" => 1024,
        "mb" => 1024 * 1024,
        "gb" => 1024 * 1024 * 1024,
        _ => {
            return Err(ParseError::UnknownUnit {
                input: input.to_string(),
                unit,
            })
        }
    };
    number
        .checked_mul(multiplier)
        .ok_or_else(|| ParseError::Overflow(input.to_string()))
}

/// Parses durations such as `10s` or `15m`. A bare number is milliseconds.
pub fn parse_duration(input: &str) -> Result<Duration, ParseError> {
    let (number, unit) = split_unit(input)?;
    let seconds = |factor: u64| {
        number
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| ParseError::Overflow(input.to_string()))
    };
    match unit.as_str() {
        "" | "ms" => Ok(Duration::from_millis(number)),
        "s" => seconds(1),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        "d" => seconds(24 * 60 * 60),
        _ => Err(ParseError::UnknownUnit {
            input: input.to_string(),
            unit,
        }),
    }
}

/// Like [`parse_duration`], for intervals and timeouts that must not be zero.
pub fn parse_period(input: &str) -> Result<Duration, ParseError> {
    match parse_duration(input)? {
        d if d.is_zero() => Err(ParseError::Zero(input.to_string())),
        d => Ok(d),
    }
}
