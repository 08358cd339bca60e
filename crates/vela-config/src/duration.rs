//! Go-style duration strings (`500ms`, `5s`, `1m30s`, `2h`).

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DurationError {
  #[error("empty duration")]
  Empty,

  #[error("invalid duration '{input}': {message}")]
  Invalid { input: String, message: String },
}

/// Parse a duration made of `<number><unit>` segments with units `ms`, `s`, `m`, `h`.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
  let trimmed = input.trim();
  if trimmed.is_empty() {
    return Err(DurationError::Empty);
  }

  let invalid = |message: &str| DurationError::Invalid {
    input: input.to_string(),
    message: message.to_string(),
  };

  let mut total = Duration::ZERO;
  let mut rest = trimmed;
  while !rest.is_empty() {
    let digits = rest
      .find(|c: char| !c.is_ascii_digit() && c != '.')
      .ok_or_else(|| invalid("missing unit"))?;
    if digits == 0 {
      return Err(invalid("expected a number"));
    }
    let value: f64 = rest[..digits]
      .parse()
      .map_err(|_| invalid("malformed number"))?;
    rest = &rest[digits..];

    let unit_len = rest
      .find(|c: char| c.is_ascii_digit() || c == '.')
      .unwrap_or(rest.len());
    let millis_per_unit = match &rest[..unit_len] {
      "ms" => 1.0,
      "s" => 1_000.0,
      "m" => 60_000.0,
      "h" => 3_600_000.0,
      other => return Err(invalid(&format!("unknown unit '{}'", other))),
    };
    rest = &rest[unit_len..];

    total += Duration::from_millis((value * millis_per_unit).round() as u64);
  }

  Ok(total)
}
