//! Cron expression and timezone validation.
//!
//! Validation is syntactic: field count and character classes. Semantic cron
//! interpretation belongs to the external scheduler, which is the single
//! source of truth for firing times.

use crate::error::{Error, Result};
use chrono_tz::Tz;

/// Accept standard five-field expressions and the six-field variant with a
/// leading seconds column.
const MIN_FIELDS: usize = 5;
const MAX_FIELDS: usize = 6;

/// Validate the syntax of a cron expression.
pub fn validate_cron(expression: &str) -> Result<()> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidCron("expression is empty".to_string()));
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() < MIN_FIELDS || fields.len() > MAX_FIELDS {
        return Err(Error::InvalidCron(format!(
            "expected {MIN_FIELDS} or {MAX_FIELDS} fields, got {} in '{trimmed}'",
            fields.len()
        )));
    }

    for field in fields {
        if !field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | ',' | '-' | '/' | '?'))
        {
            return Err(Error::InvalidCron(format!(
                "field '{field}' contains invalid characters"
            )));
        }
    }

    Ok(())
}

/// Validate an IANA timezone name.
pub fn validate_timezone(timezone: &str) -> Result<Tz> {
    timezone
        .parse::<Tz>()
        .map_err(|_| Error::InvalidTimezone(timezone.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_expressions() {
        validate_cron("0 2 * * *").unwrap();
        validate_cron("*/5 * * * *").unwrap();
        validate_cron("0 0 1,15 * MON-FRI").unwrap();
        validate_cron("0 0 2 * * ?").unwrap(); // six fields with seconds
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert!(matches!(validate_cron("* * *"), Err(Error::InvalidCron(_))));
        assert!(matches!(
            validate_cron("* * * * * * *"),
            Err(Error::InvalidCron(_))
        ));
        assert!(matches!(validate_cron(""), Err(Error::InvalidCron(_))));
    }

    #[test]
    fn test_rejects_invalid_characters() {
        assert!(matches!(
            validate_cron("0 2 * * $"),
            Err(Error::InvalidCron(_))
        ));
    }

    #[test]
    fn test_timezone_validation() {
        validate_timezone("Asia/Shanghai").unwrap();
        validate_timezone("UTC").unwrap();
        assert!(matches!(
            validate_timezone("Mars/Olympus"),
            Err(Error::InvalidTimezone(_))
        ));
    }
}
