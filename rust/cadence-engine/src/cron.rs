//! Cron expression evaluation for custom recurrence.
//!
//! Accepts the standard 5-field format (`minute hour day month weekday`) as
//! well as the 6/7-field format with seconds and year understood by the
//! `cron` crate.

use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Resolves the next firing of a cron expression.
pub trait CronEvaluator: Send + Sync {
    /// Next matching instant strictly after `after`, or `None` if the
    /// expression is invalid or never matches again.
    fn next_from_expression(&self, expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>>;
}

/// Evaluator backed by the `cron` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCronEvaluator;

impl StandardCronEvaluator {
    /// Parse an expression, returning the parse error message on failure.
    pub fn parse(expr: &str) -> Result<cron::Schedule, String> {
        cron::Schedule::from_str(&normalize_expression(expr)).map_err(|e| e.to_string())
    }
}

impl CronEvaluator for StandardCronEvaluator {
    fn next_from_expression(&self, expr: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let schedule = Self::parse(expr).ok()?;
        schedule.after(&after).next()
    }
}

/// 5-field (min hour dom month dow) -> 7-field (sec min hour dom month dow year).
fn normalize_expression(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed} *")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_five_fields() {
        assert_eq!(normalize_expression("0 9 * * *"), "0 0 9 * * * *");
        assert_eq!(normalize_expression("0 0 9 * * * *"), "0 0 9 * * * *");
    }

    #[test]
    fn test_daily_at_nine() {
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 10, 0, 0).unwrap();
        let next = StandardCronEvaluator
            .next_from_expression("0 9 * * *", after)
            .unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_expression() {
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 10, 0, 0).unwrap();
        assert!(StandardCronEvaluator
            .next_from_expression("not a cron", after)
            .is_none());
        assert!(StandardCronEvaluator::parse("61 * * * *").is_err());
    }
}
