//! Recurrence descriptors attached to recurring templates.

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

/// How often a template recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceType {
    /// Not recurring.
    #[default]
    None,
    /// Every N days.
    Daily,
    /// Every N weeks, optionally anchored to a weekday.
    Weekly,
    /// Every N months, optionally anchored to a day of month.
    Monthly,
    /// Every 3N months.
    Quarterly,
    /// Every N years on the base date's month and day.
    Yearly,
    /// Resolved from a cron expression.
    Custom,
}

impl RecurrenceType {
    /// Get the type as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured definition of how often and when a template recurs.
///
/// `next_processing_at` is the scheduler's commitment: it is only written
/// after the job backend accepted the matching registration, and it is
/// cleared whenever no further occurrence exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceDescriptor {
    pub recurrence_type: RecurrenceType,
    /// "Every N units". Zero is treated as one by the calculator.
    #[serde(default = "default_interval")]
    pub interval: u32,
    pub start_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Day of month (1-31) for monthly and quarterly recurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    /// Weekday anchor for weekly recurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<Weekday>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_processing_at: Option<DateTime<Utc>>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceDescriptor {
    /// Create a descriptor with interval 1 and no anchors.
    #[must_use]
    pub fn new(recurrence_type: RecurrenceType, start_date: DateTime<Utc>) -> Self {
        Self {
            recurrence_type,
            interval: 1,
            start_date,
            end_date: None,
            day_of_month: None,
            day_of_week: None,
            custom_expression: None,
            last_processed_at: None,
            next_processing_at: None,
        }
    }

    #[must_use]
    pub fn daily(start_date: DateTime<Utc>) -> Self {
        Self::new(RecurrenceType::Daily, start_date)
    }

    #[must_use]
    pub fn weekly(start_date: DateTime<Utc>) -> Self {
        Self::new(RecurrenceType::Weekly, start_date)
    }

    #[must_use]
    pub fn monthly(start_date: DateTime<Utc>) -> Self {
        Self::new(RecurrenceType::Monthly, start_date)
    }

    #[must_use]
    pub fn quarterly(start_date: DateTime<Utc>) -> Self {
        Self::new(RecurrenceType::Quarterly, start_date)
    }

    #[must_use]
    pub fn yearly(start_date: DateTime<Utc>) -> Self {
        Self::new(RecurrenceType::Yearly, start_date)
    }

    /// Create a custom descriptor driven by a cron expression.
    #[must_use]
    pub fn custom(start_date: DateTime<Utc>, expression: impl Into<String>) -> Self {
        Self {
            custom_expression: Some(expression.into()),
            ..Self::new(RecurrenceType::Custom, start_date)
        }
    }

    /// Set the interval.
    #[must_use]
    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    /// Set the end date.
    #[must_use]
    pub fn with_end_date(mut self, end_date: DateTime<Utc>) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// Anchor monthly/quarterly recurrence to a day of month.
    #[must_use]
    pub fn with_day_of_month(mut self, day: u32) -> Self {
        self.day_of_month = Some(day);
        self
    }

    /// Anchor weekly recurrence to a weekday.
    #[must_use]
    pub fn with_day_of_week(mut self, weekday: Weekday) -> Self {
        self.day_of_week = Some(weekday);
        self
    }

    /// Record that a firing was processed at `at`.
    #[must_use]
    pub fn with_last_processed_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_processed_at = Some(at);
        self
    }

    /// The date recurrence arithmetic is anchored on.
    #[must_use]
    pub fn base_date(&self) -> DateTime<Utc> {
        self.last_processed_at.unwrap_or(self.start_date)
    }

    /// Interval with zero treated as one.
    #[must_use]
    pub fn effective_interval(&self) -> u32 {
        self.interval.max(1)
    }

    /// Check whether the end date lies before the reference day.
    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_date
            .is_some_and(|end| end.date_naive() < now.date_naive())
    }

    /// Validate descriptor fields supplied by a caller.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.interval == 0 {
            return Err(DescriptorError::InvalidInterval);
        }
        if let Some(day) = self.day_of_month {
            if !(1..=31).contains(&day) {
                return Err(DescriptorError::InvalidDayOfMonth(day));
            }
        }
        if let Some(end) = self.end_date {
            if end.date_naive() < self.start_date.date_naive() {
                return Err(DescriptorError::EndBeforeStart {
                    start: self.start_date,
                    end,
                });
            }
        }
        if self.recurrence_type == RecurrenceType::Custom
            && self
                .custom_expression
                .as_deref()
                .map_or(true, |expr| expr.trim().is_empty())
        {
            return Err(DescriptorError::MissingExpression);
        }
        Ok(())
    }
}
