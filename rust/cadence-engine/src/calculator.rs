//! Next-occurrence calculation for recurrence descriptors.
//!
//! The calculator is pure: the only notion of time it sees is the `now`
//! passed in, so identical inputs always produce identical answers and it can
//! be shared across threads without synchronization.
//!
//! Rules, all evaluated against the base date (`last_processed_at`, falling
//! back to `start_date`):
//!
//! - an end date before `now` (date-only) ends recurrence;
//! - a base date still in the future is returned unchanged;
//! - results keep the base date's time of day and never land after the end
//!   date.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc, Weekday};
use tracing::warn;

use crate::cron::{CronEvaluator, StandardCronEvaluator};
use crate::model::{RecurrenceDescriptor, RecurrenceType};

/// Computes when a recurring template fires next.
#[derive(Clone)]
pub struct RecurrenceCalculator {
    cron: Option<Arc<dyn CronEvaluator>>,
}

impl RecurrenceCalculator {
    /// Calculator with the standard cron evaluator for custom recurrence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cron: Some(Arc::new(StandardCronEvaluator)),
        }
    }

    /// Calculator using the given evaluator for custom recurrence.
    #[must_use]
    pub fn with_cron_evaluator(evaluator: Arc<dyn CronEvaluator>) -> Self {
        Self {
            cron: Some(evaluator),
        }
    }

    /// Calculator without custom expression support. Custom descriptors
    /// always pause.
    #[must_use]
    pub fn without_cron() -> Self {
        Self { cron: None }
    }

    /// Next occurrence for `descriptor` as seen at `now`, or `None` when no
    /// further occurrence exists.
    pub fn next_occurrence(
        &self,
        descriptor: &RecurrenceDescriptor,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if descriptor.recurrence_type == RecurrenceType::None || descriptor.has_ended(now) {
            return None;
        }

        let base = descriptor.base_date();
        if base > now {
            return within_end_date(descriptor, base);
        }

        let interval = descriptor.effective_interval();
        let next = match descriptor.recurrence_type {
            RecurrenceType::None => None,
            RecurrenceType::Daily => next_daily(base, now, interval),
            RecurrenceType::Weekly => next_weekly(base, now, interval, descriptor.day_of_week),
            RecurrenceType::Monthly => {
                next_monthly(base, now, i64::from(interval), descriptor.day_of_month)
            }
            RecurrenceType::Quarterly => {
                next_monthly(base, now, i64::from(interval) * 3, descriptor.day_of_month)
            }
            RecurrenceType::Yearly => next_yearly(base, now, interval),
            RecurrenceType::Custom => self.next_custom(descriptor, now),
        }?;

        within_end_date(descriptor, next)
    }

    /// Up to `count` successive occurrences starting from `now`.
    ///
    /// Each step treats the previous result as processed, which is exactly
    /// what the scheduler does after every firing.
    pub fn preview(
        &self,
        descriptor: &RecurrenceDescriptor,
        now: DateTime<Utc>,
        count: usize,
    ) -> Vec<DateTime<Utc>> {
        let mut descriptor = descriptor.clone();
        let mut cursor = now;
        let mut occurrences = Vec::with_capacity(count);

        while occurrences.len() < count {
            let Some(next) = self.next_occurrence(&descriptor, cursor) else {
                break;
            };
            occurrences.push(next);
            descriptor.last_processed_at = Some(next);
            cursor = next;
        }

        occurrences
    }

    fn next_custom(
        &self,
        descriptor: &RecurrenceDescriptor,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let Some(expression) = descriptor
            .custom_expression
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
        else {
            warn!("Custom recurrence has no expression, recurrence paused");
            return None;
        };

        let Some(evaluator) = &self.cron else {
            warn!(
                expression = %expression,
                "No cron evaluator configured, custom recurrence paused"
            );
            return None;
        };

        let next = evaluator.next_from_expression(expression, now);
        if next.is_none() {
            warn!(
                expression = %expression,
                "Unparseable custom recurrence expression, recurrence paused"
            );
        }
        next
    }
}

impl Default for RecurrenceCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecurrenceCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecurrenceCalculator")
            .field("cron", &self.cron.is_some())
            .finish()
    }
}

/// Number of days in the given month, or `None` for an invalid year/month.
#[must_use]
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (next_year, next_month) = if month == 12 {
        (year.checked_add(1)?, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?;
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?
        .pred_opt()
        .map(|last| last.day())
}

fn within_end_date(
    descriptor: &RecurrenceDescriptor,
    next: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match descriptor.end_date {
        Some(end) if next.date_naive() > end.date_naive() => None,
        _ => Some(next),
    }
}

fn at_time_of(base: DateTime<Utc>, date: NaiveDate) -> DateTime<Utc> {
    date.and_time(base.time()).and_utc()
}

fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(u64::try_from(days).ok()?))
}

/// Smallest positive multiple of `interval` days after the base date that is
/// on or after today.
fn next_daily(base: DateTime<Utc>, now: DateTime<Utc>, interval: u32) -> Option<DateTime<Utc>> {
    let step = i64::from(interval);
    let base_date = base.date_naive();
    let elapsed = now.date_naive().signed_duration_since(base_date).num_days();
    let cycles = ((elapsed + step - 1) / step).max(1);
    let date = add_days(base_date, cycles.checked_mul(step)?)?;
    Some(at_time_of(base, date))
}

fn week_start(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
}

/// Next `weekday` on or after today whose week is a whole number of
/// `interval`-week cycles from the base date's week. Today itself is pushed a
/// full cycle forward.
fn next_weekly(
    base: DateTime<Utc>,
    now: DateTime<Utc>,
    interval: u32,
    day_of_week: Option<Weekday>,
) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    let weekday = day_of_week.unwrap_or_else(|| base.weekday());
    let ahead = (i64::from(weekday.num_days_from_monday())
        - i64::from(today.weekday().num_days_from_monday()))
    .rem_euclid(7);
    let mut candidate = add_days(today, ahead)?;

    let step_weeks = i64::from(interval);
    let weeks_apart = week_start(candidate)?
        .signed_duration_since(week_start(base.date_naive())?)
        .num_days()
        / 7;
    let misalignment = weeks_apart.rem_euclid(step_weeks);
    if misalignment != 0 {
        candidate = add_days(candidate, (step_weeks - misalignment) * 7)?;
    }
    if candidate == today {
        candidate = add_days(candidate, step_weeks * 7)?;
    }

    Some(at_time_of(base, candidate))
}

fn month_index(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 12 + i64::from(date.month0())
}

/// Date in the month `index` (year * 12 + month0) with `day` clamped to the
/// month's length.
fn clamped_date(index: i64, day: u32) -> Option<NaiveDate> {
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
    let day = day.min(days_in_month(year, month)?);
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Month stepping shared by monthly and quarterly recurrence. The result is
/// strictly after the base date and on or after today.
fn next_monthly(
    base: DateTime<Utc>,
    now: DateTime<Utc>,
    step_months: i64,
    day_of_month: Option<u32>,
) -> Option<DateTime<Utc>> {
    let base_date = base.date_naive();
    let today = now.date_naive();
    let target_day = day_of_month.unwrap_or_else(|| base_date.day()).clamp(1, 31);
    let base_index = month_index(base_date);

    let mut cycles = ((month_index(today) - base_index) / step_months).max(0);
    for _ in 0..3 {
        let index = base_index.checked_add(cycles.checked_mul(step_months)?)?;
        let date = clamped_date(index, target_day)?;
        if date > base_date && date >= today {
            return Some(at_time_of(base, date));
        }
        cycles += 1;
    }
    None
}

/// Base date's month and day, `interval` years at a time. Feb 29 becomes
/// Feb 28 in non-leap years.
fn next_yearly(base: DateTime<Utc>, now: DateTime<Utc>, interval: u32) -> Option<DateTime<Utc>> {
    let base_date = base.date_naive();
    let today = now.date_naive();
    let step = i32::try_from(interval).ok()?;

    let mut cycles = ((today.year() - base_date.year()) / step).max(1);
    for _ in 0..3 {
        let year = base_date.year().checked_add(cycles.checked_mul(step)?)?;
        let day = base_date.day().min(days_in_month(year, base_date.month())?);
        let date = NaiveDate::from_ymd_opt(year, base_date.month(), day)?;
        if date >= today {
            return Some(at_time_of(base, date));
        }
        cycles += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2025, 2), Some(28));
        assert_eq!(days_in_month(2025, 4), Some(30));
        assert_eq!(days_in_month(2025, 12), Some(31));
        assert_eq!(days_in_month(2025, 13), None);
    }

    #[test]
    fn test_none_type_never_fires() {
        let descriptor = RecurrenceDescriptor::new(RecurrenceType::None, at(2024, 1, 1));
        assert!(RecurrenceCalculator::new()
            .next_occurrence(&descriptor, at(2024, 1, 1))
            .is_none());
    }

    #[test]
    fn test_future_start_returned_unchanged() {
        let descriptor = RecurrenceDescriptor::monthly(at(2024, 6, 15)).with_day_of_month(1);
        assert_eq!(
            RecurrenceCalculator::new().next_occurrence(&descriptor, at(2024, 1, 1)),
            Some(at(2024, 6, 15))
        );
    }

    #[test]
    fn test_daily_interval_catches_up() {
        let descriptor = RecurrenceDescriptor::daily(at(2024, 1, 1)).with_interval(3);
        // Jan 1 + 3k >= Jan 11 -> Jan 13
        assert_eq!(
            RecurrenceCalculator::new().next_occurrence(&descriptor, at(2024, 1, 11)),
            Some(at(2024, 1, 13))
        );
    }

    #[test]
    fn test_daily_after_processing_moves_forward() {
        let descriptor =
            RecurrenceDescriptor::daily(at(2024, 1, 1)).with_last_processed_at(at(2024, 1, 5));
        assert_eq!(
            RecurrenceCalculator::new().next_occurrence(&descriptor, at(2024, 1, 5)),
            Some(at(2024, 1, 6))
        );
    }

    #[test]
    fn test_weekly_without_anchor_keeps_weekday() {
        // 2024-01-03 is a Wednesday
        let descriptor = RecurrenceDescriptor::weekly(at(2024, 1, 3));
        let next = RecurrenceCalculator::new()
            .next_occurrence(&descriptor, at(2024, 1, 5))
            .unwrap();
        assert_eq!(next, at(2024, 1, 10));
        assert_eq!(next.weekday(), Weekday::Wed);
    }

    #[test]
    fn test_monthly_end_of_month_clamps() {
        let descriptor = RecurrenceDescriptor::monthly(at(2025, 1, 31))
            .with_day_of_month(31)
            .with_last_processed_at(at(2025, 3, 31));
        assert_eq!(
            RecurrenceCalculator::new().next_occurrence(&descriptor, at(2025, 3, 31)),
            Some(at(2025, 4, 30))
        );
    }

    #[test]
    fn test_monthly_same_month_anchor_later_day() {
        let descriptor = RecurrenceDescriptor::monthly(at(2024, 1, 5)).with_day_of_month(20);
        assert_eq!(
            RecurrenceCalculator::new().next_occurrence(&descriptor, at(2024, 1, 10)),
            Some(at(2024, 1, 20))
        );
    }

    #[test]
    fn test_quarterly_steps_three_months() {
        let descriptor = RecurrenceDescriptor::quarterly(at(2024, 1, 15))
            .with_last_processed_at(at(2024, 1, 15));
        assert_eq!(
            RecurrenceCalculator::new().next_occurrence(&descriptor, at(2024, 1, 15)),
            Some(at(2024, 4, 15))
        );
    }

    #[test]
    fn test_result_after_end_date_is_none() {
        let descriptor = RecurrenceDescriptor::monthly(at(2024, 1, 15))
            .with_end_date(at(2024, 2, 10))
            .with_last_processed_at(at(2024, 1, 15));
        assert!(RecurrenceCalculator::new()
            .next_occurrence(&descriptor, at(2024, 1, 20))
            .is_none());
    }

    #[test]
    fn test_custom_without_evaluator_pauses() {
        let descriptor = RecurrenceDescriptor::custom(at(2024, 1, 1), "0 9 * * *");
        assert!(RecurrenceCalculator::without_cron()
            .next_occurrence(&descriptor, at(2024, 1, 2))
            .is_none());
    }

    #[test]
    fn test_preview_is_strictly_increasing() {
        let descriptor = RecurrenceDescriptor::weekly(at(2024, 1, 1))
            .with_interval(2)
            .with_day_of_week(Weekday::Mon);
        let occurrences = RecurrenceCalculator::new().preview(&descriptor, at(2024, 1, 1), 3);
        assert_eq!(occurrences, vec![at(2024, 1, 15), at(2024, 1, 29), at(2024, 2, 12)]);
    }
}
