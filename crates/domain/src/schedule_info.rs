use chrono::{DateTime, NaiveDate, TimeDelta, Utc, Weekday};
use serde::{Deserialize, Serialize};
use warden_core::{AppError, AppResult};

use crate::duration::IsoDuration;

/// Truncates an instant to whole minutes; the engine stores minute-precision UTC.
#[must_use]
pub fn truncate_to_minute(value: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = value.timestamp();
    DateTime::from_timestamp(seconds - seconds.rem_euclid(60), 0).unwrap_or(value)
}

/// Adds `delta` to `instant`, saturating at the latest representable instant.
#[must_use]
pub fn add_clamped(instant: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    instant
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Latest instant a schedule may start or end at.
fn latest_instant() -> DateTime<Utc> {
    DateTime::from_timestamp(LATEST_INSTANT_SECONDS, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// 9999-12-31T23:59:59Z
const LATEST_INSTANT_SECONDS: i64 = 253_402_300_799;

/// How a schedule ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpirationType {
    /// Open-ended.
    NoExpiration,
    /// Ends at `endDateTime`.
    AfterDateTime,
    /// Ends `duration` after the start.
    AfterDuration,
}

/// Expiration pattern of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expiration {
    /// Expiration kind.
    #[serde(rename = "type")]
    pub expiration_type: ExpirationType,
    /// End instant for `afterDateTime`.
    #[serde(default)]
    pub end_date_time: Option<DateTime<Utc>>,
    /// Length for `afterDuration`.
    #[serde(default)]
    pub duration: Option<IsoDuration>,
}

impl Expiration {
    /// Open-ended expiration.
    #[must_use]
    pub fn never() -> Self {
        Self {
            expiration_type: ExpirationType::NoExpiration,
            end_date_time: None,
            duration: None,
        }
    }

    /// Expiration at a fixed instant.
    #[must_use]
    pub fn at(end_date_time: DateTime<Utc>) -> Self {
        Self {
            expiration_type: ExpirationType::AfterDateTime,
            end_date_time: Some(end_date_time),
            duration: None,
        }
    }

    /// Expiration a fixed duration after the start.
    #[must_use]
    pub fn after(duration: IsoDuration) -> Self {
        Self {
            expiration_type: ExpirationType::AfterDuration,
            end_date_time: None,
            duration: Some(duration),
        }
    }
}

/// Day of week used by weekly recurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DayOfWeek {
    /// Sunday; the first day of a recurrence week.
    Sunday,
    /// Monday.
    Monday,
    /// Tuesday.
    Tuesday,
    /// Wednesday.
    Wednesday,
    /// Thursday.
    Thursday,
    /// Friday.
    Friday,
    /// Saturday.
    Saturday,
}

impl DayOfWeek {
    /// Days since the start of a Sunday-first week.
    #[must_use]
    pub fn offset_from_sunday(&self) -> u32 {
        match self {
            Self::Sunday => 0,
            Self::Monday => 1,
            Self::Tuesday => 2,
            Self::Wednesday => 3,
            Self::Thursday => 4,
            Self::Friday => 5,
            Self::Saturday => 6,
        }
    }

    /// Maps a chrono weekday.
    #[must_use]
    pub fn from_weekday(value: Weekday) -> Self {
        match value {
            Weekday::Sun => Self::Sunday,
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
        }
    }
}

/// Recurrence pattern kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecurrencePatternType {
    /// Every `interval` days.
    Daily,
    /// On `daysOfWeek` every `interval` weeks.
    Weekly,
    /// On `dayOfMonth` every `interval` months.
    AbsoluteMonthly,
    /// On `month`/`dayOfMonth` every `interval` years.
    AbsoluteYearly,
}

/// When occurrences repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrencePattern {
    /// Pattern kind.
    #[serde(rename = "type")]
    pub pattern_type: RecurrencePatternType,
    /// Number of units between occurrences.
    pub interval: u32,
    /// Days of week for weekly patterns.
    #[serde(default)]
    pub days_of_week: Vec<DayOfWeek>,
    /// Day of month for monthly and yearly patterns; clamped to the last valid day.
    #[serde(default)]
    pub day_of_month: Option<u32>,
    /// Month for yearly patterns.
    #[serde(default)]
    pub month: Option<u32>,
}

/// Recurrence range kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecurrenceRangeType {
    /// Repeats until the schedule expires.
    NoEnd,
    /// Repeats until `endDate` (inclusive).
    EndDate,
    /// Repeats `numberOfOccurrences` times.
    Numbered,
}

/// How long occurrences keep repeating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceRange {
    /// Range kind.
    #[serde(rename = "type")]
    pub range_type: RecurrenceRangeType,
    /// Last day with an occurrence for `endDate`.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Occurrence count for `numbered`.
    #[serde(default)]
    pub number_of_occurrences: Option<u32>,
}

/// Recurrence of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recurrence {
    /// Repeat pattern.
    pub pattern: RecurrencePattern,
    /// Repeat range.
    pub range: RecurrenceRange,
    /// Length of each occurrence.
    pub occurrence_duration: IsoDuration,
}

impl Recurrence {
    fn validate(&self) -> AppResult<()> {
        if self.pattern.interval == 0 {
            return Err(AppError::Validation(
                "recurrence interval must be at least 1".to_owned(),
            ));
        }
        if self.occurrence_duration.is_zero() {
            return Err(AppError::Validation(
                "recurrence occurrenceDuration must be positive".to_owned(),
            ));
        }

        match self.pattern.pattern_type {
            RecurrencePatternType::Daily => {}
            RecurrencePatternType::Weekly => {
                if self.pattern.days_of_week.is_empty() {
                    return Err(AppError::Validation(
                        "weekly recurrence requires daysOfWeek".to_owned(),
                    ));
                }
            }
            RecurrencePatternType::AbsoluteMonthly => {
                validate_day_of_month(self.pattern.day_of_month)?;
            }
            RecurrencePatternType::AbsoluteYearly => {
                validate_day_of_month(self.pattern.day_of_month)?;
                if !matches!(self.pattern.month, Some(1..=12)) {
                    return Err(AppError::Validation(
                        "yearly recurrence requires month between 1 and 12".to_owned(),
                    ));
                }
            }
        }

        match self.range.range_type {
            RecurrenceRangeType::NoEnd => Ok(()),
            RecurrenceRangeType::EndDate if self.range.end_date.is_none() => Err(
                AppError::Validation("endDate recurrence range requires endDate".to_owned()),
            ),
            RecurrenceRangeType::Numbered
                if !matches!(self.range.number_of_occurrences, Some(1..)) =>
            {
                Err(AppError::Validation(
                    "numbered recurrence range requires numberOfOccurrences >= 1".to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }
}

fn validate_day_of_month(day_of_month: Option<u32>) -> AppResult<()> {
    if matches!(day_of_month, Some(1..=31)) {
        return Ok(());
    }

    Err(AppError::Validation(
        "recurrence requires dayOfMonth between 1 and 31".to_owned(),
    ))
}

/// Requested time window of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInfo {
    /// First instant of the window; defaults to the time the schedule is provisioned.
    #[serde(default)]
    pub start_date_time: Option<DateTime<Utc>>,
    /// Optional recurrence.
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
    /// Expiration pattern.
    pub expiration: Expiration,
}

impl ScheduleInfo {
    /// Non-recurring window starting at `start`.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>, expiration: Expiration) -> Self {
        Self {
            start_date_time: Some(start),
            recurrence: None,
            expiration,
        }
    }

    /// Checks structural validity independent of the current time.
    pub fn validate(&self) -> AppResult<()> {
        let latest = latest_instant();
        if self.start_date_time.is_some_and(|start| start > latest)
            || self.expiration.end_date_time.is_some_and(|end| end > latest)
        {
            return Err(AppError::Validation(
                "schedule instants must not be later than 9999-12-31T23:59:59Z".to_owned(),
            ));
        }

        match self.expiration.expiration_type {
            ExpirationType::NoExpiration => {
                if self.expiration.end_date_time.is_some() || self.expiration.duration.is_some() {
                    return Err(AppError::Validation(
                        "noExpiration must not carry endDateTime or duration".to_owned(),
                    ));
                }
            }
            ExpirationType::AfterDateTime => {
                let end = self.expiration.end_date_time.ok_or_else(|| {
                    AppError::Validation("afterDateTime expiration requires endDateTime".to_owned())
                })?;
                if let Some(start) = self.start_date_time
                    && truncate_to_minute(end) <= truncate_to_minute(start)
                {
                    return Err(AppError::Validation(
                        "expiration endDateTime must be after startDateTime".to_owned(),
                    ));
                }
            }
            ExpirationType::AfterDuration => {
                let duration = self.expiration.duration.ok_or_else(|| {
                    AppError::Validation("afterDuration expiration requires duration".to_owned())
                })?;
                if duration.as_seconds() < 60 {
                    return Err(AppError::Validation(
                        "expiration duration must be at least one minute".to_owned(),
                    ));
                }
            }
        }

        if let Some(recurrence) = &self.recurrence {
            recurrence.validate()?;
        }

        Ok(())
    }

    /// Returns a copy with the start pinned and every instant truncated to minutes.
    #[must_use]
    pub fn anchored(&self, start: DateTime<Utc>) -> Self {
        let mut anchored = self.clone();
        anchored.start_date_time = Some(truncate_to_minute(start));
        anchored.expiration.end_date_time = anchored.expiration.end_date_time.map(truncate_to_minute);
        anchored
    }

    /// Start of the window, or `fallback` when none was requested.
    #[must_use]
    pub fn start_or(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        truncate_to_minute(self.start_date_time.unwrap_or(fallback))
    }

    /// End of the window measured from `start`; `None` is open-ended.
    #[must_use]
    pub fn end_from(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.expiration.expiration_type {
            ExpirationType::NoExpiration => None,
            ExpirationType::AfterDateTime => self.expiration.end_date_time.map(truncate_to_minute),
            ExpirationType::AfterDuration => self
                .expiration
                .duration
                .map(|duration| add_clamped(truncate_to_minute(start), duration.to_time_delta())),
        }
    }

    /// Resolved `[start, end)` window using `now` as the default start.
    #[must_use]
    pub fn window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, Option<DateTime<Utc>>) {
        let start = self.start_or(now);
        (start, self.end_from(start))
    }
}
