use chrono::{DateTime, Datelike, Days, NaiveDate, TimeDelta, Utc};
use serde::Serialize;

use crate::schedule_info::{
    Recurrence, RecurrencePatternType, RecurrenceRangeType, ScheduleInfo, add_clamped,
    truncate_to_minute,
};

/// Upper bound on occurrences evaluated per call.
pub const MAX_OCCURRENCES: usize = 10_000;

/// One concrete active window of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceWindow {
    /// Window start.
    pub start_date_time: DateTime<Utc>,
    /// Window end; `None` is open-ended.
    pub end_date_time: Option<DateTime<Utc>>,
}

impl InstanceWindow {
    /// Returns whether the window contains the instant.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start_date_time <= instant && self.end_date_time.is_none_or(|end| instant < end)
    }

    /// Returns whether `other` lies entirely inside this window.
    #[must_use]
    pub fn covers(&self, other: &InstanceWindow) -> bool {
        if other.start_date_time < self.start_date_time {
            return false;
        }
        match (self.end_date_time, other.end_date_time) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(end), Some(other_end)) => other_end <= end,
        }
    }

    /// Returns whether the two windows share any instant.
    #[must_use]
    pub fn overlaps(&self, other: &InstanceWindow) -> bool {
        let starts_before_other_ends = other
            .end_date_time
            .is_none_or(|end| self.start_date_time < end);
        let other_starts_before_end = self
            .end_date_time
            .is_none_or(|end| other.start_date_time < end);
        starts_before_other_ends && other_starts_before_end
    }
}

/// Expands a schedule into the windows that are still current and start within the horizon.
///
/// Pure: the same `(info, now, horizon)` always yields the same windows. Windows are
/// sorted, non-overlapping, clipped to the schedule expiry, and every emitted window
/// starts at or before `now + horizon` and ends after `now`.
#[must_use]
pub fn materialize(info: &ScheduleInfo, now: DateTime<Utc>, horizon: TimeDelta) -> Vec<InstanceWindow> {
    let now = truncate_to_minute(now);
    let horizon_end = add_clamped(now, horizon);
    let (start, expiry) = info.window(now);

    let windows = match &info.recurrence {
        None => vec![InstanceWindow {
            start_date_time: start,
            end_date_time: expiry,
        }],
        Some(recurrence) => recurring_windows(recurrence, start, expiry, horizon_end),
    };

    windows
        .into_iter()
        .filter(|window| {
            window.start_date_time <= horizon_end && window.end_date_time.is_none_or(|end| end > now)
        })
        .collect()
}

fn recurring_windows(
    recurrence: &Recurrence,
    start: DateTime<Utc>,
    expiry: Option<DateTime<Utc>>,
    horizon_end: DateTime<Utc>,
) -> Vec<InstanceWindow> {
    let starts = occurrence_starts(recurrence, start, expiry, horizon_end);
    let length = recurrence.occurrence_duration.to_time_delta();

    starts
        .iter()
        .enumerate()
        .filter(|(_, occurrence)| **occurrence <= horizon_end)
        .map(|(index, occurrence)| {
            let mut end = add_clamped(*occurrence, length);
            if let Some(next) = starts.get(index + 1) {
                end = end.min(*next);
            }
            if let Some(expiry) = expiry {
                end = end.min(expiry);
            }
            InstanceWindow {
                start_date_time: *occurrence,
                end_date_time: Some(end),
            }
        })
        .collect()
}

/// Occurrence starts in order, plus at most one start past the horizon so the last
/// emitted window can be clamped against it.
fn occurrence_starts(
    recurrence: &Recurrence,
    start: DateTime<Utc>,
    expiry: Option<DateTime<Utc>>,
    horizon_end: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let mut starts = Vec::new();
    let mut occurrences: u32 = 0;
    let limit = recurrence
        .range
        .number_of_occurrences
        .filter(|_| recurrence.range.range_type == RecurrenceRangeType::Numbered);
    let end_date = recurrence
        .range
        .end_date
        .filter(|_| recurrence.range.range_type == RecurrenceRangeType::EndDate);

    'periods: for period in 0..MAX_OCCURRENCES {
        let Ok(period) = u32::try_from(period) else {
            break;
        };
        let Some(candidates) = period_candidates(recurrence, start, period) else {
            break;
        };

        for candidate in candidates {
            if candidate < start {
                continue;
            }
            if limit.is_some_and(|limit| occurrences >= limit)
                || end_date.is_some_and(|end_date| candidate.date_naive() > end_date)
                || expiry.is_some_and(|expiry| candidate >= expiry)
            {
                break 'periods;
            }

            starts.push(candidate);
            occurrences += 1;
            if candidate > horizon_end || starts.len() >= MAX_OCCURRENCES {
                break 'periods;
            }
        }
    }

    starts
}

/// Candidate starts of the `period`-th pattern period, or `None` once dates overflow.
fn period_candidates(
    recurrence: &Recurrence,
    start: DateTime<Utc>,
    period: u32,
) -> Option<Vec<DateTime<Utc>>> {
    let pattern = &recurrence.pattern;
    let step = u64::from(period) * u64::from(pattern.interval);
    let time = start.time();
    let first_date = start.date_naive();

    let dates = match pattern.pattern_type {
        RecurrencePatternType::Daily => vec![first_date.checked_add_days(Days::new(step))?],
        RecurrencePatternType::Weekly => {
            let week_start = first_date
                .checked_sub_days(Days::new(u64::from(first_date.weekday().num_days_from_sunday())))?
                .checked_add_days(Days::new(step * 7))?;
            let mut offsets: Vec<u32> = pattern
                .days_of_week
                .iter()
                .map(|day| day.offset_from_sunday())
                .collect();
            offsets.sort_unstable();
            offsets.dedup();
            offsets
                .into_iter()
                .filter_map(|offset| week_start.checked_add_days(Days::new(u64::from(offset))))
                .collect()
        }
        RecurrencePatternType::AbsoluteMonthly => {
            let total = i64::from(first_date.year()) * 12
                + i64::from(first_date.month0())
                + i64::try_from(step).ok()?;
            let year = i32::try_from(total.div_euclid(12)).ok()?;
            let month = u32::try_from(total.rem_euclid(12)).ok()? + 1;
            vec![clamped_date(year, month, pattern.day_of_month.unwrap_or(1))?]
        }
        RecurrencePatternType::AbsoluteYearly => {
            let year = first_date.year().checked_add(i32::try_from(step).ok()?)?;
            let month = pattern.month.unwrap_or(first_date.month());
            vec![clamped_date(year, month, pattern.day_of_month.unwrap_or(1))?]
        }
    };

    Some(
        dates
            .into_iter()
            .map(|date| date.and_time(time).and_utc())
            .collect(),
    )
}

/// Day `day` of the month, falling back to the month's last valid day.
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day.min(days_in_month(year, month)))
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use proptest::prelude::*;

    use super::{InstanceWindow, materialize};
    use crate::duration::IsoDuration;
    use crate::schedule_info::{
        DayOfWeek, Expiration, Recurrence, RecurrencePattern, RecurrencePatternType,
        RecurrenceRange, RecurrenceRangeType, ScheduleInfo,
    };

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .unwrap_or_default()
    }

    fn recurring(
        pattern_type: RecurrencePatternType,
        day_of_month: Option<u32>,
        days_of_week: Vec<DayOfWeek>,
        occurrence_hours: u32,
    ) -> Recurrence {
        Recurrence {
            pattern: RecurrencePattern {
                pattern_type,
                interval: 1,
                days_of_week,
                day_of_month,
                month: None,
            },
            range: RecurrenceRange {
                range_type: RecurrenceRangeType::NoEnd,
                end_date: None,
                number_of_occurrences: None,
            },
            occurrence_duration: IsoDuration::hours(occurrence_hours),
        }
    }

    #[test]
    fn no_expiration_yields_single_open_window() {
        let start = at(2024, 6, 1, 0, 0);
        let info = ScheduleInfo::starting_at(start, Expiration::never());

        let windows = materialize(&info, start, TimeDelta::days(7));

        assert_eq!(
            windows,
            vec![InstanceWindow {
                start_date_time: start,
                end_date_time: None
            }]
        );
    }

    #[test]
    fn after_duration_window_is_clipped() {
        let start = at(2024, 6, 1, 0, 0);
        let info = ScheduleInfo::starting_at(start, Expiration::after(IsoDuration::hours(8)));

        let windows = materialize(&info, start, TimeDelta::days(7));

        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].end_date_time, Some(at(2024, 6, 1, 8, 0)));
    }

    #[test]
    fn windows_beyond_horizon_or_already_ended_are_skipped() {
        let start = at(2024, 6, 10, 0, 0);
        let info = ScheduleInfo::starting_at(start, Expiration::after(IsoDuration::hours(8)));

        assert!(materialize(&info, at(2024, 6, 1, 0, 0), TimeDelta::days(7)).is_empty());
        assert!(materialize(&info, at(2024, 6, 10, 8, 0), TimeDelta::days(7)).is_empty());
    }

    #[test]
    fn monthly_on_the_31st_falls_back_to_last_valid_day() {
        let start = at(2024, 1, 31, 9, 0);
        let mut info = ScheduleInfo::starting_at(start, Expiration::at(at(2024, 5, 1, 0, 0)));
        info.recurrence = Some(recurring(
            RecurrencePatternType::AbsoluteMonthly,
            Some(31),
            Vec::new(),
            2,
        ));

        let windows = materialize(&info, start, TimeDelta::days(365));
        let starts: Vec<DateTime<Utc>> = windows.iter().map(|w| w.start_date_time).collect();

        assert_eq!(
            starts,
            vec![
                at(2024, 1, 31, 9, 0),
                at(2024, 2, 29, 9, 0),
                at(2024, 3, 31, 9, 0),
                at(2024, 4, 30, 9, 0),
            ]
        );
    }

    #[test]
    fn weekly_recurrence_uses_listed_days() {
        // 2024-06-03 is a Monday.
        let start = at(2024, 6, 3, 8, 0);
        let mut info = ScheduleInfo::starting_at(start, Expiration::at(at(2024, 6, 15, 0, 0)));
        info.recurrence = Some(recurring(
            RecurrencePatternType::Weekly,
            None,
            vec![DayOfWeek::Friday, DayOfWeek::Monday],
            4,
        ));

        let windows = materialize(&info, start, TimeDelta::days(30));
        let starts: Vec<DateTime<Utc>> = windows.iter().map(|w| w.start_date_time).collect();

        assert_eq!(
            starts,
            vec![
                at(2024, 6, 3, 8, 0),
                at(2024, 6, 7, 8, 0),
                at(2024, 6, 10, 8, 0),
                at(2024, 6, 14, 8, 0),
            ]
        );
    }

    #[test]
    fn numbered_range_stops_after_count() {
        let start = at(2024, 6, 1, 8, 0);
        let mut info = ScheduleInfo::starting_at(start, Expiration::never());
        let mut recurrence = recurring(RecurrencePatternType::Daily, None, Vec::new(), 1);
        recurrence.range = RecurrenceRange {
            range_type: RecurrenceRangeType::Numbered,
            end_date: None,
            number_of_occurrences: Some(3),
        };
        info.recurrence = Some(recurrence);

        let windows = materialize(&info, start, TimeDelta::days(30));

        assert_eq!(windows.len(), 3);
    }

    #[test]
    fn long_occurrences_are_clamped_to_next_start() {
        let start = at(2024, 6, 1, 0, 0);
        let mut info = ScheduleInfo::starting_at(start, Expiration::at(at(2024, 6, 4, 0, 0)));
        info.recurrence = Some(recurring(RecurrencePatternType::Daily, None, Vec::new(), 36));

        let windows = materialize(&info, start, TimeDelta::days(7));

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].end_date_time, Some(at(2024, 6, 2, 0, 0)));
        assert_eq!(windows[2].end_date_time, Some(at(2024, 6, 4, 0, 0)));
    }

    #[test]
    fn unbounded_horizon_near_the_end_of_time_saturates() {
        let now = DateTime::<Utc>::MAX_UTC - TimeDelta::days(1);
        let info = ScheduleInfo::starting_at(now, Expiration::after(IsoDuration::days(36_525)));

        let windows = materialize(&info, now, TimeDelta::MAX);

        assert_eq!(windows.len(), 1);
        assert!(windows[0].end_date_time.is_some_and(|end| end > now));
    }

    proptest! {
        #[test]
        fn recurring_windows_are_sorted_disjoint_bounded_and_repeatable(
            start_offset in 0_i64..100_000,
            interval in 1_u32..4,
            occurrence_hours in 1_u32..72,
            expiry_days in 1_i64..120,
            now_offset in -10_000_i64..200_000,
            horizon_days in 0_i64..60,
            weekly in proptest::bool::ANY,
        ) {
            let base = at(2024, 1, 1, 0, 0);
            let start = base + TimeDelta::minutes(start_offset);
            let expiry = start + TimeDelta::days(expiry_days);
            let mut info = ScheduleInfo::starting_at(start, Expiration::at(expiry));
            let mut recurrence = if weekly {
                recurring(
                    RecurrencePatternType::Weekly,
                    None,
                    vec![DayOfWeek::Tuesday, DayOfWeek::Saturday],
                    occurrence_hours,
                )
            } else {
                recurring(RecurrencePatternType::Daily, None, Vec::new(), occurrence_hours)
            };
            recurrence.pattern.interval = interval;
            info.recurrence = Some(recurrence);
            let now = base + TimeDelta::minutes(now_offset);
            let horizon = TimeDelta::days(horizon_days);

            let windows = materialize(&info, now, horizon);

            prop_assert_eq!(&windows, &materialize(&info, now, horizon));
            for window in &windows {
                let end = window.end_date_time.unwrap_or(expiry);
                prop_assert!(window.start_date_time >= start);
                prop_assert!(window.start_date_time < end);
                prop_assert!(end <= expiry);
                prop_assert!(window.start_date_time <= now + horizon);
            }
            for pair in windows.windows(2) {
                prop_assert!(pair[0].end_date_time.unwrap_or(expiry) <= pair[1].start_date_time);
            }
        }
    }
}
