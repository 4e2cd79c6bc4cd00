use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use warden_core::AppError;

const SECONDS_PER_MINUTE: i64 = 60;
const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_WEEK: i64 = 604_800;

/// Longest accepted duration: 100 years of 365.25 days.
pub const MAX_DURATION_SECONDS: i64 = 36_525 * SECONDS_PER_DAY;

/// Non-negative ISO-8601 duration restricted to fixed-length units (`PnW`, `PnDTnHnMnS`).
///
/// Calendar units (years, months) are rejected because their length depends on the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IsoDuration {
    seconds: i64,
}

impl IsoDuration {
    /// Builds a duration from whole seconds.
    pub fn from_seconds(seconds: i64) -> Result<Self, AppError> {
        if seconds < 0 {
            return Err(AppError::Validation(
                "durations must not be negative".to_owned(),
            ));
        }
        if seconds > MAX_DURATION_SECONDS {
            return Err(AppError::Validation(format!(
                "durations must not exceed {MAX_DURATION_SECONDS} seconds"
            )));
        }

        Ok(Self { seconds })
    }

    /// Builds a duration from whole hours, capped at [`MAX_DURATION_SECONDS`].
    #[must_use]
    pub fn hours(hours: u32) -> Self {
        Self {
            seconds: (i64::from(hours) * SECONDS_PER_HOUR).min(MAX_DURATION_SECONDS),
        }
    }

    /// Builds a duration from whole days, capped at [`MAX_DURATION_SECONDS`].
    #[must_use]
    pub fn days(days: u32) -> Self {
        Self {
            seconds: (i64::from(days) * SECONDS_PER_DAY).min(MAX_DURATION_SECONDS),
        }
    }

    /// Returns the length in seconds.
    #[must_use]
    pub fn as_seconds(&self) -> i64 {
        self.seconds
    }

    /// Returns the duration as a chrono delta.
    #[must_use]
    pub fn to_time_delta(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.seconds).unwrap_or(TimeDelta::MAX)
    }

    /// Returns whether the duration is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.seconds == 0
    }
}

impl FromStr for IsoDuration {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::Validation(format!("invalid ISO-8601 duration '{value}'"));

        let body = value.strip_prefix('P').ok_or_else(invalid)?;
        if body.is_empty() {
            return Err(invalid());
        }

        let (date_part, time_part) = match body.split_once('T') {
            Some((date_part, time_part)) => {
                if time_part.is_empty() {
                    return Err(invalid());
                }
                (date_part, Some(time_part))
            }
            None => (body, None),
        };

        let mut seconds: i64 = 0;
        let mut seen = Vec::new();
        let date_units = components(date_part).ok_or_else(invalid)?;
        let time_units = match time_part {
            Some(time_part) => components(time_part).ok_or_else(invalid)?,
            None => Vec::new(),
        };
        for (amount, unit, in_time) in date_units
            .into_iter()
            .map(|(amount, unit)| (amount, unit, false))
            .chain(time_units.into_iter().map(|(amount, unit)| (amount, unit, true)))
        {
            if seen.contains(&(unit, in_time)) {
                return Err(AppError::Validation(format!(
                    "duration '{value}' repeats the '{unit}' component"
                )));
            }
            seen.push((unit, in_time));

            let unit_seconds = match (unit, in_time) {
                ('W', false) => SECONDS_PER_WEEK,
                ('D', false) => SECONDS_PER_DAY,
                ('Y' | 'M', false) => {
                    return Err(AppError::Validation(format!(
                        "duration '{value}' uses calendar units; use weeks, days or time units"
                    )));
                }
                ('H', true) => SECONDS_PER_HOUR,
                ('M', true) => SECONDS_PER_MINUTE,
                ('S', true) => 1,
                _ => return Err(invalid()),
            };
            seconds = amount
                .checked_mul(unit_seconds)
                .and_then(|part| seconds.checked_add(part))
                .ok_or_else(|| {
                    AppError::Validation(format!("duration '{value}' is out of range"))
                })?;
        }

        Self::from_seconds(seconds)
    }
}

fn components(part: &str) -> Option<Vec<(i64, char)>> {
    let mut parsed = Vec::new();
    let mut digits = String::new();
    for character in part.chars() {
        if character.is_ascii_digit() {
            digits.push(character);
            continue;
        }
        if digits.is_empty() || digits.len() > 9 {
            return None;
        }
        let amount = digits.parse::<i64>().ok()?;
        parsed.push((amount, character));
        digits.clear();
    }

    digits.is_empty().then_some(parsed)
}

impl Display for IsoDuration {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        if self.seconds == 0 {
            return formatter.write_str("PT0S");
        }

        let days = self.seconds / SECONDS_PER_DAY;
        let hours = (self.seconds % SECONDS_PER_DAY) / SECONDS_PER_HOUR;
        let minutes = (self.seconds % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE;
        let seconds = self.seconds % SECONDS_PER_MINUTE;

        formatter.write_str("P")?;
        if days > 0 {
            write!(formatter, "{days}D")?;
        }
        if hours > 0 || minutes > 0 || seconds > 0 {
            formatter.write_str("T")?;
            if hours > 0 {
                write!(formatter, "{hours}H")?;
            }
            if minutes > 0 {
                write!(formatter, "{minutes}M")?;
            }
            if seconds > 0 {
                write!(formatter, "{seconds}S")?;
            }
        }

        Ok(())
    }
}

impl TryFrom<String> for IsoDuration {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(value.as_str())
    }
}

impl From<IsoDuration> for String {
    fn from(value: IsoDuration) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::IsoDuration;

    #[test]
    fn parses_common_activation_durations() {
        assert_eq!(IsoDuration::from_str("PT8H").ok(), Some(IsoDuration::hours(8)));
        assert_eq!(IsoDuration::from_str("P1D").ok(), Some(IsoDuration::days(1)));
        assert_eq!(IsoDuration::from_str("P2W").ok(), Some(IsoDuration::days(14)));
        assert_eq!(
            IsoDuration::from_str("P1DT2H30M").map(|value| value.as_seconds()).ok(),
            Some(95_400)
        );
    }

    #[test]
    fn rejects_calendar_units_and_garbage() {
        assert!(IsoDuration::from_str("P1M").is_err());
        assert!(IsoDuration::from_str("P1Y").is_err());
        assert!(IsoDuration::from_str("PT").is_err());
        assert!(IsoDuration::from_str("8H").is_err());
        assert!(IsoDuration::from_str("PTH").is_err());
    }

    #[test]
    fn repeated_components_are_rejected() {
        assert!(IsoDuration::from_str("P1D2D").is_err());
        assert!(IsoDuration::from_str("PT1H1H").is_err());
        assert!(IsoDuration::from_str(&format!("P{}", "999999999W".repeat(20))).is_err());
    }

    #[test]
    fn durations_beyond_a_century_are_rejected() {
        assert!(IsoDuration::from_str("P999999999D").is_err());
        assert!(IsoDuration::from_str("P36525D").is_ok());
        assert!(IsoDuration::from_str("P36526D").is_err());
        assert!(IsoDuration::from_seconds(i64::MAX).is_err());
        assert_eq!(
            IsoDuration::days(u32::MAX).as_seconds(),
            super::MAX_DURATION_SECONDS
        );
    }

    #[test]
    fn month_and_minute_designators_depend_on_the_time_separator() {
        assert!(IsoDuration::from_str("P1M").is_err());
        assert_eq!(
            IsoDuration::from_str("PT1M").map(|value| value.as_seconds()).ok(),
            Some(60)
        );
    }

    #[test]
    fn formats_canonically() {
        assert_eq!(IsoDuration::hours(2).to_string(), "PT2H");
        assert_eq!(IsoDuration::days(14).to_string(), "P14D");
        assert_eq!(
            IsoDuration::from_str("PT90M").map(|value| value.to_string()).ok(),
            Some("PT1H30M".to_owned())
        );
    }
}
