//! Date expressions accepted by the analysis tools.
//!
//! Three grammars are tried in order: relative periods (`7d`, `2w`, `3m`,
//! `1y`), a calendar month (`YYYY-MM`) and a calendar day (`YYYY-MM-DD`).
//! Months and years in relative periods are flat 30 and 365 days.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::entries::TimeWindow;
use crate::error::CoreError;

pub const DAY_MS: i64 = 86_400_000;
pub const WEEK_MS: i64 = 7 * DAY_MS;
pub const MONTH_MS: i64 = 30 * DAY_MS;
pub const YEAR_MS: i64 = 365 * DAY_MS;

static RELATIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)([dwmy])$").expect("valid relative date regex"));
static MONTH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").expect("valid month regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeUnit {
    Day,
    Week,
    Month,
    Year,
}

impl RelativeUnit {
    fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'd' => Some(RelativeUnit::Day),
            'w' => Some(RelativeUnit::Week),
            'm' => Some(RelativeUnit::Month),
            'y' => Some(RelativeUnit::Year),
            _ => None,
        }
    }

    pub fn millis(self) -> i64 {
        match self {
            RelativeUnit::Day => DAY_MS,
            RelativeUnit::Week => WEEK_MS,
            RelativeUnit::Month => MONTH_MS,
            RelativeUnit::Year => YEAR_MS,
        }
    }
}

/// A parsed date expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateExpr {
    Relative { amount: i64, unit: RelativeUnit },
    Month { year: i32, month: u32 },
    Day(NaiveDate),
}

impl DateExpr {
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let text = text.trim();
        let invalid = || CoreError::InvalidDateFormat(text.to_string());

        if let Some(caps) = RELATIVE_RE.captures(text) {
            let amount = caps[1].parse::<i64>().map_err(|_| invalid())?;
            let unit = caps[2]
                .chars()
                .next()
                .and_then(RelativeUnit::from_char)
                .ok_or_else(invalid)?;
            return Ok(DateExpr::Relative { amount, unit });
        }

        if let Some(caps) = MONTH_RE.captures(text) {
            let year = caps[1].parse::<i32>().map_err(|_| invalid())?;
            let month = caps[2].parse::<u32>().map_err(|_| invalid())?;
            NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
            return Ok(DateExpr::Month { year, month });
        }

        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(DateExpr::Day)
            .map_err(|_| invalid())
    }

    /// First instant the expression denotes, in epoch milliseconds UTC.
    pub fn start_millis(&self, now_ms: i64) -> Result<i64, CoreError> {
        match *self {
            DateExpr::Relative { amount, unit } => amount
                .checked_mul(unit.millis())
                .and_then(|offset| now_ms.checked_sub(offset))
                .ok_or_else(|| CoreError::InvalidDateFormat(format!("{amount}{unit:?}"))),
            DateExpr::Month { year, month } => month_start_millis(year, month),
            DateExpr::Day(date) => Ok(day_start_millis(date)),
        }
    }

    /// Exclusive end when the expression closes a range: the following
    /// month for `YYYY-MM`, the following day for `YYYY-MM-DD`, the
    /// resolved instant for relative periods.
    pub fn end_millis(&self, now_ms: i64) -> Result<i64, CoreError> {
        match *self {
            DateExpr::Relative { .. } => self.start_millis(now_ms),
            DateExpr::Month { year, month } => Ok(month_window(year, month)?.end()),
            DateExpr::Day(date) => Ok(day_start_millis(date) + DAY_MS),
        }
    }
}

/// Resolve a date expression to epoch milliseconds UTC.
pub fn resolve(text: &str, now_ms: i64) -> Result<i64, CoreError> {
    DateExpr::parse(text)?.start_millis(now_ms)
}

/// Window for an analysis request. A missing `to` means "now".
pub fn analysis_window(from: &str, to: Option<&str>, now_ms: i64) -> Result<TimeWindow, CoreError> {
    let start = resolve(from, now_ms)?;
    let end = match to {
        Some(to) => DateExpr::parse(to)?.end_millis(now_ms)?,
        None => now_ms,
    };
    TimeWindow::new(start, end)
}

/// `[first instant of month, first instant of the next month)` in UTC.
pub fn month_window(year: i32, month: u32) -> Result<TimeWindow, CoreError> {
    let start = month_start_millis(year, month)?;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let end = month_start_millis(next_year, next_month)?;
    TimeWindow::new(start, end)
}

fn month_start_millis(year: i32, month: u32) -> Result<i64, CoreError> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(day_start_millis)
        .ok_or(CoreError::InvalidMonth { year, month })
}

fn day_start_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
        .timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-06-15T12:00:00Z
    const NOW: i64 = 1_749_988_800_000;

    #[test]
    fn relative_periods_use_flat_unit_sizes() {
        assert_eq!(resolve("7d", NOW).unwrap(), NOW - 604_800_000);
        assert_eq!(resolve("1w", NOW).unwrap(), NOW - 604_800_000);
        assert_eq!(resolve("3M", NOW).unwrap(), NOW - 3 * 2_592_000_000);
        assert_eq!(resolve("1y", NOW).unwrap(), NOW - 31_536_000_000);
        assert_eq!(resolve("0d", NOW).unwrap(), NOW);
    }

    #[test]
    fn year_month_resolves_to_first_instant_utc() {
        // 2025-03-01T00:00:00Z
        assert_eq!(resolve("2025-03", NOW).unwrap(), 1_740_787_200_000);
    }

    #[test]
    fn full_date_resolves_to_utc_midnight() {
        // 2025-03-15T00:00:00Z
        assert_eq!(resolve("2025-03-15", NOW).unwrap(), 1_741_996_800_000);
    }

    #[test]
    fn malformed_input_is_a_clean_error() {
        for text in ["not-a-date", "2025-13", "2025-02-30", "7x", "", "-3d"] {
            assert!(
                matches!(resolve(text, NOW), Err(CoreError::InvalidDateFormat(_))),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn oversized_relative_amount_does_not_overflow() {
        assert!(resolve("99999999999999999y", NOW).is_err());
    }

    #[test]
    fn month_window_rolls_december_into_next_year() {
        let window = month_window(2024, 12).unwrap();
        // 2024-12-01 and 2025-01-01
        assert_eq!(window.start(), 1_733_011_200_000);
        assert_eq!(window.end(), 1_735_689_600_000);
        assert_eq!(window.whole_days(), 31);

        let feb = month_window(2024, 2).unwrap();
        assert_eq!(feb.whole_days(), 29);
        assert!(month_window(2024, 13).is_err());
    }

    #[test]
    fn analysis_window_extends_month_and_day_ends() {
        let month = analysis_window("2025-01", Some("2025-02"), NOW).unwrap();
        assert_eq!(month.start(), 1_735_689_600_000);
        // 2025-03-01
        assert_eq!(month.end(), 1_740_787_200_000);

        let day = analysis_window("2025-03-01", Some("2025-03-01"), NOW).unwrap();
        assert_eq!(day.end() - day.start(), DAY_MS);

        let open = analysis_window("7d", None, NOW).unwrap();
        assert_eq!(open.end(), NOW);
    }

    #[test]
    fn analysis_window_rejects_inverted_range() {
        assert!(matches!(
            analysis_window("2025-05", Some("2025-01"), NOW),
            Err(CoreError::InvalidWindow { .. })
        ));
    }
}
