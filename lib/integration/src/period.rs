//! Reporting periods.
//!
//! A period is expressed two ways: as a SOQL date literal for CRM queries
//! and as a concrete UTC range for providers that filter by timestamp.
//! Weeks start on Monday.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A relative reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Today,
    ThisWeek,
    #[default]
    ThisMonth,
    ThisQuarter,
    ThisYear,
    LastMonth,
}

impl Period {
    /// All periods, for schema enumerations.
    pub const ALL: [Period; 6] = [
        Self::Today,
        Self::ThisWeek,
        Self::ThisMonth,
        Self::ThisQuarter,
        Self::ThisYear,
        Self::LastMonth,
    ];

    /// The wire name used in tool inputs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::ThisWeek => "this_week",
            Self::ThisMonth => "this_month",
            Self::ThisQuarter => "this_quarter",
            Self::ThisYear => "this_year",
            Self::LastMonth => "last_month",
        }
    }

    /// The SOQL date literal for this period.
    #[must_use]
    pub fn soql_literal(&self) -> &'static str {
        match self {
            Self::Today => "TODAY",
            Self::ThisWeek => "THIS_WEEK",
            Self::ThisMonth => "THIS_MONTH",
            Self::ThisQuarter => "THIS_QUARTER",
            Self::ThisYear => "THIS_YEAR",
            Self::LastMonth => "LAST_MONTH",
        }
    }

    /// Half-open UTC range `[start, end)` covering the period around `now`.
    #[must_use]
    pub fn range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = now.date_naive();
        let month_start = first_of_month(today.year(), today.month());

        let (start, end) = match self {
            Self::Today => (today, today + Days::new(1)),
            Self::ThisWeek => {
                let start = today - Days::new(u64::from(today.weekday().num_days_from_monday()));
                (start, start + Days::new(7))
            }
            Self::ThisMonth => (month_start, month_start + Months::new(1)),
            Self::ThisQuarter => {
                let first_month = (today.month0() / 3) * 3 + 1;
                let start = first_of_month(today.year(), first_month);
                (start, start + Months::new(3))
            }
            Self::ThisYear => {
                let start = first_of_month(today.year(), 1);
                (start, start + Months::new(12))
            }
            Self::LastMonth => (month_start - Months::new(1), month_start),
        };

        (midnight(start), midnight(end))
    }
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().expect("timestamp")
    }

    #[test]
    fn parses_wire_names() {
        let period: Period = serde_json::from_str("\"this_week\"").unwrap();
        assert_eq!(period, Period::ThisWeek);
        assert_eq!(period.soql_literal(), "THIS_WEEK");
        assert!(serde_json::from_str::<Period>("\"next_decade\"").is_err());
    }

    #[test]
    fn week_starts_on_monday() {
        // 2026-10-21 is a Wednesday.
        let (start, end) = Period::ThisWeek.range(at("2026-10-21T15:00:00Z"));
        assert_eq!(start, at("2026-10-19T00:00:00Z"));
        assert_eq!(end, at("2026-10-26T00:00:00Z"));
    }

    #[test]
    fn quarter_and_last_month() {
        let now = at("2026-02-10T08:00:00Z");
        let january = at("2026-01-01T00:00:00Z");
        assert_eq!(Period::ThisQuarter.range(now), (january, at("2026-04-01T00:00:00Z")));
        assert_eq!(Period::LastMonth.range(now), (january, at("2026-02-01T00:00:00Z")));
    }

    #[test]
    fn today_is_one_day() {
        let (start, end) = Period::Today.range(at("2026-12-31T23:59:59Z"));
        assert_eq!(start, at("2026-12-31T00:00:00Z"));
        assert_eq!(end, at("2027-01-01T00:00:00Z"));
    }
}
