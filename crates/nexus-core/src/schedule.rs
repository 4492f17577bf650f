//! # Due-Date Derivation
//!
//! Computes the deadline of a compliance cycle from the audit's start time
//! and the requirement's frequency label.
//!
//! | Frequency     | Deadline                                   |
//! |---------------|--------------------------------------------|
//! | (no start)    | end of the current month                   |
//! | `Daily`       | end of the start day                       |
//! | `Weekly`      | end of the start week (see [`WeekStart`])  |
//! | `Monthly`     | end of the start month                     |
//! | `Quarterly`   | end of the month of start + 3 months       |
//! | `Bi-annually` | end of the month of start + 6 months       |
//! | `Annually`    | end of the start year                      |
//! | anything else | end of the start month                     |
//!
//! Unrecognized labels never raise an error. All times are zone-naive wall
//! clock values; "end of" means `23:59:59` on the last day of the period.
//! Month addition clamps to the last valid day (Nov 30 + 3 months is
//! Feb 28/29), so the deadline always lands in the month that is exactly
//! N calendar months after the start month.

use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::frequency::Frequency;

const END_OF_DAY: NaiveTime = match NaiveTime::from_hms_opt(23, 59, 59) {
    Some(t) => t,
    None => panic!("23:59:59 is a valid time"),
};

/// First day of the calendar week used by the `Weekly` frequency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeekStart {
    /// ISO weeks: Monday through Sunday.
    #[default]
    Monday,
    /// Sunday through Saturday.
    Sunday,
}

impl WeekStart {
    /// The last weekday of a week under this convention.
    pub fn last_day(self) -> Weekday {
        match self {
            Self::Monday => Weekday::Sun,
            Self::Sunday => Weekday::Sat,
        }
    }

    /// Lowercase name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Sunday => "sunday",
        }
    }
}

impl FromStr for WeekStart {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" | "mon" => Ok(Self::Monday),
            "sunday" | "sun" => Ok(Self::Sunday),
            _ => Err(ValidationError::InvalidWeekStart(s.to_string())),
        }
    }
}

/// Due-date rules with the deployment's calendar conventions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueDatePolicy {
    /// Week convention used by the `Weekly` frequency.
    pub week_start: WeekStart,
}

impl DueDatePolicy {
    /// Create a policy with the given week convention.
    pub fn new(week_start: WeekStart) -> Self {
        Self { week_start }
    }

    /// Deadline of the cycle that starts at `start` for the given frequency
    /// label. `now` is only consulted when `start` is absent.
    pub fn due_date(
        &self,
        start: Option<NaiveDateTime>,
        frequency: Option<&str>,
        now: NaiveDateTime,
    ) -> NaiveDateTime {
        let Some(start) = start else {
            return end_of_day(last_day_of_month(now.date()));
        };
        let date = start.date();

        let last = match frequency.and_then(Frequency::from_label) {
            Some(Frequency::Daily) => date,
            Some(Frequency::Weekly) => last_day_of_week(date, self.week_start),
            Some(Frequency::Monthly) | None => last_day_of_month(date),
            Some(Frequency::Quarterly) => last_day_of_month(add_months(date, 3)),
            Some(Frequency::BiAnnually) => last_day_of_month(add_months(date, 6)),
            Some(Frequency::Annually) => last_day_of_year(date),
        };
        end_of_day(last)
    }
}

/// Deadline using the default (Monday-start) calendar.
pub fn due_date(
    start: Option<NaiveDateTime>,
    frequency: Option<&str>,
    now: NaiveDateTime,
) -> NaiveDateTime {
    DueDatePolicy::default().due_date(start, frequency, now)
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(END_OF_DAY)
}

fn last_day_of_week(date: NaiveDate, week_start: WeekStart) -> NaiveDate {
    let last = week_start.last_day().num_days_from_monday();
    let today = date.weekday().num_days_from_monday();
    let ahead = (last + 7 - today) % 7;
    date.checked_add_days(Days::new(u64::from(ahead)))
        .unwrap_or(NaiveDate::MAX)
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

fn last_day_of_year(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(NaiveDate::MAX)
}

fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn eod(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap()
    }

    fn now() -> NaiveDateTime {
        at(2024, 2, 15, 10, 30)
    }

    #[test]
    fn missing_start_uses_end_of_current_month() {
        assert_eq!(due_date(None, Some("Daily"), now()), eod(2024, 2, 29));
        assert_eq!(due_date(None, None, now()), eod(2024, 2, 29));
    }

    #[test]
    fn daily_ends_same_day() {
        let start = at(2024, 3, 10, 8, 15);
        assert_eq!(due_date(Some(start), Some("Daily"), now()), eod(2024, 3, 10));
    }

    #[test]
    fn weekly_monday_start_ends_on_sunday() {
        // 2024-03-06 is a Wednesday.
        let start = at(2024, 3, 6, 9, 0);
        assert_eq!(due_date(Some(start), Some("Weekly"), now()), eod(2024, 3, 10));
        // A Sunday is already the last day of its week.
        let sunday = at(2024, 3, 10, 9, 0);
        assert_eq!(due_date(Some(sunday), Some("Weekly"), now()), eod(2024, 3, 10));
    }

    #[test]
    fn weekly_sunday_start_ends_on_saturday() {
        let policy = DueDatePolicy::new(WeekStart::Sunday);
        let sunday = at(2024, 3, 10, 9, 0);
        assert_eq!(
            policy.due_date(Some(sunday), Some("Weekly"), now()),
            eod(2024, 3, 16)
        );
        let saturday = at(2024, 3, 16, 9, 0);
        assert_eq!(
            policy.due_date(Some(saturday), Some("Weekly"), now()),
            eod(2024, 3, 16)
        );
    }

    #[test]
    fn monthly_ends_with_start_month() {
        let start = at(2024, 3, 10, 0, 0);
        assert_eq!(due_date(Some(start), Some("Monthly"), now()), eod(2024, 3, 31));
    }

    #[test]
    fn quarterly_adds_three_months() {
        let start = at(2024, 3, 10, 0, 0);
        assert_eq!(due_date(Some(start), Some("Quarterly"), now()), eod(2024, 6, 30));
    }

    #[test]
    fn quarterly_clamps_short_target_month() {
        let start = at(2024, 11, 30, 12, 0);
        assert_eq!(due_date(Some(start), Some("Quarterly"), now()), eod(2025, 2, 28));
        let leap = at(2023, 11, 30, 12, 0);
        assert_eq!(due_date(Some(leap), Some("Quarterly"), now()), eod(2024, 2, 29));
    }

    #[test]
    fn bi_annually_adds_six_months() {
        let start = at(2024, 3, 10, 0, 0);
        assert_eq!(
            due_date(Some(start), Some("Bi-annually"), now()),
            eod(2024, 9, 30)
        );
        let late = at(2024, 8, 31, 0, 0);
        assert_eq!(
            due_date(Some(late), Some("Bi-annually"), now()),
            eod(2025, 2, 28)
        );
    }

    #[test]
    fn annually_ends_with_start_year() {
        let start = at(2024, 3, 10, 0, 0);
        assert_eq!(due_date(Some(start), Some("Annually"), now()), eod(2024, 12, 31));
    }

    #[test]
    fn unknown_or_missing_frequency_falls_back_to_monthly() {
        let start = at(2024, 3, 10, 0, 0);
        assert_eq!(due_date(Some(start), Some("bogus"), now()), eod(2024, 3, 31));
        assert_eq!(due_date(Some(start), Some("monthly"), now()), eod(2024, 3, 31));
        assert_eq!(due_date(Some(start), None, now()), eod(2024, 3, 31));
    }

    #[test]
    fn december_start_rolls_into_next_year() {
        let start = at(2024, 12, 5, 0, 0);
        assert_eq!(due_date(Some(start), Some("Monthly"), now()), eod(2024, 12, 31));
        assert_eq!(due_date(Some(start), Some("Quarterly"), now()), eod(2025, 3, 31));
    }

    #[test]
    fn week_start_parses_config_values() {
        assert_eq!("Monday".parse::<WeekStart>().unwrap(), WeekStart::Monday);
        assert_eq!(" sun ".parse::<WeekStart>().unwrap(), WeekStart::Sunday);
        assert!("friday".parse::<WeekStart>().is_err());
    }

    fn any_start() -> impl Strategy<Value = NaiveDateTime> {
        (1990i32..2100, 1u32..=12, 1u32..=28, 0u32..24, 0u32..60)
            .prop_map(|(y, m, d, h, min)| at(y, m, d, h, min))
    }

    fn any_label() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            Just(None),
            Just(Some("Daily".to_string())),
            Just(Some("Weekly".to_string())),
            Just(Some("Monthly".to_string())),
            Just(Some("Quarterly".to_string())),
            Just(Some("Bi-annually".to_string())),
            Just(Some("Annually".to_string())),
            "[a-z]{0,12}".prop_map(Some),
        ]
    }

    proptest! {
        #[test]
        fn deadline_never_precedes_start(start in any_start(), label in any_label()) {
            let due = due_date(Some(start), label.as_deref(), now());
            prop_assert!(due >= start);
            prop_assert_eq!(due.time(), END_OF_DAY);
        }

        #[test]
        fn unrecognized_labels_match_monthly(start in any_start(), label in "[a-z]{0,12}") {
            prop_assert_eq!(
                due_date(Some(start), Some(&label), now()),
                due_date(Some(start), Some("Monthly"), now())
            );
        }

        #[test]
        fn weekly_deadline_is_within_seven_days(start in any_start()) {
            for policy in [DueDatePolicy::new(WeekStart::Monday), DueDatePolicy::new(WeekStart::Sunday)] {
                let due = policy.due_date(Some(start), Some("Weekly"), now());
                prop_assert!((due.date() - start.date()).num_days() < 7);
                prop_assert_eq!(due.weekday(), policy.week_start.last_day());
            }
        }
    }
}
