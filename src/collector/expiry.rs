//! Expiry date resolution
//!
//! Monthly contracts expire on the last Thursday of the month unless a holiday
//! pulls the date earlier. Dynamic discovery reads the real dates off the
//! instrument universe; the calendar rule is the fallback.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use std::collections::BTreeSet;

use super::Universes;

/// Weekly dates produced in static mode
const STATIC_WEEKLY_COUNT: usize = 2;

/// Last Thursday of the given month
pub fn last_thursday(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = following_month(year, month);
    let last_day = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    let back = (last_day.weekday().num_days_from_monday() + 7
        - Weekday::Thu.num_days_from_monday())
        % 7;
    last_day.checked_sub_days(Days::new(u64::from(back)))
}

pub fn this_month_expiry(today: NaiveDate) -> Option<NaiveDate> {
    last_thursday(today.year(), today.month())
}

pub fn next_month_expiry(today: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = following_month(today.year(), today.month());
    last_thursday(year, month)
}

fn following_month(year: i32, month: u32) -> (i32, u32) {
    if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

#[derive(Debug, Clone, Copy)]
pub struct ExpiryResolver {
    dynamic: bool,
}

impl ExpiryResolver {
    pub fn new(dynamic: bool) -> Self {
        Self { dynamic }
    }

    /// Non-monthly expiries, ascending
    pub fn weekly_expiries(
        &self,
        universes: &Universes,
        index: &str,
        atm: i64,
        today: NaiveDate,
    ) -> Vec<NaiveDate> {
        if !self.dynamic {
            return calendar_weeklies(today, STATIC_WEEKLY_COUNT);
        }

        let discovered = discover(universes, index, atm);
        discovered
            .iter()
            .copied()
            .filter(|date| !is_month_end(&discovered, *date))
            .collect()
    }

    /// (this month, next month)
    pub fn monthly_expiries(
        &self,
        universes: &Universes,
        index: &str,
        atm: i64,
        today: NaiveDate,
    ) -> (Option<NaiveDate>, Option<NaiveDate>) {
        if !self.dynamic {
            return (this_month_expiry(today), next_month_expiry(today));
        }

        let discovered = discover(universes, index, atm);
        let (year, month) = (today.year(), today.month());
        let (next_year, next_month) = following_month(year, month);
        (
            latest_in_month(&discovered, year, month),
            latest_in_month(&discovered, next_year, next_month),
        )
    }
}

/// Distinct expiries of option contracts on `index` struck exactly at `atm`
fn discover(universes: &Universes, index: &str, atm: i64) -> BTreeSet<NaiveDate> {
    universes
        .iter()
        .filter(|inst| inst.is_option() && inst.name == index && inst.strike == atm as f64)
        .filter_map(|inst| inst.expiry)
        .collect()
}

fn latest_in_month(dates: &BTreeSet<NaiveDate>, year: i32, month: u32) -> Option<NaiveDate> {
    dates
        .iter()
        .rev()
        .find(|d| d.year() == year && d.month() == month)
        .copied()
}

fn is_month_end(dates: &BTreeSet<NaiveDate>, date: NaiveDate) -> bool {
    !dates.iter().any(|d| *d > date && same_month(*d, date))
}

/// Upcoming Thursdays on or after `today` that are not calendar month-ends
fn calendar_weeklies(today: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let ahead = (Weekday::Thu.num_days_from_monday() + 7
        - today.weekday().num_days_from_monday())
        % 7;
    let Some(first) = today.checked_add_days(Days::new(u64::from(ahead))) else {
        return Vec::new();
    };

    first
        .iter_weeks()
        .filter(|thu| last_thursday(thu.year(), thu.month()) != Some(*thu))
        .take(count)
        .collect()
}
