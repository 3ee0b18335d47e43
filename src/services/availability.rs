//! Best common date range for a trip.
//!
//! Every JOINED member with a usable `[start, end]` selection contributes one
//! count to each calendar day of that range. The result is the earliest
//! contiguous window of `num_days` calendar days with the highest total count.
//!
//! Days between the first and last covered day that nobody selected count as
//! zero, so a window never silently jumps over a gap in the calendar.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::member::TripMember;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Parses a stored member date. Accepts plain `YYYY-MM-DD` and full RFC 3339
/// timestamps; anything else is `None`.
pub fn parse_member_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|ts| ts.naive_utc().date())
        })
}

/// The member's selection if they are JOINED and both ends parse into a
/// non-inverted range.
pub fn member_range(member: &TripMember) -> Option<DateRange> {
    if !member.is_joined() {
        return None;
    }
    let start = parse_member_date(member.selected_start_date.as_deref()?)?;
    let end = parse_member_date(member.selected_end_date.as_deref()?)?;
    (start <= end).then_some(DateRange { start, end })
}

/// Per-day count of JOINED members available on that day.
pub fn availability_histogram(members: &[TripMember]) -> BTreeMap<NaiveDate, usize> {
    let mut histogram = BTreeMap::new();
    for range in members.iter().filter_map(member_range) {
        for day in range.start.iter_days().take_while(|day| *day <= range.end) {
            *histogram.entry(day).or_insert(0) += 1;
        }
    }
    histogram
}

/// Computes the recommended trip window, or `None` when there is nothing to
/// recommend: no usable selections, `num_days < 1`, or an observed span
/// shorter than `num_days`.
pub fn best_date_range(members: &[TripMember], num_days: i64) -> Option<DateRange> {
    if num_days < 1 {
        return None;
    }
    let histogram = availability_histogram(members);
    let (&first, _) = histogram.first_key_value()?;
    let (&last, _) = histogram.last_key_value()?;
    if (last - first).num_days() + 1 < num_days {
        return None;
    }

    let count_on = |day: NaiveDate| histogram.get(&day).copied().unwrap_or(0);
    let window_end = |start: NaiveDate| start + Duration::days(num_days - 1);

    let mut start = first;
    let mut sum: usize = start
        .iter_days()
        .take(num_days as usize)
        .map(count_on)
        .sum();
    let mut best = (start, sum);

    // Slide one day at a time until the window's end reaches the last day.
    while window_end(start) < last {
        let next = start + Duration::days(1);
        sum = sum + count_on(window_end(next)) - count_on(start);
        start = next;
        if sum > best.1 {
            best = (start, sum);
        }
    }

    Some(DateRange {
        start: best.0,
        end: window_end(best.0),
    })
}
