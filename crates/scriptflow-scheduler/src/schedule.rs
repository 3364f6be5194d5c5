//! Next-occurrence calculation for schedule rules.
//!
//! All functions here are pure: the same rule and reference instant always
//! produce the same instants. Local wall-clock times are resolved in the
//! rule's IANA timezone. A time that falls in a DST gap moves forward by an
//! hour; an ambiguous time (DST fall-back) uses the earlier instant.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike,
    Utc,
};
use chrono_tz::Tz;
use scriptflow_core::{MonthDay, Recurrence, ScheduleRule};

use crate::error::{Result, SchedulerError};

/// How far ahead to search for one matching day. Monthly rules for day 31
/// skip at most two months in a row, so this is generous.
const SEARCH_HORIZON_DAYS: i64 = 732;

/// Upper bound on `count` for [`next_occurrences`].
pub const MAX_OCCURRENCES: usize = 100;

/// Reject rules that can never fire or reference an unknown timezone.
pub fn validate(rule: &ScheduleRule) -> Result<()> {
    parse_timezone(&rule.timezone)?;
    let minute = match &rule.recurrence {
        Recurrence::Hourly { minute } => *minute,
        Recurrence::Daily { hour, minute }
        | Recurrence::Weekly { hour, minute, .. }
        | Recurrence::Monthly { hour, minute, .. } => {
            if *hour > 23 {
                return Err(invalid(format!("hour must be 0-23, got {hour}")));
            }
            *minute
        }
    };
    if minute > 59 {
        return Err(invalid(format!("minute must be 0-59, got {minute}")));
    }
    match &rule.recurrence {
        Recurrence::Weekly { days, .. } if days.is_empty() => {
            Err(invalid("weekly schedule needs at least one weekday".into()))
        }
        Recurrence::Monthly {
            day: MonthDay::Day(d),
            ..
        } if !(1..=31).contains(d) => Err(invalid(format!("day of month must be 1-31, got {d}"))),
        _ => Ok(()),
    }
}

/// The first occurrence strictly after `after`, or `None` if the rule never
/// fires again within the search horizon.
pub fn next_occurrence(rule: &ScheduleRule, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    Ok(next_occurrences(rule, after, 1)?.into_iter().next())
}

/// Up to `count` (capped at [`MAX_OCCURRENCES`]) occurrences strictly after
/// `after`, in ascending order.
pub fn next_occurrences(
    rule: &ScheduleRule,
    after: DateTime<Utc>,
    count: usize,
) -> Result<Vec<DateTime<Utc>>> {
    validate(rule)?;
    let tz = parse_timezone(&rule.timezone)?;
    let count = count.min(MAX_OCCURRENCES);

    let mut out = Vec::with_capacity(count);
    let mut cursor = after;
    while out.len() < count {
        match next_after(&rule.recurrence, tz, cursor) {
            Some(next) => {
                out.push(next);
                cursor = next;
            }
            None => break,
        }
    }
    Ok(out)
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| invalid(format!("unknown timezone: {name}")))
}

fn invalid(msg: String) -> SchedulerError {
    SchedulerError::InvalidSchedule(msg)
}

fn next_after(recurrence: &Recurrence, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match recurrence {
        Recurrence::Hourly { minute } => next_hourly(*minute as u32, tz, after),
        Recurrence::Daily { hour, minute }
        | Recurrence::Weekly { hour, minute, .. }
        | Recurrence::Monthly { hour, minute, .. } => {
            let start = after.with_timezone(&tz).date_naive();
            (0..=SEARCH_HORIZON_DAYS)
                .filter_map(|offset| start.checked_add_signed(Duration::days(offset)))
                .filter(|date| matches_date(recurrence, *date))
                .filter_map(|date| date.and_hms_opt(*hour as u32, *minute as u32, 0))
                .filter_map(|naive| resolve_local(tz, naive))
                .find(|instant| *instant > after)
        }
    }
}

/// Hourly rules walk UTC hours so DST transitions neither skip nor repeat
/// an hour.
fn next_hourly(minute: u32, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let base = after.date_naive().and_hms_opt(after.hour(), 0, 0)?.and_utc();
    (0..=48).find_map(|h| {
        let hour_start = base + Duration::hours(h);
        let offset_secs = tz
            .offset_from_utc_datetime(&hour_start.naive_utc())
            .fix()
            .local_minus_utc() as i64;
        let shift = (minute as i64 - offset_secs.div_euclid(60)).rem_euclid(60);
        let candidate = hour_start + Duration::minutes(shift);
        (candidate > after && candidate.with_timezone(&tz).minute() == minute).then_some(candidate)
    })
}

fn matches_date(recurrence: &Recurrence, date: NaiveDate) -> bool {
    match recurrence {
        Recurrence::Hourly { .. } | Recurrence::Daily { .. } => true,
        Recurrence::Weekly { days, .. } => days.contains(&date.weekday()),
        Recurrence::Monthly {
            day: MonthDay::Day(d),
            ..
        } => date.day() == *d as u32,
        Recurrence::Monthly {
            day: MonthDay::Last,
            ..
        } => date.succ_opt().is_some_and(|next| next.day() == 1),
    }
}

fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
