/*!
 # Timeline projection

 Pure projection of profile schedules into per-weekday
 `(start_minute, end_minute, color_hex)` lists for rendering. Intervals
 crossing midnight are split into a same-day remainder and a next-day
 head. No side effects; safe to call at arbitrary refresh rates.
*/

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDate, Timelike};
use indexmap::IndexMap;

use crate::protocol::Palette;
use crate::schedule::{
    local_datetime, parse_hhmm, DaySchedule, Profile, ScheduleEngine, DAYS,
};
use crate::sun::{sun_times, Location};

/// Minutes-of-day interval with the color to draw it in
pub type DrawInterval = (u32, u32, String);

const DAY_MINUTES: i64 = 24 * 60;

/// Projects one profile into drawable intervals for every weekday.
///
/// Each weekday is expanded against its next occurrence from `today`, so
/// sun-relative entries resolve with that date's actual sun times.
pub fn profile_day_intervals(
    profile: &Profile,
    palette: &Palette,
    location: &Location,
    today: NaiveDate,
) -> IndexMap<String, Vec<DrawInterval>> {
    let today_idx = today.weekday().num_days_from_monday() as i64;

    let mut result = IndexMap::new();
    for (idx, day) in DAYS.iter().enumerate() {
        let ref_date = today + ChronoDuration::days((idx as i64 - today_idx).rem_euclid(7));
        let intervals = profile
            .schedule
            .get(*day)
            .map(|entry| day_draw_intervals(entry, palette, location, ref_date))
            .unwrap_or_default();
        result.insert(day.to_string(), intervals);
    }
    result
}

/// Union of all active profiles' intervals, sorted by start per day
pub fn active_day_intervals(
    engine: &ScheduleEngine,
    palette: &Palette,
    location: &Location,
    today: NaiveDate,
) -> IndexMap<String, Vec<DrawInterval>> {
    let mut combined: IndexMap<String, Vec<DrawInterval>> = DAYS
        .iter()
        .map(|day| (day.to_string(), Vec::new()))
        .collect();

    for profile in engine.profiles().values() {
        if !profile.active {
            continue;
        }
        let intervals = profile_day_intervals(profile, palette, location, today);
        for day in DAYS {
            combined[day].extend(intervals[day].iter().cloned());
        }
    }
    for day in DAYS {
        combined[day].sort_by_key(|(start, _, _)| *start);
    }
    combined
}

fn day_draw_intervals(
    entry: &DaySchedule,
    palette: &Palette,
    location: &Location,
    ref_date: NaiveDate,
) -> Vec<DrawInterval> {
    let hex = palette
        .find(&entry.color)
        .map(|c| c.hex.clone())
        .unwrap_or_else(|| "#ffffff".to_string());

    let sun = || sun_times(location.latitude, location.longitude, ref_date);

    let on = if entry.sunrise {
        sun().map(|(sr, _)| sr + ChronoDuration::minutes(entry.sunrise_offset as i64))
    } else {
        explicit(&entry.on_time, ref_date)
    };
    let off = if entry.sunset {
        sun().map(|(_, ss)| ss + ChronoDuration::minutes(entry.sunset_offset as i64))
    } else {
        explicit(&entry.off_time, ref_date)
    };

    let mut intervals = Vec::new();
    if let (Some(on), Some(off)) = (on, off) {
        push_split(&mut intervals, on, off, &hex);
    }
    if let (Some(on2), Some(off2)) = (
        explicit(&entry.on_time_2, ref_date),
        explicit(&entry.off_time_2, ref_date),
    ) {
        push_split(&mut intervals, on2, off2, &hex);
    }
    intervals
}

fn explicit(value: &str, date: NaiveDate) -> Option<DateTime<Local>> {
    if value.is_empty() {
        return None;
    }
    parse_hhmm(value).and_then(|t| local_datetime(date, t))
}

fn push_split(
    intervals: &mut Vec<DrawInterval>,
    on: DateTime<Local>,
    mut off: DateTime<Local>,
    hex: &str,
) {
    if off <= on {
        off += ChronoDuration::days(1);
    }
    let start = (on.hour() * 60 + on.minute()) as i64;
    let end = start + (off - on).num_minutes();
    if end > DAY_MINUTES {
        intervals.push((start as u32, DAY_MINUTES as u32, hex.to_string()));
        if end - DAY_MINUTES > 0 {
            intervals.push((0, (end - DAY_MINUTES) as u32, hex.to_string()));
        }
    } else {
        intervals.push((start as u32, end as u32, hex.to_string()));
    }
}
