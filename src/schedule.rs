/*!
 # Weekly schedule profiles

 Named, independently activatable weekly schedules ("profiles"), their
 persistence, conflict detection between active profiles, and the
 evaluation that resolves all active profiles into a single lamp state
 for a given instant.

 Weekday keys and the built-in color names are Hungarian strings; they
 are the on-disk identity format, not display strings, so they stay
 as-is.
*/

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveTime, TimeZone};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::protocol::{Color, Palette};
use crate::settings::{LEGACY_SCHEDULE_FILE, PROFILES_FILE};
use crate::sun::SunTimes;
use crate::{Error, Result};

/// Weekday names in schedule order (Monday first). These are the keys of
/// the persisted schedule maps.
pub const DAYS: [&str; 7] = [
    "Hétfő",
    "Kedd",
    "Szerda",
    "Csütörtök",
    "Péntek",
    "Szombat",
    "Vasárnap",
];

/// Name of the profile synthesized when nothing can be loaded
pub const DEFAULT_PROFILE_NAME: &str = "Alapértelmezett";

/// Minutes in a day, the split point for midnight-crossing intervals
const DAY_MINUTES: u32 = 24 * 60;

/// Schedule weekday name for a date
pub fn day_name(date: NaiveDate) -> &'static str {
    DAYS[date.weekday().num_days_from_monday() as usize]
}

/// Parses a strict 24-hour `HH:MM` string
pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

/// Local wall-clock instant for a date and time; `None` on a nonexistent
/// local time (DST gap)
pub fn local_datetime(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&date.and_time(time)).earliest()
}

/// One weekday's rule within a profile.
///
/// Empty time strings mean "unset". When `sunrise` is true the `on_time`
/// field is inert (the sun instant is the source of the on time), and
/// symmetrically for `sunset`/`off_time`. The second on/off pair is
/// explicit-times-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySchedule {
    pub color: String,
    pub on_time: String,
    pub off_time: String,
    pub sunrise: bool,
    pub sunrise_offset: i32,
    pub sunset: bool,
    pub sunset_offset: i32,
    pub on_time_2: String,
    pub off_time_2: String,
}

impl DaySchedule {
    /// Blank rule with the given default color name
    pub fn blank(color: &str) -> DaySchedule {
        DaySchedule {
            color: color.to_string(),
            on_time: String::new(),
            off_time: String::new(),
            sunrise: false,
            sunrise_offset: 0,
            sunset: false,
            sunset_offset: 0,
            on_time_2: String::new(),
            off_time_2: String::new(),
        }
    }

    /// Merges a persisted JSON object over a default, replacing malformed
    /// fields with the default instead of failing.
    fn from_value(value: &Value, default: &DaySchedule) -> DaySchedule {
        DaySchedule {
            color: string_field(value, "color", &default.color),
            on_time: string_field(value, "on_time", &default.on_time),
            off_time: string_field(value, "off_time", &default.off_time),
            sunrise: bool_field(value, "sunrise", default.sunrise),
            sunrise_offset: offset_field(value, "sunrise_offset"),
            sunset: bool_field(value, "sunset", default.sunset),
            sunset_offset: offset_field(value, "sunset_offset"),
            on_time_2: string_field(value, "on_time_2", &default.on_time_2),
            off_time_2: string_field(value, "off_time_2", &default.off_time_2),
        }
    }
}

fn string_field(value: &Value, key: &str, default: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => default.to_string(),
    }
}

fn bool_field(value: &Value, key: &str, default: bool) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn offset_field(value: &Value, key: &str) -> i32 {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) as i32,
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// A full week of day rules, keyed by the names in [`DAYS`]
pub type WeekSchedule = IndexMap<String, DaySchedule>;

/// A named weekly schedule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub active: bool,
    pub schedule: WeekSchedule,
}

/// Result of evaluating all active profiles at an instant
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// An interval covers the instant; the lamp should show this color
    Active(Color),
    /// The schedule is non-empty but no interval covers the instant
    Off,
    /// No resolvable schedule entry exists at all; leave the lamp alone
    NoSchedule,
}

/// Owns the profile collection and its persistence.
///
/// Every mutation rewrites the whole profile file. The first profile of
/// the collection is protected from deletion.
pub struct ScheduleEngine {
    path: PathBuf,
    profiles: IndexMap<String, Profile>,
    default_profile: String,
}

impl ScheduleEngine {
    /// Loads profiles from `dir`.
    ///
    /// Falls back to migrating the legacy single-schedule file when the
    /// profile store is missing or unreadable, and synthesizes a default
    /// profile when neither file yields anything.
    pub fn load(dir: &Path, palette: &Palette) -> ScheduleEngine {
        let path = dir.join(PROFILES_FILE);
        let default_schedule = Self::default_schedule(palette);

        let mut profiles: IndexMap<String, Profile> = IndexMap::new();
        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<IndexMap<String, Value>>(&raw) {
                Ok(stored) => {
                    for (name, value) in stored {
                        let active = value.get("active").and_then(Value::as_bool).unwrap_or(true);
                        let schedule = merge_week(value.get("schedule"), &default_schedule);
                        profiles.insert(name, Profile { active, schedule });
                    }
                }
                Err(e) => warn!("Profile store {} is corrupt: {}", path.display(), e),
            },
            Err(_) => debug!("No profile store at {}", path.display()),
        }

        if profiles.is_empty() {
            let legacy = dir.join(LEGACY_SCHEDULE_FILE);
            if let Ok(raw) = fs::read_to_string(&legacy) {
                match serde_json::from_str::<Value>(&raw) {
                    Ok(value) => {
                        info!("Migrating legacy schedule file {}", legacy.display());
                        let schedule = merge_week(Some(&value), &default_schedule);
                        profiles.insert(
                            DEFAULT_PROFILE_NAME.to_string(),
                            Profile {
                                active: true,
                                schedule,
                            },
                        );
                    }
                    Err(e) => warn!("Legacy schedule {} is corrupt: {}", legacy.display(), e),
                }
            }
        }

        if profiles.is_empty() {
            profiles.insert(
                DEFAULT_PROFILE_NAME.to_string(),
                Profile {
                    active: true,
                    schedule: default_schedule,
                },
            );
        }

        let default_profile = profiles
            .keys()
            .next()
            .expect("collection is never empty")
            .clone();
        ScheduleEngine {
            path,
            profiles,
            default_profile,
        }
    }

    /// Blank week, color defaulted to the first palette color if any
    pub fn default_schedule(palette: &Palette) -> WeekSchedule {
        let color = palette.first_color_name().unwrap_or("");
        DAYS.iter()
            .map(|day| (day.to_string(), DaySchedule::blank(color)))
            .collect()
    }

    pub fn profiles(&self) -> &IndexMap<String, Profile> {
        &self.profiles
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Name of the protected profile
    pub fn default_profile_name(&self) -> &str {
        &self.default_profile
    }

    /// Creates a new, inactive profile with a blank schedule
    pub fn add_profile(&mut self, name: &str, palette: &Palette) -> Result<()> {
        if name.is_empty() {
            return Err(Error::UnknownProfile(name.to_string()));
        }
        if self.profiles.contains_key(name) {
            return Err(Error::DuplicateProfile(name.to_string()));
        }
        self.profiles.insert(
            name.to_string(),
            Profile {
                active: false,
                schedule: Self::default_schedule(palette),
            },
        );
        self.save()
    }

    /// Deletes a profile; the default profile is refused
    pub fn delete_profile(&mut self, name: &str) -> Result<()> {
        if name == self.default_profile {
            return Err(Error::ProtectedProfile(name.to_string()));
        }
        if self.profiles.shift_remove(name).is_none() {
            return Err(Error::UnknownProfile(name.to_string()));
        }
        self.save()
    }

    /// Replaces a profile's schedule after validating every explicit time.
    ///
    /// An unparsable HH:MM value is rejected with a field-specific error
    /// and nothing is persisted.
    pub fn update_schedule(&mut self, name: &str, schedule: WeekSchedule) -> Result<()> {
        validate_schedule(&schedule)?;
        let profile = self
            .profiles
            .get_mut(name)
            .ok_or_else(|| Error::UnknownProfile(name.to_string()))?;
        profile.schedule = schedule;
        self.save()
    }

    /// Activates or deactivates a profile.
    ///
    /// Activation is refused (the profile stays inactive and nothing is
    /// persisted) when the profile's explicit intervals overlap any
    /// already-active profile's.
    pub fn set_active(&mut self, name: &str, active: bool) -> Result<()> {
        if !self.profiles.contains_key(name) {
            return Err(Error::UnknownProfile(name.to_string()));
        }
        if active {
            let conflicts = self.check_conflicts(name);
            if !conflicts.is_empty() {
                self.profiles[name].active = false;
                return Err(Error::ProfileConflicts {
                    name: name.to_string(),
                    conflicts,
                });
            }
        }
        self.profiles[name].active = active;
        self.save()
    }

    /// Compares `target_name`'s explicit intervals against every other
    /// active profile's, per weekday. Midnight-crossing intervals are
    /// split at 24:00 with the tail attributed to the next weekday, so
    /// cross-midnight overlaps with the following day are caught.
    /// Sun-based entries are excluded: their timing is location- and
    /// date-dependent.
    ///
    /// Returns at most one `"Day - OtherProfile"` entry per other profile.
    pub fn check_conflicts(&self, target_name: &str) -> Vec<String> {
        let Some(target) = self.profiles.get(target_name) else {
            return Vec::new();
        };
        let target_pieces = weekly_pieces(&target.schedule);

        let mut conflicts = Vec::new();
        for (other_name, other) in &self.profiles {
            if other_name == target_name || !other.active {
                continue;
            }
            let other_pieces = weekly_pieces(&other.schedule);
            'days: for idx in 0..DAYS.len() {
                for &(s1, e1) in &target_pieces[idx] {
                    for &(s2, e2) in &other_pieces[idx] {
                        if s1 < e2 && s2 < e1 {
                            conflicts.push(format!("{} - {}", DAYS[idx], other_name));
                            break 'days;
                        }
                    }
                }
            }
        }
        conflicts
    }

    /// Resolves all active profiles at `now`.
    ///
    /// Each active profile's rules for yesterday and today are expanded
    /// into concrete intervals (sun-based instants resolve only for
    /// today, since sun times are computed once per day). The first
    /// interval containing `now` wins, in profile insertion order,
    /// yesterday before today within a profile.
    pub fn evaluate(&self, palette: &Palette, now: DateTime<Local>, sun: &SunTimes) -> Outcome {
        let today = now.date_naive();
        let yesterday = today - ChronoDuration::days(1);

        let mut any_entry = false;
        let mut intervals: Vec<(DateTime<Local>, DateTime<Local>, &Color)> = Vec::new();

        for profile in self.profiles.values() {
            if !profile.active {
                continue;
            }
            for ref_date in [yesterday, today] {
                let Some(day) = profile.schedule.get(day_name(ref_date)) else {
                    continue;
                };
                for (on, off) in resolve_day(day, ref_date, today, sun) {
                    any_entry = true;
                    if let Some(color) = palette.find(&day.color) {
                        intervals.push((on, off, color));
                    }
                }
            }
        }

        for (start, end, color) in &intervals {
            if *start <= now && now < *end {
                return Outcome::Active((*color).clone());
            }
        }
        if any_entry {
            Outcome::Off
        } else {
            Outcome::NoSchedule
        }
    }

    /// Rewrites the whole profile collection to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.profiles)?)?;
        Ok(())
    }
}

fn merge_week(value: Option<&Value>, default: &WeekSchedule) -> WeekSchedule {
    let mut merged = WeekSchedule::new();
    for day in DAYS {
        let fallback = &default[day];
        let entry = match value.and_then(|v| v.get(day)) {
            Some(v @ Value::Object(_)) => DaySchedule::from_value(v, fallback),
            _ => fallback.clone(),
        };
        merged.insert(day.to_string(), entry);
    }
    merged
}

fn validate_schedule(schedule: &WeekSchedule) -> Result<()> {
    for (day, entry) in schedule {
        let checks: [(&'static str, &str, bool); 4] = [
            ("on_time", &entry.on_time, entry.sunrise),
            ("off_time", &entry.off_time, entry.sunset),
            ("on_time_2", &entry.on_time_2, false),
            ("off_time_2", &entry.off_time_2, false),
        ];
        for (field, value, sun_based) in checks {
            if sun_based || value.is_empty() {
                continue;
            }
            if parse_hhmm(value).is_none() {
                return Err(Error::InvalidTime {
                    day: day.clone(),
                    field,
                    value: value.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Expands one day rule against a reference date into concrete intervals.
///
/// Sun-based instants resolve only when the reference date is today. If
/// the off instant is not after the on instant, a single day is added to
/// the off side (one midnight wrap, never two).
fn resolve_day(
    day: &DaySchedule,
    ref_date: NaiveDate,
    today: NaiveDate,
    sun: &SunTimes,
) -> Vec<(DateTime<Local>, DateTime<Local>)> {
    let mut intervals = Vec::new();

    let on = if day.sunrise {
        (ref_date == today)
            .then_some(sun.sunrise)
            .flatten()
            .map(|sr| sr + ChronoDuration::minutes(day.sunrise_offset as i64))
    } else {
        explicit_instant(&day.on_time, ref_date)
    };
    let off = if day.sunset {
        (ref_date == today)
            .then_some(sun.sunset)
            .flatten()
            .map(|ss| ss + ChronoDuration::minutes(day.sunset_offset as i64))
    } else {
        explicit_instant(&day.off_time, ref_date)
    };
    if let (Some(on), Some(off)) = (on, off) {
        intervals.push(wrap_interval(on, off));
    }

    let on2 = explicit_instant(&day.on_time_2, ref_date);
    let off2 = explicit_instant(&day.off_time_2, ref_date);
    if let (Some(on2), Some(off2)) = (on2, off2) {
        intervals.push(wrap_interval(on2, off2));
    }

    intervals
}

fn explicit_instant(value: &str, date: NaiveDate) -> Option<DateTime<Local>> {
    if value.is_empty() {
        return None;
    }
    parse_hhmm(value).and_then(|t| local_datetime(date, t))
}

fn wrap_interval(on: DateTime<Local>, mut off: DateTime<Local>) -> (DateTime<Local>, DateTime<Local>) {
    if off <= on {
        off += ChronoDuration::days(1);
    }
    (on, off)
}

/// Per-weekday explicit intervals in minutes, wraps split at midnight.
///
/// The first on/off pair is skipped entirely when either sun flag is set;
/// the second pair is always explicit.
fn weekly_pieces(schedule: &WeekSchedule) -> [Vec<(u32, u32)>; 7] {
    let mut pieces: [Vec<(u32, u32)>; 7] = Default::default();
    for (idx, day) in DAYS.iter().enumerate() {
        let Some(entry) = schedule.get(*day) else {
            continue;
        };
        for (start, end) in explicit_minute_pairs(entry) {
            if end > DAY_MINUTES {
                pieces[idx].push((start, DAY_MINUTES));
                if end - DAY_MINUTES > 0 {
                    pieces[(idx + 1) % 7].push((0, end - DAY_MINUTES));
                }
            } else {
                pieces[idx].push((start, end));
            }
        }
    }
    pieces
}

fn explicit_minute_pairs(day: &DaySchedule) -> Vec<(u32, u32)> {
    fn minutes(t: NaiveTime) -> u32 {
        use chrono::Timelike;
        t.hour() * 60 + t.minute()
    }
    fn pair(on: &str, off: &str) -> Option<(u32, u32)> {
        let on = parse_hhmm(on)?;
        let off = parse_hhmm(off)?;
        let start = minutes(on);
        let mut end = minutes(off);
        if end <= start {
            end += DAY_MINUTES;
        }
        Some((start, end))
    }

    let mut pairs = Vec::new();
    if !day.sunrise && !day.sunset {
        if let Some(p) = pair(&day.on_time, &day.off_time) {
            pairs.push(p);
        }
    }
    if let Some(p) = pair(&day.on_time_2, &day.off_time_2) {
        pairs.push(p);
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Palette;
    use tempfile::TempDir;

    // 2024-07-01 is a Monday
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
    }

    fn at(date: NaiveDate, hour: u32, minute: u32) -> DateTime<Local> {
        local_datetime(date, NaiveTime::from_hms_opt(hour, minute, 0).unwrap()).unwrap()
    }

    fn engine(dir: &TempDir, palette: &Palette) -> ScheduleEngine {
        ScheduleEngine::load(dir.path(), palette)
    }

    fn set_day(
        engine: &mut ScheduleEngine,
        palette: &Palette,
        profile: &str,
        day: &str,
        patch: impl FnOnce(&mut DaySchedule),
    ) {
        let mut schedule = engine
            .get(profile)
            .map(|p| p.schedule.clone())
            .unwrap_or_else(|| ScheduleEngine::default_schedule(palette));
        patch(schedule.get_mut(day).unwrap());
        engine.update_schedule(profile, schedule).unwrap();
    }

    #[test]
    fn default_schedule_has_seven_blank_days() {
        let palette = Palette::builtin();
        let schedule = ScheduleEngine::default_schedule(&palette);
        assert_eq!(schedule.len(), 7);
        for day in DAYS {
            let entry = &schedule[day];
            assert_eq!(entry.color, "Piros");
            assert_eq!(entry.on_time, "");
            assert_eq!(entry.off_time, "");
            assert!(!entry.sunrise);
            assert_eq!(entry.sunrise_offset, 0);
            assert!(!entry.sunset);
            assert_eq!(entry.sunset_offset, 0);
            assert_eq!(entry.on_time_2, "");
            assert_eq!(entry.off_time_2, "");
        }
    }

    #[test]
    fn evaluate_same_day_interval() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        set_day(&mut engine, &palette, DEFAULT_PROFILE_NAME, "Hétfő", |d| {
            d.on_time = "08:00".into();
            d.off_time = "10:00".into();
        });

        let sun = SunTimes::default();
        match engine.evaluate(&palette, at(monday(), 9, 0), &sun) {
            Outcome::Active(color) => assert_eq!(color.name, "Piros"),
            other => panic!("expected Active, got {other:?}"),
        }
        assert_eq!(engine.evaluate(&palette, at(monday(), 11, 0), &sun), Outcome::Off);
        assert_eq!(engine.evaluate(&palette, at(monday(), 7, 59), &sun), Outcome::Off);
        // half-open: the end instant itself is off
        assert_eq!(engine.evaluate(&palette, at(monday(), 10, 0), &sun), Outcome::Off);
    }

    #[test]
    fn evaluate_midnight_crossing_interval() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        set_day(&mut engine, &palette, DEFAULT_PROFILE_NAME, "Hétfő", |d| {
            d.color = "Kék".into();
            d.on_time = "22:00".into();
            d.off_time = "02:00".into();
        });

        let sun = SunTimes::default();
        let tuesday = monday() + ChronoDuration::days(1);
        match engine.evaluate(&palette, at(monday(), 23, 0), &sun) {
            Outcome::Active(color) => assert_eq!(color.name, "Kék"),
            other => panic!("expected Active, got {other:?}"),
        }
        // yesterday's interval still covers early Tuesday
        match engine.evaluate(&palette, at(tuesday, 1, 0), &sun) {
            Outcome::Active(color) => assert_eq!(color.name, "Kék"),
            other => panic!("expected Active, got {other:?}"),
        }
        // deselected again after the off time
        assert_eq!(engine.evaluate(&palette, at(tuesday, 3, 0), &sun), Outcome::Off);
    }

    #[test]
    fn evaluate_second_interval_pair() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        set_day(&mut engine, &palette, DEFAULT_PROFILE_NAME, "Hétfő", |d| {
            d.on_time = "06:00".into();
            d.off_time = "08:00".into();
            d.on_time_2 = "18:00".into();
            d.off_time_2 = "20:00".into();
        });

        let sun = SunTimes::default();
        assert!(matches!(
            engine.evaluate(&palette, at(monday(), 19, 0), &sun),
            Outcome::Active(_)
        ));
        assert_eq!(engine.evaluate(&palette, at(monday(), 12, 0), &sun), Outcome::Off);
    }

    #[test]
    fn blank_schedule_reports_no_entries() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, &palette);
        assert_eq!(
            engine.evaluate(&palette, at(monday(), 12, 0), &SunTimes::default()),
            Outcome::NoSchedule
        );
    }

    #[test]
    fn sun_based_entry_uses_offset_and_todays_sun() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        set_day(&mut engine, &palette, DEFAULT_PROFILE_NAME, "Hétfő", |d| {
            d.sunrise = true;
            d.sunrise_offset = 30;
            d.off_time = "10:00".into();
        });

        let sun = SunTimes {
            sunrise: Some(at(monday(), 6, 0)),
            sunset: Some(at(monday(), 20, 0)),
        };
        // on = sunrise + 30min = 06:30
        assert_eq!(engine.evaluate(&palette, at(monday(), 6, 15), &sun), Outcome::Off);
        assert!(matches!(
            engine.evaluate(&palette, at(monday(), 7, 0), &sun),
            Outcome::Active(_)
        ));
        // without sun data the entry is inert
        assert_eq!(
            engine.evaluate(&palette, at(monday(), 7, 0), &SunTimes::default()),
            Outcome::NoSchedule
        );
    }

    #[test]
    fn unknown_color_leaves_schedule_nonempty_but_off() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        set_day(&mut engine, &palette, DEFAULT_PROFILE_NAME, "Hétfő", |d| {
            d.color = "Nemlétező".into();
            d.on_time = "08:00".into();
            d.off_time = "10:00".into();
        });
        assert_eq!(
            engine.evaluate(&palette, at(monday(), 9, 0), &SunTimes::default()),
            Outcome::Off
        );
    }

    #[test]
    fn overlap_tie_resolved_in_insertion_order() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        // two active overlapping profiles can only come from disk; the
        // activation gate refuses creating this state through the API
        let raw = serde_json::json!({
            "Esti": {"active": true, "schedule": {"Hétfő": {
                "color": "Kék", "on_time": "08:00", "off_time": "10:00"}}},
            "Reggeli": {"active": true, "schedule": {"Hétfő": {
                "color": "Piros", "on_time": "09:00", "off_time": "11:00"}}},
        });
        fs::write(dir.path().join(PROFILES_FILE), raw.to_string()).unwrap();

        let engine = ScheduleEngine::load(dir.path(), &palette);
        match engine.evaluate(&palette, at(monday(), 9, 30), &SunTimes::default()) {
            Outcome::Active(color) => assert_eq!(color.name, "Kék"),
            other => panic!("expected Active, got {other:?}"),
        }
    }

    #[test]
    fn conflicts_between_overlapping_active_profiles() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        engine.add_profile("P1", &palette).unwrap();
        engine.add_profile("P2", &palette).unwrap();
        set_day(&mut engine, &palette, "P1", "Hétfő", |d| {
            d.on_time = "08:00".into();
            d.off_time = "10:00".into();
        });
        set_day(&mut engine, &palette, "P2", "Hétfő", |d| {
            d.on_time = "09:00".into();
            d.off_time = "11:00".into();
        });
        engine.set_active("P2", true).unwrap();

        let conflicts = engine.check_conflicts("P1");
        assert!(conflicts.contains(&"Hétfő - P2".to_string()));
    }

    #[test]
    fn cross_midnight_conflict_attributed_to_next_day() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        engine.add_profile("Éjjeli", &palette).unwrap();
        engine.add_profile("Hajnali", &palette).unwrap();
        set_day(&mut engine, &palette, "Éjjeli", "Hétfő", |d| {
            d.on_time = "22:00".into();
            d.off_time = "02:00".into();
        });
        set_day(&mut engine, &palette, "Hajnali", "Kedd", |d| {
            d.on_time = "01:00".into();
            d.off_time = "03:00".into();
        });
        engine.set_active("Hajnali", true).unwrap();

        let conflicts = engine.check_conflicts("Éjjeli");
        assert!(conflicts.contains(&"Kedd - Hajnali".to_string()));
    }

    #[test]
    fn sun_based_entries_never_conflict() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        engine.add_profile("Napkeltés", &palette).unwrap();
        set_day(&mut engine, &palette, "Napkeltés", "Hétfő", |d| {
            d.sunrise = true;
            d.off_time = "10:00".into();
        });
        set_day(&mut engine, &palette, DEFAULT_PROFILE_NAME, "Hétfő", |d| {
            d.on_time = "08:00".into();
            d.off_time = "10:00".into();
        });
        engine.set_active("Napkeltés", true).unwrap();
        assert!(engine.check_conflicts(DEFAULT_PROFILE_NAME).is_empty());
    }

    #[test]
    fn activation_refused_on_conflict() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        engine.add_profile("Másik", &palette).unwrap();
        set_day(&mut engine, &palette, DEFAULT_PROFILE_NAME, "Péntek", |d| {
            d.on_time = "18:00".into();
            d.off_time = "22:00".into();
        });
        set_day(&mut engine, &palette, "Másik", "Péntek", |d| {
            d.on_time = "20:00".into();
            d.off_time = "23:00".into();
        });

        let err = engine.set_active("Másik", true).unwrap_err();
        match err {
            Error::ProfileConflicts { conflicts, .. } => {
                assert!(conflicts.contains(&format!("Péntek - {DEFAULT_PROFILE_NAME}")));
            }
            other => panic!("expected ProfileConflicts, got {other:?}"),
        }
        assert!(!engine.get("Másik").unwrap().active);

        // the refused activation was not persisted
        let reloaded = ScheduleEngine::load(dir.path(), &palette);
        assert!(!reloaded.get("Másik").unwrap().active);
    }

    #[test]
    fn save_load_round_trip_is_idempotent() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        engine.add_profile("Hétvégi", &palette).unwrap();
        set_day(&mut engine, &palette, "Hétvégi", "Szombat", |d| {
            d.color = "Lila".into();
            d.on_time = "20:00".into();
            d.off_time = "23:30".into();
            d.sunrise_offset = -15;
        });

        let first: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(PROFILES_FILE)).unwrap())
                .unwrap();

        let reloaded = ScheduleEngine::load(dir.path(), &palette);
        reloaded.save().unwrap();
        let second: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(PROFILES_FILE)).unwrap())
                .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn legacy_flat_file_migrates_into_default_profile() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let legacy = serde_json::json!({
            "Hétfő": {"color": "Zöld", "on_time": "07:00", "off_time": "09:00",
                       "sunrise": false, "sunrise_offset": 0,
                       "sunset": false, "sunset_offset": 0}
        });
        fs::write(dir.path().join(LEGACY_SCHEDULE_FILE), legacy.to_string()).unwrap();

        let engine = ScheduleEngine::load(dir.path(), &palette);
        assert_eq!(engine.profiles().len(), 1);
        let profile = engine.get(DEFAULT_PROFILE_NAME).unwrap();
        assert!(profile.active);
        assert_eq!(profile.schedule["Hétfő"].color, "Zöld");
        assert_eq!(profile.schedule["Hétfő"].on_time, "07:00");
        // days absent from the legacy file get blank defaults
        assert_eq!(profile.schedule["Kedd"].on_time, "");
    }

    #[test]
    fn malformed_persisted_fields_fall_back_to_defaults() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let raw = serde_json::json!({
            "Sérült": {"active": true, "schedule": {"Hétfő": {
                "color": "Kék",
                "on_time": 800,
                "off_time": "10:00",
                "sunrise": "yes",
                "sunrise_offset": "15",
                "sunset_offset": "sok",
            }}}
        });
        fs::write(dir.path().join(PROFILES_FILE), raw.to_string()).unwrap();

        let engine = ScheduleEngine::load(dir.path(), &palette);
        let day = &engine.get("Sérült").unwrap().schedule["Hétfő"];
        assert_eq!(day.on_time, "");
        assert_eq!(day.off_time, "10:00");
        assert!(!day.sunrise);
        assert_eq!(day.sunrise_offset, 15);
        assert_eq!(day.sunset_offset, 0);
    }

    #[test]
    fn invalid_time_rejected_with_field_and_day() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        let mut schedule = ScheduleEngine::default_schedule(&palette);
        schedule.get_mut("Szerda").unwrap().on_time = "25:99".into();

        let err = engine
            .update_schedule(DEFAULT_PROFILE_NAME, schedule)
            .unwrap_err();
        match err {
            Error::InvalidTime { day, field, value } => {
                assert_eq!(day, "Szerda");
                assert_eq!(field, "on_time");
                assert_eq!(value, "25:99");
            }
            other => panic!("expected InvalidTime, got {other:?}"),
        }
        // nothing was persisted
        assert!(!dir.path().join(PROFILES_FILE).exists());
    }

    #[test]
    fn sun_flag_makes_explicit_time_inert_for_validation() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        let mut schedule = ScheduleEngine::default_schedule(&palette);
        {
            let day = schedule.get_mut("Hétfő").unwrap();
            day.sunrise = true;
            day.on_time = "not-a-time".into();
            day.off_time = "21:00".into();
        }
        // on_time is ignored while sunrise is set
        engine.update_schedule(DEFAULT_PROFILE_NAME, schedule).unwrap();
    }

    #[test]
    fn default_profile_cannot_be_deleted() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        assert!(matches!(
            engine.delete_profile(DEFAULT_PROFILE_NAME),
            Err(Error::ProtectedProfile(_))
        ));

        engine.add_profile("Törölhető", &palette).unwrap();
        engine.delete_profile("Törölhető").unwrap();
        assert!(engine.get("Törölhető").is_none());
    }

    #[test]
    fn duplicate_profile_rejected() {
        let palette = Palette::builtin();
        let dir = TempDir::new().unwrap();
        let mut engine = engine(&dir, &palette);
        engine.add_profile("Egyszer", &palette).unwrap();
        assert!(matches!(
            engine.add_profile("Egyszer", &palette),
            Err(Error::DuplicateProfile(_))
        ));
    }
}
