//! Derivation rules for individual features
//!
//! Each function is a small, pure decision over already-loaded data.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::store::models::{Activity, ActivityType};

/// Smoking activity newer than this marks the user as a current smoker
pub const RECENT_SMOKING_WINDOW_DAYS: i64 = 56;

/// Workout activity is summed over this trailing window
pub const ACTIVITY_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmokingStatus {
    Never = 0,
    Former = 1,
    Current = 2,
}

impl SmokingStatus {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SmokingStatus::Never),
            1 => Some(SmokingStatus::Former),
            2 => Some(SmokingStatus::Current),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Parse a date of birth given as RFC 3339 or `YYYY-MM-DD`
pub fn parse_date_of_birth(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
}

/// Whole years between `dob` and `today`.
///
/// Compares day-of-year, so the birthday counts from its ordinal day.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut years = today.year() - dob.year();
    if today.ordinal() < dob.ordinal() {
        years -= 1;
    }
    years
}

/// Facts the smoking classifier decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmokingFacts {
    pub start_age: Option<i32>,
    pub stop_age: Option<i32>,
    pub has_recent_activity: bool,
    pub current_age: i32,
}

/// Ordered decision table; the first matching row wins.
pub fn classify_smoking_status(facts: SmokingFacts) -> SmokingStatus {
    match facts {
        SmokingFacts {
            start_age: None,
            has_recent_activity: false,
            ..
        } => SmokingStatus::Never,
        SmokingFacts {
            start_age: Some(_),
            stop_age: None,
            ..
        } => SmokingStatus::Current,
        SmokingFacts {
            has_recent_activity: true,
            ..
        } => SmokingStatus::Current,
        SmokingFacts {
            start_age: Some(_),
            stop_age: Some(stop),
            current_age,
            ..
        } if current_age > stop => SmokingStatus::Former,
        _ => SmokingStatus::Never,
    }
}

fn smoke_events(activities: &[Activity]) -> impl Iterator<Item = &Activity> {
    activities
        .iter()
        .filter(|a| a.activity_type == ActivityType::Smoke)
}

/// Whether any smoking was logged within the recent window ending at `now`
pub fn has_recent_smoking(activities: &[Activity], now: DateTime<Utc>) -> bool {
    let since = now - Duration::days(RECENT_SMOKING_WINDOW_DAYS);
    smoke_events(activities).any(|a| a.activity_date >= since && a.activity_date <= now)
}

/// Average cigarettes per day.
///
/// A positive self-reported value wins. Otherwise the logged total is spread
/// over the days since the user started smoking, or over the logged span
/// when that start date is unknown. Rounded up.
pub fn average_smoke_count(
    reported: Option<i32>,
    dob: NaiveDate,
    start_age: Option<i32>,
    activities: &[Activity],
    now: DateTime<Utc>,
) -> i32 {
    if let Some(reported) = reported.filter(|v| *v > 0) {
        return reported;
    }

    let events: Vec<&Activity> = smoke_events(activities).collect();
    if events.is_empty() {
        return 0;
    }
    let total: i64 = events.iter().map(|a| i64::from(a.value.max(0))).sum();

    let today = now.date_naive();
    let since_start = start_age
        .and_then(|age| u32::try_from(age).ok())
        .and_then(|age| dob.checked_add_months(chrono::Months::new(age * 12)))
        .map(|start| (today - start).num_days())
        .filter(|days| *days > 0);

    let days = since_start.unwrap_or_else(|| {
        let first = events.iter().map(|a| a.activity_date).min();
        let last = events.iter().map(|a| a.activity_date).max();
        match (first, last) {
            (Some(first), Some(last)) => (last - first).num_days().max(1),
            _ => 1,
        }
    });

    let avg = (total + days - 1) / days;
    i32::try_from(avg).unwrap_or(i32::MAX)
}

/// Years of smoking used for the Brinkman index, never negative
pub fn smoking_years(start_age: Option<i32>, stop_age: Option<i32>, current_age: i32) -> i64 {
    let Some(start) = start_age else {
        return 0;
    };
    let end = stop_age.unwrap_or(current_age);
    i64::from(end - start).max(0)
}

/// Bucket a raw Brinkman value (years x cigarettes/day) into 0..=3
pub fn brinkman_category(raw: i64) -> i32 {
    match raw {
        r if r <= 0 => 0,
        r if r < 200 => 1,
        r if r < 600 => 2,
        _ => 3,
    }
}

/// Weekly physical activity.
///
/// Once the profile is older than the activity window the logged workouts
/// in that window are authoritative; before that the self-reported value is.
pub fn physical_activity_frequency(
    profile_created_at: Option<DateTime<Utc>>,
    reported: Option<i32>,
    activities: &[Activity],
    now: DateTime<Utc>,
) -> i32 {
    let window_start = now - Duration::days(ACTIVITY_WINDOW_DAYS);
    let profile_predates_window =
        matches!(profile_created_at, Some(created) if created < window_start);

    if !profile_predates_window {
        return reported.unwrap_or(0).max(0);
    }

    let total: i64 = activities
        .iter()
        .filter(|a| a.activity_type == ActivityType::Workout)
        .filter(|a| a.activity_date >= window_start && a.activity_date <= now)
        .map(|a| i64::from(a.value.max(0)))
        .sum();
    i32::try_from(total).unwrap_or(i32::MAX)
}

/// BMI from weight (kg) and height (cm), rounded to one decimal
pub fn compute_bmi(weight_kg: f64, height_cm: f64) -> f64 {
    let meters = height_cm / 100.0;
    let bmi = weight_kg / (meters * meters);
    (bmi * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn activity(kind: ActivityType, value: i32, y: i32, m: u32, d: u32) -> Activity {
        Activity {
            user_id: 1,
            activity_type: kind,
            value,
            activity_date: Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_parse_date_of_birth_formats() {
        let expected = NaiveDate::from_ymd_opt(1975, 6, 1).unwrap();
        assert_eq!(parse_date_of_birth("1975-06-01"), Some(expected));
        assert_eq!(parse_date_of_birth("1975-06-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_date_of_birth("1975-06-01T08:30:00+02:00"), Some(expected));
        assert_eq!(parse_date_of_birth("01/06/1975"), None);
        assert_eq!(parse_date_of_birth(""), None);
    }

    #[test]
    fn test_age_uses_day_of_year() {
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_eq!(age_on(NaiveDate::from_ymd_opt(1975, 6, 1).unwrap(), today), 49);
        assert_eq!(age_on(NaiveDate::from_ymd_opt(1975, 1, 1).unwrap(), today), 50);

        let birthday = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(age_on(NaiveDate::from_ymd_opt(1975, 6, 1).unwrap(), birthday), 50);
    }

    #[test]
    fn test_brinkman_boundaries() {
        assert_eq!(brinkman_category(0), 0);
        assert_eq!(brinkman_category(-5), 0);
        assert_eq!(brinkman_category(1), 1);
        assert_eq!(brinkman_category(199), 1);
        assert_eq!(brinkman_category(200), 2);
        assert_eq!(brinkman_category(599), 2);
        assert_eq!(brinkman_category(600), 3);
        assert_eq!(brinkman_category(10000), 3);
    }

    #[test]
    fn test_brinkman_is_total_and_monotonic() {
        let mut previous = 0;
        for raw in 0..2000 {
            let category = brinkman_category(raw);
            assert!((0..=3).contains(&category));
            assert!(category >= previous);
            previous = category;
        }
    }

    #[test]
    fn test_smoking_years() {
        assert_eq!(smoking_years(Some(20), None, 49), 29);
        assert_eq!(smoking_years(Some(20), Some(30), 49), 10);
        assert_eq!(smoking_years(Some(30), Some(20), 49), 0);
        assert_eq!(smoking_years(None, Some(30), 49), 0);
    }

    #[test]
    fn test_smoking_classifier_covers_all_combinations() {
        for has_start in [false, true] {
            for has_stop in [false, true] {
                for recent in [false, true] {
                    for older_than_stop in [false, true] {
                        let facts = SmokingFacts {
                            start_age: has_start.then_some(20),
                            stop_age: has_stop.then_some(40),
                            has_recent_activity: recent,
                            current_age: if older_than_stop { 49 } else { 40 },
                        };
                        let expected = if !has_start && !recent {
                            SmokingStatus::Never
                        } else if has_start && !has_stop {
                            SmokingStatus::Current
                        } else if recent {
                            SmokingStatus::Current
                        } else if has_start && has_stop && older_than_stop {
                            SmokingStatus::Former
                        } else {
                            SmokingStatus::Never
                        };
                        assert_eq!(classify_smoking_status(facts), expected, "{facts:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_recent_smoking_window() {
        let inside = activity(ActivityType::Smoke, 5, 2024, 11, 10);
        let outside = activity(ActivityType::Smoke, 5, 2024, 10, 1);
        let workout = activity(ActivityType::Workout, 5, 2024, 12, 30);

        assert!(has_recent_smoking(&[inside], now()));
        assert!(!has_recent_smoking(&[outside], now()));
        assert!(!has_recent_smoking(&[workout], now()));
    }

    #[test]
    fn test_average_smoke_count_prefers_reported() {
        let dob = NaiveDate::from_ymd_opt(1975, 6, 1).unwrap();
        let logs = vec![activity(ActivityType::Smoke, 100, 2024, 12, 1)];
        assert_eq!(average_smoke_count(Some(12), dob, Some(20), &logs, now()), 12);
        assert_eq!(average_smoke_count(Some(0), dob, None, &[], now()), 0);
    }

    #[test]
    fn test_average_smoke_count_from_start_date() {
        // Started at 49 on 2024-06-01: 214 days before 2025-01-01.
        let dob = NaiveDate::from_ymd_opt(1975, 6, 1).unwrap();
        let logs = vec![
            activity(ActivityType::Smoke, 1000, 2024, 7, 1),
            activity(ActivityType::Smoke, 71, 2024, 12, 1),
        ];
        // 1071 / 214 = 5.004.. -> 6
        assert_eq!(average_smoke_count(None, dob, Some(49), &logs, now()), 6);
    }

    #[test]
    fn test_average_smoke_count_falls_back_to_logged_span() {
        let dob = NaiveDate::from_ymd_opt(1975, 6, 1).unwrap();
        let logs = vec![
            activity(ActivityType::Smoke, 10, 2024, 12, 1),
            activity(ActivityType::Smoke, 11, 2024, 12, 11),
        ];
        // No start age: 21 cigarettes over 10 days -> 3
        assert_eq!(average_smoke_count(None, dob, None, &logs, now()), 3);

        let single = vec![activity(ActivityType::Smoke, 7, 2024, 12, 1)];
        assert_eq!(average_smoke_count(None, dob, None, &single, now()), 7);
    }

    #[test]
    fn test_physical_activity_uses_log_for_established_profiles() {
        let old_profile = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let new_profile = Some(Utc.with_ymd_and_hms(2024, 12, 30, 0, 0, 0).unwrap());
        let logs = vec![
            activity(ActivityType::Workout, 3, 2024, 12, 28),
            activity(ActivityType::Workout, 4, 2024, 12, 1),
            activity(ActivityType::Smoke, 9, 2024, 12, 29),
        ];

        assert_eq!(physical_activity_frequency(old_profile, Some(5), &logs, now()), 3);
        assert_eq!(physical_activity_frequency(new_profile, Some(5), &logs, now()), 5);
        assert_eq!(physical_activity_frequency(None, None, &logs, now()), 0);
    }

    #[test]
    fn test_compute_bmi() {
        assert_eq!(compute_bmi(80.0, 175.0), 26.1);
        assert_eq!(compute_bmi(70.0, 170.0), 24.2);
    }
}
