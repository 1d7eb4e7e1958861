//! Per-repository maintenance schedule.

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::maintenance::MaintenanceTask;

/// Lower bound for a schedule's total run budget, in minutes.
pub const MIN_MAX_DURATION_MINUTES: u32 = 30;

/// Day of the week a schedule may fire on.
///
/// Serialized as a lowercase English name so stored schedules do not depend
/// on ordinal positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl ScheduleDay {
    pub const ALL: [Self; 7] = [
        Self::Monday,
        Self::Tuesday,
        Self::Wednesday,
        Self::Thursday,
        Self::Friday,
        Self::Saturday,
        Self::Sunday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }

    /// Parses full or three-letter day names, case-insensitively.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monday" | "mon" => Some(Self::Monday),
            "tuesday" | "tue" => Some(Self::Tuesday),
            "wednesday" | "wed" => Some(Self::Wednesday),
            "thursday" | "thu" => Some(Self::Thursday),
            "friday" | "fri" => Some(Self::Friday),
            "saturday" | "sat" => Some(Self::Saturday),
            "sunday" | "sun" => Some(Self::Sunday),
            _ => None,
        }
    }
}

impl From<Weekday> for ScheduleDay {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
            Weekday::Sun => Self::Sunday,
        }
    }
}

impl fmt::Display for ScheduleDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When and how a repository is maintained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSchedule {
    pub days: BTreeSet<ScheduleDay>,
    /// Trigger hour, 0-23.
    pub hour: u8,
    /// Trigger minute, 0-59.
    pub minute: u8,
    pub enabled: bool,
    /// Budget for one whole run, in minutes. Never below
    /// [`MIN_MAX_DURATION_MINUTES`].
    pub max_duration_minutes: u32,
    pub tasks: BTreeSet<MaintenanceTask>,
}

impl MaintenanceSchedule {
    /// Create an enabled schedule, clamping the trigger time and duration
    /// into their valid ranges.
    pub fn new(
        days: impl IntoIterator<Item = ScheduleDay>,
        hour: u8,
        minute: u8,
        max_duration_minutes: u32,
        tasks: impl IntoIterator<Item = MaintenanceTask>,
    ) -> Self {
        Self {
            days: days.into_iter().collect(),
            hour: hour.min(23),
            minute: minute.min(59),
            enabled: true,
            max_duration_minutes: max_duration_minutes.max(MIN_MAX_DURATION_MINUTES),
            tasks: tasks.into_iter().collect(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Re-applies the construction clamps. Used after deserializing a
    /// schedule from storage, where the fields were set directly.
    pub fn normalized(mut self) -> Self {
        self.hour = self.hour.min(23);
        self.minute = self.minute.min(59);
        self.max_duration_minutes = self.max_duration_minutes.max(MIN_MAX_DURATION_MINUTES);
        self
    }

    pub fn max_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.max_duration_minutes))
    }

    /// Whether the schedule should fire at local time `now`, given the local
    /// time of the last run.
    ///
    /// Fires at or after the trigger minute on a scheduled day, at most once
    /// per calendar day.
    pub fn is_due(&self, now: NaiveDateTime, last_run: Option<NaiveDateTime>) -> bool {
        if !self.enabled || !self.days.contains(&ScheduleDay::from(now.weekday())) {
            return false;
        }

        let trigger = (u32::from(self.hour), u32::from(self.minute));
        if (now.hour(), now.minute()) < trigger {
            return false;
        }

        match last_run {
            Some(last) => last.date() != now.date(),
            None => true,
        }
    }

    /// Human-readable description of the trigger.
    pub fn description(&self) -> String {
        let days: Vec<&str> = self.days.iter().map(|d| &d.as_str()[..3]).collect();
        format!("{} at {:02}:{:02}", days.join(","), self.hour, self.minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    fn weekly_monday() -> MaintenanceSchedule {
        MaintenanceSchedule::new([ScheduleDay::Monday], 3, 30, 60, [MaintenanceTask::Prune])
    }

    #[test]
    fn test_new_clamps_fields() {
        let schedule =
            MaintenanceSchedule::new([ScheduleDay::Friday], 42, 99, 5, [MaintenanceTask::Prune]);
        assert_eq!(schedule.hour, 23);
        assert_eq!(schedule.minute, 59);
        assert_eq!(schedule.max_duration_minutes, MIN_MAX_DURATION_MINUTES);
    }

    #[test]
    fn test_due_at_trigger_time_on_scheduled_day() {
        // 2024-01-01 is a Monday
        let schedule = weekly_monday();
        assert!(schedule.is_due(at(2024, 1, 1, 3, 30), None));
        assert!(schedule.is_due(at(2024, 1, 1, 4, 10), None));
        assert!(!schedule.is_due(at(2024, 1, 1, 3, 29), None));
        assert!(!schedule.is_due(at(2024, 1, 2, 3, 30), None));
    }

    #[test]
    fn test_not_due_twice_on_same_day() {
        let schedule = weekly_monday();
        let ran = at(2024, 1, 1, 3, 30);
        assert!(!schedule.is_due(at(2024, 1, 1, 5, 0), Some(ran)));
        assert!(schedule.is_due(at(2024, 1, 8, 3, 30), Some(ran)));
    }

    #[test]
    fn test_disabled_never_due() {
        let schedule = weekly_monday().disabled();
        assert!(!schedule.is_due(at(2024, 1, 1, 3, 30), None));
    }

    #[test]
    fn test_day_serialization_is_stable() {
        let json = serde_json::to_string(&ScheduleDay::Wednesday).unwrap();
        assert_eq!(json, "\"wednesday\"");
        assert_eq!(ScheduleDay::from_str("WED"), Some(ScheduleDay::Wednesday));
    }

    #[test]
    fn test_normalized_reapplies_floor() {
        let mut schedule = weekly_monday();
        schedule.max_duration_minutes = 1;
        assert_eq!(schedule.normalized().max_duration_minutes, MIN_MAX_DURATION_MINUTES);
    }

    #[test]
    fn test_description() {
        let schedule = MaintenanceSchedule::new(
            [ScheduleDay::Saturday, ScheduleDay::Monday],
            2,
            5,
            60,
            [MaintenanceTask::HealthCheck],
        );
        assert_eq!(schedule.description(), "mon,sat at 02:05");
    }
}
