//! Schedule data as stored on disk, one document per (user, category).
//!
//! The document is written by the external editor and read by the
//! scheduler. Shape:
//! `{"enabled": bool, "kind": "message"|"task_reminder", "periods": {"<id>": {...}}}`.

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{NudgeError, Result};

/// How a category produces message bodies when a job fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    /// Plain recurring message at a random slot inside the windows.
    Message,
    /// Weighted random pick among the user's open tasks.
    TaskReminder,
}

impl std::fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CategoryKind::Message => write!(f, "message"),
            CategoryKind::TaskReminder => write!(f, "task_reminder"),
        }
    }
}

impl std::str::FromStr for CategoryKind {
    type Err = NudgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "message" => Ok(CategoryKind::Message),
            "task_reminder" | "task-reminder" => Ok(CategoryKind::TaskReminder),
            other => Err(NudgeError::config(format!(
                "Unknown category kind '{other}' (known: message, task_reminder)"
            ))),
        }
    }
}

/// One sending window: a weekday set plus a daily time range.
///
/// Times are `HH:MM` strings interpreted in UTC; the end is exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulePeriod {
    pub days: Vec<String>,
    pub start_time: String,
    pub end_time: String,
}

impl SchedulePeriod {
    pub fn new(days: &[&str], start_time: &str, end_time: &str) -> Self {
        Self {
            days: days.iter().map(|d| d.to_string()).collect(),
            start_time: start_time.into(),
            end_time: end_time.into(),
        }
    }

    /// Parsed weekday set. Any unknown day name fails the whole period.
    pub fn weekdays(&self) -> Result<Vec<Weekday>> {
        self.days.iter().map(|d| parse_weekday(d)).collect()
    }

    /// Parsed `(start, end)` window; start must come before end.
    pub fn window(&self) -> Result<(NaiveTime, NaiveTime)> {
        let start = parse_hhmm(&self.start_time)?;
        let end = parse_hhmm(&self.end_time)?;
        if start >= end {
            return Err(NudgeError::schedule(format!(
                "Empty period window: {} is not before {}",
                self.start_time, self.end_time
            )));
        }
        Ok((start, end))
    }

    /// Whether this period applies on the given weekday.
    pub fn covers(&self, day: Weekday) -> Result<bool> {
        Ok(self.weekdays()?.contains(&day))
    }
}

fn default_true() -> bool {
    true
}

fn default_kind() -> CategoryKind {
    CategoryKind::Message
}

/// On-disk schedule document for one (user, category).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleData {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_kind")]
    pub kind: CategoryKind,
    #[serde(default)]
    pub periods: BTreeMap<String, SchedulePeriod>,
}

impl Default for ScheduleData {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: CategoryKind::Message,
            periods: BTreeMap::new(),
        }
    }
}

/// Parse a weekday name ("mon", "Monday", "TUE", ...).
pub fn parse_weekday(s: &str) -> Result<Weekday> {
    let lower = s.trim().to_lowercase();
    let day = match lower.get(..3) {
        Some("mon") => Weekday::Mon,
        Some("tue") => Weekday::Tue,
        Some("wed") => Weekday::Wed,
        Some("thu") => Weekday::Thu,
        Some("fri") => Weekday::Fri,
        Some("sat") => Weekday::Sat,
        Some("sun") => Weekday::Sun,
        _ => {
            return Err(NudgeError::schedule(format!("Unknown weekday: '{s}'")));
        }
    };
    Ok(day)
}

/// Parse an `HH:MM` time-of-day.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| NudgeError::schedule(format!("Invalid time '{s}' (expected HH:MM)")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_weekday_variants() {
        assert_eq!(parse_weekday("mon").unwrap(), Weekday::Mon);
        assert_eq!(parse_weekday("Monday").unwrap(), Weekday::Mon);
        assert_eq!(parse_weekday("WED").unwrap(), Weekday::Wed);
        assert_eq!(parse_weekday(" sun ").unwrap(), Weekday::Sun);
        assert!(parse_weekday("noday").is_err());
        assert!(parse_weekday("").is_err());
    }

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(
            parse_hhmm("09:30").unwrap(),
            NaiveTime::from_hms_opt(9, 30, 0).unwrap()
        );
        assert!(parse_hhmm("9am").is_err());
        assert!(parse_hhmm("25:00").is_err());
    }

    #[test]
    fn test_period_window_ordering() {
        let period = SchedulePeriod::new(&["mon"], "09:00", "17:00");
        let (start, end) = period.window().unwrap();
        assert!(start < end);

        let inverted = SchedulePeriod::new(&["mon"], "17:00", "09:00");
        assert!(inverted.window().is_err());
    }

    #[test]
    fn test_period_covers() {
        let period = SchedulePeriod::new(&["mon", "tue", "wed", "thu", "fri"], "09:00", "17:00");
        assert!(period.covers(Weekday::Wed).unwrap());
        assert!(!period.covers(Weekday::Sat).unwrap());
    }

    #[test]
    fn test_schedule_document_parse() {
        let json = r#"{
            "enabled": true,
            "periods": {
                "workday": {"days": ["mon","tue","wed","thu","fri"],
                            "start_time": "09:00", "end_time": "17:00"}
            }
        }"#;
        let data: ScheduleData = serde_json::from_str(json).unwrap();
        assert!(data.enabled);
        assert_eq!(data.kind, CategoryKind::Message);
        assert_eq!(data.periods.len(), 1);
        assert!(data.periods.contains_key("workday"));
    }

    #[test]
    fn test_task_reminder_kind_parse() {
        let json = r#"{"enabled": true, "kind": "task_reminder", "periods": {}}"#;
        let data: ScheduleData = serde_json::from_str(json).unwrap();
        assert_eq!(data.kind, CategoryKind::TaskReminder);

        let parsed: CategoryKind = "task_reminder".parse().unwrap();
        assert_eq!(parsed, CategoryKind::TaskReminder);
        assert!("chore".parse::<CategoryKind>().is_err());
    }
}
