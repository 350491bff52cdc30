//! Calendar backup schedule
//!
//! Weekly entries key on a weekday name, monthly entries on a day of month
//! or the literal `Last day`. Each entry holds a list of HH:MM times.

use std::collections::HashMap;

use chrono::{NaiveTime, Weekday};

use super::errors::{SettingsError, SettingsResult};

/// A day-of-month slot in the monthly schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonthlyDay {
    Day(u32),
    LastDay,
}

impl MonthlyDay {
    pub fn parse(s: &str) -> SettingsResult<Self> {
        if s.eq_ignore_ascii_case("last day") {
            return Ok(MonthlyDay::LastDay);
        }
        let day: u32 = s
            .parse()
            .map_err(|_| SettingsError::invalid("backup_schedule.monthly", s))?;
        if !(1..=31).contains(&day) {
            return Err(SettingsError::invalid("backup_schedule.monthly", s));
        }
        Ok(MonthlyDay::Day(day))
    }

    pub fn render(&self) -> String {
        match self {
            MonthlyDay::Day(d) => d.to_string(),
            MonthlyDay::LastDay => "Last day".to_string(),
        }
    }
}

/// The full calendar schedule read from settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupSchedule {
    pub weekly: HashMap<Weekday, Vec<NaiveTime>>,
    pub monthly: HashMap<MonthlyDay, Vec<NaiveTime>>,
}

impl BackupSchedule {
    pub fn is_empty(&self) -> bool {
        self.weekly.is_empty() && self.monthly.is_empty()
    }

    pub fn add_weekly(&mut self, day: Weekday, time: NaiveTime) {
        let times = self.weekly.entry(day).or_default();
        if !times.contains(&time) {
            times.push(time);
            times.sort();
        }
    }

    pub fn add_monthly(&mut self, day: MonthlyDay, time: NaiveTime) {
        let times = self.monthly.entry(day).or_default();
        if !times.contains(&time) {
            times.push(time);
            times.sort();
        }
    }
}

/// Parse a weekday written out in full ("Monday").
pub fn parse_weekday(s: &str) -> SettingsResult<Weekday> {
    match s.to_ascii_lowercase().as_str() {
        "monday" => Ok(Weekday::Mon),
        "tuesday" => Ok(Weekday::Tue),
        "wednesday" => Ok(Weekday::Wed),
        "thursday" => Ok(Weekday::Thu),
        "friday" => Ok(Weekday::Fri),
        "saturday" => Ok(Weekday::Sat),
        "sunday" => Ok(Weekday::Sun),
        _ => Err(SettingsError::invalid("backup_schedule.weekly", s)),
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Parse an HH:MM time-of-day entry.
pub fn parse_time(s: &str) -> SettingsResult<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| SettingsError::invalid("backup_schedule", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monthly_day_parse() {
        assert_eq!(MonthlyDay::parse("15").unwrap(), MonthlyDay::Day(15));
        assert_eq!(MonthlyDay::parse("Last day").unwrap(), MonthlyDay::LastDay);
        assert!(MonthlyDay::parse("32").is_err());
        assert!(MonthlyDay::parse("0").is_err());
    }

    #[test]
    fn test_weekday_parse_round_trip() {
        for name in [
            "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
        ] {
            let day = parse_weekday(name).unwrap();
            assert_eq!(weekday_name(day), name);
        }
        assert!(parse_weekday("Moonday").is_err());
    }

    #[test]
    fn test_time_parse() {
        assert_eq!(
            parse_time("09:00").unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap()
        );
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("nine").is_err());
    }

    #[test]
    fn test_add_weekly_dedupes_and_sorts() {
        let mut schedule = BackupSchedule::default();
        let nine = parse_time("09:00").unwrap();
        let eight = parse_time("08:00").unwrap();
        schedule.add_weekly(Weekday::Mon, nine);
        schedule.add_weekly(Weekday::Mon, eight);
        schedule.add_weekly(Weekday::Mon, nine);
        assert_eq!(schedule.weekly[&Weekday::Mon], vec![eight, nine]);
    }
}
