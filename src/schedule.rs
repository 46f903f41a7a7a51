// Opening hours
// Weekly schedules and the "is it open right now" check shown on restaurant and room cards

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// Opening "00:00" and closing "23:59" means open around the clock
pub const ALL_DAY_OPENING: &str = "00:00";
pub const ALL_DAY_CLOSING: &str = "23:59";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Duplicate schedule for {0}")]
    DuplicateDay(Weekday),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub fn of(now: &NaiveDateTime) -> Self {
        Self::from(now.weekday())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Sunday => "sunday",
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
        }
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Sun => Weekday::Sunday,
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
        }
    }
}

impl std::fmt::Display for Weekday {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub opening_time: String,
    pub closing_time: String,
}

impl TimeSlot {
    pub fn new(opening_time: &str, closing_time: &str) -> Self {
        Self {
            opening_time: opening_time.to_string(),
            closing_time: closing_time.to_string(),
        }
    }

    pub fn all_day() -> Self {
        Self::new(ALL_DAY_OPENING, ALL_DAY_CLOSING)
    }

    pub fn is_all_day(&self) -> bool {
        self.opening_time == ALL_DAY_OPENING && self.closing_time == ALL_DAY_CLOSING
    }

    // Both ends inclusive
    pub fn contains(&self, minutes_since_midnight: u32) -> bool {
        if self.is_all_day() {
            return true;
        }
        match (
            parse_minutes(&self.opening_time),
            parse_minutes(&self.closing_time),
        ) {
            (Some(opening), Some(closing)) => {
                (opening..=closing).contains(&minutes_since_midnight)
            }
            _ => {
                debug!(
                    opening = %self.opening_time,
                    closing = %self.closing_time,
                    "skipping time slot with unparsable bounds"
                );
                false
            }
        }
    }
}

// "HH:mm" to minutes since midnight
fn parse_minutes(value: &str) -> Option<u32> {
    let (hours, minutes) = value.trim().split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySchedule {
    pub day: Weekday,
    #[serde(default)]
    pub time_slots: Vec<TimeSlot>,
}

impl DaySchedule {
    pub fn new(day: Weekday, time_slots: Vec<TimeSlot>) -> Self {
        Self { day, time_slots }
    }

    pub fn closed(day: Weekday) -> Self {
        Self::new(day, Vec::new())
    }
}

/// A week of opening hours, holding at most one [`DaySchedule`] per day.
///
/// Deserialises from the plain list the backend sends and rejects lists
/// that name the same day twice.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<DaySchedule>", into = "Vec<DaySchedule>")]
pub struct WeeklySchedule {
    days: Vec<DaySchedule>,
}

impl WeeklySchedule {
    pub fn new(days: Vec<DaySchedule>) -> Result<Self, ScheduleError> {
        for (index, day) in days.iter().enumerate() {
            if days[..index].iter().any(|earlier| earlier.day == day.day) {
                return Err(ScheduleError::DuplicateDay(day.day));
            }
        }
        Ok(Self { days })
    }

    pub fn day(&self, day: Weekday) -> Option<&DaySchedule> {
        self.days.iter().find(|schedule| schedule.day == day)
    }

    pub fn days(&self) -> &[DaySchedule] {
        &self.days
    }
}

impl TryFrom<Vec<DaySchedule>> for WeeklySchedule {
    type Error = ScheduleError;

    fn try_from(days: Vec<DaySchedule>) -> Result<Self, Self::Error> {
        Self::new(days)
    }
}

impl From<WeeklySchedule> for Vec<DaySchedule> {
    fn from(schedule: WeeklySchedule) -> Self {
        schedule.days
    }
}

pub fn is_within_opening_window(schedule: &WeeklySchedule, now: &NaiveDateTime) -> bool {
    let today = match schedule.day(Weekday::of(now)) {
        Some(today) if !today.time_slots.is_empty() => today,
        _ => return false,
    };

    let current_minutes = now.hour() * 60 + now.minute();
    today
        .time_slots
        .iter()
        .any(|slot| slot.contains(current_minutes))
}

pub fn is_open_now(schedule: &WeeklySchedule) -> bool {
    is_within_opening_window(schedule, &Local::now().naive_local())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityBadge {
    Open,
    Closed,
    Unavailable,
}

impl AvailabilityBadge {
    pub fn is_open(&self) -> bool {
        matches!(self, AvailabilityBadge::Open)
    }
}

// The owner's availability flag and the opening hours both have to agree
pub fn availability_badge(
    is_available: bool,
    schedule: &WeeklySchedule,
    now: &NaiveDateTime,
) -> AvailabilityBadge {
    if !is_available {
        AvailabilityBadge::Unavailable
    } else if is_within_opening_window(schedule, now) {
        AvailabilityBadge::Open
    } else {
        AvailabilityBadge::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use test_case::test_case;

    // 2024-01-03 was a Wednesday
    fn wednesday_at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn wednesday_schedule(slots: Vec<TimeSlot>) -> WeeklySchedule {
        WeeklySchedule::new(vec![
            DaySchedule::new(Weekday::Monday, vec![TimeSlot::all_day()]),
            DaySchedule::new(Weekday::Wednesday, slots),
        ])
        .unwrap()
    }

    #[test_case(12, 0, true ; "midday")]
    #[test_case(8, 0, false ; "before opening")]
    #[test_case(17, 1, false ; "one minute after closing")]
    #[test_case(9, 0, true ; "opening boundary is inclusive")]
    #[test_case(17, 0, true ; "closing boundary is inclusive")]
    fn test_single_slot(hour: u32, minute: u32, expected: bool) {
        let schedule = wednesday_schedule(vec![TimeSlot::new("09:00", "17:00")]);
        assert_eq!(
            is_within_opening_window(&schedule, &wednesday_at(hour, minute)),
            expected
        );
    }

    #[test]
    fn test_all_day_sentinel_is_always_open() {
        let schedule = wednesday_schedule(vec![TimeSlot::all_day()]);
        for hour in 0..24 {
            for minute in [0, 15, 30, 59] {
                assert!(is_within_opening_window(
                    &schedule,
                    &wednesday_at(hour, minute)
                ));
            }
        }
    }

    #[test]
    fn test_day_without_slots_is_closed() {
        let schedule = wednesday_schedule(Vec::new());
        for hour in 0..24 {
            assert!(!is_within_opening_window(&schedule, &wednesday_at(hour, 30)));
        }
    }

    #[test]
    fn test_missing_day_is_closed() {
        let schedule = WeeklySchedule::new(vec![DaySchedule::new(
            Weekday::Friday,
            vec![TimeSlot::all_day()],
        )])
        .unwrap();
        assert!(!is_within_opening_window(&schedule, &wednesday_at(12, 0)));
    }

    #[test]
    fn test_split_shift() {
        let schedule = wednesday_schedule(vec![
            TimeSlot::new("11:30", "14:30"),
            TimeSlot::new("18:00", "22:00"),
        ]);
        assert!(is_within_opening_window(&schedule, &wednesday_at(12, 0)));
        assert!(!is_within_opening_window(&schedule, &wednesday_at(16, 0)));
        assert!(is_within_opening_window(&schedule, &wednesday_at(22, 0)));
        assert!(!is_within_opening_window(&schedule, &wednesday_at(22, 1)));
    }

    #[test]
    fn test_unparsable_slot_does_not_hide_valid_one() {
        let schedule = wednesday_schedule(vec![
            TimeSlot::new("nine", "17:00"),
            TimeSlot::new("10:00", "11:00"),
        ]);
        assert!(!is_within_opening_window(&schedule, &wednesday_at(9, 30)));
        assert!(is_within_opening_window(&schedule, &wednesday_at(10, 30)));
    }

    #[test]
    fn test_every_chrono_weekday_maps() {
        // 2024-01-07 was a Sunday
        let names: Vec<&str> = (7..14)
            .map(|day| {
                let date = NaiveDate::from_ymd_opt(2024, 1, day)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap();
                Weekday::of(&date).as_str()
            })
            .collect();
        assert_eq!(
            names,
            vec!["sunday", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday"]
        );
    }

    #[test]
    fn test_availability_badge() {
        let schedule = wednesday_schedule(vec![TimeSlot::new("09:00", "17:00")]);

        assert_eq!(
            availability_badge(true, &schedule, &wednesday_at(12, 0)),
            AvailabilityBadge::Open
        );
        assert_eq!(
            availability_badge(true, &schedule, &wednesday_at(20, 0)),
            AvailabilityBadge::Closed
        );
        assert_eq!(
            availability_badge(false, &schedule, &wednesday_at(12, 0)),
            AvailabilityBadge::Unavailable
        );
        assert!(!availability_badge(false, &schedule, &wednesday_at(20, 0)).is_open());
    }

    #[test]
    fn test_schedule_wire_format() {
        let json = r#"[
            {"day": "wednesday", "timeSlots": [{"openingTime": "09:00", "closingTime": "17:00"}]},
            {"day": "sunday"}
        ]"#;
        let schedule: WeeklySchedule = serde_json::from_str(json).unwrap();

        assert_eq!(
            schedule.day(Weekday::Wednesday).unwrap().time_slots,
            vec![TimeSlot::new("09:00", "17:00")]
        );
        assert!(schedule.day(Weekday::Sunday).unwrap().time_slots.is_empty());

        let back = serde_json::to_value(&schedule).unwrap();
        assert_eq!(back[0]["timeSlots"][0]["closingTime"], "17:00");
    }

    #[test]
    fn test_duplicate_day_is_rejected() {
        let json = r#"[{"day": "monday", "timeSlots": []}, {"day": "monday", "timeSlots": []}]"#;
        assert!(serde_json::from_str::<WeeklySchedule>(json).is_err());

        let err = WeeklySchedule::new(vec![
            DaySchedule::closed(Weekday::Friday),
            DaySchedule::closed(Weekday::Friday),
        ])
        .unwrap_err();
        assert_eq!(err, ScheduleError::DuplicateDay(Weekday::Friday));
    }
}
