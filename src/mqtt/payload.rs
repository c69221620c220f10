//! Payload codec for the switch command topics
//!
//! Translates user intent into the two wire formats the device understands:
//!
//! ```text
//! power topic  ─► ON | OFF
//! timer topic  ─► {"Enable":1,"Mode":0,"Time":"07:30","Window":0,
//!                  "Days":"0101010","Repeat":0,"Output":1,"Action":1}
//! ```
//!
//! Everything here is pure. Range checks happen when the value types are
//! built ([`TimeOfDay::new`], [`Weekdays::from_flags`]), so encoding itself
//! cannot fail.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use super::error::EncodingError;

/// Literal payload for the power topic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PowerCommand {
    On,
    Off,
}

impl PowerCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerCommand::On => "ON",
            PowerCommand::Off => "OFF",
        }
    }
}

impl fmt::Display for PowerCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encodes a power toggle into the device's literal token.
pub fn encode_power(target_on: bool) -> PowerCommand {
    if target_on {
        PowerCommand::On
    } else {
        PowerCommand::Off
    }
}

/// Wall-clock time in 24-hour form, minute resolution
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, EncodingError> {
        if hour > 23 {
            return Err(EncodingError::HourOutOfRange(hour));
        }
        if minute > 59 {
            return Err(EncodingError::MinuteOutOfRange(minute));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }
}

impl From<NaiveTime> for TimeOfDay {
    // Seconds are dropped, the device timer has minute resolution
    fn from(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = EncodingError;

    /// Parses the exact `HH:MM` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EncodingError::InvalidTime(s.to_string());

        if s.len() != 5 {
            return Err(invalid());
        }
        let (hour, minute) = s.split_once(':').ok_or_else(invalid)?;
        if hour.len() != 2 || !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        let minute: u8 = minute.parse().map_err(|_| invalid())?;

        TimeOfDay::new(hour, minute)
    }
}

/// Weekday selection, index 0 = Sunday … 6 = Saturday
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Weekdays([bool; 7]);

impl Weekdays {
    pub const ALL: Weekdays = Weekdays([true; 7]);
    pub const NONE: Weekdays = Weekdays([false; 7]);

    pub fn new(flags: [bool; 7]) -> Self {
        Self(flags)
    }

    /// Builds a selection from a Sunday-first flag list of exactly 7 entries.
    pub fn from_flags(flags: &[bool]) -> Result<Self, EncodingError> {
        let flags: [bool; 7] = flags
            .try_into()
            .map_err(|_| EncodingError::DayCount(flags.len()))?;
        Ok(Self(flags))
    }

    pub fn from_days(days: &[Weekday]) -> Self {
        let mut selection = Self::NONE;
        for day in days {
            selection.set(*day, true);
        }
        selection
    }

    pub fn set(&mut self, day: Weekday, active: bool) {
        self.0[day.num_days_from_sunday() as usize] = active;
    }

    pub fn toggle(&mut self, day: Weekday) {
        let index = day.num_days_from_sunday() as usize;
        self.0[index] = !self.0[index];
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0[day.num_days_from_sunday() as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|active| !active)
    }

    pub fn flags(&self) -> [bool; 7] {
        self.0
    }

    /// An empty selection means "every day". The device would otherwise
    /// store a timer that never fires.
    pub fn normalized(self) -> Self {
        if self.is_empty() {
            Self::ALL
        } else {
            self
        }
    }

    /// 7-character Sunday-first mask, `'1'` = active.
    pub fn mask(&self) -> String {
        self.normalized()
            .0
            .iter()
            .map(|active| if *active { '1' } else { '0' })
            .collect()
    }
}

/// What the timer does when it fires
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleAction {
    Off,
    On,
}

impl ScheduleAction {
    pub fn code(&self) -> u8 {
        match self {
            ScheduleAction::Off => 0,
            ScheduleAction::On => 1,
        }
    }
}

impl From<bool> for ScheduleAction {
    fn from(on: bool) -> Self {
        if on {
            ScheduleAction::On
        } else {
            ScheduleAction::Off
        }
    }
}

/// A recurring on/off timer as confirmed by the user
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub enabled: bool,
    pub days: Weekdays,
    pub time: TimeOfDay,
    pub action: ScheduleAction,
}

impl ScheduleSpec {
    /// An armed schedule
    pub fn new(days: Weekdays, time: TimeOfDay, action: ScheduleAction) -> Self {
        Self {
            enabled: true,
            days,
            time,
            action,
        }
    }

    /// Checked construction from raw picker values.
    pub fn from_parts(
        days: &[bool],
        hour: u8,
        minute: u8,
        action: ScheduleAction,
    ) -> Result<Self, EncodingError> {
        Ok(Self::new(
            Weekdays::from_flags(days)?,
            TimeOfDay::new(hour, minute)?,
            action,
        ))
    }
}

/// Structured timer record published on the timer topic.
///
/// Field order matches what the device firmware emits in its own echo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimerPayload {
    pub enable: u8,
    /// 0 = absolute time, sunrise/sunset modes are not used
    pub mode: u8,
    pub time: String,
    pub window: u8,
    pub days: String,
    pub repeat: u8,
    pub output: u8,
    pub action: u8,
}

impl TimerPayload {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Encodes a schedule into the device's timer record.
pub fn encode_schedule(spec: &ScheduleSpec) -> TimerPayload {
    TimerPayload {
        enable: u8::from(spec.enabled),
        mode: 0,
        time: spec.time.to_string(),
        window: 0,
        days: spec.days.mask(),
        repeat: 0,
        output: 1,
        action: spec.action.code(),
    }
}
