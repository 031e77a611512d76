//! Service windows: the hours during which the headway promise applies.

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayType {
    Weekday,
    Weekend,
}

impl DayType {
    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => DayType::Weekend,
            _ => DayType::Weekday,
        }
    }
}

/// Local-time hour range `[start_hour, end_hour)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ServiceWindow {
    pub const fn new(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            end_hour,
        }
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.start_hour >= self.end_hour || self.end_hour > 24 {
            anyhow::bail!(
                "invalid service window {:02}:00-{:02}:00",
                self.start_hour,
                self.end_hour
            );
        }
        Ok(())
    }
}

/// The weekday and weekend profiles, selected per calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceWindows {
    pub weekday: ServiceWindow,
    pub weekend: ServiceWindow,
}

/// One qualifying service period, identified by its local date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ServicePeriod {
    pub date: NaiveDate,
}

impl ServiceWindows {
    pub fn for_day(&self, day_type: DayType) -> ServiceWindow {
        match day_type {
            DayType::Weekday => self.weekday,
            DayType::Weekend => self.weekend,
        }
    }

    /// Returns the service period `t` falls in, or `None` outside service hours.
    ///
    /// Windows never span midnight, so the local date identifies the period.
    pub fn period_of(&self, t: DateTime<Utc>, tz: Tz) -> Option<ServicePeriod> {
        let local = t.with_timezone(&tz);
        let date = local.date_naive();
        let window = self.for_day(DayType::of(date));
        window
            .contains_hour(local.hour())
            .then_some(ServicePeriod { date })
    }
}
