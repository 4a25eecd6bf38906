use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MINUTES_PER_DAY: u32 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Half-open interval `[start, end)`.
    Once {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Daily {
        start_time: NaiveTime,
        duration_mins: u32,
    },
    /// `weekdays` uses ISO numbering, 1 = Monday through 7 = Sunday.
    Weekly {
        weekdays: Vec<u8>,
        start_time: NaiveTime,
        duration_mins: u32,
    },
    Monthly {
        days: Vec<u32>,
        start_time: NaiveTime,
        duration_mins: u32,
    },
}

/// A period during which alerting is suppressed but checks keep running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: Uuid,
    pub name: String,
    /// Monitors covered by this window. Empty means all monitors.
    #[serde(default)]
    pub monitor_ids: Vec<Uuid>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Offset applied to `start_time` of recurring schedules.
    #[serde(default)]
    pub utc_offset_mins: i32,
    pub schedule: Schedule,
}

fn default_active() -> bool {
    true
}

impl MaintenanceWindow {
    pub fn new(name: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            monitor_ids: Vec::new(),
            active: true,
            utc_offset_mins: 0,
            schedule,
        }
    }

    pub fn for_monitors(mut self, monitor_ids: Vec<Uuid>) -> Self {
        self.monitor_ids = monitor_ids;
        self
    }

    pub fn with_utc_offset(mut self, mins: i32) -> Self {
        self.utc_offset_mins = mins;
        self
    }

    pub fn applies_to(&self, monitor_id: Uuid) -> bool {
        self.monitor_ids.is_empty() || self.monitor_ids.contains(&monitor_id)
    }

    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        match &self.schedule {
            Schedule::Once { start, end } => *start <= at && at < *end,
            Schedule::Daily {
                start_time,
                duration_mins,
            } => self.covers_recurring(at, *start_time, *duration_mins, |_| true),
            Schedule::Weekly {
                weekdays,
                start_time,
                duration_mins,
            } => self.covers_recurring(at, *start_time, *duration_mins, |d| {
                let iso = d.weekday().number_from_monday() as u8;
                weekdays.contains(&iso)
            }),
            Schedule::Monthly {
                days,
                start_time,
                duration_mins,
            } => self.covers_recurring(at, *start_time, *duration_mins, |d| days.contains(&d.day())),
        }
    }

    /// Checks every occurrence that could still be running at `at`: the one
    /// starting today plus earlier ones whose duration reaches past midnight.
    fn covers_recurring(
        &self,
        at: DateTime<Utc>,
        start_time: NaiveTime,
        duration_mins: u32,
        day_matches: impl Fn(NaiveDate) -> bool,
    ) -> bool {
        if duration_mins == 0 {
            return false;
        }
        let offset = FixedOffset::east_opt(self.utc_offset_mins * 60).unwrap_or_else(|| Utc.fix());
        let local = at.with_timezone(&offset).naive_local();
        let duration = chrono::Duration::minutes(i64::from(duration_mins));
        let lookback = u64::from(duration_mins / MINUTES_PER_DAY) + 1;

        (0..=lookback).any(|back| {
            let Some(day) = local.date().checked_sub_days(Days::new(back)) else {
                return false;
            };
            if !day_matches(day) {
                return false;
            }
            let start = day.and_time(start_time);
            start <= local && local < start + duration
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn once_is_half_open() {
        let w = MaintenanceWindow::new(
            "deploy",
            Schedule::Once {
                start: at(2026, 3, 1, 10, 0),
                end: at(2026, 3, 1, 11, 0),
            },
        );
        assert!(!w.covers(at(2026, 3, 1, 9, 59)));
        assert!(w.covers(at(2026, 3, 1, 10, 0)));
        assert!(w.covers(at(2026, 3, 1, 10, 59)));
        assert!(!w.covers(at(2026, 3, 1, 11, 0)));
    }

    #[test]
    fn daily_window_crossing_midnight() {
        let w = MaintenanceWindow::new(
            "nightly",
            Schedule::Daily {
                start_time: time(23, 0),
                duration_mins: 120,
            },
        );
        assert!(w.covers(at(2026, 3, 1, 23, 30)));
        assert!(w.covers(at(2026, 3, 2, 0, 59)));
        assert!(!w.covers(at(2026, 3, 2, 1, 0)));
        assert!(!w.covers(at(2026, 3, 2, 22, 59)));
    }

    #[test]
    fn weekly_window_matches_start_weekday_only() {
        // 2026-03-01 is a Sunday.
        let w = MaintenanceWindow::new(
            "sunday-night",
            Schedule::Weekly {
                weekdays: vec![7],
                start_time: time(22, 0),
                duration_mins: 240,
            },
        );
        assert!(w.covers(at(2026, 3, 1, 22, 30)));
        // Spills into Monday morning.
        assert!(w.covers(at(2026, 3, 2, 1, 30)));
        assert!(!w.covers(at(2026, 3, 2, 22, 30)));
    }

    #[test]
    fn monthly_window_by_day_of_month() {
        let w = MaintenanceWindow::new(
            "billing",
            Schedule::Monthly {
                days: vec![15],
                start_time: time(3, 0),
                duration_mins: 60,
            },
        );
        assert!(w.covers(at(2026, 4, 15, 3, 15)));
        assert!(!w.covers(at(2026, 4, 16, 3, 15)));
        assert!(!w.covers(at(2026, 4, 15, 4, 0)));
    }

    #[test]
    fn utc_offset_shifts_local_time() {
        let w = MaintenanceWindow::new(
            "local-morning",
            Schedule::Daily {
                start_time: time(9, 0),
                duration_mins: 30,
            },
        )
        .with_utc_offset(120);
        // 09:10 at UTC+2 is 07:10 UTC.
        assert!(w.covers(at(2026, 3, 1, 7, 10)));
        assert!(!w.covers(at(2026, 3, 1, 9, 10)));
    }

    #[test]
    fn multi_day_window_looks_back_far_enough() {
        let w = MaintenanceWindow::new(
            "migration",
            Schedule::Weekly {
                weekdays: vec![6],
                start_time: time(0, 0),
                duration_mins: 3 * MINUTES_PER_DAY,
            },
        );
        // Saturday 2026-02-28 start, still running Monday evening.
        assert!(w.covers(at(2026, 3, 2, 20, 0)));
        assert!(!w.covers(at(2026, 3, 3, 0, 0)));
    }

    #[test]
    fn zero_duration_never_covers() {
        let w = MaintenanceWindow::new(
            "noop",
            Schedule::Daily {
                start_time: time(0, 0),
                duration_mins: 0,
            },
        );
        assert!(!w.covers(at(2026, 3, 1, 0, 0)));
    }

    #[test]
    fn scope_empty_means_all() {
        let id = Uuid::new_v4();
        let all = MaintenanceWindow::new("all", Schedule::Daily { start_time: time(0, 0), duration_mins: 1 });
        assert!(all.applies_to(id));
        let scoped = all.clone().for_monitors(vec![Uuid::new_v4()]);
        assert!(!scoped.applies_to(id));
    }

    #[test]
    fn schedule_deserializes_tagged() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "name": "nightly",
            "schedule": { "type": "daily", "start_time": "02:00:00", "duration_mins": 30 }
        });
        let w: MaintenanceWindow = serde_json::from_value(json).unwrap();
        assert!(w.active);
        assert!(matches!(w.schedule, Schedule::Daily { duration_mins: 30, .. }));
    }
}
