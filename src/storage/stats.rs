use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::BTreeMap;

/// Days covered by an aggregate query, ending at `end_day` (inclusive) in `tz`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsRange {
    pub end_day: NaiveDate,
    pub days: u32,
    pub tz: Tz,
}

impl StatsRange {
    pub fn new(end_day: NaiveDate, days: u32, tz: Tz) -> Self {
        Self {
            end_day,
            days: days.max(1),
            tz,
        }
    }

    /// The `days` days up to and including today in `tz`
    pub fn ending_today(days: u32, tz: Tz) -> Self {
        let today = Utc::now().with_timezone(&tz).date_naive();
        Self::new(today, days, tz)
    }

    pub fn start_day(&self) -> NaiveDate {
        days_before(self.end_day, self.days - 1)
    }

    /// First day any aggregate field needs (daily range, yesterday, last 7 days)
    pub(crate) fn earliest_day(&self) -> NaiveDate {
        self.start_day().min(days_before(self.end_day, 6))
    }

    pub(crate) fn window_start_utc(&self) -> DateTime<Utc> {
        day_start_utc(self.tz, self.earliest_day())
    }

    pub(crate) fn window_end_utc(&self) -> DateTime<Utc> {
        let next = self
            .end_day
            .checked_add_days(Days::new(1))
            .unwrap_or(self.end_day);
        day_start_utc(self.tz, next)
    }

    fn local_day(&self, at: &DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }
}

/// Aggregate usage statistics, bucketed in the range's timezone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStats {
    pub total_events: u64,
    /// Events on the range's end day
    pub today_events: u64,
    pub yesterday_events: u64,
    /// Events on the end day and the six days before it
    pub week_events: u64,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
    /// Days from the first event to the end day, both included
    pub tracking_days: i64,
    /// `YYYY-MM-DD` -> count, every day of the range present
    pub daily: BTreeMap<String, u64>,
    /// `00`..`23` -> count for the end day
    pub hourly: BTreeMap<String, u64>,
}

/// Build [`UsageStats`] from the event timestamps inside the range window plus store totals
pub fn aggregate(
    range: &StatsRange,
    window: &[DateTime<Utc>],
    total_events: u64,
    first_event: Option<DateTime<Utc>>,
    last_event: Option<DateTime<Utc>>,
) -> UsageStats {
    let start_day = range.start_day();
    let yesterday = days_before(range.end_day, 1);
    let week_start = days_before(range.end_day, 6);

    let mut daily = BTreeMap::new();
    let mut day = start_day;
    while day <= range.end_day {
        daily.insert(day.format("%Y-%m-%d").to_string(), 0u64);
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }

    let mut hourly: BTreeMap<String, u64> = (0..24).map(|h| (format!("{:02}", h), 0)).collect();

    let mut today_events = 0;
    let mut yesterday_events = 0;
    let mut week_events = 0;

    for at in window {
        let local = at.with_timezone(&range.tz);
        let day = local.date_naive();

        if day >= start_day && day <= range.end_day {
            *daily.entry(day.format("%Y-%m-%d").to_string()).or_insert(0) += 1;
        }
        if day == range.end_day {
            today_events += 1;
            *hourly.entry(format!("{:02}", local.hour())).or_insert(0) += 1;
        }
        if day == yesterday {
            yesterday_events += 1;
        }
        if day >= week_start && day <= range.end_day {
            week_events += 1;
        }
    }

    let tracking_days = first_event
        .map(|first| {
            (range.end_day - range.local_day(&first))
                .num_days()
                .saturating_add(1)
                .max(0)
        })
        .unwrap_or(0);

    UsageStats {
        total_events,
        today_events,
        yesterday_events,
        week_events,
        first_event,
        last_event,
        tracking_days,
        daily,
        hourly,
    }
}

fn days_before(day: NaiveDate, n: u32) -> NaiveDate {
    day.checked_sub_days(Days::new(n as u64)).unwrap_or(day)
}

/// UTC instant of local midnight. Midnight skipped by a DST jump maps to the first valid instant after it.
pub(crate) fn day_start_utc(tz: Tz, day: NaiveDate) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => {
            let later = midnight + chrono::Duration::hours(1);
            tz.from_local_datetime(&later)
                .earliest()
                .map(|local| local.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
        }
    }
}
