//! Calendar arithmetic for timesteps.
//!
//! A timestep aggregates one *period* (an hour, a day, ...) into a single
//! bucket whose fields are the *sub-steps* inside that period (the minutes of
//! the hour, the hours of the day, ...). All arithmetic is done in UTC with
//! chrono so month lengths and leap years fall out of the calendar rather
//! than fixed second offsets.

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Unix timestamp in seconds.
pub type UnixTime = i64;

/// Length of one timestep period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Seconds within a minute.
    Minute,
    /// Minutes within an hour.
    Hour,
    /// Hours within a day.
    Day,
    /// Days within a month (1-based).
    Month,
    /// Months within a year (1-based).
    Year,
}

#[derive(Debug, Clone, Copy)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

impl Unit {
    /// Truncate `t` to the start of the enclosing unit.
    fn floor(self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Second => t.with_nanosecond(0).unwrap_or(t),
            Self::Minute => t
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(t),
            Self::Hour => t
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(t),
            Self::Day => Utc
                .with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
                .single()
                .unwrap_or(t),
            Self::Month => Utc
                .with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0)
                .single()
                .unwrap_or(t),
            Self::Year => Utc
                .with_ymd_and_hms(t.year(), 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(t),
        }
    }

    /// Move `t` by `n` whole units. Month and year moves are calendar moves.
    ///
    /// Saturates at the ends of chrono's representable range.
    fn shift(self, t: DateTime<Utc>, n: i64) -> DateTime<Utc> {
        let limit = if n < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        };
        let moved = match self {
            Self::Second => Duration::try_seconds(n).and_then(|d| t.checked_add_signed(d)),
            Self::Minute => Duration::try_minutes(n).and_then(|d| t.checked_add_signed(d)),
            Self::Hour => Duration::try_hours(n).and_then(|d| t.checked_add_signed(d)),
            Self::Day => {
                let days = chrono::Days::new(n.unsigned_abs());
                if n < 0 {
                    t.checked_sub_days(days)
                } else {
                    t.checked_add_days(days)
                }
            }
            Self::Month => shift_months(t, n),
            Self::Year => n.checked_mul(12).and_then(|m| shift_months(t, m)),
        };
        moved.unwrap_or(limit)
    }
}

fn shift_months(t: DateTime<Utc>, n: i64) -> Option<DateTime<Utc>> {
    let months = Months::new(u32::try_from(n.unsigned_abs()).ok()?);
    if n < 0 {
        t.checked_sub_months(months)
    } else {
        t.checked_add_months(months)
    }
}

impl Granularity {
    fn period_unit(self) -> Unit {
        match self {
            Self::Minute => Unit::Minute,
            Self::Hour => Unit::Hour,
            Self::Day => Unit::Day,
            Self::Month => Unit::Month,
            Self::Year => Unit::Year,
        }
    }

    fn sub_step_unit(self) -> Unit {
        match self {
            Self::Minute => Unit::Second,
            Self::Hour => Unit::Minute,
            Self::Day => Unit::Hour,
            Self::Month => Unit::Day,
            Self::Year => Unit::Month,
        }
    }

    /// First sub-step index of a period (day-of-month and month-of-year start at 1).
    pub fn first_index(self) -> u32 {
        match self {
            Self::Minute | Self::Hour | Self::Day => 0,
            Self::Month | Self::Year => 1,
        }
    }

    /// Start of the period containing `t`, or of the period before it.
    pub fn period_start(self, t: DateTime<Utc>, previous: bool) -> DateTime<Utc> {
        let unit = self.period_unit();
        let start = unit.floor(t);
        if previous {
            unit.shift(start, -1)
        } else {
            start
        }
    }

    /// [`Granularity::period_start`] as a unix timestamp.
    pub fn start_of_period(self, t: DateTime<Utc>, previous: bool) -> UnixTime {
        self.period_start(t, previous).timestamp()
    }

    /// Position of `t` inside its period.
    pub fn sub_step_index(self, t: DateTime<Utc>) -> u32 {
        match self {
            Self::Minute => t.second(),
            Self::Hour => t.minute(),
            Self::Day => t.hour(),
            Self::Month => t.day(),
            Self::Year => t.month(),
        }
    }

    /// Absolute timestamp of sub-step `index` in the period starting at `period_start`.
    pub fn sub_step_timestamp(self, period_start: DateTime<Utc>, index: u32) -> UnixTime {
        let offset = i64::from(index) - i64::from(self.first_index());
        self.sub_step_unit().shift(period_start, offset).timestamp()
    }

    /// Start of the period containing `t` plus `retention` whole periods.
    pub fn expire_at(self, t: DateTime<Utc>, retention: u32) -> UnixTime {
        let unit = self.period_unit();
        unit.shift(unit.floor(t), i64::from(retention)).timestamp()
    }

    /// Sub-steps in two whole periods, the most a graph can read back
    /// from the current and the previous bucket.
    pub fn max_steps(self) -> usize {
        match self {
            Self::Minute | Self::Hour => 120,
            Self::Day => 48,
            Self::Month => 62,
            Self::Year => 24,
        }
    }

    /// `step_count` ascending sub-step boundaries ending at the one containing `now`.
    ///
    /// `step_count` is capped at [`Granularity::max_steps`].
    pub fn bucket_timestamp_list(self, now: DateTime<Utc>, step_count: usize) -> Vec<UnixTime> {
        let unit = self.sub_step_unit();
        let boundary = unit.floor(now);
        (0..step_count.min(self.max_steps()))
            .rev()
            .map(|back| {
                let back = i64::try_from(back).unwrap_or(i64::MAX);
                unit.shift(boundary, -back).timestamp()
            })
            .collect()
    }
}

/// Named resolution: granularity, default graph length and bucket retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestepDefinition {
    /// Lookup name, e.g. `hour`.
    pub name: String,
    /// Short code appended to bucket keys, e.g. `h`.
    pub key: String,
    /// Period length.
    pub granularity: Granularity,
    /// Default number of points returned by a graph.
    pub steps: usize,
    /// Number of whole periods a bucket lives for after its period starts.
    pub retention: u32,
}

impl TimestepDefinition {
    /// Build a definition.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        granularity: Granularity,
        steps: usize,
        retention: u32,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            granularity,
            steps,
            retention,
        }
    }

    /// Minutes of the hour.
    pub fn hour() -> Self {
        Self::new("hour", "h", Granularity::Hour, 60, 2)
    }

    /// Hours of the day.
    pub fn day() -> Self {
        Self::new("day", "d", Granularity::Day, 24, 2)
    }

    /// Days of the month.
    pub fn month() -> Self {
        Self::new("month", "m", Granularity::Month, 30, 2)
    }

    /// Months of the year.
    pub fn year() -> Self {
        Self::new("year", "y", Granularity::Year, 12, 2)
    }

    /// The four standard timesteps.
    pub fn standard() -> Vec<Self> {
        vec![Self::hour(), Self::day(), Self::month(), Self::year()]
    }

    /// See [`Granularity::start_of_period`].
    pub fn start_of_period(&self, t: DateTime<Utc>, previous: bool) -> UnixTime {
        self.granularity.start_of_period(t, previous)
    }

    /// See [`Granularity::sub_step_index`].
    pub fn sub_step_index(&self, t: DateTime<Utc>) -> u32 {
        self.granularity.sub_step_index(t)
    }

    /// Expiry for a bucket first written at `t`.
    pub fn expire_at(&self, t: DateTime<Utc>) -> UnixTime {
        self.granularity.expire_at(t, self.retention)
    }

    /// See [`Granularity::max_steps`].
    pub fn max_steps(&self) -> usize {
        self.granularity.max_steps()
    }

    /// See [`Granularity::bucket_timestamp_list`].
    pub fn bucket_timestamp_list(&self, now: DateTime<Utc>, step_count: usize) -> Vec<UnixTime> {
        self.granularity.bucket_timestamp_list(now, step_count)
    }
}
