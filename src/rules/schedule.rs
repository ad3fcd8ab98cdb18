//! Next-fire-time arithmetic for timer-driven rules, plus the clock seam
//! that lets tests inject a deterministic "now".

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("bad time '{0}', expected hh:mm:ss")]
    BadTime(String),
}

/// Source of the current UTC time. Everything that schedules work goes
/// through this so tests can pin the clock.
#[derive(Clone)]
pub struct Clock {
    now: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl Clock {
    pub fn system() -> Clock {
        Clock {
            now: Arc::new(Utc::now),
        }
    }

    /// A clock frozen at `at`.
    pub fn fixed(at: DateTime<Utc>) -> Clock {
        Clock {
            now: Arc::new(move || at),
        }
    }

    pub fn now_utc(&self) -> DateTime<Utc> {
        (self.now)()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock").finish_non_exhaustive()
    }
}

/// Parses `hh:mm:ss` as a duration, clamped to at least one second.
pub fn parse_interval(text: &str) -> Result<Duration, ScheduleError> {
    let mut parts = text.split(':');
    let mut field = || {
        parts
            .next()
            .and_then(|p| p.parse::<i64>().ok())
            .filter(|n| *n >= 0)
            .ok_or_else(|| ScheduleError::BadTime(text.to_owned()))
    };

    let hours = field()?;
    let minutes = field()?;
    let seconds = field()?;
    if parts.next().is_some() {
        return Err(ScheduleError::BadTime(text.to_owned()));
    }

    let total = Duration::seconds(hours * 3600 + minutes * 60 + seconds);
    Ok(total.max(Duration::seconds(1)))
}

/// Parses `hh:mm:ss` as a wall-clock time of day.
pub fn parse_time_of_day(text: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .map_err(|_| ScheduleError::BadTime(text.to_owned()))
}

/// Least `midnight_utc + k * every` strictly greater than `now`.
pub fn next_interval(now: DateTime<Utc>, every: Duration) -> DateTime<Utc> {
    let every = every.max(Duration::seconds(1));
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc();

    let elapsed_ms = (now - midnight).num_milliseconds();
    let every_ms = every.num_milliseconds();
    let k = elapsed_ms / every_ms + 1;

    midnight + Duration::milliseconds(k * every_ms)
}

/// Next UTC instant whose wall time in `zone` equals `at`, strictly after
/// `now`. `zone` is fixed for the process lifetime; a DST change shows up
/// as a single 23- or 25-hour gap between consecutive firings.
pub fn next_daily(now: DateTime<Utc>, at: NaiveTime, zone: FixedOffset) -> DateTime<Utc> {
    let offset = Duration::seconds(i64::from(zone.local_minus_utc()));
    let mut date = now.with_timezone(&zone).date_naive();

    loop {
        let candidate = (date.and_time(at) - offset).and_utc();
        if candidate > now {
            return candidate;
        }
        date = date.succ_opt().expect("date range exhausted");
    }
}

/// Which solar event a daily rule tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SunEvent {
    Rise,
    Set,
}

/// Next sunrise or sunset strictly after `now` for the observer position.
pub fn next_sun_event(
    now: DateTime<Utc>,
    event: SunEvent,
    latitude: f64,
    longitude: f64,
) -> DateTime<Utc> {
    let mut date = now.date_naive();

    // The next event is almost always today or tomorrow; scan a few days to
    // ride out polar-adjacent edge cases.
    for _ in 0..4 {
        use chrono::Datelike;

        let (rise, set) =
            sunrise::sunrise_sunset(latitude, longitude, date.year(), date.month(), date.day());
        let timestamp = match event {
            SunEvent::Rise => rise,
            SunEvent::Set => set,
        };

        if let Some(candidate) = DateTime::from_timestamp(timestamp, 0) {
            if candidate > now {
                return candidate;
            }
        }

        date = date.succ_opt().expect("date range exhausted");
    }

    // Degenerate fallback: try again in a day.
    now + Duration::days(1)
}
