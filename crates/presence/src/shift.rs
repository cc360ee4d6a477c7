//! Shift windows: day runs 08:00-17:00 local, night covers the rest.
//!
//! A moment before 08:00 belongs to the night shift that started at
//! 17:00 the previous day. Windows are computed in the workspace
//! timezone and returned as UTC instants.

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use switchboard_core::error::{PresenceError, Result};
use switchboard_store::{Settings, TIMEZONE_KEY};
use tokio::sync::RwLock;
use tracing::warn;

/// Local hour the day shift starts (inclusive).
pub const DAY_START_HOUR: u32 = 8;

/// Local hour the day shift ends (exclusive).
pub const DAY_END_HOUR: u32 = 17;

/// Environment variable consulted when no timezone has been persisted.
pub const TZ_ENV: &str = "SWITCHBOARD_TZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftName {
    Day,
    Night,
}

impl ShiftName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftName::Day => "day",
            ShiftName::Night => "night",
        }
    }
}

impl std::fmt::Display for ShiftName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A half-open shift window `[start_utc, end_utc)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftWindow {
    pub name: ShiftName,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

/// The shift window containing `now`, in the given timezone. Unknown
/// timezone names fall back to UTC rather than failing: a misconfigured
/// workspace still gets a usable window.
pub fn current_window(now: DateTime<Utc>, tz_name: &str) -> ShiftWindow {
    let tz: Tz = tz_name.parse().unwrap_or(Tz::UTC);
    let local = now.with_timezone(&tz);
    let date = local.date_naive();
    let hour = local.hour();

    if (DAY_START_HOUR..DAY_END_HOUR).contains(&hour) {
        ShiftWindow {
            name: ShiftName::Day,
            start_utc: to_utc(date, DAY_START_HOUR, tz),
            end_utc: to_utc(date, DAY_END_HOUR, tz),
        }
    } else if hour >= DAY_END_HOUR {
        ShiftWindow {
            name: ShiftName::Night,
            start_utc: to_utc(date, DAY_END_HOUR, tz),
            end_utc: to_utc(date + Days::new(1), DAY_START_HOUR, tz),
        }
    } else {
        ShiftWindow {
            name: ShiftName::Night,
            start_utc: to_utc(date - Days::new(1), DAY_END_HOUR, tz),
            end_utc: to_utc(date, DAY_START_HOUR, tz),
        }
    }
}

/// Resolve a local wall-clock hour to a UTC instant. DST folds take the
/// earlier offset; wall clocks skipped by a spring-forward jump shift
/// one hour later.
fn to_utc(date: NaiveDate, hour: u32, tz: Tz) -> DateTime<Utc> {
    let wall = date.and_time(NaiveTime::from_hms_opt(hour, 0, 0).expect("valid wall-clock hour"));
    match tz.from_local_datetime(&wall) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let retry = wall + chrono::Duration::hours(1);
            match tz.from_local_datetime(&retry) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
                LocalResult::None => Utc.from_utc_datetime(&wall),
            }
        }
    }
}

/// Resolves the workspace timezone: persisted setting first, then the
/// `SWITCHBOARD_TZ` environment variable, then UTC. The resolved name is
/// cached for the life of the process; `set_timezone` refreshes it.
pub struct TimezoneResolver {
    settings: Settings,
    cached: RwLock<Option<String>>,
}

impl TimezoneResolver {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            cached: RwLock::new(None),
        }
    }

    pub async fn resolve(&self) -> Result<String> {
        if let Some(name) = self.cached.read().await.clone() {
            return Ok(name);
        }

        let name = match self.settings.get(TIMEZONE_KEY).await? {
            Some(stored) if stored.parse::<Tz>().is_ok() => stored,
            Some(stored) => {
                warn!(timezone = %stored, "stored timezone is not a known zone, ignoring");
                self.fallback()
            }
            None => self.fallback(),
        };

        *self.cached.write().await = Some(name.clone());
        Ok(name)
    }

    fn fallback(&self) -> String {
        if let Ok(value) = std::env::var(TZ_ENV) {
            if value.parse::<Tz>().is_ok() {
                return value;
            }
            warn!(timezone = %value, "SWITCHBOARD_TZ is not a known zone, ignoring");
        }
        "UTC".to_string()
    }

    /// Persist a new workspace timezone. The name must be a known IANA
    /// zone.
    pub async fn set_timezone(&self, tz_name: &str) -> Result<String> {
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| PresenceError::InvalidTimezone(tz_name.to_string()))?;

        let canonical = tz.name().to_string();
        self.settings.set(TIMEZONE_KEY, &canonical).await?;
        *self.cached.write().await = Some(canonical.clone());
        Ok(canonical)
    }

    /// The shift window containing `now` in the workspace timezone.
    pub async fn current_window(&self, now: DateTime<Utc>) -> Result<ShiftWindow> {
        let tz_name = self.resolve().await?;
        Ok(current_window(now, &tz_name))
    }
}
