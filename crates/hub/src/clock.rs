//! Wall-clock source and fixed-zone formatting.
//!
//! Instants are kept in UTC everywhere inside the hub. The configured
//! `UtcOffset` is the single zone used to lay schedule entries onto the
//! calendar and to render timestamps at the JSON boundary.

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

/// Source of "now". Read once per request and passed down explicitly.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Render an instant as `YYYY-MM-DD HH:MM:SS` in the given zone.
pub fn format_local(ts: OffsetDateTime, offset: UtcOffset) -> String {
    ts.to_offset(offset)
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| ts.to_string())
}

/// Parse `+HH:MM` / `-HH:MM` (or `UTC`/`Z`) into a fixed offset.
pub fn parse_utc_offset(s: &str) -> Result<UtcOffset, String> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("utc") || s == "Z" {
        return Ok(UtcOffset::UTC);
    }
    UtcOffset::parse(
        s,
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .map_err(|e| format!("'{s}' is not a UTC offset like +01:00 ({e})"))
}

#[cfg(test)]
pub(crate) struct FixedClock(pub std::sync::Mutex<OffsetDateTime>);

#[cfg(test)]
impl FixedClock {
    pub(crate) fn at(ts: OffsetDateTime) -> Self {
        Self(std::sync::Mutex::new(ts))
    }

    pub(crate) fn set(&self, ts: OffsetDateTime) {
        *self.0.lock().unwrap() = ts;
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.0.lock().unwrap()
    }
}
