//! Daily watering schedule: a sorted set of time-of-day entries and the
//! next-occurrence calculation the device poll is answered from.
//!
//! The schedule is only ever replaced as a whole. It can never be emptied
//! through `set_schedule`, and a store built without explicit times starts
//! from [`DEFAULT_WATERING_TIMES`].

use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use time::{Duration, OffsetDateTime, Time, UtcOffset};

use crate::error::{CoreError, CoreResult};

/// Times used when nothing else has been configured.
pub const DEFAULT_WATERING_TIMES: [&str; 2] = ["00:09", "14:00"];

// ---------------------------------------------------------------------------
// ScheduleEntry
// ---------------------------------------------------------------------------

/// A time of day in 24-hour form, no date component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScheduleEntry {
    hour: u8,
    minute: u8,
}

impl ScheduleEntry {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    fn time(&self) -> Time {
        // Range is enforced by `new`, so this cannot fail.
        Time::from_hms(self.hour, self.minute, 0).unwrap_or(Time::MIDNIGHT)
    }
}

impl FromStr for ScheduleEntry {
    type Err = String;

    /// Accepts `HH:MM` (a single-digit hour is tolerated).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("'{s}' is not a valid HH:MM time");

        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let digits = |p: &str, max_len: usize| {
            !p.is_empty() && p.len() <= max_len && p.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(h, 2) || !digits(m, 2) || m.len() != 2 {
            return Err(invalid());
        }

        let hour: u8 = h.parse().map_err(|_| invalid())?;
        let minute: u8 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl fmt::Display for ScheduleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for ScheduleEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// ScheduleStore
// ---------------------------------------------------------------------------

pub struct ScheduleStore {
    entries: Vec<ScheduleEntry>,
    offset: UtcOffset,
}

impl ScheduleStore {
    /// A store holding [`DEFAULT_WATERING_TIMES`].
    pub fn new(offset: UtcOffset) -> Self {
        let entries = normalize(&DEFAULT_WATERING_TIMES).unwrap_or_default();
        Self { entries, offset }
    }

    pub fn with_times<S: AsRef<str>>(times: &[S], offset: UtcOffset) -> CoreResult<Self> {
        Ok(Self {
            entries: normalize(times)?,
            offset,
        })
    }

    /// Current entries, sorted ascending.
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// Replace the whole schedule. On error the stored schedule is untouched.
    pub fn set_schedule<S: AsRef<str>>(&mut self, times: &[S]) -> CoreResult<Vec<ScheduleEntry>> {
        let entries = normalize(times)?;
        self.entries = entries.clone();
        Ok(entries)
    }

    /// Earliest scheduled instant strictly after `now`, in UTC.
    ///
    /// Each entry is placed on today's date in the schedule zone; entries at
    /// or before `now` move to tomorrow.
    pub fn next_occurrence(&self, now: OffsetDateTime) -> CoreResult<OffsetDateTime> {
        let local_now = now.to_offset(self.offset);
        let today = local_now.date();

        self.entries
            .iter()
            .map(|entry| {
                let at = today.with_time(entry.time()).assume_offset(self.offset);
                if at <= local_now {
                    at + Duration::DAY
                } else {
                    at
                }
            })
            .min()
            .map(|at| at.to_offset(UtcOffset::UTC))
            .ok_or(CoreError::NoSchedule)
    }

    #[cfg(test)]
    pub(crate) fn empty(offset: UtcOffset) -> Self {
        Self {
            entries: Vec::new(),
            offset,
        }
    }
}

/// Parse, de-duplicate check, and sort a list of `HH:MM` strings.
fn normalize<S: AsRef<str>>(times: &[S]) -> CoreResult<Vec<ScheduleEntry>> {
    if times.is_empty() {
        return Err(CoreError::InvalidSchedule(
            "at least one watering time is required".to_string(),
        ));
    }

    let mut errors: Vec<String> = Vec::new();
    let mut seen: HashSet<ScheduleEntry> = HashSet::new();
    let mut entries = Vec::with_capacity(times.len());

    for raw in times {
        match raw.as_ref().parse::<ScheduleEntry>() {
            Ok(entry) => {
                if seen.insert(entry) {
                    entries.push(entry);
                } else {
                    errors.push(format!("duplicate time {entry}"));
                }
            }
            Err(e) => errors.push(e),
        }
    }

    if !errors.is_empty() {
        return Err(CoreError::InvalidSchedule(errors.join("; ")));
    }

    entries.sort();
    Ok(entries)
}

// ===========================================================================
// Tests
// ===========================================================================
