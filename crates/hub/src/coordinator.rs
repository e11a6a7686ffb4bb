//! The single entry point the transport layer talks to.
//!
//! Schedule, device state, event log and watering configuration live behind
//! one `RwLock`. Every mutating call holds the write lock for the whole
//! operation, so a device poll sees contact stamp, schedule lookup and
//! manual-override consumption as one consistent step. Nothing awaits while
//! the lock is held.

use serde::Serialize;
use std::ops::RangeInclusive;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::events::{Event, EventKind, EventLog};
use crate::schedule::{ScheduleEntry, ScheduleStore};
use crate::status::{DeviceStatus, StatusEngine};

pub const VALVE_MINUTES_RANGE: RangeInclusive<i64> = 1..=60;
pub const SLEEP_HOURS_RANGE: RangeInclusive<f64> = 0.5..=24.0;

// ---------------------------------------------------------------------------
// Watering configuration
// ---------------------------------------------------------------------------

/// What the device is told on every poll besides the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Configuration {
    pub valve_on_duration_minutes: u32,
    pub sleep_time_hours: f64,
}

impl Configuration {
    pub fn new(valve_on_duration_minutes: i64, sleep_time_hours: f64) -> CoreResult<Self> {
        let mut errors: Vec<String> = Vec::new();

        if !VALVE_MINUTES_RANGE.contains(&valve_on_duration_minutes) {
            errors.push(format!(
                "valve_on_duration_minutes {valve_on_duration_minutes} out of range [{}, {}]",
                VALVE_MINUTES_RANGE.start(),
                VALVE_MINUTES_RANGE.end()
            ));
        }
        if !SLEEP_HOURS_RANGE.contains(&sleep_time_hours) {
            errors.push(format!(
                "sleep_time_hours {sleep_time_hours} out of range [{}, {}]",
                SLEEP_HOURS_RANGE.start(),
                SLEEP_HOURS_RANGE.end()
            ));
        }

        if !errors.is_empty() {
            return Err(CoreError::Validation(errors.join("; ")));
        }

        Ok(Self {
            valve_on_duration_minutes: valve_on_duration_minutes as u32,
            sleep_time_hours,
        })
    }

    /// Sleep interval in whole seconds, as handed to the device.
    pub fn sleep_time_secs(&self) -> i64 {
        (self.sleep_time_hours * 3600.0).round() as i64
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            valve_on_duration_minutes: 1,
            sleep_time_hours: 4.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Views handed back to the transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DevicePoll {
    pub seconds_until_watering: i64,
    pub valve_on_duration_minutes: u32,
    pub sleep_time_secs: i64,
    pub current_time: OffsetDateTime,
    pub next_watering_time: OffsetDateTime,
    /// A pending manual request was applied by this poll.
    pub manual: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub status: DeviceStatus,
    pub is_watering: bool,
    pub error_message: Option<String>,
    pub manual_watering_requested: bool,
    pub last_watering: Option<OffsetDateTime>,
    pub last_device_contact: Option<OffsetDateTime>,
    pub next_watering_time: Option<OffsetDateTime>,
    pub time_until_watering: Option<Duration>,
    pub current_time: OffsetDateTime,
    pub events: Vec<Event>,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

struct Inner {
    schedule: ScheduleStore,
    status: StatusEngine,
    events: EventLog,
    config: Configuration,
}

pub struct Coordinator {
    inner: RwLock<Inner>,
    offset: UtcOffset,
    controller: serde_json::Value,
}

impl Coordinator {
    pub fn new(
        schedule: ScheduleStore,
        status: StatusEngine,
        events: EventLog,
        config: Configuration,
        controller: serde_json::Value,
    ) -> Self {
        Self {
            offset: schedule.offset(),
            inner: RwLock::new(Inner {
                schedule,
                status,
                events,
                config,
            }),
            controller,
        }
    }

    // Operations never leave `Inner` half-updated, so a poisoned lock still
    // guards consistent state.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Zone used for schedule placement and display formatting.
    pub fn offset(&self) -> UtcOffset {
        self.offset
    }

    /// The controller's pin/constant table, passed through untouched.
    pub fn controller_blob(&self) -> &serde_json::Value {
        &self.controller
    }

    pub fn record_startup(&self, now: OffsetDateTime) {
        let mut inner = self.write();
        inner.events.record(now, EventKind::System, "Coordinator started");
    }

    // -- Device-facing ------------------------------------------------------

    pub fn poll_for_device(&self, now: OffsetDateTime) -> DevicePoll {
        let mut guard = self.write();
        let inner = &mut *guard;

        inner.status.record_contact(now);

        let next = match inner.schedule.next_occurrence(now) {
            Ok(next) => next,
            Err(e) => {
                error!("poll: cannot compute next watering time: {e}");
                inner.events.record(
                    now,
                    EventKind::Error,
                    format!("{e}; next watering deferred by one day"),
                );
                now + Duration::DAY
            }
        };

        let manual = inner.status.consume_manual_request();
        let seconds_until_watering = if manual {
            inner
                .events
                .record(now, EventKind::Manual, "Manual watering sent to device");
            0
        } else {
            (next - now).whole_seconds()
        };

        debug!(
            seconds_until_watering,
            manual,
            next = %next,
            "poll: answered device"
        );

        DevicePoll {
            seconds_until_watering,
            valve_on_duration_minutes: inner.config.valve_on_duration_minutes,
            sleep_time_secs: inner.config.sleep_time_secs(),
            current_time: now,
            next_watering_time: next,
            manual,
        }
    }

    pub fn report_status(&self, is_watering: bool, now: OffsetDateTime) {
        let mut guard = self.write();
        let inner = &mut *guard;
        inner.status.report_watering(is_watering, now, &mut inner.events);
        info!(is_watering, "device reported watering state");
    }

    pub fn report_silence(&self, now: OffsetDateTime) {
        let mut guard = self.write();
        let inner = &mut *guard;
        inner.status.report_no_signal(now, &mut inner.events);
        warn!("device reported no valve-sensor signal");
    }

    pub fn report_light(&self, light_status: &str, device_timestamp: &str, now: OffsetDateTime) {
        let mut guard = self.write();
        let inner = &mut *guard;
        inner
            .status
            .report_light(light_status, device_timestamp, now, &mut inner.events);
        debug!(light_status, device_timestamp, "device reported light status");
    }

    // -- Operator-facing ----------------------------------------------------

    pub fn request_manual_water(&self, now: OffsetDateTime) -> CoreResult<()> {
        let mut guard = self.write();
        let inner = &mut *guard;
        match inner.status.request_manual_watering(now, &mut inner.events) {
            Ok(()) => {
                info!("manual watering queued for next poll");
                Ok(())
            }
            Err(e) => {
                warn!("manual watering rejected: {e}");
                Err(e)
            }
        }
    }

    pub fn clear_error(&self, now: OffsetDateTime) {
        let mut guard = self.write();
        let inner = &mut *guard;
        inner.status.clear_error(now, &mut inner.events);
        info!("device error cleared");
    }

    /// Read-only view for dashboards. Only the derived fields depend on `now`.
    pub fn get_status_snapshot(&self, now: OffsetDateTime, event_limit: usize) -> StatusSnapshot {
        let inner = self.read();
        let state = inner.status.state();
        let next = inner.schedule.next_occurrence(now).ok();

        StatusSnapshot {
            status: inner.status.status(now),
            is_watering: state.is_watering,
            error_message: state.error_message.clone(),
            manual_watering_requested: state.manual_watering_requested,
            last_watering: state.last_watering,
            last_device_contact: state.last_device_contact,
            next_watering_time: next,
            time_until_watering: next.map(|n| n - now),
            current_time: now,
            events: inner.events.recent(event_limit),
        }
    }

    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        self.read().events.recent(limit)
    }

    pub fn schedule(&self) -> Vec<ScheduleEntry> {
        self.read().schedule.entries().to_vec()
    }

    pub fn set_schedule<S: AsRef<str>>(
        &self,
        times: &[S],
        now: OffsetDateTime,
    ) -> CoreResult<Vec<ScheduleEntry>> {
        let mut guard = self.write();
        let inner = &mut *guard;

        let entries = inner.schedule.set_schedule(times).map_err(|e| {
            warn!("schedule update rejected: {e}");
            e
        })?;

        let listed = entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        inner
            .events
            .record(now, EventKind::Schedule, format!("Watering schedule set to {listed}"));
        info!(times = %listed, "watering schedule replaced");

        Ok(entries)
    }

    pub fn configuration(&self) -> Configuration {
        self.read().config
    }

    pub fn set_configuration(
        &self,
        valve_on_duration_minutes: i64,
        sleep_time_hours: f64,
        now: OffsetDateTime,
    ) -> CoreResult<Configuration> {
        let config = Configuration::new(valve_on_duration_minutes, sleep_time_hours).map_err(|e| {
            warn!("configuration update rejected: {e}");
            e
        })?;

        let mut inner = self.write();
        inner.config = config;
        inner.events.record(
            now,
            EventKind::Config,
            format!(
                "Configuration updated: valve on {} min, sleep {} h",
                config.valve_on_duration_minutes, config.sleep_time_hours
            ),
        );
        info!(
            valve_on_duration_minutes = config.valve_on_duration_minutes,
            sleep_time_hours = config.sleep_time_hours,
            "watering configuration replaced"
        );

        Ok(config)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
