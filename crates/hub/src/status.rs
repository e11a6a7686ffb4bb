//! Device-facing state and the derived status shown to operators.
//!
//! The raw [`DeviceState`] is only mutated through [`StatusEngine`]; every
//! transition is mirrored into the [`EventLog`] passed in by the caller.
//!
//! ## Status precedence
//!
//! ```text
//! offline   last contact older than the liveness timeout
//!   > watering   device reported the valve open
//!     > error    an error message is set
//!       > idle
//! ```

use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::error::{CoreError, CoreResult};
use crate::events::{EventKind, EventLog};

/// How long the device may stay silent before it reads as offline.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::seconds(600);

/// Error text set when the device reports a missing valve-sensor signal.
pub const DEFAULT_NO_SIGNAL_MESSAGE: &str = "No signal from valve sensor";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Idle,
    Watering,
    Error,
    Offline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub is_watering: bool,
    pub error_message: Option<String>,
    pub manual_watering_requested: bool,
    pub last_watering: Option<OffsetDateTime>,
    pub last_device_contact: Option<OffsetDateTime>,
}

impl DeviceState {
    pub fn has_error(&self) -> bool {
        self.error_message.as_deref().is_some_and(|m| !m.is_empty())
    }
}

pub struct StatusEngine {
    state: DeviceState,
    liveness_timeout: Duration,
    no_signal_message: String,
}

impl StatusEngine {
    pub fn new(liveness_timeout: Duration, no_signal_message: impl Into<String>) -> Self {
        Self {
            state: DeviceState::default(),
            liveness_timeout,
            no_signal_message: no_signal_message.into(),
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// A device that has never made contact is not considered offline.
    pub fn is_offline(&self, now: OffsetDateTime) -> bool {
        self.state
            .last_device_contact
            .is_some_and(|seen| now - seen > self.liveness_timeout)
    }

    pub fn status(&self, now: OffsetDateTime) -> DeviceStatus {
        if self.is_offline(now) {
            DeviceStatus::Offline
        } else if self.state.is_watering {
            DeviceStatus::Watering
        } else if self.state.has_error() {
            DeviceStatus::Error
        } else {
            DeviceStatus::Idle
        }
    }

    pub fn record_contact(&mut self, now: OffsetDateTime) {
        self.state.last_device_contact = Some(now);
    }

    /// Repeated reports with the same value are logged again.
    pub fn report_watering(&mut self, is_watering: bool, now: OffsetDateTime, log: &mut EventLog) {
        self.record_contact(now);
        self.state.is_watering = is_watering;

        if is_watering {
            self.state.error_message = None;
            log.record(now, EventKind::Watering, "Watering started");
        } else {
            self.state.last_watering = Some(now);
            log.record(now, EventKind::Watering, "Watering completed");
        }
    }

    /// Leaves `is_watering` as it was.
    pub fn report_no_signal(&mut self, now: OffsetDateTime, log: &mut EventLog) {
        self.record_contact(now);
        self.state.error_message = Some(self.no_signal_message.clone());
        log.record(now, EventKind::Error, self.no_signal_message.as_str());
    }

    /// `device_timestamp` is the device's own clock reading, kept as text.
    pub fn report_light(
        &mut self,
        light_status: &str,
        device_timestamp: &str,
        now: OffsetDateTime,
        log: &mut EventLog,
    ) {
        self.record_contact(now);
        log.record(
            now,
            EventKind::Light,
            format!("Light {light_status} at {device_timestamp}"),
        );
    }

    pub fn request_manual_watering(&mut self, now: OffsetDateTime, log: &mut EventLog) -> CoreResult<()> {
        if self.state.is_watering {
            return Err(CoreError::AlreadyWatering);
        }
        self.state.manual_watering_requested = true;
        self.state.error_message = None;
        log.record(now, EventKind::Manual, "Manual watering requested");
        Ok(())
    }

    /// Returns whether a manual request was pending, clearing it.
    pub fn consume_manual_request(&mut self) -> bool {
        std::mem::take(&mut self.state.manual_watering_requested)
    }

    pub fn clear_error(&mut self, now: OffsetDateTime, log: &mut EventLog) {
        self.state.error_message = None;
        log.record(now, EventKind::System, "Error cleared");
    }
}

impl Default for StatusEngine {
    fn default() -> Self {
        Self::new(DEFAULT_LIVENESS_TIMEOUT, DEFAULT_NO_SIGNAL_MESSAGE)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-05-01 12:00 UTC);

    fn engine() -> (StatusEngine, EventLog) {
        (StatusEngine::default(), EventLog::new(50))
    }

    fn kinds(log: &EventLog) -> Vec<EventKind> {
        log.recent(50).into_iter().map(|e| e.kind).collect()
    }

    // -- Derived status -----------------------------------------------------

    #[test]
    fn fresh_engine_is_idle() {
        let (e, _) = engine();
        assert_eq!(e.status(T0), DeviceStatus::Idle);
        assert!(!e.is_offline(T0 + Duration::days(30)));
    }

    #[test]
    fn offline_takes_precedence_over_everything() {
        let (mut e, mut log) = engine();
        e.report_watering(true, T0, &mut log);
        e.report_no_signal(T0, &mut log);
        assert!(e.state().is_watering);
        assert!(e.state().has_error());

        let later = T0 + DEFAULT_LIVENESS_TIMEOUT + Duration::seconds(1);
        assert_eq!(e.status(later), DeviceStatus::Offline);
    }

    #[test]
    fn exactly_at_timeout_is_not_offline() {
        let (mut e, _) = engine();
        e.record_contact(T0);
        assert_eq!(e.status(T0 + DEFAULT_LIVENESS_TIMEOUT), DeviceStatus::Idle);
    }

    #[test]
    fn watering_beats_error() {
        let (mut e, mut log) = engine();
        e.report_watering(true, T0, &mut log);
        e.report_no_signal(T0, &mut log);
        assert_eq!(e.status(T0), DeviceStatus::Watering);
    }

    #[test]
    fn error_when_message_set() {
        let (mut e, mut log) = engine();
        e.report_no_signal(T0, &mut log);
        assert_eq!(e.status(T0), DeviceStatus::Error);
    }

    #[test]
    fn empty_error_message_is_not_an_error() {
        let (mut e, _) = engine();
        e.state.error_message = Some(String::new());
        assert_eq!(e.status(T0), DeviceStatus::Idle);
    }

    #[test]
    fn contact_brings_device_back_online() {
        let (mut e, _) = engine();
        e.record_contact(T0);
        let later = T0 + Duration::hours(1);
        assert_eq!(e.status(later), DeviceStatus::Offline);
        e.record_contact(later);
        assert_eq!(e.status(later), DeviceStatus::Idle);
    }

    // -- report_watering ----------------------------------------------------

    #[test]
    fn watering_cycle_sets_last_watering() {
        let (mut e, mut log) = engine();
        let t1 = T0 + Duration::minutes(5);
        e.report_watering(true, T0, &mut log);
        e.report_watering(false, t1, &mut log);

        assert_eq!(e.state().last_watering, Some(t1));
        assert_eq!(e.state().last_device_contact, Some(t1));
        assert_eq!(e.status(t1), DeviceStatus::Idle);

        let msgs: Vec<_> = log.recent(10).into_iter().map(|ev| ev.message).collect();
        assert_eq!(msgs, ["Watering completed", "Watering started"]);
    }

    #[test]
    fn watering_start_clears_error() {
        let (mut e, mut log) = engine();
        e.report_no_signal(T0, &mut log);
        e.report_watering(true, T0, &mut log);
        assert_eq!(e.state().error_message, None);
    }

    #[test]
    fn watering_stop_keeps_error() {
        let (mut e, mut log) = engine();
        e.report_no_signal(T0, &mut log);
        e.report_watering(false, T0, &mut log);
        assert!(e.state().has_error());
        assert_eq!(e.status(T0), DeviceStatus::Error);
    }

    #[test]
    fn repeated_report_logs_again() {
        let (mut e, mut log) = engine();
        e.report_watering(true, T0, &mut log);
        e.report_watering(true, T0 + Duration::seconds(30), &mut log);
        assert_eq!(log.len(), 2);
        assert_eq!(e.state().last_device_contact, Some(T0 + Duration::seconds(30)));
    }

    // -- report_no_signal ---------------------------------------------------

    #[test]
    fn no_signal_sets_error_and_keeps_watering() {
        let (mut e, mut log) = engine();
        e.report_watering(true, T0, &mut log);
        let t1 = T0 + Duration::seconds(10);
        e.report_no_signal(t1, &mut log);

        assert!(e.state().is_watering);
        assert_eq!(
            e.state().error_message.as_deref(),
            Some(DEFAULT_NO_SIGNAL_MESSAGE)
        );
        assert_eq!(e.state().last_device_contact, Some(t1));
        assert_eq!(kinds(&log)[0], EventKind::Error);
    }

    #[test]
    fn custom_no_signal_message() {
        let mut e = StatusEngine::new(DEFAULT_LIVENESS_TIMEOUT, "valve stuck");
        let mut log = EventLog::new(5);
        e.report_no_signal(T0, &mut log);
        assert_eq!(e.state().error_message.as_deref(), Some("valve stuck"));
        assert_eq!(log.recent(1)[0].message, "valve stuck");
    }

    // -- report_light -------------------------------------------------------

    #[test]
    fn light_report_logs_and_stamps_contact() {
        let (mut e, mut log) = engine();
        e.report_light("on", "2024-05-01 13:59:00", T0, &mut log);
        assert_eq!(e.state().last_device_contact, Some(T0));
        let ev = &log.recent(1)[0];
        assert_eq!(ev.kind, EventKind::Light);
        assert_eq!(ev.message, "Light on at 2024-05-01 13:59:00");
    }

    // -- Manual override ----------------------------------------------------

    #[test]
    fn manual_request_while_watering_rejected() {
        let (mut e, mut log) = engine();
        e.report_watering(true, T0, &mut log);
        let before = log.len();

        assert_eq!(
            e.request_manual_watering(T0, &mut log),
            Err(CoreError::AlreadyWatering)
        );
        assert!(!e.state().manual_watering_requested);
        assert_eq!(log.len(), before);
    }

    #[test]
    fn manual_request_sets_flag_and_clears_error() {
        let (mut e, mut log) = engine();
        e.report_no_signal(T0, &mut log);
        e.request_manual_watering(T0, &mut log).unwrap();

        assert!(e.state().manual_watering_requested);
        assert_eq!(e.state().error_message, None);
        assert_eq!(kinds(&log)[0], EventKind::Manual);
    }

    #[test]
    fn manual_request_consumed_exactly_once() {
        let (mut e, mut log) = engine();
        e.request_manual_watering(T0, &mut log).unwrap();
        assert!(e.consume_manual_request());
        assert!(!e.consume_manual_request());
    }

    #[test]
    fn consume_without_request_is_false() {
        let (mut e, _) = engine();
        assert!(!e.consume_manual_request());
    }

    // -- clear_error --------------------------------------------------------

    #[test]
    fn clear_error_logs_system_event() {
        let (mut e, mut log) = engine();
        e.report_no_signal(T0, &mut log);
        e.clear_error(T0, &mut log);
        assert_eq!(e.state().error_message, None);
        assert_eq!(e.status(T0), DeviceStatus::Idle);
        assert_eq!(kinds(&log)[0], EventKind::System);
    }
}
