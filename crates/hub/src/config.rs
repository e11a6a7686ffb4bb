//! TOML config file loading and validation. Everything has a default, so an
//! empty or missing file yields a working hub.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use time::UtcOffset;

use crate::clock::parse_utc_offset;
use crate::coordinator::{Configuration, SLEEP_HOURS_RANGE, VALVE_MINUTES_RANGE};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::schedule::{ScheduleEntry, DEFAULT_WATERING_TIMES};
use crate::status::{DEFAULT_LIVENESS_TIMEOUT, DEFAULT_NO_SIGNAL_MESSAGE};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub device: DeviceSection,
    pub events: EventsSection,
    pub schedule: ScheduleSection,
    pub watering: WateringSection,
    /// Pin/constant table for the controller. Never interpreted here.
    pub controller: toml::Table,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub liveness_timeout_sec: i64,
    pub utc_offset: String,
    pub no_signal_message: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    pub capacity: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub watering_times: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WateringSection {
    pub valve_on_duration_minutes: i64,
    pub sleep_time_hours: f64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            liveness_timeout_sec: DEFAULT_LIVENESS_TIMEOUT.whole_seconds(),
            utc_offset: "+00:00".to_string(),
            no_signal_message: DEFAULT_NO_SIGNAL_MESSAGE.to_string(),
        }
    }
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            watering_times: DEFAULT_WATERING_TIMES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Default for WateringSection {
    fn default() -> Self {
        let c = Configuration::default();
        Self {
            valve_on_duration_minutes: c.valve_on_duration_minutes as i64,
            sleep_time_hours: c.sleep_time_hours,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_device(&mut errors);
        self.validate_schedule(&mut errors);
        self.validate_watering(&mut errors);

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.events.capacity == 0 {
            errors.push("events.capacity must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_device(&self, errors: &mut Vec<String>) {
        if self.device.liveness_timeout_sec <= 0 {
            errors.push(format!(
                "device.liveness_timeout_sec must be positive, got {}",
                self.device.liveness_timeout_sec
            ));
        }
        if let Err(e) = parse_utc_offset(&self.device.utc_offset) {
            errors.push(format!("device.utc_offset: {e}"));
        }
        if self.device.no_signal_message.trim().is_empty() {
            errors.push("device.no_signal_message is empty".to_string());
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        let times = &self.schedule.watering_times;
        if times.is_empty() {
            errors.push("schedule.watering_times must contain at least one time".to_string());
        }

        let mut seen: HashSet<ScheduleEntry> = HashSet::new();
        for (i, raw) in times.iter().enumerate() {
            match raw.parse::<ScheduleEntry>() {
                Ok(entry) => {
                    if !seen.insert(entry) {
                        errors.push(format!("schedule.watering_times[{i}]: duplicate time {entry}"));
                    }
                }
                Err(e) => errors.push(format!("schedule.watering_times[{i}]: {e}")),
            }
        }
    }

    fn validate_watering(&self, errors: &mut Vec<String>) {
        let w = &self.watering;
        if !VALVE_MINUTES_RANGE.contains(&w.valve_on_duration_minutes) {
            errors.push(format!(
                "watering.valve_on_duration_minutes {} out of range [{}, {}]",
                w.valve_on_duration_minutes,
                VALVE_MINUTES_RANGE.start(),
                VALVE_MINUTES_RANGE.end()
            ));
        }
        if !SLEEP_HOURS_RANGE.contains(&w.sleep_time_hours) {
            errors.push(format!(
                "watering.sleep_time_hours {} out of range [{}, {}]",
                w.sleep_time_hours,
                SLEEP_HOURS_RANGE.start(),
                SLEEP_HOURS_RANGE.end()
            ));
        }
    }

    /// The schedule zone. Only meaningful after `validate` succeeded.
    pub fn utc_offset(&self) -> UtcOffset {
        parse_utc_offset(&self.device.utc_offset).unwrap_or(UtcOffset::UTC)
    }

    /// The controller table as JSON, for handing to the device.
    pub fn controller_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&self.controller).context("controller table is not JSON-representable")
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file means
/// "all defaults".
pub fn load(path: &str) -> Result<Config> {
    let config: Config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::warn!(path, "config file not found, using defaults");
        Config::default()
    };

    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::offset;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[server]
port = 9000

[device]
liveness_timeout_sec = 300
utc_offset = "+01:00"
no_signal_message = "valve sensor silent"

[events]
capacity = 250

[schedule]
watering_times = ["06:00", "18:30"]

[watering]
valve_on_duration_minutes = 5
sleep_time_hours = 2.5

[controller]
pin_led = 2
pin_input = 4
standby_duration = 20000
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.device.liveness_timeout_sec, 300);
        assert_eq!(config.utc_offset(), offset!(+1));
        assert_eq!(config.events.capacity, 250);
        assert_eq!(config.schedule.watering_times, ["06:00", "18:30"]);
        assert_eq!(config.watering.valve_on_duration_minutes, 5);

        let blob = config.controller_json().unwrap();
        assert_eq!(blob["pin_input"], 4);
        assert_eq!(blob["standby_duration"], 20000);
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.device.liveness_timeout_sec, 600);
        assert_eq!(config.events.capacity, 1000);
        assert_eq!(config.schedule.watering_times, DEFAULT_WATERING_TIMES);
        assert_eq!(config.utc_offset(), UtcOffset::UTC);
        assert!(config.controller.is_empty());
    }

    #[test]
    fn parse_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str("[device]\nutc_offset = \"-05:00\"\n").unwrap();
        assert_eq!(config.device.liveness_timeout_sec, 600);
        assert_eq!(config.utc_offset(), offset!(-5));
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let config = load("/nonexistent/watering-hub/config.toml").unwrap();
        assert_eq!(config.server.port, 8080);
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn zero_liveness_timeout_rejected() {
        let mut cfg = Config::default();
        cfg.device.liveness_timeout_sec = 0;
        assert_validation_err(&cfg, "liveness_timeout_sec must be positive");
    }

    #[test]
    fn bad_offset_rejected() {
        let mut cfg = Config::default();
        cfg.device.utc_offset = "CET".into();
        assert_validation_err(&cfg, "device.utc_offset");
    }

    #[test]
    fn empty_schedule_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.watering_times.clear();
        assert_validation_err(&cfg, "at least one time");
    }

    #[test]
    fn malformed_schedule_entry_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.watering_times = vec!["06:00".into(), "6pm".into()];
        assert_validation_err(&cfg, "watering_times[1]");
    }

    #[test]
    fn duplicate_schedule_entry_rejected() {
        let mut cfg = Config::default();
        cfg.schedule.watering_times = vec!["06:00".into(), "6:00".into()];
        assert_validation_err(&cfg, "duplicate time 06:00");
    }

    #[test]
    fn watering_ranges_enforced() {
        let mut cfg = Config::default();
        cfg.watering.valve_on_duration_minutes = 61;
        assert_validation_err(&cfg, "valve_on_duration_minutes 61");

        let mut cfg = Config::default();
        cfg.watering.sleep_time_hours = 0.25;
        assert_validation_err(&cfg, "sleep_time_hours 0.25");
    }

    #[test]
    fn zero_capacity_rejected() {
        let mut cfg = Config::default();
        cfg.events.capacity = 0;
        assert_validation_err(&cfg, "events.capacity");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        cfg.device.liveness_timeout_sec = -1;
        cfg.device.no_signal_message = " ".into();
        cfg.watering.valve_on_duration_minutes = 0;

        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("4 errors"), "{msg}");
        assert!(msg.contains("server.port"), "{msg}");
        assert!(msg.contains("no_signal_message is empty"), "{msg}");
    }
}
