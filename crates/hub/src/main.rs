mod clock;
mod config;
mod coordinator;
mod error;
mod events;
mod schedule;
mod status;
mod web;

use anyhow::{Context, Result};
use std::{env, sync::Arc};
use time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clock::{Clock, SystemClock};
use coordinator::{Configuration, Coordinator};
use events::EventLog;
use schedule::ScheduleStore;
use status::StatusEngine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;

    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(cfg.server.port);

    // ── Coordinator (process-lifetime, shared with every handler) ──
    let offset = cfg.utc_offset();
    let schedule = ScheduleStore::with_times(cfg.schedule.watering_times.as_slice(), offset)
        .context("invalid schedule in config")?;
    let status = StatusEngine::new(
        Duration::seconds(cfg.device.liveness_timeout_sec),
        cfg.device.no_signal_message.clone(),
    );
    let watering = Configuration::new(
        cfg.watering.valve_on_duration_minutes,
        cfg.watering.sleep_time_hours,
    )
    .context("invalid watering config")?;

    let coordinator = Arc::new(Coordinator::new(
        schedule,
        status,
        EventLog::new(cfg.events.capacity),
        watering,
        cfg.controller_json()?,
    ));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    coordinator.record_startup(clock.now());

    info!(
        config = %config_path,
        utc_offset = %offset,
        times = ?cfg.schedule.watering_times,
        liveness_timeout_sec = cfg.device.liveness_timeout_sec,
        event_capacity = cfg.events.capacity,
        "coordinator ready"
    );

    // ── Web server ──────────────────────────────────────────────────
    web::serve(web::AppState { coordinator, clock }, port).await
}
