use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use time::{Duration, OffsetDateTime, UtcOffset};
use tokio::net::TcpListener;
use tracing::info;

use crate::clock::{format_local, Clock};
use crate::coordinator::{Coordinator, StatusSnapshot};
use crate::error::CoreError;
use crate::events::{Event, EventKind};
use crate::status::DeviceStatus;

const DEFAULT_STATUS_EVENTS: usize = 10;
const DEFAULT_EVENT_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    fn fmt(&self, ts: OffsetDateTime) -> String {
        format_local(ts, self.coordinator.offset())
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/device/poll", get(device_poll))
        .route("/api/device/watering", post(device_watering))
        .route("/api/device/no-signal", post(device_no_signal))
        .route("/api/device/light", post(device_light))
        .route("/api/device/config", get(device_config))
        .route("/api/status", get(api_status))
        .route("/api/events", get(api_events))
        .route("/api/manual-water", post(manual_water))
        .route("/api/clear-error", post(clear_error))
        .route("/api/schedule", get(get_schedule).post(set_schedule))
        .route("/api/config", get(get_config).post(set_config))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct PollResponse {
    time_until_watering: i64,
    valve_on_duration_minutes: u32,
    sleep_time: i64,
    current_time: String,
    next_watering_time: String,
}

#[derive(Deserialize)]
struct WateringReport {
    #[serde(rename = "isWatering")]
    is_watering: bool,
}

#[derive(Deserialize)]
struct LightReport {
    status: String,
    timestamp: String,
}

#[derive(Serialize, Deserialize)]
struct ScheduleBody {
    watering_times: Vec<String>,
}

#[derive(Deserialize)]
struct ConfigBody {
    valve_on_duration_minutes: i64,
    sleep_time_hours: f64,
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct EventView {
    timestamp: String,
    #[serde(rename = "type")]
    kind: EventKind,
    message: String,
}

#[derive(Serialize)]
struct StatusView {
    status: DeviceStatus,
    is_watering: bool,
    error_message: Option<String>,
    manual_watering_requested: bool,
    last_watering: Option<String>,
    last_device_contact: Option<String>,
    next_watering_time: Option<String>,
    time_until_watering: Option<String>,
    current_time: String,
    events: Vec<EventView>,
}

fn event_view(e: Event, offset: UtcOffset) -> EventView {
    EventView {
        timestamp: format_local(e.timestamp, offset),
        kind: e.kind,
        message: e.message,
    }
}

fn status_view(s: StatusSnapshot, offset: UtcOffset) -> StatusView {
    let fmt = |ts: OffsetDateTime| format_local(ts, offset);
    StatusView {
        status: s.status,
        is_watering: s.is_watering,
        error_message: s.error_message,
        manual_watering_requested: s.manual_watering_requested,
        last_watering: s.last_watering.map(fmt),
        last_device_contact: s.last_device_contact.map(fmt),
        next_watering_time: s.next_watering_time.map(fmt),
        time_until_watering: s.time_until_watering.map(format_remaining),
        current_time: fmt(s.current_time),
        events: s.events.into_iter().map(|e| event_view(e, offset)).collect(),
    }
}

/// `"<h>h <m>m"`, rounded down to the minute.
fn format_remaining(d: Duration) -> String {
    let minutes = d.whole_minutes().max(0);
    format!("{}h {}m", minutes / 60, minutes % 60)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        let status = if e.is_validation() {
            StatusCode::BAD_REQUEST
        } else if e == CoreError::AlreadyWatering {
            StatusCode::CONFLICT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: e.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: e.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "status": "error", "message": self.message })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Device handlers
// ---------------------------------------------------------------------------

async fn device_poll(State(state): State<AppState>) -> Json<PollResponse> {
    let poll = state.coordinator.poll_for_device(state.now());
    Json(PollResponse {
        time_until_watering: poll.seconds_until_watering,
        valve_on_duration_minutes: poll.valve_on_duration_minutes,
        sleep_time: poll.sleep_time_secs,
        current_time: state.fmt(poll.current_time),
        next_watering_time: state.fmt(poll.next_watering_time),
    })
}

async fn device_watering(
    State(state): State<AppState>,
    body: std::result::Result<Json<WateringReport>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(report) = body?;
    state.coordinator.report_status(report.is_watering, state.now());
    Ok(Json(json!({ "status": "success" })))
}

async fn device_no_signal(State(state): State<AppState>) -> impl IntoResponse {
    state.coordinator.report_silence(state.now());
    Json(json!({ "status": "success" }))
}

async fn device_light(
    State(state): State<AppState>,
    body: std::result::Result<Json<LightReport>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(report) = body?;
    state
        .coordinator
        .report_light(&report.status, &report.timestamp, state.now());
    Ok(Json(json!({ "status": "success" })))
}

async fn device_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.controller_blob().clone())
}

// ---------------------------------------------------------------------------
// Operator handlers
// ---------------------------------------------------------------------------

async fn api_status(
    State(state): State<AppState>,
    query: std::result::Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(q) = query?;
    let snapshot = state
        .coordinator
        .get_status_snapshot(state.now(), q.limit.unwrap_or(DEFAULT_STATUS_EVENTS));
    Ok(Json(status_view(snapshot, state.coordinator.offset())))
}

async fn api_events(
    State(state): State<AppState>,
    query: std::result::Result<Query<LimitQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(q) = query?;
    let offset = state.coordinator.offset();
    let events: Vec<EventView> = state
        .coordinator
        .recent_events(q.limit.unwrap_or(DEFAULT_EVENT_LIMIT))
        .into_iter()
        .map(|e| event_view(e, offset))
        .collect();
    Ok(Json(json!({ "events": events })))
}

async fn manual_water(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.coordinator.request_manual_water(state.now())?;
    Ok(Json(json!({ "status": "success" })))
}

async fn clear_error(State(state): State<AppState>) -> impl IntoResponse {
    state.coordinator.clear_error(state.now());
    Json(json!({ "status": "success" }))
}

async fn get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    let watering_times = state
        .coordinator
        .schedule()
        .iter()
        .map(ToString::to_string)
        .collect();
    Json(ScheduleBody { watering_times })
}

async fn set_schedule(
    State(state): State<AppState>,
    body: std::result::Result<Json<ScheduleBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let entries = state
        .coordinator
        .set_schedule(body.watering_times.as_slice(), state.now())?;
    Ok(Json(json!({ "status": "success", "watering_times": entries })))
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.configuration())
}

async fn set_config(
    State(state): State<AppState>,
    body: std::result::Result<Json<ConfigBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let config = state.coordinator.set_configuration(
        body.valve_on_duration_minutes,
        body.sleep_time_hours,
        state.now(),
    )?;
    Ok(Json(json!({
        "status": "success",
        "valve_on_duration_minutes": config.valve_on_duration_minutes,
        "sleep_time_hours": config.sleep_time_hours,
    })))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "web api listening");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
