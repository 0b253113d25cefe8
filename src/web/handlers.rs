use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::coordinator::{Coordinator, SystemStatus};
use crate::error::Result;
use crate::indicator::IndicatorId;
use crate::power::SystemState;
use crate::storage::CapturePage;
use crate::stream::{no_cache_headers, CONTENT_TYPE};

type AppState = State<Arc<Coordinator>>;

// ============================================================================
// Status
// ============================================================================

#[derive(Serialize)]
pub struct PingResponse {
    pub status: &'static str,
    pub code: u16,
}

/// Client liveness ping; wakes the system from idle
pub async fn ping(State(coordinator): AppState) -> Json<PingResponse> {
    coordinator.record_ping().await;
    Json(PingResponse {
        status: "pong",
        code: 200,
    })
}

#[derive(Serialize)]
pub struct DeviceStatus {
    pub online: bool,
}

pub async fn device_status() -> Json<DeviceStatus> {
    Json(DeviceStatus { online: true })
}

pub async fn system_status(State(coordinator): AppState) -> Json<SystemStatus> {
    Json(coordinator.system_state().await)
}

#[derive(Serialize)]
pub struct PowerStatus {
    pub powered_on: bool,
    pub state: SystemState,
}

pub async fn power_status(State(coordinator): AppState) -> Json<PowerStatus> {
    let status = coordinator.system_state().await;
    Json(PowerStatus {
        powered_on: status.power_on,
        state: status.state,
    })
}

// ============================================================================
// Capture
// ============================================================================

#[derive(Serialize)]
pub struct CaptureResponse {
    pub status: &'static str,
    pub started: bool,
}

/// Start a still capture in the background
pub async fn capture(State(coordinator): AppState) -> Json<CaptureResponse> {
    let started = coordinator.start_capture().await;
    Json(CaptureResponse {
        status: if started {
            "capture_started"
        } else {
            "powered_off"
        },
        started,
    })
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    10
}

pub async fn list_files(
    State(coordinator): AppState,
    Query(query): Query<ListQuery>,
) -> Result<Json<CapturePage>> {
    Ok(Json(
        coordinator.list_captures(query.page, query.per_page).await?,
    ))
}

pub async fn get_image(
    State(coordinator): AppState,
    Path(filename): Path<String>,
) -> Result<Response> {
    let (data, content_type) = coordinator.fetch_capture(&filename).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}

// ============================================================================
// Indicators
// ============================================================================

#[derive(Serialize)]
pub struct IndicatorResponse {
    pub active: bool,
}

pub async fn led1_status(State(coordinator): AppState) -> Json<IndicatorResponse> {
    Json(IndicatorResponse {
        active: coordinator.indicator_state(IndicatorId::Aux1),
    })
}

pub async fn led2_status(State(coordinator): AppState) -> Json<IndicatorResponse> {
    Json(IndicatorResponse {
        active: coordinator.indicator_state(IndicatorId::Aux2),
    })
}

#[derive(Serialize)]
pub struct UvStatus {
    #[serde(rename = "UV_A")]
    pub uv_a: bool,
    #[serde(rename = "UV_B")]
    pub uv_b: bool,
}

pub async fn uv_status(State(coordinator): AppState) -> Json<UvStatus> {
    Json(UvStatus {
        uv_a: coordinator.indicator_state(IndicatorId::Aux1),
        uv_b: coordinator.indicator_state(IndicatorId::Aux2),
    })
}

pub async fn led1_toggle(State(coordinator): AppState) -> Result<Json<IndicatorResponse>> {
    let active = coordinator.toggle_indicator(IndicatorId::Aux1).await?;
    Ok(Json(IndicatorResponse { active }))
}

pub async fn led2_toggle(State(coordinator): AppState) -> Result<Json<IndicatorResponse>> {
    let active = coordinator.toggle_indicator(IndicatorId::Aux2).await?;
    Ok(Json(IndicatorResponse { active }))
}

// ============================================================================
// Power
// ============================================================================

#[derive(Serialize)]
pub struct PowerResponse {
    pub status: &'static str,
    pub accepted: bool,
}

pub async fn power_off(State(coordinator): AppState) -> Json<PowerResponse> {
    let accepted = coordinator.request_power_off().await;
    if !accepted {
        info!("Power-off request ignored: not running");
    }
    Json(PowerResponse {
        status: "powering_off",
        accepted,
    })
}

pub async fn power_on(State(coordinator): AppState) -> Json<PowerResponse> {
    let accepted = coordinator.power_on().await;
    Json(PowerResponse {
        status: "powering_on",
        accepted,
    })
}

// ============================================================================
// Video and events
// ============================================================================

/// Live MJPEG feed; the session ends when the client disconnects
pub async fn video_feed(State(coordinator): AppState) -> Result<Response> {
    let (session, body_stream) = coordinator.open_video_stream().await?;
    info!("Video feed opened (session {})", session);

    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE))],
        no_cache_headers(),
        Body::from_stream(body_stream),
    )
        .into_response())
}

/// System events as server-sent events
pub async fn events(
    State(coordinator): AppState,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let mut rx = coordinator.events().subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.event_name()).json_data(&event) {
                    Ok(sse) => yield Ok(sse),
                    Err(e) => warn!("Failed to serialize {}: {}", event.event_name(), e),
                },
                Err(RecvError::Lagged(n)) => warn!("Event subscriber lagged, {} events dropped", n),
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>camkeeper</title></head>
<body>
<h1>Camera Controller</h1>
<ul>
    <li><a href="/video_feed">Live Video Feed</a></li>
    <li><a href="/capture">Capture Image</a></li>
    <li><a href="/device_status">Device Status</a></li>
    <li><a href="/system_status">System Status</a></li>
    <li><a href="/power_status">Power Status</a></li>
    <li><a href="/led1_status">LED1 Status</a></li>
    <li><a href="/led2_status">LED2 Status</a></li>
    <li><a href="/uv_status">UV Status</a></li>
    <li><a href="/led1_toggle">Toggle LED1</a></li>
    <li><a href="/led2_toggle">Toggle LED2</a></li>
    <li><a href="/list_files">List Captured Images</a></li>
    <li><a href="/ping">Ping Device</a></li>
    <li><a href="/poweroff">Power Off</a></li>
</ul>
</body>
</html>
"#;
