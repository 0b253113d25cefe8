use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use crate::coordinator::Coordinator;

/// Create the main application router
pub fn create_router(coordinator: Arc<Coordinator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/ping", get(handlers::ping))
        .route("/device_status", get(handlers::device_status))
        .route("/system_status", get(handlers::system_status))
        .route("/power_status", get(handlers::power_status))
        // Capture
        .route("/capture", get(handlers::capture).post(handlers::capture))
        .route("/list_files", get(handlers::list_files))
        .route("/images/:filename", get(handlers::get_image))
        // Auxiliary lights
        .route("/led1_status", get(handlers::led1_status))
        .route("/led2_status", get(handlers::led2_status))
        .route("/uv_status", get(handlers::uv_status))
        .route("/led1_toggle", get(handlers::led1_toggle).post(handlers::led1_toggle))
        .route("/led2_toggle", get(handlers::led2_toggle).post(handlers::led2_toggle))
        // Power
        .route("/poweroff", get(handlers::power_off).post(handlers::power_off))
        .route("/power_on", post(handlers::power_on))
        // Live video and events
        .route("/video_feed", get(handlers::video_feed))
        .route("/events", get(handlers::events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(coordinator)
}
