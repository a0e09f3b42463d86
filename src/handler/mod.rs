use crate::app::AppState;
use axum::{
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

pub mod api;
pub mod middleware;
#[cfg(test)]
mod tests;
pub mod webhook;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/voice", post(webhook::voice_handler))
        .route("/api/process-speech", post(webhook::speech_handler))
        .route(
            "/api/routing-status/{target}",
            post(webhook::routing_status_handler),
        )
        .route("/api/call-status", post(webhook::call_status_handler))
        .route("/api/live", get(api::live_events))
        .route("/api/calls", get(api::list_calls))
        .route("/api/messages", get(api::list_messages))
        .route("/api/stats", get(api::call_stats))
}

/// Wrap a gateway response document.
pub fn xml_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}
