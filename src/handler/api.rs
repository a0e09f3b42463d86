use crate::{
    app::AppState,
    callrecord::CallRecord,
    event::CallEvent,
};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::{Duration as ChronoDuration, Utc};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, IntervalStream};
use tracing::{error, info, warn};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl PageQuery {
    /// 1-based page number and page size, clamped to sane bounds.
    fn bounds(&self) -> (usize, usize) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        (page, limit)
    }

    fn offset(&self) -> usize {
        let (page, limit) = self.bounds();
        (page - 1).saturating_mul(limit)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub hours: Option<i64>,
}

fn page_response(
    key: &str,
    page: usize,
    limit: usize,
    result: Result<Vec<CallRecord>>,
) -> Response {
    match result {
        Ok(records) => Json(serde_json::json!({
            key: records,
            "page": page,
            "limit": limit,
        }))
        .into_response(),
        Err(e) => {
            error!("failed to read call records: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "failed to read call records" })),
            )
                .into_response()
        }
    }
}

pub async fn list_calls(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    let (page, limit) = query.bounds();
    let result = state.flow.store().list(limit, query.offset()).await;
    page_response("calls", page, limit, result)
}

pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Response {
    let (page, limit) = query.bounds();
    let result = state.flow.store().messages(limit, query.offset()).await;
    page_response("messages", page, limit, result)
}

pub async fn call_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 366);
    let since = Utc::now() - ChronoDuration::hours(hours);
    match state.flow.store().stats_since(since).await {
        Ok(stats) => Json(serde_json::json!({
            "stats": stats,
            "since": since,
        }))
        .into_response(),
        Err(e) => {
            error!("failed to compute call stats: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "failed to compute call stats" })),
            )
                .into_response()
        }
    }
}

/// Live call events as server-sent events, opened with a `connected` event
/// and kept alive by periodic heartbeats.
pub async fn live_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let receiver = state.events.subscribe();
    info!(
        observers = state.events.observer_count(),
        "live observer connected"
    );

    let period = Duration::from_secs(state.config.broadcast.heartbeat_secs.max(1));
    let ticks = IntervalStream::new(interval_at(Instant::now() + period, period));
    let heartbeats = ticks.map(|_| CallEvent::heartbeat());
    let live = BroadcastStream::new(receiver).filter_map(|result| async move {
        match result {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "live observer lagging, events skipped");
                None
            }
        }
    });
    let events = stream::select(live, heartbeats);

    let stream = stream::once(async { CallEvent::connected() })
        .chain(events)
        .map(|event| Event::default().json_data(&event));
    Sse::new(stream)
}
