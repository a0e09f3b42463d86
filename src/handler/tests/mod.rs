use crate::app::{AppState, AppStateBuilder};
use crate::callrecord::{CallOutcome, CallRecordStore, MemoryCallRecordStore};
use crate::classifier::KeywordClassifier;
use crate::config::{Config, RoutingConfig};
use crate::handler::{api, webhook, webhook::WebhookForm};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Form,
};
use std::sync::Arc;

const CALLER: &str = "+447700900001";
const EMMA: &str = "+447700900002";
const MICHAEL: &str = "+447700900003";

async fn test_state() -> (AppState, Arc<MemoryCallRecordStore>) {
    let store = Arc::new(MemoryCallRecordStore::new());
    let config = Config {
        routing: RoutingConfig {
            emma_phone: Some(EMMA.to_string()),
            michael_phone: Some(MICHAEL.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let state = AppStateBuilder::new()
        .config(config)
        .with_store(store.clone())
        .with_classifier(Arc::new(KeywordClassifier))
        .build()
        .await
        .unwrap();
    (state, store)
}

fn form(call_sid: Option<&str>) -> WebhookForm {
    WebhookForm {
        call_sid: call_sid.map(str::to_string),
        from: Some(CALLER.to_string()),
        to: Some("+447700900000".to_string()),
        ..Default::default()
    }
}

async fn response_to_string(response: Response) -> String {
    let body = response.into_body();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn assert_xml(response: &Response) {
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/xml"
    );
}

#[tokio::test]
async fn test_voice_webhook_greets() {
    let (state, store) = test_state().await;
    let response = webhook::voice_handler(State(state), Ok(Form(form(Some("CA1"))))).await;
    assert_xml(&response);
    let body = response_to_string(response).await;
    assert!(body.contains("<Gather"));
    assert!(body.contains("/api/process-speech"));
    assert!(store.get("CA1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_call_sid_is_safe() {
    let (state, store) = test_state().await;

    let response = webhook::voice_handler(State(state.clone()), Ok(Form(form(None)))).await;
    assert_xml(&response);
    let body = response_to_string(response).await;
    assert!(body.contains("<Hangup/>"));

    let mut speech = form(Some("  "));
    speech.speech_result = Some("Emma please".to_string());
    let response = webhook::speech_handler(State(state.clone()), Ok(Form(speech))).await;
    assert_xml(&response);
    assert!(!response_to_string(response).await.contains("<Dial"));

    let response = webhook::call_status_handler(State(state), Ok(Form(form(None)))).await;
    assert_xml(&response);
    assert!(store.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_speech_webhook_dials_emma() {
    let (state, store) = test_state().await;
    let mut speech = form(Some("CA1"));
    speech.speech_result = Some("Can I talk to Emma?".to_string());
    let response = webhook::speech_handler(State(state), Ok(Form(speech))).await;
    assert_xml(&response);
    let body = response_to_string(response).await;
    assert!(body.contains(&format!("<Number>{}</Number>", EMMA)));
    assert!(body.contains("/api/routing-status/emma"));
    assert_eq!(
        store.get("CA1").await.unwrap().unwrap().outcome,
        CallOutcome::AttemptingEmmaRouting
    );
}

#[tokio::test]
async fn test_routing_status_falls_back() {
    let (state, store) = test_state().await;
    let mut speech = form(Some("CA1"));
    speech.speech_result = Some("Emma".to_string());
    webhook::speech_handler(State(state.clone()), Ok(Form(speech))).await;

    let mut status = form(Some("CA1"));
    status.dial_call_status = Some("busy".to_string());
    let response = webhook::routing_status_handler(
        State(state.clone()),
        Path("emma".to_string()),
        Ok(Form(status)),
    )
    .await;
    assert_xml(&response);
    let body = response_to_string(response).await;
    assert!(body.contains(&format!("<Number>{}</Number>", MICHAEL)));
    assert_eq!(
        store.get("CA1").await.unwrap().unwrap().outcome,
        CallOutcome::EmmaFailedRoutingToMichael
    );

    let response = webhook::routing_status_handler(
        State(state),
        Path("reception".to_string()),
        Ok(Form(form(Some("CA1")))),
    )
    .await;
    assert_xml(&response);
    assert!(response_to_string(response).await.contains("<Hangup/>"));
}

#[tokio::test]
async fn test_call_status_records_message() {
    let (state, store) = test_state().await;
    let mut status = form(Some("CA1"));
    status.call_status = Some("completed".to_string());
    status.call_duration = Some("37".to_string());
    status.recording_url = Some("https://recordings.example/RE1".to_string());
    let response = webhook::call_status_handler(State(state.clone()), Ok(Form(status))).await;
    assert_xml(&response);

    let record = store.get("CA1").await.unwrap().unwrap();
    assert_eq!(record.outcome, CallOutcome::Completed);
    assert_eq!(record.duration, Some(37));

    let response =
        api::list_messages(State(state.clone()), Query(api::PageQuery::default())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value =
        serde_json::from_str(&response_to_string(response).await).unwrap();
    assert_eq!(json["messages"].as_array().unwrap().len(), 1);
    assert_eq!(json["messages"][0]["call_id"], "CA1");

    let response = api::call_stats(State(state), Query(api::StatsQuery::default())).await;
    let json: serde_json::Value =
        serde_json::from_str(&response_to_string(response).await).unwrap();
    assert_eq!(json["stats"]["total_calls"], 1);
    assert_eq!(json["stats"]["messages_taken"], 1);
}

#[tokio::test]
async fn test_list_calls_pages() {
    let (state, _) = test_state().await;
    for call_id in ["CA1", "CA2", "CA3"] {
        webhook::voice_handler(State(state.clone()), Ok(Form(form(Some(call_id))))).await;
    }
    let response = api::list_calls(
        State(state),
        Query(api::PageQuery {
            page: Some(2),
            limit: Some(2),
        }),
    )
    .await;
    let json: serde_json::Value =
        serde_json::from_str(&response_to_string(response).await).unwrap();
    assert_eq!(json["page"], 2);
    assert_eq!(json["limit"], 2);
    assert_eq!(json["calls"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_calls_far_page_is_empty() {
    let (state, _) = test_state().await;
    webhook::voice_handler(State(state.clone()), Ok(Form(form(Some("CA1"))))).await;

    let response = api::list_calls(
        State(state.clone()),
        Query(api::PageQuery {
            page: Some(usize::MAX),
            limit: Some(100),
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value =
        serde_json::from_str(&response_to_string(response).await).unwrap();
    assert!(json["calls"].as_array().unwrap().is_empty());

    let response = api::list_messages(
        State(state),
        Query(api::PageQuery {
            page: Some(usize::MAX),
            limit: Some(usize::MAX),
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}
