use super::*;
use chrono::Duration as ChronoDuration;
use tempfile::tempdir;

fn routed(call_id: &str, outcome: CallOutcome) -> CallRecord {
    let mut record = CallRecord::new(call_id, "+447700900001", "+447700900000");
    record.outcome = outcome;
    record
}

#[test]
fn test_apply_merges_set_fields_only() {
    let mut record = CallRecord::new("CA1", "+447700900001", "+447700900000");
    record.apply(CallRecordUpdate {
        transcript: Some("Emma please".to_string()),
        intent: Some("emma_request".to_string()),
        ..Default::default()
    });
    record.apply(
        CallRecordUpdate::outcome(CallOutcome::AttemptingEmmaRouting).with_status("routing"),
    );

    assert_eq!(record.transcript.as_deref(), Some("Emma please"));
    assert_eq!(record.intent.as_deref(), Some("emma_request"));
    assert_eq!(record.outcome, CallOutcome::AttemptingEmmaRouting);
    assert_eq!(record.status, "routing");
    assert_eq!(record.from, "+447700900001");
}

#[test]
fn test_terminal_outcome_is_kept() {
    let mut record = routed("CA1", CallOutcome::EmmaRouted);
    record.state = CallState::Completed;
    record.apply(
        CallRecordUpdate::outcome(CallOutcome::AttemptingMichaelRouting)
            .with_state(CallState::Fallback),
    );
    assert_eq!(record.outcome, CallOutcome::EmmaRouted);
    assert_eq!(record.state, CallState::Completed);

    record.apply(CallRecordUpdate {
        outcome: Some(CallOutcome::Completed),
        state: Some(CallState::Completed),
        final_status: true,
        ..Default::default()
    });
    assert_eq!(record.outcome, CallOutcome::Completed);
}

#[test]
fn test_empty_numbers_do_not_overwrite() {
    let mut record = CallRecord::new("CA1", "+447700900001", "+447700900000");
    record.apply(CallRecordUpdate {
        from: Some(String::new()),
        ..Default::default()
    });
    assert_eq!(record.from, "+447700900001");
}

#[test]
fn test_stats_collect() {
    let mut with_message = routed("CA4", CallOutcome::MichaelFailedTakingMessage);
    with_message.recording_url = Some("https://recordings.example/RE4".to_string());
    let records = vec![
        routed("CA1", CallOutcome::EmmaRouted),
        routed("CA2", CallOutcome::MichaelRouted),
        routed("CA3", CallOutcome::Filtered),
        with_message,
        routed("CA5", CallOutcome::AllRoutingFailed),
        routed("CA6", CallOutcome::Failed),
    ];
    let stats = CallStats::collect(&records);
    assert_eq!(
        stats,
        CallStats {
            total_calls: 6,
            successful_routes: 2,
            filtered_calls: 1,
            messages_taken: 1,
            failed_calls: 2,
        }
    );
}

#[test]
fn test_outcome_wire_names() {
    assert_eq!(
        serde_json::to_string(&CallOutcome::EmmaFailedRoutingToMichael).unwrap(),
        "\"emma_failed_routing_to_michael\""
    );
    assert_eq!(
        CallOutcome::SelfRoutingBlocked.to_string(),
        "self_routing_blocked"
    );
    assert!(!CallOutcome::SelfRoutingBlocked.is_terminal());
    assert!(CallOutcome::Filtered.is_terminal());
}

#[tokio::test]
async fn test_memory_store_create_merges() {
    let store = MemoryCallRecordStore::new();
    store
        .create(CallRecord::new("CA1", "+447700900001", "+447700900000"))
        .await
        .unwrap();
    store
        .update(
            "CA1",
            CallRecordUpdate::outcome(CallOutcome::AttemptingEmmaRouting),
        )
        .await
        .unwrap();

    // a replayed initiation must not reset progress
    store
        .create(CallRecord::new("CA1", "+447700900001", "+447700900000"))
        .await
        .unwrap();
    let record = store.get("CA1").await.unwrap().unwrap();
    assert_eq!(record.outcome, CallOutcome::AttemptingEmmaRouting);
}

#[tokio::test]
async fn test_memory_store_update_upserts() {
    let store = MemoryCallRecordStore::new();
    let merged = store
        .update("CA9", CallRecordUpdate::outcome(CallOutcome::RoutingFailed))
        .await
        .unwrap();
    assert_eq!(merged.call_id, "CA9");
    assert_eq!(merged.outcome, CallOutcome::RoutingFailed);
    assert_eq!(store.all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_and_messages_newest_first() {
    let store = MemoryCallRecordStore::new();
    let base = Utc::now();
    for (idx, call_id) in ["CA1", "CA2", "CA3"].iter().enumerate() {
        let mut record = CallRecord::new(*call_id, "+447700900001", "+447700900000");
        record.created_at = base + ChronoDuration::seconds(idx as i64);
        store.create(record).await.unwrap();
    }
    store
        .update(
            "CA2",
            CallRecordUpdate {
                recording_url: Some("https://recordings.example/RE2".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let page: Vec<String> = store
        .list(2, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.call_id)
        .collect();
    assert_eq!(page, vec!["CA3", "CA2"]);

    let page: Vec<String> = store
        .list(2, 2)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.call_id)
        .collect();
    assert_eq!(page, vec!["CA1"]);

    let messages = store.messages(10, 0).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].call_id, "CA2");
}

#[tokio::test]
async fn test_stats_since_window() {
    let store = MemoryCallRecordStore::new();
    let mut old = routed("CA1", CallOutcome::EmmaRouted);
    old.created_at = Utc::now() - ChronoDuration::days(2);
    store.create(old).await.unwrap();
    store
        .create(routed("CA2", CallOutcome::Filtered))
        .await
        .unwrap();

    let stats = store
        .stats_since(Utc::now() - ChronoDuration::hours(24))
        .await
        .unwrap();
    assert_eq!(stats.total_calls, 1);
    assert_eq!(stats.filtered_calls, 1);
    assert_eq!(stats.successful_routes, 0);
}

#[tokio::test]
async fn test_local_store_roundtrip() {
    let dir = tempdir().unwrap();
    let store = LocalCallRecordStore::new(dir.path().join("calls")).unwrap();

    store
        .create(CallRecord::new("CA1", "+447700900001", "+447700900000"))
        .await
        .unwrap();
    store
        .update(
            "CA1",
            CallRecordUpdate::outcome(CallOutcome::EmmaRouted).with_state(CallState::Connected),
        )
        .await
        .unwrap();
    let merged = store
        .update(
            "CA1",
            CallRecordUpdate::outcome(CallOutcome::AttemptingMichaelRouting),
        )
        .await
        .unwrap();
    assert_eq!(merged.outcome, CallOutcome::EmmaRouted);

    // reopen to make sure the merge hit the disk
    let reopened = LocalCallRecordStore::new(dir.path().join("calls")).unwrap();
    let record = reopened.get("CA1").await.unwrap().unwrap();
    assert_eq!(record.outcome, CallOutcome::EmmaRouted);
    assert_eq!(record.state, CallState::Connected);
    assert_eq!(reopened.all().await.unwrap().len(), 1);
    assert!(reopened.get("CA2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_local_store_rejects_bad_ids() {
    let dir = tempdir().unwrap();
    let store = LocalCallRecordStore::new(dir.path()).unwrap();
    assert!(store
        .update("../escape", CallRecordUpdate::default())
        .await
        .is_err());
    assert!(store.get("").await.is_err());
}

#[tokio::test]
async fn test_local_store_skips_corrupt_files() {
    let dir = tempdir().unwrap();
    let store = LocalCallRecordStore::new(dir.path()).unwrap();
    store
        .create(CallRecord::new("CA1", "+447700900001", "+447700900000"))
        .await
        .unwrap();
    std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();

    let records = store.all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].call_id, "CA1");
}
