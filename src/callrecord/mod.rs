use crate::call::CallState;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};
use tokio::sync::RwLock;
use tracing::debug;

pub mod storage;
#[cfg(test)]
mod tests;

pub use storage::LocalCallRecordStore;

/// Classification attached to a call record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Processing,
    RoutingFailed,
    AttemptingEmmaRouting,
    EmmaFailedRoutingToMichael,
    AttemptingMichaelRouting,
    MichaelFailedTakingMessage,
    EmmaRouted,
    MichaelRouted,
    Filtered,
    AllRoutingFailed,
    Completed,
    Failed,
    SelfRoutingBlocked,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Processing => "processing",
            CallOutcome::RoutingFailed => "routing_failed",
            CallOutcome::AttemptingEmmaRouting => "attempting_emma_routing",
            CallOutcome::EmmaFailedRoutingToMichael => "emma_failed_routing_to_michael",
            CallOutcome::AttemptingMichaelRouting => "attempting_michael_routing",
            CallOutcome::MichaelFailedTakingMessage => "michael_failed_taking_message",
            CallOutcome::EmmaRouted => "emma_routed",
            CallOutcome::MichaelRouted => "michael_routed",
            CallOutcome::Filtered => "filtered",
            CallOutcome::AllRoutingFailed => "all_routing_failed",
            CallOutcome::Completed => "completed",
            CallOutcome::Failed => "failed",
            CallOutcome::SelfRoutingBlocked => "self_routing_blocked",
        }
    }

    /// Terminal outcomes are only replaced by the final call-status event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallOutcome::Completed
                | CallOutcome::Failed
                | CallOutcome::AllRoutingFailed
                | CallOutcome::Filtered
                | CallOutcome::EmmaRouted
                | CallOutcome::MichaelRouted
        )
    }

    pub fn is_routed(&self) -> bool {
        matches!(self, CallOutcome::EmmaRouted | CallOutcome::MichaelRouted)
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub from: String,
    pub to: String,
    pub state: CallState,
    pub status: String,
    pub outcome: CallOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update merged into a stored record. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallRecordUpdate {
    pub from: Option<String>,
    pub to: Option<String>,
    pub state: Option<CallState>,
    pub status: Option<String>,
    pub outcome: Option<CallOutcome>,
    pub transcript: Option<String>,
    pub intent: Option<String>,
    pub caller_name: Option<String>,
    pub routing_target: Option<String>,
    pub duration: Option<u64>,
    pub recording_url: Option<String>,
    /// Set by the final call-status event, the only update allowed to
    /// replace a terminal outcome.
    pub final_status: bool,
}

impl CallRecordUpdate {
    pub fn outcome(outcome: CallOutcome) -> Self {
        Self {
            outcome: Some(outcome),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: CallState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

impl CallRecord {
    pub fn new(call_id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            call_id: call_id.into(),
            from: from.into(),
            to: to.into(),
            state: CallState::Incoming,
            status: "incoming".to_string(),
            outcome: CallOutcome::Processing,
            transcript: None,
            intent: None,
            caller_name: None,
            routing_target: None,
            duration: None,
            recording_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge `update` into the record, keeping terminal outcomes and states
    /// unless the update comes from the final call-status event.
    pub fn apply(&mut self, update: CallRecordUpdate) {
        let locked = !update.final_status;
        if let Some(from) = update.from.filter(|v| !v.is_empty()) {
            self.from = from;
        }
        if let Some(to) = update.to.filter(|v| !v.is_empty()) {
            self.to = to;
        }
        if let Some(outcome) = update.outcome {
            if locked && self.outcome.is_terminal() && outcome != self.outcome {
                debug!(
                    call_id = self.call_id,
                    current = %self.outcome,
                    rejected = %outcome,
                    "terminal outcome kept"
                );
            } else {
                self.outcome = outcome;
            }
        }
        if let Some(state) = update.state {
            if !(locked && self.state.is_terminal()) {
                self.state = state;
            }
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if update.transcript.is_some() {
            self.transcript = update.transcript;
        }
        if update.intent.is_some() {
            self.intent = update.intent;
        }
        if update.caller_name.is_some() {
            self.caller_name = update.caller_name;
        }
        if update.routing_target.is_some() {
            self.routing_target = update.routing_target;
        }
        if update.duration.is_some() {
            self.duration = update.duration;
        }
        if update.recording_url.is_some() {
            self.recording_url = update.recording_url;
        }
        self.updated_at = Utc::now();
    }

    /// Fold a second initiation of the same call into this record without
    /// resetting its progress.
    fn merge_created(&mut self, created: CallRecord) {
        if self.from.is_empty() {
            self.from = created.from;
        }
        if self.to.is_empty() {
            self.to = created.to;
        }
        if created.created_at < self.created_at {
            self.created_at = created.created_at;
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStats {
    pub total_calls: usize,
    pub successful_routes: usize,
    pub filtered_calls: usize,
    pub messages_taken: usize,
    pub failed_calls: usize,
}

impl CallStats {
    pub fn collect<'a>(records: impl IntoIterator<Item = &'a CallRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total_calls += 1;
            if record.outcome.is_routed() {
                stats.successful_routes += 1;
            }
            match record.outcome {
                CallOutcome::Filtered => stats.filtered_calls += 1,
                CallOutcome::Failed | CallOutcome::AllRoutingFailed => stats.failed_calls += 1,
                _ => {}
            }
            if record.recording_url.is_some() {
                stats.messages_taken += 1;
            }
        }
        stats
    }
}

fn newest_first(mut records: Vec<CallRecord>) -> Vec<CallRecord> {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records
}

/// Durable, merge-on-write log of call metadata.
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    /// Insert a record, or fold it into an existing record with the same id.
    async fn create(&self, record: CallRecord) -> Result<()>;
    /// Upsert-merge a partial update and return the merged record.
    async fn update(&self, call_id: &str, update: CallRecordUpdate) -> Result<CallRecord>;
    async fn get(&self, call_id: &str) -> Result<Option<CallRecord>>;
    async fn all(&self) -> Result<Vec<CallRecord>>;

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<CallRecord>> {
        Ok(newest_first(self.all().await?)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// Calls that left a recording, newest first.
    async fn messages(&self, limit: usize, offset: usize) -> Result<Vec<CallRecord>> {
        Ok(newest_first(self.all().await?)
            .into_iter()
            .filter(|r| r.recording_url.is_some())
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn stats_since(&self, since: DateTime<Utc>) -> Result<CallStats> {
        let records = self.all().await?;
        Ok(CallStats::collect(
            records.iter().filter(|r| r.created_at >= since),
        ))
    }
}

#[derive(Default)]
pub struct MemoryCallRecordStore {
    records: RwLock<HashMap<String, CallRecord>>,
}

impl MemoryCallRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallRecordStore for MemoryCallRecordStore {
    async fn create(&self, record: CallRecord) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.call_id) {
            Some(existing) => existing.merge_created(record),
            None => {
                records.insert(record.call_id.clone(), record);
            }
        }
        Ok(())
    }

    async fn update(&self, call_id: &str, update: CallRecordUpdate) -> Result<CallRecord> {
        let mut records = self.records.write().await;
        let record = records
            .entry(call_id.to_string())
            .or_insert_with(|| CallRecord::new(call_id, "", ""));
        record.apply(update);
        Ok(record.clone())
    }

    async fn get(&self, call_id: &str) -> Result<Option<CallRecord>> {
        Ok(self.records.read().await.get(call_id).cloned())
    }

    async fn all(&self) -> Result<Vec<CallRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
