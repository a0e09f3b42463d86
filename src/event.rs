use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Kind of a live notification, serialized as the `type` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEventKind {
    #[serde(rename = "call_status")]
    Status,
    Classified,
    Routing,
    Completed,
    Connected,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    #[serde(rename = "type")]
    pub kind: CallEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CallEvent {
    fn new(kind: CallEventKind) -> Self {
        Self {
            kind,
            call_id: None,
            status: None,
            message: None,
            intent: None,
            target: None,
            outcome: None,
            timestamp: Utc::now(),
        }
    }

    pub fn status(call_id: &str, status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: Some(call_id.to_string()),
            status: Some(status.into()),
            message: Some(message.into()),
            ..Self::new(CallEventKind::Status)
        }
    }

    pub fn classified(call_id: &str, intent: &str, caller_name: Option<&str>) -> Self {
        let message = match caller_name {
            Some(name) => format!("Intent classified as: {} (caller: {})", intent, name),
            None => format!("Intent classified as: {}", intent),
        };
        Self {
            call_id: Some(call_id.to_string()),
            status: Some("Processing Intent".to_string()),
            message: Some(message),
            intent: Some(intent.to_string()),
            ..Self::new(CallEventKind::Classified)
        }
    }

    pub fn routing(
        call_id: &str,
        target: Option<&str>,
        outcome: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            call_id: Some(call_id.to_string()),
            status: Some("Routing".to_string()),
            message: Some(message.into()),
            target: target.map(|t| t.to_string()),
            outcome: Some(outcome.to_string()),
            ..Self::new(CallEventKind::Routing)
        }
    }

    pub fn completed(call_id: &str, outcome: &str, message: impl Into<String>) -> Self {
        Self {
            call_id: Some(call_id.to_string()),
            status: Some("Call Ended".to_string()),
            message: Some(message.into()),
            outcome: Some(outcome.to_string()),
            ..Self::new(CallEventKind::Completed)
        }
    }

    pub fn connected() -> Self {
        Self {
            message: Some("Dashboard connected".to_string()),
            ..Self::new(CallEventKind::Connected)
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(CallEventKind::Heartbeat)
    }
}

pub type EventSender = broadcast::Sender<CallEvent>;
pub type EventReceiver = broadcast::Receiver<CallEvent>;

/// Fan-out of call events to live observers.
///
/// Delivery is at-most-once: an observer that falls more than `capacity`
/// events behind skips the oldest ones. `publish` never waits on an observer.
pub struct EventBroadcaster {
    sender: EventSender,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, event: CallEvent) {
        if let Err(e) = self.sender.send(event) {
            debug!(kind = ?e.0.kind, "no live observers, event dropped");
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
