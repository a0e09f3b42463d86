use serde::{Deserialize, Serialize};
use std::fmt;

pub mod attempts;
pub mod flow;
pub mod routing;

pub use attempts::{AttemptTracker, InMemoryAttemptTracker};
pub use flow::{CallFlow, DialStatus, Reply};
pub use routing::{Action, FallbackChain, RouteDecision, RouteTarget, TargetName};

/// Where a call is in its routing lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Incoming,
    GatheringSpeech,
    Classifying,
    Routing(String),
    RoutingCallbackPending(String),
    Connected,
    Fallback,
    Voicemail,
    Completed,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Completed | CallState::Failed)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Incoming => write!(f, "incoming"),
            CallState::GatheringSpeech => write!(f, "gathering_speech"),
            CallState::Classifying => write!(f, "classifying"),
            CallState::Routing(target) => write!(f, "routing({})", target),
            CallState::RoutingCallbackPending(target) => {
                write!(f, "routing_callback_pending({})", target)
            }
            CallState::Connected => write!(f, "connected"),
            CallState::Fallback => write!(f, "fallback"),
            CallState::Voicemail => write!(f, "voicemail"),
            CallState::Completed => write!(f, "completed"),
            CallState::Failed => write!(f, "failed"),
        }
    }
}
