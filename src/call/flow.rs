use super::{
    routing::{Action, RouteDecision, RoutingPolicy, TargetName},
    CallState,
};
use crate::{
    callrecord::{CallOutcome, CallRecord, CallRecordStore, CallRecordUpdate},
    classifier::{classify_with_deadline, Intent, IntentClassifier},
    event::{CallEvent, EventBroadcaster},
    twiml::ResponseEncoder,
};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use tracing::{info, warn};

const NO_SPEECH_PROMPT: &str = "I didn't catch that. Please try again.";
const CLARIFY_PROMPT: &str = "Could you please clarify what you're calling about? \
     Are you looking for Emma, Michael, or have a sales inquiry?";
const STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Status the gateway reports for a dial attempt or a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialStatus {
    Completed,
    Answered,
    Busy,
    NoAnswer,
    Failed,
    Canceled,
    Other(String),
}

impl DialStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DialStatus::Completed => "completed",
            DialStatus::Answered => "answered",
            DialStatus::Busy => "busy",
            DialStatus::NoAnswer => "no-answer",
            DialStatus::Failed => "failed",
            DialStatus::Canceled => "canceled",
            DialStatus::Other(status) => status.as_str(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DialStatus::Completed | DialStatus::Answered)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DialStatus::Busy | DialStatus::NoAnswer | DialStatus::Failed | DialStatus::Canceled
        )
    }
}

impl FromStr for DialStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = s.trim().to_ascii_lowercase();
        Ok(match status.as_str() {
            "completed" => DialStatus::Completed,
            "answered" => DialStatus::Answered,
            "busy" => DialStatus::Busy,
            "no-answer" | "no_answer" => DialStatus::NoAnswer,
            "failed" => DialStatus::Failed,
            "canceled" | "cancelled" => DialStatus::Canceled,
            _ => DialStatus::Other(status),
        })
    }
}

impl fmt::Display for DialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the gateway should do next, independent of its response format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Greeting,
    Prompt(String),
    Dial {
        target: TargetName,
        number: String,
        caller: String,
        callback_path: String,
    },
    Hangup(Option<String>),
    Voicemail,
    SalesCallback,
    Empty,
    Apology,
}

impl Reply {
    pub fn render(&self, encoder: &dyn ResponseEncoder) -> String {
        match self {
            Reply::Greeting => encoder.render_greeting(),
            Reply::Prompt(message) => encoder.render_prompt(message),
            Reply::Dial {
                number,
                caller,
                callback_path,
                ..
            } => encoder.render_dial(number, caller, callback_path),
            Reply::Hangup(message) => encoder.render_hangup(message.as_deref()),
            Reply::Voicemail => encoder.render_voicemail_capture(),
            Reply::SalesCallback => encoder.render_sales_callback(),
            Reply::Empty => encoder.render_empty(),
            Reply::Apology => encoder.render_apology(),
        }
    }
}

/// Turns webhook deliveries for one call into routing replies.
///
/// Nothing about a call is held in memory between deliveries except the
/// attempt counts kept by the routing policy. Record writes and live
/// notifications are best-effort and never change the reply.
pub struct CallFlow {
    store: Arc<dyn CallRecordStore>,
    classifier: Arc<dyn IntentClassifier>,
    policy: RoutingPolicy,
    events: Arc<EventBroadcaster>,
    classify_timeout: Duration,
    company_name: String,
}

impl CallFlow {
    pub fn new(
        store: Arc<dyn CallRecordStore>,
        classifier: Arc<dyn IntentClassifier>,
        policy: RoutingPolicy,
        events: Arc<EventBroadcaster>,
        classify_timeout: Duration,
        company_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            classifier,
            policy,
            events,
            classify_timeout,
            company_name: company_name.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CallRecordStore> {
        &self.store
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    async fn save(&self, call_id: &str, update: CallRecordUpdate) {
        match tokio::time::timeout(STORE_TIMEOUT, self.store.update(call_id, update)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(call_id, "failed to update call record: {}", e),
            Err(_) => warn!(call_id, "call record update timed out"),
        }
    }

    async fn load(&self, call_id: &str) -> Option<CallRecord> {
        match tokio::time::timeout(STORE_TIMEOUT, self.store.get(call_id)).await {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                warn!(call_id, "failed to load call record: {}", e);
                None
            }
            Err(_) => {
                warn!(call_id, "call record load timed out");
                None
            }
        }
    }

    pub async fn on_incoming_call(&self, call_id: &str, from: &str, to: &str) -> Reply {
        info!(call_id, from, to, "incoming call");
        self.events.publish(CallEvent::status(
            call_id,
            "Incoming Call",
            format!("Processing new call from {}", from),
        ));

        let mut record = CallRecord::new(call_id, from, to);
        record.state = CallState::GatheringSpeech;
        match tokio::time::timeout(STORE_TIMEOUT, self.store.create(record)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(call_id, "failed to create call record: {}", e),
            Err(_) => warn!(call_id, "call record create timed out"),
        }

        self.events.publish(CallEvent::status(
            call_id,
            "Answering Call",
            "Playing greeting and gathering speech...",
        ));
        Reply::Greeting
    }

    pub async fn on_speech_captured(
        &self,
        call_id: &str,
        from: &str,
        transcript: Option<&str>,
        prior_dial_status: Option<DialStatus>,
    ) -> Reply {
        if let Some(status) = prior_dial_status.filter(|s| s.is_failure()) {
            info!(call_id, %status, "dial failed before speech, taking a message");
            self.save(
                call_id,
                CallRecordUpdate::outcome(CallOutcome::RoutingFailed)
                    .with_status(status.as_str())
                    .with_state(CallState::Voicemail),
            )
            .await;
            self.events.publish(CallEvent::routing(
                call_id,
                None,
                CallOutcome::RoutingFailed.as_str(),
                format!("Dial {}, taking a message", status),
            ));
            return Reply::Voicemail;
        }

        let transcript = match transcript.map(str::trim).filter(|t| !t.is_empty()) {
            Some(transcript) => transcript,
            None => {
                info!(call_id, "no speech captured, prompting again");
                self.events.publish(CallEvent::status(
                    call_id,
                    "Waiting for Speech",
                    "No speech detected, prompting caller...",
                ));
                return Reply::Prompt(NO_SPEECH_PROMPT.to_string());
            }
        };

        self.events.publish(CallEvent::status(
            call_id,
            "Analyzing",
            "Analyzing caller intent...",
        ));
        self.save(
            call_id,
            CallRecordUpdate::default().with_state(CallState::Classifying),
        )
        .await;

        let analysis =
            classify_with_deadline(self.classifier.as_ref(), transcript, self.classify_timeout)
                .await;
        info!(
            call_id,
            intent = %analysis.intent,
            confidence = analysis.confidence,
            caller_name = analysis.caller_name.as_deref().unwrap_or("-"),
            transcript,
            "intent classified"
        );

        self.save(
            call_id,
            CallRecordUpdate {
                transcript: Some(transcript.to_string()),
                intent: Some(analysis.intent.to_string()),
                caller_name: analysis.caller_name.clone(),
                ..Default::default()
            },
        )
        .await;
        self.events.publish(CallEvent::classified(
            call_id,
            analysis.intent.as_str(),
            analysis.caller_name.as_deref(),
        ));

        let decision = self
            .policy
            .decide_route(
                &analysis.intent,
                call_id,
                from,
                analysis.caller_name.as_deref(),
            )
            .await;
        self.apply_decision(call_id, from, decision).await
    }

    pub async fn on_routing_callback(
        &self,
        call_id: &str,
        target: TargetName,
        from: &str,
        dial_status: Option<DialStatus>,
    ) -> Reply {
        let status = dial_status.unwrap_or_else(|| DialStatus::Other("unknown".to_string()));
        if status.is_success() {
            let outcome = target.routed_outcome();
            info!(call_id, %target, %status, "routing connected");
            self.save(
                call_id,
                CallRecordUpdate::outcome(outcome)
                    .with_status("connected")
                    .with_state(CallState::Connected),
            )
            .await;
            self.events.publish(CallEvent::routing(
                call_id,
                Some(target.as_str()),
                outcome.as_str(),
                format!("Connected to {}", target),
            ));
            return Reply::Empty;
        }

        info!(call_id, %target, %status, "routing failed, falling back");
        self.save(
            call_id,
            CallRecordUpdate::default()
                .with_status(status.as_str())
                .with_state(CallState::Fallback),
        )
        .await;

        let record = self.load(call_id).await;
        let intent = record
            .as_ref()
            .and_then(|r| r.intent.as_deref())
            .map(|i| i.parse::<Intent>().unwrap_or(Intent::Unclear))
            .unwrap_or_else(|| target.home_intent());
        let caller = match from.trim() {
            "" => record.map(|r| r.from).unwrap_or_default(),
            from => from.to_string(),
        };

        let decision = self
            .policy
            .next_hop(&intent, call_id, target, &caller)
            .await;
        self.apply_decision(call_id, &caller, decision).await
    }

    pub async fn on_final_call_status(
        &self,
        call_id: &str,
        call_status: Option<&str>,
        dial_status: Option<DialStatus>,
        duration: Option<u64>,
        recording_url: Option<String>,
    ) -> Reply {
        if let Some(status) = dial_status.filter(|s| s.is_failure()) {
            info!(call_id, %status, "last fallback dial failed, taking a message");
            self.save(
                call_id,
                CallRecordUpdate {
                    status: Some(status.to_string()),
                    outcome: Some(CallOutcome::AllRoutingFailed),
                    state: Some(CallState::Voicemail),
                    duration,
                    recording_url,
                    final_status: true,
                    ..Default::default()
                },
            )
            .await;
            self.events.publish(CallEvent::routing(
                call_id,
                None,
                CallOutcome::AllRoutingFailed.as_str(),
                "All routing failed, taking a message",
            ));
            return Reply::Voicemail;
        }

        let status = call_status
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_ascii_lowercase();
        let (outcome, state) = match status.as_str() {
            "completed" => (CallOutcome::Completed, CallState::Completed),
            "failed" => (CallOutcome::Failed, CallState::Failed),
            _ => (CallOutcome::Failed, CallState::Completed),
        };
        info!(call_id, status = status.as_str(), duration, %outcome, "call ended");
        self.save(
            call_id,
            CallRecordUpdate {
                status: Some(status.clone()),
                outcome: Some(outcome),
                state: Some(state),
                duration,
                recording_url,
                final_status: true,
                ..Default::default()
            },
        )
        .await;

        if let Err(e) = self.policy.tracker().clear_call(call_id).await {
            warn!(call_id, "failed to clear routing attempts: {}", e);
        }
        self.events.publish(CallEvent::completed(
            call_id,
            outcome.as_str(),
            format!("Call ended with status: {}", status),
        ));
        Reply::Empty
    }

    async fn apply_decision(&self, call_id: &str, caller: &str, decision: RouteDecision) -> Reply {
        let RouteDecision { action, outcome } = decision;
        let outcome_label = outcome.map(|o| o.as_str()).unwrap_or("-");
        match action {
            Action::DialTarget {
                target,
                number,
                callback_path,
            } => {
                info!(
                    call_id,
                    state = %CallState::Routing(target.to_string()),
                    number = number.as_str(),
                    "dialing target"
                );
                self.save(
                    call_id,
                    CallRecordUpdate {
                        outcome,
                        status: Some("routing".to_string()),
                        state: Some(CallState::RoutingCallbackPending(target.to_string())),
                        routing_target: Some(number.clone()),
                        ..Default::default()
                    },
                )
                .await;
                self.events.publish(CallEvent::routing(
                    call_id,
                    Some(target.as_str()),
                    outcome_label,
                    format!("Routing call to {}", target),
                ));
                Reply::Dial {
                    target,
                    number,
                    caller: caller.to_string(),
                    callback_path,
                }
            }
            Action::PromptClarify => {
                self.save(
                    call_id,
                    CallRecordUpdate::default().with_state(CallState::GatheringSpeech),
                )
                .await;
                self.events.publish(CallEvent::status(
                    call_id,
                    "Clarifying",
                    "Intent unclear, asking caller to clarify...",
                ));
                Reply::Prompt(CLARIFY_PROMPT.to_string())
            }
            Action::HangupFiltered => {
                self.save(
                    call_id,
                    CallRecordUpdate {
                        outcome,
                        state: Some(CallState::Completed),
                        ..Default::default()
                    },
                )
                .await;
                self.events.publish(CallEvent::routing(
                    call_id,
                    None,
                    outcome_label,
                    "Call filtered",
                ));
                Reply::Hangup(Some(format!("Thank you for calling {}.", self.company_name)))
            }
            Action::BookSalesCallback => {
                self.save(
                    call_id,
                    CallRecordUpdate {
                        outcome,
                        state: Some(CallState::Voicemail),
                        ..Default::default()
                    },
                )
                .await;
                self.events.publish(CallEvent::routing(
                    call_id,
                    None,
                    outcome_label,
                    "Sales inquiry, taking callback details",
                ));
                Reply::SalesCallback
            }
            Action::CaptureVoicemail => {
                self.save(
                    call_id,
                    CallRecordUpdate {
                        outcome,
                        state: Some(CallState::Voicemail),
                        ..Default::default()
                    },
                )
                .await;
                self.events.publish(CallEvent::routing(
                    call_id,
                    None,
                    outcome_label,
                    "Taking a message",
                ));
                Reply::Voicemail
            }
        }
    }
}
