use super::attempts::AttemptTracker;
use crate::{
    callrecord::CallOutcome,
    classifier::Intent,
    config::{RoutingConfig, SalesMode},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};
use tracing::{info, warn};

/// A person calls can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetName {
    Emma,
    Michael,
}

impl TargetName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetName::Emma => "emma",
            TargetName::Michael => "michael",
        }
    }

    /// Intent whose chain this target heads.
    pub fn home_intent(&self) -> Intent {
        match self {
            TargetName::Emma => Intent::EmmaRequest,
            TargetName::Michael => Intent::BusinessGeneral,
        }
    }

    pub fn attempting_outcome(&self) -> CallOutcome {
        match self {
            TargetName::Emma => CallOutcome::AttemptingEmmaRouting,
            TargetName::Michael => CallOutcome::AttemptingMichaelRouting,
        }
    }

    pub fn routed_outcome(&self) -> CallOutcome {
        match self {
            TargetName::Emma => CallOutcome::EmmaRouted,
            TargetName::Michael => CallOutcome::MichaelRouted,
        }
    }

    /// Outcome when this target failed and nobody is left to dial.
    fn exhausted_outcome(&self) -> CallOutcome {
        match self {
            TargetName::Michael => CallOutcome::MichaelFailedTakingMessage,
            TargetName::Emma => CallOutcome::AllRoutingFailed,
        }
    }
}

fn fallback_outcome(failed: TargetName, next: TargetName) -> CallOutcome {
    match (failed, next) {
        (TargetName::Emma, TargetName::Michael) => CallOutcome::EmmaFailedRoutingToMichael,
        (_, next) => next.attempting_outcome(),
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "emma" => Ok(TargetName::Emma),
            "michael" => Ok(TargetName::Michael),
            other => Err(anyhow::anyhow!("unknown routing target: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub name: TargetName,
    pub number: Option<String>,
    pub callback_path: String,
}

impl RouteTarget {
    pub fn from_config(name: TargetName, config: &RoutingConfig) -> Self {
        let number = match name {
            TargetName::Emma => config.emma_phone.clone(),
            TargetName::Michael => config.michael_phone.clone(),
        };
        Self {
            name,
            number: number.filter(|n| !n.trim().is_empty()),
            callback_path: config.callback_path(name.as_str()),
        }
    }
}

/// Ordered list of targets tried one after another until a dial connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    targets: Vec<RouteTarget>,
}

impl FallbackChain {
    pub fn new(targets: Vec<RouteTarget>) -> Self {
        Self { targets }
    }

    pub fn for_intent(intent: &Intent, config: &RoutingConfig) -> Option<Self> {
        let names: &[TargetName] = match intent {
            Intent::EmmaRequest => &[TargetName::Emma, TargetName::Michael],
            // sales shares Michael's path until a booking flow exists
            Intent::BusinessGeneral | Intent::SalesGeneral => &[TargetName::Michael],
            _ => return None,
        };
        Some(Self::new(
            names
                .iter()
                .map(|name| RouteTarget::from_config(*name, config))
                .collect(),
        ))
    }

    /// The chain a call is on once `name` has been dialed.
    pub fn for_target(name: TargetName, config: &RoutingConfig) -> Self {
        Self::for_intent(&name.home_intent(), config).unwrap_or_else(|| Self::new(vec![]))
    }

    pub fn targets(&self) -> &[RouteTarget] {
        &self.targets
    }

    /// Split at `name`: the targets already tried, and those still ahead.
    pub fn split_after(&self, name: TargetName) -> (&[RouteTarget], &[RouteTarget]) {
        match self.targets.iter().position(|t| t.name == name) {
            Some(idx) => self.targets.split_at(idx + 1),
            None => (&[], self.targets.as_slice()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    DialTarget {
        target: TargetName,
        number: String,
        callback_path: String,
    },
    PromptClarify,
    HangupFiltered,
    BookSalesCallback,
    CaptureVoicemail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub action: Action,
    /// Outcome to record, if the decision changes it.
    pub outcome: Option<CallOutcome>,
}

impl RouteDecision {
    fn new(action: Action, outcome: Option<CallOutcome>) -> Self {
        Self { action, outcome }
    }

    fn voicemail(outcome: CallOutcome) -> Self {
        Self::new(Action::CaptureVoicemail, Some(outcome))
    }
}

/// Walk `targets` in order and dial the first usable one.
///
/// A target is skipped when it has no number, when it is the caller, or
/// when it shares a number already dialed on this call. `failed` names the
/// tier that failed before this walk started, if any.
pub fn walk_chain(
    call_id: &str,
    targets: &[RouteTarget],
    caller: &str,
    dialed: &[&str],
    failed: Option<TargetName>,
) -> RouteDecision {
    let mut last_failed = failed;
    let mut blocked_self = false;

    for target in targets {
        let number = match target.number.as_deref() {
            Some(number) => number,
            None => {
                warn!(call_id, target = %target.name, "routing target not configured");
                last_failed = Some(target.name);
                continue;
            }
        };
        if number == caller {
            warn!(call_id, target = %target.name, "self-routing blocked");
            blocked_self = true;
            last_failed = Some(target.name);
            continue;
        }
        if dialed.contains(&number) {
            warn!(call_id, target = %target.name, "target shares a number already dialed");
            last_failed = Some(target.name);
            continue;
        }
        let outcome = match last_failed {
            Some(previous) => fallback_outcome(previous, target.name),
            None => target.name.attempting_outcome(),
        };
        return RouteDecision::new(
            Action::DialTarget {
                target: target.name,
                number: number.to_string(),
                callback_path: target.callback_path.clone(),
            },
            Some(outcome),
        );
    }

    let outcome = match (targets.is_empty(), failed) {
        (true, Some(previous)) => previous.exhausted_outcome(),
        (true, None) => CallOutcome::AllRoutingFailed,
        (false, Some(_)) => CallOutcome::AllRoutingFailed,
        (false, None) if targets.len() > 1 => CallOutcome::AllRoutingFailed,
        (false, None) if blocked_self => CallOutcome::SelfRoutingBlocked,
        (false, None) => CallOutcome::AllRoutingFailed,
    };
    RouteDecision::voicemail(outcome)
}

/// Intent-to-action policy with the attempt ceiling in front of it.
pub struct RoutingPolicy {
    config: RoutingConfig,
    tracker: Arc<dyn AttemptTracker>,
}

impl RoutingPolicy {
    pub fn new(config: RoutingConfig, tracker: Arc<dyn AttemptTracker>) -> Self {
        Self { config, tracker }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<dyn AttemptTracker> {
        &self.tracker
    }

    /// Count an attempt for `(call_id, intent)`. A tracker failure is
    /// treated as an exhausted ceiling so the call still terminates.
    async fn admit(&self, call_id: &str, intent: &Intent) -> bool {
        match self
            .tracker
            .check_and_increment(call_id, intent, self.config.max_attempts)
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                info!(call_id, %intent, "max routing attempts reached");
                false
            }
            Err(e) => {
                warn!(call_id, %intent, "attempt tracker failed: {}", e);
                false
            }
        }
    }

    pub async fn decide_route(
        &self,
        intent: &Intent,
        call_id: &str,
        caller_number: &str,
        caller_name: Option<&str>,
    ) -> RouteDecision {
        if !self.admit(call_id, intent).await {
            return RouteDecision::voicemail(CallOutcome::AllRoutingFailed);
        }

        let decision = match intent {
            Intent::Nonsense => {
                RouteDecision::new(Action::HangupFiltered, Some(CallOutcome::Filtered))
            }
            Intent::SalesGeneral if self.config.sales_mode == SalesMode::Callback => {
                RouteDecision::new(Action::BookSalesCallback, None)
            }
            _ => match FallbackChain::for_intent(intent, &self.config) {
                Some(chain) => walk_chain(call_id, chain.targets(), caller_number, &[], None),
                None => RouteDecision::new(Action::PromptClarify, None),
            },
        };
        info!(
            call_id,
            %intent,
            caller = caller_number,
            caller_name = caller_name.unwrap_or("-"),
            action = ?decision.action,
            outcome = ?decision.outcome,
            "route decided"
        );
        decision
    }

    /// Decide what follows a failed dial to `failed`.
    pub async fn next_hop(
        &self,
        intent: &Intent,
        call_id: &str,
        failed: TargetName,
        caller_number: &str,
    ) -> RouteDecision {
        let chain = FallbackChain::for_target(failed, &self.config);
        let (tried, ahead) = chain.split_after(failed);
        if ahead.is_empty() {
            return RouteDecision::voicemail(failed.exhausted_outcome());
        }
        if !self.admit(call_id, intent).await {
            return RouteDecision::voicemail(CallOutcome::AllRoutingFailed);
        }
        let dialed: Vec<&str> = tried.iter().filter_map(|t| t.number.as_deref()).collect();
        let decision = walk_chain(call_id, ahead, caller_number, &dialed, Some(failed));
        info!(
            call_id,
            failed = %failed,
            action = ?decision.action,
            outcome = ?decision.outcome,
            "fallback hop decided"
        );
        decision
    }
}
