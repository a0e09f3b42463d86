use super::xml_response;
use crate::{
    app::AppState,
    call::{DialStatus, Reply, TargetName},
};
use axum::{
    extract::{rejection::FormRejection, Path, State},
    response::Response,
    Form,
};
use serde::Deserialize;
use tracing::warn;

/// Fields the telephony gateway posts with every webhook.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookForm {
    pub call_sid: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub speech_result: Option<String>,
    pub dial_call_status: Option<String>,
    pub call_status: Option<String>,
    pub call_duration: Option<String>,
    pub recording_url: Option<String>,
}

impl WebhookForm {
    fn call_sid(&self) -> Option<&str> {
        self.call_sid
            .as_deref()
            .map(str::trim)
            .filter(|sid| !sid.is_empty())
    }

    fn caller(&self) -> &str {
        self.from.as_deref().unwrap_or_default()
    }

    fn dial_status(&self) -> Option<DialStatus> {
        self.dial_call_status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| s.parse().ok())
    }

    fn duration(&self) -> Option<u64> {
        self.call_duration
            .as_deref()
            .and_then(|d| d.trim().parse().ok())
    }

    fn recording_url(&self) -> Option<String> {
        self.recording_url
            .clone()
            .filter(|url| !url.trim().is_empty())
    }
}

/// A body the gateway sent but we cannot decode is treated like an empty one.
fn form_or_default(form: Result<Form<WebhookForm>, FormRejection>, path: &str) -> WebhookForm {
    match form {
        Ok(Form(form)) => form,
        Err(e) => {
            warn!(path, "malformed webhook body: {}", e);
            WebhookForm::default()
        }
    }
}

fn render(state: &AppState, reply: Reply) -> Response {
    xml_response(reply.render(state.encoder.as_ref()))
}

pub async fn voice_handler(
    State(state): State<AppState>,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> Response {
    let form = form_or_default(form, "/api/voice");
    let Some(call_id) = form.call_sid() else {
        warn!("voice webhook without CallSid");
        return render(&state, Reply::Apology);
    };
    let reply = state
        .flow
        .on_incoming_call(call_id, form.caller(), form.to.as_deref().unwrap_or_default())
        .await;
    render(&state, reply)
}

pub async fn speech_handler(
    State(state): State<AppState>,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> Response {
    let form = form_or_default(form, "/api/process-speech");
    let Some(call_id) = form.call_sid() else {
        warn!("speech webhook without CallSid");
        return render(&state, Reply::Empty);
    };
    let reply = state
        .flow
        .on_speech_captured(
            call_id,
            form.caller(),
            form.speech_result.as_deref(),
            form.dial_status(),
        )
        .await;
    render(&state, reply)
}

pub async fn routing_status_handler(
    State(state): State<AppState>,
    Path(target): Path<String>,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> Response {
    let form = form_or_default(form, "/api/routing-status");
    let Some(call_id) = form.call_sid() else {
        warn!(route = target.as_str(), "routing status webhook without CallSid");
        return render(&state, Reply::Empty);
    };
    let target = match target.parse::<TargetName>() {
        Ok(target) => target,
        Err(e) => {
            warn!(call_id, "{}", e);
            return render(&state, Reply::Apology);
        }
    };
    let reply = state
        .flow
        .on_routing_callback(call_id, target, form.caller(), form.dial_status())
        .await;
    render(&state, reply)
}

pub async fn call_status_handler(
    State(state): State<AppState>,
    form: Result<Form<WebhookForm>, FormRejection>,
) -> Response {
    let form = form_or_default(form, "/api/call-status");
    let Some(call_id) = form.call_sid() else {
        warn!("call status webhook without CallSid");
        return render(&state, Reply::Empty);
    };
    let reply = state
        .flow
        .on_final_call_status(
            call_id,
            form.call_status.as_deref(),
            form.dial_status(),
            form.duration(),
            form.recording_url(),
        )
        .await;
    render(&state, reply)
}
