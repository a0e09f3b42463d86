use crate::config::{GatherConfig, RoutingConfig};
use anyhow::Result;
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};
use std::io::{Cursor, Write};
use tracing::warn;

#[cfg(test)]
mod tests;

const COMPLIANCE_NOTICE: &str = "This call may be recorded and transcribed for service purposes.";
const VOICEMAIL_PROMPT: &str =
    "Please leave a brief message with your name and reason for calling after the beep.";
const SALES_CALLBACK_PROMPT: &str = "Our sales team will call you back. Please leave your name, \
     number and a good time to reach you after the beep.";
const SELF_ROUTING_MESSAGE: &str = "Cannot route call to the same number.";
const APOLOGY_MESSAGE: &str =
    "Sorry, we are experiencing technical difficulties. Please try again later.";
const NO_INPUT_MESSAGE: &str = "We did not receive a response. Goodbye.";
const APOLOGY_TWIML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say>"#,
    "Sorry, we are experiencing technical difficulties. Please try again later.",
    "</Say><Hangup/></Response>"
);

#[derive(Debug, Clone, PartialEq)]
enum Verb {
    Say(String),
    Pause(u32),
    Gather {
        action: String,
        timeout: u32,
        speech_timeout: String,
        prompt: Option<String>,
    },
    Dial {
        number: String,
        action: String,
        caller_id: Option<String>,
        record: bool,
    },
    Record {
        action: String,
        timeout: u32,
        max_length: u32,
    },
    Hangup,
}

/// Builder for a TwiML `<Response>` document.
#[derive(Debug, Clone, Default)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say(text.into()));
        self
    }

    pub fn pause(mut self, length: u32) -> Self {
        self.verbs.push(Verb::Pause(length));
        self
    }

    pub fn gather_speech(
        mut self,
        action: impl Into<String>,
        timeout: u32,
        speech_timeout: impl Into<String>,
        prompt: Option<String>,
    ) -> Self {
        self.verbs.push(Verb::Gather {
            action: action.into(),
            timeout,
            speech_timeout: speech_timeout.into(),
            prompt,
        });
        self
    }

    pub fn dial(
        mut self,
        number: impl Into<String>,
        action: impl Into<String>,
        caller_id: Option<String>,
        record: bool,
    ) -> Self {
        self.verbs.push(Verb::Dial {
            number: number.into(),
            action: action.into(),
            caller_id,
            record,
        });
        self
    }

    pub fn record(mut self, action: impl Into<String>, timeout: u32, max_length: u32) -> Self {
        self.verbs.push(Verb::Record {
            action: action.into(),
            timeout,
            max_length,
        });
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    /// Serializes the verbs into a `<Response>` document. Text and attribute
    /// values are escaped by the writer.
    pub fn build(&self) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("Response")))?;
        for verb in &self.verbs {
            write_verb(&mut writer, verb)?;
        }
        writer.write_event(Event::End(BytesEnd::new("Response")))?;
        Ok(String::from_utf8(writer.into_inner().into_inner())?)
    }
}

fn write_text<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}

fn write_verb<W: Write>(writer: &mut Writer<W>, verb: &Verb) -> Result<()> {
    match verb {
        Verb::Say(text) => write_text(writer, "Say", text)?,
        Verb::Pause(length) => {
            let mut pause = BytesStart::new("Pause");
            pause.push_attribute(("length", length.to_string().as_str()));
            writer.write_event(Event::Empty(pause))?;
        }
        Verb::Gather {
            action,
            timeout,
            speech_timeout,
            prompt,
        } => {
            let mut gather = BytesStart::new("Gather");
            gather.push_attribute(("input", "speech"));
            gather.push_attribute(("action", action.as_str()));
            gather.push_attribute(("method", "POST"));
            gather.push_attribute(("timeout", timeout.to_string().as_str()));
            gather.push_attribute(("speechTimeout", speech_timeout.as_str()));
            match prompt {
                Some(prompt) => {
                    writer.write_event(Event::Start(gather))?;
                    write_text(writer, "Say", prompt)?;
                    writer.write_event(Event::End(BytesEnd::new("Gather")))?;
                }
                None => writer.write_event(Event::Empty(gather))?,
            }
        }
        Verb::Dial {
            number,
            action,
            caller_id,
            record,
        } => {
            let mut dial = BytesStart::new("Dial");
            dial.push_attribute(("action", action.as_str()));
            dial.push_attribute(("method", "POST"));
            if let Some(caller_id) = caller_id {
                dial.push_attribute(("callerId", caller_id.as_str()));
            }
            if *record {
                dial.push_attribute(("record", "record-from-answer"));
            }
            writer.write_event(Event::Start(dial))?;
            write_text(writer, "Number", number)?;
            writer.write_event(Event::End(BytesEnd::new("Dial")))?;
        }
        Verb::Record {
            action,
            timeout,
            max_length,
        } => {
            let mut record = BytesStart::new("Record");
            record.push_attribute(("action", action.as_str()));
            record.push_attribute(("method", "POST"));
            record.push_attribute(("timeout", timeout.to_string().as_str()));
            record.push_attribute(("maxLength", max_length.to_string().as_str()));
            record.push_attribute(("playBeep", "true"));
            writer.write_event(Event::Empty(record))?;
        }
        Verb::Hangup => writer.write_event(Event::Empty(BytesStart::new("Hangup")))?,
    }
    Ok(())
}

/// Renders `response`, or the canned apology when serialization fails.
fn finish(response: VoiceResponse) -> String {
    response.build().unwrap_or_else(|e| {
        warn!("failed to render voice response: {}", e);
        APOLOGY_TWIML.to_string()
    })
}

/// Turns routing replies into gateway response documents.
pub trait ResponseEncoder: Send + Sync {
    fn render_greeting(&self) -> String;
    fn render_prompt(&self, message: &str) -> String;
    /// Renders the self-routing-blocked variant when `target` equals `caller`.
    fn render_dial(&self, target: &str, caller: &str, callback_path: &str) -> String;
    fn render_hangup(&self, message: Option<&str>) -> String;
    fn render_voicemail_capture(&self) -> String;
    fn render_sales_callback(&self) -> String;
    fn render_empty(&self) -> String;
    fn render_apology(&self) -> String;
}

pub struct TwimlEncoder {
    speech_path: String,
    status_path: String,
    greeting: String,
    gather: GatherConfig,
}

impl TwimlEncoder {
    pub fn new(routing: &RoutingConfig, gather: &GatherConfig) -> Self {
        Self {
            speech_path: routing.speech_path.clone(),
            status_path: routing.status_path.clone(),
            greeting: format!(
                "Welcome to {}. Who would you like to speak with, Emma or Michael?",
                gather.company_name
            ),
            gather: gather.clone(),
        }
    }

    fn gather(&self, response: VoiceResponse) -> VoiceResponse {
        response.gather_speech(
            &self.speech_path,
            self.gather.gather_timeout(),
            &self.gather.speech_timeout,
            None,
        )
    }

    fn record(&self, prompt: &str) -> String {
        finish(VoiceResponse::new().say(prompt).record(
            &self.status_path,
            self.gather.voicemail_timeout_secs,
            self.gather.voicemail_max_length_secs,
        ))
    }
}

impl ResponseEncoder for TwimlEncoder {
    fn render_greeting(&self) -> String {
        let response = VoiceResponse::new()
            .say(COMPLIANCE_NOTICE)
            .pause(1)
            .say(&self.greeting);
        // re-prompt once on silence, then say goodbye
        let response = self
            .gather(response)
            .say("I didn't hear anything.")
            .gather_speech(
                &self.speech_path,
                self.gather.gather_timeout(),
                &self.gather.speech_timeout,
                Some(self.greeting.clone()),
            )
            .say(NO_INPUT_MESSAGE)
            .hangup();
        finish(response)
    }

    fn render_prompt(&self, message: &str) -> String {
        finish(self.gather(VoiceResponse::new().say(message)))
    }

    fn render_dial(&self, target: &str, caller: &str, callback_path: &str) -> String {
        if target == caller {
            return finish(VoiceResponse::new().say(SELF_ROUTING_MESSAGE).hangup());
        }
        finish(
            VoiceResponse::new()
                .say("Connecting you now, please hold.")
                .dial(target, callback_path, Some(caller.to_string()), true),
        )
    }

    fn render_hangup(&self, message: Option<&str>) -> String {
        let mut response = VoiceResponse::new();
        if let Some(message) = message {
            response = response.say(message);
        }
        finish(response.hangup())
    }

    fn render_voicemail_capture(&self) -> String {
        self.record(VOICEMAIL_PROMPT)
    }

    fn render_sales_callback(&self) -> String {
        self.record(SALES_CALLBACK_PROMPT)
    }

    fn render_empty(&self) -> String {
        finish(VoiceResponse::new())
    }

    fn render_apology(&self) -> String {
        self.render_hangup(Some(APOLOGY_MESSAGE))
    }
}
