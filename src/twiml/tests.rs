use super::*;

fn encoder() -> TwimlEncoder {
    TwimlEncoder::new(&RoutingConfig::default(), &GatherConfig::default())
}

#[test]
fn test_greeting_has_notice_and_bounded_gather() {
    let xml = encoder().render_greeting();
    assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#));
    assert!(xml.contains(COMPLIANCE_NOTICE));
    assert!(xml.contains("Emma or Michael"));
    assert!(xml.contains(r#"action="/api/process-speech""#));
    assert!(xml.contains(r#"timeout="5""#));
    // first gather plus one re-prompt on silence
    assert_eq!(xml.matches("<Gather").count(), 2);
    assert!(xml.ends_with(&format!("<Say>{}</Say><Hangup/></Response>", NO_INPUT_MESSAGE)));
}

#[test]
fn test_dial_sets_callback_and_recording() {
    let xml = encoder().render_dial("+441111", "+442222", "/api/routing-status/emma");
    assert!(xml.contains(r#"<Dial action="/api/routing-status/emma" method="POST" callerId="+442222" record="record-from-answer">"#));
    assert!(xml.contains("<Number>+441111</Number>"));
}

#[test]
fn test_dial_to_caller_is_blocked() {
    let xml = encoder().render_dial("+441111", "+441111", "/api/routing-status/emma");
    assert!(!xml.contains("<Dial"));
    assert!(xml.contains(SELF_ROUTING_MESSAGE));
    assert!(xml.contains("<Hangup/>"));
}

#[test]
fn test_voicemail_capture_records_to_status_path() {
    let xml = encoder().render_voicemail_capture();
    assert!(xml.contains(VOICEMAIL_PROMPT));
    assert!(xml.contains(
        r#"<Record action="/api/call-status" method="POST" timeout="30" maxLength="120" playBeep="true"/>"#
    ));
    assert!(!xml.contains("<Gather"));
}

#[test]
fn test_hangup_without_message() {
    let xml = encoder().render_hangup(None);
    assert!(xml.contains("<Response><Hangup/></Response>"));
}

#[test]
fn test_empty_response() {
    assert_eq!(
        encoder().render_empty(),
        r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#
    );
}

#[test]
fn test_text_is_escaped() {
    let xml = encoder().render_prompt("Tom & Jerry <said> \"hi\"");
    assert!(xml.contains("<Say>Tom &amp; Jerry &lt;said&gt; &quot;hi&quot;</Say>"));
}

#[test]
fn test_attributes_are_escaped() {
    let callback = "/api/routing-status/emma?a=1&b=\"2\"";
    let xml = encoder().render_dial("+441111", "+442222", callback);
    assert!(xml.contains(r#"action="/api/routing-status/emma?a=1&amp;b=&quot;2&quot;""#));
}

#[test]
fn test_build_writes_declaration_and_verbs() {
    let xml = VoiceResponse::new()
        .say("hold on")
        .pause(2)
        .hangup()
        .build()
        .expect("render");
    assert_eq!(
        xml,
        r#"<?xml version="1.0" encoding="UTF-8"?><Response><Say>hold on</Say><Pause length="2"/><Hangup/></Response>"#
    );
}

#[test]
fn test_apology_fallback_matches_rendered_apology() {
    assert_eq!(encoder().render_apology(), APOLOGY_TWIML);
}

#[test]
fn test_gather_timeout_follows_config() {
    let mut gather = GatherConfig::default();
    gather.timeout_secs = 7;
    let xml = TwimlEncoder::new(&RoutingConfig::default(), &gather).render_prompt("again?");
    assert!(xml.contains(r#"timeout="7""#));
}
