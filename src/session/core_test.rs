use super::*;
use crate::credentials::{MemoryCredentials, TOKEN_KEY};
use crate::message::{Role, StreamState};

fn config() -> SessionConfig {
    SessionConfig::new("ws://chat.test/ws", "http://chat.test")
}

fn core_with(store: MemoryCredentials) -> SessionCore {
    SessionCore::new(&config(), Arc::new(store))
}

fn core() -> SessionCore {
    core_with(MemoryCredentials::with_login("tok", "u1"))
}

fn open(core: &mut SessionCore) -> Vec<Effect> {
    assert_eq!(core.connect(), vec![Effect::OpenTransport]);
    core.on_transport_event(TransportEvent::Opened)
}

fn frame(core: &mut SessionCore, raw: &str) -> Vec<Effect> {
    core.on_transport_event(TransportEvent::Message(raw.to_owned()))
}

fn message<'a>(core: &'a SessionCore, id: &str) -> &'a ChatMessage {
    core.conversation().get(id).expect("message exists")
}

fn emitted(effects: &[Effect]) -> Vec<SessionEvent> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Emit(ev) => Some(ev.clone()),
            _ => None,
        })
        .collect()
}

fn sent_frames(effects: &[Effect]) -> Vec<serde_json::Value> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::SendFrame(raw) => Some(serde_json::from_str(raw).unwrap()),
            _ => None,
        })
        .collect()
}

// =========================================================================
// handshake
// =========================================================================

#[test]
fn open_sends_auth_handshake() {
    let mut c = core();
    let effects = open(&mut c);
    assert_eq!(effects[0], Effect::CancelReconnect);
    let frames = sent_frames(&effects);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "auth");
    assert_eq!(frames[0]["token"], "tok");
    assert_eq!(frames[0]["userId"], "u1");
    assert!(frames[0]["timestamp"].as_i64().unwrap() > 0);
}

#[test]
fn open_without_token_skips_handshake() {
    let mut c = core_with(MemoryCredentials::new());
    let effects = open(&mut c);
    assert!(sent_frames(&effects).is_empty());
    assert_eq!(c.snapshot().status, ConnectionStatus::Open);
}

// =========================================================================
// sendMessage
// =========================================================================

#[test]
fn send_appends_user_and_pending_assistant() {
    let mut c = core();
    open(&mut c);

    let (id, effects) = c.send_message("  hello  ").unwrap();

    let messages = c.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].stream_state, StreamState::Pending);
    assert_eq!(messages[1].id, id);
    assert_eq!(c.active_message_id(), Some(id.as_str()));
    assert_eq!(c.active_path(), Some(SendPath::Live));

    let frames = sent_frames(&effects);
    assert_eq!(
        frames,
        vec![serde_json::json!({ "message": "hello", "userId": "u1", "messageId": id, "token": "tok" })]
    );
}

#[test]
fn blank_send_is_rejected_without_side_effects() {
    let mut c = core();
    assert_eq!(c.send_message(" \n\t").unwrap_err(), ChatError::EmptyMessage);
    assert!(c.conversation().is_empty());
    assert!(c.active_message_id().is_none());
}

#[test]
fn send_without_token_is_rejected() {
    let store = MemoryCredentials::with_login("tok", "u1");
    store.remove(TOKEN_KEY);
    let mut c = core_with(store);
    assert_eq!(c.send_message("hi").unwrap_err(), ChatError::MissingCredentials);
    assert!(c.conversation().is_empty());
}

#[test]
fn overlapping_send_is_busy() {
    let mut c = core();
    open(&mut c);
    c.send_message("first").unwrap();
    assert_eq!(c.send_message("second").unwrap_err(), ChatError::Busy);
    assert_eq!(c.conversation().len(), 2);
}

// =========================================================================
// live stream decoding
// =========================================================================

#[test]
fn deltas_then_end_complete_the_message() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();

    let mut events = Vec::new();
    for raw in ["[STREAM_START]", "Hi", " there", "[STREAM_END]"] {
        events.extend(emitted(&frame(&mut c, raw)));
    }

    assert_eq!(
        events,
        vec![
            SessionEvent::Delta { message_id: id.clone(), text: "Hi".into() },
            SessionEvent::Delta { message_id: id.clone(), text: " there".into() },
            SessionEvent::Complete { message_id: id.clone() },
        ]
    );
    assert_eq!(message(&c, &id).content, "Hi there");
    assert_eq!(message(&c, &id).stream_state, StreamState::Complete);
    assert!(c.active_message_id().is_none());
}

#[test]
fn many_deltas_concatenate_in_order() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("count").unwrap();
    let parts: Vec<String> = (0..50).map(|i| format!("{i},")).collect();
    for part in &parts {
        frame(&mut c, part);
    }
    frame(&mut c, "[STREAM_END]");
    assert_eq!(message(&c, &id).content, parts.concat());
}

#[test]
fn repeated_stream_end_is_a_no_op() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();
    frame(&mut c, "done");
    frame(&mut c, "[STREAM_END]");

    assert!(frame(&mut c, "[STREAM_END]").is_empty());
    assert_eq!(message(&c, &id).content, "done");
    assert_eq!(message(&c, &id).stream_state, StreamState::Complete);
}

#[test]
fn late_delta_after_end_is_dropped() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();
    frame(&mut c, "[STREAM_END]");
    assert!(frame(&mut c, "late").is_empty());
    assert_eq!(message(&c, &id).content, "");
}

#[test]
fn stream_error_annotates_and_releases() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();
    frame(&mut c, "partial");

    let events = emitted(&frame(&mut c, "[STREAM_ERROR]timeout"));

    assert_eq!(message(&c, &id).content, "partial\n\n[错误: timeout]");
    assert_eq!(message(&c, &id).stream_state, StreamState::Errored);
    assert!(c.active_message_id().is_none());
    assert_eq!(
        events,
        vec![SessionEvent::Error { message_id: Some(id), error: ChatError::StreamProtocol("timeout".into()) }]
    );
    assert!(c.send_message("again").is_ok());
}

#[test]
fn session_error_releases_lock_without_touching_content() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();
    frame(&mut c, "abc");

    let events = emitted(&frame(&mut c, "[ERROR]overloaded"));

    assert_eq!(message(&c, &id).content, "abc");
    assert_eq!(message(&c, &id).stream_state, StreamState::Errored);
    assert!(c.active_message_id().is_none());
    assert!(events.contains(&SessionEvent::Notice("overloaded".into())));
}

#[test]
fn session_error_while_idle_is_reported() {
    let mut c = core();
    open(&mut c);
    let events = emitted(&frame(&mut c, "[ERROR]maintenance"));
    assert!(events.contains(&SessionEvent::Error {
        message_id: None,
        error: ChatError::SessionLevel("maintenance".into()),
    }));
}

#[test]
fn auth_success_marks_authenticated() {
    let mut c = core();
    open(&mut c);
    assert!(frame(&mut c, "[AUTH_SUCCESS]").is_empty());
    assert_eq!(c.snapshot().authenticated, Some(true));
}

#[test]
fn auth_failure_fails_live_send_and_forces_fallback_next() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();

    let events = emitted(&frame(&mut c, "[AUTH_FAILED]expired"));

    assert_eq!(message(&c, &id).stream_state, StreamState::Errored);
    assert!(message(&c, &id).content.ends_with("[错误: expired]"));
    assert!(events.contains(&SessionEvent::Error {
        message_id: Some(id),
        error: ChatError::AuthRejected("expired".into()),
    }));

    let (_, effects) = c.send_message("retry").unwrap();
    assert!(matches!(effects.as_slice(), [Effect::RequestFallback { .. }]));
}

#[test]
fn auth_failure_closes_connection_without_backoff() {
    let mut c = core();
    open(&mut c);

    let effects = frame(&mut c, "[AUTH_FAILED]expired");
    assert!(effects.contains(&Effect::CloseTransport));
    assert!(!effects.iter().any(|e| matches!(e, Effect::ScheduleReconnect(_))));
    let snap = c.snapshot();
    assert_eq!(snap.status, ConnectionStatus::Closed);
    assert!(snap.unavailable);

    // The server dropping the socket afterwards schedules nothing.
    assert!(c.on_transport_event(TransportEvent::Closed(None)).is_empty());

    let effects = c.manual_reconnect();
    assert!(effects.contains(&Effect::ScheduleReconnect(Duration::from_millis(1000))));
    assert!(!c.snapshot().unavailable);
}

#[test]
fn empty_frame_does_not_touch_live_message() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();

    assert!(frame(&mut c, "").is_empty());
    assert_eq!(message(&c, &id).stream_state, StreamState::Pending);
    assert_eq!(c.active_message_id(), Some(id.as_str()));
}

#[test]
fn delta_without_send_is_dropped() {
    let mut c = core();
    open(&mut c);
    assert!(frame(&mut c, "orphan").is_empty());
    assert!(c.conversation().is_empty());
}

// =========================================================================
// connection loss
// =========================================================================

#[test]
fn close_mid_stream_fails_message_and_schedules_reconnect() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();
    frame(&mut c, "par");

    let effects = c.on_transport_event(TransportEvent::Closed(None));

    assert!(effects.contains(&Effect::ScheduleReconnect(Duration::from_millis(1000))));
    assert_eq!(message(&c, &id).stream_state, StreamState::Errored);
    assert_eq!(message(&c, &id).content, "par\n\n[错误: 连接已断开]");
    assert!(c.active_message_id().is_none());
}

#[test]
fn exhaustion_reports_unavailable() {
    let mut c = SessionCore::new(
        &SessionConfig {
            reconnect: crate::lifecycle::ReconnectPolicy { max_attempts: 0, ..Default::default() },
            ..config()
        },
        Arc::new(MemoryCredentials::with_login("tok", "u1")),
    );
    c.connect();
    let events = emitted(&c.on_transport_event(TransportEvent::Error("refused".into())));
    assert!(events.contains(&SessionEvent::Error {
        message_id: None,
        error: ChatError::ReconnectExhausted { attempts: 0 },
    }));
    assert!(c.snapshot().unavailable);
}

#[test]
fn manual_reconnect_cuts_live_reply() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();
    let effects = c.manual_reconnect();
    assert!(effects.contains(&Effect::CloseTransport));
    assert!(effects.contains(&Effect::ScheduleReconnect(Duration::from_millis(1000))));
    assert_eq!(message(&c, &id).stream_state, StreamState::Errored);
    assert!(c.active_message_id().is_none());
}

// =========================================================================
// waiting for open
// =========================================================================

#[test]
fn send_while_connecting_waits_then_goes_live() {
    let mut c = core();
    c.connect();
    let (id, effects) = c.send_message("hello").unwrap();
    assert_eq!(effects, vec![Effect::ArmOpenWait { message_id: id.clone(), after: Duration::from_millis(2000) }]);
    assert_eq!(c.active_path(), Some(SendPath::AwaitingOpen));

    let effects = c.on_transport_event(TransportEvent::Opened);
    assert!(effects.contains(&Effect::CancelOpenWait));
    let frames = sent_frames(&effects);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], "auth");
    assert_eq!(frames[1]["messageId"], id.as_str());
    assert_eq!(c.active_path(), Some(SendPath::Live));
}

#[test]
fn open_wait_expiry_falls_back() {
    let mut c = core();
    c.connect();
    let (id, _) = c.send_message("hello").unwrap();

    let effects = c.on_open_wait_expired(&id);

    assert_eq!(
        effects,
        vec![Effect::RequestFallback { message_id: id.clone(), text: "hello".into(), user_id: "u1".into() }]
    );
    assert_eq!(c.active_path(), Some(SendPath::Fallback));
}

#[test]
fn connect_failure_during_wait_falls_back() {
    let mut c = core();
    c.connect();
    let (_, _) = c.send_message("hello").unwrap();
    let effects = c.on_transport_event(TransportEvent::Error("refused".into()));
    assert!(effects.contains(&Effect::CancelOpenWait));
    assert!(effects.iter().any(|e| matches!(e, Effect::RequestFallback { .. })));
}

#[test]
fn stale_open_wait_is_ignored() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();
    assert!(c.on_open_wait_expired(&id).is_empty());
    assert_eq!(c.active_path(), Some(SendPath::Live));
}

// =========================================================================
// fallback path
// =========================================================================

#[test]
fn send_while_closed_uses_fallback() {
    let mut c = core();
    let (id, effects) = c.send_message("hi").unwrap();
    assert_eq!(
        effects,
        vec![Effect::RequestFallback { message_id: id, text: "hi".into(), user_id: "u1".into() }]
    );
}

#[test]
fn fallback_reply_types_out_and_completes() {
    let mut c = core();
    let (id, _) = c.send_message("hi").unwrap();

    let effects = c.on_fallback_reply(&id, Ok("ok thanks".into()));
    assert_eq!(effects, vec![Effect::StartTyping { message_id: id.clone(), response: "ok thanks".into() }]);

    let mut events = Vec::new();
    for part in crate::typing::deltas("ok thanks") {
        events.extend(emitted(&c.on_typing_step(&id, TypingStep::Delta(part))));
    }
    events.extend(emitted(&c.on_typing_step(&id, TypingStep::Done)));

    assert_eq!(
        events,
        vec![
            SessionEvent::Delta { message_id: id.clone(), text: "ok".into() },
            SessionEvent::Delta { message_id: id.clone(), text: " thanks".into() },
            SessionEvent::Complete { message_id: id.clone() },
        ]
    );
    assert_eq!(message(&c, &id).content, "ok thanks");
    assert_eq!(message(&c, &id).stream_state, StreamState::Complete);
    assert!(c.active_message_id().is_none());
}

#[test]
fn fallback_failure_errors_message_and_allows_retry() {
    let mut c = core();
    let (id, _) = c.send_message("hi").unwrap();

    let events = emitted(&c.on_fallback_reply(&id, Err(ChatError::FallbackRequest("HTTP 500".into()))));

    assert_eq!(message(&c, &id).content, "[错误: HTTP 500]");
    assert_eq!(message(&c, &id).stream_state, StreamState::Errored);
    assert!(c.active_message_id().is_none());
    assert!(events.iter().any(|e| matches!(e, SessionEvent::Notice(_))));
    assert!(c.send_message("retry").is_ok());
}

#[test]
fn fallback_send_ignores_socket_opening_mid_flight() {
    let mut c = core();
    let (id, _) = c.send_message("hi").unwrap();
    assert_eq!(c.active_path(), Some(SendPath::Fallback));

    c.connect();
    let effects = c.on_transport_event(TransportEvent::Opened);
    assert_eq!(sent_frames(&effects).len(), 1, "only the auth frame goes out");
    assert!(frame(&mut c, "socket text").is_empty());
    assert!(frame(&mut c, "[STREAM_END]").is_empty());

    c.on_typing_step(&id, TypingStep::Delta("typed".into()));
    c.on_typing_step(&id, TypingStep::Done);
    assert_eq!(message(&c, &id).content, "typed");
    assert_eq!(message(&c, &id).stream_state, StreamState::Complete);
}

#[test]
fn typing_steps_for_other_message_are_ignored() {
    let mut c = core();
    let (_, _) = c.send_message("hi").unwrap();
    assert!(c.on_typing_step("someone-else", TypingStep::Delta("x".into())).is_empty());
    assert!(c.on_fallback_reply("someone-else", Ok("x".into())).is_empty());
}

#[test]
fn live_send_ignores_typing_steps() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hi").unwrap();
    assert!(c.on_typing_step(&id, TypingStep::Done).is_empty());
    assert_eq!(c.active_message_id(), Some(id.as_str()));
}

// =========================================================================
// history / dispose
// =========================================================================

#[test]
fn replace_history_preserves_in_flight_stream() {
    let mut c = core();
    open(&mut c);
    let (id, _) = c.send_message("hello").unwrap();
    frame(&mut c, "Hi");

    c.replace_history(vec![ChatMessage::user("earlier")]);
    frame(&mut c, "!");
    frame(&mut c, "[STREAM_END]");

    let messages = c.conversation().messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].content, "earlier");
    assert_eq!(messages[1].content, "hello");
    assert_eq!(message(&c, &id).content, "Hi!");
}

#[test]
fn dispose_closes_and_clears() {
    let mut c = core();
    open(&mut c);
    c.send_message("hello").unwrap();

    let effects = c.dispose();
    assert!(effects.contains(&Effect::CloseTransport));
    assert!(effects.contains(&Effect::CancelReconnect));
    assert!(effects.contains(&Effect::CancelBackground));
    assert!(c.active_message_id().is_none());
    assert!(c.dispose().is_empty());
    assert_eq!(c.send_message("after").unwrap_err(), ChatError::SessionClosed);
    assert!(c.on_transport_event(TransportEvent::Closed(None)).is_empty());
}
