use super::*;

fn session() -> ConnectionSession {
    ConnectionSession::new(ReconnectPolicy::default())
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

// =========================================================================
// ReconnectPolicy
// =========================================================================

#[test]
fn delay_doubles_and_caps() {
    let policy = ReconnectPolicy::default();
    let delays: Vec<Duration> = (0..6).map(|k| policy.delay_for(k)).collect();
    assert_eq!(delays, vec![ms(1000), ms(2000), ms(4000), ms(8000), ms(10_000), ms(10_000)]);
}

#[test]
fn delay_does_not_overflow_for_large_attempts() {
    let policy = ReconnectPolicy::default();
    assert_eq!(policy.delay_for(200), ms(10_000));
}

// =========================================================================
// connect / open
// =========================================================================

#[test]
fn connect_from_idle_opens_transport() {
    let mut s = session();
    assert_eq!(s.connect(), vec![LifecycleAction::OpenTransport]);
    assert_eq!(s.status(), ConnectionStatus::Connecting);
}

#[test]
fn connect_is_reentrant_safe() {
    let mut s = session();
    s.connect();
    assert!(s.connect().is_empty());
    s.on_open();
    assert!(s.connect().is_empty());
    assert_eq!(s.status(), ConnectionStatus::Open);
}

#[test]
fn open_resets_attempts_and_sends_auth() {
    let mut s = session();
    s.connect();
    s.on_down("refused");
    s.on_reconnect_due();
    assert_eq!(s.reconnect_attempt(), 1);

    let actions = s.on_open();
    assert_eq!(actions, vec![LifecycleAction::CancelReconnect, LifecycleAction::SendAuth]);
    assert_eq!(s.reconnect_attempt(), 0);
    assert!(s.is_ready());
}

#[test]
fn open_without_connecting_is_ignored() {
    let mut s = session();
    assert!(s.on_open().is_empty());
    assert_eq!(s.status(), ConnectionStatus::Idle);
}

// =========================================================================
// backoff / exhaustion
// =========================================================================

#[test]
fn consecutive_failures_back_off_then_exhaust() {
    let mut s = session();
    s.connect();

    let mut scheduled = Vec::new();
    loop {
        let actions = s.on_down("refused");
        match actions.as_slice() {
            [LifecycleAction::ScheduleReconnect(delay)] => {
                scheduled.push(*delay);
                assert_eq!(s.on_reconnect_due(), vec![LifecycleAction::OpenTransport]);
            }
            [LifecycleAction::Exhausted { attempts }] => {
                assert_eq!(*attempts, 5);
                break;
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    assert_eq!(scheduled, vec![ms(1000), ms(2000), ms(4000), ms(8000), ms(10_000)]);
    assert!(s.snapshot().unavailable);
    assert_eq!(s.status(), ConnectionStatus::Closed);
    assert!(s.on_reconnect_due().is_empty());
}

#[test]
fn close_and_error_pair_schedules_once() {
    let mut s = session();
    s.connect();
    s.on_open();
    assert_eq!(s.on_down("error").len(), 1);
    assert!(s.on_down("close").is_empty());
    assert_eq!(s.reconnect_attempt(), 1);
}

#[test]
fn stale_reconnect_timer_is_ignored() {
    let mut s = session();
    assert!(s.on_reconnect_due().is_empty());
    assert_eq!(s.status(), ConnectionStatus::Idle);
}

// =========================================================================
// manual reconnect
// =========================================================================

#[test]
fn manual_reconnect_recovers_from_exhaustion() {
    let mut s = ConnectionSession::new(ReconnectPolicy { max_attempts: 0, ..ReconnectPolicy::default() });
    s.connect();
    assert!(matches!(s.on_down("refused").as_slice(), [LifecycleAction::Exhausted { .. }]));

    let actions = s.manual_reconnect();
    assert_eq!(actions, vec![LifecycleAction::CloseTransport, LifecycleAction::ScheduleReconnect(ms(1000))]);
    assert!(!s.snapshot().unavailable);
    assert_eq!(s.reconnect_attempt(), 0);
    assert_eq!(s.on_reconnect_due(), vec![LifecycleAction::OpenTransport]);
}

#[test]
fn manual_reconnect_from_open_closes_first() {
    let mut s = session();
    s.connect();
    s.on_open();
    let actions = s.manual_reconnect();
    assert_eq!(actions[0], LifecycleAction::CloseTransport);
    assert!(!s.is_ready());
}

// =========================================================================
// auth / dispose
// =========================================================================

#[test]
fn rejected_auth_closes_without_reconnect() {
    let mut s = session();
    s.connect();
    s.on_open();
    assert_eq!(
        s.on_auth_result(false),
        vec![LifecycleAction::CancelReconnect, LifecycleAction::CloseTransport]
    );
    assert_eq!(s.status(), ConnectionStatus::Closed);
    assert!(!s.is_ready());
    let snap = s.snapshot();
    assert!(snap.unavailable);
    assert_eq!(snap.authenticated, Some(false));

    // The peer's close after the rejection starts no backoff.
    assert!(s.on_down("closed").is_empty());
    assert!(s.on_reconnect_due().is_empty());
}

#[test]
fn manual_reconnect_recovers_from_rejected_auth() {
    let mut s = session();
    s.connect();
    s.on_open();
    s.on_auth_result(false);
    s.manual_reconnect();
    assert!(!s.snapshot().unavailable);
    assert_eq!(s.snapshot().authenticated, None);
    assert_eq!(s.on_reconnect_due(), vec![LifecycleAction::OpenTransport]);
}

#[test]
fn auth_result_outside_open_is_ignored() {
    let mut s = session();
    s.connect();
    assert!(s.on_auth_result(false).is_empty());
    assert_eq!(s.status(), ConnectionStatus::Connecting);
}

#[test]
fn accepted_auth_keeps_session_ready() {
    let mut s = session();
    s.connect();
    s.on_open();
    s.on_auth_result(true);
    assert!(s.is_ready());
}

#[test]
fn dispose_is_terminal() {
    let mut s = session();
    s.connect();
    s.on_open();
    assert_eq!(s.dispose(), vec![LifecycleAction::CancelReconnect, LifecycleAction::CloseTransport]);
    assert!(s.dispose().is_empty());
    assert!(s.connect().is_empty());
    assert!(s.on_down("late").is_empty());
    assert!(s.manual_reconnect().is_empty());
    assert!(!s.is_ready());
}
