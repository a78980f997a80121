//! Transition function tests; the machine runs without a runtime or adapters

use pretty_assertions::assert_eq;
use std::time::Duration;

use peerlink_session_core::state_machine::{ActionFailure, ProcessEventResult};
use peerlink_session_core::*;

const TIMEOUT: Duration = Duration::from_secs(10);

fn machine() -> SessionMachine {
    SessionMachine::new(SessionId("session-test".to_string()), vec![1000, 1001])
}

fn signaling(event: SignalingEvent) -> EventType {
    EventType::Signaling(event)
}

fn media(event: MediaEvent) -> EventType {
    EventType::Media(event)
}

fn inbound(text: &str) -> EventType {
    signaling(SignalingEvent::Message(Payload::Text(text.to_string())))
}

fn ice(state: IceConnectionState) -> EventType {
    media(MediaEvent::IceConnectionStateChanged(state))
}

/// Actions other than observer notifications
fn effects(actions: &[Action]) -> Vec<Action> {
    actions
        .iter()
        .filter(|action| !matches!(action, Action::Notify(_)))
        .cloned()
        .collect()
}

fn count(actions: &[Action], predicate: impl Fn(&Action) -> bool) -> usize {
    actions.iter().filter(|action| predicate(action)).count()
}

fn media_ready(role: Role) -> SessionMachine {
    let mut machine = machine();
    machine.connect(ConnectRequest::new(role, "room1"), TIMEOUT).unwrap();
    machine.process_event(signaling(SignalingEvent::Opened));
    assert_eq!(machine.state(), SessionState::MediaReady);
    machine
}

fn answered() -> SessionMachine {
    let mut machine = media_ready(Role::Downstream);
    machine.process_event(inbound(r#"{"type": "offer", "client_id": "c1", "sdp": "v=0"}"#));
    machine.process_event(media(MediaEvent::RemoteDescriptionSet(Ok(()))));
    machine.process_event(media(MediaEvent::AnswerCreated(Ok("answer-sdp".to_string()))));
    machine.process_event(media(MediaEvent::LocalDescriptionSet(Ok(()))));
    assert_eq!(machine.state(), SessionState::Answered);
    machine
}

fn connected() -> SessionMachine {
    let mut machine = answered();
    machine.process_event(ice(IceConnectionState::Connected));
    assert_eq!(machine.state(), SessionState::Connected);
    machine
}

/// Feed every teardown confirmation and collect the resulting actions
fn confirm_all(machine: &mut SessionMachine, close_code: u16) -> Vec<Action> {
    let mut actions = Vec::new();
    for event in [
        signaling(SignalingEvent::Closed {
            code: close_code,
            reason: String::new(),
        }),
        media(MediaEvent::SignalingStateChanged(MediaSignalingState::Closed)),
        ice(IceConnectionState::Closed),
    ] {
        actions.extend(machine.process_event(event).actions);
    }
    actions
}

#[test]
fn test_connect_twice_is_busy() {
    let mut machine = machine();
    machine.connect(ConnectRequest::downstream("room1"), TIMEOUT).unwrap();
    assert_eq!(
        machine.connect(ConnectRequest::downstream("room1"), TIMEOUT).unwrap_err(),
        ConnectionError::Busy
    );
    assert_eq!(machine.authorize_send().unwrap_err(), ConnectionError::Busy);
}

#[test]
fn test_channel_open_creates_media_and_sends_connect() {
    let mut machine = machine();
    machine.connect(ConnectRequest::upstream("room1"), TIMEOUT).unwrap();

    let result = machine.process_event(signaling(SignalingEvent::Opened));
    assert_eq!(result.old_state, SessionState::SignalingConnecting);
    assert_eq!(result.new_state, SessionState::MediaReady);

    let effects = effects(&result.actions);
    assert_eq!(
        effects[0],
        Action::CreateMediaSession {
            role: Role::Upstream,
            media: MediaOptions::default()
        }
    );
    assert_eq!(effects[1], Action::AcquireLocalTracks);
    assert!(matches!(&effects[2], Action::SendMessage(SignalingMessage::Connect(connect)) if connect.channel_id == "room1"));
    assert_eq!(effects.len(), 3);
}

#[test]
fn test_downstream_does_not_capture() {
    let mut machine = machine();
    machine.connect(ConnectRequest::downstream("room1"), TIMEOUT).unwrap();
    let result = machine.process_event(signaling(SignalingEvent::Opened));
    assert!(!result.actions.contains(&Action::AcquireLocalTracks));
}

#[test]
fn test_offer_with_config_applies_it_first() {
    let mut machine = media_ready(Role::Downstream);
    let result = machine.process_event(inbound(
        r#"{"type": "offer", "client_id": "c1", "sdp": "v=0", "config": {"iceTransportPolicy": "relay"}}"#,
    ));

    assert_eq!(result.new_state, SessionState::OfferReceived);
    assert_eq!(
        effects(&result.actions),
        vec![
            Action::ApplyConfiguration(IceConfig {
                transport_policy: IceTransportPolicy::Relay,
                servers: vec![],
            }),
            Action::SetRemoteDescription("v=0".to_string()),
        ]
    );
}

#[test]
fn test_answer_is_sent_after_local_description() {
    let mut machine = media_ready(Role::Downstream);
    machine.process_event(inbound(r#"{"type": "offer", "client_id": "c1", "sdp": "v=0"}"#));

    let result = machine.process_event(media(MediaEvent::RemoteDescriptionSet(Ok(()))));
    assert_eq!(result.new_state, SessionState::AnsweringInProgress);
    assert_eq!(effects(&result.actions), vec![Action::CreateAnswer]);

    let result = machine.process_event(media(MediaEvent::AnswerCreated(Ok("answer-sdp".to_string()))));
    assert_eq!(effects(&result.actions), vec![Action::SetLocalDescription("answer-sdp".to_string())]);
    assert_eq!(machine.state(), SessionState::AnsweringInProgress);

    let result = machine.process_event(media(MediaEvent::LocalDescriptionSet(Ok(()))));
    assert_eq!(result.new_state, SessionState::Answered);
    assert_eq!(
        effects(&result.actions),
        vec![Action::SendMessage(SignalingMessage::Answer {
            sdp: "answer-sdp".to_string()
        })]
    );
}

#[test]
fn test_ice_connected_promotes_and_completes_connect() {
    let mut machine = answered();
    let result = machine.process_event(ice(IceConnectionState::Completed));

    assert_eq!(result.new_state, SessionState::Connected);
    assert_eq!(
        effects(&result.actions),
        vec![Action::CancelTimer, Action::CompleteConnect(Ok(()))]
    );
    assert!(!machine.is_timer_armed());
    assert!(result
        .actions
        .iter()
        .any(|action| matches!(action, Action::Notify(SessionEvent::Open { .. }))));
}

#[test]
fn test_early_ice_connection_is_remembered() {
    let mut machine = media_ready(Role::Downstream);
    let result = machine.process_event(ice(IceConnectionState::Connected));
    assert_eq!(result.new_state, SessionState::MediaReady);
    assert!(effects(&result.actions).is_empty());

    machine.process_event(inbound(r#"{"type": "offer", "client_id": "c1", "sdp": "v=0"}"#));
    machine.process_event(media(MediaEvent::RemoteDescriptionSet(Ok(()))));
    machine.process_event(media(MediaEvent::AnswerCreated(Ok("answer-sdp".to_string()))));
    let result = machine.process_event(media(MediaEvent::LocalDescriptionSet(Ok(()))));

    assert_eq!(result.new_state, SessionState::Connected);
    assert_eq!(
        effects(&result.actions),
        vec![
            Action::SendMessage(SignalingMessage::Answer {
                sdp: "answer-sdp".to_string()
            }),
            Action::CancelTimer,
            Action::CompleteConnect(Ok(())),
        ]
    );
}

#[test]
fn test_failed_answer_send_after_early_promotion_completes_connect_once() {
    let mut machine = media_ready(Role::Downstream);
    machine.process_event(ice(IceConnectionState::Connected));
    machine.process_event(inbound(r#"{"type": "offer", "client_id": "c1", "sdp": "v=0"}"#));
    machine.process_event(media(MediaEvent::RemoteDescriptionSet(Ok(()))));
    machine.process_event(media(MediaEvent::AnswerCreated(Ok("answer-sdp".to_string()))));
    let batch = machine.process_event(media(MediaEvent::LocalDescriptionSet(Ok(())))).actions;

    // The executor fails on the answer and skips the rest of the batch
    let position = batch
        .iter()
        .position(|action| matches!(action, Action::SendMessage(SignalingMessage::Answer { .. })))
        .unwrap();
    let skipped = batch[position + 1..].to_vec();

    let mut actions = machine
        .process_event(EventType::ActionFailed {
            failure: ActionFailure::Send("broken pipe".to_string()),
            skipped,
        })
        .actions;
    assert_eq!(machine.state(), SessionState::Disconnecting);
    actions.extend(confirm_all(&mut machine, 1000));

    assert_eq!(machine.state(), SessionState::Terminated);
    assert_eq!(
        count(&actions, |a| matches!(a, Action::CompleteConnect(_))),
        1
    );
    assert!(actions.contains(&Action::CompleteConnect(Err(ConnectionError::Terminated))));
    assert_eq!(count(&actions, |a| *a == Action::CancelTimer), 1);
}

#[test]
fn test_timeout_terminates_with_wait_timeout() {
    let mut machine = media_ready(Role::Upstream);
    let result = machine.process_event(EventType::TimerFired);

    assert_eq!(result.new_state, SessionState::Disconnecting);
    assert!(!result.actions.contains(&Action::CancelTimer));
    assert!(result.actions.contains(&Action::CloseChannel));
    assert!(result.actions.contains(&Action::CloseMediaSession));

    let actions = confirm_all(&mut machine, 1000);
    assert_eq!(machine.state(), SessionState::Terminated);
    assert!(actions.contains(&Action::CompleteConnect(Err(ConnectionError::WaitTimeout))));
    assert!(machine.is_released());
}

#[test]
fn test_timer_after_connect_is_ignored() {
    let mut machine = connected();
    // An expiry can already be queued when the timer is cancelled
    let result = machine.process_event(EventType::TimerFired);
    assert_eq!(result.new_state, SessionState::Connected);
    assert!(result.actions.is_empty());
}

#[test]
fn test_teardown_converges_in_any_confirmation_order() {
    let confirmations = || {
        vec![
            signaling(SignalingEvent::Closed {
                code: 1000,
                reason: String::new(),
            }),
            media(MediaEvent::SignalingStateChanged(MediaSignalingState::Closed)),
            ice(IceConnectionState::Closed),
        ]
    };
    let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

    for order in orders {
        let mut machine = connected();
        let mut actions = machine.disconnect().unwrap();
        let events = confirmations();

        for (step, index) in order.iter().enumerate() {
            let result = machine.process_event(events[*index].clone());
            if step < 2 {
                assert_eq!(result.new_state, SessionState::Disconnecting, "order {:?}", order);
            }
            actions.extend(result.actions);
        }

        assert_eq!(machine.state(), SessionState::Disconnected, "order {:?}", order);
        assert_eq!(count(&actions, |a| matches!(a, Action::CompleteDisconnect(_))), 1);
        assert!(actions.contains(&Action::CompleteDisconnect(Ok(()))));
        assert_eq!(count(&actions, |a| *a == Action::ReleaseMediaSession), 1);
        assert_eq!(count(&actions, |a| *a == Action::ReleaseChannel), 1);
    }
}

#[test]
fn test_release_happens_before_completion() {
    let mut machine = connected();
    let mut actions = machine.disconnect().unwrap();
    actions.extend(confirm_all(&mut machine, 1000));

    let position = |target: &Action| actions.iter().position(|a| a == target).unwrap();
    assert!(position(&Action::ReleaseMediaSession) < position(&Action::ReleaseChannel));
    assert!(position(&Action::ReleaseChannel) < position(&Action::CompleteDisconnect(Ok(()))));
    assert!(matches!(actions.last(), Some(Action::Notify(SessionEvent::Closed { error: None, .. }))));
}

#[test]
fn test_events_after_final_state_are_absorbed() {
    let mut machine = connected();
    machine.disconnect().unwrap();
    confirm_all(&mut machine, 1000);
    assert_eq!(machine.state(), SessionState::Disconnected);

    for event in [
        inbound(r#"{"type": "ping"}"#),
        ice(IceConnectionState::Failed),
        EventType::TimerFired,
        signaling(SignalingEvent::Error("late".to_string())),
    ] {
        let result = machine.process_event(event);
        assert_eq!(result.new_state, SessionState::Disconnected);
        assert!(result.actions.is_empty());
    }

    assert_eq!(machine.disconnect().unwrap_err(), ConnectionError::AlreadyDisconnected);
}

#[test]
fn test_disconnect_while_disconnecting_is_busy() {
    let mut machine = connected();
    machine.disconnect().unwrap();
    assert_eq!(machine.disconnect().unwrap_err(), ConnectionError::Busy);
    assert_eq!(machine.authorize_send().unwrap_err(), ConnectionError::Busy);
}

#[test]
fn test_unexpected_close_code_is_reported() {
    let mut machine = connected();
    let mut actions = machine.disconnect().unwrap();
    actions.extend(confirm_all(&mut machine, 4000));

    let error = ConnectionError::TransportClosed {
        code: 4000,
        reason: String::new(),
    };
    assert_eq!(machine.state(), SessionState::Terminated);
    assert!(actions.contains(&Action::CompleteDisconnect(Err(error))));
}

#[test]
fn test_missing_type_is_a_protocol_violation() {
    let mut machine = connected();
    let result = machine.process_event(inbound(r#"{"sdp": "v=0"}"#));
    assert_eq!(result.new_state, SessionState::Disconnecting);

    let actions = confirm_all(&mut machine, 1000);
    assert_eq!(machine.state(), SessionState::Terminated);
    assert!(actions
        .iter()
        .any(|a| matches!(a, Action::Notify(SessionEvent::Closed { error: Some(ConnectionError::Terminated), .. }))));
}

#[test]
fn test_unknown_type_and_malformed_body_are_dropped() {
    let mut machine = connected();
    for text in [
        r#"{"type": "notify", "event_type": "connection.updated"}"#,
        r#"{"type": "candidate"}"#,
        r#"{"type": "stat", "reports": "none"}"#,
    ] {
        let result: ProcessEventResult = machine.process_event(inbound(text));
        assert_eq!(result.new_state, SessionState::Connected, "{}", text);
        assert!(result.actions.is_empty(), "{}", text);
    }
}

#[test]
fn test_ping_is_answered_with_pong() {
    let mut machine = connected();
    let result = machine.process_event(inbound(r#"{"type": "ping"}"#));
    assert_eq!(effects(&result.actions), vec![Action::SendMessage(SignalingMessage::Pong)]);
    assert!(result
        .actions
        .iter()
        .any(|a| matches!(a, Action::Notify(SessionEvent::Ping { .. }))));
}

#[test]
fn test_offer_after_connect_is_a_violation() {
    let mut machine = connected();
    let result = machine.process_event(inbound(r#"{"type": "offer", "client_id": "c1", "sdp": "v=0"}"#));
    assert_eq!(result.new_state, SessionState::Disconnecting);
    assert!(!result
        .actions
        .iter()
        .any(|a| matches!(a, Action::SetRemoteDescription(_))));
}

#[test]
fn test_candidate_before_offer_is_a_violation() {
    let mut machine = media_ready(Role::Downstream);
    let result = machine.process_event(inbound(r#"{"type": "candidate", "sdp": "candidate:1"}"#));
    assert_eq!(result.new_state, SessionState::Disconnecting);
}

#[test]
fn test_ice_failure_before_connect() {
    let mut machine = media_ready(Role::Downstream);
    let mut actions = machine.process_event(ice(IceConnectionState::Failed)).actions;
    actions.extend(confirm_all(&mut machine, 1000));

    assert_eq!(machine.state(), SessionState::Terminated);
    assert!(actions.contains(&Action::CompleteConnect(Err(ConnectionError::IceFailed))));
}

#[test]
fn test_ice_disconnect_after_connect_is_transient() {
    let mut machine = connected();
    let result = machine.process_event(ice(IceConnectionState::Disconnected));
    assert_eq!(result.new_state, SessionState::Connected);
    assert!(effects(&result.actions).is_empty());

    let result = machine.process_event(ice(IceConnectionState::Connected));
    assert_eq!(result.new_state, SessionState::Connected);
    assert!(!result.actions.iter().any(|a| matches!(a, Action::CompleteConnect(_))));
}

#[test]
fn test_ice_disconnect_before_connect_terminates() {
    let mut machine = answered();
    let result = machine.process_event(ice(IceConnectionState::Disconnected));
    assert_eq!(result.new_state, SessionState::Disconnecting);
}

#[test]
fn test_rejected_configuration_skips_remote_description() {
    let mut machine = media_ready(Role::Downstream);
    machine.process_event(inbound(
        r#"{"type": "offer", "client_id": "c1", "sdp": "v=0", "config": {"iceTransportPolicy": "relay"}}"#,
    ));

    let mut actions = machine
        .process_event(EventType::ActionFailed {
            failure: ActionFailure::Configuration("relay unsupported".to_string()),
            skipped: vec![Action::SetRemoteDescription("v=0".to_string())],
        })
        .actions;
    actions.extend(confirm_all(&mut machine, 1000));

    assert!(actions.contains(&Action::CompleteConnect(Err(ConnectionError::ConfigurationRejected))));
}

#[test]
fn test_capture_failure_before_connect_message() {
    let mut machine = machine();
    machine.connect(ConnectRequest::upstream("room1"), TIMEOUT).unwrap();
    machine.process_event(signaling(SignalingEvent::Opened));

    let mut actions = machine
        .process_event(EventType::ActionFailed {
            failure: ActionFailure::Capture("camera busy".to_string()),
            skipped: vec![],
        })
        .actions;
    actions.extend(confirm_all(&mut machine, 1000));

    assert!(actions.contains(&Action::CompleteConnect(Err(ConnectionError::CaptureFailed))));
}

#[test]
fn test_media_session_failure_needs_only_channel_confirmation() {
    let mut machine = machine();
    machine.connect(ConnectRequest::downstream("room1"), TIMEOUT).unwrap();
    machine.process_event(signaling(SignalingEvent::Opened));

    let result = machine.process_event(EventType::ActionFailed {
        failure: ActionFailure::MediaSession("no codecs".to_string()),
        skipped: vec![],
    });
    assert!(!result.actions.contains(&Action::CloseMediaSession));

    let result = machine.process_event(signaling(SignalingEvent::Closed {
        code: 1000,
        reason: String::new(),
    }));
    assert_eq!(result.new_state, SessionState::Terminated);
    assert!(!result.actions.contains(&Action::ReleaseMediaSession));
    assert!(result
        .actions
        .contains(&Action::CompleteConnect(Err(ConnectionError::media("no codecs")))));
}

#[test]
fn test_teardown_errors_accumulate() {
    let mut machine = connected();
    let mut actions = machine.disconnect().unwrap();
    actions.extend(machine.process_event(media(MediaEvent::Error("dtls".to_string()))).actions);
    actions.extend(confirm_all(&mut machine, 4000));

    let expected = ConnectionError::Aggregate(vec![
        ConnectionError::media("dtls"),
        ConnectionError::TransportClosed {
            code: 4000,
            reason: String::new(),
        },
    ]);
    assert!(actions.contains(&Action::CompleteDisconnect(Err(expected))));
}

#[test]
fn test_teardown_deadline_gives_up_on_unconfirmed_layers() {
    let mut machine = connected();
    let actions = machine.disconnect().unwrap();
    assert!(actions.contains(&Action::ArmTeardownTimer));

    // Only the media signaling layer ever confirms
    machine.process_event(media(MediaEvent::SignalingStateChanged(MediaSignalingState::Closed)));
    assert_eq!(machine.state(), SessionState::Disconnecting);

    let result = machine.process_event(EventType::TeardownTimedOut);
    assert_eq!(result.new_state, SessionState::Terminated);
    assert!(machine.is_released());
    assert!(result
        .actions
        .contains(&Action::CompleteDisconnect(Err(ConnectionError::Aggregate(vec![
            ConnectionError::transport("signaling channel did not confirm closure"),
            ConnectionError::media("media session did not confirm closure"),
        ])))));
    assert_eq!(count(&result.actions, |a| *a == Action::ReleaseChannel), 1);
}

#[test]
fn test_teardown_deadline_is_not_armed_when_teardown_converges_at_once() {
    let mut machine = machine();
    machine.connect(ConnectRequest::downstream("room1"), TIMEOUT).unwrap();
    let result = machine.process_event(EventType::ActionFailed {
        failure: ActionFailure::ChannelOpen("refused".to_string()),
        skipped: vec![],
    });
    assert_eq!(result.new_state, SessionState::Terminated);
    assert!(!result.actions.contains(&Action::ArmTeardownTimer));
}

#[test]
fn test_stale_teardown_deadline_is_ignored() {
    let mut machine = connected();
    let result = machine.process_event(EventType::TeardownTimedOut);
    assert_eq!(result.new_state, SessionState::Connected);
    assert!(result.actions.is_empty());

    machine.disconnect().unwrap();
    confirm_all(&mut machine, 1000);
    let result = machine.process_event(EventType::TeardownTimedOut);
    assert_eq!(result.new_state, SessionState::Disconnected);
    assert!(result.actions.is_empty());
}
