//! Session controller invariants and edge cases

mod common;

use common::*;
use softline_core::engine::NegotiatedTransport;
use softline_core::loopback::SessionOp;
use softline_core::{DtmfDisposition, LoopCue, SessionDirection, SessionState, SoftphoneError};

#[tokio::test]
async fn test_hang_up_without_session_is_noop() {
    let h = connected().await;

    for _ in 0..3 {
        assert_eq!(h.phone.hang_up().await, Err(SoftphoneError::NoActiveSession));
        assert_eq!(h.phone.session_state(), SessionState::Idle);
    }
    assert_eq!(h.phone.status_text(), "No active call to hang up or cancel");
}

#[tokio::test]
async fn test_place_call_requires_started_endpoint() {
    let h = harness().await;

    let err = h.phone.place_call("3009").await.unwrap_err();
    assert!(matches!(err, SoftphoneError::InvalidTarget { .. }));
    assert_eq!(h.phone.session_state(), SessionState::Idle);
    assert_eq!(h.phone.status_text(), "Invalid target URI or UserAgent not initialized");
}

#[tokio::test]
async fn test_place_call_rejects_bad_destination() {
    let h = connected().await;

    for destination in ["", "   ", "30 09"] {
        let err = h.phone.place_call(destination).await.unwrap_err();
        assert!(matches!(err, SoftphoneError::InvalidTarget { .. }), "{destination:?}");
    }
    assert!(h.endpoint.sessions().is_empty());
}

#[tokio::test]
async fn test_answer_requires_inbound_invitation() {
    let h = connected().await;
    assert_eq!(h.phone.answer().await, Err(SoftphoneError::NoActiveInvitation));

    h.phone.place_call("3009").await.unwrap();
    assert_eq!(h.phone.answer().await, Err(SoftphoneError::NoActiveInvitation));
}

#[tokio::test]
async fn test_second_answer_is_rejected() {
    let h = connected().await;
    h.endpoint.deliver_invite("sip:3009@pbx.example.com", None);
    wait_for_state(&h.phone, SessionState::Establishing).await;

    h.phone.answer().await.unwrap();
    assert_eq!(h.phone.answer().await, Err(SoftphoneError::NoActiveInvitation));
}

#[tokio::test]
async fn test_ringback_only_while_establishing() {
    let h = connected().await;
    assert_eq!(h.phone.active_cue(), None);

    h.phone.place_call("3009").await.unwrap();
    assert_eq!(h.phone.active_cue(), Some(LoopCue::Ringback));

    let session = h.endpoint.last_session().unwrap();
    session.establish();
    wait_for_state(&h.phone, SessionState::Established).await;
    assert_eq!(h.phone.active_cue(), None);
    assert!(!h.ringback.is_playing());
    assert!(h.ringback.is_at_start());

    session.terminate();
    wait_for_state(&h.phone, SessionState::Terminated).await;
    assert_eq!(h.phone.active_cue(), None);
}

#[tokio::test]
async fn test_ringtone_stops_on_answer_before_establishment() {
    let h = connected().await;
    h.endpoint.on_new_session(|session| session.set_auto_establish(false));
    let session = h.endpoint.deliver_invite("sip:3009@pbx.example.com", None);
    wait_for_state(&h.phone, SessionState::Establishing).await;
    assert!(h.ringtone.is_playing());

    h.phone.answer().await.unwrap();
    assert_eq!(h.phone.session_state(), SessionState::Establishing);
    assert_eq!(h.phone.active_cue(), None);
    assert!(!h.ringtone.is_playing());

    session.establish();
    wait_for_state(&h.phone, SessionState::Established).await;
    assert_eq!(h.phone.active_cue(), None);
}

#[tokio::test]
async fn test_outbound_video_set_is_idempotent() {
    let h = connected().await;
    let session = established_outbound(&h).await;
    let transport = session.loopback_transport().unwrap();
    assert!(!h.phone.outbound_video_enabled());

    h.phone.set_outbound_video_enabled(true).await.unwrap();
    h.phone.set_outbound_video_enabled(true).await.unwrap();
    assert!(h.phone.outbound_video_enabled());
    assert_eq!(transport.outbound_video_enabled(), Some(true));

    h.phone.set_outbound_video_enabled(false).await.unwrap();
    assert!(!h.phone.outbound_video_enabled());
    assert_eq!(transport.outbound_video_enabled(), Some(false));
}

#[tokio::test]
async fn test_outbound_video_needs_established_video_track() {
    let h = connected().await;
    assert_eq!(
        h.phone.set_outbound_video_enabled(true).await,
        Err(SoftphoneError::NoVideoTrack)
    );

    h.phone.place_call("3009").await.unwrap();
    assert_eq!(
        h.phone.set_outbound_video_enabled(true).await,
        Err(SoftphoneError::NoVideoTrack)
    );
}

#[tokio::test]
async fn test_audio_only_call_still_binds_audio() {
    let h = connected().await;
    h.endpoint.set_negotiate_video(false);
    let _session = established_outbound(&h).await;

    let sinks = h.phone.sinks();
    eventually("remote audio bound", || sinks.remote_audio.is_bound()).await;
    assert!(!sinks.remote_video.is_bound());
    assert_eq!(
        h.phone.set_outbound_video_enabled(true).await,
        Err(SoftphoneError::NoVideoTrack)
    );
}

#[tokio::test]
async fn test_outbound_video_resets_after_call() {
    let h = connected().await;
    let session = established_outbound(&h).await;
    h.phone.set_outbound_video_enabled(true).await.unwrap();

    session.terminate();
    wait_for_state(&h.phone, SessionState::Terminated).await;
    assert!(!h.phone.outbound_video_enabled());
}

#[tokio::test]
async fn test_invite_while_busy_is_rejected() {
    let h = connected().await;
    let first = established_outbound(&h).await;

    let second = h.endpoint.deliver_invite("sip:3010@pbx.example.com", None);
    eventually("busy invite rejected", || second.count(SessionOp::Reject) == 1).await;

    assert_eq!(h.phone.session_state(), SessionState::Established);
    assert_eq!(h.phone.session_direction(), Some(SessionDirection::Outbound));
    assert!(first.ops().iter().all(|op| *op == SessionOp::Invite));
}

#[tokio::test]
async fn test_invite_during_grace_window_is_rejected() {
    let h = connected().await;
    let first = established_outbound(&h).await;
    first.terminate();
    wait_for_state(&h.phone, SessionState::Terminated).await;

    let late = h.endpoint.deliver_invite("sip:3010@pbx.example.com", None);
    eventually("late invite rejected", || late.count(SessionOp::Reject) == 1).await;
    assert_eq!(h.phone.session_state(), SessionState::Terminated);
}

#[tokio::test]
async fn test_failed_invite_terminates_session() {
    let h = connected().await;
    h.endpoint
        .on_new_session(|session| session.fail(SessionOp::Invite, "486 Busy Here"));

    let err = h.phone.place_call("3009").await.unwrap_err();
    assert!(matches!(err, SoftphoneError::Signaling { .. }));
    assert_eq!(h.phone.session_state(), SessionState::Terminated);
    assert_eq!(h.phone.status_text(), "Failed to make call");
    assert_eq!(h.phone.active_cue(), None);

    wait_for_state(&h.phone, SessionState::Idle).await;
}

#[tokio::test]
async fn test_failed_bye_still_tears_down() {
    let h = connected().await;
    let session = established_outbound(&h).await;
    session.fail(SessionOp::Bye, "request timeout");

    let err = h.phone.hang_up().await.unwrap_err();
    assert!(matches!(err, SoftphoneError::Signaling { .. }));
    assert_eq!(h.phone.session_state(), SessionState::Terminated);
    assert_eq!(h.phone.status_text(), "Failed to end call");
    assert!(!h.phone.sinks().remote_audio.is_bound());

    wait_for_state(&h.phone, SessionState::Idle).await;
}

#[tokio::test]
async fn test_hang_up_during_pending_invite_leaves_no_orphan() {
    let h = connected().await;
    h.endpoint.on_new_session(|session| {
        session.hold_invite();
        session.set_auto_terminate(false);
    });

    let phone = h.phone.clone();
    let placing = tokio::spawn(async move { phone.place_call("3009").await });
    wait_for_state(&h.phone, SessionState::Establishing).await;
    let session = h.endpoint.last_session().unwrap();

    h.phone.hang_up().await.expect("Failed to hang up");
    assert_eq!(h.phone.session_state(), SessionState::Terminated);
    assert_eq!(session.count(SessionOp::Cancel), 1);

    // The invite resolves after the session was retired
    session.release_invite();
    let placed = within("place_call", placing).await.unwrap();
    assert_eq!(placed, Ok(()));

    // The remote side answers anyway; the retired session is ended
    session.establish();
    eventually("orphan ended", || session.count(SessionOp::Bye) == 1).await;
    assert_eq!(h.phone.session_state(), SessionState::Terminated);
    assert!(!h.phone.sinks().remote_audio.is_bound());

    wait_for_state(&h.phone, SessionState::Idle).await;
}

#[tokio::test]
async fn test_engine_events_precede_queued_commands() {
    let h = connected().await;
    h.phone.place_call("3009").await.unwrap();
    let session = h.endpoint.last_session().unwrap();

    // No yield between the engine report and the command
    session.establish();
    let disposition = h.phone.send_digit('1').await.unwrap();
    assert_eq!(disposition, DtmfDisposition::Forwarded);
}

#[tokio::test]
async fn test_established_digits_forward_in_order() {
    let h = connected().await;
    let session = established_outbound(&h).await;
    let transport = session.loopback_transport().unwrap();

    for digit in ['1', '2', '3', '#', 'a'] {
        assert_eq!(h.phone.send_digit(digit).await, Ok(DtmfDisposition::Forwarded));
    }
    eventually("digits forwarded", || transport.sent_digits().len() == 5).await;
    assert_eq!(transport.sent_digits(), vec!['1', '2', '3', '#', 'A']);
    assert_eq!(h.dtmf.play_count(), 5);
}

#[tokio::test]
async fn test_establishing_digit_is_not_forwarded() {
    let h = connected().await;
    h.phone.place_call("3009").await.unwrap();

    assert_eq!(h.phone.send_digit('9').await, Ok(DtmfDisposition::LocalOnly));
    assert_eq!(h.dtmf.play_count(), 1);
}

#[tokio::test]
async fn test_invalid_digit() {
    let h = connected().await;
    assert_eq!(
        h.phone.send_digit('x').await,
        Err(SoftphoneError::InvalidDigit { digit: 'X' })
    );
    assert_eq!(h.dtmf.play_count(), 0);
}

#[tokio::test]
async fn test_shutdown_ends_active_call() {
    let h = connected().await;
    let session = established_outbound(&h).await;

    let mut states = h.phone.subscribe_events();
    h.phone.shutdown().await.unwrap();
    eventually("bye sent", || session.count(SessionOp::Bye) == 1).await;
    assert_eq!(
        drain_states(&mut states),
        vec![SessionState::Terminated, SessionState::Idle]
    );
    assert_eq!(h.phone.session_state(), SessionState::Idle);
    assert_eq!(h.phone.session_direction(), None);
    assert_eq!(h.phone.hang_up().await, Err(SoftphoneError::Shutdown));
}

#[tokio::test]
async fn test_shutdown_during_grace_window_settles_idle() {
    let h = connected().await;
    let session = established_outbound(&h).await;
    session.terminate();
    wait_for_state(&h.phone, SessionState::Terminated).await;

    h.phone.shutdown().await.unwrap();
    assert_eq!(h.phone.session_state(), SessionState::Idle);
}

#[tokio::test]
async fn test_invite_canceled_before_dequeue_is_not_lost() {
    let h = connected().await;

    // The caller gives up before the controller has seen the invite
    let early = h.endpoint.deliver_invite("sip:3009@pbx.example.com", None);
    early.terminate();

    wait_for_state(&h.phone, SessionState::Terminated).await;
    assert!(!h.ringtone.is_playing());
    assert_eq!(h.phone.active_cue(), None);
    wait_for_state(&h.phone, SessionState::Idle).await;
    assert_eq!(early.count(SessionOp::Reject), 0);

    // The line is free for the next caller
    h.endpoint.deliver_invite("sip:3010@pbx.example.com", Some("Bob"));
    wait_for_state(&h.phone, SessionState::Establishing).await;
    assert_eq!(h.phone.session_direction(), Some(SessionDirection::Inbound));
    assert!(h.ringtone.is_playing());
}
