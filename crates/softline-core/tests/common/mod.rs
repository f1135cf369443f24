//! Shared harness for softphone integration tests
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use softline_core::config::{EndpointIdentity, SoftphoneConfig};
use softline_core::cues::{CuePlayers, HeadlessCuePlayer};
use softline_core::loopback::{LoopbackCapture, LoopbackEndpoint, LoopbackEngine, LoopbackSession};
use softline_core::{SessionState, Softphone, SoftphoneEvent};
use tokio::sync::broadcast;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);
pub const RESET_DELAY_MS: u64 = 100;

pub struct Harness {
    pub phone: Softphone,
    pub engine: LoopbackEngine,
    pub endpoint: Arc<LoopbackEndpoint>,
    pub capture: Arc<LoopbackCapture>,
    pub ringback: Arc<HeadlessCuePlayer>,
    pub ringtone: Arc<HeadlessCuePlayer>,
    pub dtmf: Arc<HeadlessCuePlayer>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("softline_core=debug")
        .with_test_writer()
        .try_init();
}

pub fn identity() -> EndpointIdentity {
    EndpointIdentity::new("3005", "wss://pbx.example.com:7443/ws")
        .with_display_name("Front Desk")
        .with_password("1234")
        .with_domain("pbx.example.com")
}

pub fn config() -> SoftphoneConfig {
    SoftphoneConfig::new(identity()).with_reset_delay_ms(RESET_DELAY_MS)
}

/// A softphone on a loopback engine, not yet started
pub async fn harness_with(config: SoftphoneConfig) -> Harness {
    init_tracing();
    let engine = LoopbackEngine::new();
    let capture = Arc::new(LoopbackCapture::new());
    let ringback = Arc::new(HeadlessCuePlayer::new());
    let ringtone = Arc::new(HeadlessCuePlayer::new());
    let dtmf = Arc::new(HeadlessCuePlayer::new());
    let players = CuePlayers::new(ringback.clone(), ringtone.clone(), dtmf.clone());

    let phone = Softphone::spawn(config, &engine, capture.clone(), players)
        .await
        .expect("Failed to spawn softphone");
    let endpoint = engine.endpoint().expect("endpoint created");

    Harness {
        phone,
        engine,
        endpoint,
        capture,
        ringback,
        ringtone,
        dtmf,
    }
}

pub async fn harness() -> Harness {
    harness_with(config()).await
}

/// A started and registered softphone
pub async fn connected() -> Harness {
    let h = harness().await;
    h.phone.connect().await.expect("Failed to connect");
    h
}

pub async fn wait_for_state(phone: &Softphone, state: SessionState) {
    let mut states = phone.watch_session_state();
    let reached = timeout(WAIT, states.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}, still {}", phone.session_state()))
        .is_ok();
    assert!(reached, "controller stopped before reaching {state}");
}

/// Poll `check` until it holds
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let polled = timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out waiting for {what}");
}

/// Place an outbound call and have the remote party answer it
pub async fn established_outbound(h: &Harness) -> Arc<LoopbackSession> {
    h.phone.place_call("3009").await.expect("Failed to place call");
    let session = h.endpoint.last_session().expect("outbound session");
    session.establish();
    wait_for_state(&h.phone, SessionState::Established).await;
    session
}

/// Session states announced on the event stream so far
pub fn drain_states(events: &mut broadcast::Receiver<SoftphoneEvent>) -> Vec<SessionState> {
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SoftphoneEvent::SessionStateChanged { current, .. } = event {
            states.push(current);
        }
    }
    states
}

pub async fn within<T>(what: &str, work: impl Future<Output = T>) -> T {
    timeout(WAIT, work)
        .await
        .unwrap_or_else(|_| panic!("timed out: {what}"))
}
