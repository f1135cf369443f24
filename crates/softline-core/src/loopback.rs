//! In-process engine and capture device
//!
//! [`LoopbackEngine`] implements the engine traits without any network. Sessions it
//! creates record every operation and are driven by hand: tests and demos call
//! [`LoopbackSession::establish`], [`LoopbackSession::terminate`] or
//! [`LoopbackEndpoint::deliver_invite`] to play the remote party.
//!
//! Defaults model a well-behaved peer: `accept` establishes the session and
//! `cancel`/`reject`/`bye` terminate it. Both can be switched off per session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::debug;
use uuid::Uuid;

use crate::engine::{
    EndpointConfig, EndpointHandle, EngineError, EngineResult, EngineSessionState, IncomingInvite,
    InviteStream, MediaConstraints, CaptureDevice, NegotiatedTransport, SessionEvents, SessionHandle,
    SignalingEngine,
};
use crate::media::{MediaStream, MediaTrack};

/// Operations a session was asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOp {
    Invite,
    Accept,
    Reject,
    Cancel,
    Bye,
}

#[derive(Default)]
pub struct LoopbackEngine {
    endpoints: Mutex<Vec<Arc<LoopbackEndpoint>>>,
    fail_create: Mutex<Option<String>>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently created endpoint
    pub fn endpoint(&self) -> Option<Arc<LoopbackEndpoint>> {
        self.endpoints.lock().last().cloned()
    }

    pub fn fail_next_create(&self, reason: impl Into<String>) {
        *self.fail_create.lock() = Some(reason.into());
    }
}

impl SignalingEngine for LoopbackEngine {
    fn create_endpoint(&self, config: EndpointConfig) -> EngineResult<Arc<dyn EndpointHandle>> {
        if let Some(reason) = self.fail_create.lock().take() {
            return Err(EngineError::transport(reason));
        }
        let endpoint = Arc::new(LoopbackEndpoint::new(config));
        self.endpoints.lock().push(endpoint.clone());
        Ok(endpoint as Arc<dyn EndpointHandle>)
    }
}

type SessionScript = Arc<dyn Fn(&LoopbackSession) + Send + Sync>;

pub struct LoopbackEndpoint {
    config: EndpointConfig,
    started: AtomicBool,
    registered: AtomicBool,
    register_count: AtomicUsize,
    fail_start: Mutex<Option<String>>,
    fail_register: Mutex<Option<String>>,
    negotiate_video: AtomicBool,
    sessions: Mutex<Vec<Arc<LoopbackSession>>>,
    session_script: Mutex<Option<SessionScript>>,
    invite_subscribers: Mutex<Vec<mpsc::UnboundedSender<IncomingInvite>>>,
}

impl LoopbackEndpoint {
    fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            started: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            register_count: AtomicUsize::new(0),
            fail_start: Mutex::new(None),
            fail_register: Mutex::new(None),
            negotiate_video: AtomicBool::new(true),
            sessions: Mutex::new(Vec::new()),
            session_script: Mutex::new(None),
            invite_subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> EndpointConfig {
        self.config.clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn register_count(&self) -> usize {
        self.register_count.load(Ordering::SeqCst)
    }

    pub fn fail_next_start(&self, reason: impl Into<String>) {
        *self.fail_start.lock() = Some(reason.into());
    }

    pub fn fail_next_register(&self, reason: impl Into<String>) {
        *self.fail_register.lock() = Some(reason.into());
    }

    /// Whether sessions created from now on negotiate an outbound video track
    pub fn set_negotiate_video(&self, negotiate: bool) {
        self.negotiate_video.store(negotiate, Ordering::SeqCst);
    }

    fn new_session(&self, remote_uri: String, display_name: Option<String>) -> Arc<LoopbackSession> {
        let session = Arc::new(LoopbackSession::new(
            remote_uri,
            display_name,
            self.negotiate_video.load(Ordering::SeqCst),
        ));
        if let Some(script) = self.session_script.lock().clone() {
            script(&session);
        }
        self.sessions.lock().push(session.clone());
        session
    }

    /// Run `script` on every session created from now on, before anyone sees it
    pub fn on_new_session(&self, script: impl Fn(&LoopbackSession) + Send + Sync + 'static) {
        *self.session_script.lock() = Some(Arc::new(script));
    }

    /// Play a remote party calling this endpoint
    pub fn deliver_invite(&self, remote_uri: &str, display_name: Option<&str>) -> Arc<LoopbackSession> {
        let session = self.new_session(remote_uri.to_string(), display_name.map(str::to_string));
        let handle: Arc<dyn SessionHandle> = session.clone();
        self.invite_subscribers.lock().retain(|subscriber| {
            let invite = IncomingInvite {
                session: handle.clone(),
                events: session.subscribe(),
            };
            subscriber.send(invite).is_ok()
        });
        debug!(session = %session.id, remote = %remote_uri, "Delivered invitation");
        session
    }

    pub fn last_session(&self) -> Option<Arc<LoopbackSession>> {
        self.sessions.lock().last().cloned()
    }

    pub fn sessions(&self) -> Vec<Arc<LoopbackSession>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl EndpointHandle for LoopbackEndpoint {
    async fn start(&self) -> EngineResult<()> {
        if let Some(reason) = self.fail_start.lock().take() {
            return Err(EngineError::transport(reason));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> EngineResult<()> {
        self.started.store(false, Ordering::SeqCst);
        self.registered.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn register(&self) -> EngineResult<()> {
        self.register_count.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.fail_register.lock().take() {
            return Err(EngineError::Rejected { status: 401, reason });
        }
        self.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unregister(&self) -> EngineResult<()> {
        self.registered.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn create_outbound_session(
        &self,
        target_uri: &str,
        constraints: MediaConstraints,
    ) -> EngineResult<Arc<dyn SessionHandle>> {
        if !self.is_started() {
            return Err(EngineError::InvalidState { state: "stopped".to_string() });
        }
        debug!(target = %target_uri, ?constraints, "Creating outbound session");
        let session: Arc<dyn SessionHandle> = self.new_session(target_uri.to_string(), None);
        Ok(session)
    }

    fn subscribe_invites(&self) -> InviteStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.invite_subscribers.lock().push(tx);
        rx
    }
}

/// One scripted call
pub struct LoopbackSession {
    id: String,
    remote_uri: String,
    display_name: Option<String>,
    negotiate_video: bool,
    ops: Mutex<Vec<SessionOp>>,
    failures: Mutex<HashMap<SessionOp, String>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<EngineSessionState>>>,
    transport: Mutex<Option<Arc<LoopbackTransport>>>,
    invite_held: AtomicBool,
    invite_gate: Notify,
    auto_terminate: AtomicBool,
    auto_establish: AtomicBool,
}

impl LoopbackSession {
    fn new(remote_uri: String, display_name: Option<String>, negotiate_video: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            remote_uri,
            display_name,
            negotiate_video,
            ops: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            transport: Mutex::new(None),
            invite_held: AtomicBool::new(false),
            invite_gate: Notify::new(),
            auto_terminate: AtomicBool::new(true),
            auto_establish: AtomicBool::new(true),
        }
    }

    /// Deliver a state change to every subscriber
    pub fn report(&self, state: EngineSessionState) {
        debug!(session = %self.id, ?state, "Reporting session state");
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(state).is_ok());
    }

    /// Negotiate a transport and report Established
    pub fn establish(&self) {
        let transport = Arc::new(LoopbackTransport::new(self.negotiate_video));
        *self.transport.lock() = Some(transport);
        self.report(EngineSessionState::Established);
    }

    pub fn terminate(&self) {
        self.report(EngineSessionState::Terminated);
    }

    /// Make the next `op` fail with `reason`
    pub fn fail(&self, op: SessionOp, reason: impl Into<String>) {
        self.failures.lock().insert(op, reason.into());
    }

    /// Keep `invite` pending until [`release_invite`](Self::release_invite)
    pub fn hold_invite(&self) {
        self.invite_held.store(true, Ordering::SeqCst);
    }

    pub fn release_invite(&self) {
        self.invite_held.store(false, Ordering::SeqCst);
        self.invite_gate.notify_waiters();
    }

    /// Whether cancel/reject/bye report Terminated on their own
    pub fn set_auto_terminate(&self, enabled: bool) {
        self.auto_terminate.store(enabled, Ordering::SeqCst);
    }

    /// Whether accept reports Established on its own
    pub fn set_auto_establish(&self, enabled: bool) {
        self.auto_establish.store(enabled, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<SessionOp> {
        self.ops.lock().clone()
    }

    pub fn count(&self, op: SessionOp) -> usize {
        self.ops.lock().iter().filter(|recorded| **recorded == op).count()
    }

    pub fn loopback_transport(&self) -> Option<Arc<LoopbackTransport>> {
        self.transport.lock().clone()
    }

    fn record(&self, op: SessionOp) -> EngineResult<()> {
        self.ops.lock().push(op);
        match self.failures.lock().remove(&op) {
            Some(reason) => Err(EngineError::transport(reason)),
            None => Ok(()),
        }
    }

    fn end(&self, op: SessionOp) -> EngineResult<()> {
        self.record(op)?;
        if self.auto_terminate.load(Ordering::SeqCst) {
            self.terminate();
        }
        Ok(())
    }
}

#[async_trait]
impl SessionHandle for LoopbackSession {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn remote_uri(&self) -> String {
        self.remote_uri.clone()
    }

    fn remote_display_name(&self) -> Option<String> {
        self.display_name.clone()
    }

    fn subscribe(&self) -> SessionEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    async fn invite(&self) -> EngineResult<()> {
        loop {
            let released = self.invite_gate.notified();
            if !self.invite_held.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }
        self.record(SessionOp::Invite)
    }

    async fn accept(&self, constraints: MediaConstraints) -> EngineResult<()> {
        debug!(session = %self.id, ?constraints, "Accepting");
        self.record(SessionOp::Accept)?;
        if self.auto_establish.load(Ordering::SeqCst) {
            self.establish();
        }
        Ok(())
    }

    async fn reject(&self) -> EngineResult<()> {
        self.end(SessionOp::Reject)
    }

    async fn cancel(&self) -> EngineResult<()> {
        self.end(SessionOp::Cancel)
    }

    async fn bye(&self) -> EngineResult<()> {
        self.end(SessionOp::Bye)
    }

    fn transport(&self) -> Option<Arc<dyn NegotiatedTransport>> {
        self.loopback_transport()
            .map(|transport| transport as Arc<dyn NegotiatedTransport>)
    }
}

/// Negotiated media with in-memory tracks
pub struct LoopbackTransport {
    inbound: Vec<MediaTrack>,
    outbound: Vec<MediaTrack>,
    digits: Mutex<Vec<char>>,
}

impl LoopbackTransport {
    /// `video` decides whether a video track is negotiated in each direction
    pub fn new(video: bool) -> Self {
        let mut inbound = vec![MediaTrack::audio("remote-audio")];
        let mut outbound = vec![MediaTrack::audio("local-audio")];
        if video {
            inbound.push(MediaTrack::video("remote-video"));
            outbound.push(MediaTrack::video("local-video"));
        }
        Self {
            inbound,
            outbound,
            digits: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_digits(&self) -> Vec<char> {
        self.digits.lock().clone()
    }
}

#[async_trait]
impl NegotiatedTransport for LoopbackTransport {
    fn inbound_tracks(&self) -> Vec<MediaTrack> {
        self.inbound.clone()
    }

    fn outbound_tracks(&self) -> Vec<MediaTrack> {
        self.outbound.clone()
    }

    async fn send_dtmf(&self, digit: char) -> EngineResult<()> {
        self.digits.lock().push(digit);
        Ok(())
    }
}

/// Capture device handing out fresh in-memory tracks
#[derive(Default)]
pub struct LoopbackCapture {
    denied: Mutex<Option<String>>,
    streams: Mutex<Vec<MediaStream>>,
}

impl LoopbackCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every acquire as if the permission prompt were refused
    pub fn deny(&self, reason: impl Into<String>) {
        *self.denied.lock() = Some(reason.into());
    }

    pub fn allow(&self) {
        *self.denied.lock() = None;
    }

    /// Every stream handed out so far
    pub fn streams(&self) -> Vec<MediaStream> {
        self.streams.lock().clone()
    }
}

#[async_trait]
impl CaptureDevice for LoopbackCapture {
    async fn acquire(&self, constraints: MediaConstraints) -> EngineResult<MediaStream> {
        if let Some(reason) = self.denied.lock().clone() {
            return Err(EngineError::PermissionDenied { reason });
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::audio("microphone"));
        }
        if constraints.video {
            tracks.push(MediaTrack::video("camera"));
        }
        let stream = MediaStream::new(tracks);
        self.streams.lock().push(stream.clone());
        Ok(stream)
    }
}
