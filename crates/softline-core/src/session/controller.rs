//! Session Controller
//!
//! A single tokio task owns the session slot, the media manager, the cues and the
//! DTMF/video channels. Inputs are taken with a biased `select!` in this order:
//!
//! 1. state changes of the active session (its subscription is held directly)
//! 2. inbound invitations
//! 3. completions of spawned engine round-trips and the reset timer
//! 4. UI commands
//!
//! Every handler runs to completion without awaiting, so an engine event that has
//! already occurred is always applied before the next queued command is looked at.
//! Engine round-trips (invite, accept, cancel/reject/bye, capture) run in spawned tasks
//! and post a [`Completion`] back; completions for a session that has since been
//! retired are recognized by their [`SessionKey`] and only logged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{SessionDirection, SessionKey, SessionState};
use crate::config::validate_sip_uri;
use crate::cues::{AudioCues, LoopCue};
use crate::dtmf::{DtmfDispatcher, DtmfDisposition};
use crate::engine::{
    EngineResult, EngineSessionState, IncomingInvite, InviteStream, MediaConstraints,
    NegotiatedTransport, SessionEvents, SessionHandle,
};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::events::{EventEmitter, IncomingCallInfo, SoftphoneEvent};
use crate::media::{CaptureTicket, MediaResourceManager, MediaStream, SinkKind};
use crate::registration::RegistrationManager;
use crate::video::VideoToggle;

pub(crate) type Reply<T> = oneshot::Sender<SoftphoneResult<T>>;

/// UI commands accepted by the controller
pub(crate) enum Command {
    PlaceCall { destination: String, reply: Reply<()> },
    Answer { reply: Reply<()> },
    HangUp { reply: Reply<()> },
    SendDigit { digit: char, reply: Reply<DtmfDisposition> },
    SetOutboundVideo { enabled: bool, reply: Reply<()> },
    StartLocalVideo { reply: Reply<()> },
    StopLocalVideo { reply: Reply<()> },
    StartRemoteMedia { kind: SinkKind, reply: Reply<()> },
    StopRemoteMedia { kind: SinkKind, reply: Reply<()> },
    Shutdown { reply: Reply<()> },
}

/// Results of work the controller spawned
enum Completion {
    Invite {
        key: SessionKey,
        result: EngineResult<()>,
        reply: Reply<()>,
    },
    Accept {
        key: SessionKey,
        result: EngineResult<()>,
        reply: Reply<()>,
    },
    HangUp {
        key: SessionKey,
        op: HangUpOp,
        result: EngineResult<()>,
        reply: Reply<()>,
    },
    Capture {
        ticket: CaptureTicket,
        result: EngineResult<MediaStream>,
        reply: Reply<()>,
    },
    ResetElapsed {
        key: SessionKey,
    },
}

/// Engine operation used to end a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HangUpOp {
    Cancel,
    Reject,
    Bye,
}

impl HangUpOp {
    fn for_session(direction: SessionDirection, state: SessionState) -> Option<Self> {
        match (direction, state) {
            (SessionDirection::Outbound, SessionState::Establishing) => Some(HangUpOp::Cancel),
            (SessionDirection::Inbound, SessionState::Establishing) => Some(HangUpOp::Reject),
            (_, SessionState::Established) => Some(HangUpOp::Bye),
            _ => None,
        }
    }

    async fn run(self, handle: Arc<dyn SessionHandle>) -> EngineResult<()> {
        match self {
            HangUpOp::Cancel => handle.cancel().await,
            HangUpOp::Reject => handle.reject().await,
            HangUpOp::Bye => handle.bye().await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            HangUpOp::Cancel => "cancel",
            HangUpOp::Reject => "reject",
            HangUpOp::Bye => "bye",
        }
    }

    fn completed_status(&self) -> &'static str {
        match self {
            HangUpOp::Bye => "Call ended",
            HangUpOp::Cancel | HangUpOp::Reject => "Call canceled",
        }
    }

    fn failed_status(&self) -> &'static str {
        match self {
            HangUpOp::Bye => "Failed to end call",
            HangUpOp::Cancel | HangUpOp::Reject => "Failed to cancel call",
        }
    }
}

/// Why a session left Establishing/Established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminationCause {
    /// The engine reported Terminated or dropped the subscription
    Engine,
    /// A local hang-up operation was issued
    HangUp(HangUpOp),
    /// The outbound invitation could not be sent
    InviteFailed,
}

/// The Terminated -> Idle timer; aborted if dropped before it fires
struct ScheduledReset {
    task: JoinHandle<()>,
}

impl ScheduledReset {
    fn spawn(key: SessionKey, delay: Duration, completions: mpsc::UnboundedSender<Completion>) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = completions.send(Completion::ResetElapsed { key });
        });
        Self { task }
    }
}

impl Drop for ScheduledReset {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct LiveSession {
    key: SessionKey,
    direction: SessionDirection,
    state: SessionState,
    /// Cleared when the session reaches Terminated
    handle: Option<Arc<dyn SessionHandle>>,
    answered: bool,
    hanging_up: bool,
    reset: Option<ScheduledReset>,
}

/// The single line
enum SessionSlot {
    Empty,
    Occupied(LiveSession),
}

impl SessionSlot {
    fn live(&self) -> Option<&LiveSession> {
        match self {
            SessionSlot::Occupied(live) => Some(live),
            SessionSlot::Empty => None,
        }
    }

    fn live_mut(&mut self) -> Option<&mut LiveSession> {
        match self {
            SessionSlot::Occupied(live) => Some(live),
            SessionSlot::Empty => None,
        }
    }

    fn current(&self, key: SessionKey) -> Option<&LiveSession> {
        self.live().filter(|live| live.key == key)
    }

    fn current_mut(&mut self, key: SessionKey) -> Option<&mut LiveSession> {
        self.live_mut().filter(|live| live.key == key)
    }
}

enum Input {
    Engine(SessionKey, Option<EngineSessionState>),
    Invite(Option<IncomingInvite>),
    Completion(Completion),
    Command(Option<Command>),
}

pub(crate) struct SessionController {
    registration: Arc<RegistrationManager>,
    events: EventEmitter,
    media: MediaResourceManager,
    cues: AudioCues,
    dtmf: DtmfDispatcher,
    video: VideoToggle,
    reset_delay: Duration,

    slot: SessionSlot,
    session_events: Option<(SessionKey, SessionEvents)>,
    transport: Option<Arc<dyn NegotiatedTransport>>,
    state: watch::Sender<SessionState>,
    direction: watch::Sender<Option<SessionDirection>>,

    invites: Option<InviteStream>,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
}

impl SessionController {
    pub(crate) fn new(
        registration: Arc<RegistrationManager>,
        events: EventEmitter,
        media: MediaResourceManager,
        cues: AudioCues,
        video: VideoToggle,
        reset_delay: Duration,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let invites = registration.endpoint().subscribe_invites();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Idle);
        let (direction, _) = watch::channel(None);
        Self {
            registration,
            events,
            media,
            cues,
            dtmf: DtmfDispatcher::new(),
            video,
            reset_delay,
            slot: SessionSlot::Empty,
            session_events: None,
            transport: None,
            state,
            direction,
            invites: Some(invites),
            commands,
            completions_tx,
            completions,
        }
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn watch_direction(&self) -> watch::Receiver<Option<SessionDirection>> {
        self.direction.subscribe()
    }

    pub(crate) async fn run(mut self) {
        info!("Session controller started");
        loop {
            match self.next_input().await {
                Input::Engine(key, Some(state)) => self.on_engine_state(key, state),
                Input::Engine(key, None) => self.on_session_closed(key),
                Input::Invite(Some(invite)) => self.on_invite(invite),
                Input::Invite(None) => {
                    debug!("Invite stream closed");
                    self.invites = None;
                }
                Input::Completion(completion) => self.on_completion(completion),
                Input::Command(Some(Command::Shutdown { reply })) => {
                    self.shutdown();
                    let _ = reply.send(Ok(()));
                    break;
                }
                Input::Command(Some(command)) => self.on_command(command),
                Input::Command(None) => {
                    debug!("All softphone handles dropped");
                    self.shutdown();
                    break;
                }
            }
        }
    }

    async fn next_input(&mut self) -> Input {
        let Self {
            session_events,
            invites,
            completions,
            commands,
            ..
        } = self;

        tokio::select! {
            biased;
            (key, state) = next_session_event(session_events) => Input::Engine(key, state),
            invite = next_invite(invites) => Input::Invite(invite),
            Some(completion) = completions.recv() => Input::Completion(completion),
            command = commands.recv() => Input::Command(command),
        }
    }

    fn current_state(&self) -> SessionState {
        self.slot.live().map_or(SessionState::Idle, |live| live.state)
    }

    fn set_state(&mut self, next: SessionState) {
        let previous = *self.state.borrow();
        if previous == next {
            return;
        }
        if !previous.can_transition_to(next) {
            error!(%previous, %next, "Illegal session transition suppressed");
            return;
        }

        let (session, direction) = match &mut self.slot {
            SessionSlot::Occupied(live) => {
                live.state = next;
                (Some(live.key), Some(live.direction))
            }
            SessionSlot::Empty => (None, None),
        };
        self.state.send_replace(next);
        info!(session = ?session, direction = ?direction, %previous, current = %next, "Session state changed");
        self.events.emit(SoftphoneEvent::SessionStateChanged {
            session,
            direction,
            previous,
            current: next,
            timestamp: Utc::now(),
        });
    }

    fn spawn_completion<F>(&self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let _ = completions.send(work.await);
        });
    }

    fn reply_err<T>(&self, reply: Reply<T>, err: SoftphoneError) {
        warn!(error = %err, category = err.category(), "Command failed");
        self.events.emit(SoftphoneEvent::Error {
            category: err.category(),
            message: err.to_string(),
        });
        let _ = reply.send(Err(err));
    }

    // State entry

    fn enter_establishing(
        &mut self,
        handle: Arc<dyn SessionHandle>,
        events: SessionEvents,
        direction: SessionDirection,
    ) -> SessionKey {
        let key = SessionKey::new();
        self.session_events = Some((key, events));
        self.slot = SessionSlot::Occupied(LiveSession {
            key,
            direction,
            state: SessionState::Idle,
            handle: Some(handle),
            answered: false,
            hanging_up: false,
            reset: None,
        });
        self.direction.send_replace(Some(direction));
        self.set_state(SessionState::Establishing);

        match direction {
            SessionDirection::Outbound => self.cues.activate(LoopCue::Ringback),
            SessionDirection::Inbound => self.cues.activate(LoopCue::Ringtone),
        }
        key
    }

    fn enter_established(&mut self) {
        let Some(live) = self.slot.live() else {
            return;
        };
        let key = live.key;
        let handle = live.handle.clone();

        self.cues.stop_loops();
        self.set_state(SessionState::Established);

        let Some(transport) = handle.and_then(|h| h.transport()) else {
            warn!(session = %key, "Established without a negotiated transport");
            return;
        };
        let remote = remote_stream(key, &transport);
        if let Err(e) = self.media.attach_remote_streams(SessionState::Established, &remote) {
            warn!(session = %key, error = %e, "Failed to attach remote media");
        }
        self.video.force_disable_on_establish(&transport);
        self.dtmf.attach(key, transport.clone());
        self.transport = Some(transport);
    }

    fn enter_terminated(&mut self, cause: TerminationCause) {
        let Some(live) = self.slot.live_mut() else {
            return;
        };
        if !live.state.is_live() {
            return;
        }
        let key = live.key;
        let prior = live.state;
        let handle = live.handle.take();

        self.cues.stop_loops();
        self.dtmf.detach();
        self.video.reset();
        let transport = self.transport.take();
        self.media.release_all();
        // Tracks unbound from their sink mid-call are still running
        if let Some(transport) = transport {
            remote_stream(key, &transport).stop_all();
        }
        self.set_state(SessionState::Terminated);

        let subscription = match self.session_events.take() {
            Some((subscribed, events)) if subscribed == key => Some(events),
            other => {
                self.session_events = other;
                None
            }
        };

        if cause != TerminationCause::Engine {
            if let Some(handle) = handle {
                // Remote answered while the cancel/reject was in flight
                if prior == SessionState::Established && cause != TerminationCause::HangUp(HangUpOp::Bye) {
                    let orphan = handle.clone();
                    tokio::spawn(async move {
                        if let Err(e) = orphan.bye().await {
                            warn!(session = %key, error = %e, "Failed to end orphaned session");
                        }
                    });
                }
                if let Some(events) = subscription {
                    tokio::spawn(drain_retired(key, handle, events));
                }
            }
        }

        let reset = ScheduledReset::spawn(key, self.reset_delay, self.completions_tx.clone());
        if let Some(live) = self.slot.live_mut() {
            live.reset = Some(reset);
        }
        debug!(session = %key, ?cause, delay = ?self.reset_delay, "Session reset scheduled");
    }

    fn enter_idle(&mut self) {
        self.set_state(SessionState::Idle);
        self.slot = SessionSlot::Empty;
        self.session_events = None;
        self.direction.send_replace(None);
    }

    // Engine input

    fn on_engine_state(&mut self, key: SessionKey, reported: EngineSessionState) {
        let Some(current) = self.slot.current(key).map(|live| live.state) else {
            debug!(session = %key, state = ?reported, "Ignoring event for retired session");
            return;
        };

        match (current, reported) {
            (SessionState::Establishing, EngineSessionState::Established) => self.enter_established(),
            (SessionState::Establishing | SessionState::Established, EngineSessionState::Terminated) => {
                self.enter_terminated(TerminationCause::Engine)
            }
            _ => debug!(session = %key, %current, state = ?reported, "Ignoring engine state"),
        }
    }

    fn on_session_closed(&mut self, key: SessionKey) {
        if matches!(self.session_events, Some((subscribed, _)) if subscribed == key) {
            self.session_events = None;
        }
        if self.slot.current(key).is_some_and(|live| live.state.is_live()) {
            warn!(session = %key, "Engine closed the session subscription");
            self.enter_terminated(TerminationCause::Engine);
        }
    }

    fn on_invite(&mut self, invite: IncomingInvite) {
        let IncomingInvite { session: handle, events } = invite;
        if let Some(live) = self.slot.live() {
            warn!(
                busy_with = %live.key,
                state = %live.state,
                remote = %handle.remote_uri(),
                "Rejecting invitation while busy"
            );
            tokio::spawn(async move {
                if let Err(e) = handle.reject().await {
                    warn!(error = %e, "Failed to reject busy invitation");
                }
            });
            return;
        }

        let remote_uri = handle.remote_uri();
        let display_name = handle.remote_display_name();
        let key = self.enter_establishing(handle, events, SessionDirection::Inbound);
        info!(session = %key, remote = %remote_uri, "Incoming call");
        self.events.emit(SoftphoneEvent::IncomingCall(IncomingCallInfo {
            session: key,
            remote_uri,
            display_name,
            received_at: Utc::now(),
        }));
        self.events.status("Incoming call");
    }

    // Commands

    fn on_command(&mut self, command: Command) {
        match command {
            Command::PlaceCall { destination, reply } => self.place_call(destination, reply),
            Command::Answer { reply } => self.answer(reply),
            Command::HangUp { reply } => self.hang_up(reply),
            Command::SendDigit { digit, reply } => self.send_digit(digit, reply),
            Command::SetOutboundVideo { enabled, reply } => {
                let state = self.current_state();
                match self.video.set_outbound_video_enabled(state, self.transport.as_ref(), enabled) {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => self.reply_err(reply, e),
                }
            }
            Command::StartLocalVideo { reply } => self.start_local_video(reply),
            Command::StopLocalVideo { reply } => {
                self.media.release_local_capture();
                let _ = reply.send(Ok(()));
            }
            Command::StartRemoteMedia { kind, reply } => self.start_remote_media(kind, reply),
            Command::StopRemoteMedia { kind, reply } => match self.media.unbind_remote(kind) {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                }
                Err(e) => self.reply_err(reply, e),
            },
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn build_target(&self, destination: &str) -> SoftphoneResult<String> {
        if !self.registration.is_started() {
            return Err(SoftphoneError::invalid_target("UserAgent not started"));
        }
        let domain = self
            .registration
            .identity()
            .primary_domain()
            .ok_or_else(|| SoftphoneError::invalid_target("no SIP domain configured"))?;
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(SoftphoneError::invalid_target("empty destination"));
        }
        let target = format!("sip:{destination}@{domain}");
        validate_sip_uri(&target).map_err(SoftphoneError::invalid_target)?;
        Ok(target)
    }

    fn place_call(&mut self, destination: String, reply: Reply<()>) {
        if let Some(live) = self.slot.live() {
            let err = SoftphoneError::SessionBusy { state: live.state.to_string() };
            return self.reply_err(reply, err);
        }

        let created = self.build_target(&destination).and_then(|target| {
            let endpoint = self.registration.endpoint();
            endpoint
                .create_outbound_session(&target, MediaConstraints::AUDIO_VIDEO)
                .map(|handle| (target, handle))
                .map_err(|e| SoftphoneError::invalid_target(e.to_string()))
        });
        let (target, handle) = match created {
            Ok(created) => created,
            Err(e) => {
                self.events.status("Invalid target URI or UserAgent not initialized");
                return self.reply_err(reply, e);
            }
        };

        let events = handle.subscribe();
        let key = self.enter_establishing(handle.clone(), events, SessionDirection::Outbound);
        info!(session = %key, target = %target, "Placing call");
        self.spawn_completion(async move {
            let result = handle.invite().await;
            Completion::Invite { key, result, reply }
        });
    }

    fn answer(&mut self, reply: Reply<()>) {
        let pending = self.slot.live_mut().filter(|live| {
            live.direction == SessionDirection::Inbound
                && live.state == SessionState::Establishing
                && !live.answered
        });
        let Some((key, handle)) = pending.and_then(|live| {
            let handle = live.handle.clone()?;
            live.answered = true;
            Some((live.key, handle))
        }) else {
            debug!("Invitation not initialized");
            return self.reply_err(reply, SoftphoneError::NoActiveInvitation);
        };

        self.cues.stop(LoopCue::Ringtone);
        info!(session = %key, "Answering call");
        self.spawn_completion(async move {
            let result = handle.accept(MediaConstraints::AUDIO_VIDEO).await;
            Completion::Accept { key, result, reply }
        });
    }

    fn hang_up(&mut self, reply: Reply<()>) {
        let Some(live) = self.slot.live_mut().filter(|live| live.state.is_live()) else {
            self.events.status("No active call to hang up or cancel");
            return self.reply_err(reply, SoftphoneError::NoActiveSession);
        };
        if live.hanging_up {
            debug!(session = %live.key, "Hang-up already in progress");
            let _ = reply.send(Ok(()));
            return;
        }
        let (Some(handle), Some(op)) = (live.handle.clone(), HangUpOp::for_session(live.direction, live.state)) else {
            self.events.status("No active call to hang up or cancel");
            return self.reply_err(reply, SoftphoneError::NoActiveSession);
        };
        live.hanging_up = true;
        let key = live.key;

        info!(session = %key, op = op.name(), "Hanging up");
        self.spawn_completion(async move {
            let result = op.run(handle).await;
            Completion::HangUp { key, op, result, reply }
        });
    }

    fn send_digit(&mut self, digit: char, reply: Reply<DtmfDisposition>) {
        match self.dtmf.send_digit(&self.cues, self.current_state(), digit) {
            Ok(disposition) => {
                self.events.emit(SoftphoneEvent::DtmfSent {
                    digit: digit.to_ascii_uppercase(),
                    forwarded: disposition == DtmfDisposition::Forwarded,
                });
                let _ = reply.send(Ok(disposition));
            }
            Err(e) => self.reply_err(reply, e),
        }
    }

    fn start_local_video(&mut self, reply: Reply<()>) {
        let ticket = self.media.begin_capture();
        let capture = self.media.capture_device();
        debug!(generation = ticket.generation(), "Requesting local capture");
        self.spawn_completion(async move {
            let result = capture.acquire(MediaConstraints::AUDIO_VIDEO).await;
            Completion::Capture { ticket, result, reply }
        });
    }

    fn start_remote_media(&mut self, kind: SinkKind, reply: Reply<()>) {
        let state = self.current_state();
        let remote = match (self.slot.live(), &self.transport) {
            (Some(live), Some(transport)) => remote_stream(live.key, transport),
            _ => MediaStream::with_id("remote-none", Vec::new()),
        };
        match self.media.attach_remote(state, &remote, kind) {
            Ok(()) => {
                info!(sink = %kind, "Remote media bound");
                let _ = reply.send(Ok(()));
            }
            Err(e) => self.reply_err(reply, e),
        }
    }

    // Completions

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Invite { key, result, reply } => self.on_invite_sent(key, result, reply),
            Completion::Accept { key, result, reply } => self.on_accepted(key, result, reply),
            Completion::HangUp { key, op, result, reply } => self.on_hung_up(key, op, result, reply),
            Completion::Capture { ticket, result, reply } => {
                match self.media.complete_capture(ticket, result) {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => self.reply_err(reply, e),
                }
            }
            Completion::ResetElapsed { key } => {
                let elapsed = self
                    .slot
                    .current_mut(key)
                    .filter(|live| live.state == SessionState::Terminated)
                    .and_then(|live| live.reset.take());
                if elapsed.is_some() {
                    self.enter_idle();
                } else {
                    debug!(session = %key, "Ignoring stale reset");
                }
            }
        }
    }

    fn on_invite_sent(&mut self, key: SessionKey, result: EngineResult<()>, reply: Reply<()>) {
        let state = self.slot.current(key).map(|live| live.state);
        match result {
            Ok(()) => {
                if state == Some(SessionState::Establishing) {
                    self.events.status("Calling");
                }
                let _ = reply.send(Ok(()));
            }
            Err(e) if state.is_some_and(|s| s.is_live()) => {
                error!(session = %key, error = %e, "Failed to make call");
                self.events.status("Failed to make call");
                self.enter_terminated(TerminationCause::InviteFailed);
                self.reply_err(reply, SoftphoneError::signaling("invite", e.to_string()));
            }
            Err(e) => {
                debug!(session = %key, error = %e, "Invite failed after the session was retired");
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn on_accepted(&mut self, key: SessionKey, result: EngineResult<()>, reply: Reply<()>) {
        match result {
            Ok(()) => {
                debug!(session = %key, "Invitation accepted");
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                if self.slot.current(key).is_some() {
                    error!(session = %key, error = %e, "Failed to accept call");
                    self.events.status("Failed to accept call");
                }
                self.reply_err(reply, SoftphoneError::signaling("accept", e.to_string()));
            }
        }
    }

    fn on_hung_up(&mut self, key: SessionKey, op: HangUpOp, result: EngineResult<()>, reply: Reply<()>) {
        let outcome = match result {
            Ok(()) => {
                self.events.status(op.completed_status());
                Ok(())
            }
            Err(e) => {
                error!(session = %key, op = op.name(), error = %e, "Hang-up failed");
                self.events.status(op.failed_status());
                Err(SoftphoneError::signaling(op.name(), e.to_string()))
            }
        };

        // Teardown proceeds whatever the engine said
        if let Some(live) = self.slot.current_mut(key) {
            live.hanging_up = false;
            if live.state.is_live() {
                self.enter_terminated(TerminationCause::HangUp(op));
            }
        }

        match outcome {
            Ok(()) => {
                let _ = reply.send(Ok(()));
            }
            Err(e) => self.reply_err(reply, e),
        }
    }

    fn shutdown(&mut self) {
        let ending = self.slot.live().and_then(|live| {
            let op = HangUpOp::for_session(live.direction, live.state)?;
            Some((live.key, live.handle.clone()?, op))
        });
        if let Some((key, handle, op)) = ending {
            info!(session = %key, op = op.name(), "Ending session on shutdown");
            tokio::spawn(async move {
                if let Err(e) = op.run(handle).await {
                    warn!(session = %key, error = %e, "Shutdown hang-up failed");
                }
            });
            self.enter_terminated(TerminationCause::HangUp(op));
        }
        self.cues.stop_loops();
        self.media.release_all();
        // No reset timer runs after the loop exits
        if self.current_state() == SessionState::Terminated {
            self.enter_idle();
        }
        info!("Session controller stopped");
    }
}

/// The inbound tracks of a negotiated transport as one stream
fn remote_stream(key: SessionKey, transport: &Arc<dyn NegotiatedTransport>) -> MediaStream {
    MediaStream::with_id(format!("remote-{key}"), transport.inbound_tracks())
}

async fn next_session_event(
    subscription: &mut Option<(SessionKey, SessionEvents)>,
) -> (SessionKey, Option<EngineSessionState>) {
    match subscription {
        Some((key, events)) => {
            let state = events.recv().await;
            (*key, state)
        }
        None => std::future::pending().await,
    }
}

async fn next_invite(invites: &mut Option<InviteStream>) -> Option<IncomingInvite> {
    match invites {
        Some(invites) => invites.recv().await,
        None => std::future::pending().await,
    }
}

/// Watch a locally retired session and end it if the engine establishes it late
async fn drain_retired(key: SessionKey, handle: Arc<dyn SessionHandle>, mut events: SessionEvents) {
    while let Some(state) = events.recv().await {
        match state {
            EngineSessionState::Established => {
                warn!(session = %key, "Retired session was established, sending bye");
                if let Err(e) = handle.bye().await {
                    warn!(session = %key, error = %e, "Failed to end orphaned session");
                }
            }
            EngineSessionState::Terminated => break,
            EngineSessionState::Establishing => {}
        }
    }
    debug!(session = %key, "Retired session drained");
}
