//! Command and observer surface
//!
//! [`Softphone`] is a cheap, clonable handle. Registration calls go straight to the
//! [`RegistrationManager`]; session commands are sent to the controller task and
//! resolve once the controller (and any engine round-trip it started) is done.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use softline_core::config::{EndpointIdentity, SoftphoneConfig};
//! use softline_core::cues::CuePlayers;
//! use softline_core::loopback::{LoopbackCapture, LoopbackEngine};
//! use softline_core::Softphone;
//!
//! # tokio_test::block_on(async {
//! let config = SoftphoneConfig::new(
//!     EndpointIdentity::new("3005", "wss://pbx.example.com/ws").with_domain("pbx.example.com"),
//! );
//! let engine = LoopbackEngine::new();
//! let phone = Softphone::spawn(
//!     config,
//!     &engine,
//!     Arc::new(LoopbackCapture::new()),
//!     CuePlayers::headless(),
//! )
//! .await?;
//!
//! phone.connect().await?;
//! phone.place_call("3009").await?;
//! phone.hang_up().await?;
//! # Ok::<(), softline_core::SoftphoneError>(())
//! # });
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::info;

use super::controller::{Command, Reply, SessionController};
use super::state::{SessionDirection, SessionState};
use crate::config::SoftphoneConfig;
use crate::cues::{AudioCues, CuePlayers, CueState, LoopCue};
use crate::dtmf::DtmfDisposition;
use crate::engine::{CaptureDevice, SignalingEngine};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::events::{EventEmitter, EventStream, SoftphoneEvent};
use crate::media::{MediaResourceManager, MediaSinks, SinkKind};
use crate::registration::{RegistrationManager, RegistrationStatus};
use crate::video::VideoToggle;

const COMMAND_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct Softphone {
    commands: mpsc::Sender<Command>,
    registration: Arc<RegistrationManager>,
    events: EventEmitter,
    state: watch::Receiver<SessionState>,
    direction: watch::Receiver<Option<SessionDirection>>,
    outbound_video: watch::Receiver<bool>,
    cues: watch::Receiver<CueState>,
    sinks: MediaSinks,
    auto_register: bool,
}

impl Softphone {
    /// Validate the configuration, create the endpoint and start the controller task
    pub async fn spawn(
        config: SoftphoneConfig,
        engine: &dyn SignalingEngine,
        capture: Arc<dyn CaptureDevice>,
        players: CuePlayers,
    ) -> SoftphoneResult<Self> {
        config.validate()?;
        let events = EventEmitter::new(config.event_capacity);
        let registration = Arc::new(RegistrationManager::initialize(
            config.identity.clone(),
            engine,
            events.clone(),
        )?);

        let media = MediaResourceManager::new(capture);
        let cues = AudioCues::new(players);
        let video = VideoToggle::new();
        let sinks = media.sinks();
        let cue_state = cues.subscribe();
        let outbound_video = video.subscribe();

        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let controller = SessionController::new(
            registration.clone(),
            events.clone(),
            media,
            cues,
            video,
            config.reset_delay(),
            command_rx,
        );
        let state = controller.watch_state();
        let direction = controller.watch_direction();
        tokio::spawn(controller.run());

        info!(identity = ?registration.identity().identity_uri(), "Softphone ready");
        Ok(Self {
            commands,
            registration,
            events,
            state,
            direction,
            outbound_video,
            cues: cue_state,
            sinks,
            auto_register: config.auto_register,
        })
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> SoftphoneResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SoftphoneError::Shutdown)?;
        response.await.map_err(|_| SoftphoneError::Shutdown)?
    }

    // Endpoint lifecycle

    pub async fn start(&self) -> SoftphoneResult<()> {
        self.registration.start().await
    }

    pub async fn stop(&self) -> SoftphoneResult<()> {
        self.registration.stop().await
    }

    /// Start the endpoint, then register when `auto_register` is set
    pub async fn connect(&self) -> SoftphoneResult<()> {
        self.registration.start().await?;
        if self.auto_register {
            self.registration.register().await?;
        }
        Ok(())
    }

    pub async fn register(&self) -> SoftphoneResult<()> {
        self.registration.register().await
    }

    pub async fn unregister(&self) -> SoftphoneResult<()> {
        self.registration.unregister().await
    }

    // Session commands

    /// Call `destination` at the first configured domain
    ///
    /// Resolves once the invitation has been sent.
    pub async fn place_call(&self, destination: impl Into<String>) -> SoftphoneResult<()> {
        let destination = destination.into();
        self.request(|reply| Command::PlaceCall { destination, reply }).await
    }

    /// Accept the pending inbound invitation with audio and video
    pub async fn answer(&self) -> SoftphoneResult<()> {
        self.request(|reply| Command::Answer { reply }).await
    }

    /// Cancel, reject or end the current session depending on its direction and state
    pub async fn hang_up(&self) -> SoftphoneResult<()> {
        self.request(|reply| Command::HangUp { reply }).await
    }

    pub async fn send_digit(&self, digit: char) -> SoftphoneResult<DtmfDisposition> {
        self.request(|reply| Command::SendDigit { digit, reply }).await
    }

    pub async fn set_outbound_video_enabled(&self, enabled: bool) -> SoftphoneResult<()> {
        self.request(|reply| Command::SetOutboundVideo { enabled, reply }).await
    }

    /// Acquire camera and microphone and bind the local preview sink
    pub async fn start_local_video(&self) -> SoftphoneResult<()> {
        self.request(|reply| Command::StartLocalVideo { reply }).await
    }

    pub async fn stop_local_video(&self) -> SoftphoneResult<()> {
        self.request(|reply| Command::StopLocalVideo { reply }).await
    }

    /// Bind the established session's remote audio or video to its sink
    pub async fn start_remote_media(&self, kind: SinkKind) -> SoftphoneResult<()> {
        self.request(|reply| Command::StartRemoteMedia { kind, reply }).await
    }

    /// Clear a remote sink; the call keeps its media and the sink can be bound again
    pub async fn stop_remote_media(&self, kind: SinkKind) -> SoftphoneResult<()> {
        self.request(|reply| Command::StopRemoteMedia { kind, reply }).await
    }

    /// End any session, release media and stop the controller task
    pub async fn shutdown(&self) -> SoftphoneResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    // Observers

    pub fn registration_status(&self) -> RegistrationStatus {
        self.registration.status()
    }

    pub fn session_state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn session_direction(&self) -> Option<SessionDirection> {
        *self.direction.borrow()
    }

    pub fn outbound_video_enabled(&self) -> bool {
        *self.outbound_video.borrow()
    }

    pub fn active_cue(&self) -> Option<LoopCue> {
        self.cues.borrow().active()
    }

    pub fn status_text(&self) -> String {
        self.events.status_text()
    }

    pub fn watch_session_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn watch_session_direction(&self) -> watch::Receiver<Option<SessionDirection>> {
        self.direction.clone()
    }

    pub fn watch_registration(&self) -> watch::Receiver<RegistrationStatus> {
        self.registration.subscribe()
    }

    pub fn watch_cues(&self) -> watch::Receiver<CueState> {
        self.cues.clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<String> {
        self.events.watch_status()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SoftphoneEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> EventStream {
        self.events.subscribe_stream()
    }

    /// Read-only render targets
    pub fn sinks(&self) -> MediaSinks {
        self.sinks.clone()
    }
}

impl std::fmt::Debug for Softphone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Softphone")
            .field("registration", &self.registration_status())
            .field("state", &self.session_state())
            .field("direction", &self.session_direction())
            .finish()
    }
}
