//! Boundary to the external signaling/media engine
//!
//! The engine owns protocol framing, SDP/ICE negotiation and transport. The softphone
//! only sees the handles defined here:
//!
//! ```text
//! SignalingEngine ──create_endpoint──► EndpointHandle ──create_outbound_session──► SessionHandle
//!                                          │                                        │
//!                                          └── subscribe_invites (inbound) ─────────┤
//!                                                                                   ▼
//!                                                                  NegotiatedTransport (post-answer)
//! ```
//!
//! Session state changes are delivered through an explicit per-session subscription
//! ([`SessionHandle::subscribe`]) rather than a delegate mutated in place, so a
//! subscription never outlives the session it was taken on.
//!
//! The local capture device is a separate platform collaborator, [`CaptureDevice`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{EndpointIdentity, IceServer};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::media::{MediaStream, MediaTrack, TrackKind};

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures reported by the engine or capture platform
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Request rejected with {status}: {reason}")]
    Rejected { status: u16, reason: String },

    #[error("Operation not allowed in session state {state}")]
    InvalidState { state: String },

    #[error("Invalid URI: {uri}")]
    InvalidUri { uri: String },

    #[error("No video track negotiated")]
    NoVideoTrack,

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Device not found: {reason}")]
    DeviceNotFound { reason: String },
}

impl EngineError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport { reason: reason.into() }
    }
}

/// Media kinds requested when creating or accepting a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    /// Audio and video, the capability every call negotiates
    pub const AUDIO_VIDEO: MediaConstraints = MediaConstraints { audio: true, video: true };
}

/// Session lifecycle states as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineSessionState {
    Establishing,
    Established,
    Terminated,
}

/// Parameters handed to [`SignalingEngine::create_endpoint`]
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub identity_uri: String,
    pub display_name: Option<String>,
    pub auth_username: String,
    pub auth_password: Option<String>,
    pub server_address: String,
    pub ice_servers: Vec<IceServer>,
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("identity_uri", &self.identity_uri)
            .field("display_name", &self.display_name)
            .field("auth_username", &self.auth_username)
            .field("auth_password", &self.auth_password.as_ref().map(|_| "***REDACTED***"))
            .field("server_address", &self.server_address)
            .field("ice_servers", &self.ice_servers)
            .finish()
    }
}

impl EndpointConfig {
    /// Build the engine configuration from a validated identity
    pub fn from_identity(identity: &EndpointIdentity) -> SoftphoneResult<Self> {
        identity.validate()?;
        let identity_uri = identity
            .identity_uri()
            .ok_or_else(|| SoftphoneError::config("identity_uri", "identity URI could not be built"))?;
        Ok(Self {
            identity_uri,
            display_name: identity.display_name.clone(),
            auth_username: identity.username.clone(),
            auth_password: identity.password.clone(),
            server_address: identity.server_address.clone(),
            ice_servers: identity.ice_servers.clone(),
        })
    }
}

/// Per-session state-change subscription
pub type SessionEvents = mpsc::UnboundedReceiver<EngineSessionState>;

/// An inbound invitation and its state subscription
///
/// The subscription is taken when the invitation is created, so state changes
/// reported before the receiver looks at the invitation are still delivered.
pub struct IncomingInvite {
    pub session: Arc<dyn SessionHandle>,
    pub events: SessionEvents,
}

/// Inbound invitations delivered by an endpoint
pub type InviteStream = mpsc::UnboundedReceiver<IncomingInvite>;

/// Factory for endpoints
pub trait SignalingEngine: Send + Sync {
    fn create_endpoint(&self, config: EndpointConfig) -> EngineResult<Arc<dyn EndpointHandle>>;
}

/// The local user agent
#[async_trait]
pub trait EndpointHandle: Send + Sync {
    /// Connect the signaling transport
    async fn start(&self) -> EngineResult<()>;

    async fn stop(&self) -> EngineResult<()>;

    async fn register(&self) -> EngineResult<()>;

    async fn unregister(&self) -> EngineResult<()>;

    /// Create (but do not send) an outbound session towards `target_uri`
    fn create_outbound_session(
        &self,
        target_uri: &str,
        constraints: MediaConstraints,
    ) -> EngineResult<Arc<dyn SessionHandle>>;

    /// Subscribe to inbound invitations, each delivered with its own session subscription
    fn subscribe_invites(&self) -> InviteStream;
}

/// One call, inbound or outbound
#[async_trait]
pub trait SessionHandle: Send + Sync {
    fn id(&self) -> String;

    fn remote_uri(&self) -> String;

    fn remote_display_name(&self) -> Option<String>;

    /// Subscribe to this session's state changes
    fn subscribe(&self) -> SessionEvents;

    /// Send the outbound invitation. Resolves once the request is on its way.
    async fn invite(&self) -> EngineResult<()>;

    async fn accept(&self, constraints: MediaConstraints) -> EngineResult<()>;

    async fn reject(&self) -> EngineResult<()>;

    async fn cancel(&self) -> EngineResult<()>;

    async fn bye(&self) -> EngineResult<()>;

    /// The negotiated transport; `None` until negotiation completes
    fn transport(&self) -> Option<Arc<dyn NegotiatedTransport>>;
}

/// Media transport negotiated for an established session
#[async_trait]
pub trait NegotiatedTransport: Send + Sync {
    /// Tracks received from the remote party
    fn inbound_tracks(&self) -> Vec<MediaTrack>;

    /// Tracks sent to the remote party
    fn outbound_tracks(&self) -> Vec<MediaTrack>;

    /// Send one DTMF digit
    async fn send_dtmf(&self, digit: char) -> EngineResult<()>;

    fn outbound_video_track(&self) -> Option<MediaTrack> {
        self.outbound_tracks()
            .into_iter()
            .find(|t| t.kind() == TrackKind::Video)
    }

    /// Mute or unmute outbound video without renegotiating
    fn set_outbound_video_enabled(&self, enabled: bool) -> EngineResult<()> {
        let track = self.outbound_video_track().ok_or(EngineError::NoVideoTrack)?;
        track.set_enabled(enabled);
        Ok(())
    }

    fn outbound_video_enabled(&self) -> Option<bool> {
        self.outbound_video_track().map(|t| t.is_enabled())
    }
}

/// Platform camera + microphone access
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Request a capture stream; may wait on a permission prompt
    async fn acquire(&self, constraints: MediaConstraints) -> EngineResult<MediaStream>;
}
