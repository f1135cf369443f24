//! # softline-core
//!
//! Call-session orchestration for a single-line softphone. One voice/video session
//! at a time is driven on top of a pluggable signaling/media engine, keeping local
//! capture, remote render sinks and the audio cues (ringback, ringtone, DTMF
//! feedback) consistent with the session state.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────── Softphone (commands / observers) ───────────────────────┐
//! │                                                                                  │
//! │  RegistrationManager        SessionController task (biased select!)              │
//! │   start/stop/register        engine events > invites > completions > commands    │
//! │          │                        │          │          │           │            │
//! │          │                 MediaResourceManager  AudioCues  DtmfDispatcher  VideoToggle
//! └──────────┼────────────────────────┼──────────────────────────────────────────────┘
//!            ▼                        ▼
//!     EndpointHandle  ◄──────►  SessionHandle / NegotiatedTransport     CaptureDevice
//!                  (external signaling/media engine)                     (platform)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use softline_core::prelude::*;
//! use softline_core::loopback::{LoopbackCapture, LoopbackEngine};
//!
//! # async fn example() -> SoftphoneResult<()> {
//! let identity = EndpointIdentity::new("3005", "wss://pbx.example.com:7443/ws")
//!     .with_display_name("Front Desk")
//!     .with_domain("pbx.example.com");
//!
//! let engine = LoopbackEngine::new();
//! let phone = Softphone::spawn(
//!     SoftphoneConfig::new(identity),
//!     &engine,
//!     Arc::new(LoopbackCapture::new()),
//!     CuePlayers::headless(),
//! )
//! .await?;
//!
//! phone.connect().await?;
//! phone.place_call("3009").await?;
//! assert_eq!(phone.session_state(), SessionState::Establishing);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cues;
pub mod dtmf;
pub mod engine;
pub mod error;
pub mod events;
pub mod loopback;
pub mod media;
pub mod registration;
pub mod session;
pub mod video;

pub use config::{EndpointIdentity, IceServer, SoftphoneConfig};
pub use cues::{CuePlayer, CuePlayers, CueState, LoopCue};
pub use dtmf::DtmfDisposition;
pub use error::{SoftphoneError, SoftphoneResult};
pub use events::{EventEmitter, IncomingCallInfo, SoftphoneEvent};
pub use media::{MediaSinks, MediaStream, MediaTrack, SinkHandle, SinkKind, TrackKind};
pub use registration::RegistrationStatus;
pub use session::{SessionDirection, SessionKey, SessionState, Softphone};

/// Common imports
pub mod prelude {
    pub use crate::config::{EndpointIdentity, IceServer, SoftphoneConfig};
    pub use crate::cues::CuePlayers;
    pub use crate::dtmf::DtmfDisposition;
    pub use crate::engine::{CaptureDevice, MediaConstraints, SignalingEngine};
    pub use crate::error::{SoftphoneError, SoftphoneResult};
    pub use crate::events::SoftphoneEvent;
    pub use crate::media::SinkKind;
    pub use crate::registration::RegistrationStatus;
    pub use crate::session::{SessionDirection, SessionState, Softphone};
}

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
