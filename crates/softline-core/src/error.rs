//! Error types for the softphone core
//!
//! Errors fall into three groups, which decide how callers should react:
//!
//! - **Fatal setup errors** - [`SoftphoneError::Config`]. Nothing can be attempted
//!   until the identity is fixed.
//! - **Recoverable connection errors** - [`SoftphoneError::Connection`]. Only an explicit
//!   user retry recovers; the softphone never retries on its own.
//! - **Operational errors** - invalid target, no invitation, no session, no video track,
//!   busy line, bad digit, failed signaling round-trip. These are reported as status
//!   text and a returned error but never change the observable session state.
//!
//! # Example
//!
//! ```rust
//! use softline_core::SoftphoneError;
//!
//! let err = SoftphoneError::NoActiveSession;
//! assert!(err.is_operational());
//! assert_eq!(err.category(), "session");
//! ```

use thiserror::Error;

/// Result type alias for softphone operations
pub type SoftphoneResult<T> = Result<T, SoftphoneError>;

/// Errors surfaced by the softphone command surface
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SoftphoneError {
    /// Identity or server configuration is missing or malformed
    #[error("Invalid configuration: {field} - {reason}")]
    Config { field: String, reason: String },

    /// Transport or registration failure
    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    /// The call target could not be built
    #[error("Invalid target: {reason}")]
    InvalidTarget { reason: String },

    #[error("No incoming invitation to answer")]
    NoActiveInvitation,

    #[error("No active call to hang up or cancel")]
    NoActiveSession,

    #[error("No outbound video track negotiated")]
    NoVideoTrack,

    /// Camera/microphone permission denied or device absent
    #[error("Capture device unavailable: {reason}")]
    DeviceUnavailable { reason: String },

    /// Another session (or its teardown grace window) occupies the line
    #[error("Line busy: a session is already {state}")]
    SessionBusy { state: String },

    #[error("Invalid DTMF digit: {digit:?}")]
    InvalidDigit { digit: char },

    /// The engine failed a signaling round-trip
    #[error("Signaling {operation} failed: {reason}")]
    Signaling { operation: String, reason: String },

    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The session controller task is no longer running
    #[error("Softphone has shut down")]
    Shutdown,
}

impl SoftphoneError {
    /// Create a configuration error
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Create an invalid target error
    pub fn invalid_target(reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            reason: reason.into(),
        }
    }

    /// Create a device unavailable error
    pub fn device_unavailable(reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a signaling error for the named engine operation
    pub fn signaling(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Signaling {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Check if a user retry can succeed without changing configuration
    pub fn is_recoverable(&self) -> bool {
        match self {
            SoftphoneError::Connection { .. }
            | SoftphoneError::Signaling { .. }
            | SoftphoneError::DeviceUnavailable { .. }
            | SoftphoneError::SessionBusy { .. } => true,

            SoftphoneError::Config { .. } | SoftphoneError::Shutdown => false,

            _ => false,
        }
    }

    /// Operational errors are recovered locally by ignoring the command
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            SoftphoneError::InvalidTarget { .. }
                | SoftphoneError::NoActiveInvitation
                | SoftphoneError::NoActiveSession
                | SoftphoneError::NoVideoTrack
                | SoftphoneError::SessionBusy { .. }
                | SoftphoneError::InvalidDigit { .. }
                | SoftphoneError::Signaling { .. }
                | SoftphoneError::InvalidState { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            SoftphoneError::Config { .. } => "configuration",

            SoftphoneError::Connection { .. } => "network",

            SoftphoneError::InvalidTarget { .. }
            | SoftphoneError::NoActiveInvitation
            | SoftphoneError::NoActiveSession
            | SoftphoneError::SessionBusy { .. }
            | SoftphoneError::InvalidState { .. } => "session",

            SoftphoneError::NoVideoTrack
            | SoftphoneError::DeviceUnavailable { .. }
            | SoftphoneError::InvalidDigit { .. } => "media",

            SoftphoneError::Signaling { .. } => "signaling",

            SoftphoneError::Shutdown => "system",
        }
    }
}
