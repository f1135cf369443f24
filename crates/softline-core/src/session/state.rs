use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::EngineSessionState;

/// Session lifecycle as observed by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// No session
    Idle,
    /// Invitation sent or received, not yet answered
    Establishing,
    /// Answered; media flowing
    Established,
    /// Ended; returns to Idle after the reset delay
    Terminated,
}

impl SessionState {
    /// Whether `self -> next` is on the single legal path
    ///
    /// `Idle -> Establishing -> Established -> Terminated -> Idle`, where Establishing
    /// may also end directly in Terminated.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Establishing)
                | (Establishing, Established)
                | (Establishing, Terminated)
                | (Established, Terminated)
                | (Terminated, Idle)
        )
    }

    /// Establishing or Established
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Establishing | SessionState::Established)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Establishing => write!(f, "Establishing"),
            SessionState::Established => write!(f, "Established"),
            SessionState::Terminated => write!(f, "Terminated"),
        }
    }
}

impl From<EngineSessionState> for SessionState {
    fn from(state: EngineSessionState) -> Self {
        match state {
            EngineSessionState::Establishing => SessionState::Establishing,
            EngineSessionState::Established => SessionState::Established,
            EngineSessionState::Terminated => SessionState::Terminated,
        }
    }
}

/// Who created the session; fixed for its whole life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionDirection {
    Outbound,
    Inbound,
}

impl fmt::Display for SessionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionDirection::Outbound => write!(f, "outbound"),
            SessionDirection::Inbound => write!(f, "inbound"),
        }
    }
}

/// Controller-assigned identity of one session slot occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(Uuid);

impl SessionKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
