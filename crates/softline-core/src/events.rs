//! Event stream for softphone observers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::registration::RegistrationStatus;
use crate::session::{SessionDirection, SessionKey, SessionState};

/// Caller details published when an invitation arrives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCallInfo {
    pub session: SessionKey,
    pub remote_uri: String,
    pub display_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Events emitted by the softphone
#[derive(Debug, Clone)]
pub enum SoftphoneEvent {
    RegistrationChanged {
        previous: RegistrationStatus,
        current: RegistrationStatus,
    },

    SessionStateChanged {
        session: Option<SessionKey>,
        direction: Option<SessionDirection>,
        previous: SessionState,
        current: SessionState,
        timestamp: DateTime<Utc>,
    },

    /// Inbound invitation accepted into the session slot
    IncomingCall(IncomingCallInfo),

    /// Advisory status text changed
    Status {
        text: String,
        timestamp: DateTime<Utc>,
    },

    DtmfSent {
        digit: char,
        forwarded: bool,
    },

    /// An error was reported back to a command caller
    Error {
        category: &'static str,
        message: String,
    },
}

/// Stream of softphone events
pub type EventStream = BroadcastStream<SoftphoneEvent>;

/// Fan-out for events and the status text
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<SoftphoneEvent>,
    status: Arc<watch::Sender<String>>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (status, _) = watch::channel(String::new());
        Self {
            sender,
            status: Arc::new(status),
        }
    }

    pub fn emit(&self, event: SoftphoneEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Replace the status text and announce it
    pub fn status(&self, text: impl Into<String>) {
        let text = text.into();
        info!(status = %text, "Status");
        self.status.send_replace(text.clone());
        self.emit(SoftphoneEvent::Status {
            text,
            timestamp: Utc::now(),
        });
    }

    pub fn status_text(&self) -> String {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SoftphoneEvent> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}
