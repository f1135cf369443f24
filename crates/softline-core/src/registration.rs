//! Registration Manager
//!
//! Owns the endpoint created from the identity and drives its start/stop and
//! register/unregister lifecycle. Lifecycle calls are serialized; none of them is
//! ever retried automatically. Calls made on an endpoint that is not in the right
//! state log a warning and return `Ok(())` instead of failing.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::EndpointIdentity;
use crate::engine::{EndpointConfig, EndpointHandle, SignalingEngine};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::events::{EventEmitter, SoftphoneEvent};

/// Current registration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationStatus {
    /// Not registered
    Unregistered,
    /// Registration in progress
    Registering,
    /// Successfully registered
    Registered,
    /// Last registration attempt failed
    Failed,
}

impl RegistrationStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, RegistrationStatus::Registered)
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, RegistrationStatus::Registering)
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationStatus::Unregistered => write!(f, "Unregistered"),
            RegistrationStatus::Registering => write!(f, "Registering"),
            RegistrationStatus::Registered => write!(f, "Registered"),
            RegistrationStatus::Failed => write!(f, "Failed"),
        }
    }
}

pub struct RegistrationManager {
    identity: EndpointIdentity,
    endpoint: Arc<dyn EndpointHandle>,
    started: AtomicBool,
    lifecycle: Mutex<()>,
    status: watch::Sender<RegistrationStatus>,
    events: EventEmitter,
}

impl RegistrationManager {
    /// Validate the identity and create the endpoint
    pub fn initialize(
        identity: EndpointIdentity,
        engine: &dyn SignalingEngine,
        events: EventEmitter,
    ) -> SoftphoneResult<Self> {
        let config = EndpointConfig::from_identity(&identity)?;
        info!(identity = %config.identity_uri, server = %config.server_address, "Creating endpoint");
        let endpoint = engine.create_endpoint(config).map_err(|e| {
            error!(error = %e, "Endpoint creation failed");
            SoftphoneError::config("endpoint", e.to_string())
        })?;

        let (status, _) = watch::channel(RegistrationStatus::Unregistered);
        Ok(Self {
            identity,
            endpoint,
            started: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            status,
            events,
        })
    }

    pub fn identity(&self) -> &EndpointIdentity {
        &self.identity
    }

    pub fn endpoint(&self) -> Arc<dyn EndpointHandle> {
        self.endpoint.clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RegistrationStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrationStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, status: RegistrationStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(%previous, current = %status, "Registration status changed");
            self.events.emit(SoftphoneEvent::RegistrationChanged { previous, current: status });
        }
    }

    /// Connect the endpoint transport
    pub async fn start(&self) -> SoftphoneResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_started() {
            debug!("Endpoint already started");
            return Ok(());
        }

        match self.endpoint.start().await {
            Ok(()) => {
                self.started.store(true, Ordering::SeqCst);
                self.events.status("UserAgent started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to start UserAgent");
                self.events.status("Failed to start UserAgent");
                Err(SoftphoneError::connection(e.to_string()))
            }
        }
    }

    pub async fn stop(&self) -> SoftphoneResult<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.is_started() {
            warn!("UserAgent not started, nothing to stop");
            return Ok(());
        }

        match self.endpoint.stop().await {
            Ok(()) => {
                self.started.store(false, Ordering::SeqCst);
                self.set_status(RegistrationStatus::Unregistered);
                self.events.status("UserAgent stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to stop UserAgent");
                Err(SoftphoneError::connection(e.to_string()))
            }
        }
    }

    /// Register with the server
    ///
    /// A no-op when the endpoint was never started or is already registered.
    pub async fn register(&self) -> SoftphoneResult<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.is_started() {
            warn!("UserAgent not started, skipping register");
            return Ok(());
        }
        if self.status() == RegistrationStatus::Registered {
            debug!("Already registered");
            return Ok(());
        }

        self.set_status(RegistrationStatus::Registering);
        match self.endpoint.register().await {
            Ok(()) => {
                self.set_status(RegistrationStatus::Registered);
                self.events.status("UserAgent registered");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to register UserAgent");
                self.set_status(RegistrationStatus::Failed);
                self.events.status("Failed to register UserAgent");
                Err(SoftphoneError::connection(e.to_string()))
            }
        }
    }

    /// Remove the registration; a no-op unless currently registered
    pub async fn unregister(&self) -> SoftphoneResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.status() != RegistrationStatus::Registered {
            warn!(status = %self.status(), "UserAgent not registered, skipping unregister");
            return Ok(());
        }

        match self.endpoint.unregister().await {
            Ok(()) => {
                self.set_status(RegistrationStatus::Unregistered);
                self.events.status("UserAgent unregistered");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to unregister UserAgent");
                Err(SoftphoneError::connection(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for RegistrationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationManager")
            .field("identity", &self.identity)
            .field("started", &self.is_started())
            .field("status", &self.status())
            .finish()
    }
}
