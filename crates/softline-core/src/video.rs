//! Video Toggle Channel
//!
//! Mutes and unmutes the outbound video track of an already negotiated transport.
//! Nothing here renegotiates: the track exists from establishment on and only its
//! enabled flag changes. Right after establishment the flag is forced off.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::NegotiatedTransport;
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::session::SessionState;

pub struct VideoToggle {
    enabled: watch::Sender<bool>,
}

impl Default for VideoToggle {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoToggle {
    pub fn new() -> Self {
        let (enabled, _) = watch::channel(false);
        Self { enabled }
    }

    /// Set (not toggle) the outbound video flag
    pub fn set_outbound_video_enabled(
        &self,
        state: SessionState,
        transport: Option<&Arc<dyn NegotiatedTransport>>,
        enabled: bool,
    ) -> SoftphoneResult<()> {
        if state != SessionState::Established {
            debug!(state = %state, "No established session for video toggle");
            return Err(SoftphoneError::NoVideoTrack);
        }
        let transport = transport.ok_or(SoftphoneError::NoVideoTrack)?;
        transport.set_outbound_video_enabled(enabled).map_err(|e| {
            debug!(error = %e, "Outbound video toggle failed");
            SoftphoneError::NoVideoTrack
        })?;

        info!(enabled, "Outbound video updated");
        self.publish(enabled);
        Ok(())
    }

    /// Disable outbound video on a freshly established transport
    ///
    /// Returns `false` when the transport carries no video track.
    pub fn force_disable_on_establish(&self, transport: &Arc<dyn NegotiatedTransport>) -> bool {
        let has_video = match transport.set_outbound_video_enabled(false) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Established without outbound video");
                false
            }
        };
        self.publish(false);
        has_video
    }

    /// Forget the flag once the session is gone
    pub fn reset(&self) {
        self.publish(false);
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.enabled.subscribe()
    }

    fn publish(&self, enabled: bool) {
        self.enabled.send_if_modified(|current| {
            let changed = *current != enabled;
            *current = enabled;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTransport;

    fn transport(video: bool) -> Arc<dyn NegotiatedTransport> {
        Arc::new(LoopbackTransport::new(video))
    }

    #[test]
    fn test_set_is_idempotent_not_toggle() {
        let toggle = VideoToggle::new();
        let transport = transport(true);
        assert!(toggle.force_disable_on_establish(&transport));
        assert_eq!(transport.outbound_video_enabled(), Some(false));

        toggle.set_outbound_video_enabled(SessionState::Established, Some(&transport), true).unwrap();
        toggle.set_outbound_video_enabled(SessionState::Established, Some(&transport), true).unwrap();
        assert!(toggle.is_enabled());
        assert_eq!(transport.outbound_video_enabled(), Some(true));

        toggle.set_outbound_video_enabled(SessionState::Established, Some(&transport), false).unwrap();
        assert!(!toggle.is_enabled());
        assert_eq!(transport.outbound_video_enabled(), Some(false));
    }

    #[test]
    fn test_requires_established_session() {
        let toggle = VideoToggle::new();
        let transport = transport(true);
        for state in [SessionState::Idle, SessionState::Establishing, SessionState::Terminated] {
            assert_eq!(
                toggle.set_outbound_video_enabled(state, Some(&transport), true),
                Err(SoftphoneError::NoVideoTrack)
            );
        }
        assert_eq!(
            toggle.set_outbound_video_enabled(SessionState::Established, None, true),
            Err(SoftphoneError::NoVideoTrack)
        );
    }

    #[test]
    fn test_audio_only_transport() {
        let toggle = VideoToggle::new();
        let transport = transport(false);
        assert!(!toggle.force_disable_on_establish(&transport));
        assert_eq!(
            toggle.set_outbound_video_enabled(SessionState::Established, Some(&transport), true),
            Err(SoftphoneError::NoVideoTrack)
        );
        assert!(!toggle.is_enabled());
    }
}
