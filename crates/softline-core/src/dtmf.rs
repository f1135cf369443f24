//! DTMF Dispatcher
//!
//! Every valid digit plays the local feedback clip. The digit is forwarded to the
//! engine only while the session is Established; otherwise it is dropped silently
//! after the local tone. Forwarded digits go through one queue task per session so
//! they reach the transport in the order they were pressed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cues::AudioCues;
use crate::engine::NegotiatedTransport;
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::session::{SessionKey, SessionState};

/// What happened to a digit after local feedback played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfDisposition {
    /// Queued for the engine
    Forwarded,
    /// Local tone only; no established session to carry it
    LocalOnly,
}

/// Check a digit is one of `0-9 * # A-D`, returning it upper-cased
pub fn validate_digit(digit: char) -> SoftphoneResult<char> {
    let digit = digit.to_ascii_uppercase();
    match digit {
        '0'..='9' | '*' | '#' | 'A'..='D' => Ok(digit),
        _ => Err(SoftphoneError::InvalidDigit { digit }),
    }
}

/// Ordered digit queue bound to one session's transport
struct DtmfForwarder {
    session: SessionKey,
    queue: mpsc::UnboundedSender<char>,
    _task: JoinHandle<()>,
}

impl DtmfForwarder {
    fn spawn(session: SessionKey, transport: Arc<dyn NegotiatedTransport>) -> Self {
        let (queue, mut digits) = mpsc::unbounded_channel::<char>();
        let task = tokio::spawn(async move {
            while let Some(digit) = digits.recv().await {
                match transport.send_dtmf(digit).await {
                    Ok(()) => debug!(session = %session, digit = %digit, "DTMF sent"),
                    Err(e) => warn!(session = %session, digit = %digit, error = %e, "Failed to send DTMF"),
                }
            }
        });
        Self { session, queue, _task: task }
    }
}

#[derive(Default)]
pub struct DtmfDispatcher {
    forwarder: Option<DtmfForwarder>,
}

impl DtmfDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start forwarding to an established session's transport
    pub fn attach(&mut self, session: SessionKey, transport: Arc<dyn NegotiatedTransport>) {
        self.forwarder = Some(DtmfForwarder::spawn(session, transport));
    }

    /// Stop forwarding; digits already queued are still delivered
    pub fn detach(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            debug!(session = %forwarder.session, "DTMF forwarding detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.forwarder.is_some()
    }

    /// Play local feedback and forward the digit when the session is Established
    pub fn send_digit(
        &self,
        cues: &AudioCues,
        state: SessionState,
        digit: char,
    ) -> SoftphoneResult<DtmfDisposition> {
        let digit = validate_digit(digit)?;
        cues.play_dtmf_feedback();

        if state != SessionState::Established {
            debug!(digit = %digit, state = %state, "DTMF played locally only");
            return Ok(DtmfDisposition::LocalOnly);
        }
        match &self.forwarder {
            Some(forwarder) if forwarder.queue.send(digit).is_ok() => Ok(DtmfDisposition::Forwarded),
            _ => {
                warn!(digit = %digit, "Established session has no DTMF channel");
                Ok(DtmfDisposition::LocalOnly)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cues::{CuePlayers, HeadlessCuePlayer};
    use crate::loopback::LoopbackTransport;
    use std::time::Duration;

    fn cues_with_dtmf() -> (AudioCues, Arc<HeadlessCuePlayer>) {
        let dtmf = Arc::new(HeadlessCuePlayer::new());
        let players = CuePlayers::new(
            Arc::new(HeadlessCuePlayer::new()),
            Arc::new(HeadlessCuePlayer::new()),
            dtmf.clone(),
        );
        (AudioCues::new(players), dtmf)
    }

    #[test]
    fn test_digit_validation() {
        for digit in ['0', '9', '*', '#', 'A', 'd'] {
            assert!(validate_digit(digit).is_ok(), "{digit} should be valid");
        }
        assert_eq!(validate_digit('b').unwrap(), 'B');
        for digit in ['E', 'x', ' ', '+'] {
            assert!(matches!(validate_digit(digit), Err(SoftphoneError::InvalidDigit { .. })));
        }
    }

    #[tokio::test]
    async fn test_idle_digit_plays_locally_only() {
        let (cues, dtmf) = cues_with_dtmf();
        let dispatcher = DtmfDispatcher::new();

        let disposition = dispatcher.send_digit(&cues, SessionState::Idle, '5').unwrap();
        assert_eq!(disposition, DtmfDisposition::LocalOnly);
        assert_eq!(dtmf.play_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_digit_plays_nothing() {
        let (cues, dtmf) = cues_with_dtmf();
        let dispatcher = DtmfDispatcher::new();
        assert!(dispatcher.send_digit(&cues, SessionState::Established, 'z').is_err());
        assert_eq!(dtmf.play_count(), 0);
    }

    #[tokio::test]
    async fn test_established_digits_forward_in_order() {
        let (cues, _) = cues_with_dtmf();
        let transport = Arc::new(LoopbackTransport::new(true));
        let mut dispatcher = DtmfDispatcher::new();
        dispatcher.attach(SessionKey::new(), transport.clone());

        for digit in "1234#".chars() {
            let disposition = dispatcher.send_digit(&cues, SessionState::Established, digit).unwrap();
            assert_eq!(disposition, DtmfDisposition::Forwarded);
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while transport.sent_digits().len() < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(transport.sent_digits(), vec!['1', '2', '3', '4', '#']);
    }

    #[tokio::test]
    async fn test_detached_dispatcher_does_not_forward() {
        let (cues, dtmf) = cues_with_dtmf();
        let mut dispatcher = DtmfDispatcher::new();
        dispatcher.attach(SessionKey::new(), Arc::new(LoopbackTransport::new(false)));
        dispatcher.detach();

        let disposition = dispatcher.send_digit(&cues, SessionState::Established, '7').unwrap();
        assert_eq!(disposition, DtmfDisposition::LocalOnly);
        assert_eq!(dtmf.play_count(), 1);
    }
}
