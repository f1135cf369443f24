//! Audio Cue Subsystem
//!
//! Ringback and ringtone are looping cues; DTMF feedback is a one-shot overlay that
//! never touches the loop cues. The subsystem itself does not enforce "at most one
//! loop cue": the session controller only ever activates the cue matching the
//! session's direction, and stops both on every exit from Establishing.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Playback failure reported by a cue player (e.g. autoplay blocked)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cue playback failed: {reason}")]
pub struct CuePlaybackError {
    pub reason: String,
}

impl CuePlaybackError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// A single audio clip the platform can play
pub trait CuePlayer: Send + Sync {
    /// Reset the playback position to zero
    fn rewind(&self);

    fn set_looping(&self, looping: bool);

    fn play(&self) -> Result<(), CuePlaybackError>;

    fn pause(&self);
}

/// The looping cues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopCue {
    /// Heard by the caller while the callee's line rings
    Ringback,
    /// Heard by the callee for an incoming call
    Ringtone,
}

impl fmt::Display for LoopCue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopCue::Ringback => write!(f, "ringback"),
            LoopCue::Ringtone => write!(f, "ringtone"),
        }
    }
}

/// Which loop cues are currently playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CueState {
    pub ringback: bool,
    pub ringtone: bool,
}

impl CueState {
    /// The single active loop cue, if any
    pub fn active(&self) -> Option<LoopCue> {
        match (self.ringback, self.ringtone) {
            (true, false) => Some(LoopCue::Ringback),
            (false, true) => Some(LoopCue::Ringtone),
            (false, false) => None,
            // Never produced by the controller; report the caller-side cue
            (true, true) => Some(LoopCue::Ringback),
        }
    }

    pub fn is_active(&self, cue: LoopCue) -> bool {
        match cue {
            LoopCue::Ringback => self.ringback,
            LoopCue::Ringtone => self.ringtone,
        }
    }

    fn set(&mut self, cue: LoopCue, active: bool) {
        match cue {
            LoopCue::Ringback => self.ringback = active,
            LoopCue::Ringtone => self.ringtone = active,
        }
    }
}

/// The three clips the softphone plays
#[derive(Clone)]
pub struct CuePlayers {
    pub ringback: Arc<dyn CuePlayer>,
    pub ringtone: Arc<dyn CuePlayer>,
    pub dtmf: Arc<dyn CuePlayer>,
}

impl CuePlayers {
    pub fn new(
        ringback: Arc<dyn CuePlayer>,
        ringtone: Arc<dyn CuePlayer>,
        dtmf: Arc<dyn CuePlayer>,
    ) -> Self {
        Self { ringback, ringtone, dtmf }
    }

    /// Silent players, for running without an audio output
    pub fn headless() -> Self {
        Self::new(
            Arc::new(HeadlessCuePlayer::new()),
            Arc::new(HeadlessCuePlayer::new()),
            Arc::new(HeadlessCuePlayer::new()),
        )
    }
}

impl fmt::Debug for CuePlayers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CuePlayers").finish_non_exhaustive()
    }
}

pub struct AudioCues {
    players: CuePlayers,
    state: watch::Sender<CueState>,
}

impl AudioCues {
    pub fn new(players: CuePlayers) -> Self {
        let (state, _) = watch::channel(CueState::default());
        Self { players, state }
    }

    fn player(&self, cue: LoopCue) -> &Arc<dyn CuePlayer> {
        match cue {
            LoopCue::Ringback => &self.players.ringback,
            LoopCue::Ringtone => &self.players.ringtone,
        }
    }

    /// Start a loop cue from position zero
    ///
    /// A playback failure is logged; the cue still counts as active so the matching
    /// `stop` keeps the bookkeeping balanced.
    pub fn activate(&self, cue: LoopCue) {
        let player = self.player(cue);
        player.rewind();
        player.set_looping(true);
        if let Err(e) = player.play() {
            warn!(cue = %cue, error = %e, "Failed to start cue");
        }
        debug!(cue = %cue, "Cue activated");
        self.state.send_modify(|s| s.set(cue, true));
    }

    /// Pause a loop cue and rewind it so a later activation starts cleanly
    pub fn stop(&self, cue: LoopCue) {
        let player = self.player(cue);
        player.pause();
        player.rewind();
        self.state.send_if_modified(|s| {
            let was_active = s.is_active(cue);
            s.set(cue, false);
            was_active
        });
    }

    /// Stop both loop cues regardless of which one is believed active
    pub fn stop_loops(&self) {
        self.stop(LoopCue::Ringback);
        self.stop(LoopCue::Ringtone);
    }

    /// Play the one-shot DTMF feedback clip
    pub fn play_dtmf_feedback(&self) {
        let player = &self.players.dtmf;
        player.rewind();
        player.set_looping(false);
        if let Err(e) = player.play() {
            warn!(error = %e, "Failed to play DTMF feedback");
        }
    }

    pub fn state(&self) -> CueState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CueState> {
        self.state.subscribe()
    }
}

/// A cue player with no audio output that records what it was asked to do
#[derive(Debug, Default)]
pub struct HeadlessCuePlayer {
    playing: AtomicBool,
    looping: AtomicBool,
    position_reset: AtomicBool,
    plays: AtomicUsize,
    fail_play: AtomicBool,
}

impl HeadlessCuePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }

    /// True when the position was rewound and nothing has played since
    pub fn is_at_start(&self) -> bool {
        self.position_reset.load(Ordering::SeqCst)
    }

    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    /// Make subsequent `play` calls fail, as a blocked autoplay would
    pub fn set_fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::SeqCst);
    }
}

impl CuePlayer for HeadlessCuePlayer {
    fn rewind(&self) {
        self.position_reset.store(true, Ordering::SeqCst);
    }

    fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::SeqCst);
    }

    fn play(&self) -> Result<(), CuePlaybackError> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(CuePlaybackError::new("playback blocked"));
        }
        self.plays.fetch_add(1, Ordering::SeqCst);
        self.position_reset.store(false, Ordering::SeqCst);
        // One-shot clips end on their own; only loops keep playing
        self.playing.store(self.is_looping(), Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cues() -> (AudioCues, Arc<HeadlessCuePlayer>, Arc<HeadlessCuePlayer>, Arc<HeadlessCuePlayer>) {
        let ringback = Arc::new(HeadlessCuePlayer::new());
        let ringtone = Arc::new(HeadlessCuePlayer::new());
        let dtmf = Arc::new(HeadlessCuePlayer::new());
        let players = CuePlayers::new(ringback.clone(), ringtone.clone(), dtmf.clone());
        (AudioCues::new(players), ringback, ringtone, dtmf)
    }

    #[test]
    fn test_activate_loops_from_start() {
        let (cues, ringback, ringtone, _) = cues();
        cues.activate(LoopCue::Ringback);

        assert!(ringback.is_playing());
        assert!(ringback.is_looping());
        assert_eq!(ringback.play_count(), 1);
        assert!(!ringtone.is_playing());
        assert_eq!(cues.state().active(), Some(LoopCue::Ringback));
    }

    #[test]
    fn test_stop_rewinds() {
        let (cues, _, ringtone, _) = cues();
        cues.activate(LoopCue::Ringtone);
        cues.stop(LoopCue::Ringtone);

        assert!(!ringtone.is_playing());
        assert!(ringtone.is_at_start());
        assert_eq!(cues.state(), CueState::default());
    }

    #[test]
    fn test_stop_loops_is_unconditional() {
        let (cues, ringback, ringtone, _) = cues();
        cues.stop_loops();
        assert!(!ringback.is_playing());
        assert!(!ringtone.is_playing());
        assert_eq!(cues.state().active(), None);
    }

    #[test]
    fn test_dtmf_feedback_does_not_touch_loops() {
        let (cues, ringback, _, dtmf) = cues();
        cues.activate(LoopCue::Ringback);
        cues.play_dtmf_feedback();
        cues.play_dtmf_feedback();

        assert_eq!(dtmf.play_count(), 2);
        assert!(!dtmf.is_looping());
        assert!(ringback.is_playing());
        assert_eq!(cues.state().active(), Some(LoopCue::Ringback));
    }

    #[test]
    fn test_blocked_playback_still_tracks_state() {
        let (cues, ringback, _, _) = cues();
        ringback.set_fail_play(true);
        cues.activate(LoopCue::Ringback);
        assert_eq!(cues.state().active(), Some(LoopCue::Ringback));

        cues.stop(LoopCue::Ringback);
        assert_eq!(cues.state().active(), None);
    }
}
