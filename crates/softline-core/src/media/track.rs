//! Media tracks and streams
//!
//! A [`MediaTrack`] is a cheap, clonable handle to one audio or video track. Clones
//! share the same enabled/stopped flags, so the engine, the media manager and any
//! renderer always observe the same track state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

type StopHook = Box<dyn Fn() + Send + Sync>;

struct TrackInner {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    on_stop: Option<StopHook>,
}

/// Shared handle to a single media track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Create an enabled, live track
    pub fn new(kind: TrackKind, id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                on_stop: None,
            }),
        }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(TrackKind::Audio, id)
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(TrackKind::Video, id)
    }

    /// Create a track whose `hook` runs once when the track is first stopped
    ///
    /// Platform capture implementations use this to release the underlying device.
    pub fn with_stop_hook(
        kind: TrackKind,
        id: impl Into<String>,
        hook: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                on_stop: Some(Box::new(hook)),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    /// Whether media flows on this track (mute flag, not lifecycle)
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Flip the enabled flag; a no-op on stopped tracks
    pub fn set_enabled(&self, enabled: bool) {
        if !self.is_stopped() {
            self.inner.enabled.store(enabled, Ordering::SeqCst);
        }
    }

    /// Stop the track permanently. Idempotent.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::SeqCst) {
            self.inner.enabled.store(false, Ordering::SeqCst);
            if let Some(hook) = &self.inner.on_stop {
                hook();
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Whether two handles refer to the same underlying track
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// An ordered set of tracks rendered together
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn with_id(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self { id: id.into(), tracks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// A new stream sharing only the tracks of `kind`
    pub fn filtered(&self, kind: TrackKind) -> MediaStream {
        MediaStream {
            id: format!("{}-{}", self.id, kind),
            tracks: self.tracks_of(kind).cloned().collect(),
        }
    }

    pub fn contains(&self, track: &MediaTrack) -> bool {
        self.tracks.iter().any(|t| t.same_track(track))
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Stop every track in the stream
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// True when at least one track is still live
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_stopped())
    }

    pub fn all_stopped(&self) -> bool {
        self.tracks.iter().all(MediaTrack::is_stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_clones_share_state() {
        let track = MediaTrack::video("cam");
        let clone = track.clone();
        clone.set_enabled(false);
        assert!(!track.is_enabled());
        assert!(track.same_track(&clone));
    }

    #[test]
    fn test_stop_is_idempotent_and_runs_hook_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = stops.clone();
        let track = MediaTrack::with_stop_hook(TrackKind::Audio, "mic", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        track.stop();
        track.stop();
        assert!(track.is_stopped());
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        // Stopped tracks cannot be re-enabled
        track.set_enabled(true);
        assert!(!track.is_enabled());
    }

    #[test]
    fn test_filtered_stream_shares_tracks() {
        let audio = MediaTrack::audio("a");
        let video = MediaTrack::video("v");
        let stream = MediaStream::new(vec![audio.clone(), video.clone()]);

        let audio_only = stream.filtered(TrackKind::Audio);
        assert_eq!(audio_only.tracks().len(), 1);
        assert!(audio_only.contains(&audio));
        assert!(!audio_only.contains(&video));

        audio_only.stop_all();
        assert!(audio.is_stopped());
        assert!(!video.is_stopped());
        assert!(stream.is_live());
    }
}
