//! Render targets for local and remote media
//!
//! Each sink's bound stream lives in a `watch` channel. The write side stays inside
//! the media manager; everything else gets a [`SinkHandle`] which can only read.

use std::fmt;

use tokio::sync::watch;

use super::track::{MediaStream, TrackKind};

/// Which render target a sink represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    LocalVideo,
    RemoteAudio,
    RemoteVideo,
}

impl SinkKind {
    /// Track kind rendered by a remote sink; the local preview renders the whole capture
    pub fn remote_track_kind(&self) -> Option<TrackKind> {
        match self {
            SinkKind::LocalVideo => None,
            SinkKind::RemoteAudio => Some(TrackKind::Audio),
            SinkKind::RemoteVideo => Some(TrackKind::Video),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.remote_track_kind().is_some()
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::LocalVideo => write!(f, "local-video"),
            SinkKind::RemoteAudio => write!(f, "remote-audio"),
            SinkKind::RemoteVideo => write!(f, "remote-video"),
        }
    }
}

/// Writable sink, owned by the media manager
pub(crate) struct MediaSink {
    kind: SinkKind,
    source: watch::Sender<Option<MediaStream>>,
}

impl MediaSink {
    pub(crate) fn new(kind: SinkKind) -> Self {
        let (source, _) = watch::channel(None);
        Self { kind, source }
    }

    pub(crate) fn kind(&self) -> SinkKind {
        self.kind
    }

    pub(crate) fn handle(&self) -> SinkHandle {
        SinkHandle {
            kind: self.kind,
            source: self.source.subscribe(),
        }
    }

    /// Bind a stream, returning the previously bound one
    pub(crate) fn bind(&self, stream: MediaStream) -> Option<MediaStream> {
        self.source.send_replace(Some(stream))
    }

    /// Clear the source reference, returning what was bound
    pub(crate) fn clear(&self) -> Option<MediaStream> {
        self.source.send_replace(None)
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.source.borrow().is_some()
    }
}

/// Read-only view of a sink's bound stream
#[derive(Clone)]
pub struct SinkHandle {
    kind: SinkKind,
    source: watch::Receiver<Option<MediaStream>>,
}

impl SinkHandle {
    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    /// The stream currently bound to this sink, if any
    pub fn source(&self) -> Option<MediaStream> {
        self.source.borrow().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.source.borrow().is_some()
    }

    /// Wait for the next bind/clear. Returns `false` once the softphone is gone.
    pub async fn changed(&mut self) -> bool {
        self.source.changed().await.is_ok()
    }
}

impl fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkHandle")
            .field("kind", &self.kind)
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Read-only handles for the three render targets
#[derive(Debug, Clone)]
pub struct MediaSinks {
    pub local_video: SinkHandle,
    pub remote_audio: SinkHandle,
    pub remote_video: SinkHandle,
}
