//! Media Resource Manager
//!
//! Owns the three render sinks and the local capture stream. It lives inside the
//! session controller task, so every bind and release is already serialized and no
//! locking is needed here.
//!
//! Two rules hold for every sink:
//!
//! 1. A sink is cleared (or rebound) *before* the tracks it referenced are stopped, so
//!    a renderer never observes a sink pointing at stopped tracks.
//! 2. Remote sinks receive a per-kind view of the remote stream. Detaching the audio
//!    sink stops only audio tracks and never touches what the video sink renders.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::sink::{MediaSink, MediaSinks, SinkKind};
use super::track::{MediaStream, TrackKind};
use crate::engine::{CaptureDevice, EngineResult, MediaConstraints};
use crate::error::{SoftphoneError, SoftphoneResult};
use crate::session::SessionState;

/// Identifies one capture request; a newer request or a release supersedes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTicket {
    generation: u64,
}

impl CaptureTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct MediaResourceManager {
    capture: Arc<dyn CaptureDevice>,
    local_video: MediaSink,
    remote_audio: MediaSink,
    remote_video: MediaSink,
    capture_generation: u64,
}

impl MediaResourceManager {
    pub fn new(capture: Arc<dyn CaptureDevice>) -> Self {
        Self {
            capture,
            local_video: MediaSink::new(SinkKind::LocalVideo),
            remote_audio: MediaSink::new(SinkKind::RemoteAudio),
            remote_video: MediaSink::new(SinkKind::RemoteVideo),
            capture_generation: 0,
        }
    }

    /// Read-only handles for renderers
    pub fn sinks(&self) -> MediaSinks {
        MediaSinks {
            local_video: self.local_video.handle(),
            remote_audio: self.remote_audio.handle(),
            remote_video: self.remote_video.handle(),
        }
    }

    pub fn capture_device(&self) -> Arc<dyn CaptureDevice> {
        self.capture.clone()
    }

    fn remote_sink(&self, kind: SinkKind) -> Option<&MediaSink> {
        match kind {
            SinkKind::RemoteAudio => Some(&self.remote_audio),
            SinkKind::RemoteVideo => Some(&self.remote_video),
            SinkKind::LocalVideo => None,
        }
    }

    /// Bind the `kind` tracks of a remote stream to the matching remote sink
    ///
    /// Only allowed while the owning session is Established and the stream still has
    /// live tracks of that kind. A previously bound stream is replaced first; its tracks
    /// that are not part of the new view are stopped afterwards.
    pub fn attach_remote(
        &mut self,
        state: SessionState,
        stream: &MediaStream,
        kind: SinkKind,
    ) -> SoftphoneResult<()> {
        if state != SessionState::Established {
            return Err(SoftphoneError::InvalidState {
                expected: SessionState::Established.to_string(),
                actual: state.to_string(),
            });
        }
        let (sink, track_kind) = match (self.remote_sink(kind), kind.remote_track_kind()) {
            (Some(sink), Some(track_kind)) => (sink, track_kind),
            _ => {
                return Err(SoftphoneError::InvalidState {
                    expected: "remote sink".to_string(),
                    actual: kind.to_string(),
                });
            }
        };

        let view = stream.filtered(track_kind);
        if !view.is_live() {
            return Err(SoftphoneError::InvalidState {
                expected: format!("live remote {track_kind} tracks"),
                actual: "none".to_string(),
            });
        }
        debug!(sink = %kind, stream = %view.id(), tracks = view.tracks().len(), "Attaching remote media");
        if let Some(previous) = sink.bind(view.clone()) {
            // Rebinding the same tracks must not stop them
            for track in previous.tracks().iter().filter(|t| !view.contains(t)) {
                track.stop();
            }
        }
        Ok(())
    }

    /// Bind remote audio, and remote video when the stream carries any
    pub fn attach_remote_streams(
        &mut self,
        state: SessionState,
        stream: &MediaStream,
    ) -> SoftphoneResult<()> {
        self.attach_remote(state, stream, SinkKind::RemoteAudio)?;
        if stream.tracks_of(TrackKind::Video).next().is_some() {
            self.attach_remote(state, stream, SinkKind::RemoteVideo)?;
        }
        Ok(())
    }

    /// Clear a remote sink but leave its tracks running
    ///
    /// The tracks still belong to the live session and can be bound again with
    /// [`attach_remote`](Self::attach_remote).
    pub fn unbind_remote(&mut self, kind: SinkKind) -> SoftphoneResult<()> {
        let sink = self.remote_sink(kind).ok_or_else(|| SoftphoneError::InvalidState {
            expected: "remote sink".to_string(),
            actual: kind.to_string(),
        })?;
        if let Some(stream) = sink.clear() {
            debug!(sink = %kind, stream = %stream.id(), "Unbound remote media");
        }
        Ok(())
    }

    /// Clear a remote sink and stop the tracks it was rendering
    pub fn detach_remote(&mut self, kind: SinkKind) {
        if let Some(sink) = self.remote_sink(kind) {
            if let Some(stream) = sink.clear() {
                debug!(sink = %sink.kind(), stream = %stream.id(), "Detached remote media");
                stream.stop_all();
            }
        }
    }

    /// Start a capture request, superseding any request still in flight
    pub fn begin_capture(&mut self) -> CaptureTicket {
        self.capture_generation += 1;
        CaptureTicket { generation: self.capture_generation }
    }

    /// Apply the outcome of a capture request
    ///
    /// A superseded ticket's stream is stopped immediately and never bound. A fresh
    /// stream replaces the current local capture, whose tracks are stopped once the
    /// sink no longer references them.
    pub fn complete_capture(
        &mut self,
        ticket: CaptureTicket,
        result: EngineResult<MediaStream>,
    ) -> SoftphoneResult<()> {
        if ticket.generation != self.capture_generation {
            debug!(generation = ticket.generation, current = self.capture_generation, "Discarding superseded capture");
            if let Ok(stream) = result {
                stream.stop_all();
            }
            return Err(SoftphoneError::InvalidState {
                expected: "current capture request".to_string(),
                actual: "superseded capture request".to_string(),
            });
        }

        let stream = result.map_err(|e| {
            warn!(error = %e, "Local capture unavailable");
            SoftphoneError::device_unavailable(e.to_string())
        })?;

        if let Some(previous) = self.local_video.clear() {
            previous.stop_all();
        }
        info!(stream = %stream.id(), tracks = stream.tracks().len(), "Local capture bound");
        self.local_video.bind(stream);
        Ok(())
    }

    /// Acquire camera and microphone and bind the local preview
    pub async fn acquire_local_capture(&mut self) -> SoftphoneResult<()> {
        let ticket = self.begin_capture();
        let result = self.capture.acquire(MediaConstraints::AUDIO_VIDEO).await;
        self.complete_capture(ticket, result)
    }

    /// Clear the local preview and stop the capture tracks
    pub fn release_local_capture(&mut self) {
        self.capture_generation += 1;
        if let Some(stream) = self.local_video.clear() {
            info!(stream = %stream.id(), "Released local capture");
            stream.stop_all();
        }
    }

    /// Best-effort release of every sink
    pub fn release_all(&mut self) {
        self.release_local_capture();
        self.detach_remote(SinkKind::RemoteAudio);
        self.detach_remote(SinkKind::RemoteVideo);
    }

    pub fn is_bound(&self, kind: SinkKind) -> bool {
        match kind {
            SinkKind::LocalVideo => self.local_video.is_bound(),
            SinkKind::RemoteAudio => self.remote_audio.is_bound(),
            SinkKind::RemoteVideo => self.remote_video.is_bound(),
        }
    }
}
