//! Local and remote media
//!
//! - [`track`]: shared track/stream handles
//! - [`sink`]: render targets and their read-only handles
//! - [`manager`]: the Media Resource Manager that owns the sinks

pub mod manager;
pub mod sink;
pub mod track;

pub use manager::{CaptureTicket, MediaResourceManager};
pub use sink::{MediaSinks, SinkHandle, SinkKind};
pub use track::{MediaStream, MediaTrack, TrackKind};
