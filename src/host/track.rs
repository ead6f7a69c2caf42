//! Media tracks and the capture stream that groups them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::DisplaySurface;

/// Callback invoked by a track when it ends outside the controller's control.
pub type EndedCallback = Arc<dyn Fn() + Send + Sync>;

/// Media kind carried by a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Capabilities reported by a live track.
///
/// Every field is optional: hosts are free to omit any of them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackCapabilities {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub display_surface: Option<DisplaySurface>,
    pub label: Option<String>,
}

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("failed to stop track {id}: {reason}")]
    StopFailed { id: String, reason: String },
}

/// A single live media track inside a [`CaptureStream`].
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Capabilities as reported right now.
    fn capabilities(&self) -> TrackCapabilities;

    /// Asks the host to stop delivering media for this track.
    fn stop(&self) -> Result<(), TrackError>;

    /// Whether the host already considers this track ended.
    fn is_ended(&self) -> bool;

    /// Binds (`Some`) or detaches (`None`) the termination callback.
    ///
    /// A bound callback fires at most once, asynchronously, whenever the host
    /// ends the track.
    fn set_ended_callback(&self, callback: Option<EndedCallback>);
}

/// The live resource returned by a successful capture request.
#[derive(Clone)]
pub struct CaptureStream {
    tracks: Arc<[Arc<dyn MediaTrack>]>,
}

impl CaptureStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self {
            tracks: tracks.into(),
        }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks
            .iter()
            .filter(|track| track.kind() == TrackKind::Video)
    }

    /// The first video track, whose capabilities describe the stream.
    pub fn primary_video_track(&self) -> Option<&Arc<dyn MediaTrack>> {
        self.video_tracks().next()
    }

    /// Returns true when both values refer to the same underlying stream.
    pub fn ptr_eq(&self, other: &CaptureStream) -> bool {
        Arc::ptr_eq(&self.tracks, &other.tracks)
    }
}

impl fmt::Debug for CaptureStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureStream")
            .field(
                "tracks",
                &self.tracks.iter().map(|t| t.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::simulated::{stream_of, SimulatedTrack};

    #[test]
    fn primary_video_track_skips_audio() {
        let audio = SimulatedTrack::audio("mic");
        let video = SimulatedTrack::video("screen", TrackCapabilities::default());
        let stream = stream_of(&[audio, video]);

        let primary = stream.primary_video_track().expect("video track present");
        assert_eq!(primary.id(), "screen");
        assert_eq!(stream.video_tracks().count(), 1);
    }

    #[test]
    fn clones_share_identity() {
        let track = SimulatedTrack::video("screen", TrackCapabilities::default());
        let stream = stream_of(&[track.clone()]);
        let other = stream_of(&[track]);

        assert!(stream.ptr_eq(&stream.clone()));
        assert!(!stream.ptr_eq(&other));
    }
}
