//! Capture session lifecycle.
//!
//! A session moves through a small state machine driven by two kinds of
//! input: commands from the presentation layer (`start`, `stop`, `retry`) and
//! events from the host (the capture request settling, a track ending on its
//! own). Both funnel into a single transition function inside
//! [`CaptureController`].
//!
//! ## States
//!
//! ```text
//! Idle | Stopped | Denied | Cancelled | Error  --start/retry-->  Requesting
//! Requesting  --granted-->             Active
//! Requesting  --aborted-->             Cancelled
//! Requesting  --permission refused-->  Denied
//! Requesting  --capability absent-->   Unsupported
//! Requesting  --other failure-->       Error
//! Active      --stop / track ended-->  Stopped
//! ```
//!
//! ## Ownership
//!
//! The controller exclusively owns the [`CaptureStream`](crate::host::CaptureStream)
//! while `Active`. Leaving `Active` always goes through one release routine
//! that detaches every termination callback, stops every track and clears the
//! attached display sink.

use std::fmt;

use serde::{Deserialize, Serialize};

mod controller;
mod metadata;
mod sink;

pub use controller::{CaptureController, SessionSnapshot};
pub use metadata::{DisplaySurface, Reported, StreamMetadata};
pub use sink::DisplaySink;

/// Published state of the capture session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Idle,
    Unsupported,
    Requesting,
    Active,
    Stopped,
    Denied,
    Cancelled,
    Error,
}

impl SessionState {
    /// Human-readable label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Ready",
            SessionState::Unsupported => "Not Supported",
            SessionState::Requesting => "Requesting Permission",
            SessionState::Active => "Sharing Active",
            SessionState::Stopped => "Stopped",
            SessionState::Denied => "Permission Denied",
            SessionState::Cancelled => "Picker Cancelled",
            SessionState::Error => "Error",
        }
    }

    /// States the user can leave by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionState::Stopped
                | SessionState::Denied
                | SessionState::Cancelled
                | SessionState::Error
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionState::Unsupported
                | SessionState::Denied
                | SessionState::Cancelled
                | SessionState::Error
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Unsupported => "UNSUPPORTED",
            SessionState::Requesting => "REQUESTING",
            SessionState::Active => "ACTIVE",
            SessionState::Stopped => "STOPPED",
            SessionState::Denied => "DENIED",
            SessionState::Cancelled => "CANCELLED",
            SessionState::Error => "ERROR",
        };
        f.write_str(name)
    }
}
