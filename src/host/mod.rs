//! Host capture capability consumed by the session controller.
//!
//! The host owns the system-level picker: a capture request suspends until the
//! user chooses a screen, window or tab, or dismisses the picker. Rejections
//! carry a categorical name which the controller turns into a session state.

use async_trait::async_trait;
use thiserror::Error;

pub mod simulated;
mod track;

pub use track::{CaptureStream, EndedCallback, MediaTrack, TrackCapabilities, TrackError, TrackKind};

/// Options passed with every capture request.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureOptions {
    pub video: bool,
    pub audio: bool,
    /// Frame rate hint; the host may deliver a different rate.
    pub ideal_frame_rate: f64,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            video: true,
            audio: false,
            ideal_frame_rate: 30.0,
        }
    }
}

/// Categorical reason reported by the host when a request is rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectionKind {
    /// The user dismissed the picker.
    Aborted,
    /// The user or the platform refused the permission.
    PermissionRefused,
    /// The host cannot capture at all.
    CapabilityAbsent,
    /// Anything else, keeping the host-supplied name.
    Other(String),
}

impl RejectionKind {
    /// Maps a host rejection name onto a category.
    pub fn from_name(name: &str) -> Self {
        match name {
            "AbortError" | "abort" | "aborted" => RejectionKind::Aborted,
            "NotAllowedError" | "permission-refused" | "denied" => {
                RejectionKind::PermissionRefused
            }
            "NotSupportedError" | "capability-absent" | "unsupported" => {
                RejectionKind::CapabilityAbsent
            }
            other => RejectionKind::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RejectionKind::Aborted => "AbortError",
            RejectionKind::PermissionRefused => "NotAllowedError",
            RejectionKind::CapabilityAbsent => "NotSupportedError",
            RejectionKind::Other(name) => name,
        }
    }
}

/// A rejected capture request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("capture request rejected ({}){}", .kind.name(), message_suffix(.message))]
pub struct CaptureRejection {
    pub kind: RejectionKind,
    pub message: Option<String>,
}

impl CaptureRejection {
    pub fn new(kind: RejectionKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Builds a rejection from the host's name and optional message.
    ///
    /// Empty messages are treated as absent.
    pub fn from_host(name: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: RejectionKind::from_name(name),
            message: (!message.is_empty()).then_some(message),
        }
    }
}

fn message_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

/// The host environment's screen-capture API.
#[async_trait]
pub trait CaptureHost: Send + Sync {
    /// Synchronous capability probe.
    fn is_capture_supported(&self) -> bool;

    /// Prompts the user to pick a capture source.
    ///
    /// Completion is gated on user interaction and has no timeout.
    async fn request_capture(
        &self,
        options: &CaptureOptions,
    ) -> Result<CaptureStream, CaptureRejection>;
}
