//! Display metadata derived from the primary video track.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::host::{MediaTrack, TrackCapabilities};

/// A value the host may or may not report.
///
/// Unreported values are kept as an explicit marker rather than a zero.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Reported<T> {
    Known(T),
    Unknown,
}

impl<T> Reported<T> {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Reported::Unknown)
    }
}

impl<T> From<Option<T>> for Reported<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Reported::Unknown, Reported::Known)
    }
}

impl<T: fmt::Display> fmt::Display for Reported<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reported::Known(value) => value.fmt(f),
            Reported::Unknown => f.write_str("Unknown"),
        }
    }
}

/// What kind of surface the user picked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DisplaySurface {
    Monitor,
    Window,
    BrowserTab,
    #[default]
    Unknown,
}

impl DisplaySurface {
    /// Parses the host's surface name. Unrecognised names map to `Unknown`.
    pub fn from_host_name(name: &str) -> Self {
        match name {
            "monitor" => DisplaySurface::Monitor,
            "window" => DisplaySurface::Window,
            "browser" | "browser-tab" | "tab" => DisplaySurface::BrowserTab,
            _ => DisplaySurface::Unknown,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DisplaySurface::Monitor => "Entire Screen",
            DisplaySurface::Window => "Application Window",
            DisplaySurface::BrowserTab => "Browser Tab",
            DisplaySurface::Unknown => "Unknown",
        }
    }
}

impl From<String> for DisplaySurface {
    fn from(name: String) -> Self {
        DisplaySurface::from_host_name(&name)
    }
}

impl From<DisplaySurface> for String {
    fn from(surface: DisplaySurface) -> Self {
        surface.to_string()
    }
}

impl fmt::Display for DisplaySurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplaySurface::Monitor => "monitor",
            DisplaySurface::Window => "window",
            DisplaySurface::BrowserTab => "browser-tab",
            DisplaySurface::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Snapshot of the active stream, taken once at activation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub width: Reported<u32>,
    pub height: Reported<u32>,
    pub frame_rate: Reported<f64>,
    pub display_surface: DisplaySurface,
    pub label: String,
}

impl StreamMetadata {
    /// Builds metadata from reported capabilities.
    ///
    /// `default_label` replaces a missing or empty label.
    pub fn from_capabilities(capabilities: TrackCapabilities, default_label: &str) -> Self {
        let label = capabilities
            .label
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| default_label.to_string());

        Self {
            width: capabilities.width.into(),
            height: capabilities.height.into(),
            frame_rate: capabilities.frame_rate.into(),
            display_surface: capabilities.display_surface.unwrap_or_default(),
            label,
        }
    }

    /// Reads the track's capabilities once.
    ///
    /// Without a video track every field is unknown.
    pub fn from_track(track: Option<&dyn MediaTrack>, default_label: &str) -> Self {
        let capabilities = track.map(|t| t.capabilities()).unwrap_or_default();
        Self::from_capabilities(capabilities, default_label)
    }

    pub fn resolution_label(&self) -> String {
        match (&self.width, &self.height) {
            (Reported::Known(w), Reported::Known(h)) => format!("{w} x {h}"),
            _ => "Unknown".to_string(),
        }
    }

    pub fn frame_rate_label(&self) -> String {
        match self.frame_rate {
            Reported::Known(rate) => format!("{} fps", rate.round()),
            Reported::Unknown => "Unknown".to_string(),
        }
    }
}
