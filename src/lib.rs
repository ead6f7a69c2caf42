//! Lifecycle controller for a single user-granted screen-capture session.
//!
//! The [`session::CaptureController`] asks a [`host::CaptureHost`] for a
//! capture, owns the resulting tracks while the session is active and
//! publishes state, metadata and errors for a presentation layer to render.

pub mod config;
pub mod host;
pub mod session;

pub use config::CaptureConfig;
pub use host::{CaptureHost, CaptureRejection, CaptureStream, MediaTrack, RejectionKind};
pub use session::{
    CaptureController, DisplaySink, DisplaySurface, Reported, SessionSnapshot, SessionState,
    StreamMetadata,
};
