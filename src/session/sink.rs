use crate::host::CaptureStream;

/// Rendering surface that displays the live stream.
///
/// The controller binds the stream on activation and clears it on every
/// release, so a sink never keeps a stream the controller has let go of.
pub trait DisplaySink: Send + Sync {
    fn attach_stream(&self, _stream: &CaptureStream) {}
    fn clear(&self) {}
}
