//! The capture session controller.
//!
//! ## Threading Model
//!
//! Commands may be called from any thread, but the controller is designed for
//! a single UI thread. Only `start`/`retry` suspend, while the host picker is
//! open. Track termination callbacks arrive from the host whenever it likes
//! and are routed through the same transition function as the commands.
//!
//! Host objects (tracks, display sinks) are never called while the state lock
//! is held, so they are free to call back into the controller.
//!
//! The display sink is never told "attach" or "clear" directly. Every change
//! schedules a sync that compares what the sink currently shows with the
//! active stream and issues only the calls needed to match. One sync runs at a
//! time; a sync requested meanwhile makes the running one go around again, so
//! the sink always ends up showing the latest state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::host::{CaptureHost, CaptureRejection, CaptureStream, RejectionKind};
use crate::session::{DisplaySink, SessionState, StreamMetadata};

/// Everything the presentation layer renders, published after each transition.
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Set only while `state` is `Error`.
    pub last_error: Option<String>,
    /// Set only while `state` is `Active`.
    pub metadata: Option<StreamMetadata>,
    /// Set only while `state` is `Active`.
    pub stream: Option<CaptureStream>,
}

impl PartialEq for SessionSnapshot {
    fn eq(&self, other: &Self) -> bool {
        let same_stream = match (&self.stream, &other.stream) {
            (Some(a), Some(b)) => a.ptr_eq(b),
            (None, None) => true,
            _ => false,
        };
        same_stream
            && self.state == other.state
            && self.last_error == other.last_error
            && self.metadata == other.metadata
    }
}

/// Identifies one activation; termination callbacks carry it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// The handle owned while `Active`. Metadata lives and dies with it.
struct ActiveCapture {
    id: SessionId,
    stream: CaptureStream,
    metadata: StreamMetadata,
}

/// Inputs to the state machine.
enum SessionEvent {
    StartRequested,
    RequestResolved { epoch: u64, stream: CaptureStream },
    RequestRejected { epoch: u64, rejection: CaptureRejection },
    /// The future driving the request was dropped before it settled.
    RequestAbandoned { epoch: u64 },
    TrackEnded { session: SessionId, track: String },
    StopRequested,
    Disposed,
    SinkAttached(Arc<dyn DisplaySink>),
    SinkDetached,
}

/// Work left for after the state lock is released.
enum Effect {
    IssueRequest { epoch: u64 },
    BindTracks { session: SessionId, stream: CaptureStream },
    Release(CaptureStream),
    SyncSink,
}

/// What the display sink has been told so far.
#[derive(Default)]
struct SinkBinding {
    sink: Option<Arc<dyn DisplaySink>>,
    stream: Option<CaptureStream>,
    syncing: bool,
    dirty: bool,
}

/// Sink calls that bring the binding in line with the session.
#[derive(Default)]
struct SinkUpdate {
    clear: Option<Arc<dyn DisplaySink>>,
    attach: Option<(Arc<dyn DisplaySink>, CaptureStream)>,
}

impl SinkUpdate {
    fn apply(self) {
        if let Some(sink) = self.clear {
            sink.clear();
        }
        if let Some((sink, stream)) = self.attach {
            sink.attach_stream(&stream);
        }
    }
}

struct Inner {
    state: SessionState,
    last_error: Option<String>,
    active: Option<ActiveCapture>,
    /// Set from request issue until the request settles, independent of `state`.
    in_flight: bool,
    /// Bumped per request and by stop/dispose; results for an older epoch are stale.
    epoch: u64,
    next_session: u64,
    capability_present: bool,
    sink: Option<Arc<dyn DisplaySink>>,
    binding: SinkBinding,
    disposed: bool,
}

impl Inner {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            last_error: self.last_error.clone(),
            metadata: self.active.as_ref().map(|a| a.metadata.clone()),
            stream: self.active.as_ref().map(|a| a.stream.clone()),
        }
    }

    fn enter(&mut self, state: SessionState) {
        self.state = state;
        if state != SessionState::Error {
            self.last_error = None;
        }
    }

    /// Takes the active handle, if any, and schedules its release.
    fn release(&mut self) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(2);
        if let Some(active) = self.active.take() {
            effects.push(Effect::Release(active.stream));
        }
        effects.push(Effect::SyncSink);
        effects
    }

    /// State a stopped session falls back to.
    fn idle_state(&self) -> SessionState {
        if self.capability_present {
            SessionState::Stopped
        } else {
            SessionState::Unsupported
        }
    }

    /// Computes the sink calls for the current state and records them as done.
    fn sink_update(&mut self) -> SinkUpdate {
        let wanted = self.active.as_ref().map(|active| active.stream.clone());
        let binding = &mut self.binding;
        let mut update = SinkUpdate::default();

        let same_sink = match (&binding.sink, &self.sink) {
            (Some(bound), Some(current)) => Arc::ptr_eq(bound, current),
            (None, None) => true,
            _ => false,
        };
        if !same_sink {
            if let Some(previous) = binding.sink.take() {
                if binding.stream.take().is_some() {
                    update.clear = Some(previous);
                }
            }
            binding.sink = self.sink.clone();
        }

        let Some(sink) = &binding.sink else {
            binding.stream = None;
            return update;
        };
        match (&binding.stream, &wanted) {
            (Some(bound), Some(stream)) if bound.ptr_eq(stream) => {}
            (_, Some(stream)) => update.attach = Some((sink.clone(), stream.clone())),
            (Some(_), None) => update.clear = Some(sink.clone()),
            (None, None) => {}
        }
        binding.stream = wanted;
        update
    }

    fn transition(&mut self, event: SessionEvent, config: &CaptureConfig) -> Vec<Effect> {
        match event {
            SessionEvent::StartRequested => {
                if self.disposed {
                    debug!("start ignored: controller disposed");
                    return Vec::new();
                }
                if !self.capability_present {
                    debug!("start ignored: capture is not supported");
                    return Vec::new();
                }
                if self.in_flight {
                    debug!("start ignored: capture request already in flight");
                    return Vec::new();
                }
                if self.state == SessionState::Active {
                    debug!("start ignored: session already active");
                    return Vec::new();
                }

                let mut effects = self.release();
                self.in_flight = true;
                self.epoch += 1;
                self.enter(SessionState::Requesting);
                effects.push(Effect::IssueRequest { epoch: self.epoch });
                effects
            }

            SessionEvent::RequestResolved { epoch, stream } => {
                self.in_flight = false;
                if epoch != self.epoch || self.disposed {
                    warn!(epoch, "capture resolved after stop; releasing it");
                    return vec![Effect::Release(stream)];
                }

                let id = SessionId(self.next_session);
                self.next_session += 1;
                let metadata = StreamMetadata::from_track(
                    stream.primary_video_track().map(|track| track.as_ref()),
                    &config.default_label,
                );
                info!(
                    session = %id,
                    tracks = stream.tracks().len(),
                    resolution = %metadata.resolution_label(),
                    frame_rate = %metadata.frame_rate,
                    surface = %metadata.display_surface,
                    label = %metadata.label,
                    "Capture session active"
                );

                self.active = Some(ActiveCapture {
                    id,
                    stream: stream.clone(),
                    metadata,
                });
                self.enter(SessionState::Active);

                // Bind last: a track that already ended releases everything,
                // including the sink binding made here.
                vec![Effect::SyncSink, Effect::BindTracks { session: id, stream }]
            }

            SessionEvent::RequestRejected { epoch, rejection } => {
                self.in_flight = false;
                if epoch != self.epoch || self.disposed {
                    debug!(epoch, %rejection, "ignoring rejection of a stale request");
                    return Vec::new();
                }

                warn!(%rejection, "Capture request rejected");
                let state = match rejection.kind {
                    RejectionKind::Aborted => SessionState::Cancelled,
                    RejectionKind::PermissionRefused => SessionState::Denied,
                    RejectionKind::CapabilityAbsent => SessionState::Unsupported,
                    RejectionKind::Other(_) => SessionState::Error,
                };
                self.enter(state);
                if state == SessionState::Error {
                    self.last_error = Some(
                        rejection
                            .message
                            .filter(|message| !message.is_empty())
                            .unwrap_or_else(|| config.fallback_error_message.clone()),
                    );
                }
                self.release()
            }

            SessionEvent::RequestAbandoned { epoch } => {
                self.in_flight = false;
                if epoch == self.epoch && self.state == SessionState::Requesting {
                    debug!(epoch, "capture request dropped before it settled");
                    self.enter(SessionState::Cancelled);
                }
                Vec::new()
            }

            SessionEvent::TrackEnded { session, track } => {
                if self.in_flight {
                    debug!(%session, %track, "track ended while a request is in flight; ignored");
                    return Vec::new();
                }
                match &self.active {
                    Some(active) if active.id == session => {
                        info!(%session, %track, "Track ended; stopping session");
                        self.enter(SessionState::Stopped);
                        self.release()
                    }
                    _ => {
                        debug!(%session, %track, "ignoring end of a track from a released session");
                        Vec::new()
                    }
                }
            }

            SessionEvent::StopRequested => {
                if self.in_flight {
                    // The pending result will be released when it arrives.
                    self.epoch += 1;
                }
                // Without the capability there is nothing to retry.
                self.enter(self.idle_state());
                self.release()
            }

            SessionEvent::Disposed => {
                if self.disposed {
                    return Vec::new();
                }
                if self.in_flight {
                    self.epoch += 1;
                }
                self.disposed = true;
                self.enter(self.idle_state());
                self.sink = None;
                self.release()
            }

            SessionEvent::SinkAttached(sink) => {
                if self.disposed {
                    debug!("display sink ignored: controller disposed");
                    return Vec::new();
                }
                self.sink = Some(sink);
                vec![Effect::SyncSink]
            }

            SessionEvent::SinkDetached => {
                self.sink = None;
                vec![Effect::SyncSink]
            }
        }
    }
}

struct Shared {
    host: Arc<dyn CaptureHost>,
    config: CaptureConfig,
    inner: Mutex<Inner>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies one event and runs its effects.
    ///
    /// Returns the epoch of a capture request the caller must now issue.
    fn dispatch(self: &Arc<Self>, event: SessionEvent) -> Option<u64> {
        let effects = {
            let mut inner = self.lock();
            let previous = inner.state;
            let effects = inner.transition(event, &self.config);
            if inner.state != previous {
                info!(from = %previous, to = %inner.state, "Capture session transition");
            }

            let snapshot = inner.snapshot();
            self.snapshot.send_if_modified(|current| {
                if *current == snapshot {
                    false
                } else {
                    *current = snapshot;
                    true
                }
            });
            effects
        };

        let mut request = None;
        for effect in effects {
            match effect {
                Effect::IssueRequest { epoch } => request = Some(epoch),
                Effect::BindTracks { session, stream } => self.bind_tracks(session, &stream),
                Effect::Release(stream) => release(&stream),
                Effect::SyncSink => self.sync_sink(),
            }
        }
        request
    }

    /// Brings the display sink in line with the session.
    ///
    /// A sync requested while another is applying its calls marks the binding
    /// dirty and returns; the running sync then computes a fresh update.
    fn sync_sink(&self) {
        let mut update = {
            let mut inner = self.lock();
            if inner.binding.syncing {
                inner.binding.dirty = true;
                return;
            }
            inner.binding.syncing = true;
            inner.sink_update()
        };

        loop {
            update.apply();

            let mut inner = self.lock();
            if !std::mem::take(&mut inner.binding.dirty) {
                inner.binding.syncing = false;
                return;
            }
            update = inner.sink_update();
        }
    }

    /// Subscribes to termination of every track of a newly active session.
    fn bind_tracks(self: &Arc<Self>, session: SessionId, stream: &CaptureStream) {
        for track in stream.tracks() {
            let shared: Weak<Shared> = Arc::downgrade(self);
            let track_id = track.id().to_string();
            track.set_ended_callback(Some(Arc::new(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.dispatch(SessionEvent::TrackEnded {
                        session,
                        track: track_id.clone(),
                    });
                }
            })));
        }

        // A release may have raced with the binding above.
        let still_current = self
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| active.id == session);
        if !still_current {
            for track in stream.tracks() {
                track.set_ended_callback(None);
            }
            return;
        }

        if let Some(track) = stream.tracks().iter().find(|track| track.is_ended()) {
            self.dispatch(SessionEvent::TrackEnded {
                session,
                track: track.id().to_string(),
            });
        }
    }
}

/// Detaches and stops every track. Per-track failures are logged and skipped.
///
/// The sink is cleared by the sync scheduled right after.
fn release(stream: &CaptureStream) {
    for track in stream.tracks() {
        track.set_ended_callback(None);
        if let Err(err) = track.stop() {
            warn!(track = track.id(), %err, "Failed to stop track");
        }
    }
    debug!(tracks = stream.tracks().len(), "Released capture stream");
}

/// Clears the in-flight guard if the request future is dropped early.
struct RequestGuard<'a> {
    shared: &'a Arc<Shared>,
    epoch: u64,
    settled: bool,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.shared
                .dispatch(SessionEvent::RequestAbandoned { epoch: self.epoch });
        }
    }
}

/// Owns a single screen-capture session and publishes its state.
///
/// Dropping the controller releases any held capture.
pub struct CaptureController {
    shared: Arc<Shared>,
}

impl CaptureController {
    /// Creates a controller, probing the host's capability once.
    pub fn new(host: Arc<dyn CaptureHost>, config: CaptureConfig) -> Self {
        let capability_present = host.is_capture_supported();
        let state = if capability_present {
            SessionState::Idle
        } else {
            warn!("Host does not support screen capture");
            SessionState::Unsupported
        };

        let inner = Inner {
            state,
            last_error: None,
            active: None,
            in_flight: false,
            epoch: 0,
            next_session: 1,
            capability_present,
            sink: None,
            binding: SinkBinding::default(),
            disposed: false,
        };
        let (snapshot, _) = watch::channel(inner.snapshot());

        Self {
            shared: Arc::new(Shared {
                host,
                config,
                inner: Mutex::new(inner),
                snapshot,
            }),
        }
    }

    /// Requests a capture unless one is already active or in flight.
    ///
    /// Never fails: the outcome is published as the session state.
    pub async fn start(&self) {
        let Some(epoch) = self.shared.dispatch(SessionEvent::StartRequested) else {
            return;
        };
        let mut guard = RequestGuard {
            shared: &self.shared,
            epoch,
            settled: false,
        };

        let options = self.shared.config.capture_options();
        info!(epoch, frame_rate = options.ideal_frame_rate, "Requesting screen capture");
        let outcome = self.shared.host.request_capture(&options).await;
        guard.settled = true;

        let event = match outcome {
            Ok(stream) => SessionEvent::RequestResolved { epoch, stream },
            Err(rejection) => SessionEvent::RequestRejected { epoch, rejection },
        };
        self.shared.dispatch(event);
    }

    /// Same as [`start`](Self::start), used after a failure.
    pub async fn retry(&self) {
        self.start().await;
    }

    /// Releases any held capture and publishes `Stopped`, from any state.
    ///
    /// A controller whose host lacks the capability stays `Unsupported`.
    pub fn stop(&self) {
        self.shared.dispatch(SessionEvent::StopRequested);
    }

    /// Sets the surface that renders the live stream.
    ///
    /// If a stream is already active the sink receives it immediately. A
    /// previously attached sink is cleared.
    pub fn attach_display_sink(&self, sink: Arc<dyn DisplaySink>) {
        self.shared.dispatch(SessionEvent::SinkAttached(sink));
    }

    /// Clears and forgets the attached sink.
    pub fn detach_display_sink(&self) {
        self.shared.dispatch(SessionEvent::SinkDetached);
    }

    /// Releases everything and turns later commands into no-ops.
    pub fn dispose(&self) {
        self.shared.dispatch(SessionEvent::Disposed);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.snapshot.borrow().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.snapshot.borrow().last_error.clone()
    }

    pub fn metadata(&self) -> Option<StreamMetadata> {
        self.shared.snapshot.borrow().metadata.clone()
    }

    pub fn stream(&self) -> Option<CaptureStream> {
        self.shared.snapshot.borrow().stream.clone()
    }

    pub fn is_request_in_flight(&self) -> bool {
        self.shared.lock().in_flight
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::simulated::{stream_of, SimulatedHost, SimulatedTrack};
    use crate::host::TrackCapabilities;

    fn controller(host: &Arc<SimulatedHost>) -> CaptureController {
        CaptureController::new(host.clone(), CaptureConfig::default())
    }

    async fn wait_for_pending(host: &SimulatedHost) {
        while host.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn track_end_is_suppressed_while_request_in_flight() {
        let host = Arc::new(SimulatedHost::new());
        let controller = controller(&host);
        let track = SimulatedTrack::video("screen", TrackCapabilities::default());

        tokio::join!(controller.start(), async {
            wait_for_pending(&host).await;
            assert_eq!(controller.state(), SessionState::Requesting);

            // The session id the pending request will be given.
            controller.shared.dispatch(SessionEvent::TrackEnded {
                session: SessionId(1),
                track: "screen".to_string(),
            });
            assert_eq!(controller.state(), SessionState::Requesting);

            assert!(host.resolve_next(stream_of(&[track.clone()])));
        });

        assert_eq!(controller.state(), SessionState::Active);
        assert!(track.fire_ended());
        assert_eq!(controller.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn stale_session_termination_is_ignored() {
        let host = Arc::new(SimulatedHost::new());
        let controller = controller(&host);
        host.push_stream(stream_of(&[SimulatedTrack::video(
            "screen",
            TrackCapabilities::default(),
        )]));

        controller.start().await;
        assert_eq!(controller.state(), SessionState::Active);

        controller.shared.dispatch(SessionEvent::TrackEnded {
            session: SessionId(42),
            track: "other".to_string(),
        });
        assert_eq!(controller.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn dropped_start_future_clears_the_guard() {
        let host = Arc::new(SimulatedHost::new());
        let controller = controller(&host);

        {
            let start = controller.start();
            tokio::pin!(start);
            let polled = poll_once(start.as_mut()).await;
            assert!(!polled);
            assert!(controller.is_request_in_flight());
        }

        assert!(!controller.is_request_in_flight());
        assert_eq!(controller.state(), SessionState::Cancelled);

        host.push_stream(stream_of(&[SimulatedTrack::video(
            "screen",
            TrackCapabilities::default(),
        )]));
        controller.retry().await;
        assert_eq!(controller.state(), SessionState::Active);
    }

    /// Polls a future once, returning whether it completed.
    async fn poll_once<F: std::future::Future + Unpin>(mut future: F) -> bool {
        std::future::poll_fn(|cx| {
            let poll = std::future::Future::poll(std::pin::Pin::new(&mut future), cx);
            std::task::Poll::Ready(poll.is_ready())
        })
        .await
    }

    #[test]
    fn snapshots_compare_streams_by_identity() {
        let track = SimulatedTrack::video("screen", TrackCapabilities::default());
        let stream = stream_of(&[track.clone()]);
        let a = SessionSnapshot {
            state: SessionState::Active,
            stream: Some(stream.clone()),
            ..SessionSnapshot::default()
        };
        let b = SessionSnapshot {
            stream: Some(stream_of(&[track])),
            ..a.clone()
        };

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
