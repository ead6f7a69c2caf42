//! In-process capture host driven by code instead of a system picker.
//!
//! Used by the headless driver and by tests. Requests either consume a
//! scripted outcome or stay pending until the caller settles them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::debug;

use crate::host::{
    CaptureHost, CaptureOptions, CaptureRejection, CaptureStream, EndedCallback, MediaTrack,
    RejectionKind, TrackCapabilities, TrackError, TrackKind,
};

type Outcome = Result<CaptureStream, CaptureRejection>;

/// Builds a stream from simulated tracks.
pub fn stream_of(tracks: &[Arc<SimulatedTrack>]) -> CaptureStream {
    CaptureStream::new(
        tracks
            .iter()
            .map(|track| track.clone() as Arc<dyn MediaTrack>)
            .collect(),
    )
}

#[derive(Default)]
struct HostState {
    scripted: VecDeque<Outcome>,
    pending: VecDeque<oneshot::Sender<Outcome>>,
    requests: Vec<CaptureOptions>,
}

/// A [`CaptureHost`] whose picker is answered programmatically.
pub struct SimulatedHost {
    supported: bool,
    state: Mutex<HostState>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self {
            supported: true,
            state: Mutex::new(HostState::default()),
        }
    }

    /// A host that reports no capture capability.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Queues an outcome returned immediately by the next request.
    pub fn push_outcome(&self, outcome: Outcome) {
        self.lock().scripted.push_back(outcome);
    }

    pub fn push_stream(&self, stream: CaptureStream) {
        self.push_outcome(Ok(stream));
    }

    pub fn push_rejection(&self, rejection: CaptureRejection) {
        self.push_outcome(Err(rejection));
    }

    /// Number of capture requests issued so far.
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Options of every request issued so far, oldest first.
    pub fn requested_options(&self) -> Vec<CaptureOptions> {
        self.lock().requests.clone()
    }

    /// Number of requests waiting for the caller to settle them.
    pub fn pending_count(&self) -> usize {
        self.lock()
            .pending
            .iter()
            .filter(|sender| !sender.is_closed())
            .count()
    }

    /// Settles the oldest pending request. Returns false if none was waiting.
    pub fn settle_next(&self, outcome: Outcome) -> bool {
        let mut outcome = outcome;
        loop {
            let sender = self.lock().pending.pop_front();
            let Some(sender) = sender else {
                return false;
            };
            match sender.send(outcome) {
                Ok(()) => return true,
                // The requester went away; try the next one.
                Err(returned) => outcome = returned,
            }
        }
    }

    pub fn resolve_next(&self, stream: CaptureStream) -> bool {
        self.settle_next(Ok(stream))
    }

    pub fn reject_next(&self, rejection: CaptureRejection) -> bool {
        self.settle_next(Err(rejection))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureHost for SimulatedHost {
    fn is_capture_supported(&self) -> bool {
        self.supported
    }

    async fn request_capture(
        &self,
        options: &CaptureOptions,
    ) -> Result<CaptureStream, CaptureRejection> {
        let receiver = {
            let mut state = self.lock();
            state.requests.push(options.clone());
            debug!(request = state.requests.len(), ?options, "Simulated capture request");

            if !self.supported {
                return Err(CaptureRejection::new(RejectionKind::CapabilityAbsent));
            }
            if let Some(outcome) = state.scripted.pop_front() {
                return outcome;
            }

            let (sender, receiver) = oneshot::channel();
            state.pending.push_back(sender);
            receiver
        };

        receiver.await.unwrap_or_else(|_| {
            Err(CaptureRejection::from_host(
                "InvalidStateError",
                "picker closed without an answer",
            ))
        })
    }
}

/// A [`MediaTrack`] whose lifetime is controlled by the caller.
#[derive(Debug)]
pub struct SimulatedTrack {
    id: String,
    kind: TrackKind,
    capabilities: TrackCapabilities,
    ended: AtomicBool,
    fail_stop: AtomicBool,
    stop_calls: AtomicUsize,
    callback: Mutex<Option<EndedCallbackSlot>>,
}

struct EndedCallbackSlot(EndedCallback);

impl std::fmt::Debug for EndedCallbackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EndedCallback")
    }
}

impl SimulatedTrack {
    pub fn video(id: &str, capabilities: TrackCapabilities) -> Arc<Self> {
        Arc::new(Self::with_kind(id, TrackKind::Video, capabilities))
    }

    pub fn audio(id: &str) -> Arc<Self> {
        Arc::new(Self::with_kind(
            id,
            TrackKind::Audio,
            TrackCapabilities::default(),
        ))
    }

    fn with_kind(id: &str, kind: TrackKind, capabilities: TrackCapabilities) -> Self {
        Self {
            id: id.to_string(),
            kind,
            capabilities,
            ended: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
            callback: Mutex::new(None),
        }
    }

    /// Makes every later `stop` call fail.
    pub fn fail_on_stop(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }

    /// Marks the track ended without notifying anyone.
    pub fn mark_ended(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    /// Ends the track from the host side and fires the bound callback.
    ///
    /// Returns whether a callback was bound.
    pub fn fire_ended(&self) -> bool {
        self.mark_ended();
        let callback = self
            .slot()
            .as_ref()
            .map(|slot| slot.0.clone());
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn has_ended_callback(&self) -> bool {
        self.slot().is_some()
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<EndedCallbackSlot>> {
        self.callback
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MediaTrack for SimulatedTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn capabilities(&self) -> TrackCapabilities {
        self.capabilities.clone()
    }

    fn stop(&self) -> Result<(), TrackError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(TrackError::StopFailed {
                id: self.id.clone(),
                reason: "simulated failure".to_string(),
            });
        }
        // Stopping locally never fires the ended callback.
        self.mark_ended();
        Ok(())
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn set_ended_callback(&self, callback: Option<EndedCallback>) {
        *self.slot() = callback.map(EndedCallbackSlot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_outcomes_are_returned_in_order() {
        let host = SimulatedHost::new();
        host.push_rejection(CaptureRejection::new(RejectionKind::Aborted));
        host.push_stream(stream_of(&[SimulatedTrack::video(
            "screen",
            TrackCapabilities::default(),
        )]));

        let options = CaptureOptions::default();
        let first = host.request_capture(&options).await;
        assert_eq!(first.unwrap_err().kind, RejectionKind::Aborted);
        let second = host.request_capture(&options).await.unwrap();
        assert_eq!(second.tracks().len(), 1);
        assert_eq!(host.request_count(), 2);
    }

    #[tokio::test]
    async fn held_requests_wait_for_the_caller() {
        let host = Arc::new(SimulatedHost::new());
        let options = CaptureOptions::default();

        let (result, settled) = tokio::join!(host.request_capture(&options), async {
            tokio::task::yield_now().await;
            host.reject_next(CaptureRejection::from_host("NotAllowedError", ""))
        });

        assert!(settled);
        assert_eq!(result.unwrap_err().kind, RejectionKind::PermissionRefused);
        assert!(!host.reject_next(CaptureRejection::new(RejectionKind::Aborted)));
    }

    #[test]
    fn detached_callback_is_not_fired() {
        let track = SimulatedTrack::video("screen", TrackCapabilities::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        track.set_ended_callback(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        track.set_ended_callback(None);

        assert!(!track.fire_ended());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(track.is_ended());
    }
}
