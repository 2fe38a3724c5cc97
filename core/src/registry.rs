//! FrameRegistry: the live landscape of reference frames.
//!
//! The registry wraps a [`FrameTracker`] and is advanced by [`tick`]. It
//! makes exactly one start attempt, then polls the tracker for new frames on
//! a fixed interval and applies per-frame update events for known frames.
//!
//! Frames are append-only: once discovered a frame stays in the registry for
//! its lifetime and only its pose and status change.
//!
//! [`tick`]: FrameRegistry::tick

use std::time::Instant;

use tokio::sync::broadcast;

use crate::config::RegistryConfig;
use crate::error::ErrorCategory;
use crate::frame::{FrameStatus, FrameUid, ReferenceFrame};
use crate::tracker::{FrameEvent, FrameTracker, TrackingError};

/// Invoked once the registry is ready (`true`) or has failed (`false`).
pub type ReadyCallback = Box<dyn FnOnce(bool) + Send>;

/// Registry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// `start` has not been called.
    Uninitialized,
    /// Waiting for the tracker to come up.
    Starting,
    Ready,
    /// The tracker failed to start. Permanent.
    Failed,
}

/// Broadcast to subscribers once per newly observed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDiscovered {
    pub frame: ReferenceFrame,
}

pub struct FrameRegistry {
    tracker: Box<dyn FrameTracker>,
    config: RegistryConfig,
    state: RegistryState,
    start_attempted: bool,
    failure: Option<TrackingError>,
    pending: Vec<ReadyCallback>,
    frames: Vec<ReferenceFrame>,
    discovered_tx: broadcast::Sender<FrameDiscovered>,
    next_poll: Option<Instant>,
}

impl FrameRegistry {
    pub fn new(tracker: Box<dyn FrameTracker>, config: RegistryConfig) -> Self {
        let (discovered_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            tracker,
            config,
            state: RegistryState::Uninitialized,
            start_attempted: false,
            failure: None,
            pending: Vec::new(),
            frames: Vec::new(),
            discovered_tx,
            next_poll: None,
        }
    }

    /// Request startup and register `on_ready`.
    ///
    /// Idempotent: a ready registry calls back immediately with `true`, a
    /// failed one immediately with `false`, and a starting one queues the
    /// callback. The tracker itself is started on the next [`tick`](Self::tick).
    pub fn start(&mut self, on_ready: impl FnOnce(bool) + Send + 'static) {
        match self.state {
            RegistryState::Ready => on_ready(true),
            RegistryState::Failed => on_ready(false),
            RegistryState::Starting => self.pending.push(Box::new(on_ready)),
            RegistryState::Uninitialized => {
                tracing::debug!("frame registry starting");
                self.pending.push(Box::new(on_ready));
                self.state = RegistryState::Starting;
            }
        }
    }

    pub fn state(&self) -> RegistryState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == RegistryState::Ready
    }

    /// Why the tracker failed to start, if it did.
    pub fn failure(&self) -> Option<&TrackingError> {
        self.failure.as_ref()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Every known frame, in discovery order.
    pub fn all_frames(&self) -> &[ReferenceFrame] {
        &self.frames
    }

    /// Known frames that are currently recognized.
    pub fn ok_frames(&self) -> impl Iterator<Item = &ReferenceFrame> + Clone + '_ {
        self.frames.iter().filter(|frame| frame.is_recognized())
    }

    pub fn frame(&self, uid: FrameUid) -> Option<&ReferenceFrame> {
        self.frames.iter().find(|frame| frame.uid == uid)
    }

    /// Live version of `frame`, looked up by UID.
    pub fn frame_like(&self, frame: &ReferenceFrame) -> Option<&ReferenceFrame> {
        self.frame(frame.uid)
    }

    /// Receive a [`FrameDiscovered`] for every frame discovered from now on.
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<FrameDiscovered> {
        self.discovered_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.discovered_tx.receiver_count()
    }

    /// Advance startup, apply tracker events and poll when due.
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            RegistryState::Starting => self.advance_startup(now),
            RegistryState::Ready => {
                self.apply_events();
                if self.next_poll.is_none_or(|due| now >= due) {
                    self.poll(now);
                }
            }
            RegistryState::Uninitialized | RegistryState::Failed => {}
        }
    }

    fn advance_startup(&mut self, now: Instant) {
        if !self.start_attempted {
            self.start_attempted = true;
            if let Err(err) = self.tracker.start() {
                self.fail(err);
                return;
            }
        }

        if self.tracker.is_ready() {
            self.state = RegistryState::Ready;
            self.poll(now);
            tracing::info!(frames = self.frames.len(), "frame registry ready");
            self.notify_pending(true);
        }
    }

    fn fail(&mut self, err: TrackingError) {
        tracing::error!(
            category = ErrorCategory::TrackingUnavailable.as_str(),
            error = %err,
            "frame tracking failed to start; registry disabled"
        );
        self.state = RegistryState::Failed;
        self.failure = Some(err);
        self.notify_pending(false);
    }

    fn notify_pending(&mut self, ready: bool) {
        for callback in std::mem::take(&mut self.pending) {
            callback(ready);
        }
    }

    fn poll(&mut self, now: Instant) {
        self.next_poll = Some(now + self.config.poll_interval());

        let raw_frames = match self.tracker.all_frames() {
            Ok(frames) => frames,
            Err(err) => {
                tracing::warn!(error = %err, "frame poll failed");
                return;
            }
        };

        for raw in raw_frames {
            if self.frame(raw.uid).is_some() {
                continue;
            }
            let frame = ReferenceFrame::from(raw);
            self.tracker.watch(frame.uid);
            tracing::debug!(
                frame = %frame.uid,
                status = ?frame.status,
                "discovered reference frame"
            );
            self.frames.push(frame.clone());
            // No subscribers is not an error.
            let _ = self.discovered_tx.send(FrameDiscovered { frame });
        }
    }

    fn apply_events(&mut self) {
        for event in self.tracker.drain_events() {
            let uid = event.uid();
            let Some(frame) = self.frames.iter_mut().find(|frame| frame.uid == uid) else {
                tracing::trace!(frame = %uid, "event for unknown frame ignored");
                continue;
            };
            match event {
                FrameEvent::Updated {
                    position,
                    rotation,
                    status,
                    ..
                } => {
                    frame.position = position;
                    frame.rotation = rotation;
                    frame.status = status;
                }
                FrameEvent::Lost { .. } => {
                    tracing::debug!(frame = %uid, "reference frame lost");
                    frame.status = FrameStatus::NotRecognized;
                }
                FrameEvent::Regained { .. } => {
                    tracing::debug!(frame = %uid, "reference frame regained");
                    frame.status = FrameStatus::Recognized;
                }
            }
        }
    }
}

impl Drop for FrameRegistry {
    fn drop(&mut self) {
        for frame in &self.frames {
            self.tracker.unwatch(frame.uid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedTracker;
    use glam::{Quat, Vec3};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn registry_with(tracker: SimulatedTracker, poll_secs: f32) -> FrameRegistry {
        FrameRegistry::new(
            Box::new(tracker),
            RegistryConfig {
                poll_interval_secs: poll_secs,
                ..RegistryConfig::default()
            },
        )
    }

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl Fn() -> Box<dyn FnOnce(bool) + Send>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let calls = Arc::clone(&calls);
            move || -> Box<dyn FnOnce(bool) + Send> {
                let calls = Arc::clone(&calls);
                Box::new(move |ready| calls.lock().unwrap().push(ready))
            }
        };
        (calls, make)
    }

    #[test]
    fn start_queues_callbacks_until_ready_then_calls_immediately() {
        let tracker = SimulatedTracker::new();
        let mut registry = registry_with(tracker, 2.0);
        let (calls, make) = recorder();

        registry.start(make());
        registry.start(make());
        assert_eq!(registry.state(), RegistryState::Starting);
        assert!(calls.lock().unwrap().is_empty());

        registry.tick(Instant::now());
        assert!(registry.is_ready());
        assert_eq!(*calls.lock().unwrap(), vec![true, true]);

        registry.start(make());
        assert_eq!(*calls.lock().unwrap(), vec![true, true, true]);
    }

    #[test]
    fn failed_start_is_permanent_and_still_notifies() {
        let tracker = SimulatedTracker::new();
        tracker.handle().fail_start("no spatial map");
        let attempts = tracker.handle();
        let mut registry = registry_with(tracker, 2.0);
        let (calls, make) = recorder();

        registry.start(make());
        registry.tick(Instant::now());
        registry.tick(Instant::now());
        registry.start(make());

        assert_eq!(registry.state(), RegistryState::Failed);
        assert_eq!(*calls.lock().unwrap(), vec![false, false]);
        assert_eq!(attempts.start_attempts(), 1);
        assert!(registry.failure().is_some());
    }

    #[test]
    fn waits_for_slow_tracker() {
        let tracker = SimulatedTracker::new();
        let handle = tracker.handle();
        handle.set_startup_ticks(2);
        let mut registry = registry_with(tracker, 2.0);
        let ready = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ready);
        registry.start(move |ok| {
            if ok {
                flag.fetch_add(1, Ordering::SeqCst);
            }
        });

        let now = Instant::now();
        registry.tick(now);
        registry.tick(now);
        assert_eq!(registry.state(), RegistryState::Starting);
        registry.tick(now);
        assert!(registry.is_ready());
        assert_eq!(ready.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tick_before_start_does_nothing() {
        let tracker = SimulatedTracker::new();
        let handle = tracker.handle();
        let mut registry = registry_with(tracker, 0.0);
        registry.tick(Instant::now());
        assert_eq!(registry.state(), RegistryState::Uninitialized);
        assert_eq!(handle.start_attempts(), 0);
    }

    #[test]
    fn discovers_each_frame_once_in_order() {
        let tracker = SimulatedTracker::new();
        let handle = tracker.handle();
        let a = handle.add_frame(Vec3::X, Quat::IDENTITY, FrameStatus::Recognized);
        let mut registry = registry_with(tracker, 1.0);
        let mut rx = registry.subscribe();

        let t0 = Instant::now();
        registry.start(|_| {});
        registry.tick(t0);

        let b = handle.add_frame(Vec3::Y, Quat::IDENTITY, FrameStatus::NotRecognized);
        let c = handle.add_frame(Vec3::Z, Quat::IDENTITY, FrameStatus::Recognized);

        // Not due yet.
        registry.tick(t0 + Duration::from_millis(500));
        assert_eq!(registry.all_frames().len(), 1);

        registry.tick(t0 + Duration::from_secs(1));
        registry.tick(t0 + Duration::from_secs(2));

        let seen: Vec<FrameUid> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| event.frame.uid)
            .collect();
        assert_eq!(seen, vec![a, b, c]);
        assert_eq!(
            registry.all_frames().iter().map(|f| f.uid).collect::<Vec<_>>(),
            vec![a, b, c]
        );
        assert_eq!(
            registry.ok_frames().map(|f| f.uid).collect::<Vec<_>>(),
            vec![a, c]
        );
    }

    #[test]
    fn zero_interval_polls_every_tick() {
        let tracker = SimulatedTracker::new();
        let handle = tracker.handle();
        let mut registry = registry_with(tracker, 0.0);
        let now = Instant::now();
        registry.start(|_| {});
        registry.tick(now);

        handle.add_frame(Vec3::X, Quat::IDENTITY, FrameStatus::Recognized);
        registry.tick(now);
        assert_eq!(registry.all_frames().len(), 1);
    }

    #[test]
    fn poll_failure_is_logged_and_loop_continues() {
        let tracker = SimulatedTracker::new();
        let handle = tracker.handle();
        let mut registry = registry_with(tracker, 0.0);
        let now = Instant::now();
        registry.start(|_| {});
        registry.tick(now);

        handle.add_frame(Vec3::X, Quat::IDENTITY, FrameStatus::Recognized);
        handle.fail_next_poll();
        registry.tick(now);
        assert!(registry.all_frames().is_empty());

        registry.tick(now);
        assert_eq!(registry.all_frames().len(), 1);
        assert!(registry.is_ready());
    }

    #[test]
    fn tracker_events_keep_known_frames_live() {
        let tracker = SimulatedTracker::new();
        let handle = tracker.handle();
        let uid = handle.add_frame(Vec3::X, Quat::IDENTITY, FrameStatus::Recognized);
        let mut registry = registry_with(tracker, 60.0);
        let now = Instant::now();
        registry.start(|_| {});
        registry.tick(now);

        handle.set_status(uid, FrameStatus::NotRecognized);
        registry.tick(now);
        assert_eq!(registry.frame(uid).map(|f| f.status), Some(FrameStatus::NotRecognized));
        assert_eq!(registry.ok_frames().count(), 0);

        handle.set_pose(uid, Vec3::new(3.0, 0.0, 0.0), Quat::IDENTITY);
        handle.set_status(uid, FrameStatus::Recognized);
        registry.tick(now);
        let live = registry.frame(uid).cloned().expect("known frame");
        assert_eq!(live.position, Vec3::new(3.0, 0.0, 0.0));
        assert!(live.is_recognized());
        assert_eq!(registry.frame_like(&live), Some(&live));
    }
}
