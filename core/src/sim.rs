//! In-process stand-in for the device's frame tracker.
//!
//! [`SimulatedTracker`] is handed to the registry; the paired
//! [`SimulatedTrackerHandle`] stays with the caller to script the landscape:
//! add frames, move them, drop recognition, or make startup and polls fail.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use glam::{Quat, Vec3};

use crate::frame::{FrameStatus, FrameUid};
use crate::tracker::{FrameEvent, FrameTracker, RawFrame, TrackingError};

#[derive(Debug, Default)]
struct SimState {
    frames: Vec<RawFrame>,
    watched: HashSet<FrameUid>,
    events: Vec<FrameEvent>,
    started: bool,
    start_attempts: usize,
    start_failure: Option<String>,
    startup_ticks: usize,
    fail_next_poll: bool,
}

impl SimState {
    fn push_event(&mut self, event: FrameEvent) {
        if self.watched.contains(&event.uid()) {
            self.events.push(event);
        }
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    // A panicking test thread must not wedge every other user of the state.
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Simulated frame tracker.
#[derive(Debug, Default)]
pub struct SimulatedTracker {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> SimulatedTrackerHandle {
        SimulatedTrackerHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl FrameTracker for SimulatedTracker {
    fn start(&mut self) -> Result<(), TrackingError> {
        let mut state = lock(&self.state);
        state.start_attempts += 1;
        if let Some(reason) = state.start_failure.clone() {
            return Err(TrackingError::StartFailed(reason));
        }
        state.started = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.started {
            return false;
        }
        if state.startup_ticks > 0 {
            state.startup_ticks -= 1;
            return false;
        }
        true
    }

    fn all_frames(&mut self) -> Result<Vec<RawFrame>, TrackingError> {
        let mut state = lock(&self.state);
        if !state.started {
            return Err(TrackingError::NotReady);
        }
        if std::mem::take(&mut state.fail_next_poll) {
            return Err(TrackingError::QueryFailed("simulated poll failure".to_string()));
        }
        Ok(state.frames.clone())
    }

    fn watch(&mut self, uid: FrameUid) {
        lock(&self.state).watched.insert(uid);
    }

    fn unwatch(&mut self, uid: FrameUid) {
        lock(&self.state).watched.remove(&uid);
    }

    fn drain_events(&mut self) -> Vec<FrameEvent> {
        std::mem::take(&mut lock(&self.state).events)
    }
}

/// Scripting handle for a [`SimulatedTracker`].
#[derive(Debug, Clone)]
pub struct SimulatedTrackerHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTrackerHandle {
    /// Add a frame with a fresh UID.
    pub fn add_frame(&self, position: Vec3, rotation: Quat, status: FrameStatus) -> FrameUid {
        let uid = FrameUid::new_v4();
        self.insert_frame(uid, position, rotation, status);
        uid
    }

    /// Add a frame with a caller-chosen UID, e.g. one persisted last session.
    pub fn insert_frame(&self, uid: FrameUid, position: Vec3, rotation: Quat, status: FrameStatus) {
        let mut state = lock(&self.state);
        if state.frames.iter().any(|frame| frame.uid == uid) {
            return;
        }
        state.frames.push(RawFrame {
            uid,
            position,
            rotation,
            status,
        });
    }

    pub fn set_pose(&self, uid: FrameUid, position: Vec3, rotation: Quat) {
        let mut state = lock(&self.state);
        let Some(frame) = state.frames.iter_mut().find(|frame| frame.uid == uid) else {
            return;
        };
        frame.position = position;
        frame.rotation = rotation;
        let event = FrameEvent::Updated {
            uid,
            position,
            rotation,
            status: frame.status,
        };
        state.push_event(event);
    }

    pub fn set_status(&self, uid: FrameUid, status: FrameStatus) {
        let mut state = lock(&self.state);
        let Some(frame) = state.frames.iter_mut().find(|frame| frame.uid == uid) else {
            return;
        };
        if frame.status == status {
            return;
        }
        frame.status = status;
        let event = match status {
            FrameStatus::Recognized => FrameEvent::Regained { uid },
            FrameStatus::NotRecognized => FrameEvent::Lost { uid },
            FrameStatus::Error => FrameEvent::Updated {
                uid,
                position: frame.position,
                rotation: frame.rotation,
                status,
            },
        };
        state.push_event(event);
    }

    /// Make the tracker's `start` fail.
    pub fn fail_start(&self, reason: impl Into<String>) {
        lock(&self.state).start_failure = Some(reason.into());
    }

    /// Report not-ready for this many readiness checks after `start`.
    pub fn set_startup_ticks(&self, ticks: usize) {
        lock(&self.state).startup_ticks = ticks;
    }

    pub fn fail_next_poll(&self) {
        lock(&self.state).fail_next_poll = true;
    }

    pub fn start_attempts(&self) -> usize {
        lock(&self.state).start_attempts
    }

    pub fn is_watched(&self, uid: FrameUid) -> bool {
        lock(&self.state).watched.contains(&uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn events_only_flow_for_watched_frames() {
        let mut tracker = SimulatedTracker::new();
        let handle = tracker.handle();
        let watched = handle.add_frame(Vec3::X, Quat::IDENTITY, FrameStatus::Recognized);
        let ignored = handle.add_frame(Vec3::Y, Quat::IDENTITY, FrameStatus::Recognized);
        tracker.watch(watched);

        handle.set_status(watched, FrameStatus::NotRecognized);
        handle.set_status(ignored, FrameStatus::NotRecognized);

        assert_eq!(tracker.drain_events(), vec![FrameEvent::Lost { uid: watched }]);
        assert!(tracker.drain_events().is_empty());
    }

    #[test]
    fn queries_fail_before_start() {
        let mut tracker = SimulatedTracker::new();
        assert_eq!(tracker.all_frames(), Err(TrackingError::NotReady));
        assert!(!tracker.is_ready());
        assert!(tracker.start().is_ok());
        assert!(tracker.is_ready());
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let mut tracker = SimulatedTracker::new();
        let handle = tracker.handle();
        let uid = FrameUid::new_v4();
        handle.insert_frame(uid, Vec3::ZERO, Quat::IDENTITY, FrameStatus::Recognized);
        handle.insert_frame(uid, Vec3::ONE, Quat::IDENTITY, FrameStatus::Recognized);
        assert!(tracker.start().is_ok());
        let frames = tracker.all_frames().unwrap_or_default();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].position, Vec3::ZERO);
    }
}
