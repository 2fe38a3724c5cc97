//! Interface to the device's frame-tracking subsystem.
//!
//! The registry is the only consumer. Implementations wrap the native
//! tracking API; [`SimulatedTracker`](crate::sim::SimulatedTracker) is the
//! in-process stand-in used by the CLI and tests.

use glam::{Quat, Vec3};

use crate::frame::{FrameStatus, FrameUid, ReferenceFrame};

/// Errors surfaced by the tracking collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackingError {
    #[error("tracking failed to start: {0}")]
    StartFailed(String),

    #[error("tracking not ready")]
    NotReady,

    #[error("frame query failed: {0}")]
    QueryFailed(String),
}

/// Snapshot of one frame as reported by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub uid: FrameUid,
    pub position: Vec3,
    pub rotation: Quat,
    pub status: FrameStatus,
}

impl From<RawFrame> for ReferenceFrame {
    fn from(raw: RawFrame) -> Self {
        ReferenceFrame::new(raw.uid, raw.position, raw.rotation, raw.status)
    }
}

/// Per-frame change notification for a watched frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Updated {
        uid: FrameUid,
        position: Vec3,
        rotation: Quat,
        status: FrameStatus,
    },
    Lost {
        uid: FrameUid,
    },
    Regained {
        uid: FrameUid,
    },
}

impl FrameEvent {
    pub fn uid(&self) -> FrameUid {
        match self {
            FrameEvent::Updated { uid, .. }
            | FrameEvent::Lost { uid }
            | FrameEvent::Regained { uid } => *uid,
        }
    }
}

pub trait FrameTracker: Send {
    /// Begin tracking. Called at most once per registry.
    fn start(&mut self) -> Result<(), TrackingError>;

    /// Whether startup has completed and frames can be queried.
    fn is_ready(&self) -> bool;

    /// Every frame the device currently knows about.
    fn all_frames(&mut self) -> Result<Vec<RawFrame>, TrackingError>;

    /// Subscribe to update/lost/regained events for one frame.
    fn watch(&mut self, uid: FrameUid);

    /// Stop delivering events for one frame.
    fn unwatch(&mut self, uid: FrameUid);

    /// Pending events for watched frames, oldest first.
    fn drain_events(&mut self) -> Vec<FrameEvent>;
}
