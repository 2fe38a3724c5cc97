//! Reference frames ("PCFs") and world poses.
//!
//! A [`ReferenceFrame`] is a real-world point tracked by the device. The
//! registry owns every frame it has ever seen; frames are never removed, only
//! flipped to [`FrameStatus::NotRecognized`] when the device loses them.

use std::fmt;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity assigned to a frame by the tracking subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameUid(Uuid);

impl FrameUid {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for FrameUid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for FrameUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Recognition status reported by the tracking collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Recognized,
    NotRecognized,
    Error,
}

impl FrameStatus {
    pub fn is_recognized(self) -> bool {
        matches!(self, FrameStatus::Recognized)
    }
}

/// World-space position, orientation and scale of a scene node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Component-wise approximate equality; `q` and `-q` are the same rotation.
    pub fn approx_eq(&self, other: &Pose, epsilon: f32) -> bool {
        self.position.abs_diff_eq(other.position, epsilon)
            && self.scale.abs_diff_eq(other.scale, epsilon)
            && (self.rotation.abs_diff_eq(other.rotation, epsilon)
                || self.rotation.abs_diff_eq(-other.rotation, epsilon))
    }

    /// Interpolate towards `target`: lerp for position/scale, slerp for rotation.
    pub fn interpolate(&self, target: &Pose, t: f32) -> Pose {
        let t = t.clamp(0.0, 1.0);
        Pose {
            position: self.position.lerp(target.position, t),
            rotation: self.rotation.slerp(target.rotation, t),
            scale: self.scale.lerp(target.scale, t),
        }
    }
}

/// A tracked real-world reference point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFrame {
    pub uid: FrameUid,
    pub position: Vec3,
    pub rotation: Quat,
    pub status: FrameStatus,
}

impl ReferenceFrame {
    pub fn new(uid: FrameUid, position: Vec3, rotation: Quat, status: FrameStatus) -> Self {
        Self {
            uid,
            position,
            rotation,
            status,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.status.is_recognized()
    }

    /// Frame pose as a unit-scale [`Pose`].
    pub fn pose(&self) -> Pose {
        Pose::new(self.position, self.rotation, Vec3::ONE)
    }
}
