//! Object-to-frame bindings.
//!
//! - [`FrameBinding`]: one relative transform into a single frame's local space
//! - [`CompositeBinding`]: every in-range frame at creation time, closest first
//! - [`BindingInfo`]: a composite matched against the live frame set

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::frame::{FrameUid, Pose, ReferenceFrame};

/// Default radius within which frames are considered for a binding.
pub const DEFAULT_BINDING_RADIUS: f32 = 5.0;

/// Immutable transform of a target relative to one reference frame.
///
/// Offsets are computed once from the frame's pose at construction and never
/// recomputed, so the binding keeps describing the same real-world spot after
/// the frame's world pose changes between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameBinding {
    uid: FrameUid,
    offset_position: Vec3,
    offset_rotation: Quat,
    offset_scale: Vec3,
}

impl FrameBinding {
    pub fn new(
        frame: &ReferenceFrame,
        world_position: Vec3,
        world_rotation: Quat,
        world_scale: Vec3,
    ) -> Self {
        let inverse = frame.rotation.inverse();
        Self {
            uid: frame.uid,
            offset_position: inverse * (world_position - frame.position),
            offset_rotation: inverse * world_rotation,
            offset_scale: world_scale,
        }
    }

    pub fn from_pose(frame: &ReferenceFrame, pose: &Pose) -> Self {
        Self::new(frame, pose.position, pose.rotation, pose.scale)
    }

    pub fn uid(&self) -> FrameUid {
        self.uid
    }

    pub fn offset_position(&self) -> Vec3 {
        self.offset_position
    }

    pub fn offset_rotation(&self) -> Quat {
        self.offset_rotation
    }

    pub fn offset_scale(&self) -> Vec3 {
        self.offset_scale
    }

    /// World pose of the target when the frame sits at its current pose.
    pub fn world_pose(&self, frame: &ReferenceFrame) -> Pose {
        Pose {
            position: frame.position + frame.rotation * self.offset_position,
            rotation: frame.rotation * self.offset_rotation,
            scale: self.offset_scale,
        }
    }
}

/// Ranked set of [`FrameBinding`]s for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeBinding {
    radius: f32,
    bindings: Vec<FrameBinding>,
}

impl CompositeBinding {
    /// Bind `target` to every recognized frame within `radius`, closest first.
    ///
    /// Frames at equal distance keep the order in which `frames` yielded them.
    pub fn new<'a, I>(target: &Pose, frames: I, radius: f32) -> Self
    where
        I: IntoIterator<Item = &'a ReferenceFrame>,
    {
        let radius_sq = radius * radius;
        let mut bindings: Vec<FrameBinding> = frames
            .into_iter()
            .filter(|frame| frame.is_recognized())
            .filter(|frame| (frame.position - target.position).length_squared() <= radius_sq)
            .map(|frame| FrameBinding::from_pose(frame, target))
            .collect();

        // Vec::sort_by is stable.
        bindings.sort_by(|a, b| {
            a.offset_position
                .length_squared()
                .total_cmp(&b.offset_position.length_squared())
        });

        Self { radius, bindings }
    }

    /// Rebuild from parts, e.g. when loading a stored record.
    pub fn from_parts(radius: f32, bindings: Vec<FrameBinding>) -> Self {
        Self { radius, bindings }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn bindings(&self) -> &[FrameBinding] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        !self.bindings.is_empty()
    }

    pub fn uids(&self) -> impl Iterator<Item = FrameUid> + '_ {
        self.bindings.iter().map(FrameBinding::uid)
    }

    /// First stored binding (closest at creation time) whose frame is
    /// recognized among `candidates`.
    pub fn resolve<'a, I>(&self, candidates: I) -> Option<(FrameBinding, ReferenceFrame)>
    where
        I: IntoIterator<Item = &'a ReferenceFrame>,
        I::IntoIter: Clone,
    {
        let candidates = candidates.into_iter();
        self.bindings.iter().find_map(|binding| {
            candidates
                .clone()
                .find(|frame| frame.is_recognized() && frame.uid == binding.uid)
                .map(|frame| (binding.clone(), frame.clone()))
        })
    }

    /// [`resolve`](Self::resolve) packaged with this composite.
    pub fn resolve_info<'a, I>(&self, candidates: I) -> Option<BindingInfo>
    where
        I: IntoIterator<Item = &'a ReferenceFrame>,
        I::IntoIter: Clone,
    {
        self.resolve(candidates)
            .map(|(binding, frame)| BindingInfo::new(self.clone(), binding, frame))
    }
}

/// A composite binding resolved against the live registry.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingInfo {
    pub composite: CompositeBinding,
    pub binding: FrameBinding,
    pub frame: ReferenceFrame,
}

impl BindingInfo {
    pub fn new(composite: CompositeBinding, binding: FrameBinding, frame: ReferenceFrame) -> Self {
        Self {
            composite,
            binding,
            frame,
        }
    }

    pub fn frame_uid(&self) -> FrameUid {
        self.frame.uid
    }

    pub fn world_pose(&self) -> Pose {
        self.binding.world_pose(&self.frame)
    }
}
