//! Scene-graph collaborator.
//!
//! Anchors move their owned node only through [`Scene`]. [`SceneGraph`] is a
//! small in-memory hierarchy used by the runtime, the CLI and tests; engine
//! integrations implement the trait over their own transform system.

use std::collections::HashMap;

use glam::Vec3;

use crate::frame::{FrameUid, Pose, ReferenceFrame};

/// Opaque handle to a scene node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

pub trait Scene: Send {
    fn name(&self, node: NodeId) -> Option<&str>;

    fn world_pose(&self, node: NodeId) -> Option<Pose>;

    /// Pose relative to the node's parent (world pose for root nodes).
    fn local_pose(&self, node: NodeId) -> Option<Pose>;

    /// Write position, rotation and scale in one step.
    fn set_world_pose(&mut self, node: NodeId, pose: Pose);

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Re-parent `node`, keeping its world pose.
    fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>);

    /// Node that follows `frame`'s pose, created on first use. `None` when
    /// the scene has no proxy support.
    fn frame_proxy(&mut self, frame: &ReferenceFrame) -> Option<NodeId>;

    /// Move existing frame proxies to the frames' current poses.
    fn sync_frame_proxies(&mut self, _frames: &[ReferenceFrame]) {}
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    local: Pose,
    pose_writes: usize,
}

/// In-memory scene hierarchy.
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    proxies: HashMap<FrameUid, NodeId>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, name: impl Into<String>, world: Pose) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.into(),
            parent: None,
            local: world,
            pose_writes: 0,
        });
        id
    }

    pub fn rename(&mut self, node: NodeId, name: impl Into<String>) {
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.name = name.into();
        }
    }

    /// Number of [`Scene::set_world_pose`] calls made on `node`.
    pub fn pose_writes(&self, node: NodeId) -> usize {
        self.nodes.get(node.0).map_or(0, |n| n.pose_writes)
    }

    pub fn proxy_for(&self, uid: FrameUid) -> Option<NodeId> {
        self.proxies.get(&uid).copied()
    }

    /// Simulate a user drag: moves the node without counting as an engine write.
    pub fn drag(&mut self, node: NodeId, world: Pose) {
        let local = self.to_local(node, world);
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.local = local;
        }
    }

    fn parent_world(&self, node: NodeId) -> Pose {
        self.nodes
            .get(node.0)
            .and_then(|n| n.parent)
            .and_then(|p| self.world_pose(p))
            .unwrap_or(Pose::IDENTITY)
    }

    fn to_local(&self, node: NodeId, world: Pose) -> Pose {
        let parent = self.parent_world(node);
        let inverse = parent.rotation.inverse();
        Pose {
            position: safe_div(inverse * (world.position - parent.position), parent.scale),
            rotation: inverse * world.rotation,
            scale: safe_div(world.scale, parent.scale),
        }
    }
}

fn compose(parent: &Pose, local: &Pose) -> Pose {
    Pose {
        position: parent.position + parent.rotation * (parent.scale * local.position),
        rotation: parent.rotation * local.rotation,
        scale: parent.scale * local.scale,
    }
}

fn safe_div(value: Vec3, divisor: Vec3) -> Vec3 {
    let component = |v: f32, d: f32| if d == 0.0 { 0.0 } else { v / d };
    Vec3::new(
        component(value.x, divisor.x),
        component(value.y, divisor.y),
        component(value.z, divisor.z),
    )
}

impl Scene for SceneGraph {
    fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0).map(|n| n.name.as_str())
    }

    fn world_pose(&self, node: NodeId) -> Option<Pose> {
        let n = self.nodes.get(node.0)?;
        match n.parent {
            Some(parent) => Some(compose(&self.world_pose(parent)?, &n.local)),
            None => Some(n.local),
        }
    }

    fn local_pose(&self, node: NodeId) -> Option<Pose> {
        self.nodes.get(node.0).map(|n| n.local)
    }

    fn set_world_pose(&mut self, node: NodeId, pose: Pose) {
        let local = self.to_local(node, pose);
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.local = local;
            n.pose_writes += 1;
        }
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    fn set_parent(&mut self, node: NodeId, parent: Option<NodeId>) {
        if parent == Some(node) || self.nodes.get(node.0).is_none() {
            return;
        }
        let Some(world) = self.world_pose(node) else {
            return;
        };
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.parent = parent;
        }
        let local = self.to_local(node, world);
        if let Some(n) = self.nodes.get_mut(node.0) {
            n.local = local;
        }
    }

    fn frame_proxy(&mut self, frame: &ReferenceFrame) -> Option<NodeId> {
        if let Some(id) = self.proxies.get(&frame.uid).copied() {
            if let Some(n) = self.nodes.get_mut(id.0) {
                n.local = frame.pose();
            }
            return Some(id);
        }
        let id = self.spawn(format!("pcf:{}", frame.uid), frame.pose());
        self.proxies.insert(frame.uid, id);
        Some(id)
    }

    fn sync_frame_proxies(&mut self, frames: &[ReferenceFrame]) {
        for frame in frames {
            if let Some(id) = self.proxies.get(&frame.uid).copied()
                && let Some(n) = self.nodes.get_mut(id.0)
            {
                n.local = frame.pose();
            }
        }
    }
}
