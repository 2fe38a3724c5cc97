//! PersistentAnchor: keeps one scene node attached to the real world.
//!
//! An anchor is inert until the registry reports ready. From then on every
//! [`tick`](PersistentAnchor::tick) runs, in order:
//!
//! 1. movement detection against the cached node snapshot,
//! 2. the anchor-driven move loop, if any,
//! 3. the restore loop, if any,
//! 4. re-resolution after frame discovery (bound anchors only),
//! 5. auto-bind when unbound and no loop is running.
//!
//! All pose writes made by the anchor itself refresh the snapshot, so only
//! changes made by someone else count as movement.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::oneshot;

use crate::binding::{BindingInfo, CompositeBinding};
use crate::config::AnchorConfig;
use crate::error::{AnchorError, LibraryError, Result};
use crate::frame::{FrameUid, Pose};
use crate::library::LibraryHandle;
use crate::registry::{FrameDiscovered, FrameRegistry};
use crate::scene::{NodeId, Scene};
use crate::task::{MoveTask, RestoreTask, Step};

/// Pose differences below this are not written back to the scene.
const POSE_EPSILON: f32 = 1e-4;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPhase {
    Uninitialized,
    /// Registry start requested; waiting for its verdict.
    Waiting,
    Active,
    /// The registry failed to start. Terminal.
    Disabled,
}

impl AnchorPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnchorEvent {
    StateChanged(AnchorPhase),
    /// Bound to a different frame than before (or bound at all).
    Bound { frame: FrameUid },
    Unbound,
    Restored { frame: FrameUid },
    /// The restore loop was abandoned because the node moved.
    RestoreAborted,
    Disabled,
}

/// Point-in-time view of an anchor, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorStatus {
    pub id: Option<String>,
    pub phase: AnchorPhase,
    pub bound_frame: Option<FrameUid>,
    pub restoring: bool,
    pub moving: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct NodeSnapshot {
    parent: Option<NodeId>,
    local: Pose,
}

pub struct PersistentAnchor {
    node: NodeId,
    id: Option<String>,
    library: LibraryHandle,
    config: AnchorConfig,
    phase: AnchorPhase,
    ready_rx: Option<oneshot::Receiver<bool>>,
    discovered_rx: Option<broadcast::Receiver<FrameDiscovered>>,
    binding: Option<BindingInfo>,
    snapshot: Option<NodeSnapshot>,
    restore: Option<RestoreTask>,
    move_task: Option<MoveTask>,
    next_auto_bind: Option<Instant>,
    /// Parent to go back to when un-parenting from a frame proxy.
    original_parent: Option<Option<NodeId>>,
    events_tx: broadcast::Sender<AnchorEvent>,
}

impl PersistentAnchor {
    pub fn new(node: NodeId, library: LibraryHandle, config: AnchorConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            node,
            id: None,
            library,
            config,
            phase: AnchorPhase::Uninitialized,
            ready_rx: None,
            discovered_rx: None,
            binding: None,
            snapshot: None,
            restore: None,
            move_task: None,
            next_auto_bind: None,
            original_parent: None,
            events_tx,
        }
    }

    /// Use `id` as the library key instead of the node's name.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Library key, once frozen. Unset until the first tick or operation
    /// when the anchor falls back to the node's name.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn phase(&self) -> AnchorPhase {
        self.phase
    }

    pub fn binding(&self) -> Option<&BindingInfo> {
        self.binding.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn is_restoring(&self) -> bool {
        self.restore.is_some()
    }

    pub fn is_moving(&self) -> bool {
        self.move_task.is_some()
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AnchorEvent> {
        self.events_tx.subscribe()
    }

    pub fn status(&self) -> AnchorStatus {
        AnchorStatus {
            id: self.id.clone(),
            phase: self.phase,
            bound_frame: self.binding.as_ref().map(BindingInfo::frame_uid),
            restoring: self.is_restoring(),
            moving: self.is_moving(),
        }
    }

    pub fn tick(&mut self, now: Instant, registry: &mut FrameRegistry, scene: &mut dyn Scene) {
        match self.phase {
            AnchorPhase::Uninitialized => self.begin(now, registry, scene),
            AnchorPhase::Waiting => self.poll_ready(now, registry, scene),
            AnchorPhase::Active => self.tick_active(now, registry, scene),
            AnchorPhase::Disabled => {}
        }
    }

    /// Bind to the live frames around the node's current pose.
    ///
    /// Fails without any state change when no recognized frame is in range.
    /// On success any in-flight restore is cancelled. With `persist` the new
    /// composite is written to the library; library failures are logged and
    /// do not fail the bind.
    pub fn try_bind(
        &mut self,
        persist: bool,
        registry: &FrameRegistry,
        scene: &mut dyn Scene,
    ) -> Result<BindingInfo> {
        let id = self.identifier(scene);
        let pose = scene
            .world_pose(self.node)
            .ok_or(AnchorError::NodeMissing(self.node))?;

        let radius = self.config.binding_radius;
        let composite = CompositeBinding::new(&pose, registry.ok_frames(), radius);
        if !composite.is_valid() {
            return Err(AnchorError::NoFrameInRange { radius });
        }
        let info = composite
            .resolve_info(registry.ok_frames())
            .ok_or(AnchorError::NoRecognizedCandidate {
                candidates: composite.len(),
            })?;

        self.apply(&info, false, scene)?;
        if self.restore.take().is_some() {
            tracing::debug!(anchor = %id, "restore cancelled by bind");
        }
        if persist {
            self.persist(&id, &info.composite);
        }
        Ok(info)
    }

    /// One restore attempt from `binding`, or from the library entry when
    /// `binding` is absent or empty. Does not write to the library.
    pub fn try_restore_once(
        &mut self,
        binding: Option<&CompositeBinding>,
        registry: &FrameRegistry,
        scene: &mut dyn Scene,
    ) -> Result<BindingInfo> {
        let id = self.identifier(scene);
        let explicit = binding.filter(|b| b.is_valid());
        let stored = match explicit {
            Some(_) => None,
            None => match self.library.get(&id) {
                Ok(stored) => stored,
                // An unreadable entry is nothing to restore; the next
                // auto-bind overwrites it.
                Err(LibraryError::Serde { message }) => {
                    tracing::warn!(anchor = %id, error = %message, "stored binding unreadable");
                    None
                }
                Err(err) => return Err(err.into()),
            },
        };
        let Some(composite) = explicit.or(stored.as_ref().filter(|b| b.is_valid())) else {
            return Err(AnchorError::InvalidStoredBinding { id });
        };

        let info = composite
            .resolve_info(registry.ok_frames())
            .ok_or(AnchorError::NoRecognizedCandidate {
                candidates: composite.len(),
            })?;
        self.apply(&info, false, scene)?;

        tracing::info!(anchor = %id, frame = %info.frame_uid(), "restored anchor");
        self.emit(AnchorEvent::Restored {
            frame: info.frame_uid(),
        });
        Ok(info)
    }

    /// Start (or restart) the restore loop. Cancels an in-flight restore or
    /// move. The first attempt runs on the next active tick.
    pub fn try_restore(&mut self, binding: Option<CompositeBinding>, now: Instant) {
        if self.move_task.take().is_some() {
            tracing::debug!(anchor = self.log_id(), "move cancelled by restore");
        }
        self.restore = Some(RestoreTask::new(
            binding,
            self.config.restore_retry_interval(),
            now,
        ));
    }

    /// Release the registry subscription and any pending readiness wait.
    /// Running loops are dropped. Ticking the anchor again starts it over
    /// from `Uninitialized`; the current binding is kept for inspection.
    pub fn detach(&mut self) {
        self.discovered_rx = None;
        self.ready_rx = None;
        self.restore = None;
        self.move_task = None;
        if self.phase != AnchorPhase::Uninitialized {
            self.set_phase(AnchorPhase::Uninitialized);
        }
    }

    /// Drop the current binding, undoing any re-parenting while keeping the
    /// node's world pose. With `update_library` the stored entry is removed.
    pub fn unbind(&mut self, update_library: bool, scene: &mut dyn Scene) {
        let id = self.identifier(scene);
        let was_bound = self.binding.take().is_some();

        if let Some(parent) = self.original_parent.take() {
            scene.set_parent(self.node, parent);
        }
        if update_library && let Err(err) = self.library.remove(&id) {
            let err = AnchorError::from(err);
            tracing::warn!(
                anchor = %id,
                category = err.category().as_str(),
                error = %err,
                "failed to remove stored binding"
            );
        }

        if was_bound {
            tracing::debug!(anchor = %id, "unbound");
            self.emit(AnchorEvent::Unbound);
        }
        self.snapshot = take_snapshot(scene, self.node);
    }

    /// Move the node to `target` over `duration`, one step per tick.
    ///
    /// The anchor is unbound for the duration of the move; the next
    /// auto-bind after it finishes saves the new location.
    pub fn move_to(
        &mut self,
        target: Pose,
        duration: Duration,
        now: Instant,
        scene: &mut dyn Scene,
    ) -> Result<()> {
        let from = scene
            .world_pose(self.node)
            .ok_or(AnchorError::NodeMissing(self.node))?;
        if self.restore.take().is_some() {
            tracing::debug!(anchor = self.log_id(), "restore cancelled by move");
        }
        if self.binding.take().is_some() {
            self.emit(AnchorEvent::Unbound);
        }
        self.move_task = Some(MoveTask::new(from, target, duration, now));
        Ok(())
    }

    fn identifier(&mut self, scene: &dyn Scene) -> String {
        let node = self.node;
        self.id
            .get_or_insert_with(|| {
                scene
                    .name(node)
                    .map_or_else(|| format!("node-{}", node.index()), str::to_string)
            })
            .clone()
    }

    fn log_id(&self) -> &str {
        self.id.as_deref().unwrap_or("?")
    }

    fn emit(&self, event: AnchorEvent) {
        let _ = self.events_tx.send(event);
    }

    fn set_phase(&mut self, phase: AnchorPhase) {
        tracing::debug!(anchor = self.log_id(), phase = phase.as_str(), "anchor phase changed");
        self.phase = phase;
        self.emit(AnchorEvent::StateChanged(phase));
    }

    fn begin(&mut self, now: Instant, registry: &mut FrameRegistry, scene: &mut dyn Scene) {
        self.identifier(scene);
        let (tx, rx) = oneshot::channel();
        self.ready_rx = Some(rx);
        self.set_phase(AnchorPhase::Waiting);
        registry.start(move |ready| {
            let _ = tx.send(ready);
        });
        // A registry that is already up answers synchronously.
        self.poll_ready(now, registry, scene);
    }

    fn poll_ready(&mut self, now: Instant, registry: &mut FrameRegistry, scene: &mut dyn Scene) {
        let Some(rx) = self.ready_rx.as_mut() else {
            return;
        };
        match rx.try_recv() {
            Ok(true) => {
                self.ready_rx = None;
                self.activate(now, registry, scene);
            }
            Ok(false) | Err(oneshot::error::TryRecvError::Closed) => {
                self.ready_rx = None;
                self.disable(registry);
            }
            Err(oneshot::error::TryRecvError::Empty) => {}
        }
    }

    fn disable(&mut self, registry: &FrameRegistry) {
        let reason = registry
            .failure()
            .map_or_else(|| "registry dropped".to_string(), ToString::to_string);
        let err = AnchorError::TrackingUnavailable { reason };
        tracing::warn!(
            anchor = self.log_id(),
            category = err.category().as_str(),
            error = %err,
            "anchor disabled"
        );
        self.restore = None;
        self.move_task = None;
        self.set_phase(AnchorPhase::Disabled);
        self.emit(AnchorEvent::Disabled);
    }

    fn activate(&mut self, now: Instant, registry: &mut FrameRegistry, scene: &mut dyn Scene) {
        self.discovered_rx = Some(registry.subscribe());
        self.snapshot = take_snapshot(scene, self.node);
        self.next_auto_bind = Some(now + self.config.auto_bind_interval());
        self.set_phase(AnchorPhase::Active);

        // A restore queued before activation keeps its explicit binding.
        if self.restore.is_none() && self.move_task.is_none() {
            self.try_restore(None, now);
        }
        self.tick_active(now, registry, scene);
    }

    fn tick_active(&mut self, now: Instant, registry: &mut FrameRegistry, scene: &mut dyn Scene) {
        let moved = self.detect_movement(now, scene);

        if let Some(mut task) = self.move_task.take() {
            let node = self.node;
            let step = task.step(now, moved, |pose| scene.set_world_pose(node, pose));
            self.snapshot = take_snapshot(scene, self.node);
            match step {
                Step::Continue => self.move_task = Some(task),
                Step::Succeeded => tracing::debug!(anchor = self.log_id(), "move finished"),
                Step::Aborted => tracing::debug!(anchor = self.log_id(), "move interrupted"),
            }
        }

        if let Some(mut task) = self.restore.take() {
            let step = task.step(now, moved, |binding| {
                match self.try_restore_once(binding, registry, scene) {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        tracing::debug!(
                            anchor = self.log_id(),
                            category = err.category().as_str(),
                            error = %err,
                            "restore attempt failed"
                        );
                        Err(err)
                    }
                }
            });
            match step {
                Step::Continue => self.restore = Some(task),
                Step::Succeeded => {
                    tracing::debug!(
                        anchor = self.log_id(),
                        attempts = task.attempts(),
                        "restore finished"
                    );
                }
                Step::Aborted if moved => {
                    tracing::info!(anchor = self.log_id(), "restore abandoned: anchor moved");
                    self.emit(AnchorEvent::RestoreAborted);
                }
                Step::Aborted => tracing::debug!(anchor = self.log_id(), "nothing to restore"),
            }
        }

        if self.drain_discoveries()
            && self.binding.is_some()
            && self.restore.is_none()
            && self.move_task.is_none()
        {
            self.rebind(registry, scene);
        }

        if self.binding.is_none()
            && self.restore.is_none()
            && self.move_task.is_none()
            && self.next_auto_bind.is_none_or(|due| now >= due)
        {
            self.next_auto_bind = Some(now + self.config.auto_bind_interval());
            if let Err(err) = self.try_bind(true, registry, scene) {
                tracing::debug!(
                    anchor = self.log_id(),
                    category = err.category().as_str(),
                    error = %err,
                    "auto-bind failed"
                );
            }
        }
    }

    fn detect_movement(&mut self, now: Instant, scene: &dyn Scene) -> bool {
        let Some(current) = take_snapshot(scene, self.node) else {
            return false;
        };
        if self.snapshot == Some(current) {
            return false;
        }
        self.snapshot = Some(current);
        // Save the new spot one full interval after movement was last seen.
        self.next_auto_bind = Some(now + self.config.auto_bind_interval());
        if self.binding.take().is_some() {
            tracing::info!(anchor = self.log_id(), "anchor moved; unbound");
            self.emit(AnchorEvent::Unbound);
        }
        true
    }

    /// Whether any frame was discovered since the last tick.
    fn drain_discoveries(&mut self) -> bool {
        let Some(rx) = self.discovered_rx.as_mut() else {
            return false;
        };
        let mut discovered = false;
        loop {
            match rx.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => discovered = true,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        discovered
    }

    fn rebind(&mut self, registry: &FrameRegistry, scene: &mut dyn Scene) {
        let Some(pose) = scene.world_pose(self.node) else {
            return;
        };
        let radius = self.config.binding_radius;
        let composite = CompositeBinding::new(&pose, registry.ok_frames(), radius);
        let Some(info) = composite.resolve_info(registry.ok_frames()) else {
            return;
        };
        if self.binding.as_ref() == Some(&info) {
            return;
        }

        let id = self.identifier(scene);
        tracing::debug!(anchor = %id, frame = %info.frame_uid(), "re-resolved after discovery");
        if let Err(err) = self.apply(&info, true, scene) {
            tracing::warn!(anchor = %id, error = %err, "failed to apply re-resolved binding");
            return;
        }
        self.persist(&id, &info.composite);
    }

    fn apply(
        &mut self,
        info: &BindingInfo,
        force_write: bool,
        scene: &mut dyn Scene,
    ) -> Result<()> {
        let proxy = if self.config.parent_to_frame {
            scene.frame_proxy(&info.frame)
        } else {
            None
        };

        let target = info.world_pose();
        let current = scene
            .world_pose(self.node)
            .ok_or(AnchorError::NodeMissing(self.node))?;
        if force_write || !current.approx_eq(&target, POSE_EPSILON) {
            scene.set_world_pose(self.node, target);
        }

        if let Some(proxy) = proxy {
            let parent = scene.parent(self.node);
            if self.original_parent.is_none() {
                self.original_parent = Some(parent);
            }
            if parent != Some(proxy) {
                scene.set_parent(self.node, Some(proxy));
            }
        }

        let frame = info.frame_uid();
        let previous = self.binding.replace(info.clone());
        self.snapshot = take_snapshot(scene, self.node);
        if previous.as_ref().map(BindingInfo::frame_uid) != Some(frame) {
            tracing::info!(anchor = self.log_id(), frame = %frame, "bound");
            self.emit(AnchorEvent::Bound { frame });
        }
        Ok(())
    }

    fn persist(&self, id: &str, composite: &CompositeBinding) {
        if let Err(err) = self.library.set(id, composite) {
            let err = AnchorError::from(err);
            tracing::warn!(
                anchor = %id,
                category = err.category().as_str(),
                error = %err,
                "failed to save binding"
            );
        }
    }
}

fn take_snapshot(scene: &dyn Scene, node: NodeId) -> Option<NodeSnapshot> {
    Some(NodeSnapshot {
        parent: scene.parent(node),
        local: scene.local_pose(node)?,
    })
}
