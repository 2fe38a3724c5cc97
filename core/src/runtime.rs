//! Cooperative tick scheduler for a registry, a scene and its anchors.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::anchor::{AnchorStatus, PersistentAnchor};
use crate::config::{AnchorConfig, PcfConfig};
use crate::library::LibraryHandle;
use crate::registry::FrameRegistry;
use crate::scene::{NodeId, Scene};
use crate::tracker::FrameTracker;

/// Handle to an anchor inside an [`AnchorRuntime`]. Keys are never reused,
/// so a key kept after [`remove_anchor`](AnchorRuntime::remove_anchor) stays
/// dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchorKey(u64);

pub struct AnchorRuntime<S: Scene> {
    registry: FrameRegistry,
    scene: S,
    library: LibraryHandle,
    anchor_config: AnchorConfig,
    // Parallel vectors in insertion order.
    keys: Vec<AnchorKey>,
    anchors: Vec<PersistentAnchor>,
    next_key: u64,
}

impl<S: Scene> AnchorRuntime<S> {
    pub fn new(
        registry: FrameRegistry,
        scene: S,
        library: LibraryHandle,
        anchor_config: AnchorConfig,
    ) -> Self {
        Self {
            registry,
            scene,
            library,
            anchor_config,
            keys: Vec::new(),
            anchors: Vec::new(),
            next_key: 0,
        }
    }

    pub fn from_config(
        tracker: Box<dyn FrameTracker>,
        scene: S,
        library: LibraryHandle,
        config: &PcfConfig,
    ) -> Self {
        let registry = FrameRegistry::new(tracker, config.registry.clone());
        Self::new(registry, scene, library, config.anchor.clone())
    }

    /// Anchor `node`, keyed by `id` or else by the node's name.
    pub fn add_anchor(&mut self, node: NodeId, id: Option<String>) -> AnchorKey {
        let mut anchor =
            PersistentAnchor::new(node, self.library.clone(), self.anchor_config.clone());
        if let Some(id) = id {
            anchor = anchor.with_id(id);
        }
        let key = AnchorKey(self.next_key);
        self.next_key += 1;
        self.keys.push(key);
        self.anchors.push(anchor);
        key
    }

    /// Take an anchor out of the runtime. It is detached from the registry
    /// before being handed back, so it no longer receives discoveries.
    pub fn remove_anchor(&mut self, key: AnchorKey) -> Option<PersistentAnchor> {
        let position = self.position(key)?;
        self.keys.remove(position);
        let mut anchor = self.anchors.remove(position);
        anchor.detach();
        tracing::debug!(
            anchor = anchor.id().unwrap_or("-"),
            subscribers = self.registry.subscriber_count(),
            "anchor removed"
        );
        Some(anchor)
    }

    /// Anchors in insertion order.
    pub fn anchors(&self) -> &[PersistentAnchor] {
        &self.anchors
    }

    pub fn keys(&self) -> &[AnchorKey] {
        &self.keys
    }

    pub fn anchor(&self, key: AnchorKey) -> Option<&PersistentAnchor> {
        self.anchors.get(self.position(key)?)
    }

    pub fn anchor_mut(&mut self, key: AnchorKey) -> Option<&mut PersistentAnchor> {
        let position = self.position(key)?;
        self.anchors.get_mut(position)
    }

    fn position(&self, key: AnchorKey) -> Option<usize> {
        self.keys.iter().position(|k| *k == key)
    }

    pub fn registry(&self) -> &FrameRegistry {
        &self.registry
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn library(&self) -> &LibraryHandle {
        &self.library
    }

    /// Split borrow for calling anchor operations that need the registry
    /// and scene alongside the anchor.
    pub fn parts_mut(
        &mut self,
        key: AnchorKey,
    ) -> Option<(&mut PersistentAnchor, &FrameRegistry, &mut S)> {
        let position = self.position(key)?;
        let anchor = self.anchors.get_mut(position)?;
        Some((anchor, &self.registry, &mut self.scene))
    }

    pub fn statuses(&self) -> Vec<AnchorStatus> {
        self.anchors.iter().map(PersistentAnchor::status).collect()
    }

    /// Registry first, then frame proxies, then every anchor in insertion order.
    pub fn tick(&mut self, now: Instant) {
        self.registry.tick(now);
        self.scene.sync_frame_proxies(self.registry.all_frames());
        for anchor in &mut self.anchors {
            anchor.tick(now, &mut self.registry, &mut self.scene);
        }
    }

    /// Tick every `tick_interval` until `cancel` fires. Returns the number of
    /// ticks run.
    pub async fn run(&mut self, tick_interval: Duration, cancel: CancellationToken) -> u64 {
        self.run_with(tick_interval, cancel, |_, _| ControlFlow::Continue(()))
            .await
    }

    /// Like [`run`](Self::run), calling `before_tick` with the tick number
    /// ahead of each tick; `Break` stops the loop.
    pub async fn run_with<F>(
        &mut self,
        tick_interval: Duration,
        cancel: CancellationToken,
        mut before_tick: F,
    ) -> u64
    where
        F: FnMut(u64, &mut Self) -> ControlFlow<()>,
    {
        // `interval` panics on a zero period.
        let mut interval = tokio::time::interval(tick_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if before_tick(ticks, &mut *self).is_break() {
                        break;
                    }
                    self.tick(tokio::time::Instant::now().into_std());
                    ticks += 1;
                }
            }
        }
        tracing::debug!(ticks, "anchor runtime stopped");
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::AnchorPhase;
    use crate::config::RegistryConfig;
    use crate::frame::{FrameStatus, Pose};
    use crate::library::InMemoryBindingLibrary;
    use crate::scene::SceneGraph;
    use crate::sim::SimulatedTracker;
    use glam::{Quat, Vec3};
    use pretty_assertions::assert_eq;

    fn runtime(tracker: SimulatedTracker) -> AnchorRuntime<SceneGraph> {
        let config = PcfConfig {
            registry: RegistryConfig {
                poll_interval_secs: 0.0,
                ..RegistryConfig::default()
            },
            anchor: AnchorConfig {
                auto_bind_interval_secs: 0.0,
                ..AnchorConfig::default()
            },
            ..PcfConfig::default()
        };
        AnchorRuntime::from_config(
            Box::new(tracker),
            SceneGraph::new(),
            InMemoryBindingLibrary::shared(),
            &config,
        )
    }

    #[test]
    fn tick_drives_anchors_to_bound() {
        let tracker = SimulatedTracker::new();
        let frame = tracker
            .handle()
            .add_frame(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY, FrameStatus::Recognized);
        let mut rt = runtime(tracker);
        let node = rt.scene_mut().spawn("chair", Pose::IDENTITY);
        let key = rt.add_anchor(node, None);

        let now = Instant::now();
        rt.tick(now);
        rt.tick(now);

        let status = rt.anchor(key).map(PersistentAnchor::status).unwrap();
        assert_eq!(status.phase, AnchorPhase::Active);
        assert_eq!(status.bound_frame, Some(frame));
        assert_eq!(rt.library().keys().unwrap(), vec!["chair".to_string()]);
    }

    #[test]
    fn parts_mut_exposes_anchor_operations() {
        let tracker = SimulatedTracker::new();
        tracker
            .handle()
            .add_frame(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY, FrameStatus::Recognized);
        let mut rt = runtime(tracker);
        let node = rt.scene_mut().spawn("chair", Pose::IDENTITY);
        let key = rt.add_anchor(node, Some("kitchen-chair".to_string()));
        let now = Instant::now();
        rt.tick(now);
        rt.tick(now);

        let (anchor, _, scene) = rt.parts_mut(key).unwrap();
        anchor.unbind(true, scene);
        assert!(rt.library().get("kitchen-chair").unwrap().is_none());

        rt.remove_anchor(key);
        assert!(rt.parts_mut(key).is_none());
    }

    #[test]
    fn removed_anchor_stops_listening_and_keys_stay_stable() {
        let tracker = SimulatedTracker::new();
        let handle = tracker.handle();
        handle.add_frame(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY, FrameStatus::Recognized);
        let mut rt = runtime(tracker);
        let chair = rt.scene_mut().spawn("chair", Pose::IDENTITY);
        let lamp = rt.scene_mut().spawn("lamp", Pose::from_position(Vec3::Y));
        let chair_key = rt.add_anchor(chair, None);
        let lamp_key = rt.add_anchor(lamp, None);

        let now = Instant::now();
        rt.tick(now);
        rt.tick(now);
        assert_eq!(rt.registry().subscriber_count(), 2);

        let removed = rt.remove_anchor(chair_key).unwrap();
        assert_eq!(removed.id(), Some("chair"));
        assert_eq!(removed.phase(), AnchorPhase::Uninitialized);
        assert_eq!(rt.registry().subscriber_count(), 1);
        assert!(rt.remove_anchor(chair_key).is_none());
        assert!(rt.anchor(chair_key).is_none());

        // The surviving anchor keeps its key and keeps ticking.
        assert_eq!(rt.keys(), &[lamp_key]);
        handle.add_frame(Vec3::new(0.0, 1.5, 0.0), Quat::IDENTITY, FrameStatus::Recognized);
        rt.tick(now + Duration::from_millis(10));
        assert!(rt.anchor(lamp_key).unwrap().is_bound());

        let stool = rt.scene_mut().spawn("stool", Pose::IDENTITY);
        let stool_key = rt.add_anchor(stool, None);
        assert_ne!(stool_key, chair_key);
        assert_ne!(stool_key, lamp_key);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let tracker = SimulatedTracker::new();
        tracker
            .handle()
            .add_frame(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY, FrameStatus::Recognized);
        let mut rt = runtime(tracker);
        let node = rt.scene_mut().spawn("chair", Pose::IDENTITY);
        rt.add_anchor(node, None);

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let ticks = tokio::join!(rt.run(Duration::from_millis(10), cancel), async move {
            tokio::time::sleep(Duration::from_millis(95)).await;
            stopper.cancel();
        })
        .0;

        assert!(ticks >= 5, "ran {ticks} ticks");
        assert!(rt.anchors().iter().all(PersistentAnchor::is_bound));
    }

    #[tokio::test(start_paused = true)]
    async fn run_with_can_stop_after_a_tick_budget() {
        let mut rt = runtime(SimulatedTracker::new());
        let node = rt.scene_mut().spawn("chair", Pose::IDENTITY);
        rt.add_anchor(node, None);
        let ticks = rt
            .run_with(Duration::from_millis(5), CancellationToken::new(), |tick, _| {
                if tick >= 3 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await;
        assert_eq!(ticks, 3);
        assert!(rt.registry().is_ready());
    }
}
