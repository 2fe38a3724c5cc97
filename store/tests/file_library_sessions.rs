#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::{Duration, Instant};

use pcf_core::{
    AnchorConfig, AnchorRuntime, FrameStatus, FrameUid, PcfConfig, Pose, Quat, RegistryConfig,
    Scene, SceneGraph, SimulatedTracker, Vec3,
};
use pcf_store::JsonFileLibrary;
use pretty_assertions::assert_eq;

fn config() -> PcfConfig {
    PcfConfig {
        registry: RegistryConfig {
            poll_interval_secs: 0.0,
            ..RegistryConfig::default()
        },
        anchor: AnchorConfig {
            auto_bind_interval_secs: 0.0,
            ..AnchorConfig::default()
        },
        ..PcfConfig::default()
    }
}

fn session(dir: &std::path::Path, frame: FrameUid, at: Vec3) -> AnchorRuntime<SceneGraph> {
    let tracker = SimulatedTracker::new();
    tracker
        .handle()
        .insert_frame(frame, at, Quat::IDENTITY, FrameStatus::Recognized);
    let library = JsonFileLibrary::with_base_dir(dir.to_path_buf())
        .unwrap()
        .into_handle();
    AnchorRuntime::from_config(Box::new(tracker), SceneGraph::new(), library, &config())
}

#[test]
fn binding_saved_to_disk_restores_in_a_new_process() {
    let tmp = tempfile::TempDir::new().unwrap();
    let frame = FrameUid::new_v4();
    let now = Instant::now();

    let mut first = session(tmp.path(), frame, Vec3::new(1.0, 0.0, 0.0));
    let node = first
        .scene_mut()
        .spawn("plant", Pose::from_position(Vec3::new(2.0, 0.0, 1.0)));
    first.add_anchor(node, None);
    first.tick(now);
    first.tick(now);
    assert!(first.anchors()[0].is_bound());
    drop(first);

    assert!(tmp.path().join("plant.json").exists());

    // Same frame, rediscovered three metres further along x.
    let mut second = session(tmp.path(), frame, Vec3::new(4.0, 0.0, 0.0));
    let node = second.scene_mut().spawn("plant", Pose::IDENTITY);
    second.add_anchor(node, None);
    let later = now + Duration::from_secs(1);
    second.tick(later);
    second.tick(later);

    let pose = second.scene().world_pose(node).unwrap();
    assert!(pose.position.abs_diff_eq(Vec3::new(5.0, 0.0, 1.0), 1e-4));
    assert_eq!(second.anchors()[0].status().bound_frame, Some(frame));
}

#[test]
fn unreadable_record_is_replaced_by_auto_bind() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(tmp.path().join("lamp.json"), "{ not json").unwrap();
    let frame = FrameUid::new_v4();
    let now = Instant::now();

    let mut rt = session(tmp.path(), frame, Vec3::new(1.0, 0.0, 0.0));
    let node = rt
        .scene_mut()
        .spawn("lamp", Pose::from_position(Vec3::new(2.0, 0.0, 1.0)));
    let key = rt.add_anchor(node, None);
    for step in 0..4 {
        rt.tick(now + Duration::from_millis(step));
    }

    let lamp = rt.anchor(key).unwrap();
    assert!(!lamp.is_restoring());
    assert!(lamp.is_bound());
    assert_eq!(lamp.status().bound_frame, Some(frame));

    let library = JsonFileLibrary::with_base_dir(tmp.path().to_path_buf()).unwrap();
    let record = library.read_record("lamp").unwrap().expect("record rewritten");
    assert_eq!(record.key, "lamp");
    assert_eq!(record.binding.uids().collect::<Vec<_>>(), vec![frame]);
}
