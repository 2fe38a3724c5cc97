//! `pcf-anchor run`

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pcf_core::{
    AnchorEvent, AnchorPhase, AnchorRuntime, FrameStatus, FrameUid, LibraryHandle, NodeId,
    PcfConfig, Pose, Scene, SceneGraph, SimulatedTracker, SimulatedTrackerHandle, Vec3,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::scenario::{EventAction, Scenario};

const DEFAULT_TICKS: u64 = 50;
const DEFAULT_TICK_MS: u64 = 100;

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Scenario file (TOML)
    #[arg(long, value_name = "FILE")]
    pub scenario: PathBuf,

    /// Binding store directory (defaults to `[store] dir`)
    #[arg(long, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Ticks to run (overrides the scenario's `ticks`)
    #[arg(long, value_name = "N")]
    pub ticks: Option<u64>,

    /// Milliseconds between ticks (overrides the scenario's `tick_ms`)
    #[arg(long = "tick-ms", value_name = "MS")]
    pub tick_ms: Option<u64>,

    /// Output the final anchor report as JSON
    #[arg(long = "json", short = 'j')]
    pub json: bool,
}

/// Where one anchor ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorReport {
    pub name: String,
    pub id: Option<String>,
    pub phase: AnchorPhase,
    pub bound_frame: Option<FrameUid>,
    pub restoring: bool,
    pub position: Option<Vec3>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub ticks: u64,
    pub anchors: Vec<AnchorReport>,
}

impl RunReport {
    /// 0 when every anchor is bound, 1 when some are not, 2 when tracking
    /// never came up.
    pub fn exit_code(&self) -> i32 {
        if self
            .anchors
            .iter()
            .any(|a| a.phase == AnchorPhase::Disabled)
        {
            2
        } else if self.anchors.iter().any(|a| a.bound_frame.is_none()) {
            1
        } else {
            0
        }
    }
}

pub async fn run_run(args: RunArgs, config: &PcfConfig) -> anyhow::Result<i32> {
    let scenario = Scenario::load(&args.scenario)?;
    let library = crate::open_library(args.store.as_deref(), config)?;
    tracing::info!(store = %library.base_dir().display(), "using binding store");

    let ticks = args.ticks.or(scenario.ticks).unwrap_or(DEFAULT_TICKS);
    let tick_ms = args.tick_ms.or(scenario.tick_ms).unwrap_or(DEFAULT_TICK_MS);

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, stopping after the current tick");
                cancel.cancel();
            }
        }
    });

    let report = run_scenario(
        &scenario,
        config,
        library.into_handle(),
        ticks,
        Duration::from_millis(tick_ms),
        cancel,
    )
    .await;
    interrupt.abort();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_human_report(&report);
    }
    Ok(report.exit_code())
}

/// Play `scenario` for up to `ticks` ticks, or until `cancel` fires.
pub async fn run_scenario(
    scenario: &Scenario,
    config: &PcfConfig,
    library: LibraryHandle,
    ticks: u64,
    tick_interval: Duration,
    cancel: CancellationToken,
) -> RunReport {
    let tracker = SimulatedTracker::new();
    let handle = tracker.handle();
    let mut runtime =
        AnchorRuntime::from_config(Box::new(tracker), SceneGraph::new(), library, config);

    let mut nodes = HashMap::new();
    let mut watchers = Vec::new();
    for spec in &scenario.anchors {
        let node = runtime
            .scene_mut()
            .spawn(spec.name.clone(), Pose::from_position(spec.position));
        let key = runtime.add_anchor(node, spec.id.clone());
        if let Some(anchor) = runtime.anchor(key) {
            watchers.push((spec.name.clone(), anchor.subscribe()));
        }
        nodes.insert(spec.name.clone(), node);
    }

    let ran = runtime
        .run_with(tick_interval, cancel, |tick, rt| {
            drain_events(&mut watchers);
            if tick >= ticks {
                return ControlFlow::Break(());
            }
            play_tick(scenario, &handle, &nodes, tick, rt.scene_mut());
            ControlFlow::Continue(())
        })
        .await;
    drain_events(&mut watchers);

    let anchors = scenario
        .anchors
        .iter()
        .zip(runtime.anchors())
        .map(|(spec, anchor)| {
            let status = anchor.status();
            AnchorReport {
                name: spec.name.clone(),
                id: status.id,
                phase: status.phase,
                bound_frame: status.bound_frame,
                restoring: status.restoring,
                position: runtime.scene().world_pose(anchor.node()).map(|p| p.position),
            }
        })
        .collect();

    RunReport {
        ticks: ran,
        anchors,
    }
}

/// Apply everything scheduled for `tick` before the runtime sees it.
fn play_tick(
    scenario: &Scenario,
    tracker: &SimulatedTrackerHandle,
    nodes: &HashMap<String, NodeId>,
    tick: u64,
    scene: &mut SceneGraph,
) {
    for frame in scenario.frames.iter().filter(|f| f.appear_tick == tick) {
        tracing::debug!(frame = %frame.name, tick, "frame appears");
        tracker.insert_frame(frame.uid(), frame.position, frame.rotation, frame.status);
    }

    for event in scenario.events.iter().filter(|e| e.tick == tick) {
        tracing::debug!(tick, action = ?event.action, "scenario event");
        let frame = event.frame.as_deref().and_then(|name| scenario.frame(name));
        match (event.action, frame) {
            (EventAction::Lose, Some(frame)) => {
                tracker.set_status(frame.uid(), FrameStatus::NotRecognized);
            }
            (EventAction::Regain, Some(frame)) => {
                tracker.set_status(frame.uid(), FrameStatus::Recognized);
            }
            (EventAction::Move, Some(frame)) => {
                let position = event.position.unwrap_or(frame.position);
                let rotation = event.rotation.unwrap_or(frame.rotation);
                tracker.set_pose(frame.uid(), position, rotation);
            }
            (EventAction::Drag, _) => {
                let Some(&node) = event.anchor.as_ref().and_then(|name| nodes.get(name)) else {
                    continue;
                };
                let mut pose = scene.world_pose(node).unwrap_or_default();
                if let Some(position) = event.position {
                    pose.position = position;
                }
                if let Some(rotation) = event.rotation {
                    pose.rotation = rotation;
                }
                scene.drag(node, pose);
            }
            _ => {}
        }
    }
}

fn drain_events(watchers: &mut [(String, broadcast::Receiver<AnchorEvent>)]) {
    for (name, rx) in watchers.iter_mut() {
        loop {
            match rx.try_recv() {
                Ok(event) => log_event(name, &event),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(anchor = %name, missed, "anchor event log lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}

fn log_event(name: &str, event: &AnchorEvent) {
    match event {
        AnchorEvent::StateChanged(phase) => {
            tracing::info!(anchor = name, phase = phase.as_str(), "anchor state changed");
        }
        AnchorEvent::Bound { frame } => {
            tracing::info!(anchor = name, %frame, "anchor bound");
        }
        AnchorEvent::Unbound => tracing::info!(anchor = name, "anchor unbound"),
        AnchorEvent::Restored { frame } => {
            tracing::info!(anchor = name, %frame, "anchor restored");
        }
        AnchorEvent::RestoreAborted => {
            tracing::info!(anchor = name, "restore abandoned, node moved");
        }
        AnchorEvent::Disabled => tracing::warn!(anchor = name, "anchor disabled"),
    }
}

fn print_human_report(report: &RunReport) {
    println!("\n Scenario finished after {} ticks\n", report.ticks);

    for anchor in &report.anchors {
        let state = match (anchor.phase, anchor.bound_frame) {
            (AnchorPhase::Disabled, _) => "\x1b[31m[DISABLED]\x1b[0m",
            (_, Some(_)) => "\x1b[32m[BOUND]\x1b[0m",
            _ if anchor.restoring => "\x1b[33m[RESTORING]\x1b[0m",
            _ => "\x1b[33m[UNBOUND]\x1b[0m",
        };
        let key = anchor.id.as_deref().unwrap_or(&anchor.name);
        println!("{state} {key}");

        if let Some(frame) = anchor.bound_frame {
            println!("       frame: {frame}");
        }
        if let Some(p) = anchor.position {
            println!("       position: ({:.3}, {:.3}, {:.3})", p.x, p.y, p.z);
        }
    }
    println!();
}
