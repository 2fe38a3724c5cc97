//! Scripted tracking sessions for the simulated tracker.
//!
//! A scenario is a TOML file describing the frames the device will see,
//! the scene nodes to anchor, and timed events (frames lost, regained or
//! drifting, nodes dragged by the user):
//!
//! ```toml
//! ticks = 40
//!
//! [[frames]]
//! name = "desk"
//! position = [1.5, 0.7, -0.5]
//!
//! [[frames]]
//! name = "door"
//! position = [-2.0, 1.0, 1.0]
//! status = "not_recognized"
//! appear_tick = 5
//!
//! [[anchors]]
//! name = "lamp"
//! position = [1.0, 0.8, -0.5]
//!
//! [[events]]
//! tick = 20
//! action = "regain"
//! frame = "door"
//! ```
//!
//! Frames without an explicit `uid` get one derived from their name, so
//! the same scenario file sees the same frames every run and bindings
//! saved by one run restore in the next.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use anyhow::bail;
use pcf_core::{FrameStatus, FrameUid, Quat, Vec3};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Ticks to run when `--ticks` is not given.
    pub ticks: Option<u64>,

    /// Tick period when `--tick-ms` is not given.
    pub tick_ms: Option<u64>,

    #[serde(default)]
    pub frames: Vec<FrameSpec>,

    #[serde(default)]
    pub anchors: Vec<AnchorSpec>,

    #[serde(default)]
    pub events: Vec<EventSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameSpec {
    pub name: String,

    pub uid: Option<Uuid>,

    pub position: Vec3,

    #[serde(default = "identity_rotation")]
    pub rotation: Quat,

    #[serde(default = "recognized")]
    pub status: FrameStatus,

    /// Tick at which the tracker first reports the frame.
    #[serde(default)]
    pub appear_tick: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnchorSpec {
    /// Scene node name. Doubles as the library key unless `id` is set.
    pub name: String,

    pub id: Option<String>,

    /// Where the node starts before any restore.
    #[serde(default)]
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// The tracker stops recognizing `frame`.
    Lose,
    /// The tracker recognizes `frame` again.
    Regain,
    /// `frame` drifts to `position` (and `rotation`, if given).
    Move,
    /// The user drags `anchor` to `position`.
    Drag,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventSpec {
    pub tick: u64,
    pub action: EventAction,
    pub frame: Option<String>,
    pub anchor: Option<String>,
    pub position: Option<Vec3>,
    pub rotation: Option<Quat>,
}

fn identity_rotation() -> Quat {
    Quat::IDENTITY
}

fn recognized() -> FrameStatus {
    FrameStatus::Recognized
}

impl FrameSpec {
    pub fn uid(&self) -> FrameUid {
        let uuid = self
            .uid
            .unwrap_or_else(|| Uuid::new_v5(&Uuid::NAMESPACE_OID, self.name.as_bytes()));
        FrameUid::from_uuid(uuid)
    }
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid scenario {}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let scenario: Scenario = toml::from_str(contents)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn frame(&self, name: &str) -> Option<&FrameSpec> {
        self.frames.iter().find(|frame| frame.name == name)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut frames = HashSet::new();
        for frame in &self.frames {
            if !frames.insert(frame.name.as_str()) {
                bail!("duplicate frame name {:?}", frame.name);
            }
        }
        let mut anchors = HashSet::new();
        for anchor in &self.anchors {
            if !anchors.insert(anchor.name.as_str()) {
                bail!("duplicate anchor name {:?}", anchor.name);
            }
        }

        for event in &self.events {
            let tick = event.tick;
            match event.action {
                EventAction::Lose | EventAction::Regain | EventAction::Move => {
                    let Some(frame) = event.frame.as_deref() else {
                        bail!("event at tick {tick} needs a `frame`");
                    };
                    if !frames.contains(frame) {
                        bail!("event at tick {tick} names unknown frame {frame:?}");
                    }
                }
                EventAction::Drag => {
                    let Some(anchor) = event.anchor.as_deref() else {
                        bail!("event at tick {tick} needs an `anchor`");
                    };
                    if !anchors.contains(anchor) {
                        bail!("event at tick {tick} names unknown anchor {anchor:?}");
                    }
                }
            }
            if matches!(event.action, EventAction::Move | EventAction::Drag)
                && event.position.is_none()
            {
                bail!("event at tick {tick} needs a `position`");
            }
        }
        Ok(())
    }
}
