//! Root of the `pcf-core` library.
//!
//! Binding and restoration engine that keeps scene nodes attached to
//! persistent coordinate frames across device sessions.

// Library code reports through `tracing`, never stdout/stderr.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod anchor;
pub mod binding;
pub mod config;
pub mod error;
pub mod frame;
pub mod library;
pub mod registry;
pub mod runtime;
pub mod scene;
pub mod sim;
pub mod task;
pub mod tracker;

pub use anchor::{AnchorEvent, AnchorPhase, AnchorStatus, PersistentAnchor};
pub use binding::{BindingInfo, CompositeBinding, DEFAULT_BINDING_RADIUS, FrameBinding};
pub use config::{AnchorConfig, PcfConfig, RegistryConfig, StoreConfig};
pub use error::{AnchorError, ErrorCategory, LibraryError, Result};
pub use frame::{FrameStatus, FrameUid, Pose, ReferenceFrame};
pub use library::{BindingLibrary, InMemoryBindingLibrary, LibraryHandle};
pub use registry::{FrameDiscovered, FrameRegistry, RegistryState};
pub use runtime::{AnchorKey, AnchorRuntime};
pub use scene::{NodeId, Scene, SceneGraph};
pub use sim::{SimulatedTracker, SimulatedTrackerHandle};
pub use tracker::{FrameEvent, FrameTracker, RawFrame, TrackingError};

pub use glam::{Quat, Vec3};
