//! Anchor engine error types
//!
//! Only `TrackingUnavailable` is permanent: it disables every anchor that
//! depends on the registry. Everything else is logged and retried by the
//! auto-bind or restore loops.

use thiserror::Error;

use crate::scene::NodeId;

/// Error category for structured logging and behavior mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The frame-tracking collaborator failed to start
    TrackingUnavailable,
    /// Binding construction found no recognized frame within radius
    NoFrameInRange,
    /// None of a binding's frames is currently recognized
    NoRecognizedCandidate,
    /// Library had no entry or an empty entry for an identifier
    InvalidStoredBinding,
    /// Binding library backend failure
    LibraryError,
    /// The anchor's scene node is gone
    SceneError,
    /// Configuration file missing fields or malformed
    ConfigError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrackingUnavailable => "TRACKING_UNAVAILABLE",
            Self::NoFrameInRange => "NO_FRAME_IN_RANGE",
            Self::NoRecognizedCandidate => "NO_RECOGNIZED_CANDIDATE",
            Self::InvalidStoredBinding => "INVALID_STORED_BINDING",
            Self::LibraryError => "LIBRARY_ERROR",
            Self::SceneError => "SCENE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
        }
    }

    /// Whether an anchor keeps running (and retrying) after this error.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::TrackingUnavailable | Self::ConfigError)
    }
}

/// Errors raised by a [`BindingLibrary`](crate::library::BindingLibrary) backend.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {message}")]
    Serde { message: String },

    #[error("library lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("frame tracking unavailable: {reason}")]
    TrackingUnavailable { reason: String },

    #[error("no recognized frame within {radius} of the target")]
    NoFrameInRange { radius: f32 },

    #[error("none of the {candidates} bound frames is currently recognized")]
    NoRecognizedCandidate { candidates: usize },

    #[error("no stored binding for {id}")]
    InvalidStoredBinding { id: String },

    #[error("binding library error: {0}")]
    Library(#[from] LibraryError),

    #[error("scene node {} no longer exists", .0.index())]
    NodeMissing(NodeId),

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AnchorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TrackingUnavailable { .. } => ErrorCategory::TrackingUnavailable,
            Self::NoFrameInRange { .. } => ErrorCategory::NoFrameInRange,
            Self::NoRecognizedCandidate { .. } => ErrorCategory::NoRecognizedCandidate,
            Self::InvalidStoredBinding { .. } => ErrorCategory::InvalidStoredBinding,
            Self::Library(_) => ErrorCategory::LibraryError,
            Self::NodeMissing(_) => ErrorCategory::SceneError,
            Self::Config { .. } => ErrorCategory::ConfigError,
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnchorError>;
