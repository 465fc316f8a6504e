//! Error types for nav mesh baking

use std::path::PathBuf;

use thiserror::Error;

use crate::stage::ContextId;
use crate::surface::SurfaceId;
use crate::world::TemplateId;

/// Errors raised by the artifact storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded
    #[error("Failed to serialize nav mesh payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No asset is stored at the path
    #[error("No asset at {0:?}")]
    NotFound(PathBuf),

    /// An asset is already stored at the path
    #[error("Asset already exists at {0:?}")]
    AlreadyExists(PathBuf),
}

/// Errors raised by bake bookkeeping
#[derive(Debug, Error)]
pub enum BakeError {
    /// The surface has nowhere to persist its artifact
    #[error("Cannot bake {surface}: {reason}")]
    InvalidTarget {
        /// Surface that was asked to bake
        surface: SurfaceId,
        /// Why no destination exists
        reason: String,
    },

    /// Surface handle is stale or was never registered
    #[error("Unknown surface: {0}")]
    UnknownSurface(SurfaceId),

    /// Editing context is not open
    #[error("Unknown editing context: {0}")]
    UnknownContext(ContextId),

    /// Template handle is unknown
    #[error("Unknown template: {0}")]
    UnknownTemplate(TemplateId),

    /// Template has no defining surface to open
    #[error("Template {0} has no surfaces")]
    EmptyTemplate(TemplateId),

    /// Storage layer failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid configuration
    #[error("Invalid bake configuration: {0}")]
    Config(String),
}

/// Result type for bake operations
pub type Result<T> = std::result::Result<T, BakeError>;
