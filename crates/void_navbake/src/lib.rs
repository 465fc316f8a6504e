//! # void_navbake - Baked Nav Mesh Lifecycle
//!
//! Editor-side bookkeeping for baked navigation meshes:
//! - Asynchronous bake jobs polled from the editor update
//! - Artifact persistence under collision-free asset paths
//! - Sharing of artifacts between a template and its instances
//! - Commit/revert of bakes made while a template is open in a stage
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use void_navbake::prelude::*;
//!
//! let queue = Arc::new(UpdateQueue::new());
//! let mut service = NavBakeService::new(
//!     BakeConfig::default(),
//!     ThreadedGridBuilder::default(),
//!     FsArtifactStore::new("project"),
//!     queue.clone(),
//! );
//!
//! let mut world = SceneWorld::new(Some("Assets/Scenes/Main.scene".into()));
//! let floor = world.spawn_surface("Floor", BuildSettings::default());
//! service.start_bake(&world, &[floor])?;
//!
//! // Every editor update, while the queue holds a task
//! for event in service.tick(&mut world) {
//!     log::info!("{:?}", event);
//! }
//! ```

pub mod artifact;
pub mod builder;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod scheduler;
pub mod service;
pub mod stage;
pub mod store;
pub mod surface;
pub mod tick;
pub mod world;

pub use artifact::{ArtifactId, BakedNavMesh};
pub use builder::{BuildOperation, BuildOutcome, BuildSource, NavMeshBuilder, NoSources, SourceCollector};
pub use config::BakeConfig;
pub use coordinator::StageCoordinator;
pub use error::{BakeError, Result, StorageError};
pub use ledger::{LedgerEntry, LedgerOutcome, OwnershipLedger};
pub use scheduler::{BakeEvent, BakeJob, BakeOperationInfo, BakeScheduler, JobState};
pub use service::NavBakeService;
pub use stage::{ContextId, EditingContext, NoStageListener, StageEvent, StageListener, StageSignal};
pub use store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use surface::{Bounds, BuildSettings, CollectObjects, Pose, Surface, SurfaceId};
pub use tick::{TaskId, UpdateQueue};
pub use world::{SceneWorld, Template, TemplateId};

#[cfg(feature = "threaded-builder")]
pub use builder::{GridBuildOperation, ThreadedGridBuilder};

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::artifact::ArtifactId;
    pub use crate::builder::{NavMeshBuilder, SourceCollector};
    pub use crate::config::BakeConfig;
    pub use crate::error::{BakeError, Result};
    pub use crate::scheduler::BakeEvent;
    pub use crate::service::NavBakeService;
    pub use crate::stage::{StageListener, NoStageListener};
    pub use crate::store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
    pub use crate::surface::{BuildSettings, SurfaceId};
    pub use crate::tick::UpdateQueue;
    pub use crate::world::SceneWorld;

    #[cfg(feature = "threaded-builder")]
    pub use crate::builder::ThreadedGridBuilder;
}
