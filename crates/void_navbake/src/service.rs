//! Nav mesh bake service.
//!
//! One instance per editing session. Wires the scheduler, the ownership
//! ledger and the stage coordinator to a build routine and an artifact
//! store, and is handed to the stage host as its [`StageListener`].

use std::sync::Arc;

use crate::artifact::ArtifactId;
use crate::builder::{NavMeshBuilder, NoSources, SourceCollector};
use crate::config::BakeConfig;
use crate::coordinator::StageCoordinator;
use crate::error::{BakeError, Result};
use crate::ledger::OwnershipLedger;
use crate::scheduler::{BakeEvent, BakeOperationInfo, BakeScheduler};
use crate::stage::{ContextId, StageEvent, StageListener, StageSignal};
use crate::store::ArtifactStore;
use crate::surface::SurfaceId;
use crate::tick::UpdateQueue;
use crate::world::SceneWorld;

/// Bakes nav mesh surfaces and keeps their artifacts consistent across stages
pub struct NavBakeService<B: NavMeshBuilder, S: ArtifactStore> {
    config: BakeConfig,
    builder: B,
    store: S,
    collector: Box<dyn SourceCollector>,
    scheduler: BakeScheduler,
    ledger: OwnershipLedger,
    coordinator: StageCoordinator,
}

impl<B: NavMeshBuilder, S: ArtifactStore> NavBakeService<B, S> {
    /// Create a service ticked through `queue`
    pub fn new(config: BakeConfig, builder: B, store: S, queue: Arc<UpdateQueue>) -> Self {
        Self {
            config,
            builder,
            store,
            collector: Box::new(NoSources),
            scheduler: BakeScheduler::new(queue),
            ledger: OwnershipLedger::new(),
            coordinator: StageCoordinator::new(),
        }
    }

    /// Use `collector` to gather build sources
    pub fn with_collector(mut self, collector: impl SourceCollector + 'static) -> Self {
        self.collector = Box::new(collector);
        self
    }

    /// Start baking `surfaces`. Every surface is validated before any bake
    /// starts; on error nothing is started.
    pub fn start_bake(
        &mut self,
        world: &SceneWorld,
        surfaces: &[SurfaceId],
    ) -> Result<Vec<ArtifactId>> {
        for surface in surfaces {
            self.validate_target(world, *surface)?;
        }

        let mut targets = Vec::with_capacity(surfaces.len());
        for surface in surfaces {
            if let Some(ctx) = self.context_of(world, *surface) {
                self.ledger.record_first_touch(ctx, *surface, world);
            }
            let target = self.scheduler.start_bake(
                world,
                *surface,
                &self.builder,
                self.collector.as_ref(),
                &self.store,
            )?;
            targets.push(target);
        }
        self.coordinator.refresh(&self.ledger);
        Ok(targets)
    }

    /// Finish whatever bakes completed since the last update
    pub fn tick(&mut self, world: &mut SceneWorld) -> Vec<BakeEvent> {
        let events = self
            .scheduler
            .poll(world, &mut self.ledger, &self.store, &self.config);
        self.coordinator.refresh(&self.ledger);
        events
    }

    /// Cancel the bake of a surface
    pub fn cancel(&mut self, surface: SurfaceId) -> bool {
        self.scheduler.cancel(surface)
    }

    /// Check if a bake is running for the surface
    pub fn is_baking(&self, surface: SurfaceId) -> bool {
        self.scheduler.is_baking(surface)
    }

    /// Progress of a running bake
    pub fn bake_progress(&self, surface: SurfaceId) -> Option<f32> {
        self.scheduler.progress(surface)
    }

    /// All running bakes
    pub fn bake_operations(&self) -> Vec<BakeOperationInfo> {
        self.scheduler.operations()
    }

    /// Remove the baked data of `surfaces`. Running bakes of them are
    /// cancelled first.
    pub fn clear_surfaces(&mut self, world: &mut SceneWorld, surfaces: &[SurfaceId]) -> Result<()> {
        for surface in surfaces {
            if !world.contains(*surface) {
                return Err(BakeError::UnknownSurface(*surface));
            }
        }

        for surface in surfaces {
            let surface = *surface;
            self.scheduler.cancel(surface);

            let ctx = self.context_of(world, surface);
            if let Some(ctx) = ctx {
                self.ledger.record_first_touch(ctx, surface, world);
            }

            let had_data = world.artifact(surface).is_some();
            let stale = self.ledger.artifact_to_delete_on_swap(ctx, surface, world);

            world.remove_data(surface);
            world.set_artifact(surface, None)?;
            world.refresh_inheritors(surface);
            if let Some(ctx) = ctx {
                self.ledger.note_swap(ctx, surface, None);
            }

            if let Some(old) = stale {
                if let Err(e) = self.store.delete_artifact(old) {
                    log::warn!("Failed to delete cleared {}: {}", old, e);
                }
            }
            if had_data {
                world.mark_dirty(surface);
            }
            log::info!("Cleared nav mesh data of {}", surface);
        }

        self.coordinator.refresh(&self.ledger);
        Ok(())
    }

    /// Whether the surface still shows the artifact it had when its stage
    /// first touched it. `false` outside a stage or before any touch.
    pub fn is_entry_for_current_artifact(&self, world: &SceneWorld, surface: SurfaceId) -> bool {
        match self.context_of(world, surface) {
            Some(ctx) => self.ledger.is_entry_for_current_artifact(ctx, surface, world),
            None => false,
        }
    }

    /// Stored artifacts no live surface references. Never deletes them.
    pub fn orphaned_artifacts(&self, world: &SceneWorld) -> Vec<ArtifactId> {
        let referenced = world.referenced_artifacts();
        self.store
            .artifact_ids()
            .into_iter()
            .filter(|id| !referenced.contains(id))
            .collect()
    }

    /// Cancel all bakes and forget all ledger state
    pub fn reset(&mut self) {
        self.scheduler.reset();
        self.ledger.clear();
        self.coordinator.refresh(&self.ledger);
    }

    /// Active bake configuration
    pub fn config(&self) -> &BakeConfig {
        &self.config
    }

    /// Build routine used for new bakes
    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Storage the artifacts are persisted in
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ownership ledger of the open stages
    pub fn ledger(&self) -> &OwnershipLedger {
        &self.ledger
    }

    /// Scheduler tracking the running bakes
    pub fn scheduler(&self) -> &BakeScheduler {
        &self.scheduler
    }

    /// Whether the stage save/close hooks are currently registered
    pub fn hooks_registered(&self) -> bool {
        self.coordinator.hooks_registered()
    }

    fn context_of(&self, world: &SceneWorld, surface: SurfaceId) -> Option<ContextId> {
        if world.is_part_of_context(surface) {
            world.surface(surface).and_then(|s| s.context())
        } else {
            None
        }
    }

    fn validate_target(&self, world: &SceneWorld, surface: SurfaceId) -> Result<()> {
        if !world.contains(surface) {
            return Err(BakeError::UnknownSurface(surface));
        }
        if world.target_folder(surface).is_none() && self.config.fallback_folder.is_none() {
            return Err(BakeError::InvalidTarget {
                surface,
                reason: "surface is neither in a saved scene nor in a template".to_string(),
            });
        }
        Ok(())
    }
}

impl<B: NavMeshBuilder, S: ArtifactStore> StageListener for NavBakeService<B, S> {
    fn is_subscribed(&self, signal: StageSignal) -> bool {
        self.coordinator.is_subscribed(signal)
    }

    fn on_stage_event(&mut self, event: StageEvent, world: &mut SceneWorld) {
        match event {
            StageEvent::Entering(ctx) => self.coordinator.on_entering(ctx, &mut self.ledger),
            StageEvent::Saving(ctx) => {
                self.coordinator
                    .on_saving(ctx, world, &mut self.ledger, &self.store);
            }
            StageEvent::Closing(ctx) => {
                self.coordinator.on_closing(
                    ctx,
                    world,
                    &mut self.ledger,
                    &self.store,
                    &mut self.scheduler,
                );
            }
        }
    }
}
