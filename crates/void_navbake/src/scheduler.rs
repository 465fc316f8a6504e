//! Bake job scheduler.
//!
//! Tracks in-flight asynchronous bakes, one per surface, and finishes them
//! from the editor update: persist the new artifact, swap the surface over to
//! it and delete whatever it replaced. The scheduler only holds an update
//! task while it has jobs, so an idle editor never polls it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::{ArtifactId, BakedNavMesh};
use crate::builder::{BuildOperation, BuildOutcome, NavMeshBuilder, SourceCollector};
use crate::config::BakeConfig;
use crate::error::{BakeError, Result};
use crate::ledger::OwnershipLedger;
use crate::stage::ContextId;
use crate::store::ArtifactStore;
use crate::surface::{Bounds, CollectObjects, SurfaceId};
use crate::tick::{TaskId, UpdateQueue};
use crate::world::SceneWorld;

/// Name the scheduler registers its update task under
pub const BAKE_TASK_NAME: &str = "navmesh-bake";

/// Lifecycle of a bake job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Started, not polled yet
    Pending,
    /// Build still in progress
    Running,
    /// Finished and handled
    Done,
    /// Cancelled, failed or superseded
    Cancelled,
}

/// An in-flight bake of one surface
pub struct BakeJob {
    surface: SurfaceId,
    context: Option<ContextId>,
    target: ArtifactId,
    operation: Box<dyn BuildOperation>,
    state: JobState,
}

impl BakeJob {
    /// Surface being baked
    pub fn surface(&self) -> SurfaceId {
        self.surface
    }

    /// Stage the surface lived in when the bake started
    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    /// Artifact the bake will produce
    pub fn target(&self) -> ArtifactId {
        self.target
    }

    /// Current job state
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Build progress in `[0, 1]`
    pub fn progress(&self) -> f32 {
        self.operation.progress()
    }
}

/// Snapshot of an in-flight bake for progress displays
#[derive(Clone, Debug, PartialEq)]
pub struct BakeOperationInfo {
    pub surface: SurfaceId,
    pub target: ArtifactId,
    pub state: JobState,
    pub progress: f32,
}

/// Result of a bake handled during a tick
#[derive(Clone, Debug, PartialEq)]
pub enum BakeEvent {
    /// The surface now references `artifact`, persisted at `path`
    Completed {
        surface: SurfaceId,
        artifact: ArtifactId,
        path: PathBuf,
        deleted: Option<ArtifactId>,
    },
    /// The build or its persistence failed, the surface kept its artifact
    Failed { surface: SurfaceId, reason: String },
    /// The surface or its stage went away before the bake finished
    Dropped { surface: SurfaceId },
}

impl BakeEvent {
    /// Surface the event is about
    pub fn surface(&self) -> SurfaceId {
        match self {
            BakeEvent::Completed { surface, .. }
            | BakeEvent::Failed { surface, .. }
            | BakeEvent::Dropped { surface } => *surface,
        }
    }
}

/// Tracks bake jobs and completes them on tick
pub struct BakeScheduler {
    jobs: BTreeMap<SurfaceId, BakeJob>,
    queue: Arc<UpdateQueue>,
    task: Option<TaskId>,
}

impl BakeScheduler {
    /// Create a scheduler that registers with `queue` while busy
    pub fn new(queue: Arc<UpdateQueue>) -> Self {
        Self {
            jobs: BTreeMap::new(),
            queue,
            task: None,
        }
    }

    /// Start baking a surface, superseding any bake already running for it.
    /// Returns the artifact the bake will produce.
    pub fn start_bake(
        &mut self,
        world: &SceneWorld,
        surface: SurfaceId,
        builder: &dyn NavMeshBuilder,
        collector: &dyn SourceCollector,
        store: &dyn ArtifactStore,
    ) -> Result<ArtifactId> {
        let s = world.surface(surface).ok_or(BakeError::UnknownSurface(surface))?;

        if let Some(mut old) = self.jobs.remove(&surface) {
            old.operation.cancel();
            log::info!("Superseding bake of {} into {}", surface, old.target);
        }

        let sources = collector.collect(s);
        let bounds = match s.settings.collect_objects {
            CollectObjects::Volume => s.settings.bounds,
            _ => Bounds::empty(),
        };
        let empty = builder.build(&s.settings, &[], Bounds::empty(), s.pose);
        let operation = builder.update_async(empty, &s.settings, sources, bounds);

        let target = store.allocate();
        let context = if world.is_part_of_context(surface) {
            s.context()
        } else {
            None
        };

        log::info!("Baking {} ('{}') into {}", surface, s.name, target);
        self.jobs.insert(
            surface,
            BakeJob {
                surface,
                context,
                target,
                operation,
                state: JobState::Pending,
            },
        );
        self.ensure_registered();
        Ok(target)
    }

    /// Cancel the bake of a surface. Nothing is swapped afterwards, even if
    /// the build already finished. Returns `false` if no bake was running.
    pub fn cancel(&mut self, surface: SurfaceId) -> bool {
        let cancelled = match self.jobs.remove(&surface) {
            Some(mut job) => {
                job.operation.cancel();
                job.state = JobState::Cancelled;
                log::info!("Cancelled bake of {} into {}", surface, job.target);
                true
            }
            None => false,
        };
        self.release_if_idle();
        cancelled
    }

    /// Cancel every bake started inside `ctx`
    pub fn cancel_context(&mut self, ctx: ContextId) -> usize {
        let doomed: Vec<SurfaceId> = self
            .jobs
            .values()
            .filter(|job| job.context == Some(ctx))
            .map(|job| job.surface)
            .collect();
        for surface in &doomed {
            self.cancel(*surface);
        }
        doomed.len()
    }

    /// Check for finished builds and complete them. Called once per editor
    /// update.
    pub fn poll(
        &mut self,
        world: &mut SceneWorld,
        ledger: &mut OwnershipLedger,
        store: &dyn ArtifactStore,
        config: &BakeConfig,
    ) -> Vec<BakeEvent> {
        let mut events = Vec::new();
        let surfaces: Vec<SurfaceId> = self.jobs.keys().copied().collect();

        for surface in surfaces {
            let Some(job) = self.jobs.get_mut(&surface) else {
                continue;
            };

            let stale_context = job.context.is_some_and(|ctx| world.stage(ctx).is_none());
            if !world.contains(surface) || stale_context {
                job.operation.cancel();
                log::warn!("Dropping bake of {}: target no longer exists", surface);
                self.jobs.remove(&surface);
                events.push(BakeEvent::Dropped { surface });
                continue;
            }

            if !job.operation.is_done() {
                job.state = JobState::Running;
                continue;
            }

            let Some(outcome) = job.operation.poll() else {
                job.state = JobState::Running;
                continue;
            };

            let Some(mut job) = self.jobs.remove(&surface) else {
                continue;
            };
            let event = match outcome {
                BuildOutcome::Completed(mesh) => {
                    let event = complete(&job, mesh, world, ledger, store, config);
                    job.state = JobState::Done;
                    event
                }
                BuildOutcome::Failed(reason) => {
                    log::warn!("Bake of {} failed: {}", surface, reason);
                    job.state = JobState::Cancelled;
                    BakeEvent::Failed { surface, reason }
                }
                BuildOutcome::Cancelled => {
                    log::warn!("Bake of {} was cancelled by the build routine", surface);
                    job.state = JobState::Cancelled;
                    BakeEvent::Failed {
                        surface,
                        reason: "cancelled".to_string(),
                    }
                }
            };
            events.push(event);
        }

        self.release_if_idle();
        events
    }

    /// Check if a bake is running for the surface
    pub fn is_baking(&self, surface: SurfaceId) -> bool {
        self.jobs.contains_key(&surface)
    }

    /// Progress of the surface's bake
    pub fn progress(&self, surface: SurfaceId) -> Option<f32> {
        self.jobs.get(&surface).map(BakeJob::progress)
    }

    /// Look up the job of a surface
    pub fn job(&self, surface: SurfaceId) -> Option<&BakeJob> {
        self.jobs.get(&surface)
    }

    /// All in-flight bakes
    pub fn operations(&self) -> Vec<BakeOperationInfo> {
        self.jobs
            .values()
            .map(|job| BakeOperationInfo {
                surface: job.surface,
                target: job.target,
                state: job.state,
                progress: job.progress(),
            })
            .collect()
    }

    /// Number of tracked jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check if no job is tracked
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether the scheduler currently holds an update task
    pub fn is_registered(&self) -> bool {
        self.task.is_some_and(|task| self.queue.is_registered(task))
    }

    /// Cancel everything and release the update task
    pub fn reset(&mut self) {
        for job in self.jobs.values_mut() {
            job.operation.cancel();
        }
        self.jobs.clear();
        self.release_if_idle();
    }

    fn ensure_registered(&mut self) {
        if self.task.is_none() {
            self.task = Some(self.queue.register(BAKE_TASK_NAME));
        }
    }

    fn release_if_idle(&mut self) {
        if self.jobs.is_empty() {
            if let Some(task) = self.task.take() {
                self.queue.deregister(task);
            }
        }
    }
}

impl Drop for BakeScheduler {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Persist the new artifact, then swap the surface over and delete what it
/// replaced. Nothing is swapped unless the artifact was written.
fn complete(
    job: &BakeJob,
    mesh: BakedNavMesh,
    world: &mut SceneWorld,
    ledger: &mut OwnershipLedger,
    store: &dyn ArtifactStore,
    config: &BakeConfig,
) -> BakeEvent {
    let surface = job.surface;
    let failed = |reason: String| {
        log::error!("Could not store bake of {}: {}", surface, reason);
        BakeEvent::Failed { surface, reason }
    };

    let Some(name) = world.surface(surface).map(|s| s.name.clone()) else {
        return BakeEvent::Dropped { surface };
    };
    let Some(folder) = world
        .target_folder(surface)
        .or_else(|| config.fallback_folder.clone())
    else {
        return failed("no folder to store the nav mesh in".to_string());
    };

    let path = store.generate_unique_asset_path(&folder.join(config.asset_file_name(&name)));
    // The stage may have been saved since the bake started
    if let Some(ctx) = job.context {
        ledger.record_first_touch(ctx, surface, world);
    }
    let stale = ledger.artifact_to_delete_on_swap(job.context, surface, world);

    if let Err(e) = store.create_asset(job.target, &mesh, &path) {
        return failed(e.to_string());
    }

    world.remove_data(surface);
    if let Err(e) = world.set_artifact(surface, Some(job.target)) {
        if let Err(cleanup) = store.delete_artifact(job.target) {
            log::warn!("Failed to remove unused {}: {}", job.target, cleanup);
        }
        return failed(e.to_string());
    }
    world.add_data(surface);
    world.refresh_inheritors(surface);
    if let Some(ctx) = job.context {
        ledger.note_swap(ctx, surface, Some(job.target));
    }

    let deleted = stale.filter(|old| match store.delete_artifact(*old) {
        Ok(removed) => removed,
        Err(e) => {
            log::warn!("Failed to delete replaced {}: {}", old, e);
            false
        }
    });
    world.mark_dirty(surface);

    log::info!(
        "Baked {} into {} at {:?} ({} polygons)",
        surface,
        job.target,
        path,
        mesh.polygon_count()
    );
    BakeEvent::Completed {
        surface,
        artifact: job.target,
        path,
        deleted,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::builder::{BuildSource, NoSources};
    use crate::store::MemoryArtifactStore;
    use crate::surface::{BuildSettings, Pose};

    /// Builder whose operations finish as soon as `finished` is set
    struct GatedBuilder {
        finished: Arc<AtomicBool>,
        fail: bool,
    }

    struct GatedOperation {
        finished: Arc<AtomicBool>,
        outcome: Option<BuildOutcome>,
    }

    impl BuildOperation for GatedOperation {
        fn is_done(&self) -> bool {
            self.finished.load(Ordering::Acquire)
        }

        fn progress(&self) -> f32 {
            if self.is_done() { 1.0 } else { 0.5 }
        }

        fn cancel(&mut self) {
            self.outcome = Some(BuildOutcome::Cancelled);
        }

        fn poll(&mut self) -> Option<BuildOutcome> {
            if self.is_done() { self.outcome.take() } else { None }
        }
    }

    impl NavMeshBuilder for GatedBuilder {
        fn build(&self, settings: &BuildSettings, _: &[BuildSource], bounds: Bounds, _: Pose) -> BakedNavMesh {
            BakedNavMesh::empty(settings, bounds)
        }

        fn update_async(
            &self,
            mut target: BakedNavMesh,
            _: &BuildSettings,
            _: Vec<BuildSource>,
            _: Bounds,
        ) -> Box<dyn BuildOperation> {
            target.polygons.push([0, 1, 2, 3]);
            let outcome = if self.fail {
                BuildOutcome::Failed("no geometry".to_string())
            } else {
                BuildOutcome::Completed(target)
            };
            Box::new(GatedOperation {
                finished: self.finished.clone(),
                outcome: Some(outcome),
            })
        }
    }

    struct Harness {
        world: SceneWorld,
        store: MemoryArtifactStore,
        ledger: OwnershipLedger,
        queue: Arc<UpdateQueue>,
        config: BakeConfig,
        finished: Arc<AtomicBool>,
    }

    fn harness() -> Harness {
        Harness {
            world: SceneWorld::new(Some(PathBuf::from("Assets/Main.scene"))),
            store: MemoryArtifactStore::new(),
            ledger: OwnershipLedger::new(),
            queue: Arc::new(UpdateQueue::new()),
            config: BakeConfig::default(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    impl Harness {
        fn builder(&self, fail: bool) -> GatedBuilder {
            GatedBuilder {
                finished: self.finished.clone(),
                fail,
            }
        }

        fn poll(&mut self, scheduler: &mut BakeScheduler) -> Vec<BakeEvent> {
            scheduler.poll(&mut self.world, &mut self.ledger, &self.store, &self.config)
        }
    }

    #[test]
    fn test_bake_completes_on_tick() {
        let mut h = harness();
        let plane = h.world.spawn_surface("Plane", BuildSettings::default());
        h.world.mark_scene_saved();
        let mut scheduler = BakeScheduler::new(h.queue.clone());

        let target = scheduler
            .start_bake(&h.world, plane, &h.builder(false), &NoSources, &h.store)
            .unwrap();
        assert!(scheduler.is_baking(plane));
        assert!(scheduler.is_registered());
        assert_eq!(h.queue.task_names(), vec![BAKE_TASK_NAME]);

        assert!(h.poll(&mut scheduler).is_empty());
        assert_eq!(scheduler.job(plane).unwrap().state(), JobState::Running);

        h.finished.store(true, Ordering::Release);
        let events = h.poll(&mut scheduler);
        assert_eq!(
            events,
            vec![BakeEvent::Completed {
                surface: plane,
                artifact: target,
                path: PathBuf::from("Assets/Main/NavMesh-Plane.asset"),
                deleted: None,
            }]
        );
        assert_eq!(h.world.artifact(plane), Some(target));
        assert_eq!(h.world.runtime_artifact(plane), Some(target));
        assert!(h.world.is_scene_dirty());
        assert!(!scheduler.is_baking(plane));
        assert!(h.queue.is_empty());
    }

    #[test]
    fn test_rebake_deletes_previous_artifact() {
        let mut h = harness();
        let plane = h.world.spawn_surface("Plane", BuildSettings::default());
        let mut scheduler = BakeScheduler::new(h.queue.clone());
        h.finished.store(true, Ordering::Release);

        let first = scheduler
            .start_bake(&h.world, plane, &h.builder(false), &NoSources, &h.store)
            .unwrap();
        h.poll(&mut scheduler);
        let second = scheduler
            .start_bake(&h.world, plane, &h.builder(false), &NoSources, &h.store)
            .unwrap();
        let events = h.poll(&mut scheduler);

        match &events[0] {
            BakeEvent::Completed { path, deleted, .. } => {
                assert_eq!(path, Path::new("Assets/Main/NavMesh-Plane 1.asset"));
                assert_eq!(*deleted, Some(first));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!h.store.contains(first));
        assert!(h.store.contains(second));
    }

    #[test]
    fn test_cancel_wins_over_finished_build() {
        let mut h = harness();
        let plane = h.world.spawn_surface("Plane", BuildSettings::default());
        let mut scheduler = BakeScheduler::new(h.queue.clone());

        scheduler
            .start_bake(&h.world, plane, &h.builder(false), &NoSources, &h.store)
            .unwrap();
        h.finished.store(true, Ordering::Release);
        assert!(scheduler.cancel(plane));
        assert!(!scheduler.cancel(plane));

        assert!(h.poll(&mut scheduler).is_empty());
        assert_eq!(h.world.artifact(plane), None);
        assert!(h.store.is_empty());
        assert!(!scheduler.is_registered());
    }

    #[test]
    fn test_failed_build_keeps_artifact() {
        let mut h = harness();
        let plane = h.world.spawn_surface("Plane", BuildSettings::default());
        let mut scheduler = BakeScheduler::new(h.queue.clone());
        h.finished.store(true, Ordering::Release);

        scheduler
            .start_bake(&h.world, plane, &h.builder(false), &NoSources, &h.store)
            .unwrap();
        h.poll(&mut scheduler);
        let before = h.world.artifact(plane);

        scheduler
            .start_bake(&h.world, plane, &h.builder(true), &NoSources, &h.store)
            .unwrap();
        let events = h.poll(&mut scheduler);
        assert!(matches!(events[0], BakeEvent::Failed { .. }));
        assert_eq!(h.world.artifact(plane), before);
        assert_eq!(h.store.len(), 1);
    }

    #[test]
    fn test_destroyed_surface_is_dropped() {
        let mut h = harness();
        let plane = h.world.spawn_surface("Plane", BuildSettings::default());
        let mut scheduler = BakeScheduler::new(h.queue.clone());

        scheduler
            .start_bake(&h.world, plane, &h.builder(false), &NoSources, &h.store)
            .unwrap();
        h.world.destroy(plane);
        h.finished.store(true, Ordering::Release);

        assert_eq!(h.poll(&mut scheduler), vec![BakeEvent::Dropped { surface: plane }]);
        assert!(h.store.is_empty());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_superseded_job_is_cancelled() {
        let mut h = harness();
        let plane = h.world.spawn_surface("Plane", BuildSettings::default());
        let mut scheduler = BakeScheduler::new(h.queue.clone());

        let first = scheduler
            .start_bake(&h.world, plane, &h.builder(false), &NoSources, &h.store)
            .unwrap();
        let second = scheduler
            .start_bake(&h.world, plane, &h.builder(false), &NoSources, &h.store)
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.operations()[0].target, second);

        h.finished.store(true, Ordering::Release);
        h.poll(&mut scheduler);
        assert_eq!(h.world.artifact(plane), Some(second));
        assert!(!h.store.contains(first));
    }

    #[test]
    fn test_missing_folder_fails_without_swap() {
        let mut h = harness();
        h.world = SceneWorld::new(None);
        let plane = h.world.spawn_surface("Plane", BuildSettings::default());
        let mut scheduler = BakeScheduler::new(h.queue.clone());
        h.finished.store(true, Ordering::Release);

        scheduler
            .start_bake(&h.world, plane, &h.builder(false), &NoSources, &h.store)
            .unwrap();
        let events = h.poll(&mut scheduler);
        assert!(matches!(events[0], BakeEvent::Failed { .. }));
        assert_eq!(h.world.artifact(plane), None);
        assert!(h.store.is_empty());
    }
}
