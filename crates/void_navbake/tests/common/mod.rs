//! Shared fixtures for the void_navbake integration tests

#![allow(dead_code)]

use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use void_navbake::*;

/// Initialise logging once per test binary
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct ScriptState {
    target: BakedNavMesh,
    outcome: Option<BuildOutcome>,
    cancelled: bool,
    taken: bool,
    progress: f32,
}

/// Test-side handle of one scripted build operation
#[derive(Clone)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    /// Finish the build with a single-quad mesh
    pub fn complete(&self) {
        let mut state = self.state.lock();
        if state.outcome.is_none() && !state.taken {
            let mut mesh = state.target.clone();
            mesh.vertices = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]];
            mesh.polygons = vec![[0, 1, 2, 3]];
            state.outcome = Some(BuildOutcome::Completed(mesh));
            state.progress = 1.0;
        }
    }

    /// Finish the build with an error
    pub fn fail(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.outcome.is_none() && !state.taken {
            state.outcome = Some(BuildOutcome::Failed(reason.to_string()));
        }
    }

    /// Have the build routine give up on its own, without a caller cancel
    pub fn cancel_by_routine(&self) {
        let mut state = self.state.lock();
        if state.outcome.is_none() && !state.taken {
            state.outcome = Some(BuildOutcome::Cancelled);
        }
    }

    pub fn set_progress(&self, progress: f32) {
        self.state.lock().progress = progress;
    }

    pub fn was_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

struct ScriptedOperation {
    state: Arc<Mutex<ScriptState>>,
}

impl BuildOperation for ScriptedOperation {
    fn is_done(&self) -> bool {
        let state = self.state.lock();
        state.taken || state.outcome.is_some()
    }

    fn progress(&self) -> f32 {
        self.state.lock().progress
    }

    fn cancel(&mut self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        if state.outcome.is_none() && !state.taken {
            state.outcome = Some(BuildOutcome::Cancelled);
        }
    }

    fn poll(&mut self) -> Option<BuildOutcome> {
        let mut state = self.state.lock();
        let outcome = state.outcome.take();
        if outcome.is_some() {
            state.taken = true;
        }
        outcome
    }
}

/// Build routine whose operations only finish when the test says so
#[derive(Clone, Default)]
pub struct ScriptedBuilder {
    handles: Arc<Mutex<Vec<ScriptHandle>>>,
}

impl ScriptedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles of every operation started so far, oldest first
    pub fn handles(&self) -> Vec<ScriptHandle> {
        self.handles.lock().clone()
    }

    /// Handle of the most recently started operation
    pub fn last(&self) -> ScriptHandle {
        self.handles.lock().last().cloned().expect("no build was started")
    }

    /// Complete every operation started so far
    pub fn complete_all(&self) {
        for handle in self.handles() {
            handle.complete();
        }
    }
}

impl NavMeshBuilder for ScriptedBuilder {
    fn build(
        &self,
        settings: &BuildSettings,
        _sources: &[BuildSource],
        bounds: Bounds,
        _pose: Pose,
    ) -> BakedNavMesh {
        BakedNavMesh::empty(settings, bounds)
    }

    fn update_async(
        &self,
        target: BakedNavMesh,
        _settings: &BuildSettings,
        _sources: Vec<BuildSource>,
        _bounds: Bounds,
    ) -> Box<dyn BuildOperation> {
        let state = Arc::new(Mutex::new(ScriptState {
            target,
            ..ScriptState::default()
        }));
        self.handles.lock().push(ScriptHandle { state: state.clone() });
        Box::new(ScriptedOperation { state })
    }
}

/// In-memory store whose deletions can be made to fail
#[derive(Default)]
pub struct TestStore {
    inner: MemoryArtifactStore,
    fail_deletes: AtomicBool,
}

impl TestStore {
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::Relaxed);
    }
}

impl Deref for TestStore {
    type Target = MemoryArtifactStore;

    fn deref(&self) -> &MemoryArtifactStore {
        &self.inner
    }
}

impl ArtifactStore for TestStore {
    fn allocate(&self) -> ArtifactId {
        self.inner.allocate()
    }

    fn create_asset(
        &self,
        id: ArtifactId,
        payload: &BakedNavMesh,
        path: &Path,
    ) -> std::result::Result<(), StorageError> {
        self.inner.create_asset(id, payload, path)
    }

    fn delete_asset(&self, path: &Path) -> std::result::Result<(), StorageError> {
        if self.fail_deletes.load(Ordering::Relaxed) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{:?} is read-only", path),
            )));
        }
        self.inner.delete_asset(path)
    }

    fn generate_unique_asset_path(&self, base: &Path) -> PathBuf {
        self.inner.generate_unique_asset_path(base)
    }

    fn asset_path(&self, id: ArtifactId) -> Option<PathBuf> {
        self.inner.asset_path(id)
    }

    fn load(&self, id: ArtifactId) -> std::result::Result<BakedNavMesh, StorageError> {
        self.inner.load(id)
    }

    fn artifact_ids(&self) -> Vec<ArtifactId> {
        self.inner.artifact_ids()
    }
}

pub type TestService = NavBakeService<ScriptedBuilder, TestStore>;

/// Editing session: a saved main scene, a bake service and its update queue
pub struct Session {
    pub world: SceneWorld,
    pub service: TestService,
    pub builder: ScriptedBuilder,
    pub queue: Arc<UpdateQueue>,
}

impl Session {
    pub fn new() -> Self {
        init_logging();
        let builder = ScriptedBuilder::new();
        let queue = Arc::new(UpdateQueue::new());
        let service = NavBakeService::new(
            BakeConfig::default(),
            builder.clone(),
            TestStore::default(),
            queue.clone(),
        );
        Self {
            world: SceneWorld::new(Some(PathBuf::from("Assets/Scenes/Main.scene"))),
            service,
            builder,
            queue,
        }
    }

    /// Bake `surfaces`, complete the builds and tick until they are handled
    pub fn bake(&mut self, surfaces: &[SurfaceId]) -> Vec<BakeEvent> {
        self.service
            .start_bake(&self.world, surfaces)
            .expect("bake should start");
        self.builder.complete_all();
        self.tick()
    }

    pub fn tick(&mut self) -> Vec<BakeEvent> {
        self.service.tick(&mut self.world)
    }

    pub fn open_stage(&mut self, template: TemplateId) -> ContextId {
        self.world
            .open_stage(template, &mut self.service)
            .expect("stage should open")
    }

    pub fn save_stage(&mut self, ctx: ContextId) {
        self.world
            .save_stage(ctx, &mut self.service)
            .expect("stage should save");
    }

    pub fn close_stage(&mut self, ctx: ContextId) {
        self.world
            .close_stage(ctx, &mut self.service)
            .expect("stage should close");
    }

    pub fn stored(&self, artifact: ArtifactId) -> bool {
        self.service.store().contains(artifact)
    }

    /// Template "Plane" with one baked defining surface
    pub fn baked_template(&mut self) -> (TemplateId, SurfaceId, ArtifactId) {
        let template = self
            .world
            .create_template("Plane", "Assets/Prefabs/Plane.prefab");
        let defining = self
            .world
            .add_template_surface(template, "Plane", BuildSettings::default(), None)
            .expect("template exists");
        self.bake(&[defining]);
        let artifact = self.world.artifact(defining).expect("template was baked");
        (template, defining, artifact)
    }
}
