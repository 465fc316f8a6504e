//! Build routine interface.
//!
//! Turning collected geometry into a nav mesh is not done here. The bake
//! services only need a routine that hands back a pollable operation; the
//! threaded grid builder is a reference implementation good enough for
//! editor previews and tests.

use crate::artifact::BakedNavMesh;
use crate::surface::{Bounds, BuildSettings, Pose, Surface};

/// Geometry gathered for a bake. Opaque to the bake bookkeeping.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildSource {
    /// Area tag of the geometry
    pub area: u8,
    /// World-space bounds of the geometry
    pub bounds: Bounds,
}

/// Gathers build sources for a surface
pub trait SourceCollector: Send + Sync {
    /// Collect sources according to the surface's collection mode
    fn collect(&self, surface: &Surface) -> Vec<BuildSource>;
}

impl<F> SourceCollector for F
where
    F: Fn(&Surface) -> Vec<BuildSource> + Send + Sync,
{
    fn collect(&self, surface: &Surface) -> Vec<BuildSource> {
        self(surface)
    }
}

/// Collector that never finds geometry
pub struct NoSources;

impl SourceCollector for NoSources {
    fn collect(&self, _surface: &Surface) -> Vec<BuildSource> {
        Vec::new()
    }
}

/// Terminal result of a build operation
#[derive(Clone, Debug, PartialEq)]
pub enum BuildOutcome {
    /// Build finished and produced a payload
    Completed(BakedNavMesh),
    /// Build routine reported an error
    Failed(String),
    /// Build was cancelled before finishing
    Cancelled,
}

/// Handle to an in-flight asynchronous build
pub trait BuildOperation: Send {
    /// Non-blocking completion check
    fn is_done(&self) -> bool;

    /// Progress in `[0, 1]`
    fn progress(&self) -> f32;

    /// Request cancellation. Best effort.
    fn cancel(&mut self);

    /// Take the outcome. `None` while the build is still running, and after
    /// the outcome has been taken once.
    fn poll(&mut self) -> Option<BuildOutcome>;
}

/// The external nav mesh build routine
pub trait NavMeshBuilder: Send + Sync {
    /// Build synchronously. Used with no sources to create the empty payload
    /// a bake writes into.
    fn build(
        &self,
        settings: &BuildSettings,
        sources: &[BuildSource],
        bounds: Bounds,
        pose: Pose,
    ) -> BakedNavMesh;

    /// Start rebuilding `target` asynchronously
    fn update_async(
        &self,
        target: BakedNavMesh,
        settings: &BuildSettings,
        sources: Vec<BuildSource>,
        bounds: Bounds,
    ) -> Box<dyn BuildOperation>;
}

#[cfg(feature = "threaded-builder")]
pub use threaded::{GridBuildOperation, ThreadedGridBuilder};

#[cfg(feature = "threaded-builder")]
mod threaded {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    use crossbeam_channel::{Receiver, TryRecvError};

    use super::*;

    /// Builds a flat quad grid covering the collected geometry on a worker thread
    pub struct ThreadedGridBuilder {
        /// Grid cell size, in world units
        pub cell_size: f32,
    }

    impl ThreadedGridBuilder {
        /// Create a builder with the given cell size
        pub fn new(cell_size: f32) -> Self {
            Self { cell_size }
        }
    }

    impl Default for ThreadedGridBuilder {
        fn default() -> Self {
            Self::new(1.0)
        }
    }

    impl NavMeshBuilder for ThreadedGridBuilder {
        fn build(
            &self,
            settings: &BuildSettings,
            sources: &[BuildSource],
            bounds: Bounds,
            _pose: Pose,
        ) -> BakedNavMesh {
            let mut mesh = BakedNavMesh::empty(settings, bounds);
            if let Some(covered) = covered_bounds(settings, sources, bounds) {
                fill_grid(&mut mesh, covered, self.cell_size, &AtomicBool::new(false), |_| {});
            }
            mesh
        }

        fn update_async(
            &self,
            target: BakedNavMesh,
            settings: &BuildSettings,
            sources: Vec<BuildSource>,
            bounds: Bounds,
        ) -> Box<dyn BuildOperation> {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let cancel = Arc::new(AtomicBool::new(false));
            let done = Arc::new(AtomicBool::new(false));
            let progress = Arc::new(AtomicU32::new(0f32.to_bits()));

            let settings = settings.clone();
            let cell_size = self.cell_size;
            let thread_cancel = cancel.clone();
            let thread_done = done.clone();
            let thread_progress = progress.clone();

            std::thread::spawn(move || {
                // Declared before `tx` so the sender is gone once `done` is set
                let _done = DoneOnExit(thread_done);
                let tx = tx;
                let mut mesh = target;
                mesh.agent_type = settings.agent_type;
                mesh.area = settings.default_area;
                mesh.vertices.clear();
                mesh.polygons.clear();

                let outcome = match covered_bounds(&settings, &sources, bounds) {
                    Some(covered) if cell_size > 0.0 => {
                        mesh.bounds = covered;
                        fill_grid(&mut mesh, covered, cell_size, &thread_cancel, |p| {
                            thread_progress.store(p.to_bits(), Ordering::Relaxed)
                        });
                        if thread_cancel.load(Ordering::Acquire) {
                            BuildOutcome::Cancelled
                        } else {
                            BuildOutcome::Completed(mesh)
                        }
                    }
                    Some(_) => BuildOutcome::Failed(format!("invalid cell size {}", cell_size)),
                    None => BuildOutcome::Completed(mesh),
                };

                thread_progress.store(1f32.to_bits(), Ordering::Relaxed);
                let _ = tx.send(outcome);
            });

            Box::new(GridBuildOperation {
                receiver: rx,
                cancel,
                done,
                progress,
                taken: false,
            })
        }
    }

    /// Flags the operation done when the worker exits, including by panic
    struct DoneOnExit(Arc<AtomicBool>);

    impl Drop for DoneOnExit {
        fn drop(&mut self) {
            self.0.store(true, Ordering::Release);
        }
    }

    /// Operation handle returned by [`ThreadedGridBuilder`]
    pub struct GridBuildOperation {
        receiver: Receiver<BuildOutcome>,
        cancel: Arc<AtomicBool>,
        done: Arc<AtomicBool>,
        progress: Arc<AtomicU32>,
        taken: bool,
    }

    impl BuildOperation for GridBuildOperation {
        fn is_done(&self) -> bool {
            self.taken || self.done.load(Ordering::Acquire)
        }

        fn progress(&self) -> f32 {
            f32::from_bits(self.progress.load(Ordering::Relaxed)).clamp(0.0, 1.0)
        }

        fn cancel(&mut self) {
            self.cancel.store(true, Ordering::Release);
        }

        fn poll(&mut self) -> Option<BuildOutcome> {
            if self.taken {
                return None;
            }
            match self.receiver.try_recv() {
                Ok(outcome) => {
                    self.taken = true;
                    Some(outcome)
                }
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => {
                    self.taken = true;
                    Some(BuildOutcome::Failed("build worker exited".to_string()))
                }
            }
        }
    }

    /// Region to cover: the bake volume in volume mode, otherwise the union of
    /// the sources. `None` when there is nothing to cover.
    fn covered_bounds(
        settings: &BuildSettings,
        sources: &[BuildSource],
        bounds: Bounds,
    ) -> Option<Bounds> {
        use crate::surface::CollectObjects;

        if settings.collect_objects == CollectObjects::Volume {
            let volume = if bounds.is_empty() { settings.bounds } else { bounds };
            return (!volume.is_empty()).then_some(volume);
        }

        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for source in sources {
            let lo = source.bounds.min();
            for axis in 0..3 {
                min[axis] = min[axis].min(lo[axis]);
                max[axis] = max[axis].max(lo[axis] + source.bounds.size[axis]);
            }
        }
        if sources.is_empty() {
            return None;
        }

        let center = [
            (min[0] + max[0]) * 0.5,
            (min[1] + max[1]) * 0.5,
            (min[2] + max[2]) * 0.5,
        ];
        let size = [max[0] - min[0], (max[1] - min[1]).max(f32::EPSILON), max[2] - min[2]];
        let covered = Bounds::new(center, size);
        (!covered.is_empty()).then_some(covered)
    }

    fn fill_grid(
        mesh: &mut BakedNavMesh,
        bounds: Bounds,
        cell_size: f32,
        cancel: &AtomicBool,
        mut report: impl FnMut(f32),
    ) {
        let min = bounds.min();
        let cols = (bounds.size[0] / cell_size).ceil().max(1.0) as u32;
        let rows = (bounds.size[2] / cell_size).ceil().max(1.0) as u32;
        let y = bounds.center[1];

        for row in 0..=rows {
            for col in 0..=cols {
                let x = min[0] + (col as f32 * cell_size).min(bounds.size[0]);
                let z = min[2] + (row as f32 * cell_size).min(bounds.size[2]);
                mesh.vertices.push([x, y, z]);
            }
        }

        let stride = cols + 1;
        for row in 0..rows {
            if cancel.load(Ordering::Acquire) {
                return;
            }
            for col in 0..cols {
                let base = row * stride + col;
                mesh.polygons.push([base, base + 1, base + stride + 1, base + stride]);
            }
            report((row + 1) as f32 / rows as f32);
        }
    }

}
