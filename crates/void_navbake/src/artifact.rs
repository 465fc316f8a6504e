//! Baked nav mesh artifacts.
//!
//! The payload is opaque to the bake bookkeeping; only the build routine
//! writes it and only the runtime reads it.

use serde::{Deserialize, Serialize};

use crate::surface::{Bounds, BuildSettings};

/// Unique identifier for a baked artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactId(pub u64);

impl ArtifactId {
    /// Create a new artifact ID
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get raw ID value
    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "nm-{:03}", self.0)
    }
}

/// Baked nav mesh payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BakedNavMesh {
    /// Agent type the mesh was baked for
    pub agent_type: u32,
    /// Area written into every polygon
    pub area: u8,
    /// Baked volume
    pub bounds: Bounds,
    /// Mesh vertices
    pub vertices: Vec<[f32; 3]>,
    /// Polygons as vertex index quads
    pub polygons: Vec<[u32; 4]>,
}

impl BakedNavMesh {
    /// Empty payload for the given settings, filled in later by a build
    pub fn empty(settings: &BuildSettings, bounds: Bounds) -> Self {
        Self {
            agent_type: settings.agent_type,
            area: settings.default_area,
            bounds,
            vertices: Vec::new(),
            polygons: Vec::new(),
        }
    }

    /// Check if nothing walkable was baked
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Number of walkable polygons
    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }
}
