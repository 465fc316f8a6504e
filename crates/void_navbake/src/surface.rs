//! Nav mesh surfaces - entities that own a baked artifact reference.

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactId;
use crate::stage::ContextId;

/// Surface identifier. Never reused, so a handle to a destroyed surface
/// stays stale forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u32);

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Surface({})", self.0)
    }
}

/// Which geometry the source collector gathers for a surface
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectObjects {
    /// Everything in the scene
    #[default]
    All,
    /// Only geometry overlapping the surface volume
    Volume,
    /// Only the surface entity's children
    Children,
}

/// Axis-aligned bounds
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub center: [f32; 3],
    pub size: [f32; 3],
}

impl Bounds {
    /// Create bounds from center and size
    pub fn new(center: [f32; 3], size: [f32; 3]) -> Self {
        Self { center, size }
    }

    /// Zero-sized bounds at the origin
    pub fn empty() -> Self {
        Self::default()
    }

    /// Check if the bounds enclose no volume
    pub fn is_empty(&self) -> bool {
        self.size.iter().any(|s| *s <= 0.0)
    }

    /// Minimum corner
    pub fn min(&self) -> [f32; 3] {
        [
            self.center[0] - self.size[0] * 0.5,
            self.center[1] - self.size[1] * 0.5,
            self.center[2] - self.size[2] * 0.5,
        ]
    }
}

/// World placement of a surface
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: [f32; 3],
    /// Rotation quaternion (x, y, z, w)
    pub rotation: [f32; 4],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Settings handed to the build routine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Agent type the mesh is baked for
    pub agent_type: u32,
    /// Area assigned to collected geometry without an explicit area
    pub default_area: u8,
    /// Geometry collection mode
    pub collect_objects: CollectObjects,
    /// Bake volume, used when `collect_objects` is `Volume`
    pub bounds: Bounds,
    /// Voxel size, in world units
    pub voxel_size: f32,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            agent_type: 0,
            default_area: 0,
            collect_objects: CollectObjects::All,
            bounds: Bounds::new([0.0; 3], [10.0, 10.0, 10.0]),
            voxel_size: 1.0 / 6.0,
        }
    }
}

/// A nav mesh surface component and its entity data.
#[derive(Clone, Debug)]
pub struct Surface {
    pub(crate) id: SurfaceId,
    pub name: String,
    pub settings: BuildSettings,
    pub pose: Pose,
    /// Disabled surfaces keep their artifact but never add runtime data
    pub enabled: bool,
    /// Own artifact reference. Only meaningful when the surface has no base
    /// counterpart or overrides it.
    pub(crate) artifact: Option<ArtifactId>,
    /// Template surface this one was instantiated from
    pub(crate) base: Option<SurfaceId>,
    /// Whether `artifact` overrides the value inherited from `base`
    pub(crate) overrides_artifact: bool,
    /// Stage the surface belongs to, `None` for the main scene
    pub(crate) context: Option<ContextId>,
    /// Defining surface stored inside a template asset
    pub(crate) template_asset: bool,
}

impl Surface {
    pub(crate) fn new(id: SurfaceId, name: impl Into<String>, settings: BuildSettings) -> Self {
        Self {
            id,
            name: name.into(),
            settings,
            pose: Pose::default(),
            enabled: true,
            artifact: None,
            base: None,
            overrides_artifact: false,
            context: None,
            template_asset: false,
        }
    }

    /// Surface handle
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// Template counterpart this surface was instantiated from
    pub fn base(&self) -> Option<SurfaceId> {
        self.base
    }

    /// Editing context the surface lives in
    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    /// Whether this is the defining surface of a template asset
    pub fn is_template_asset(&self) -> bool {
        self.template_asset
    }

    /// Whether the surface overrides its inherited artifact
    pub fn overrides_artifact(&self) -> bool {
        self.base.is_some() && self.overrides_artifact
    }
}
