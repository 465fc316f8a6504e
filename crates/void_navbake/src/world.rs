//! Scene world hosting nav mesh surfaces, templates and their instances.
//!
//! This is the editor-side data holder the bake services act on. Templates
//! are authored hierarchies stored as assets; their instances inherit the
//! template surface's artifact until they override it, which is how many
//! placed copies share one baked artifact.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::artifact::ArtifactId;
use crate::error::{BakeError, Result};
use crate::stage::{ContextId, EditingContext};
use crate::surface::{BuildSettings, Surface, SurfaceId};

/// Upper bound on base-counterpart chains (template -> variant -> ...)
const MAX_BASE_DEPTH: usize = 32;

/// Template identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TemplateId(pub u32);

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Template({})", self.0)
    }
}

/// A reusable authored hierarchy stored as an asset
#[derive(Clone, Debug)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    /// Asset path of the template file
    pub asset_path: PathBuf,
    /// Defining surfaces, root first
    pub surfaces: Vec<SurfaceId>,
}

/// The main scene plus template assets and open stages
pub struct SceneWorld {
    scene_path: Option<PathBuf>,
    scene_dirty: bool,
    surfaces: BTreeMap<SurfaceId, Surface>,
    templates: BTreeMap<TemplateId, Template>,
    /// Artifact loaded into the runtime for each surface that added data
    runtime: BTreeMap<SurfaceId, ArtifactId>,
    next_surface: u32,
    next_template: u32,
    pub(crate) stages: BTreeMap<ContextId, EditingContext>,
    pub(crate) active_stage: Option<ContextId>,
    pub(crate) next_context: u32,
    pub(crate) stage_auto_save: bool,
}

impl SceneWorld {
    /// Create a world whose main scene is saved at `scene_path`
    pub fn new(scene_path: Option<PathBuf>) -> Self {
        Self {
            scene_path,
            scene_dirty: false,
            surfaces: BTreeMap::new(),
            templates: BTreeMap::new(),
            runtime: BTreeMap::new(),
            next_surface: 0,
            next_template: 0,
            stages: BTreeMap::new(),
            active_stage: None,
            next_context: 1,
            stage_auto_save: false,
        }
    }

    /// Path of the main scene, `None` while it was never saved
    pub fn scene_path(&self) -> Option<&Path> {
        self.scene_path.as_deref()
    }

    /// Save the main scene under a new path
    pub fn set_scene_path(&mut self, path: impl Into<PathBuf>) {
        self.scene_path = Some(path.into());
    }

    /// Whether the main scene has unsaved changes
    pub fn is_scene_dirty(&self) -> bool {
        self.scene_dirty
    }

    /// Clear the scene dirty flag after the host saved it
    pub fn mark_scene_saved(&mut self) {
        self.scene_dirty = false;
    }

    fn allocate_surface(&mut self) -> SurfaceId {
        let id = SurfaceId(self.next_surface);
        self.next_surface += 1;
        id
    }

    pub(crate) fn insert_surface(&mut self, surface: Surface) {
        self.surfaces.insert(surface.id, surface);
    }

    pub(crate) fn next_surface_id(&mut self) -> SurfaceId {
        self.allocate_surface()
    }

    /// Add a surface to the main scene
    pub fn spawn_surface(&mut self, name: impl Into<String>, settings: BuildSettings) -> SurfaceId {
        let id = self.allocate_surface();
        self.surfaces.insert(id, Surface::new(id, name, settings));
        self.scene_dirty = true;
        id
    }

    /// Create an empty template asset
    pub fn create_template(
        &mut self,
        name: impl Into<String>,
        asset_path: impl Into<PathBuf>,
    ) -> TemplateId {
        let id = TemplateId(self.next_template);
        self.next_template += 1;
        self.templates.insert(
            id,
            Template {
                id,
                name: name.into(),
                asset_path: asset_path.into(),
                surfaces: Vec::new(),
            },
        );
        id
    }

    /// Add a defining surface to a template asset
    pub fn add_template_surface(
        &mut self,
        template: TemplateId,
        name: impl Into<String>,
        settings: BuildSettings,
        artifact: Option<ArtifactId>,
    ) -> Result<SurfaceId> {
        if !self.templates.contains_key(&template) {
            return Err(BakeError::UnknownTemplate(template));
        }
        let id = self.allocate_surface();
        let mut surface = Surface::new(id, name, settings);
        surface.template_asset = true;
        surface.artifact = artifact;
        self.surfaces.insert(id, surface);
        if let Some(t) = self.templates.get_mut(&template) {
            t.surfaces.push(id);
        }
        Ok(id)
    }

    /// Create a template variant whose surfaces inherit from `base`
    pub fn create_variant(
        &mut self,
        base: TemplateId,
        name: impl Into<String>,
        asset_path: impl Into<PathBuf>,
    ) -> Result<TemplateId> {
        let base_surfaces = self
            .templates
            .get(&base)
            .map(|t| t.surfaces.clone())
            .ok_or(BakeError::UnknownTemplate(base))?;

        let variant = self.create_template(name, asset_path);
        for base_surface in base_surfaces {
            let id = self.derive_surface(base_surface)?;
            if let Some(s) = self.surfaces.get_mut(&id) {
                s.template_asset = true;
            }
            if let Some(t) = self.templates.get_mut(&variant) {
                t.surfaces.push(id);
            }
        }
        Ok(variant)
    }

    /// Place an instance of a template in the main scene
    pub fn instantiate(&mut self, template: TemplateId) -> Result<Vec<SurfaceId>> {
        let template_surfaces = self
            .templates
            .get(&template)
            .map(|t| t.surfaces.clone())
            .ok_or(BakeError::UnknownTemplate(template))?;

        let mut placed = Vec::with_capacity(template_surfaces.len());
        for base in template_surfaces {
            let id = self.derive_surface(base)?;
            self.add_data(id);
            placed.push(id);
        }
        self.scene_dirty = true;
        Ok(placed)
    }

    /// Clone a main-scene surface, keeping its template link and overrides
    pub fn duplicate(&mut self, surface: SurfaceId) -> Result<SurfaceId> {
        let mut copy = self
            .surfaces
            .get(&surface)
            .cloned()
            .ok_or(BakeError::UnknownSurface(surface))?;
        let id = self.allocate_surface();
        copy.id = id;
        copy.template_asset = false;
        copy.context = None;
        self.surfaces.insert(id, copy);
        self.add_data(id);
        self.scene_dirty = true;
        Ok(id)
    }

    /// New surface inheriting everything from `base`
    fn derive_surface(&mut self, base: SurfaceId) -> Result<SurfaceId> {
        let source = self.surfaces.get(&base).ok_or(BakeError::UnknownSurface(base))?;
        let id = SurfaceId(self.next_surface);
        let mut surface = Surface::new(id, source.name.clone(), source.settings.clone());
        surface.pose = source.pose;
        surface.enabled = source.enabled;
        surface.base = Some(base);
        self.next_surface += 1;
        self.surfaces.insert(id, surface);
        Ok(id)
    }

    /// Destroy a surface. Its artifact is left in storage.
    pub fn destroy(&mut self, surface: SurfaceId) -> bool {
        self.remove_data(surface);
        match self.surfaces.remove(&surface) {
            Some(s) => {
                match s.context {
                    Some(ctx) => {
                        if let Some(stage) = self.stages.get_mut(&ctx) {
                            stage.dirty = true;
                        }
                    }
                    None if !s.template_asset => self.scene_dirty = true,
                    None => {}
                }
                true
            }
            None => false,
        }
    }

    /// Look up a surface
    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    /// Look up a surface mutably
    pub fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut Surface> {
        self.surfaces.get_mut(&id)
    }

    /// Check if a surface is alive
    pub fn contains(&self, id: SurfaceId) -> bool {
        self.surfaces.contains_key(&id)
    }

    /// All live surfaces
    pub fn surface_ids(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.surfaces.keys().copied()
    }

    /// Look up a template
    pub fn template(&self, id: TemplateId) -> Option<&Template> {
        self.templates.get(&id)
    }

    pub(crate) fn template_mut(&mut self, id: TemplateId) -> Option<&mut Template> {
        self.templates.get_mut(&id)
    }

    /// Template asset a defining surface belongs to
    pub fn template_of(&self, surface: SurfaceId) -> Option<&Template> {
        self.templates.values().find(|t| t.surfaces.contains(&surface))
    }

    /// Template counterpart a surface was instantiated from
    pub fn base_counterpart(&self, surface: SurfaceId) -> Option<SurfaceId> {
        self.surfaces.get(&surface).and_then(|s| s.base)
    }

    /// Current artifact of a surface, following inheritance
    pub fn artifact(&self, surface: SurfaceId) -> Option<ArtifactId> {
        let mut current = self.surfaces.get(&surface)?;
        for _ in 0..MAX_BASE_DEPTH {
            match current.base {
                Some(base) if !current.overrides_artifact => match self.surfaces.get(&base) {
                    Some(b) => current = b,
                    // Base asset is gone, the last written value stands
                    None => return current.artifact,
                },
                _ => return current.artifact,
            }
        }
        log::error!("Base counterpart chain of {} is too deep", surface);
        None
    }

    /// Point a surface at an artifact. On an instance this records an
    /// override, unless the value equals the inherited one.
    pub fn set_artifact(&mut self, surface: SurfaceId, artifact: Option<ArtifactId>) -> Result<()> {
        let inherited = self.base_counterpart(surface).map(|base| self.artifact(base));
        let s = self
            .surfaces
            .get_mut(&surface)
            .ok_or(BakeError::UnknownSurface(surface))?;
        s.artifact = artifact;
        s.overrides_artifact = match inherited {
            Some(value) => value != artifact,
            None => false,
        };
        Ok(())
    }

    /// Whether the surface lives in an open stage
    pub fn is_part_of_context(&self, surface: SurfaceId) -> bool {
        self.surfaces
            .get(&surface)
            .and_then(|s| s.context)
            .is_some_and(|ctx| self.stages.contains_key(&ctx))
    }

    /// Whether the surface is enabled and would add runtime data
    pub fn is_active(&self, surface: SurfaceId) -> bool {
        self.surfaces
            .get(&surface)
            .is_some_and(|s| s.enabled && !s.template_asset)
    }

    /// Load the surface's artifact into the runtime
    pub fn add_data(&mut self, surface: SurfaceId) {
        if !self.is_active(surface) {
            return;
        }
        match self.artifact(surface) {
            Some(artifact) => {
                self.runtime.insert(surface, artifact);
            }
            None => {
                self.runtime.remove(&surface);
            }
        }
    }

    /// Unload the surface's artifact from the runtime
    pub fn remove_data(&mut self, surface: SurfaceId) {
        self.runtime.remove(&surface);
    }

    /// Artifact the runtime currently has loaded for a surface
    pub fn runtime_artifact(&self, surface: SurfaceId) -> Option<ArtifactId> {
        self.runtime.get(&surface).copied()
    }

    /// Number of nav mesh instances loaded into the runtime
    pub fn runtime_instance_count(&self) -> usize {
        self.runtime.len()
    }

    /// Flag whatever owns the surface as needing a save
    pub fn mark_dirty(&mut self, surface: SurfaceId) {
        let Some(s) = self.surfaces.get(&surface) else {
            return;
        };
        match s.context {
            Some(ctx) => {
                if let Some(stage) = self.stages.get_mut(&ctx) {
                    stage.dirty = true;
                }
            }
            None if !s.template_asset => self.scene_dirty = true,
            None => {}
        }
    }

    /// Surfaces outside `excluded` currently referencing `artifact`
    pub fn references_outside(
        &self,
        artifact: ArtifactId,
        excluded: Option<ContextId>,
    ) -> Vec<SurfaceId> {
        self.surfaces
            .values()
            .filter(|s| excluded.is_none() || s.context != excluded)
            .filter(|s| self.artifact(s.id) == Some(artifact))
            .map(|s| s.id)
            .collect()
    }

    /// Every artifact referenced by a live surface
    pub fn referenced_artifacts(&self) -> BTreeSet<ArtifactId> {
        self.surfaces
            .keys()
            .filter_map(|id| self.artifact(*id))
            .collect()
    }

    /// Reload runtime data of every active surface inheriting from `base`
    pub(crate) fn refresh_inheritors(&mut self, base: SurfaceId) {
        let inheritors: Vec<SurfaceId> = self
            .surfaces
            .values()
            .filter(|s| s.id != base && self.inherits_from(s.id, base))
            .map(|s| s.id)
            .collect();

        for id in inheritors {
            if self.runtime.contains_key(&id) || self.is_active(id) {
                self.remove_data(id);
                self.add_data(id);
            }
        }
    }

    /// Whether `surface` resolves its artifact through `base`
    pub(crate) fn inherits_from(&self, surface: SurfaceId, base: SurfaceId) -> bool {
        let mut current = surface;
        for _ in 0..MAX_BASE_DEPTH {
            let Some(s) = self.surfaces.get(&current) else {
                return false;
            };
            if s.overrides_artifact {
                return false;
            }
            match s.base {
                Some(b) if b == base => return true,
                Some(b) => current = b,
                None => return false,
            }
        }
        false
    }

    /// Surfaces derived from `base`, directly or through variants
    pub(crate) fn derived_from(&self, base: SurfaceId) -> Vec<SurfaceId> {
        self.surfaces
            .values()
            .filter(|s| s.base == Some(base))
            .map(|s| s.id)
            .collect()
    }

    /// Folder baked artifacts of a surface are stored in, if it has one.
    ///
    /// Stage surfaces and template surfaces store next to the template asset,
    /// main-scene surfaces in a folder named after the saved scene.
    pub fn target_folder(&self, surface: SurfaceId) -> Option<PathBuf> {
        let s = self.surfaces.get(&surface)?;

        if let Some(ctx) = s.context {
            let stage = self.stages.get(&ctx)?;
            let template = self.templates.get(&stage.template)?;
            return template.asset_path.parent().map(Path::to_path_buf);
        }

        if s.template_asset {
            let template = self.template_of(surface)?;
            return template.asset_path.parent().map(Path::to_path_buf);
        }

        let scene = self.scene_path.as_ref()?;
        let stem = scene.file_stem()?;
        let folder = match scene.parent() {
            Some(dir) => dir.join(stem),
            None => PathBuf::from(stem),
        };
        Some(folder)
    }
}

impl Default for SceneWorld {
    fn default() -> Self {
        Self::new(None)
    }
}
