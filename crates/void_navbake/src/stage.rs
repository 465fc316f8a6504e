//! Editing contexts ("stages").
//!
//! A stage is an isolated copy of a template opened for editing. Baking inside
//! it must not leak into the main scene until the stage is saved, and closing
//! it without saving throws its changes away. Transitions are delivered
//! synchronously to a [`StageListener`]:
//!
//! ```text
//! open_stage  ──► copy template surfaces ──► Entering
//! save_stage  ──► Saving ──► write copies back into the template asset
//! close_stage ──► (auto-save) ──► Closing ──► destroy copies
//! ```

use std::collections::BTreeMap;

use crate::error::{BakeError, Result};
use crate::surface::{Surface, SurfaceId};
use crate::world::{SceneWorld, TemplateId};

/// Editing context identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u32);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Stage({})", self.0)
    }
}

/// An open stage
#[derive(Clone, Debug)]
pub struct EditingContext {
    pub id: ContextId,
    /// Template being edited
    pub template: TemplateId,
    /// Stage copy of the template root
    pub root: SurfaceId,
    /// Stage copy -> template surface it was copied from
    pub(crate) copies: BTreeMap<SurfaceId, SurfaceId>,
    /// Unsaved changes
    pub dirty: bool,
    /// Save automatically when closed
    pub auto_save: bool,
}

impl EditingContext {
    /// Template surface a stage copy stands for
    pub fn source_of(&self, copy: SurfaceId) -> Option<SurfaceId> {
        self.copies.get(&copy).copied()
    }

    /// Stage copies, including ones destroyed while editing
    pub fn copies(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.copies.keys().copied()
    }
}

/// Kind of stage transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageSignal {
    Entering,
    Saving,
    Closing,
}

/// Stage transition delivered to listeners
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageEvent {
    /// Stage contents were created and the stage became active
    Entering(ContextId),
    /// Stage is about to be written back into its template
    Saving(ContextId),
    /// Stage is about to be destroyed
    Closing(ContextId),
}

impl StageEvent {
    /// Signal kind of this event
    pub fn signal(&self) -> StageSignal {
        match self {
            StageEvent::Entering(_) => StageSignal::Entering,
            StageEvent::Saving(_) => StageSignal::Saving,
            StageEvent::Closing(_) => StageSignal::Closing,
        }
    }

    /// Stage the event is about
    pub fn context(&self) -> ContextId {
        match self {
            StageEvent::Entering(ctx) | StageEvent::Saving(ctx) | StageEvent::Closing(ctx) => *ctx,
        }
    }
}

/// Receiver of stage transitions
pub trait StageListener {
    /// Whether the listener currently wants `signal`
    fn is_subscribed(&self, signal: StageSignal) -> bool;

    /// Handle a transition. Called before the host acts on it.
    fn on_stage_event(&mut self, event: StageEvent, world: &mut SceneWorld);
}

/// Listener that ignores every transition
pub struct NoStageListener;

impl StageListener for NoStageListener {
    fn is_subscribed(&self, _signal: StageSignal) -> bool {
        false
    }

    fn on_stage_event(&mut self, _event: StageEvent, _world: &mut SceneWorld) {}
}

fn dispatch(listener: &mut dyn StageListener, event: StageEvent, world: &mut SceneWorld) {
    if listener.is_subscribed(event.signal()) {
        listener.on_stage_event(event, world);
    }
}

impl SceneWorld {
    /// Save-on-close policy applied to stages opened from now on
    pub fn set_stage_auto_save(&mut self, enabled: bool) {
        self.stage_auto_save = enabled;
    }

    /// Currently active stage
    pub fn active_stage(&self) -> Option<ContextId> {
        self.active_stage
    }

    /// Look up an open stage
    pub fn stage(&self, id: ContextId) -> Option<&EditingContext> {
        self.stages.get(&id)
    }

    /// Open a template for isolated editing. An already active stage is
    /// closed first.
    pub fn open_stage(
        &mut self,
        template: TemplateId,
        listener: &mut dyn StageListener,
    ) -> Result<ContextId> {
        let sources = self
            .template(template)
            .map(|t| t.surfaces.clone())
            .ok_or(BakeError::UnknownTemplate(template))?;
        if sources.is_empty() {
            return Err(BakeError::EmptyTemplate(template));
        }

        if let Some(active) = self.active_stage {
            self.close_stage(active, listener)?;
        }

        let ctx = ContextId(self.next_context);
        self.next_context += 1;

        let mut copies = BTreeMap::new();
        for source in &sources {
            let original = self
                .surface(*source)
                .cloned()
                .ok_or(BakeError::UnknownSurface(*source))?;
            let id = self.next_surface_id();
            let mut copy = Surface::new(id, original.name.clone(), original.settings.clone());
            copy.pose = original.pose;
            copy.enabled = original.enabled;
            copy.artifact = original.artifact;
            copy.base = original.base;
            copy.overrides_artifact = original.overrides_artifact;
            copy.context = Some(ctx);
            self.insert_surface(copy);
            copies.insert(id, *source);
        }

        let root = copies
            .iter()
            .find(|(_, source)| **source == sources[0])
            .map(|(copy, _)| *copy)
            .ok_or(BakeError::EmptyTemplate(template))?;

        self.stages.insert(
            ctx,
            EditingContext {
                id: ctx,
                template,
                root,
                copies: copies.clone(),
                dirty: false,
                auto_save: self.stage_auto_save,
            },
        );
        self.active_stage = Some(ctx);

        for copy in copies.keys() {
            self.add_data(*copy);
        }

        log::info!("Opened {} for template {}", ctx, template);
        dispatch(listener, StageEvent::Entering(ctx), self);
        Ok(ctx)
    }

    /// Write the stage back into its template asset
    pub fn save_stage(&mut self, ctx: ContextId, listener: &mut dyn StageListener) -> Result<()> {
        if !self.stages.contains_key(&ctx) {
            return Err(BakeError::UnknownContext(ctx));
        }

        dispatch(listener, StageEvent::Saving(ctx), self);

        let Some(stage) = self.stages.get(&ctx) else {
            return Err(BakeError::UnknownContext(ctx));
        };
        let template = stage.template;
        let copies: Vec<(SurfaceId, SurfaceId)> =
            stage.copies.iter().map(|(c, s)| (*c, *s)).collect();

        for (copy, source) in copies {
            match self.surface(copy).cloned() {
                Some(edited) => {
                    if let Some(target) = self.surface_mut(source) {
                        target.name = edited.name;
                        target.settings = edited.settings;
                        target.pose = edited.pose;
                        target.enabled = edited.enabled;
                        target.artifact = edited.artifact;
                        target.overrides_artifact = edited.overrides_artifact;
                    }
                    self.refresh_inheritors(source);
                }
                None => self.remove_from_template(template, source),
            }
        }

        let alive: Vec<SurfaceId> = self
            .stages
            .get(&ctx)
            .map(|stage| stage.copies().filter(|c| self.contains(*c)).collect())
            .unwrap_or_default();
        if let Some(stage) = self.stages.get_mut(&ctx) {
            stage.copies.retain(|copy, _| alive.contains(copy));
            stage.dirty = false;
        }
        log::info!("Saved {} into template {}", ctx, template);
        Ok(())
    }

    /// Close a stage, discarding unsaved changes unless it auto-saves
    pub fn close_stage(&mut self, ctx: ContextId, listener: &mut dyn StageListener) -> Result<()> {
        let (dirty, auto_save) = match self.stages.get(&ctx) {
            Some(stage) => (stage.dirty, stage.auto_save),
            None => return Err(BakeError::UnknownContext(ctx)),
        };

        if dirty && auto_save {
            self.save_stage(ctx, listener)?;
        }

        dispatch(listener, StageEvent::Closing(ctx), self);

        if let Some(stage) = self.stages.remove(&ctx) {
            for copy in stage.copies.keys() {
                self.destroy(*copy);
            }
        }
        if self.active_stage == Some(ctx) {
            self.active_stage = None;
        }
        log::info!("Closed {}", ctx);
        Ok(())
    }

    /// A surface deleted in the stage disappears from the template and from
    /// every instance of it.
    fn remove_from_template(&mut self, template: TemplateId, source: SurfaceId) {
        let mut doomed = vec![source];
        while let Some(surface) = doomed.pop() {
            doomed.extend(self.derived_from(surface));
            self.destroy(surface);
        }
        if let Some(t) = self.template_mut(template) {
            t.surfaces.retain(|s| *s != source);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::artifact::ArtifactId;
    use crate::surface::BuildSettings;

    #[derive(Default)]
    struct Recorder {
        events: Vec<StageEvent>,
    }

    impl StageListener for Recorder {
        fn is_subscribed(&self, _signal: StageSignal) -> bool {
            true
        }

        fn on_stage_event(&mut self, event: StageEvent, _world: &mut SceneWorld) {
            self.events.push(event);
        }
    }

    fn setup() -> (SceneWorld, TemplateId, SurfaceId) {
        let mut world = SceneWorld::new(Some(PathBuf::from("Assets/Main.scene")));
        let template = world.create_template("Plane", "Assets/Prefabs/Plane.prefab");
        let defining = world
            .add_template_surface(template, "Plane", BuildSettings::default(), Some(ArtifactId(1)))
            .unwrap();
        (world, template, defining)
    }

    #[test]
    fn test_stage_copy_is_isolated() {
        let (mut world, template, defining) = setup();
        let instance = world.instantiate(template).unwrap()[0];
        let mut recorder = Recorder::default();

        let ctx = world.open_stage(template, &mut recorder).unwrap();
        let root = world.stage(ctx).unwrap().root;
        assert!(world.is_part_of_context(root));
        assert!(!world.is_part_of_context(instance));
        assert_eq!(world.stage(ctx).unwrap().source_of(root), Some(defining));

        world.set_artifact(root, Some(ArtifactId(2))).unwrap();
        assert_eq!(world.artifact(instance), Some(ArtifactId(1)));

        world.save_stage(ctx, &mut recorder).unwrap();
        assert_eq!(world.artifact(defining), Some(ArtifactId(2)));
        assert_eq!(world.artifact(instance), Some(ArtifactId(2)));
        assert_eq!(world.runtime_artifact(instance), Some(ArtifactId(2)));

        world.close_stage(ctx, &mut recorder).unwrap();
        assert!(!world.contains(root));
        assert_eq!(world.active_stage(), None);
        assert_eq!(
            recorder.events,
            vec![StageEvent::Entering(ctx), StageEvent::Saving(ctx), StageEvent::Closing(ctx)]
        );
    }

    #[test]
    fn test_close_without_save_discards() {
        let (mut world, template, defining) = setup();
        let ctx = world.open_stage(template, &mut NoStageListener).unwrap();
        let root = world.stage(ctx).unwrap().root;

        world.set_artifact(root, Some(ArtifactId(9))).unwrap();
        world.mark_dirty(root);
        world.close_stage(ctx, &mut NoStageListener).unwrap();

        assert_eq!(world.artifact(defining), Some(ArtifactId(1)));
        assert!(world.stage(ctx).is_none());
    }

    #[test]
    fn test_auto_save_on_close() {
        let (mut world, template, defining) = setup();
        world.set_stage_auto_save(true);
        let mut recorder = Recorder::default();

        let ctx = world.open_stage(template, &mut recorder).unwrap();
        let root = world.stage(ctx).unwrap().root;
        world.set_artifact(root, Some(ArtifactId(4))).unwrap();
        world.mark_dirty(root);
        world.close_stage(ctx, &mut recorder).unwrap();

        assert_eq!(world.artifact(defining), Some(ArtifactId(4)));
        assert_eq!(recorder.events[1], StageEvent::Saving(ctx));
    }

    #[test]
    fn test_opening_second_stage_closes_first() {
        let (mut world, template, _) = setup();
        let mut recorder = Recorder::default();
        let first = world.open_stage(template, &mut recorder).unwrap();
        let second = world.open_stage(template, &mut recorder).unwrap();

        assert_ne!(first, second);
        assert_eq!(world.active_stage(), Some(second));
        assert!(world.stage(first).is_none());
        assert!(recorder.events.contains(&StageEvent::Closing(first)));
    }

    #[test]
    fn test_deleted_stage_surface_leaves_template() {
        let (mut world, template, defining) = setup();
        let extra = world
            .add_template_surface(template, "Ramp", BuildSettings::default(), None)
            .unwrap();
        let placed = world.instantiate(template).unwrap();

        let ctx = world.open_stage(template, &mut NoStageListener).unwrap();
        let ramp_copy = world
            .stage(ctx)
            .unwrap()
            .copies()
            .find(|c| world.stage(ctx).unwrap().source_of(*c) == Some(extra))
            .unwrap();
        assert!(world.destroy(ramp_copy));
        assert!(world.stage(ctx).unwrap().dirty);

        world.save_stage(ctx, &mut NoStageListener).unwrap();
        assert!(!world.contains(extra));
        assert!(!world.contains(placed[1]));
        assert!(world.contains(defining));
        assert_eq!(world.template(template).unwrap().surfaces, vec![defining]);
    }

    #[test]
    fn test_open_requires_surfaces() {
        let mut world = SceneWorld::new(None);
        let empty = world.create_template("Empty", "Assets/Empty.prefab");

        let err = world.open_stage(empty, &mut NoStageListener).unwrap_err();
        assert!(matches!(err, BakeError::EmptyTemplate(t) if t == empty));
        let err = world.open_stage(TemplateId(7), &mut NoStageListener).unwrap_err();
        assert!(matches!(err, BakeError::UnknownTemplate(TemplateId(7))));
        assert_eq!(world.active_stage(), None);
    }

    #[test]
    fn test_unknown_stage() {
        let (mut world, _, _) = setup();
        let err = world.save_stage(ContextId(42), &mut NoStageListener).unwrap_err();
        assert!(matches!(err, BakeError::UnknownContext(ContextId(42))));
    }
}
