//! Artifact ownership ledger.
//!
//! Remembers, per editing context, which artifact each touched surface owned
//! when it was first baked or cleared in that context. Saving the context makes
//! the new artifacts permanent and deletes the replaced ones; closing it
//! without saving restores the remembered artifacts and deletes the session's.

use std::collections::BTreeMap;

use crate::artifact::ArtifactId;
use crate::stage::ContextId;
use crate::store::ArtifactStore;
use crate::surface::SurfaceId;
use crate::world::SceneWorld;

/// Bookkeeping for one surface touched inside a context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Artifact the surface referenced on first touch
    pub entry_artifact: Option<ArtifactId>,
    /// `false` when the entry artifact belongs to the base template the
    /// surface was instantiated from. Such an artifact is never deleted.
    pub owns_entry: bool,
    /// Artifact most recently swapped in during the session
    pub latest_artifact: Option<ArtifactId>,
}

/// What a commit or discard did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerOutcome {
    /// Artifacts removed from storage
    pub deleted: Vec<ArtifactId>,
    /// Artifacts that would have been deleted but are still referenced
    pub kept: Vec<ArtifactId>,
    /// Surfaces whose entry artifact was restored
    pub restored: Vec<SurfaceId>,
    /// Entries cleared
    pub cleared: usize,
}

/// Per-context record of entry artifacts
#[derive(Default)]
pub struct OwnershipLedger {
    entries: BTreeMap<(ContextId, SurfaceId), LedgerEntry>,
}

impl OwnershipLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the surface's current artifact unless an entry already exists.
    /// Returns `true` if a new entry was created.
    pub fn record_first_touch(
        &mut self,
        ctx: ContextId,
        surface: SurfaceId,
        world: &SceneWorld,
    ) -> bool {
        if self.entries.contains_key(&(ctx, surface)) {
            return false;
        }

        let current = world.artifact(surface);
        let owns_entry = match world.base_counterpart(surface) {
            Some(base) => current != world.artifact(base),
            None => true,
        };

        log::debug!(
            "Ledger: {} in {} entered with {:?} (owned: {})",
            surface,
            ctx,
            current,
            owns_entry
        );
        self.entries.insert(
            (ctx, surface),
            LedgerEntry {
                entry_artifact: current,
                owns_entry,
                latest_artifact: current,
            },
        );
        true
    }

    /// Note the artifact a surface switched to during the session
    pub fn note_swap(&mut self, ctx: ContextId, surface: SurfaceId, artifact: Option<ArtifactId>) {
        match self.entries.get_mut(&(ctx, surface)) {
            Some(entry) => entry.latest_artifact = artifact,
            None => {
                debug_assert!(false, "swap on {} in {} without a ledger entry", surface, ctx);
                log::error!("Ledger: swap on {} in {} without an entry", surface, ctx);
            }
        }
    }

    /// Decide whether the surface's current artifact can be deleted when it is
    /// replaced. `ctx` is the context the surface lives in, if any.
    pub fn artifact_to_delete_on_swap(
        &self,
        ctx: Option<ContextId>,
        surface: SurfaceId,
        world: &SceneWorld,
    ) -> Option<ArtifactId> {
        let current = world.artifact(surface)?;

        // Still shared with the template it was instantiated from
        if let Some(base) = world.base_counterpart(surface) {
            if world.artifact(base) == Some(current) {
                return None;
            }
        }

        // Needed to revert the context
        if let Some(ctx) = ctx {
            if self.is_entry_for_current_artifact(ctx, surface, world) {
                return None;
            }
        }

        // Inheritors follow the swap, anyone else still needs the artifact
        if world
            .references_outside(current, None)
            .iter()
            .any(|other| *other != surface && !world.inherits_from(*other, surface))
        {
            log::debug!("Ledger: {} is still referenced, not deleting on swap", current);
            return None;
        }

        Some(current)
    }

    /// Whether the surface still shows the artifact it entered the context with
    pub fn is_entry_for_current_artifact(
        &self,
        ctx: ContextId,
        surface: SurfaceId,
        world: &SceneWorld,
    ) -> bool {
        match self.entries.get(&(ctx, surface)) {
            Some(entry) => entry.entry_artifact == world.artifact(surface),
            None => false,
        }
    }

    /// Make the context's changes permanent. Deletes every owned entry
    /// artifact the surface moved away from.
    pub fn commit(
        &mut self,
        ctx: ContextId,
        world: &SceneWorld,
        store: &dyn ArtifactStore,
    ) -> LedgerOutcome {
        let mut outcome = LedgerOutcome::default();

        for (surface, entry) in self.take_context(ctx) {
            let alive = world.contains(surface);
            let current = if alive { world.artifact(surface) } else { None };

            if current != entry.entry_artifact && entry.owns_entry {
                if let Some(old) = entry.entry_artifact {
                    delete_artifact(store, old, &mut outcome);
                }
            }

            // Surface deleted while editing, its last bake has no owner left
            if !alive {
                if let Some(latest) = entry.latest_artifact {
                    if entry.latest_artifact != entry.entry_artifact {
                        delete_artifact(store, latest, &mut outcome);
                    }
                }
            }
            outcome.cleared += 1;
        }

        log::debug!("Ledger: committed {} ({:?})", ctx, outcome);
        outcome
    }

    /// Throw the context's changes away: restore entry artifacts and delete
    /// everything baked during the session.
    pub fn discard(
        &mut self,
        ctx: ContextId,
        world: &mut SceneWorld,
        store: &dyn ArtifactStore,
    ) -> LedgerOutcome {
        let mut outcome = LedgerOutcome::default();

        for (surface, entry) in self.take_context(ctx) {
            if world.contains(surface) {
                let current = world.artifact(surface);
                if current != entry.entry_artifact {
                    world.remove_data(surface);
                    if world.set_artifact(surface, entry.entry_artifact).is_ok() {
                        world.add_data(surface);
                        outcome.restored.push(surface);
                    }
                    if let Some(session) = current {
                        delete_unreferenced(world, ctx, store, session, &mut outcome);
                    }
                }
            } else {
                if entry.latest_artifact != entry.entry_artifact {
                    if let Some(session) = entry.latest_artifact {
                        delete_unreferenced(world, ctx, store, session, &mut outcome);
                    }
                }
                if entry.owns_entry {
                    if let Some(old) = entry.entry_artifact {
                        delete_unreferenced(world, ctx, store, old, &mut outcome);
                    }
                }
            }
            outcome.cleared += 1;
        }

        log::debug!("Ledger: discarded {} ({:?})", ctx, outcome);
        outcome
    }

    /// Drop entries left over from an earlier session of `ctx`
    pub fn reset_context(&mut self, ctx: ContextId) -> usize {
        let stale = self.take_context(ctx).len();
        if stale > 0 {
            log::warn!("Ledger: dropped {} stale entries for {}", stale, ctx);
        }
        stale
    }

    /// Look up an entry
    pub fn entry(&self, ctx: ContextId, surface: SurfaceId) -> Option<&LedgerEntry> {
        self.entries.get(&(ctx, surface))
    }

    /// Number of entries recorded for a context
    pub fn context_len(&self, ctx: ContextId) -> usize {
        self.entries.keys().filter(|(c, _)| *c == ctx).count()
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn take_context(&mut self, ctx: ContextId) -> Vec<(SurfaceId, LedgerEntry)> {
        let keys: Vec<_> = self.entries.keys().filter(|(c, _)| *c == ctx).copied().collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|entry| (key.1, entry)))
            .collect()
    }
}

fn delete_unreferenced(
    world: &SceneWorld,
    ctx: ContextId,
    store: &dyn ArtifactStore,
    artifact: ArtifactId,
    outcome: &mut LedgerOutcome,
) {
    if world.references_outside(artifact, Some(ctx)).is_empty() {
        delete_artifact(store, artifact, outcome);
    } else {
        log::warn!("Ledger: {} is referenced outside {}, keeping it", artifact, ctx);
        outcome.kept.push(artifact);
    }
}

fn delete_artifact(store: &dyn ArtifactStore, artifact: ArtifactId, outcome: &mut LedgerOutcome) {
    match store.delete_artifact(artifact) {
        Ok(true) => outcome.deleted.push(artifact),
        Ok(false) => log::debug!("Ledger: {} was never persisted", artifact),
        Err(e) => log::warn!("Ledger: failed to delete {}: {}", artifact, e),
    }
}
