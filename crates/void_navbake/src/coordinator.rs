//! Stage lifecycle coordination.
//!
//! Maps stage transitions onto ledger operations. The save and close hooks
//! are only registered while the ledger tracks something, so opening and
//! closing many stages without baking costs nothing.

use crate::ledger::{LedgerOutcome, OwnershipLedger};
use crate::scheduler::BakeScheduler;
use crate::stage::{ContextId, StageSignal};
use crate::store::ArtifactStore;
use crate::world::SceneWorld;

/// Keeps the save/close hook registration in step with the ledger
#[derive(Debug, Default)]
pub struct StageCoordinator {
    hooks_registered: bool,
}

impl StageCoordinator {
    /// Create a coordinator with no hooks registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the save and close hooks are registered
    pub fn hooks_registered(&self) -> bool {
        self.hooks_registered
    }

    /// Whether a transition should be delivered
    pub fn is_subscribed(&self, signal: StageSignal) -> bool {
        match signal {
            StageSignal::Entering => true,
            StageSignal::Saving | StageSignal::Closing => self.hooks_registered,
        }
    }

    /// Register the hooks while the ledger has entries, drop them otherwise
    pub fn refresh(&mut self, ledger: &OwnershipLedger) {
        let wanted = !ledger.is_empty();
        if wanted != self.hooks_registered {
            log::debug!(
                "{} stage save/close hooks",
                if wanted { "Registering" } else { "Releasing" }
            );
            self.hooks_registered = wanted;
        }
    }

    /// A stage was opened: forget anything left over under its id
    pub fn on_entering(&mut self, ctx: ContextId, ledger: &mut OwnershipLedger) {
        ledger.reset_context(ctx);
        self.refresh(ledger);
    }

    /// A stage is about to be saved
    pub fn on_saving(
        &mut self,
        ctx: ContextId,
        world: &SceneWorld,
        ledger: &mut OwnershipLedger,
        store: &dyn ArtifactStore,
    ) -> LedgerOutcome {
        let outcome = ledger.commit(ctx, world, store);
        self.refresh(ledger);
        outcome
    }

    /// A stage is about to be closed. Whatever was not saved is discarded,
    /// bakes still running inside it are abandoned.
    pub fn on_closing(
        &mut self,
        ctx: ContextId,
        world: &mut SceneWorld,
        ledger: &mut OwnershipLedger,
        store: &dyn ArtifactStore,
        scheduler: &mut BakeScheduler,
    ) -> LedgerOutcome {
        let abandoned = scheduler.cancel_context(ctx);
        if abandoned > 0 {
            log::info!("Abandoned {} bakes of closing {}", abandoned, ctx);
        }
        let outcome = ledger.discard(ctx, world, store);
        self.refresh(ledger);
        outcome
    }
}
