//! Runtime instance of one FSM state.

use tracing::Instrument;

use tokio_stage_core::{Outcome, StageError, StageKind, StateId};

use crate::stage::Stage;

/// The runtime face of one state: its identifier plus the three lifecycle
/// stages. The driver loop calls [`StateRuntime::run_stage`] once per stage
/// per activation; sequencing `on_enter → on_run → on_exit` and reacting to
/// each [`Outcome`] is the driver's job, not this type's.
pub struct StateRuntime<S: StateId> {
    id: S,
    on_enter: Stage<S>,
    on_run: Stage<S>,
    on_exit: Stage<S>,
}

impl<S: StateId> StateRuntime<S> {
    /// Creates a runtime for the given state with three empty stages.
    pub fn new(id: S) -> Self {
        Self {
            id,
            on_enter: Stage::new(StageKind::OnEnter),
            on_run: Stage::new(StageKind::OnRun),
            on_exit: Stage::new(StageKind::OnExit),
        }
    }

    /// The state this runtime belongs to.
    pub fn id(&self) -> &S {
        &self.id
    }

    /// Read access to one stage.
    pub fn stage(&self, kind: StageKind) -> &Stage<S> {
        match kind {
            StageKind::OnEnter => &self.on_enter,
            StageKind::OnRun => &self.on_run,
            StageKind::OnExit => &self.on_exit,
        }
    }

    /// Mutable access for configuration (callbacks, timeout, fallback).
    pub fn stage_mut(&mut self, kind: StageKind) -> &mut Stage<S> {
        match kind {
            StageKind::OnEnter => &mut self.on_enter,
            StageKind::OnRun => &mut self.on_run,
            StageKind::OnExit => &mut self.on_exit,
        }
    }

    /// Runs one stage to its [`Outcome`].
    ///
    /// A stage with no callbacks completes immediately. Exclusive access
    /// serializes stage runs on this state by construction.
    pub async fn run_stage(&mut self, kind: StageKind) -> Result<Outcome<S>, StageError> {
        let span = tracing::debug_span!("stage", state = ?self.id, kind = %kind);
        self.stage_mut(kind).run().instrument(span).await
    }
}
