//! Stage configuration and execution.

use std::time::Duration;

use tracing::debug;

use tokio_stage_core::{Outcome, StageError, StageKind, StateId};

use crate::callback::StageCallback;
use crate::group::StageGroup;

/// Default bound on how long a stage waits for cancelled callbacks to
/// acknowledge before resolving anyway.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

/// One lifecycle stage of a state: an ordered set of callbacks plus the
/// stage's timeout and fallback-state configuration.
///
/// A stage lives as long as its owning [`StateRuntime`](crate::StateRuntime)
/// and is configured up front; each call to [`Stage::run`] spawns a fresh
/// execution scope and resolves it to one [`Outcome`]. `run` takes `&mut
/// self` so that overlapping runs of the same stage, and reconfiguration
/// while a run is in flight, are unrepresentable.
pub struct Stage<S: StateId> {
    kind: StageKind,
    callbacks: Vec<StageCallback<S>>,
    timeout: Option<Duration>,
    timeout_fallback: Option<S>,
    cancel_grace: Duration,
}

impl<S: StateId> Stage<S> {
    /// Creates an empty stage with no timeout.
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            callbacks: Vec::new(),
            timeout: None,
            timeout_fallback: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    /// Which lifecycle stage this is.
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Appends a callback. Order is preserved and duplicates are legal; the
    /// same handle added twice runs twice per invocation.
    pub fn add_callback(&mut self, callback: StageCallback<S>) -> &mut Self {
        self.callbacks.push(callback);
        self
    }

    /// Sets the stage deadline and its fallback state in one step.
    ///
    /// Both fields are always replaced together so an execution can never
    /// observe a timeout without its matching fallback. A `None` fallback is
    /// accepted here — the misconfiguration is only rejected (fatally, as
    /// [`StageError::MissingTimeoutFallback`]) at the moment the deadline
    /// actually fires.
    pub fn configure_timeout(&mut self, timeout: Duration, fallback: Option<S>) -> &mut Self {
        self.timeout = Some(timeout);
        self.timeout_fallback = fallback;
        self
    }

    /// Removes the deadline and its fallback. The stage then waits on its
    /// callbacks indefinitely.
    pub fn clear_timeout(&mut self) -> &mut Self {
        self.timeout = None;
        self.timeout_fallback = None;
        self
    }

    /// Bounds how long a run waits for cancelled callbacks to acknowledge
    /// before logging the leak and resolving anyway.
    pub fn set_cancel_grace(&mut self, grace: Duration) -> &mut Self {
        self.cancel_grace = grace;
        self
    }

    /// The configured deadline, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The state to fall back to when the deadline fires.
    pub fn timeout_fallback(&self) -> Option<&S> {
        self.timeout_fallback.as_ref()
    }

    /// Number of configured callbacks.
    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether the stage has no callbacks.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Runs the stage to one [`Outcome`].
    ///
    /// Returns `Err` only for fatal defects (a fired deadline with no
    /// fallback); every runtime condition — completion, timeout, transition,
    /// collected failures — resolves into the `Outcome`. By the time this
    /// returns, no callback spawned by this run is still running.
    pub async fn run(&mut self) -> Result<Outcome<S>, StageError> {
        if self.callbacks.is_empty() {
            // Nothing to wait on; the deadline is never armed.
            debug!(stage = %self.kind, "stage has no callbacks");
            return Ok(Outcome::Completed);
        }

        debug!(
            stage = %self.kind,
            callbacks = self.callbacks.len(),
            timeout = ?self.timeout,
            "running stage"
        );
        StageGroup::spawn(self.kind, &self.callbacks)
            .run(
                self.timeout,
                self.timeout_fallback.clone(),
                self.cancel_grace,
            )
            .await
    }
}
