//! User callback handles.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_stage_core::{CallbackResult, StateId};

/// Boxed future produced by one callback invocation.
pub type CallbackFuture<S> = Pin<Box<dyn Future<Output = CallbackResult<S>> + Send>>;

/// Cloneable handle around one user-supplied stage callback.
///
/// The handle wraps a factory rather than a single future so the owning
/// [`Stage`](crate::Stage) can run the callback afresh on every invocation;
/// stages persist across runs while their execution scopes are ephemeral.
/// Adding the same handle to a stage twice is legal — it runs once per
/// occurrence.
///
/// # Cancellation contract
///
/// When the stage commits to an outcome, in-flight callbacks are cancelled
/// by dropping their future at its next suspension point. Callback authors
/// must keep `.await`ing for cancellation to take effect; a callback that
/// blocks the thread cannot be interrupted and holds up stage resolution
/// until the cancellation grace window expires.
pub struct StageCallback<S> {
    factory: Arc<dyn Fn() -> CallbackFuture<S> + Send + Sync>,
}

impl<S: StateId> StageCallback<S> {
    /// Wraps an async closure (or async fn) as a stage callback.
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallbackResult<S>> + Send + 'static,
    {
        Self {
            factory: Arc::new(move || Box::pin(factory())),
        }
    }

    /// Starts one run of the callback.
    pub(crate) fn invoke(&self) -> CallbackFuture<S> {
        (self.factory)()
    }
}

impl<S> Clone for StageCallback<S> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<S> fmt::Debug for StageCallback<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StageCallback")
    }
}
