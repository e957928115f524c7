//! # tokio-stage
//!
//! Structured-concurrency executor for the lifecycle stages of a state in a
//! Tokio finite state machine. Each state owns three [`Stage`]s (`on_enter`,
//! `on_run`, `on_exit`); running a stage fans out all of its callbacks
//! concurrently, applies the stage's deadline, and tears everything down to
//! exactly one [`Outcome`] the driver loop can act on. Any callback may end
//! the stage early by returning a [`TransitionRequest`]; siblings are
//! cancelled cooperatively and the group never resolves while one of its
//! tasks is still running.
//!
//! Cancellation is cooperative: an in-flight callback is dropped at its next
//! `.await` once the stage commits to an outcome. A callback that never
//! yields cannot be interrupted; the stage logs the leak and resolves after
//! a bounded grace window instead of hanging.
//!
//! ## Example
//!
//! ```rust
//! use tokio_stage::{Flow, Outcome, StageCallback, StageKind, StateRuntime};
//!
//! #[derive(Clone, Copy, PartialEq, Debug)]
//! enum Light {
//!     Green,
//!     Red,
//! }
//!
//! # async fn demo() -> Result<(), tokio_stage::StageError> {
//! let mut green = StateRuntime::new(Light::Green);
//! green
//!     .stage_mut(StageKind::OnRun)
//!     .add_callback(StageCallback::new(|| async {
//!         // Do some async work, then hand control to another state.
//!         Ok(Flow::transition(Light::Red))
//!     }));
//!
//! match green.run_stage(StageKind::OnRun).await? {
//!     Outcome::Transitioned(request) => assert_eq!(*request.target(), Light::Red),
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

mod callback;
mod group;
mod runtime;
mod stage;
mod task;

pub use crate::callback::{CallbackFuture, StageCallback};
pub use crate::runtime::StateRuntime;
pub use crate::stage::{DEFAULT_CANCEL_GRACE, Stage};
pub use tokio_stage_core::{
    CallbackError, CallbackResult, Flow, Outcome, Payload, StageError, StageKind, StateId,
    TransitionRequest,
};
