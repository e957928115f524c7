//! Core data types for tokio-stage.
//!
//! Everything a stage callback or a driver loop needs to name lives here:
//! the state-identifier bound, the lifecycle stage kinds, the control-flow
//! value callbacks return, and the [`Outcome`] a stage execution resolves to.
//! The runtime machinery (spawning, deadlines, cancellation) lives in the
//! `tokio-stage` crate.

use std::any::Any;
use std::fmt;
use std::time::Duration;

/// Bound for state identifiers.
///
/// A state id is an opaque, comparable value naming a state in the owning
/// machine — typically an enum or a string. Blanket-implemented; there is
/// nothing to implement by hand.
pub trait StateId: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> StateId for T where T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// The three lifecycle stages of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Runs when the state is entered.
    OnEnter,
    /// The state's main body.
    OnRun,
    /// Runs when the state is left.
    OnExit,
}

impl StageKind {
    /// All kinds, in driver sequencing order.
    pub const ALL: [StageKind; 3] = [Self::OnEnter, Self::OnRun, Self::OnExit];
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnEnter => f.write_str("on_enter"),
            Self::OnRun => f.write_str("on_run"),
            Self::OnExit => f.write_str("on_exit"),
        }
    }
}

/// Opaque payload carried alongside a transition request.
///
/// The executor never inspects it; it is handed back to the driver loop
/// inside [`Outcome::Transitioned`].
pub type Payload = Box<dyn Any + Send>;

/// A callback's request to abandon the current stage and jump to `target`.
///
/// Created by a callback via [`TransitionRequest::to`], consumed exactly once
/// by the stage that resolves it into an [`Outcome`].
pub struct TransitionRequest<S> {
    target: S,
    payload: Option<Payload>,
}

impl<S> TransitionRequest<S> {
    /// Request a transition to the given target state.
    #[must_use]
    pub fn to(target: S) -> Self {
        Self {
            target,
            payload: None,
        }
    }

    /// Request a transition carrying an opaque context payload.
    #[must_use]
    pub fn with_payload(target: S, payload: impl Any + Send) -> Self {
        Self {
            target,
            payload: Some(Box::new(payload)),
        }
    }

    /// The requested target state.
    pub fn target(&self) -> &S {
        &self.target
    }

    /// Extracts the target state.
    #[must_use]
    pub fn into_target(self) -> S {
        self.target
    }

    /// Borrows the payload, downcast to `T`, if one of that type is present.
    pub fn payload_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref())
    }

    /// Removes and downcasts the payload. Returns `None` when the payload is
    /// absent or of a different type (in which case it is dropped).
    pub fn take_payload<T: Any>(&mut self) -> Option<Box<T>> {
        self.payload.take().and_then(|p| p.downcast().ok())
    }
}

impl<S: fmt::Debug> fmt::Debug for TransitionRequest<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionRequest")
            .field("target", &self.target)
            .field("payload", &self.payload.as_ref().map(|_| "<opaque>"))
            .finish()
    }
}

/// What a callback tells its stage on success.
#[derive(Debug)]
pub enum Flow<S> {
    /// The callback is done; the stage keeps running its siblings.
    Continue,
    /// End the stage now and transition. Siblings are cancelled.
    Transition(TransitionRequest<S>),
}

impl<S> Flow<S> {
    /// Shorthand for `Flow::Transition(TransitionRequest::to(target))`.
    #[must_use]
    pub fn transition(target: S) -> Self {
        Self::Transition(TransitionRequest::to(target))
    }
}

/// Error type for ordinary callback failures.
///
/// Boxed so callbacks can propagate any error with `?`; causes are collected
/// verbatim into [`Outcome::Failed`].
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of one callback run.
pub type CallbackResult<S> = Result<Flow<S>, CallbackError>;

/// The resolved result of one stage execution. Exactly one case holds.
#[derive(Debug)]
pub enum Outcome<S> {
    /// Every callback finished without error or transition request.
    Completed,
    /// The deadline elapsed first; incomplete callbacks were cancelled.
    TimedOut {
        /// The state the driver should fall back to.
        fallback: S,
    },
    /// A callback requested a transition; siblings were cancelled.
    ///
    /// When several callbacks request transitions at effectively the same
    /// instant, the first request observed by the stage's event loop wins —
    /// deterministic within one run, unspecified across runs. Errors raised
    /// concurrently with the winning request are discarded (and logged).
    Transitioned(TransitionRequest<S>),
    /// One or more callbacks failed. Every cause that arrived before the
    /// stage tore down is present; none are dropped.
    Failed {
        /// The collected callback errors, in observation order.
        causes: Vec<CallbackError>,
    },
}

impl<S> Outcome<S> {
    /// Did every callback complete cleanly?
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Did the stage deadline fire?
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Did a callback end the stage with a transition request?
    pub fn is_transitioned(&self) -> bool {
        matches!(self, Self::Transitioned(_))
    }

    /// Did the stage resolve to collected failures?
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The state the driver should move to next, when the outcome names one
    /// (`TimedOut` fallback or `Transitioned` target).
    pub fn next_state(&self) -> Option<&S> {
        match self {
            Self::TimedOut { fallback } => Some(fallback),
            Self::Transitioned(request) => Some(request.target()),
            _ => None,
        }
    }
}

/// Fatal stage execution errors.
///
/// These are defects, not runtime conditions: they propagate out of
/// `Stage::run` instead of resolving into an [`Outcome`].
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// A timeout was configured with no fallback state and it fired.
    ///
    /// Raised the instant the deadline elapses, not at configuration time,
    /// and never when the callbacks beat the deadline.
    #[error("{kind} stage timed out after {timeout:?} with no fallback state configured")]
    MissingTimeoutFallback {
        /// Which stage fired.
        kind: StageKind,
        /// The configured timeout that elapsed.
        timeout: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_kind_display() {
        assert_eq!(StageKind::OnEnter.to_string(), "on_enter");
        assert_eq!(StageKind::OnRun.to_string(), "on_run");
        assert_eq!(StageKind::OnExit.to_string(), "on_exit");
        assert_eq!(StageKind::ALL.len(), 3);
    }

    #[test]
    fn transition_request_payload_roundtrip() {
        let mut request = TransitionRequest::with_payload("Paused", 42u32);
        assert_eq!(*request.target(), "Paused");
        assert_eq!(request.payload_ref::<u32>(), Some(&42));
        assert_eq!(request.take_payload::<u32>(), Some(Box::new(42u32)));
        assert!(request.payload_ref::<u32>().is_none());
    }

    #[test]
    fn transition_request_payload_type_mismatch() {
        let mut request = TransitionRequest::with_payload("Paused", "ctx".to_string());
        assert!(request.payload_ref::<u32>().is_none());
        // Wrong-type take drops the payload.
        assert!(request.take_payload::<u32>().is_none());
        assert!(request.payload_ref::<String>().is_none());
    }

    #[test]
    fn outcome_next_state() {
        let outcome: Outcome<&str> = Outcome::TimedOut { fallback: "Error" };
        assert_eq!(outcome.next_state(), Some(&"Error"));
        assert!(outcome.is_timed_out());

        let outcome = Outcome::Transitioned(TransitionRequest::to("Next"));
        assert_eq!(outcome.next_state(), Some(&"Next"));

        let outcome: Outcome<&str> = Outcome::Completed;
        assert!(outcome.next_state().is_none());
        assert!(outcome.is_completed());

        let outcome: Outcome<&str> = Outcome::Failed { causes: Vec::new() };
        assert!(outcome.is_failed());
    }

    #[test]
    fn stage_error_message_names_stage_and_timeout() {
        let err = StageError::MissingTimeoutFallback {
            kind: StageKind::OnRun,
            timeout: Duration::from_millis(50),
        };
        let message = err.to_string();
        assert!(message.contains("on_run"), "{message}");
        assert!(message.contains("no fallback"), "{message}");
    }
}
