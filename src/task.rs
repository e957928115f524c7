//! Per-callback execution units.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tokio_stage_core::{CallbackError, Flow, StateId, TransitionRequest};

use crate::callback::StageCallback;

/// The one terminal signal every task reports to its group.
#[derive(Debug)]
pub(crate) enum TaskSignal<S> {
    /// The callback finished without error or transition request.
    Done,
    /// The callback was dropped at a suspension point after the group
    /// committed to an outcome.
    Cancelled,
    /// The callback failed with an ordinary error.
    Errored(CallbackError),
    /// The callback asked to end the stage and jump to another state.
    Transition(TransitionRequest<S>),
}

/// Raised in place of a signal when a callback panics.
#[derive(Debug, thiserror::Error)]
#[error("callback panicked")]
struct CallbackPanicked;

/// Wraps one callback invocation: runs it against the group's cancellation
/// token and reports exactly one [`TaskSignal`]. Tasks never impose their own
/// deadline; timeouts belong to the stage.
pub(crate) struct CallbackTask<S> {
    index: usize,
    callback: StageCallback<S>,
    cancel: CancellationToken,
    signals: mpsc::UnboundedSender<(usize, TaskSignal<S>)>,
}

impl<S: StateId> CallbackTask<S> {
    pub(crate) fn new(
        index: usize,
        callback: StageCallback<S>,
        cancel: CancellationToken,
        signals: mpsc::UnboundedSender<(usize, TaskSignal<S>)>,
    ) -> Self {
        Self {
            index,
            callback,
            cancel,
            signals,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let Self {
            index,
            callback,
            cancel,
            signals,
        } = self;

        tokio::spawn(async move {
            // A panicking callback would unwind past the send below and the
            // group would wait out its grace window for a signal that never
            // comes. The guard turns the panic into an ordinary failure.
            let mut guard = PanicSignal {
                index,
                signals: signals.clone(),
                armed: true,
            };

            let signal = tokio::select! {
                result = callback.invoke() => match result {
                    Ok(Flow::Continue) => TaskSignal::Done,
                    Ok(Flow::Transition(request)) => TaskSignal::Transition(request),
                    Err(cause) => TaskSignal::Errored(cause),
                },
                () = cancel.cancelled() => TaskSignal::Cancelled,
            };

            guard.armed = false;
            let _ = signals.send((index, signal));
        })
    }
}

struct PanicSignal<S> {
    index: usize,
    signals: mpsc::UnboundedSender<(usize, TaskSignal<S>)>,
    armed: bool,
}

impl<S> Drop for PanicSignal<S> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self
                .signals
                .send((self.index, TaskSignal::Errored(Box::new(CallbackPanicked))));
        }
    }
}
