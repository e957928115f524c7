//! The structured-concurrency scope that runs one stage invocation.

use std::future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tokio_stage_core::{CallbackError, Outcome, StageError, StageKind, StateId, TransitionRequest};

use crate::callback::StageCallback;
use crate::task::{CallbackTask, TaskSignal};

/// One ephemeral execution scope: spawns a [`CallbackTask`] per callback,
/// races their signals against the stage deadline, and tears everything down
/// to exactly one [`Outcome`]. Constructed fresh for every stage run and
/// consumed by [`StageGroup::run`]; no state survives the invocation.
///
/// All signals funnel through one unbounded channel drained by a single
/// event loop, so the "first terminal signal wins" race is serialized in one
/// place and deterministic within a run.
pub(crate) struct StageGroup<S: StateId> {
    kind: StageKind,
    cancel: CancellationToken,
    signals: mpsc::UnboundedReceiver<(usize, TaskSignal<S>)>,
    handles: Vec<JoinHandle<()>>,
    outstanding: usize,
}

impl<S: StateId> StageGroup<S> {
    /// Spawns every callback. Tasks start unordered; none of them can
    /// observe cancellation before the group commits to an outcome.
    pub(crate) fn spawn(kind: StageKind, callbacks: &[StageCallback<S>]) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let handles = callbacks
            .iter()
            .enumerate()
            .map(|(index, callback)| {
                CallbackTask::new(index, callback.clone(), cancel.child_token(), tx.clone()).spawn()
            })
            .collect();

        Self {
            kind,
            cancel,
            signals: rx,
            handles,
            outstanding: callbacks.len(),
        }
    }

    /// Runs the group to resolution.
    ///
    /// The caller guarantees `callbacks` was non-empty; the empty stage is
    /// short-circuited before a group ever exists.
    pub(crate) async fn run(
        mut self,
        timeout: Option<Duration>,
        fallback: Option<S>,
        cancel_grace: Duration,
    ) -> Result<Outcome<S>, StageError> {
        let deadline = async {
            match timeout {
                Some(duration) => time::sleep(duration).await,
                None => future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut winner: Option<TransitionRequest<S>> = None;
        let mut causes: Vec<CallbackError> = Vec::new();

        // Race phase: the first error or transition signal, or the deadline,
        // commits the group to teardown.
        let fired: Option<Duration> = loop {
            tokio::select! {
                signal = self.signals.recv() => {
                    let Some((index, signal)) = signal else { break None };
                    self.outstanding -= 1;
                    match signal {
                        TaskSignal::Done | TaskSignal::Cancelled => {}
                        TaskSignal::Errored(cause) => {
                            debug!(stage = %self.kind, callback = index, error = %cause, "callback failed");
                            causes.push(cause);
                            break None;
                        }
                        TaskSignal::Transition(request) => {
                            debug!(
                                stage = %self.kind,
                                callback = index,
                                target = ?request.target(),
                                "callback requested transition"
                            );
                            winner = Some(request);
                            break None;
                        }
                    }
                    if self.outstanding == 0 {
                        break None;
                    }
                }
                () = &mut deadline => {
                    debug!(stage = %self.kind, ?timeout, "stage deadline elapsed");
                    break timeout;
                }
            }
        };

        // Teardown: cancel the stragglers and account for every task before
        // resolving. A caller that sees the outcome must never be able to
        // observe one of our tasks still running.
        self.cancel.cancel();
        let leaked = self
            .drain(fired.is_some(), &mut winner, &mut causes, cancel_grace)
            .await;
        if leaked > 0 {
            warn!(
                stage = %self.kind,
                leaked,
                grace = ?cancel_grace,
                "callbacks did not acknowledge cancellation within the grace window; resolving anyway"
            );
        }

        if let Some(elapsed) = fired {
            return match fallback {
                Some(fallback) => Ok(Outcome::TimedOut { fallback }),
                None => Err(StageError::MissingTimeoutFallback {
                    kind: self.kind,
                    timeout: elapsed,
                }),
            };
        }

        let outcome = if let Some(request) = winner {
            if !causes.is_empty() {
                warn!(
                    stage = %self.kind,
                    discarded = causes.len(),
                    "errors discarded in favor of the winning transition request"
                );
            }
            Outcome::Transitioned(request)
        } else if !causes.is_empty() {
            Outcome::Failed { causes }
        } else {
            Outcome::Completed
        };
        debug!(stage = %self.kind, outcome = outcome_label(&outcome), "stage resolved");
        Ok(outcome)
    }

    /// Collects the remaining signals and joins every task, bounded by the
    /// grace window. Returns how many tasks never acknowledged.
    ///
    /// Signals still in flight when cancellation was committed are honored:
    /// a late error joins the causes and a late transition still outranks
    /// them. Once the deadline has fired the outcome is fixed; late signals
    /// are logged and dropped.
    async fn drain(
        &mut self,
        timed_out: bool,
        winner: &mut Option<TransitionRequest<S>>,
        causes: &mut Vec<CallbackError>,
        grace: Duration,
    ) -> usize {
        let acknowledged = time::timeout(grace, async {
            while self.outstanding > 0 {
                let Some((index, signal)) = self.signals.recv().await else {
                    break;
                };
                self.outstanding -= 1;
                match signal {
                    TaskSignal::Done | TaskSignal::Cancelled => {}
                    TaskSignal::Errored(cause) => {
                        if timed_out {
                            warn!(
                                stage = %self.kind,
                                callback = index,
                                error = %cause,
                                "error discarded; stage already timed out"
                            );
                        } else {
                            causes.push(cause);
                        }
                    }
                    TaskSignal::Transition(request) => {
                        if timed_out {
                            warn!(
                                stage = %self.kind,
                                callback = index,
                                target = ?request.target(),
                                "transition request discarded; stage already timed out"
                            );
                        } else if winner.is_none() {
                            // Raced the committing error before cancellation
                            // took effect; transitions outrank errors.
                            *winner = Some(request);
                        }
                    }
                }
            }
            for handle in &mut self.handles {
                let _ = handle.await;
            }
        })
        .await;

        if acknowledged.is_err() {
            for handle in &self.handles {
                handle.abort();
            }
            self.outstanding
        } else {
            0
        }
    }
}

fn outcome_label<S>(outcome: &Outcome<S>) -> &'static str {
    match outcome {
        Outcome::Completed => "completed",
        Outcome::TimedOut { .. } => "timed_out",
        Outcome::Transitioned(_) => "transitioned",
        Outcome::Failed { .. } => "failed",
    }
}
