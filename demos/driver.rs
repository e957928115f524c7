//! Example: a minimal driver loop over per-state stage runtimes.
//!
//! Builds three job states, wires concurrent callbacks into their stages,
//! then sequences `on_enter → on_run → on_exit` per state, following
//! transitions and timeout fallbacks until a terminal state is reached.

use std::collections::HashMap;
use std::time::Duration;

use tokio_stage::{Flow, Outcome, StageCallback, StageError, StageKind, StateRuntime};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum Job {
    Fetching,
    Processing,
    Done,
    Degraded,
}

fn fetching() -> StateRuntime<Job> {
    let mut runtime = StateRuntime::new(Job::Fetching);

    // Two concurrent fetches; the stage completes when both are done.
    for source in ["alpha", "beta"] {
        runtime
            .stage_mut(StageKind::OnRun)
            .add_callback(StageCallback::new(move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                println!("fetched from {source}");
                Ok(Flow::Continue)
            }));
    }
    runtime
        .stage_mut(StageKind::OnExit)
        .add_callback(StageCallback::new(|| async {
            println!("fetch stage done, moving on");
            Ok(Flow::transition(Job::Processing))
        }));

    runtime
}

fn processing() -> StateRuntime<Job> {
    let mut runtime = StateRuntime::new(Job::Processing);

    runtime
        .stage_mut(StageKind::OnEnter)
        .add_callback(StageCallback::new(|| async {
            println!("warming up the processor");
            Ok(Flow::Continue)
        }));

    // The slow path is bounded: if processing takes too long the machine
    // falls back to Degraded instead of hanging.
    runtime
        .stage_mut(StageKind::OnRun)
        .configure_timeout(Duration::from_millis(100), Some(Job::Degraded));
    runtime
        .stage_mut(StageKind::OnRun)
        .add_callback(StageCallback::new(|| async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            println!("processing finished in time");
            Ok(Flow::transition(Job::Done))
        }));

    runtime
}

#[tokio::main]
async fn main() -> Result<(), StageError> {
    let mut states: HashMap<Job, StateRuntime<Job>> = HashMap::new();
    states.insert(Job::Fetching, fetching());
    states.insert(Job::Processing, processing());

    let mut current = Job::Fetching;
    'machine: while !matches!(current, Job::Done | Job::Degraded) {
        let runtime = states
            .get_mut(&current)
            .expect("every non-terminal state has a runtime");

        for kind in StageKind::ALL {
            match runtime.run_stage(kind).await? {
                Outcome::Completed => {}
                Outcome::Transitioned(request) => {
                    println!("{current:?} requested {:?}", request.target());
                    current = request.into_target();
                    continue 'machine;
                }
                Outcome::TimedOut { fallback } => {
                    println!("{current:?} timed out, falling back to {fallback:?}");
                    current = fallback;
                    continue 'machine;
                }
                Outcome::Failed { causes } => {
                    eprintln!("{current:?} failed: {causes:?}");
                    break 'machine;
                }
            }
        }
        // All three stages completed without a transition; nothing left to run.
        break;
    }

    println!("machine halted in {current:?}");
    Ok(())
}
