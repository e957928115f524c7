//! Outcome resolution: completion, timeouts, transitions, failure collection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_stage::{Flow, Outcome, Stage, StageCallback, StageError, StageKind, TransitionRequest};

#[tokio::test(start_paused = true)]
async fn all_callbacks_complete() {
    let mut stage: Stage<&str> = Stage::new(StageKind::OnEnter);
    for _ in 0..3 {
        stage.add_callback(StageCallback::new(|| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(Flow::Continue)
        }));
    }

    let start = Instant::now();
    let outcome = stage.run().await.unwrap();

    assert!(outcome.is_completed());
    assert!(start.elapsed() >= Duration::from_millis(10));
    assert!(start.elapsed() < Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn transition_cancels_sibling() {
    let finished = Arc::new(AtomicBool::new(false));
    let finished_in_cb = Arc::clone(&finished);

    let mut stage = Stage::new(StageKind::OnRun);
    stage.add_callback(StageCallback::new(move || {
        let finished = Arc::clone(&finished_in_cb);
        async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            finished.store(true, Ordering::SeqCst);
            Ok(Flow::Continue)
        }
    }));
    stage.add_callback(StageCallback::new(|| async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Flow::transition("X"))
    }));

    let start = Instant::now();
    let outcome = stage.run().await.unwrap();

    let Outcome::Transitioned(request) = outcome else {
        panic!("expected Transitioned, got {outcome:?}");
    };
    assert_eq!(*request.target(), "X");
    assert!(start.elapsed() < Duration::from_millis(100));
    // The sleeper was cancelled, not run to completion.
    assert!(!finished.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn deadline_beats_slow_callback() {
    let mut stage = Stage::new(StageKind::OnRun);
    stage.configure_timeout(Duration::from_millis(50), Some("ErrorState"));
    stage.add_callback(StageCallback::new(|| async {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        Ok(Flow::Continue)
    }));

    let start = Instant::now();
    let outcome = stage.run().await.unwrap();

    let Outcome::TimedOut { fallback } = outcome else {
        panic!("expected TimedOut, got {outcome:?}");
    };
    assert_eq!(fallback, "ErrorState");
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn fired_deadline_without_fallback_is_fatal() {
    let mut stage: Stage<&str> = Stage::new(StageKind::OnRun);
    stage.configure_timeout(Duration::from_millis(50), None);
    stage.add_callback(StageCallback::new(|| async {
        tokio::time::sleep(Duration::from_millis(1000)).await;
        Ok(Flow::Continue)
    }));

    let err = stage.run().await.unwrap_err();
    let StageError::MissingTimeoutFallback { kind, timeout } = err;
    assert_eq!(kind, StageKind::OnRun);
    assert_eq!(timeout, Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn missing_fallback_is_not_an_error_before_the_deadline_fires() {
    let mut stage: Stage<&str> = Stage::new(StageKind::OnRun);
    stage.configure_timeout(Duration::from_millis(50), None);
    stage.add_callback(StageCallback::new(|| async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(Flow::Continue)
    }));

    let outcome = stage.run().await.unwrap();
    assert!(outcome.is_completed());
}

#[tokio::test(start_paused = true)]
async fn concurrent_errors_are_all_collected() {
    let mut stage: Stage<&str> = Stage::new(StageKind::OnRun);
    stage.add_callback(StageCallback::new(|| async {
        Err(std::io::Error::other("A failed").into())
    }));
    stage.add_callback(StageCallback::new(|| async {
        Err(std::io::Error::other("B failed").into())
    }));

    let outcome = stage.run().await.unwrap();

    let Outcome::Failed { causes } = outcome else {
        panic!("expected Failed, got {outcome:?}");
    };
    let mut messages: Vec<String> = causes.iter().map(|cause| cause.to_string()).collect();
    messages.sort();
    assert_eq!(messages, ["A failed", "B failed"]);
}

#[tokio::test(start_paused = true)]
async fn empty_stage_completes_without_arming_the_deadline() {
    let mut stage: Stage<&str> = Stage::new(StageKind::OnExit);
    // Misconfigured on purpose: with zero callbacks the deadline must never
    // be armed, so this cannot turn fatal either.
    stage.configure_timeout(Duration::from_millis(1), None);

    let start = Instant::now();
    let outcome = stage.run().await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn transition_wins_over_concurrent_error() {
    // Error callback first in spawn order: its signal commits teardown, yet
    // the transition that raced it must still win.
    let mut stage = Stage::new(StageKind::OnRun);
    stage.add_callback(StageCallback::new(|| async {
        Err(std::io::Error::other("incidental failure").into())
    }));
    stage.add_callback(StageCallback::new(|| async { Ok(Flow::transition("X")) }));

    let outcome = stage.run().await.unwrap();
    let Outcome::Transitioned(request) = outcome else {
        panic!("expected Transitioned, got {outcome:?}");
    };
    assert_eq!(*request.target(), "X");
}

#[tokio::test(start_paused = true)]
async fn transition_wins_when_it_arrives_first() {
    let mut stage = Stage::new(StageKind::OnRun);
    stage.add_callback(StageCallback::new(|| async { Ok(Flow::transition("X")) }));
    stage.add_callback(StageCallback::new(|| async {
        Err(std::io::Error::other("incidental failure").into())
    }));

    let outcome = stage.run().await.unwrap();
    assert!(outcome.is_transitioned());
}

#[tokio::test(start_paused = true)]
async fn exactly_one_of_two_simultaneous_transitions_wins() {
    let mut stage = Stage::new(StageKind::OnRun);
    stage.add_callback(StageCallback::new(|| async { Ok(Flow::transition("X1")) }));
    stage.add_callback(StageCallback::new(|| async { Ok(Flow::transition("X2")) }));

    let outcome = stage.run().await.unwrap();
    let Outcome::Transitioned(request) = outcome else {
        panic!("expected Transitioned, got {outcome:?}");
    };
    // Which one wins is unspecified; exactly one must.
    assert!(["X1", "X2"].contains(request.target()));
}

#[tokio::test(start_paused = true)]
async fn transition_payload_reaches_the_driver() {
    let mut stage = Stage::new(StageKind::OnRun);
    stage.add_callback(StageCallback::new(|| async {
        Ok(Flow::Transition(TransitionRequest::with_payload(
            "Next", 7u32,
        )))
    }));

    let outcome = stage.run().await.unwrap();
    let Outcome::Transitioned(mut request) = outcome else {
        panic!("expected Transitioned, got {outcome:?}");
    };
    assert_eq!(request.take_payload::<u32>(), Some(Box::new(7u32)));
}

#[tokio::test(start_paused = true)]
async fn stage_reruns_with_fresh_callback_invocations() {
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in_cb = Arc::clone(&runs);

    let mut stage: Stage<&str> = Stage::new(StageKind::OnRun);
    stage.add_callback(StageCallback::new(move || {
        let runs = Arc::clone(&runs_in_cb);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(Flow::Continue)
        }
    }));

    assert!(stage.run().await.unwrap().is_completed());
    assert!(stage.run().await.unwrap().is_completed());
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn duplicate_callback_runs_twice() {
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in_cb = Arc::clone(&runs);

    let callback: StageCallback<&str> = StageCallback::new(move || {
        let runs = Arc::clone(&runs_in_cb);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(Flow::Continue)
        }
    });

    let mut stage = Stage::new(StageKind::OnEnter);
    stage.add_callback(callback.clone());
    stage.add_callback(callback);

    assert!(stage.run().await.unwrap().is_completed());
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}
