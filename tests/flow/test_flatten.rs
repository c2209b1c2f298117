//! Tests for flat_map_concat, flat_map_merge and flat_map_latest.

use std::time::Duration;

use kodegen_flow::{CancellationToken, Completion, Flow, FlowError, StageKind, flow};

use super::support::{Log, init_logging, ticker, two_step};

const PAUSE: Duration = Duration::from_millis(500);

#[tokio::test(start_paused = true)]
async fn test_flat_map_concat_runs_inner_flows_in_sequence() {
    let values = ticker(3, Duration::from_millis(100))
        .flat_map_concat(|v| two_step(v, PAUSE))
        .to_vec(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        values,
        vec![
            "1: First", "1: Second", "2: First", "2: Second", "3: First", "3: Second"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_flat_map_merge_interleaves_inner_flows() {
    init_logging();
    let values = ticker(3, Duration::from_millis(100))
        .flat_map_merge(16, |v| two_step(v, PAUSE))
        .to_vec(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(
        values,
        vec![
            "1: First", "2: First", "3: First", "1: Second", "2: Second", "3: Second"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_flat_map_merge_with_concurrency_one_is_sequential() {
    let values = ticker(2, Duration::from_millis(100))
        .flat_map_merge(1, |v| two_step(v, PAUSE))
        .to_vec(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(values, vec!["1: First", "1: Second", "2: First", "2: Second"]);
}

#[tokio::test(start_paused = true)]
async fn test_flat_map_latest_cancels_previous_inner_flow() {
    let values = ticker(3, Duration::from_millis(100))
        .flat_map_latest(|v| two_step(v, PAUSE))
        .to_vec(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(values, vec!["1: First", "2: First", "3: First", "3: Second"]);
}

#[tokio::test(start_paused = true)]
async fn test_flat_map_latest_reports_completion_of_superseded_inner_flows() {
    let causes = Log::default();
    let hooks = causes.clone();
    let values = ticker(3, Duration::from_millis(100))
        .flat_map_latest(move |v| {
            let hooks = hooks.clone();
            flow(move |emitter| async move {
                emitter.emit(v).await?;
                tokio::time::sleep(PAUSE).await;
                emitter.emit(v * 10).await
            })
            .on_completion(move |cause| hooks.push((v, cause.map(FlowError::is_cancellation))))
        })
        .to_vec(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(values, vec![1, 2, 3, 30]);
    assert_eq!(
        causes.snapshot(),
        vec![(1, Some(true)), (2, Some(true)), (3, None)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_flat_map_latest_does_not_cancel_slow_collector() {
    let started = Log::default();
    let finished = Log::default();
    let (start_log, done_log) = (started.clone(), finished.clone());
    let completion = ticker(3, Duration::from_millis(100))
        .flat_map_latest(|v| Flow::iter(vec![v]))
        .collect(
            move |value| {
                let start_log = start_log.clone();
                let done_log = done_log.clone();
                async move {
                    start_log.push(value);
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    done_log.push(value);
                    Ok(())
                }
            },
            &CancellationToken::new(),
        )
        .await;

    assert!(completion.is_normal());
    assert_eq!(started.snapshot(), vec![1, 2, 3]);
    assert_eq!(finished.snapshot(), vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_inner_failure_cancels_merge_siblings() {
    init_logging();
    let causes = Log::default();
    let hooks = causes.clone();
    let completion = ticker(2, Duration::from_millis(100))
        .flat_map_merge(4, move |v| {
            let hooks = hooks.clone();
            flow(move |emitter| async move {
                if v == 2 {
                    return Err(FlowError::failure("inner 2 failed"));
                }
                emitter.emit(v).await?;
                tokio::time::sleep(Duration::from_secs(10)).await;
                emitter.emit(v * 10).await
            })
            .on_completion(move |cause| hooks.push((v, cause.map(FlowError::is_cancellation))))
        })
        .drain(&CancellationToken::new())
        .await;

    match completion {
        Completion::Failed(FlowError::Production(failure)) => {
            assert_eq!(failure.to_string(), "inner 2 failed");
        }
        other => panic!("expected production failure, got {other:?}"),
    }
    let mut causes = causes.snapshot();
    causes.sort_by_key(|(v, _)| *v);
    assert_eq!(causes, vec![(1, Some(true)), (2, Some(false))]);
}

#[test]
fn test_merge_concurrency_zero_is_clamped() {
    let merged = ticker(1, Duration::ZERO).flat_map_merge(0, |v| two_step(v, Duration::ZERO));
    assert_eq!(
        merged.stages().last(),
        Some(&StageKind::FlatMapMerge { concurrency: 1 })
    );
}
