//! Tests for cooperative cancellation of collections.

use std::time::Duration;

use futures::StreamExt;
use kodegen_flow::{
    CancelCause, CancellationToken, Completion, ExecutionContext, Flow, FlowError, flow,
};

use super::support::{Log, ticker};

/// Collect `source`, cancelling `token` from the collector when it sees `at`.
async fn collect_cancelling_at(source: Flow<i32>, at: i32) -> (Vec<i32>, Completion) {
    let token = CancellationToken::new();
    let stopper = token.clone();
    let collected = Log::default();
    let sink = collected.clone();
    let completion = source
        .collect(
            move |value| {
                sink.push(value);
                if value == at {
                    stopper.cancel();
                }
                futures::future::ready(Ok(()))
            },
            &token,
        )
        .await;
    (collected.snapshot(), completion)
}

#[tokio::test]
async fn test_flow_builder_checks_token_on_emit() {
    let numbers = flow(|emitter| async move {
        for i in 1..=5 {
            emitter.emit(i).await?;
        }
        Ok(())
    });
    let (values, completion) = collect_cancelling_at(numbers, 3).await;
    assert_eq!(values, vec![1, 2, 3]);
    assert!(matches!(completion, Completion::Cancelled(CancelCause::Requested)));
}

#[tokio::test]
async fn test_iter_source_runs_to_end_but_reports_cancellation() {
    let (values, completion) = collect_cancelling_at(Flow::iter(1..=5), 3).await;
    assert_eq!(values, vec![1, 2, 3, 4, 5]);
    assert!(completion.is_cancelled());
}

#[tokio::test]
async fn test_cancellable_makes_iter_responsive() {
    let (values, completion) = collect_cancelling_at(Flow::iter(1..=5).cancellable(), 3).await;
    assert_eq!(values, vec![1, 2, 3]);
    assert!(completion.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_times_out_collection() {
    let token = CancellationToken::new();
    token.cancel_after(Duration::from_millis(250));
    let collected = Log::default();
    let sink = collected.clone();
    let completion = ticker(5, Duration::from_millis(100))
        .collect(
            move |value| {
                sink.push(value);
                futures::future::ready(Ok(()))
            },
            &token,
        )
        .await;

    assert_eq!(collected.snapshot(), vec![1, 2]);
    assert!(matches!(
        completion,
        Completion::Cancelled(CancelCause::TimedOut(after)) if after == Duration::from_millis(250)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_reaches_every_merged_inner_flow() {
    let causes = Log::default();
    let hooks = causes.clone();
    let token = CancellationToken::new();
    let stopper = token.clone();
    let completion = Flow::iter(vec![1, 2, 3])
        .flat_map_merge(3, move |v| {
            let hooks = hooks.clone();
            flow(move |emitter| async move {
                emitter.emit(v).await?;
                tokio::time::sleep(Duration::from_secs(10)).await;
                emitter.emit(v).await
            })
            .on_completion(move |cause| {
                hooks.push(cause.is_some_and(FlowError::is_cancellation));
            })
        })
        .collect(
            move |_| {
                stopper.cancel_with(CancelCause::reason("enough"));
                futures::future::ready(Ok(()))
            },
            &token,
        )
        .await;

    assert!(matches!(completion, Completion::Cancelled(CancelCause::Reason(ref r)) if &**r == "enough"));
    assert_eq!(causes.snapshot(), vec![true, true, true]);
}

#[tokio::test]
async fn test_cancellation_stops_producer_on_other_context() {
    let pool = ExecutionContext::pool("cancel-pool", 1).unwrap();
    let causes = Log::default();
    let hook = causes.clone();
    let token = CancellationToken::new();
    let stopper = token.clone();
    let completion = flow(|emitter| async move {
        let mut i = 0u64;
        loop {
            i += 1;
            emitter.emit(i).await?;
        }
    })
    .on_completion(move |cause| hook.push(cause.is_some_and(FlowError::is_cancellation)))
    .on_context(pool)
    .collect(
        move |value| {
            if value == 3 {
                stopper.cancel();
            }
            futures::future::ready(Ok(()))
        },
        &token,
    )
    .await;

    assert!(completion.is_cancelled());
    // The producer is joined before collect returns.
    assert_eq!(causes.snapshot(), vec![true]);
}

#[tokio::test]
async fn test_into_stream_yields_values_then_failure() {
    let failing = flow(|emitter| async move {
        emitter.emit(1).await?;
        emitter.emit(2).await?;
        Err(FlowError::failure("stream source failed"))
    });
    let items: Vec<_> = failing.into_stream().collect().await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().ok(), Some(&1));
    assert_eq!(items[1].as_ref().ok(), Some(&2));
    assert!(matches!(items[2], Err(FlowError::Production(_))));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_stream_cancels_collection() {
    let causes = Log::default();
    let hook = causes.clone();
    let mut stream = ticker(100, Duration::from_millis(10))
        .on_completion(move |cause| hook.push(cause.is_some_and(FlowError::is_cancellation)))
        .into_stream();
    assert_eq!(stream.next().await.unwrap().unwrap(), 1);
    drop(stream);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(causes.snapshot(), vec![true]);
}
