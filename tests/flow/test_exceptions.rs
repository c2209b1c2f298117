//! Tests for exception transparency, catch and completion hooks.

use std::time::Duration;

use kodegen_flow::{
    CancellationToken, Completion, ExecutionContext, Flow, FlowError, flow,
};

use super::support::Log;

fn failing_after_one() -> Flow<i32> {
    flow(|emitter| async move {
        emitter.emit(1).await?;
        Err(FlowError::failure("upstream broke"))
    })
}

#[tokio::test]
async fn test_catch_ignores_downstream_failure() {
    let handled = Log::default();
    let seen = handled.clone();
    let completion = Flow::iter(vec![1, 2, 3])
        .catch(move |error, _emitter| {
            seen.push(error.to_string());
            async { Ok(()) }
        })
        .try_map(|x| {
            if x == 2 {
                Err(FlowError::failure("rejected 2"))
            } else {
                Ok(x)
            }
        })
        .drain(&CancellationToken::new())
        .await;

    // Raised below the catch, so it surfaces as a consumption failure.
    assert!(matches!(completion, Completion::Failed(FlowError::Consumption(_))));
    assert!(handled.snapshot().is_empty(), "catch must not see downstream failures");
}

#[tokio::test]
async fn test_collector_failure_is_consumption_and_passes_catch() {
    let handled = Log::default();
    let seen = handled.clone();
    let completion = Flow::iter(vec![1, 2, 3])
        .catch(move |error, _emitter| {
            seen.push(error.to_string());
            async { Ok(()) }
        })
        .collect(
            |x| async move {
                if x == 2 {
                    Err(FlowError::failure("collector refused 2"))
                } else {
                    Ok(())
                }
            },
            &CancellationToken::new(),
        )
        .await;

    match completion {
        Completion::Failed(FlowError::Consumption(failure)) => {
            assert_eq!(failure.to_string(), "collector refused 2");
        }
        other => panic!("expected consumption failure, got {other:?}"),
    }
    assert!(handled.snapshot().is_empty());
}

#[tokio::test]
async fn test_declarative_catch_handles_on_each_failure() {
    let handled = Log::default();
    let seen = handled.clone();
    let collected = Log::default();
    let sink = collected.clone();
    let completion = Flow::iter(vec![1, 2, 3])
        .on_each(|x| {
            let x = *x;
            async move {
                if x == 2 {
                    Err(FlowError::failure("bad value 2"))
                } else {
                    Ok(())
                }
            }
        })
        .catch(move |error, _emitter| {
            seen.push(error.to_string());
            async { Ok(()) }
        })
        .collect(
            move |x| {
                sink.push(x);
                futures::future::ready(Ok(()))
            },
            &CancellationToken::new(),
        )
        .await;

    assert!(completion.is_normal());
    assert_eq!(collected.snapshot(), vec![1]);
    assert_eq!(handled.snapshot().len(), 1);
    assert!(handled.snapshot()[0].contains("bad value 2"));
}

#[tokio::test]
async fn test_catch_can_emit_replacement_values() {
    let values = failing_after_one()
        .catch(|_error, emitter| async move { emitter.emit(-1).await })
        .to_vec(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(values, vec![1, -1]);
}

#[tokio::test]
async fn test_catch_can_rethrow() {
    let completion = failing_after_one()
        .catch(|error, _emitter| async move { Err(error) })
        .drain(&CancellationToken::new())
        .await;
    assert!(completion.is_failed());
}

#[tokio::test]
async fn test_on_completion_sees_failure_before_catch() {
    let causes = Log::default();
    let hook = causes.clone();
    let completion = failing_after_one()
        .on_completion(move |cause| hook.push(cause.map(ToString::to_string)))
        .catch(|_error, _emitter| async { Ok(()) })
        .drain(&CancellationToken::new())
        .await;

    assert!(completion.is_normal());
    let causes = causes.snapshot();
    assert_eq!(causes.len(), 1);
    assert!(causes[0].as_deref().is_some_and(|c| c.contains("upstream broke")));
}

#[tokio::test(start_paused = true)]
async fn test_catch_does_not_intercept_cancellation() {
    let handled = Log::default();
    let seen = handled.clone();
    let token = CancellationToken::new();
    let stopper = token.clone();
    let completion = flow(|emitter| async move {
        emitter.emit(1).await?;
        tokio::time::sleep(Duration::from_secs(10)).await;
        emitter.emit(2).await
    })
    .catch(move |error, _emitter| {
        seen.push(error.to_string());
        async { Ok(()) }
    })
    .collect(
        move |_| {
            stopper.cancel();
            futures::future::ready(Ok(()))
        },
        &token,
    )
    .await;

    assert!(completion.is_cancelled());
    assert!(handled.snapshot().is_empty());
}

#[tokio::test]
async fn test_panicking_producer_on_pool_fails_collection() {
    let pool = ExecutionContext::pool("panic-pool", 1).unwrap();
    let completion = flow(|emitter| async move {
        emitter.emit(1).await?;
        panic!("producer exploded");
    })
    .on_context(pool)
    .drain(&CancellationToken::new())
    .await;

    match completion {
        Completion::Failed(FlowError::Production(failure)) => {
            assert!(failure.to_string().contains("producer exploded"));
        }
        other => panic!("expected production failure, got {other:?}"),
    }
}
