//! Tests for buffer, conflate and collect_latest timing.

use std::time::Duration;

use kodegen_flow::{CancellationToken, Capacity, ChannelSpec, Overflow, StageKind};
use tokio::time::Instant;

use super::support::{Log, ticker};

async fn slow_collect(flow: kodegen_flow::Flow<u32>, pause: Duration) -> (Vec<u32>, Duration) {
    let started = Instant::now();
    let collected = Log::default();
    let sink = collected.clone();
    let completion = flow
        .collect(
            move |value| {
                let sink = sink.clone();
                async move {
                    tokio::time::sleep(pause).await;
                    sink.push(value);
                    Ok(())
                }
            },
            &CancellationToken::new(),
        )
        .await;
    assert!(completion.is_normal());
    (collected.snapshot(), started.elapsed())
}

#[tokio::test(start_paused = true)]
async fn test_unbuffered_producer_waits_for_collector() {
    let (values, elapsed) =
        slow_collect(ticker(3, Duration::from_millis(100)), Duration::from_millis(300)).await;
    assert_eq!(values, vec![1, 2, 3]);
    assert!(elapsed >= Duration::from_millis(1200), "took {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_buffer_overlaps_producer_and_collector() {
    let buffered = ticker(3, Duration::from_millis(100)).buffer(ChannelSpec::bounded(64));
    let (values, elapsed) = slow_collect(buffered, Duration::from_millis(300)).await;
    assert_eq!(values, vec![1, 2, 3]);
    assert!(elapsed < Duration::from_millis(1100), "took {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_conflate_skips_intermediate_values() {
    let conflated = ticker(4, Duration::from_millis(100)).conflate();
    let (values, _) = slow_collect(conflated, Duration::from_millis(250)).await;
    assert_eq!(values, vec![1, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_drop_latest_buffer_keeps_earliest_values() {
    let spec = ChannelSpec::new(Capacity::Bounded(1), Overflow::DropLatest);
    let dropping = ticker(5, Duration::from_millis(100)).buffer(spec);
    let (values, _) = slow_collect(dropping, Duration::from_millis(250)).await;
    assert_eq!(values.first(), Some(&1));
    assert!(values.windows(2).all(|pair| pair[0] < pair[1]), "{values:?}");
    assert!(values.len() < 5);
}

#[tokio::test(start_paused = true)]
async fn test_collect_latest_cancels_slow_action() {
    let started = Log::default();
    let finished = Log::default();
    let (start_log, done_log) = (started.clone(), finished.clone());
    let completion = ticker(3, Duration::from_millis(100))
        .collect_latest(
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
    assert_eq!(finished.snapshot(), vec![3]);
}

#[test]
fn test_adjacent_buffers_fuse_into_one_channel() {
    let fused = ticker(1, Duration::ZERO)
        .buffer(ChannelSpec::bounded(4))
        .buffer(ChannelSpec::bounded(6));
    let channels: Vec<_> = fused
        .stages()
        .into_iter()
        .filter(|stage| matches!(stage, StageKind::Channel { .. }))
        .collect();
    assert_eq!(
        channels,
        vec![StageKind::Channel {
            context: "caller".to_string(),
            spec: ChannelSpec::bounded(10),
        }]
    );

    let conflated = ticker(1, Duration::ZERO)
        .buffer(ChannelSpec::bounded(4))
        .conflate();
    assert!(conflated.stages().contains(&StageKind::Channel {
        context: "caller".to_string(),
        spec: ChannelSpec::CONFLATED,
    }));
}
