// Flow demo binary
//
// Runs a handful of pipelines that show cold collection, context
// confinement, buffering, flattening and cancellation, logging what each
// one observes. Set RUST_LOG=debug to see stage-level events.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use kodegen_flow::{CancellationToken, Flow, FlowConfig, flow};
use log::info;

fn ticker(count: u32, period: Duration) -> Flow<u32> {
    flow(move |emitter| async move {
        for i in 1..=count {
            tokio::time::sleep(period).await;
            emitter.emit(i).await?;
        }
        Ok(())
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = FlowConfig::from_env()?;
    info!("loaded {config:?}");
    let token = CancellationToken::new();

    // Cold: every collection restarts the producer.
    let starts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&starts);
    let cold = flow(move |emitter| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { emitter.emit_all([1, 2, 3]).await }
    });
    let first = cold.to_vec(&token).await?;
    let second = cold.to_vec(&token).await?;
    info!(
        "cold: {first:?} then {second:?}, producer started {} times",
        starts.load(Ordering::SeqCst)
    );

    // Context confinement: the producer runs on a pool thread.
    let pool = config.pool_context()?;
    let threads = flow(|emitter| async move {
        let name = std::thread::current().name().unwrap_or("unnamed").to_string();
        emitter.emit(name).await
    })
    .on_context(pool);
    info!("on_context: producer ran on {:?}", threads.to_vec(&token).await?);

    // Buffering and conflation against a slow collector.
    let started = tokio::time::Instant::now();
    let buffered = ticker(3, Duration::from_millis(100)).buffer(config.buffer_spec());
    buffered
        .collect(
            |value| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                info!("buffer: collected {value}");
                Ok(())
            },
            &token,
        )
        .await
        .into_result()?;
    info!("buffer: done in {:?}", started.elapsed());

    let conflated = ticker(5, Duration::from_millis(100)).conflate();
    let seen = conflated
        .then(|value| async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok::<_, kodegen_flow::FlowError>(value)
        })
        .to_vec(&token)
        .await?;
    info!("conflate: collector saw {seen:?}");

    // Flattening.
    let inner = |value: u32| {
        flow(move |emitter| async move {
            emitter.emit(format!("{value}: first")).await?;
            tokio::time::sleep(Duration::from_millis(500)).await;
            emitter.emit(format!("{value}: second")).await
        })
    };
    let merged = ticker(3, Duration::from_millis(100))
        .flat_map_merge(config.merge_concurrency, inner)
        .to_vec(&token)
        .await?;
    info!("flat_map_merge: {merged:?}");
    let latest = ticker(3, Duration::from_millis(100))
        .flat_map_latest(inner)
        .to_vec(&token)
        .await?;
    info!("flat_map_latest: {latest:?}");

    // Cancellation from outside the pipeline.
    let scoped = CancellationToken::new();
    scoped.cancel_after(Duration::from_millis(250));
    let completion = ticker(5, Duration::from_millis(100))
        .on_completion(|cause| info!("cancellation: producer finished with {cause:?}"))
        .drain(&scoped)
        .await;
    info!("cancellation: collection ended with {completion:?}");

    Ok(())
}
