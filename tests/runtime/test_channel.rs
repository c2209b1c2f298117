//! Tests for the hand-off channel.

use std::task::Poll;

use kodegen_flow::runtime::channel;
use kodegen_flow::{CancelCause, Capacity, ChannelSpec, FlowError, Overflow};

#[tokio::test]
async fn test_rendezvous_send_waits_for_receiver() {
    let (tx, rx) = channel::<i32>(ChannelSpec::RENDEZVOUS);
    let send = tx.send(1);
    tokio::pin!(send);
    assert!(futures::poll!(send.as_mut()).is_pending());

    assert_eq!(rx.recv().await.unwrap(), Some(1));
    assert!(matches!(futures::poll!(send.as_mut()), Poll::Ready(Ok(()))));
}

#[tokio::test]
async fn test_bounded_send_suspends_when_full() {
    let (tx, rx) = channel::<i32>(ChannelSpec::bounded(2));
    tx.send(1).await.unwrap();
    tx.send(2).await.unwrap();
    assert_eq!(tx.len(), 2);

    let third = tx.send(3);
    tokio::pin!(third);
    assert!(futures::poll!(third.as_mut()).is_pending());
    assert_eq!(rx.recv().await.unwrap(), Some(1));
    assert!(matches!(futures::poll!(third.as_mut()), Poll::Ready(Ok(()))));
    assert_eq!(rx.recv().await.unwrap(), Some(2));
    assert_eq!(rx.recv().await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_conflated_keeps_newest() {
    let (tx, rx) = channel(ChannelSpec::CONFLATED);
    for i in 1..=3 {
        tx.send(i).await.unwrap();
    }
    drop(tx);
    assert_eq!(rx.recv().await.unwrap(), Some(3));
    assert_eq!(rx.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_overflow_policies() {
    let (tx, rx) = channel(ChannelSpec::new(Capacity::Bounded(2), Overflow::DropOldest));
    for i in 1..=3 {
        tx.send(i).await.unwrap();
    }
    assert_eq!(rx.recv().await.unwrap(), Some(2));
    assert_eq!(rx.recv().await.unwrap(), Some(3));

    let (tx, rx) = channel(ChannelSpec::new(Capacity::Bounded(2), Overflow::DropLatest));
    for i in 1..=3 {
        tx.send(i).await.unwrap();
    }
    assert_eq!(rx.recv().await.unwrap(), Some(1));
    assert_eq!(rx.recv().await.unwrap(), Some(2));
    assert!(tx.is_empty());
}

#[tokio::test]
async fn test_unbounded_never_suspends() {
    let (tx, rx) = channel(ChannelSpec::UNBOUNDED);
    for i in 0..1_000 {
        tx.send(i).await.unwrap();
    }
    assert_eq!(tx.len(), 1_000);
    assert_eq!(rx.recv().await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_failure_is_seen_after_queued_values() {
    let (tx, rx) = channel(ChannelSpec::bounded(4));
    tx.send("a").await.unwrap();
    tx.complete(Err(FlowError::failure("producer failed")));

    assert_eq!(rx.recv().await.unwrap(), Some("a"));
    assert!(matches!(rx.recv().await, Err(FlowError::Production(_))));
}

#[tokio::test]
async fn test_channel_closes_with_last_sender() {
    let (tx, rx) = channel::<u8>(ChannelSpec::bounded(1));
    let second = tx.clone();
    drop(tx);
    second.send(7).await.unwrap();
    second.complete(Ok(()));
    assert_eq!(rx.recv().await.unwrap(), Some(7));
    assert_eq!(rx.recv().await.unwrap(), None);
}

#[tokio::test]
async fn test_send_fails_once_receiver_is_gone() {
    let (tx, rx) = channel::<u8>(ChannelSpec::RENDEZVOUS);
    drop(rx);
    assert!(matches!(
        tx.send(1).await,
        Err(FlowError::Cancelled(CancelCause::Released))
    ));
}
