//! Hand-off channel between a producer and the stage consuming its values.
//!
//! One channel lives for one collection. Senders may be cloned (merging
//! operators run several producers into one channel); there is exactly one
//! receiver. The channel closes when a sender fails it or when the last
//! sender is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::trace;
use tokio::sync::Notify;

use crate::error::{FlowError, FlowResult};

/// How many values may wait between producer and consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// No buffer: `send` returns once the consumer took the value
    Rendezvous,
    /// Up to `n` queued values
    Bounded(usize),
    /// No limit
    Unbounded,
    /// A single slot that newer values overwrite
    Conflated,
}

/// What a bounded channel does with a value that does not fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Suspend the producer until there is room
    Suspend,
    /// Evict the oldest queued value
    DropOldest,
    /// Discard the value being sent
    DropLatest,
}

/// Capacity plus overflow policy of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    pub capacity: Capacity,
    pub overflow: Overflow,
}

impl ChannelSpec {
    pub const RENDEZVOUS: ChannelSpec = ChannelSpec {
        capacity: Capacity::Rendezvous,
        overflow: Overflow::Suspend,
    };

    pub const CONFLATED: ChannelSpec = ChannelSpec {
        capacity: Capacity::Conflated,
        overflow: Overflow::DropOldest,
    };

    pub const UNBOUNDED: ChannelSpec = ChannelSpec {
        capacity: Capacity::Unbounded,
        overflow: Overflow::Suspend,
    };

    /// Normalised spec. A rendezvous channel that may drop values becomes a
    /// one-slot bounded channel; `Bounded(0)` is a rendezvous.
    #[must_use]
    pub fn new(capacity: Capacity, overflow: Overflow) -> Self {
        match (capacity, overflow) {
            (Capacity::Rendezvous | Capacity::Bounded(0), Overflow::Suspend) => Self::RENDEZVOUS,
            (Capacity::Rendezvous | Capacity::Bounded(0), overflow) => Self {
                capacity: Capacity::Bounded(1),
                overflow,
            },
            (Capacity::Conflated, _) => Self::CONFLATED,
            (Capacity::Unbounded, _) => Self::UNBOUNDED,
            (capacity, overflow) => Self { capacity, overflow },
        }
    }

    /// Bounded channel that suspends the producer when full.
    #[must_use]
    pub fn bounded(size: usize) -> Self {
        Self::new(Capacity::Bounded(size), Overflow::Suspend)
    }

    /// Combine two adjacent channel requests into one channel.
    #[must_use]
    pub fn fuse(self, next: ChannelSpec) -> ChannelSpec {
        match (self.capacity, next.capacity) {
            (Capacity::Conflated, _) | (_, Capacity::Conflated) => Self::CONFLATED,
            (Capacity::Unbounded, _) | (_, Capacity::Unbounded) => Self::UNBOUNDED,
            (Capacity::Rendezvous, _) => next,
            (_, Capacity::Rendezvous) => self,
            (Capacity::Bounded(a), Capacity::Bounded(b)) => {
                Self::new(Capacity::Bounded(a.saturating_add(b)), next.overflow)
            }
        }
    }
}

impl Default for ChannelSpec {
    fn default() -> Self {
        Self::RENDEZVOUS
    }
}

struct State<T> {
    queue: VecDeque<T>,
    closed: Option<FlowResult<()>>,
    senders: usize,
    receiver_alive: bool,
    pushed: u64,
    taken: u64,
}

struct Shared<T> {
    spec: ChannelSpec,
    state: Mutex<State<T>>,
    readable: Notify,
    writable: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_with(&self, result: FlowResult<()>) {
        {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(result);
            }
        }
        self.readable.notify_one();
        self.writable.notify_waiters();
    }
}

enum Offer<T> {
    Accepted,
    Full(T),
    Handoff(u64),
}

fn offer<T>(spec: ChannelSpec, state: &mut State<T>, value: T) -> Offer<T> {
    let len = state.queue.len();
    match (spec.capacity, spec.overflow) {
        (Capacity::Conflated, _) => {
            let dropped = state.queue.len() as u64;
            state.queue.clear();
            state.taken += dropped;
        }
        (Capacity::Unbounded, _) => {}
        (Capacity::Bounded(size), Overflow::Suspend) if len >= size => return Offer::Full(value),
        (Capacity::Bounded(size), Overflow::DropOldest) if len >= size => {
            trace!("channel full, evicting oldest value");
            state.queue.pop_front();
            state.taken += 1;
        }
        (Capacity::Bounded(size), Overflow::DropLatest) if len >= size => {
            trace!("channel full, dropping latest value");
            return Offer::Accepted;
        }
        (Capacity::Bounded(_), _) => {}
        (Capacity::Rendezvous, _) if len > 0 => return Offer::Full(value),
        (Capacity::Rendezvous, _) => {
            let ticket = state.pushed;
            state.pushed += 1;
            state.queue.push_back(value);
            return Offer::Handoff(ticket);
        }
    }
    state.pushed += 1;
    state.queue.push_back(value);
    Offer::Accepted
}

/// Create a channel for one producer/consumer pairing.
#[must_use]
pub fn channel<T>(spec: ChannelSpec) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        spec,
        state: Mutex::new(State {
            queue: VecDeque::new(),
            closed: None,
            senders: 1,
            receiver_alive: true,
            pushed: 0,
            taken: 0,
        }),
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

/// Producing half of a channel
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Deliver a value, suspending according to the channel's spec.
    ///
    /// Fails with `Cancelled(Released)` once the receiver is gone.
    pub async fn send(&self, value: T) -> FlowResult<()> {
        let mut pending = value;
        let ticket = loop {
            let writable = self.shared.writable.notified();
            {
                let mut state = self.shared.lock();
                // A closed channel with live senders was failed by a sibling.
                if !state.receiver_alive || state.closed.is_some() {
                    return Err(FlowError::released());
                }
                match offer(self.shared.spec, &mut state, pending) {
                    Offer::Accepted => {
                        drop(state);
                        self.shared.readable.notify_one();
                        return Ok(());
                    }
                    Offer::Handoff(ticket) => break ticket,
                    Offer::Full(value) => pending = value,
                }
            }
            writable.await;
        };

        self.shared.readable.notify_one();
        loop {
            let writable = self.shared.writable.notified();
            {
                let state = self.shared.lock();
                if state.taken > ticket {
                    return Ok(());
                }
                if !state.receiver_alive {
                    return Err(FlowError::released());
                }
            }
            writable.await;
        }
    }

    /// Close the channel with `result` if it is an error; otherwise just
    /// release this sender.
    pub fn complete(self, result: FlowResult<()>) {
        if let Err(error) = result {
            self.shared.close_with(Err(error));
        }
    }

    /// Number of values currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.lock().senders += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let last = {
            let mut state = self.shared.lock();
            state.senders -= 1;
            state.senders == 0
        };
        if last {
            self.shared.close_with(Ok(()));
        }
    }
}

/// Consuming half of a channel
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Next value, `None` once closed normally, or the error the channel
    /// was failed with. Queued values are drained before the close is seen.
    ///
    /// Cancel safe: a value is only removed when it is returned.
    pub async fn recv(&self) -> FlowResult<Option<T>> {
        loop {
            let readable = self.shared.readable.notified();
            {
                let mut state = self.shared.lock();
                if let Some(value) = state.queue.pop_front() {
                    state.taken += 1;
                    drop(state);
                    self.shared.writable.notify_waiters();
                    return Ok(Some(value));
                }
                if let Some(closed) = &state.closed {
                    return closed.clone().map(|()| None);
                }
            }
            readable.await;
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.receiver_alive = false;
            state.queue.clear();
        }
        self.shared.writable.notify_waiters();
    }
}
