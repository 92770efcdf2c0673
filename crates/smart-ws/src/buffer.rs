//! Bounded outbound buffer for messages sent while no session is open.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::config::{BufferConfig, DropStrategy};

/// A payload waiting for a session, with the time it was queued.
#[derive(Clone, Debug)]
pub struct BufferedMessage<T> {
    pub payload: T,
    pub enqueued_at: Instant,
}

/// Result of [`OutboundBuffer::enqueue`].
#[derive(Debug)]
pub(crate) enum Enqueued<T> {
    /// Appended without displacing anything.
    Queued,
    /// Appended after evicting the oldest message.
    Evicted(BufferedMessage<T>),
    /// The buffer was full and the incoming message was discarded.
    Rejected(T),
}

pub(crate) struct OutboundBuffer<T> {
    queue: VecDeque<BufferedMessage<T>>,
    capacity: usize,
    strategy: DropStrategy,
}

impl<T> OutboundBuffer<T> {
    pub(crate) fn new(config: &BufferConfig) -> Self {
        Self {
            queue: VecDeque::with_capacity(config.capacity.min(1024)),
            capacity: config.capacity,
            strategy: config.drop_strategy,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Append a payload, applying the drop strategy when full.
    pub(crate) fn enqueue(&mut self, payload: T) -> Enqueued<T> {
        if self.capacity == 0 {
            return Enqueued::Rejected(payload);
        }

        let message = BufferedMessage {
            payload,
            enqueued_at: Instant::now(),
        };

        if self.queue.len() < self.capacity {
            self.queue.push_back(message);
            return Enqueued::Queued;
        }

        match self.strategy {
            DropStrategy::Oldest => {
                let evicted = self.queue.pop_front();
                self.queue.push_back(message);
                match evicted {
                    Some(evicted) => Enqueued::Evicted(evicted),
                    None => Enqueued::Queued,
                }
            }
            DropStrategy::Newest => Enqueued::Rejected(message.payload),
        }
    }

    /// Oldest message, left in place until it has been written.
    pub(crate) fn front(&self) -> Option<&BufferedMessage<T>> {
        self.queue.front()
    }

    pub(crate) fn pop_front(&mut self) -> Option<BufferedMessage<T>> {
        self.queue.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &BufferedMessage<T>> {
        self.queue.iter()
    }
}
