use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Broadcast channel capacity for auth events
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Number of past events replayed to late subscribers
pub const EVENT_REPLAY_BUFFER: usize = 32;

/// Generic event stream for reactive event handling.
///
/// Events are fanned out to live subscribers and kept in a bounded replay
/// buffer so collaborators that mount late can catch up.
pub struct EventStream<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
    buffer: Arc<RwLock<VecDeque<T>>>,
    buffer_size: usize,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    /// Create a new event stream with the given channel capacity and replay size
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(buffer_size))),
            buffer_size,
        }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> Subscriber<T> {
        Subscriber {
            receiver: self.sender.subscribe(),
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Publish an event, returning the number of live subscribers that got it.
    ///
    /// An event published with no subscribers is still buffered for replay.
    pub async fn publish(&self, event: T) -> usize {
        let receivers = self.sender.send(event.clone()).unwrap_or(0);

        let mut buffer = self.buffer.write().await;
        buffer.push_back(event);
        while buffer.len() > self.buffer_size {
            buffer.pop_front();
        }

        debug!(receivers, "event published");
        receivers
    }
}

impl<T: Clone + Send + 'static> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            buffer: Arc::clone(&self.buffer),
            buffer_size: self.buffer_size,
        }
    }
}

/// Subscriber for receiving events from a stream
pub struct Subscriber<T: Clone + Send + 'static> {
    receiver: broadcast::Receiver<T>,
    buffer: Arc<RwLock<VecDeque<T>>>,
}

impl<T: Clone + Send + 'static> Subscriber<T> {
    /// Receive the next event
    pub async fn recv(&mut self) -> Result<T, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Replay the buffered events published before this call
    pub async fn replay_buffer(&self) -> Vec<T> {
        self.buffer.read().await.iter().cloned().collect()
    }
}
