use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use ergs_core::Block;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::RwLock;

/// Opaque handle returned by [`Hub::register`]; pass back to [`Hub::unregister`].
pub type SubscriberId = u64;

/// Default bounded capacity for a subscriber's queue.
pub const DEFAULT_CAPACITY: usize = 32;

/// In-process best-effort pub/sub hub for newly stored blocks.
///
/// `broadcast` never blocks the caller: a full subscriber queue is dropped
/// for that subscriber only, the broadcast itself never fails.
pub struct Hub {
    subscribers: RwLock<HashMap<SubscriberId, Sender<Block>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    pub async fn register(&self) -> (SubscriberId, Receiver<Block>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel(self.capacity);
        self.subscribers.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unregister(&self, id: SubscriberId) {
        self.subscribers.write().await.remove(&id);
    }

    /// Fans `block` out to every subscriber. A subscriber whose queue is
    /// currently full is skipped: the event is dropped for that
    /// subscriber only, never propagated as an error.
    pub async fn broadcast(&self, block: Block) {
        let subscribers = self.subscribers.read().await;
        for tx in subscribers.values() {
            let _ = tx.try_send(block.clone());
        }
    }

    pub async fn size(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ergs_core::Metadata;

    fn block(id: &str) -> Block {
        Block::new(id, "t", "src", "kind", Metadata::new())
    }

    #[tokio::test]
    async fn register_and_receive() {
        let hub = Hub::new(4);
        let (_id, mut rx) = hub.register().await;
        hub.broadcast(block("1")).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, "1");
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking_broadcast() {
        let hub = Hub::new(2);
        let (_id, mut rx) = hub.register().await;
        for i in 0..10 {
            hub.broadcast(block(&i.to_string())).await;
        }
        // Broadcast returned for all 10 without blocking; only the queue's
        // capacity worth of events survive for a stalled subscriber.
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received <= 2);
    }

    #[tokio::test]
    async fn fast_subscriber_still_gets_every_event_up_to_capacity() {
        let hub = Hub::new(1000);
        let (_id, mut rx) = hub.register().await;
        for i in 0..500 {
            hub.broadcast(block(&i.to_string())).await;
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 500);
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let hub = Hub::new(4);
        let (id, mut rx) = hub.register().await;
        hub.unregister(id).await;
        hub.broadcast(block("1")).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.size().await, 0);
    }
}
