// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//
// Observer registry and broadcast channel for learning events.
//
// The engine never publishes to a global bus. Services receive an
// `Arc<dyn LearningObserver>` at construction; `ObserverRegistry` fans an
// event out to every registered callback and `ChannelObserver` forwards
// events into a tokio broadcast channel for streaming subscribers.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::{LearningEvent, LearningObserver};

/// Injectable list of observer callbacks.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn LearningObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn LearningObserver>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    pub fn clear(&self) {
        self.observers.write().clear();
    }
}

impl LearningObserver for ObserverRegistry {
    fn on_event(&self, event: &LearningEvent) {
        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_event(event);
        }
    }
}

/// Forwards learning events into a broadcast channel.
#[derive(Clone)]
pub struct ChannelObserver {
    sender: Arc<broadcast::Sender<LearningEvent>>,
}

impl ChannelObserver {
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelObserver {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl LearningObserver for ChannelObserver {
    fn on_event(&self, event: &LearningEvent) {
        let receiver_count = self.sender.send(event.clone()).unwrap_or(0);
        if receiver_count == 0 {
            debug!(event_type = event.event_type(), "No subscribers listening to event");
        }
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<LearningEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<LearningEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    pub fn try_recv(&mut self) -> Result<LearningEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<LearningEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pattern::{PatternId, PatternType};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingObserver(AtomicUsize);

    impl LearningObserver for CountingObserver {
        fn on_event(&self, _event: &LearningEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn discovered() -> LearningEvent {
        LearningEvent::PatternDiscovered {
            pattern_id: PatternId::new(),
            pattern_type: PatternType::Testing,
            name: "Bash -> Test".to_string(),
            confidence: 0.8,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_publish_subscribe() {
        let channel = ChannelObserver::new(10);
        let mut receiver = channel.subscribe();
        assert_eq!(channel.subscriber_count(), 1);

        let event = discovered();
        channel.on_event(&event);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received, event);
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_registry_fans_out() {
        let registry = ObserverRegistry::new();
        let counter = Arc::new(CountingObserver(AtomicUsize::new(0)));
        let channel = ChannelObserver::new(4);
        let mut receiver = channel.subscribe();

        registry.register(counter.clone());
        registry.register(Arc::new(channel));
        assert_eq!(registry.len(), 2);

        registry.on_event(&discovered());
        registry.on_event(&discovered());

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(receiver.drain().len(), 2);

        registry.clear();
        registry.on_event(&discovered());
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
