//! # Cache Event Publisher
//!
//! Broadcast channel for lifecycle events: connection state changes, breaker
//! transitions, warmup outcomes, and full clears.
//!
//! ```rust
//! use tiercache_core::events::{CacheEvent, CacheEventPublisher};
//!
//! # tokio_test::block_on(async {
//! let publisher = CacheEventPublisher::new(16);
//! let mut receiver = publisher.subscribe();
//!
//! publisher.publish(CacheEvent::CacheCleared);
//!
//! let published = receiver.recv().await.unwrap();
//! assert_eq!(published.event.name(), "cache.cleared");
//! # });
//! ```

use crate::backing_store::ConnectionState;
use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle events emitted by the cache components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// Connection state machine moved between states
    ConnectionStateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Circuit breaker changed state
    CircuitStateChanged {
        component: String,
        state: CircuitState,
        consecutive_failures: u64,
    },
    /// A predictive warmup loaded and stored a value
    WarmupExecuted { key: String, loader: String },
    /// A warmup task was dropped (retries exhausted or queue eviction)
    WarmupDropped { key: String, reason: String },
    /// Every tier was cleared and statistics reset
    CacheCleared,
}

impl CacheEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::ConnectionStateChanged { .. } => "connection.state_changed",
            CacheEvent::CircuitStateChanged { .. } => "circuit_breaker.state_changed",
            CacheEvent::WarmupExecuted { .. } => "warming.executed",
            CacheEvent::WarmupDropped { .. } => "warming.dropped",
            CacheEvent::CacheCleared => "cache.cleared",
        }
    }
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: CacheEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

/// Fan-out publisher for cache lifecycle events
#[derive(Debug, Clone)]
pub struct CacheEventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl CacheEventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: CacheEvent) {
        let event = PublishedEvent {
            event,
            published_at: chrono::Utc::now(),
        };

        // send() only fails when nobody is subscribed, which is fine for lifecycle events
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for CacheEventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let publisher = CacheEventPublisher::default();
        publisher.publish(CacheEvent::CacheCleared);
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let publisher = CacheEventPublisher::new(8);
        let mut receiver = publisher.subscribe();

        publisher.publish(CacheEvent::WarmupExecuted {
            key: "AAPL".to_string(),
            loader: "prices".to_string(),
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event.name(), "warming.executed");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(CacheEvent::ConnectionStateChanged {
            from: ConnectionState::Connecting,
            to: ConnectionState::Connected,
        })
        .unwrap();
        assert_eq!(json["type"], "connection_state_changed");
        assert_eq!(json["to"], "connected");
    }
}
