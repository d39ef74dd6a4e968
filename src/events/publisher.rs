use super::types::DomainEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Broadcast publisher for domain events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
    published: Arc<AtomicU64>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: DomainEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPublisherStats {
    pub published: u64,
    pub subscribers: usize,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: DomainEvent) {
        trace!(event = event.name(), "Publishing domain event");
        self.published.fetch_add(1, Ordering::Relaxed);

        // send() only fails when nobody is subscribed, which is fine for events
        let _ = self.sender.send(PublishedEvent {
            event,
            published_at: chrono::Utc::now(),
        });
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            published: self.published.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000) // Default capacity of 1000 events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = EventPublisher::new(8);
        publisher.publish(DomainEvent::ErrorResolved {
            error_id: Uuid::new_v4(),
            resolution: "fixed".to_string(),
        });
        assert_eq!(publisher.stats().published, 1);
        assert_eq!(publisher.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let publisher = EventPublisher::new(8);
        let mut receiver = publisher.subscribe();
        let id = Uuid::new_v4();

        publisher.publish(DomainEvent::ErrorEscalated {
            error_id: id,
            escalation_level: 2,
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event.error_id(), Some(id));
        assert_eq!(received.event.name(), "error_escalated");
    }
}
