pub mod publisher;
pub mod types;

// Re-export key types for convenience
pub use publisher::{EventPublisher, EventPublisherStats, PublishedEvent};
pub use types::DomainEvent;
