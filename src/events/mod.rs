pub mod publisher;

pub use publisher::{CacheEvent, CacheEventPublisher, PublishedEvent};
