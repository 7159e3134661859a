//! Handler and publisher capabilities.

use crate::error::EventResult;
use crate::event::{DomainEvent, Event};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Trait for event handlers.
///
/// Each invocation runs in its own task with its own cancellation token;
/// the token is cancelled only when the bus shuts down.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Unique handler name, used for subscription bookkeeping and metrics.
    fn name(&self) -> &str;

    /// Handles the event.
    async fn handle(&self, event: &Event, cancel: CancellationToken) -> EventResult<()>;
}

/// Publish-only capability handed to jobs and services.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event. Returns once handlers are scheduled.
    async fn publish(&self, event: Event) -> EventResult<()>;

    /// Wraps and publishes a typed domain event.
    async fn publish_domain(&self, event: &dyn DomainEvent) -> EventResult<()> {
        self.publish(Event::from_domain(event)?).await
    }

    /// Publishes multiple events in order.
    async fn publish_all(&self, events: Vec<Event>) -> EventResult<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}
