//! In-process publish/subscribe bus.

use crate::error::{EventError, EventResult};
use crate::event::Event;
use crate::handler::{EventHandler, EventPublisher};
use crate::metrics::EventMetrics;
use crate::names;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Default)]
struct Subscriptions {
    by_type: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    by_name: HashMap<String, Vec<String>>,
}

struct Inner {
    subscriptions: RwLock<Subscriptions>,
    root: CancellationToken,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Decrements the in-flight count when a handler task ends, panics included.
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Event bus mapping event types to handlers.
///
/// Handlers run fire-and-forget: `publish` returns once every handler task
/// is spawned, and handler errors are logged, never returned.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscriptions: RwLock::new(Subscriptions::default()),
                root: CancellationToken::new(),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Subscribes a handler to one or more event types.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>, event_types: &[&str]) -> EventResult<()> {
        let name = handler.name().to_string();
        if event_types.is_empty() {
            return Err(EventError::NoEventTypes(name));
        }
        if let Some(unknown) = event_types.iter().find(|t| !names::is_known(t)) {
            return Err(EventError::UnknownEventType((*unknown).to_string()));
        }

        let mut subscriptions = self.inner.subscriptions.write();
        if subscriptions.by_name.contains_key(&name) {
            return Err(EventError::DuplicateHandler(name));
        }

        let mut types: Vec<String> = event_types.iter().map(|t| (*t).to_string()).collect();
        types.sort();
        types.dedup();
        for event_type in &types {
            subscriptions
                .by_type
                .entry(event_type.clone())
                .or_default()
                .push(handler.clone());
        }
        info!(handler = %name, event_types = ?types, "Event handler subscribed");
        subscriptions.by_name.insert(name, types);
        Ok(())
    }

    /// Removes a handler from every event type. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, handler_name: &str) -> bool {
        let mut subscriptions = self.inner.subscriptions.write();
        let Some(types) = subscriptions.by_name.remove(handler_name) else {
            return false;
        };
        for event_type in types {
            if let Some(handlers) = subscriptions.by_type.get_mut(&event_type) {
                handlers.retain(|h| h.name() != handler_name);
                if handlers.is_empty() {
                    subscriptions.by_type.remove(&event_type);
                }
            }
        }
        info!(handler = handler_name, "Event handler unsubscribed");
        true
    }

    /// Schedules every handler of the event's type. Returns the number scheduled.
    pub fn emit(&self, event: Event) -> EventResult<usize> {
        if self.inner.root.is_cancelled() {
            return Err(EventError::Closed);
        }
        if !names::is_known(&event.event_type) {
            return Err(EventError::UnknownEventType(event.event_type));
        }

        let handlers = self
            .inner
            .subscriptions
            .read()
            .by_type
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        EventMetrics::event_published(&event.event_type);
        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            handlers = handlers.len(),
            "Publishing event"
        );

        let event = Arc::new(event);
        for handler in &handlers {
            self.spawn_handler(handler.clone(), event.clone());
        }
        Ok(handlers.len())
    }

    fn spawn_handler(&self, handler: Arc<dyn EventHandler>, event: Arc<Event>) {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(self.inner.clone());
        let token = self.inner.root.child_token();
        let span = tracing::info_span!(
            "event_handler",
            handler = handler.name(),
            event_id = %event.id,
            event_type = %event.event_type
        );

        tokio::spawn(
            async move {
                let _guard = guard;
                let outcome = AssertUnwindSafe(handler.handle(&event, token))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => debug!("Event handled"),
                    Ok(Err(e)) => {
                        EventMetrics::handler_failed(handler.name());
                        error!(error = %e, "Event handler failed");
                    }
                    Err(panic) => {
                        EventMetrics::handler_failed(handler.name());
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| (*s).to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        error!(panic = %message, "Event handler panicked");
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Event types with at least one handler.
    pub fn subscribed_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.subscriptions.read().by_type.keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of handlers for an event type.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.inner
            .subscriptions
            .read()
            .by_type
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Handler invocations still running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    /// Rejects further publishes, cancels running handlers and waits up to `grace` for them.
    ///
    /// Returns true if every handler finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!(in_flight = self.in_flight(), "Shutting down event bus...");
        self.inner.root.cancel();

        let drained = tokio::time::timeout(grace, async {
            loop {
                let idle = self.inner.idle.notified();
                if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                idle.await;
            }
        })
        .await
        .is_ok();

        if drained {
            info!("Event bus stopped");
        } else {
            warn!(in_flight = self.in_flight(), "Event handlers still running after shutdown grace");
        }
        drained
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: Event) -> EventResult<()> {
        self.emit(event).map(|_| ())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscriptions = self.inner.subscriptions.read();
        f.debug_struct("EventBus")
            .field("handlers", &subscriptions.by_name.len())
            .field("event_types", &subscriptions.by_type.len())
            .field("closed", &self.inner.root.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    struct Recording {
        name: String,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, event: &Event, _cancel: CancellationToken) -> EventResult<()> {
            self.seen.lock().push(format!("{}:{}", self.name, event.event_type));
            Ok(())
        }
    }

    fn recording(name: &str, seen: &Arc<Mutex<Vec<String>>>) -> Arc<dyn EventHandler> {
        Arc::new(Recording {
            name: name.to_string(),
            seen: seen.clone(),
        })
    }

    #[test]
    fn test_subscribe_requires_event_types() {
        let bus = EventBus::new();
        let seen = Arc::default();
        let err = bus.subscribe(recording("audit", &seen), &[]).unwrap_err();
        assert!(matches!(err, EventError::NoEventTypes(name) if name == "audit"));
    }

    #[test]
    fn test_duplicate_handler_rejected() {
        let bus = EventBus::new();
        let seen = Arc::default();
        bus.subscribe(recording("audit", &seen), &[names::POLICY_ISSUED]).unwrap();

        let err = bus
            .subscribe(recording("audit", &seen), &[names::CLAIM_SUBMITTED])
            .unwrap_err();
        assert!(matches!(err, EventError::DuplicateHandler(_)));
        assert_eq!(bus.handler_count(names::CLAIM_SUBMITTED), 0);
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let bus = EventBus::new();
        let seen = Arc::default();
        let err = bus.subscribe(recording("audit", &seen), &["policy.exploded"]).unwrap_err();
        assert!(matches!(err, EventError::UnknownEventType(_)));
    }

    #[test]
    fn test_unsubscribe_removes_from_all_types() {
        let bus = EventBus::new();
        let seen = Arc::default();
        bus.subscribe(
            recording("audit", &seen),
            &[names::POLICY_ISSUED, names::CLAIM_SUBMITTED],
        )
        .unwrap();
        assert_eq!(bus.subscribed_types().len(), 2);

        assert!(bus.unsubscribe("audit"));
        assert!(bus.subscribed_types().is_empty());
        assert!(!bus.unsubscribe("audit"));
    }

    #[tokio::test]
    async fn test_emit_without_handlers() {
        let bus = EventBus::new();
        let scheduled = bus
            .emit(Event::new(names::USER_REGISTERED, "user-1", json!({})))
            .unwrap();
        assert_eq!(scheduled, 0);
    }

    #[tokio::test]
    async fn test_emit_after_shutdown_fails() {
        let bus = EventBus::new();
        assert!(bus.shutdown(Duration::from_millis(10)).await);
        assert!(bus.is_closed());

        let err = bus
            .emit(Event::new(names::USER_REGISTERED, "user-1", json!({})))
            .unwrap_err();
        assert!(matches!(err, EventError::Closed));
    }
}
