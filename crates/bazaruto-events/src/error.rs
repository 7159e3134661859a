//! Error types for the event bus.

use thiserror::Error;

/// Result type alias for event operations.
pub type EventResult<T> = Result<T, EventError>;

/// Event bus errors.
#[derive(Error, Debug)]
pub enum EventError {
    /// A handler with this name is already subscribed
    #[error("Event handler already subscribed: {0}")]
    DuplicateHandler(String),

    /// Subscription without any event type
    #[error("Event handler {0} must subscribe to at least one event type")]
    NoEventTypes(String),

    /// Event type outside the known name table
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// Payload (de)serialization error
    #[error("Event payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Handler failure
    #[error("Event handler failed: {0}")]
    Handler(String),

    /// Bus has been shut down
    #[error("Event bus is shut down")]
    Closed,
}

impl EventError {
    /// Creates a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        EventError::Handler(message.into())
    }
}
