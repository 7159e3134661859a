//! Bazaruto Events - In-process domain event bus
//!
//! Marketplace services publish domain events; subscribed handlers react in
//! their own tasks. The job engine is reached from here only through
//! application handlers, which translate events into job dispatches.
//!
//! # Example
//!
//! ```rust,ignore
//! use bazaruto_events::{names, EventBus, EventPublisher, PolicyIssued};
//!
//! let bus = EventBus::new();
//! bus.subscribe(Arc::new(GeneratePolicyDocument::new(dispatcher)), &[names::POLICY_ISSUED])?;
//!
//! bus.publish_domain(&PolicyIssued::new("pol-1", "quote-7", "user-3", "AUTO-BASIC"))
//!     .await?;
//! ```

pub mod bus;
pub mod domain;
pub mod error;
pub mod event;
pub mod handler;
pub mod metrics;
pub mod names;

pub use bus::EventBus;
pub use domain::{
    ClaimSubmitted, PaymentOutcome, PaymentReported, PolicyIssued, QuoteRequested,
    UserRegistered, WebhookRequested,
};
pub use error::{EventError, EventResult};
pub use event::{DomainEvent, Event};
pub use handler::{EventHandler, EventPublisher};
pub use metrics::{register_metrics, EventMetrics};
