//! Event-to-job bridge.
//!
//! Handlers decode event payloads and hand jobs to the enqueue capability.
//! This is the only place where marketplace events meet job types.

use crate::jobs::{
    DeliverWebhookJob, ExpireQuoteJob, GeneratePolicyDocumentJob, ProcessPaymentEventJob,
    SendNotificationJob,
};
use crate::services::InMemoryQuoteStore;
use async_trait::async_trait;
use bazaruto_events::{
    names, ClaimSubmitted, Event, EventBus, EventError, EventHandler, EventResult,
    PaymentReported, PolicyIssued, QuoteRequested, UserRegistered, WebhookRequested,
};
use bazaruto_jobs::{DynJob, Enqueuer, Job};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

async fn dispatch<J: Job>(
    enqueuer: &dyn Enqueuer,
    job: J,
    run_at: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
) -> EventResult<()> {
    if cancel.is_cancelled() {
        return Err(EventError::handler("cancelled before dispatch"));
    }
    let id = enqueuer
        .enqueue(Box::new(job) as Box<dyn DynJob>, run_at)
        .await
        .map_err(|e| EventError::handler(format!("failed to enqueue {}: {e}", J::NAME)))?;
    debug!(job_id = %id, job_type = J::NAME, "Event dispatched job");
    Ok(())
}

/// Schedules the expiry of each requested quote at its validity deadline.
pub struct QuoteExpiryHandler {
    enqueuer: Arc<dyn Enqueuer>,
}

impl QuoteExpiryHandler {
    pub fn new(enqueuer: Arc<dyn Enqueuer>) -> Self {
        Self { enqueuer }
    }
}

#[async_trait]
impl EventHandler for QuoteExpiryHandler {
    fn name(&self) -> &str {
        "quote_expiry"
    }

    async fn handle(&self, event: &Event, cancel: CancellationToken) -> EventResult<()> {
        let quote: QuoteRequested = event.payload_as()?;
        dispatch(
            self.enqueuer.as_ref(),
            ExpireQuoteJob::single(quote.quote_id),
            Some(quote.valid_until),
            &cancel,
        )
        .await
    }
}

/// Keeps the in-process quote book in step with quote events.
pub struct QuoteTracker {
    quotes: InMemoryQuoteStore,
}

impl QuoteTracker {
    pub fn new(quotes: InMemoryQuoteStore) -> Self {
        Self { quotes }
    }
}

#[async_trait]
impl EventHandler for QuoteTracker {
    fn name(&self) -> &str {
        "quote_tracker"
    }

    async fn handle(&self, event: &Event, _cancel: CancellationToken) -> EventResult<()> {
        match event.event_type.as_str() {
            names::QUOTE_REQUESTED => {
                let quote: QuoteRequested = event.payload_as()?;
                self.quotes.track(quote.quote_id, quote.valid_until);
            }
            names::QUOTE_ACCEPTED => {
                if !self.quotes.accept(&event.aggregate_id) {
                    debug!(quote_id = %event.aggregate_id, "Accepted quote was not open");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Generates the policy document of every issued policy.
pub struct PolicyDocumentHandler {
    enqueuer: Arc<dyn Enqueuer>,
}

impl PolicyDocumentHandler {
    pub fn new(enqueuer: Arc<dyn Enqueuer>) -> Self {
        Self { enqueuer }
    }
}

#[async_trait]
impl EventHandler for PolicyDocumentHandler {
    fn name(&self) -> &str {
        "policy_document"
    }

    async fn handle(&self, event: &Event, cancel: CancellationToken) -> EventResult<()> {
        let policy: PolicyIssued = event.payload_as()?;
        let job = GeneratePolicyDocumentJob {
            policy_id: policy.policy_id,
            quote_id: policy.quote_id,
            user_id: policy.user_id,
            product_code: policy.product_code,
            issued_at: policy.occurred_at,
        };
        dispatch(self.enqueuer.as_ref(), job, None, &cancel).await
    }
}

/// Customer-facing emails for account and claim events.
pub struct CustomerNotificationHandler {
    enqueuer: Arc<dyn Enqueuer>,
}

impl CustomerNotificationHandler {
    pub fn new(enqueuer: Arc<dyn Enqueuer>) -> Self {
        Self { enqueuer }
    }
}

#[async_trait]
impl EventHandler for CustomerNotificationHandler {
    fn name(&self) -> &str {
        "customer_notification"
    }

    async fn handle(&self, event: &Event, cancel: CancellationToken) -> EventResult<()> {
        let job = match event.event_type.as_str() {
            names::USER_REGISTERED => {
                let user: UserRegistered = event.payload_as()?;
                SendNotificationJob::email(
                    user.user_id,
                    "welcome",
                    serde_json::json!({ "email": user.email }),
                )
            }
            names::CLAIM_SUBMITTED => {
                let claim: ClaimSubmitted = event.payload_as()?;
                SendNotificationJob::email(
                    claim.user_id,
                    "claim_received",
                    serde_json::json!({ "claim_id": claim.claim_id, "policy_id": claim.policy_id }),
                )
            }
            other => return Err(EventError::UnknownEventType(other.to_string())),
        };
        dispatch(self.enqueuer.as_ref(), job, None, &cancel).await
    }
}

/// Processes payment reports from the payment provider.
pub struct PaymentHandler {
    enqueuer: Arc<dyn Enqueuer>,
}

impl PaymentHandler {
    pub fn new(enqueuer: Arc<dyn Enqueuer>) -> Self {
        Self { enqueuer }
    }
}

#[async_trait]
impl EventHandler for PaymentHandler {
    fn name(&self) -> &str {
        "payment"
    }

    async fn handle(&self, event: &Event, cancel: CancellationToken) -> EventResult<()> {
        let payment: PaymentReported = event.payload_as()?;
        dispatch(
            self.enqueuer.as_ref(),
            ProcessPaymentEventJob { payment },
            None,
            &cancel,
        )
        .await
    }
}

/// Turns webhook requests into delivery jobs.
pub struct WebhookHandler {
    enqueuer: Arc<dyn Enqueuer>,
}

impl WebhookHandler {
    pub fn new(enqueuer: Arc<dyn Enqueuer>) -> Self {
        Self { enqueuer }
    }
}

#[async_trait]
impl EventHandler for WebhookHandler {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn handle(&self, event: &Event, cancel: CancellationToken) -> EventResult<()> {
        let webhook: WebhookRequested = event.payload_as()?;
        let job = DeliverWebhookJob {
            webhook_id: webhook.webhook_id,
            url: webhook.url,
            topic: webhook.topic,
            body: webhook.body,
        };
        dispatch(self.enqueuer.as_ref(), job, None, &cancel).await
    }
}

/// Subscribes every bridge handler to the bus.
pub fn subscribe_all(
    bus: &EventBus,
    enqueuer: &Arc<dyn Enqueuer>,
    quotes: &InMemoryQuoteStore,
) -> EventResult<()> {
    bus.subscribe(
        Arc::new(QuoteTracker::new(quotes.clone())),
        &[names::QUOTE_REQUESTED, names::QUOTE_ACCEPTED],
    )?;
    bus.subscribe(
        Arc::new(QuoteExpiryHandler::new(enqueuer.clone())),
        &[names::QUOTE_REQUESTED],
    )?;
    bus.subscribe(
        Arc::new(PolicyDocumentHandler::new(enqueuer.clone())),
        &[names::POLICY_ISSUED],
    )?;
    bus.subscribe(
        Arc::new(CustomerNotificationHandler::new(enqueuer.clone())),
        &[names::USER_REGISTERED, names::CLAIM_SUBMITTED],
    )?;
    bus.subscribe(
        Arc::new(PaymentHandler::new(enqueuer.clone())),
        &[names::PAYMENT_RECEIVED, names::PAYMENT_FAILED],
    )?;
    bus.subscribe(
        Arc::new(WebhookHandler::new(enqueuer.clone())),
        &[names::WEBHOOK_REQUESTED],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaruto_jobs::{JobId, JobResult};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingEnqueuer {
        jobs: Mutex<Vec<(String, serde_json::Value, Option<DateTime<Utc>>)>>,
    }

    #[async_trait]
    impl Enqueuer for RecordingEnqueuer {
        async fn enqueue(&self, job: Box<dyn DynJob>, run_at: Option<DateTime<Utc>>) -> JobResult<JobId> {
            self.jobs
                .lock()
                .push((job.type_name().to_string(), job.to_payload()?, run_at));
            Ok(JobId::new())
        }
    }

    #[tokio::test]
    async fn test_quote_requested_schedules_expiry_at_deadline() {
        let enqueuer = Arc::new(RecordingEnqueuer::default());
        let handler = QuoteExpiryHandler::new(enqueuer.clone());
        let valid_until = Utc::now() + chrono::Duration::days(7);
        let event = Event::from_domain(&QuoteRequested::new("q-1", "user-1", "AUTO", valid_until)).unwrap();

        handler.handle(&event, CancellationToken::new()).await.unwrap();

        let jobs = enqueuer.jobs.lock();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].0, ExpireQuoteJob::NAME);
        assert_eq!(jobs[0].1["quote_id"], "q-1");
        assert_eq!(jobs[0].2, Some(valid_until));
    }

    #[tokio::test]
    async fn test_claim_submitted_sends_claim_email() {
        let enqueuer = Arc::new(RecordingEnqueuer::default());
        let handler = CustomerNotificationHandler::new(enqueuer.clone());
        let event = Event::from_domain(&ClaimSubmitted::new("clm-1", "pol-1", "user-1")).unwrap();

        handler.handle(&event, CancellationToken::new()).await.unwrap();

        let jobs = enqueuer.jobs.lock();
        assert_eq!(jobs[0].0, SendNotificationJob::NAME);
        assert_eq!(jobs[0].1["template"], "claim_received");
        assert_eq!(jobs[0].1["channel"], "email");
        assert_eq!(jobs[0].2, None);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_handler_error() {
        let enqueuer = Arc::new(RecordingEnqueuer::default());
        let handler = PolicyDocumentHandler::new(enqueuer.clone());
        let event = Event::new(names::POLICY_ISSUED, "pol-1", serde_json::json!({ "policy_id": 1 }));

        assert!(handler.handle(&event, CancellationToken::new()).await.is_err());
        assert!(enqueuer.jobs.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_handler_does_not_enqueue() {
        let enqueuer = Arc::new(RecordingEnqueuer::default());
        let handler = PaymentHandler::new(enqueuer.clone());
        let event = Event::from_domain(&PaymentReported::received("pay-1", "pol-1", 12_500, "EUR")).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(handler.handle(&event, cancel).await.is_err());
        assert!(enqueuer.jobs.lock().is_empty());
    }

    #[tokio::test]
    async fn test_quote_tracker_follows_acceptance() {
        let quotes = InMemoryQuoteStore::new();
        let tracker = QuoteTracker::new(quotes.clone());
        let requested = Event::from_domain(&QuoteRequested::new("q-9", "user-1", "AUTO", Utc::now())).unwrap();
        let accepted = Event::new(names::QUOTE_ACCEPTED, "q-9", serde_json::json!({}));

        tracker.handle(&requested, CancellationToken::new()).await.unwrap();
        tracker.handle(&accepted, CancellationToken::new()).await.unwrap();

        assert_eq!(quotes.status("q-9"), Some(crate::services::QuoteStatus::Accepted));
    }

    #[test]
    fn test_subscribe_all_registers_each_handler_once() {
        let bus = EventBus::new();
        let enqueuer: Arc<dyn Enqueuer> = Arc::new(RecordingEnqueuer::default());
        let quotes = InMemoryQuoteStore::new();

        subscribe_all(&bus, &enqueuer, &quotes).unwrap();
        assert_eq!(bus.handler_count(names::QUOTE_REQUESTED), 2);
        assert_eq!(bus.handler_count(names::PAYMENT_FAILED), 1);
        assert_eq!(bus.subscribed_types().len(), 8);
        assert!(matches!(
            subscribe_all(&bus, &enqueuer, &quotes),
            Err(EventError::DuplicateHandler(_))
        ));
    }
}
