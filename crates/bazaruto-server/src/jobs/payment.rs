use async_trait::async_trait;
use bazaruto_config::WebhookConfig;
use bazaruto_events::{names, EventPublisher, PaymentOutcome, PaymentReported, WebhookRequested};
use bazaruto_jobs::{Job, JobContext, JobError, JobResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Fans a payment report out to the partner endpoints subscribed to it.
///
/// Each endpoint gets a `webhook.requested` event whose id is derived from
/// the payment, so a repeated attempt produces the same delivery ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPaymentEventJob {
    pub payment: PaymentReported,
}

impl ProcessPaymentEventJob {
    pub fn topic(&self) -> &'static str {
        match self.payment.outcome {
            PaymentOutcome::Received => names::PAYMENT_RECEIVED,
            PaymentOutcome::Failed => names::PAYMENT_FAILED,
        }
    }
}

#[async_trait]
impl Job for ProcessPaymentEventJob {
    const NAME: &'static str = "process_payment_event";
    const QUEUE: &'static str = "critical";

    async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
        let config: WebhookConfig = ctx.require_service()?;
        let publisher: Arc<dyn EventPublisher> = ctx.require_service()?;
        let payment = &self.payment;
        let topic = self.topic();

        if payment.outcome == PaymentOutcome::Failed {
            warn!(
                payment_id = %payment.payment_id,
                policy_id = %payment.policy_id,
                reason = payment.failure_reason.as_deref().unwrap_or("unknown"),
                "Premium payment failed"
            );
        }

        let body = serde_json::to_value(payment)?;
        let mut requested = 0usize;
        for (index, endpoint) in config.endpoints_for(topic).enumerate() {
            let webhook = WebhookRequested::new(
                format!("{}:{topic}:{index}", payment.payment_id),
                endpoint.url.clone(),
                topic,
                body.clone(),
            );
            publisher
                .publish_domain(&webhook)
                .await
                .map_err(|e| JobError::perform(format!("failed to request webhook: {e}")))?;
            requested += 1;
        }

        info!(
            payment_id = %payment.payment_id,
            topic,
            webhooks = requested,
            "Payment event processed"
        );
        Ok(())
    }
}
