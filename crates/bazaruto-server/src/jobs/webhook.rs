//! Partner webhook delivery.

use async_trait::async_trait;
use bazaruto_config::WebhookConfig;
use bazaruto_jobs::{Job, JobContext, JobError, JobResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const TOPIC_HEADER: &str = "X-Bazaruto-Topic";
pub const DELIVERY_HEADER: &str = "X-Bazaruto-Delivery";
pub const ATTEMPT_HEADER: &str = "X-Bazaruto-Attempt";
pub const SECRET_HEADER: &str = "X-Bazaruto-Webhook-Secret";

/// POSTs an event body to a partner endpoint.
///
/// Any non-2xx answer fails the attempt, so the delivery follows the
/// regular retry schedule before it is dead-lettered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverWebhookJob {
    pub webhook_id: String,
    pub url: String,
    pub topic: String,
    pub body: serde_json::Value,
}

#[async_trait]
impl Job for DeliverWebhookJob {
    const NAME: &'static str = "deliver_webhook";
    const QUEUE: &'static str = "critical";
    const PRIORITY: i32 = 10;

    async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
        let client: reqwest::Client = ctx.require_service()?;
        let config: WebhookConfig = ctx.require_service()?;

        let envelope = serde_json::json!({
            "id": self.webhook_id,
            "topic": self.topic,
            "data": self.body,
        });

        let mut request = client
            .post(&self.url)
            .timeout(config.request_timeout())
            .header(reqwest::header::USER_AGENT, config.user_agent.as_str())
            .header(TOPIC_HEADER, self.topic.as_str())
            .header(DELIVERY_HEADER, self.webhook_id.as_str())
            .header(ATTEMPT_HEADER, ctx.attempt.to_string())
            .json(&envelope);
        if let Some(secret) = &config.signing_secret {
            request = request.header(SECRET_HEADER, secret.as_str());
        }

        let response = tokio::select! {
            () = ctx.cancellation().cancelled() => return Err(JobError::Cancelled),
            response = request.send() => response
                .map_err(|e| JobError::perform(format!("webhook request failed: {e}")))?,
        };

        let status = response.status();
        if !status.is_success() {
            warn!(
                webhook_id = %self.webhook_id,
                url = %self.url,
                status = status.as_u16(),
                attempt = ctx.attempt,
                "Webhook rejected"
            );
            return Err(JobError::perform(format!(
                "webhook endpoint answered {status}"
            )));
        }

        info!(
            webhook_id = %self.webhook_id,
            topic = %self.topic,
            status = status.as_u16(),
            "Webhook delivered"
        );
        Ok(())
    }

    fn max_retries(&self) -> Option<u32> {
        Some(8)
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(60))
    }

    fn backoff_base(&self) -> Option<Duration> {
        Some(Duration::from_secs(5))
    }
}
