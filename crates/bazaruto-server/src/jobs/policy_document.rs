use crate::services::{Channel, DocumentStore, Notification, Notifier};
use async_trait::async_trait;
use bazaruto_jobs::{Job, JobContext, JobResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Renders the policy schedule, stores it and tells the holder it is ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePolicyDocumentJob {
    pub policy_id: String,
    pub quote_id: String,
    pub user_id: String,
    pub product_code: String,
    pub issued_at: DateTime<Utc>,
}

impl GeneratePolicyDocumentJob {
    /// Storage key; stable so a retried attempt overwrites its own output.
    pub fn document_key(&self) -> String {
        format!("policies/{}.txt", self.policy_id)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "BAZARUTO POLICY SCHEDULE");
        let _ = writeln!(out, "Policy:     {}", self.policy_id);
        let _ = writeln!(out, "Product:    {}", self.product_code);
        let _ = writeln!(out, "Holder:     {}", self.user_id);
        let _ = writeln!(out, "Quote:      {}", self.quote_id);
        let _ = writeln!(out, "Issued at:  {}", self.issued_at.to_rfc3339());
        out
    }
}

#[async_trait]
impl Job for GeneratePolicyDocumentJob {
    const NAME: &'static str = "generate_policy_document";
    const PRIORITY: i32 = 5;

    async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
        let store: Arc<dyn DocumentStore> = ctx.require_service()?;
        let notifier: Arc<dyn Notifier> = ctx.require_service()?;

        let location = store.put(&self.document_key(), self.render().as_bytes()).await?;
        info!(policy_id = %self.policy_id, location = %location, "Policy document stored");

        notifier
            .send(&Notification {
                user_id: self.user_id.clone(),
                channel: Channel::Email,
                template: "policy_document_ready".to_string(),
                params: serde_json::json!({
                    "policy_id": self.policy_id,
                    "document": location,
                }),
            })
            .await
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(120))
    }
}
