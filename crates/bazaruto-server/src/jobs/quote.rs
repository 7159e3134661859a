use crate::services::QuoteStore;
use async_trait::async_trait;
use bazaruto_jobs::{Job, JobContext, JobResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Expires a quote once its validity has passed.
///
/// Without a `quote_id` the job sweeps every stale quote; the cron schedule
/// uses that form to catch quotes whose individual job was lost.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpireQuoteJob {
    #[serde(default)]
    pub quote_id: Option<String>,
}

impl ExpireQuoteJob {
    pub fn single(quote_id: impl Into<String>) -> Self {
        Self {
            quote_id: Some(quote_id.into()),
        }
    }

    pub fn sweep() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Job for ExpireQuoteJob {
    const NAME: &'static str = "expire_quote";
    const QUEUE: &'static str = "low";

    async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
        let quotes: Arc<dyn QuoteStore> = ctx.require_service()?;
        let now = Utc::now();

        match &self.quote_id {
            Some(quote_id) => {
                if quotes.expire(quote_id, now).await? {
                    info!(quote_id = %quote_id, "Quote expired");
                } else {
                    debug!(quote_id = %quote_id, "Quote no longer open, nothing to expire");
                }
            }
            None => {
                let expired = quotes.expire_stale(now).await?;
                info!(count = expired.len(), "Stale quote sweep finished");
            }
        }
        Ok(())
    }
}
