use crate::services::{Channel, Notification, Notifier};
use async_trait::async_trait;
use bazaruto_jobs::{Job, JobContext, JobResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sends one templated notification to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNotificationJob {
    pub user_id: String,
    pub channel: Channel,
    pub template: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl SendNotificationJob {
    pub fn email(user_id: impl Into<String>, template: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            user_id: user_id.into(),
            channel: Channel::Email,
            template: template.into(),
            params,
        }
    }
}

#[async_trait]
impl Job for SendNotificationJob {
    const NAME: &'static str = "send_notification";

    async fn perform(&self, ctx: &JobContext) -> JobResult<()> {
        let notifier: Arc<dyn Notifier> = ctx.require_service()?;
        notifier
            .send(&Notification {
                user_id: self.user_id.clone(),
                channel: self.channel,
                template: self.template.clone(),
                params: self.params.clone(),
            })
            .await
    }

    fn max_retries(&self) -> Option<u32> {
        Some(5)
    }
}
