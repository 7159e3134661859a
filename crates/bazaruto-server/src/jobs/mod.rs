//! Application job types run by the worker.

mod notification;
mod payment;
mod policy_document;
mod quote;
mod webhook;

pub use notification::SendNotificationJob;
pub use payment::ProcessPaymentEventJob;
pub use policy_document::GeneratePolicyDocumentJob;
pub use quote::ExpireQuoteJob;
pub use webhook::{
    DeliverWebhookJob, ATTEMPT_HEADER, DELIVERY_HEADER, SECRET_HEADER, TOPIC_HEADER,
};

use bazaruto_jobs::{JobResult, RegistryBuilder};

/// Registers every application job type.
pub fn register_all(registry: &mut RegistryBuilder) -> JobResult<()> {
    registry
        .register::<DeliverWebhookJob>()?
        .register::<SendNotificationJob>()?
        .register::<GeneratePolicyDocumentJob>()?
        .register::<ExpireQuoteJob>()?
        .register::<ProcessPaymentEventJob>()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bazaruto_jobs::{Job, Registry};

    #[test]
    fn test_register_all() {
        let mut builder = Registry::builder();
        register_all(&mut builder).unwrap();
        let registry = builder.build();

        let mut names = registry.type_names();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                DeliverWebhookJob::NAME,
                ExpireQuoteJob::NAME,
                GeneratePolicyDocumentJob::NAME,
                ProcessPaymentEventJob::NAME,
                SendNotificationJob::NAME,
            ]
        );
    }

    #[test]
    fn test_register_all_twice_is_rejected() {
        let mut builder = Registry::builder();
        register_all(&mut builder).unwrap();
        assert!(register_all(&mut builder).is_err());
    }

    #[test]
    fn test_policy_document_render() {
        let job = GeneratePolicyDocumentJob {
            policy_id: "pol-7".into(),
            quote_id: "q-7".into(),
            user_id: "user-7".into(),
            product_code: "HOME".into(),
            issued_at: chrono::Utc::now(),
        };
        assert_eq!(job.document_key(), "policies/pol-7.txt");
        let rendered = job.render();
        assert!(rendered.contains("Policy:     pol-7"));
        assert!(rendered.contains("Product:    HOME"));
    }
}
