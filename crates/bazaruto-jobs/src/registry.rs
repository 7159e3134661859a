//! Job type registry.
//!
//! Maps case-insensitive type names to decoders and binds the service
//! locator. Built once at start-up, then frozen behind an `Arc`.

use crate::error::{JobError, JobResult};
use crate::job::{DynJob, Job, Services};
use crate::serialized::{truncate_millis, SerializedJob};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

type Decoder = fn(serde_json::Value) -> Result<Box<dyn DynJob>, serde_json::Error>;

fn decode<J: Job>(payload: serde_json::Value) -> Result<Box<dyn DynJob>, serde_json::Error> {
    Ok(Box::new(serde_json::from_value::<J>(payload)?))
}

#[derive(Clone, Copy)]
struct Registration {
    name: &'static str,
    decode: Decoder,
}

/// Settings applied to job types that do not override them.
#[derive(Debug, Clone, Copy)]
pub struct JobDefaults {
    /// Retry budget.
    pub max_retries: u32,

    /// Per-attempt deadline.
    pub timeout: Duration,

    /// Backoff base.
    pub backoff_base: Duration,

    /// Upper bound on any job's deadline, including overrides.
    pub max_timeout: Option<Duration>,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(300),
            backoff_base: crate::backoff::DEFAULT_BASE,
            max_timeout: None,
        }
    }
}

/// Mutable registry used during start-up.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, Registration>,
    services: Services,
    defaults: JobDefaults,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job type.
    pub fn register<J: Job>(&mut self) -> JobResult<&mut Self> {
        let key = normalize(J::NAME);
        if key.is_empty() {
            return Err(JobError::Configuration(format!(
                "job type {} has an empty name",
                std::any::type_name::<J>()
            )));
        }
        if self.entries.contains_key(&key) {
            return Err(JobError::DuplicateType(J::NAME.to_string()));
        }
        self.entries.insert(
            key,
            Registration {
                name: J::NAME,
                decode: decode::<J>,
            },
        );
        debug!(job_type = J::NAME, "Registered job type");
        Ok(self)
    }

    /// Registers a collaborator jobs can look up at perform time.
    pub fn service<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        self.services.insert(value);
        self
    }

    /// Replaces the services locator wholesale.
    pub fn services(&mut self, services: Services) -> &mut Self {
        self.services = services;
        self
    }

    /// Sets the defaults for job types that do not override them.
    pub fn defaults(&mut self, defaults: JobDefaults) -> &mut Self {
        self.defaults = defaults;
        self
    }

    /// Returns true if a type with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize(name))
    }

    /// Freezes the registry.
    pub fn build(self) -> Arc<Registry> {
        info!(job_types = self.entries.len(), "Job registry built");
        Arc::new(Registry {
            entries: self.entries,
            services: self.services,
            defaults: self.defaults,
        })
    }
}

/// Immutable registry shared by the dispatcher and workers.
pub struct Registry {
    entries: HashMap<String, Registration>,
    services: Services,
    defaults: JobDefaults,
}

impl Registry {
    /// Starts a new builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Serializes a job into a fresh record eligible at `run_at`.
    pub fn serialize(&self, job: &dyn DynJob, run_at: Option<DateTime<Utc>>) -> JobResult<SerializedJob> {
        let registration = self
            .entries
            .get(&normalize(job.type_name()))
            .ok_or_else(|| JobError::UnknownType(job.type_name().to_string()))?;

        let mut record = SerializedJob::new(
            registration.name,
            job.queue_name(),
            job.to_payload()?,
            job.priority_level(),
            job.retry_budget().unwrap_or(self.defaults.max_retries),
        );
        if let Some(at) = run_at {
            record.run_at = truncate_millis(at);
        }
        Ok(record)
    }

    /// Decodes a stored record back into a runnable job.
    pub fn deserialize(&self, record: &SerializedJob) -> JobResult<Box<dyn DynJob>> {
        let registration = self
            .entries
            .get(&normalize(&record.job_type))
            .ok_or_else(|| JobError::UnknownType(record.job_type.clone()))?;

        (registration.decode)(record.payload.clone()).map_err(|source| JobError::PayloadDecode {
            job_type: record.job_type.clone(),
            source,
        })
    }

    /// Returns true if a type with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize(name))
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|r| r.name).collect();
        names.sort_unstable();
        names
    }

    /// Service locator bound at build time.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Defaults applied to job types.
    pub fn defaults(&self) -> &JobDefaults {
        &self.defaults
    }

    /// Effective timeout of a job, clamped to `max_timeout`.
    pub fn timeout_for(&self, job: &dyn DynJob) -> Duration {
        let timeout = job.time_limit().unwrap_or(self.defaults.timeout);
        match self.defaults.max_timeout {
            Some(limit) if timeout > limit => {
                debug!(
                    job_type = job.type_name(),
                    requested = ?timeout,
                    limit = ?limit,
                    "Clamping job timeout to the lease limit"
                );
                limit
            }
            _ => timeout,
        }
    }

    /// Effective retry budget of a job.
    pub fn max_retries_for(&self, job: &dyn DynJob) -> u32 {
        job.retry_budget().unwrap_or(self.defaults.max_retries)
    }

    /// Effective backoff base of a stored job, falling back to the default when it does not decode.
    pub fn backoff_base_for(&self, record: &SerializedJob) -> Duration {
        self.deserialize(record)
            .ok()
            .and_then(|job| job.backoff())
            .unwrap_or(self.defaults.backoff_base)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("job_types", &self.type_names())
            .field("services", &self.services)
            .field("defaults", &self.defaults)
            .finish()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobContext;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct IssuePolicy {
        quote_id: String,
        premium_cents: i64,
        #[serde(default)]
        riders: Vec<String>,
    }

    #[async_trait]
    impl Job for IssuePolicy {
        const NAME: &'static str = "IssuePolicy";
        const QUEUE: &'static str = "critical";
        const PRIORITY: i32 = 10;

        async fn perform(&self, _ctx: &JobContext) -> JobResult<()> {
            Ok(())
        }

        fn max_retries(&self) -> Option<u32> {
            Some(5)
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct IssuePolicyV2 {
        quote_id: String,
    }

    #[async_trait]
    impl Job for IssuePolicyV2 {
        const NAME: &'static str = "issuepolicy";

        async fn perform(&self, _ctx: &JobContext) -> JobResult<()> {
            Ok(())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct ArchiveClaims;

    #[async_trait]
    impl Job for ArchiveClaims {
        const NAME: &'static str = "archive_claims";

        async fn perform(&self, _ctx: &JobContext) -> JobResult<()> {
            Ok(())
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(3600))
        }
    }

    fn registry() -> Arc<Registry> {
        let mut builder = Registry::builder();
        builder.register::<IssuePolicy>().unwrap();
        builder.build()
    }

    #[test]
    fn test_duplicate_names_rejected_case_insensitively() {
        let mut builder = Registry::builder();
        builder.register::<IssuePolicy>().unwrap();
        let err = builder.register::<IssuePolicyV2>().err().unwrap();
        assert!(matches!(err, JobError::DuplicateType(name) if name == "issuepolicy"));
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = registry();
        assert!(registry.contains("ISSUEPOLICY"));
        assert_eq!(registry.type_names(), vec!["IssuePolicy"]);
    }

    #[test]
    fn test_serialize_applies_job_settings() {
        let registry = registry();
        let job = IssuePolicy {
            quote_id: "q-9".into(),
            premium_cents: 12_500,
            riders: vec![],
        };

        let record = registry.serialize(&job, None).unwrap();
        assert_eq!(record.job_type, "IssuePolicy");
        assert_eq!(record.queue, "critical");
        assert_eq!(record.priority, 10);
        assert_eq!(record.max_retries, 5);
        assert_eq!(record.attempts, 0);
    }

    #[test]
    fn test_serialize_unregistered_type_fails() {
        let registry = Registry::builder().build();
        let job = IssuePolicyV2 {
            quote_id: "q-1".into(),
        };
        assert!(matches!(
            registry.serialize(&job, None),
            Err(JobError::UnknownType(_))
        ));
    }

    #[test]
    fn test_deserialize_unknown_type() {
        let registry = registry();
        let record = SerializedJob::new("cancel_claim", "default", serde_json::json!({}), 0, 3);
        assert!(matches!(
            registry.deserialize(&record),
            Err(JobError::UnknownType(name)) if name == "cancel_claim"
        ));
    }

    #[test]
    fn test_deserialize_malformed_payload() {
        let registry = registry();
        let record = SerializedJob::new(
            "issuepolicy",
            "critical",
            serde_json::json!({ "quote_id": 42 }),
            0,
            3,
        );
        assert!(matches!(
            registry.deserialize(&record),
            Err(JobError::PayloadDecode { .. })
        ));
    }

    #[test]
    fn test_missing_defaulted_fields_decode_to_zero_values() {
        let registry = registry();
        let record = SerializedJob::new(
            "IssuePolicy",
            "critical",
            serde_json::json!({ "quote_id": "q-2", "premium_cents": 100 }),
            0,
            3,
        );
        let job = registry.deserialize(&record).unwrap();
        assert_eq!(
            job.to_payload().unwrap(),
            serde_json::json!({ "quote_id": "q-2", "premium_cents": 100, "riders": [] })
        );
    }

    #[test]
    fn test_defaults_fill_unset_overrides() {
        let mut builder = Registry::builder();
        builder.register::<IssuePolicyV2>().unwrap().defaults(JobDefaults {
            max_retries: 7,
            timeout: Duration::from_secs(9),
            backoff_base: Duration::from_millis(50),
            max_timeout: None,
        });
        let registry = builder.build();
        let job = IssuePolicyV2 {
            quote_id: "q-3".into(),
        };
        let record = registry.serialize(&job, None).unwrap();

        assert_eq!(record.max_retries, 7);
        assert_eq!(registry.timeout_for(&job), Duration::from_secs(9));
        assert_eq!(registry.backoff_base_for(&record), Duration::from_millis(50));
    }

    #[test]
    fn test_timeout_overrides_are_clamped_to_max_timeout() {
        let mut builder = Registry::builder();
        builder.register::<ArchiveClaims>().unwrap();
        builder.register::<IssuePolicy>().unwrap();
        builder.defaults(JobDefaults {
            timeout: Duration::from_secs(60),
            max_timeout: Some(Duration::from_secs(899)),
            ..JobDefaults::default()
        });
        let registry = builder.build();

        assert_eq!(registry.timeout_for(&ArchiveClaims), Duration::from_secs(899));
        let job = IssuePolicy {
            quote_id: "q-4".into(),
            premium_cents: 1,
            riders: vec![],
        };
        assert_eq!(registry.timeout_for(&job), Duration::from_secs(60));
    }

    proptest! {
        #[test]
        fn serialize_deserialize_round_trip(
            quote_id in "[a-z0-9-]{1,24}",
            premium_cents in any::<i64>(),
            riders in proptest::collection::vec("[a-z]{1,8}", 0..4),
        ) {
            let registry = registry();
            let job = IssuePolicy { quote_id, premium_cents, riders };

            let record = registry.serialize(&job, None).unwrap();
            let wire = SerializedJob::from_json(&record.to_json().unwrap()).unwrap();
            let restored = registry.deserialize(&wire).unwrap();

            prop_assert_eq!(restored.to_payload().unwrap(), serde_json::to_value(&job).unwrap());
            prop_assert_eq!(restored.queue_name(), "critical");
            prop_assert_eq!(restored.priority_level(), 10);
            prop_assert_eq!(registry.max_retries_for(restored.as_ref()), 5);
        }
    }
}
