//! Collaborators resolved by jobs through the registry's service map.
//!
//! Jobs never own clients or stores; they look them up per attempt with
//! [`JobContext::require_service`](bazaruto_jobs::JobContext::require_service).

use async_trait::async_trait;
use bazaruto_jobs::{JobError, JobResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Delivery channel of a customer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

/// A templated message addressed to a marketplace user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: String,
    pub channel: Channel,
    pub template: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Sends customer notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> JobResult<()>;
}

/// Notifier that only records deliveries in the log.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, notification: &Notification) -> JobResult<()> {
        info!(
            user_id = %notification.user_id,
            channel = ?notification.channel,
            template = %notification.template,
            "Notification sent"
        );
        Ok(())
    }
}

/// Stores rendered documents and returns their location.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put(&self, key: &str, contents: &[u8]) -> JobResult<String>;
}

/// Document store backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalDocumentStore {
    root: PathBuf,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    async fn put(&self, key: &str, contents: &[u8]) -> JobResult<String> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') {
            return Err(JobError::perform(format!("invalid document key: {key}")));
        }

        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| JobError::perform(format!("failed to create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| JobError::perform(format!("failed to write {}: {e}", path.display())))?;

        Ok(path.display().to_string())
    }
}

/// Lifecycle state of a tracked quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStatus {
    Open,
    Accepted,
    Expired,
}

/// Quote lifecycle operations needed by the expiry jobs.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Expires one quote if it is still open and past its validity.
    async fn expire(&self, quote_id: &str, now: DateTime<Utc>) -> JobResult<bool>;

    /// Expires every open quote past its validity, returning their ids.
    async fn expire_stale(&self, now: DateTime<Utc>) -> JobResult<Vec<String>>;
}

#[derive(Debug, Clone)]
struct TrackedQuote {
    valid_until: DateTime<Utc>,
    status: QuoteStatus,
}

/// In-process quote book fed from quote events.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQuoteStore {
    quotes: Arc<Mutex<HashMap<String, TrackedQuote>>>,
}

impl InMemoryQuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking an open quote. Known quotes keep their state.
    pub fn track(&self, quote_id: impl Into<String>, valid_until: DateTime<Utc>) {
        self.quotes
            .lock()
            .entry(quote_id.into())
            .or_insert(TrackedQuote {
                valid_until,
                status: QuoteStatus::Open,
            });
    }

    /// Marks a quote accepted so it never expires.
    pub fn accept(&self, quote_id: &str) -> bool {
        match self.quotes.lock().get_mut(quote_id) {
            Some(quote) if quote.status == QuoteStatus::Open => {
                quote.status = QuoteStatus::Accepted;
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, quote_id: &str) -> Option<QuoteStatus> {
        self.quotes.lock().get(quote_id).map(|q| q.status)
    }
}

#[async_trait]
impl QuoteStore for InMemoryQuoteStore {
    async fn expire(&self, quote_id: &str, now: DateTime<Utc>) -> JobResult<bool> {
        let mut quotes = self.quotes.lock();
        match quotes.get_mut(quote_id) {
            Some(quote) if quote.status == QuoteStatus::Open && quote.valid_until <= now => {
                quote.status = QuoteStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> JobResult<Vec<String>> {
        let mut quotes = self.quotes.lock();
        let mut expired = Vec::new();
        for (id, quote) in quotes.iter_mut() {
            if quote.status == QuoteStatus::Open && quote.valid_until <= now {
                quote.status = QuoteStatus::Expired;
                expired.push(id.clone());
            }
        }
        expired.sort();
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_quote_expiry_respects_validity_and_acceptance() {
        let store = InMemoryQuoteStore::new();
        let now = Utc::now();
        store.track("q-open", now - Duration::minutes(5));
        store.track("q-future", now + Duration::hours(1));
        store.track("q-accepted", now - Duration::minutes(5));
        assert!(store.accept("q-accepted"));

        assert!(!store.expire("q-future", now).await.unwrap());
        assert!(!store.expire("q-accepted", now).await.unwrap());
        assert!(!store.expire("q-unknown", now).await.unwrap());
        assert!(store.expire("q-open", now).await.unwrap());
        assert!(!store.expire("q-open", now).await.unwrap());
        assert_eq!(store.status("q-open"), Some(QuoteStatus::Expired));
    }

    #[tokio::test]
    async fn test_expire_stale_sweeps_open_quotes() {
        let store = InMemoryQuoteStore::new();
        let now = Utc::now();
        store.track("q-2", now - Duration::seconds(1));
        store.track("q-1", now - Duration::days(1));
        store.track("q-3", now + Duration::days(1));

        assert_eq!(store.expire_stale(now).await.unwrap(), vec!["q-1", "q-2"]);
        assert!(store.expire_stale(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_document_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path());

        let location = store.put("policies/pol-1.txt", b"policy").await.unwrap();
        assert_eq!(std::fs::read(&location).unwrap(), b"policy");
        assert!(store.put("../escape.txt", b"x").await.is_err());
    }
}
