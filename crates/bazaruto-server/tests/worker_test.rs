//! End-to-end behaviour of the worker: events in, jobs run, side effects out.

use async_trait::async_trait;
use bazaruto_config::{AppConfig, WebhookEndpoint};
use bazaruto_events::{
    names, Event, EventPublisher, PaymentReported, PolicyIssued, QuoteRequested, UserRegistered,
};
use bazaruto_jobs::{DynJob, JobAdapter, JobResult, MemoryAdapter};
use bazaruto_server::app::EXPIRE_QUOTE_SWEEP;
use bazaruto_server::jobs::{DeliverWebhookJob, TOPIC_HEADER};
use bazaruto_server::services::{Notification, Notifier, QuoteStatus};
use bazaruto_server::{AppBuilder, Application};
use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn templates(&self) -> Vec<String> {
        self.sent.lock().iter().map(|n| n.template.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> JobResult<()> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

struct Harness {
    app: Application,
    notifier: Arc<RecordingNotifier>,
    shutdown: CancellationToken,
    _documents: tempfile::TempDir,
}

impl Harness {
    async fn start(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let documents = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.jobs.worker.poll_interval_ms = 5;
        config.jobs.worker.shutdown_timeout_secs = 5;
        config.jobs.backoff.jitter_factor = 0.0;
        config.documents.dir = documents.path().display().to_string();
        configure(&mut config);

        let notifier = Arc::new(RecordingNotifier::default());
        let app = AppBuilder::new()
            .with_config(config)
            .with_adapter(Arc::new(MemoryAdapter::new()) as Arc<dyn JobAdapter>)
            .with_notifier(notifier.clone())
            .build()
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        app.start(&shutdown).unwrap();

        Self {
            app,
            notifier,
            shutdown,
            _documents: documents,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.app.shutdown().await.unwrap();
    }
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_issued_policy_gets_a_document() {
    let harness = Harness::start(|_| {}).await;
    let documents_dir = harness.app.config().documents.dir.clone();

    harness
        .app
        .bus()
        .publish_domain(&PolicyIssued::new("pol-1", "q-1", "user-1", "AUTO"))
        .await
        .unwrap();

    let notifier = harness.notifier.clone();
    assert!(eventually(|| {
        let notifier = notifier.clone();
        async move { notifier.templates() == vec!["policy_document_ready"] }
    })
    .await);

    let document = std::fs::read_to_string(format!("{documents_dir}/policies/pol-1.txt")).unwrap();
    assert!(document.contains("Product:    AUTO"));
    assert_eq!(harness.notifier.sent.lock()[0].user_id, "user-1");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registration_sends_welcome_email() {
    let harness = Harness::start(|_| {}).await;

    harness
        .app
        .bus()
        .publish_domain(&UserRegistered::new("user-2", "amina@example.com"))
        .await
        .unwrap();

    let notifier = harness.notifier.clone();
    assert!(eventually(|| {
        let notifier = notifier.clone();
        async move { notifier.templates() == vec!["welcome"] }
    })
    .await);
    assert_eq!(harness.notifier.sent.lock()[0].params["email"], "amina@example.com");

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_payment_reaches_subscribed_partner() {
    let partner = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks"))
        .and(header(TOPIC_HEADER, names::PAYMENT_RECEIVED))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&partner)
        .await;

    let url = format!("{}/hooks", partner.uri());
    let harness = Harness::start(move |config| {
        config.webhooks.endpoints.push(WebhookEndpoint {
            url,
            topics: vec![names::PAYMENT_RECEIVED.to_string()],
        });
    })
    .await;

    harness
        .app
        .bus()
        .publish_domain(&PaymentReported::received("pay-1", "pol-1", 12_500, "EUR"))
        .await
        .unwrap();

    assert!(eventually(|| {
        let partner = &partner;
        async move { partner.received_requests().await.is_some_and(|r| r.len() == 1) }
    })
    .await);

    let requests = partner.received_requests().await.unwrap();
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert_eq!(body["id"], "pay-1:payment.received:0");
    assert_eq!(body["data"]["amount_cents"], 12_500);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_payment_is_not_sent_to_received_only_partner() {
    let partner = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&partner)
        .await;

    let url = partner.uri();
    let harness = Harness::start(move |config| {
        config.webhooks.endpoints.push(WebhookEndpoint {
            url,
            topics: vec![names::PAYMENT_RECEIVED.to_string()],
        });
    })
    .await;

    harness
        .app
        .bus()
        .publish_domain(&PaymentReported::failed("pay-2", "pol-1", 900, "EUR", "card declined"))
        .await
        .unwrap();

    let dispatcher = harness.app.dispatcher().clone();
    assert!(eventually(|| {
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .stats()
                .await
                .unwrap()
                .get("critical")
                .is_some_and(|s| s.completed == Some(1))
        }
    })
    .await);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_webhook_delivery_fails_on_error_status() {
    let partner = MockServer::start().await;
    Mock::given(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&partner)
        .await;
    Mock::given(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&partner)
        .await;

    let harness = Harness::start(|_| {}).await;
    let delivery = |path: &str| {
        Box::new(DeliverWebhookJob {
            webhook_id: format!("wh-{path}"),
            url: format!("{}/{path}", partner.uri()),
            topic: names::POLICY_ISSUED.to_string(),
            body: serde_json::json!({ "policy_id": "pol-1" }),
        }) as Box<dyn DynJob>
    };
    let cancel = CancellationToken::new();

    harness
        .app
        .dispatcher()
        .chain(vec![delivery("ok")])
        .run(&cancel)
        .await
        .unwrap();

    let err = harness
        .app
        .dispatcher()
        .chain(vec![delivery("broken")])
        .run(&cancel)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("503"));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_requested_quote_expires_at_deadline() {
    let harness = Harness::start(|_| {}).await;
    let valid_until = Utc::now() + chrono::Duration::milliseconds(300);

    harness
        .app
        .bus()
        .publish_domain(&QuoteRequested::new("q-5", "user-5", "TRAVEL", valid_until))
        .await
        .unwrap();

    let quotes = harness.app.quotes().clone();
    assert!(eventually(|| {
        let quotes = quotes.clone();
        async move { quotes.status("q-5") == Some(QuoteStatus::Open) }
    })
    .await);
    assert!(eventually(|| {
        let quotes = quotes.clone();
        async move { quotes.status("q-5") == Some(QuoteStatus::Expired) }
    })
    .await);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_accepted_quote_survives_sweep() {
    let harness = Harness::start(|_| {}).await;
    let past = Utc::now() - chrono::Duration::minutes(1);
    harness.app.quotes().track("q-stale", past);
    harness.app.quotes().track("q-taken", past);

    harness
        .app
        .bus()
        .publish(Event::new(names::QUOTE_ACCEPTED, "q-taken", serde_json::json!({})))
        .await
        .unwrap();
    let quotes = harness.app.quotes().clone();
    assert!(eventually(|| {
        let quotes = quotes.clone();
        async move { quotes.status("q-taken") == Some(QuoteStatus::Accepted) }
    })
    .await);

    harness
        .app
        .manager()
        .scheduler()
        .trigger_job(EXPIRE_QUOTE_SWEEP)
        .await
        .unwrap();

    assert!(eventually(|| {
        let quotes = quotes.clone();
        async move { quotes.status("q-stale") == Some(QuoteStatus::Expired) }
    })
    .await);
    assert_eq!(quotes.status("q-taken"), Some(QuoteStatus::Accepted));

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_rejects_late_events() {
    let harness = Harness::start(|_| {}).await;
    let bus = harness.app.bus().clone();
    harness.stop().await;

    let result = bus
        .publish_domain(&UserRegistered::new("user-9", "late@example.com"))
        .await;
    assert!(result.is_err());
}
