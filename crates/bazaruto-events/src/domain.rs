//! Typed marketplace events.

use crate::error::EventResult;
use crate::event::DomainEvent;
use crate::names;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event emitted when a customer requests a quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequested {
    pub quote_id: String,
    pub user_id: String,
    pub product_code: String,
    pub valid_until: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

impl QuoteRequested {
    #[must_use]
    pub fn new(
        quote_id: impl Into<String>,
        user_id: impl Into<String>,
        product_code: impl Into<String>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            quote_id: quote_id.into(),
            user_id: user_id.into(),
            product_code: product_code.into(),
            valid_until,
            occurred_at: Utc::now(),
        }
    }
}

impl DomainEvent for QuoteRequested {
    fn event_type(&self) -> &'static str {
        names::QUOTE_REQUESTED
    }

    fn aggregate_id(&self) -> String {
        self.quote_id.clone()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn to_payload(&self) -> EventResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Event emitted when a policy is issued from an accepted quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyIssued {
    pub policy_id: String,
    pub quote_id: String,
    pub user_id: String,
    pub product_code: String,
    pub occurred_at: DateTime<Utc>,
}

impl PolicyIssued {
    #[must_use]
    pub fn new(
        policy_id: impl Into<String>,
        quote_id: impl Into<String>,
        user_id: impl Into<String>,
        product_code: impl Into<String>,
    ) -> Self {
        Self {
            policy_id: policy_id.into(),
            quote_id: quote_id.into(),
            user_id: user_id.into(),
            product_code: product_code.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl DomainEvent for PolicyIssued {
    fn event_type(&self) -> &'static str {
        names::POLICY_ISSUED
    }

    fn aggregate_id(&self) -> String {
        self.policy_id.clone()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn to_payload(&self) -> EventResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Event emitted when a claim is submitted against a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSubmitted {
    pub claim_id: String,
    pub policy_id: String,
    pub user_id: String,
    pub occurred_at: DateTime<Utc>,
}

impl ClaimSubmitted {
    #[must_use]
    pub fn new(
        claim_id: impl Into<String>,
        policy_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            policy_id: policy_id.into(),
            user_id: user_id.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl DomainEvent for ClaimSubmitted {
    fn event_type(&self) -> &'static str {
        names::CLAIM_SUBMITTED
    }

    fn aggregate_id(&self) -> String {
        self.claim_id.clone()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn to_payload(&self) -> EventResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Outcome reported by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Received,
    Failed,
}

/// Event emitted when the payment provider reports on a premium payment.
///
/// Published as `payment.received` or `payment.failed` depending on the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReported {
    pub payment_id: String,
    pub policy_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub outcome: PaymentOutcome,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl PaymentReported {
    #[must_use]
    pub fn received(
        payment_id: impl Into<String>,
        policy_id: impl Into<String>,
        amount_cents: i64,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            payment_id: payment_id.into(),
            policy_id: policy_id.into(),
            amount_cents,
            currency: currency.into(),
            outcome: PaymentOutcome::Received,
            failure_reason: None,
            occurred_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn failed(
        payment_id: impl Into<String>,
        policy_id: impl Into<String>,
        amount_cents: i64,
        currency: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            outcome: PaymentOutcome::Failed,
            failure_reason: Some(reason.into()),
            ..Self::received(payment_id, policy_id, amount_cents, currency)
        }
    }
}

impl DomainEvent for PaymentReported {
    fn event_type(&self) -> &'static str {
        match self.outcome {
            PaymentOutcome::Received => names::PAYMENT_RECEIVED,
            PaymentOutcome::Failed => names::PAYMENT_FAILED,
        }
    }

    fn aggregate_id(&self) -> String {
        self.payment_id.clone()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn to_payload(&self) -> EventResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Event emitted when a new user registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegistered {
    pub user_id: String,
    pub email: String,
    pub occurred_at: DateTime<Utc>,
}

impl UserRegistered {
    #[must_use]
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            occurred_at: Utc::now(),
        }
    }
}

impl DomainEvent for UserRegistered {
    fn event_type(&self) -> &'static str {
        names::USER_REGISTERED
    }

    fn aggregate_id(&self) -> String {
        self.user_id.clone()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn to_payload(&self) -> EventResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Event emitted when a partner webhook must be notified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRequested {
    pub webhook_id: String,
    pub url: String,
    pub topic: String,
    pub body: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl WebhookRequested {
    #[must_use]
    pub fn new(
        webhook_id: impl Into<String>,
        url: impl Into<String>,
        topic: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            url: url.into(),
            topic: topic.into(),
            body,
            occurred_at: Utc::now(),
        }
    }
}

impl DomainEvent for WebhookRequested {
    fn event_type(&self) -> &'static str {
        names::WEBHOOK_REQUESTED
    }

    fn aggregate_id(&self) -> String {
        self.webhook_id.clone()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn to_payload(&self) -> EventResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
