//! Closed table of marketplace event names.

/// A quote was requested by a customer.
pub const QUOTE_REQUESTED: &str = "quote.requested";
/// A quote was accepted.
pub const QUOTE_ACCEPTED: &str = "quote.accepted";
/// A policy was issued.
pub const POLICY_ISSUED: &str = "policy.issued";
/// A policy was cancelled.
pub const POLICY_CANCELLED: &str = "policy.cancelled";
/// A claim was submitted.
pub const CLAIM_SUBMITTED: &str = "claim.submitted";
/// A claim was settled.
pub const CLAIM_SETTLED: &str = "claim.settled";
/// A payment was received.
pub const PAYMENT_RECEIVED: &str = "payment.received";
/// A payment failed.
pub const PAYMENT_FAILED: &str = "payment.failed";
/// A user registered.
pub const USER_REGISTERED: &str = "user.registered";
/// An outbound webhook delivery was requested.
pub const WEBHOOK_REQUESTED: &str = "webhook.requested";

/// Every known event name.
pub const ALL: &[&str] = &[
    QUOTE_REQUESTED,
    QUOTE_ACCEPTED,
    POLICY_ISSUED,
    POLICY_CANCELLED,
    CLAIM_SUBMITTED,
    CLAIM_SETTLED,
    PAYMENT_RECEIVED,
    PAYMENT_FAILED,
    USER_REGISTERED,
    WEBHOOK_REQUESTED,
];

/// Returns true if `name` is in the table.
pub fn is_known(name: &str) -> bool {
    ALL.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique_and_dotted() {
        let unique: HashSet<_> = ALL.iter().collect();
        assert_eq!(unique.len(), ALL.len());
        assert!(ALL.iter().all(|name| name.split('.').count() == 2));
    }

    #[test]
    fn test_is_known() {
        assert!(is_known("policy.issued"));
        assert!(!is_known("policy.exploded"));
    }
}
