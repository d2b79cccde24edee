//! Pending-request registry for decisions made outside the sales flow:
//! discount approval (negotiation) and accounting confirmation of the
//! deposit installment (contract).
//!
//! Resolution is decoupled from time: a request stays `Pending` until
//! someone calls `resolve`, and the stage gate consults only the
//! resolved value. `spawn_simulated_resolver` reproduces the original
//! fixed-delay approver on top of the same `resolve` path, for demo use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Observable state of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    NotRequested,
    Pending,
    Approved,
    Rejected,
}

/// What kind of decision a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    /// High-risk discount sign-off during negotiation.
    Discount,
    /// Accounting confirms the deposit installment was received.
    AccountingConfirmation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub kind: ApprovalKind,
    pub deal_id: String,
    pub note: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Thread-safe registry of approval requests, deduplicated per
/// (deal, kind) while a request is pending.
#[derive(Default)]
pub struct ApprovalRegistry {
    requests: Mutex<HashMap<String, ApprovalRequest>>,
}

impl ApprovalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a request. If the same deal already has a pending request of
    /// the same kind, that request is returned instead of a new one.
    pub fn request(&self, kind: ApprovalKind, deal_id: &str, note: &str) -> ApprovalRequest {
        let mut requests = self.requests.lock();

        if let Some(existing) = requests
            .values()
            .find(|r| r.deal_id == deal_id && r.kind == kind && r.status == ApprovalStatus::Pending)
        {
            log::debug!(
                "Approval request for deal {} ({:?}) already pending",
                deal_id,
                kind
            );
            return existing.clone();
        }

        let request = ApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            deal_id: deal_id.to_string(),
            note: note.to_string(),
            status: ApprovalStatus::Pending,
            requested_at: Utc::now(),
            resolved_at: None,
        };
        log::info!(
            "Approval requested: deal={} kind={:?} id={}",
            deal_id,
            kind,
            request.id
        );
        requests.insert(request.id.clone(), request.clone());
        request
    }

    /// Current status for a deal and kind. `NotRequested` if no request
    /// was ever filed; otherwise the status of the most recent one.
    pub fn status(&self, deal_id: &str, kind: ApprovalKind) -> ApprovalStatus {
        self.requests
            .lock()
            .values()
            .filter(|r| r.deal_id == deal_id && r.kind == kind)
            .max_by_key(|r| r.requested_at)
            .map(|r| r.status)
            .unwrap_or(ApprovalStatus::NotRequested)
    }

    /// Record the approver's decision. Returns the updated request, or
    /// `None` for an unknown id. Resolving an already-resolved request
    /// is a no-op returning the stored record.
    pub fn resolve(&self, request_id: &str, approved: bool) -> Option<ApprovalRequest> {
        let mut requests = self.requests.lock();
        let request = requests.get_mut(request_id)?;

        if request.status == ApprovalStatus::Pending {
            request.status = if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Rejected
            };
            request.resolved_at = Some(Utc::now());
            log::info!(
                "Approval resolved: id={} deal={} -> {:?}",
                request.id,
                request.deal_id,
                request.status
            );
        }
        Some(request.clone())
    }

    pub fn get(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.requests.lock().get(request_id).cloned()
    }
}

/// Demo stand-in for the human approver: approve `request_id` after a
/// fixed delay. Goes through the same `resolve` path the real approver
/// (or a test harness) would use.
pub fn spawn_simulated_resolver(
    registry: Arc<ApprovalRegistry>,
    request_id: String,
    delay: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        registry.resolve(&request_id, true);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_then_resolve() {
        let registry = ApprovalRegistry::new();
        assert_eq!(
            registry.status("d1", ApprovalKind::Discount),
            ApprovalStatus::NotRequested
        );

        let request = registry.request(ApprovalKind::Discount, "d1", "15% discount");
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert_eq!(
            registry.status("d1", ApprovalKind::Discount),
            ApprovalStatus::Pending
        );

        let resolved = registry.resolve(&request.id, true).unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(
            registry.status("d1", ApprovalKind::Discount),
            ApprovalStatus::Approved
        );
    }

    #[test]
    fn pending_requests_deduplicate() {
        let registry = ApprovalRegistry::new();
        let first = registry.request(ApprovalKind::Discount, "d1", "a");
        let second = registry.request(ApprovalKind::Discount, "d1", "b");
        assert_eq!(first.id, second.id);

        // Different kind for the same deal is a separate request
        let other = registry.request(ApprovalKind::AccountingConfirmation, "d1", "c");
        assert_ne!(first.id, other.id);
    }

    #[test]
    fn rejection_is_representable() {
        let registry = ApprovalRegistry::new();
        let request = registry.request(ApprovalKind::Discount, "d1", "30% discount");
        let resolved = registry.resolve(&request.id, false).unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Rejected);

        // A rejected request no longer dedups a new one
        let retry = registry.request(ApprovalKind::Discount, "d1", "20% discount");
        assert_ne!(retry.id, request.id);
        assert_eq!(
            registry.status("d1", ApprovalKind::Discount),
            ApprovalStatus::Pending
        );
    }

    #[test]
    fn resolving_twice_keeps_first_decision() {
        let registry = ApprovalRegistry::new();
        let request = registry.request(ApprovalKind::Discount, "d1", "");
        registry.resolve(&request.id, false);
        let second = registry.resolve(&request.id, true).unwrap();
        assert_eq!(second.status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn simulated_resolver_approves_after_delay() {
        let registry = Arc::new(ApprovalRegistry::new());
        let request = registry.request(ApprovalKind::AccountingConfirmation, "d1", "");

        let handle = spawn_simulated_resolver(
            registry.clone(),
            request.id.clone(),
            Duration::from_millis(10),
        );
        handle.await.unwrap();

        assert_eq!(
            registry.status("d1", ApprovalKind::AccountingConfirmation),
            ApprovalStatus::Approved
        );
    }
}
