// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! agw-audit
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use agw_core::problem::{DecisionStage, ReasonCode};
use agw_core::{ContractError, canonical_json, sha256_hex};
use agw_store::{JsonlJournal, StoreError};

/// Errors from audit log operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The durable journal rejected an append; the record is not visible
    /// and the originating request must fail closed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The record body could not be canonicalised.
    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// One hash-chained decision record.
///
/// `self_hash = SHA256(prev_hash || canonical(body))` where `body` is the
/// record minus both hash fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Decision identifier, referenced from operator logs.
    pub decision_id: Uuid,
    /// Correlation identifier of the denied request.
    pub correlation_id: String,
    /// Caller identity.
    pub caller_id: String,
    /// Customer identifier.
    pub customer_id: String,
    /// Agent spec identifier.
    pub agent_id: String,
    /// Gate-chain stage the decision was made at.
    pub stage: DecisionStage,
    /// Intent action of the denied request, if one was declared.
    pub action: Option<String>,
    /// Why the request was denied.
    pub reason_code: ReasonCode,
    /// Structured denial details.
    pub details: serde_json::Value,
    /// Request path the decision applies to.
    pub path: String,
    /// Previous record's `self_hash` (empty for genesis).
    pub prev_hash: String,
    /// This record's hash over the canonical body.
    pub self_hash: String,
    /// When the decision was recorded.
    pub timestamp_utc: DateTime<Utc>,
}

impl DecisionRecord {
    /// The canonical body: every field except the two hash fields, reduced
    /// to sorted-key JSON. Two implementations must produce identical bytes
    /// for identical inputs.
    fn canonical_body(&self) -> Result<String, ContractError> {
        canonical_json(&serde_json::json!({
            "decision_id": self.decision_id,
            "correlation_id": self.correlation_id,
            "caller_id": self.caller_id,
            "customer_id": self.customer_id,
            "agent_id": self.agent_id,
            "stage": self.stage,
            "action": self.action,
            "reason_code": self.reason_code,
            "details": self.details,
            "path": self.path,
            "timestamp_utc": self.timestamp_utc,
        }))
    }

    /// Recompute the hash this record should carry given `prev_hash`.
    fn expected_hash(&self, prev_hash: &str) -> Result<String, ContractError> {
        let body = self.canonical_body()?;
        let mut input = Vec::with_capacity(prev_hash.len() + body.len());
        input.extend_from_slice(prev_hash.as_bytes());
        input.extend_from_slice(body.as_bytes());
        Ok(sha256_hex(&input))
    }

    /// The distinguished genesis record anchoring the chain at position 0.
    ///
    /// Fixed content so every freshly-initialised log starts from the same
    /// hash; excluded from listings.
    fn genesis() -> Self {
        let mut record = Self {
            decision_id: Uuid::nil(),
            correlation_id: String::new(),
            caller_id: String::new(),
            customer_id: String::new(),
            agent_id: String::new(),
            stage: DecisionStage::Other,
            action: None,
            reason_code: ReasonCode::Internal,
            details: serde_json::json!({"genesis": true}),
            path: String::new(),
            prev_hash: String::new(),
            self_hash: String::new(),
            timestamp_utc: Utc.timestamp_opt(0, 0).single().unwrap_or_default(),
        };
        record.self_hash = record.expected_hash("").unwrap_or_default();
        record
    }

    /// Returns `true` for the genesis anchor.
    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.decision_id.is_nil() && self.prev_hash.is_empty()
    }
}

/// The fields a caller supplies for a new decision record; hashes, id, and
/// timestamp are assigned by the log.
#[derive(Debug, Clone)]
pub struct DecisionDraft {
    /// Correlation identifier of the denied request.
    pub correlation_id: String,
    /// Caller identity.
    pub caller_id: String,
    /// Customer identifier.
    pub customer_id: String,
    /// Agent spec identifier.
    pub agent_id: String,
    /// Gate-chain stage.
    pub stage: DecisionStage,
    /// Intent action, if declared.
    pub action: Option<String>,
    /// Reason code.
    pub reason_code: ReasonCode,
    /// Structured details.
    pub details: serde_json::Value,
    /// Request path.
    pub path: String,
}

/// Filter over decision records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    /// Match a single request.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Match a single caller.
    #[serde(default)]
    pub caller_id: Option<String>,
    /// Match a single agent.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Inclusive lower bound on the record timestamp.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the record timestamp.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    fn matches(&self, r: &DecisionRecord) -> bool {
        if self
            .correlation_id
            .as_deref()
            .is_some_and(|c| r.correlation_id != c)
        {
            return false;
        }
        if self.caller_id.as_deref().is_some_and(|c| r.caller_id != c) {
            return false;
        }
        if self.agent_id.as_deref().is_some_and(|a| r.agent_id != a) {
            return false;
        }
        if self.since.is_some_and(|s| r.timestamp_utc < s) {
            return false;
        }
        if self.until.is_some_and(|u| r.timestamp_utc >= u) {
            return false;
        }
        true
    }
}

/// Result of an integrity walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// `true` when every checked record verifies.
    pub ok: bool,
    /// Earliest offending index, when `ok` is `false`.
    pub first_bad_index: Option<usize>,
    /// Number of records checked.
    pub checked: usize,
}

struct Inner {
    records: Vec<DecisionRecord>,
    journal: Option<JsonlJournal<DecisionRecord>>,
}

/// The single-writer, hash-chained audit log.
pub struct AuditLog {
    inner: Mutex<Inner>,
}

impl AuditLog {
    /// Best-effort in-memory log for development and tests. Seeds genesis.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: vec![DecisionRecord::genesis()],
                journal: None,
            }),
        }
    }

    /// Durable log backed by a JSONL journal at `path`.
    ///
    /// Recovers the durable prefix; a fresh file is seeded with the genesis
    /// record before any decision can be appended.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Store`] if the journal cannot be opened or the
    /// genesis record cannot be persisted.
    pub fn durable(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let (mut journal, mut records) = JsonlJournal::open(path.as_ref())?;
        if records.is_empty() {
            let genesis = DecisionRecord::genesis();
            journal.append(&genesis)?;
            records.push(genesis);
        }
        info!(
            path = %path.as_ref().display(),
            recovered = records.len(),
            "audit log opened"
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                records,
                journal: Some(journal),
            }),
        })
    }

    /// Append one decision record. Durable before visible.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if hashing or the journal write fails; the
    /// caller must then fail the originating request closed.
    pub fn append(&self, draft: DecisionDraft) -> Result<DecisionRecord, AuditError> {
        let mut inner = self.lock();
        let prev_hash = inner
            .records
            .last()
            .map(|r| r.self_hash.clone())
            .unwrap_or_default();

        let mut record = DecisionRecord {
            decision_id: Uuid::new_v4(),
            correlation_id: draft.correlation_id,
            caller_id: draft.caller_id,
            customer_id: draft.customer_id,
            agent_id: draft.agent_id,
            stage: draft.stage,
            action: draft.action,
            reason_code: draft.reason_code,
            details: draft.details,
            path: draft.path,
            prev_hash: prev_hash.clone(),
            self_hash: String::new(),
            timestamp_utc: Utc::now(),
        };
        record.self_hash = record.expected_hash(&prev_hash)?;

        if let Some(journal) = inner.journal.as_mut() {
            journal.append(&record)?;
        }

        info!(
            decision_id = %record.decision_id,
            correlation_id = %record.correlation_id,
            stage = %record.stage,
            reason_code = %record.reason_code,
            "decision recorded"
        );

        inner.records.push(record.clone());
        Ok(record)
    }

    /// Filtered listing in insertion order, genesis excluded.
    #[must_use]
    pub fn list(&self, filter: &AuditFilter, limit: usize) -> Vec<DecisionRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| !r.is_genesis() && filter.matches(r))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Walk the chain (or an index sub-range) and verify every record.
    ///
    /// For each record the stored `self_hash` is compared against the
    /// recomputed hash, and `prev_hash` against the preceding record's
    /// `self_hash`. Read-only and idempotent: running it twice yields
    /// identical results.
    #[must_use]
    pub fn verify(&self, range: Option<std::ops::Range<usize>>) -> ChainVerification {
        let inner = self.lock();
        let end = range
            .as_ref()
            .map_or(inner.records.len(), |r| r.end.min(inner.records.len()));
        let start = range.as_ref().map_or(0, |r| r.start.min(end));

        let mut checked = 0;
        for index in start..end {
            checked += 1;
            let record = &inner.records[index];

            if index > 0 {
                let prev = &inner.records[index - 1];
                if record.prev_hash != prev.self_hash {
                    return ChainVerification {
                        ok: false,
                        first_bad_index: Some(index),
                        checked,
                    };
                }
            }

            let expected = record.expected_hash(&record.prev_hash).unwrap_or_default();
            if expected != record.self_hash {
                return ChainVerification {
                    ok: false,
                    first_bad_index: Some(index),
                    checked,
                };
            }
        }

        ChainVerification {
            ok: true,
            first_bad_index: None,
            checked,
        }
    }

    /// Total number of records, genesis included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Returns `true` when only the genesis record exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run one out-of-band verification pass and alert on failure.
///
/// Chain damage never affects request processing; it raises an error-level
/// operator alert carrying the earliest offending index.
pub fn verification_pass(log: &AuditLog) -> ChainVerification {
    let outcome = log.verify(None);
    if outcome.ok {
        info!(checked = outcome.checked, "audit chain verified");
    } else {
        warn!(
            first_bad_index = ?outcome.first_bad_index,
            checked = outcome.checked,
            "audit chain integrity violation"
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(correlation: &str) -> DecisionDraft {
        DecisionDraft {
            correlation_id: correlation.into(),
            caller_id: "caller-1".into(),
            customer_id: "cust-1".into(),
            agent_id: "marketing/v1".into(),
            stage: DecisionStage::Approval,
            action: Some("publish".into()),
            reason_code: ReasonCode::ApprovalRequired,
            details: serde_json::json!({"hint": "supply approval_id"}),
            path: "/agents/marketing/skills/post".into(),
        }
    }

    #[test]
    fn chain_links_and_verifies() {
        let log = AuditLog::in_memory();
        for i in 0..10 {
            log.append(draft(&format!("c-{i}"))).unwrap();
        }
        let outcome = log.verify(None);
        assert!(outcome.ok);
        assert_eq!(outcome.checked, 11);

        // Idempotent.
        assert_eq!(log.verify(None), outcome);
    }

    #[test]
    fn records_link_to_predecessor() {
        let log = AuditLog::in_memory();
        let a = log.append(draft("c-1")).unwrap();
        let b = log.append(draft("c-2")).unwrap();
        assert_eq!(b.prev_hash, a.self_hash);
        assert_ne!(a.self_hash, b.self_hash);
    }

    #[test]
    fn listing_filters_and_skips_genesis() {
        let log = AuditLog::in_memory();
        log.append(draft("c-1")).unwrap();
        log.append(draft("c-2")).unwrap();

        assert_eq!(log.list(&AuditFilter::default(), 100).len(), 2);

        let filter = AuditFilter {
            correlation_id: Some("c-2".into()),
            ..Default::default()
        };
        let records = log.list(&filter, 100);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].correlation_id, "c-2");
    }

    #[test]
    fn durable_log_reopens_and_keeps_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let tail = {
            let log = AuditLog::durable(&path).unwrap();
            log.append(draft("c-1")).unwrap();
            log.append(draft("c-2")).unwrap().self_hash
        };

        let log = AuditLog::durable(&path).unwrap();
        assert_eq!(log.len(), 3);
        assert!(log.verify(None).ok);

        // The chain continues from the recovered tail.
        let next = log.append(draft("c-3")).unwrap();
        assert_eq!(next.prev_hash, tail);
    }

    #[test]
    fn verify_sub_range() {
        let log = AuditLog::in_memory();
        for i in 0..5 {
            log.append(draft(&format!("c-{i}"))).unwrap();
        }
        let outcome = log.verify(Some(2..4));
        assert!(outcome.ok);
        assert_eq!(outcome.checked, 2);

        // Out-of-bounds ranges clamp instead of panicking.
        assert!(log.verify(Some(0..999)).ok);
    }
}
