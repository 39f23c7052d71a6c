// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! agw-ledger
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use agw_core::money::to_micros;
use agw_core::usage::{EventType, UsageEvent};
use agw_core::window::{Bucket, bucket_start, day_start, in_window, month_start, next_month_start};
use agw_store::{JsonlJournal, StoreError};

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The durable journal rejected an operation; the event is not recorded.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Filter over ledger rows. Every field is optional; an empty filter
/// matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerFilter {
    /// Match a single customer partition.
    #[serde(default)]
    pub customer_id: Option<String>,
    /// Match a single agent.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Match a single request.
    #[serde(default)]
    pub correlation_id: Option<String>,
    /// Match one event type.
    #[serde(default)]
    pub event_type: Option<EventType>,
    /// Inclusive lower bound on the event timestamp.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on the event timestamp.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    /// Returns `true` if `event` passes this filter.
    #[must_use]
    pub fn matches(&self, event: &UsageEvent) -> bool {
        if self
            .customer_id
            .as_deref()
            .is_some_and(|c| event.customer_id != c)
        {
            return false;
        }
        if self.agent_id.as_deref().is_some_and(|a| event.agent_id != a) {
            return false;
        }
        if self
            .correlation_id
            .as_deref()
            .is_some_and(|c| event.correlation_id != c)
        {
            return false;
        }
        if self.event_type.is_some_and(|t| event.event_type != t) {
            return false;
        }
        if self.since.is_some_and(|s| event.timestamp_utc < s) {
            return false;
        }
        if self.until.is_some_and(|u| event.timestamp_utc >= u) {
            return false;
        }
        true
    }
}

/// One aggregation row: totals for a single UTC bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRow {
    /// First instant of the bucket (UTC midnight or month start).
    pub bucket_start: DateTime<Utc>,
    /// Number of events in the bucket.
    pub events: u64,
    /// Total input tokens.
    pub tokens_in: u64,
    /// Total output tokens.
    pub tokens_out: u64,
    /// Total cost in the plan currency.
    pub cost_amount: f64,
}

/// Trial consumption for one caller within the current UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialDayUsage {
    /// Number of skill executions recorded today.
    pub executions: u64,
    /// Total tokens (in + out) recorded today.
    pub tokens: u64,
}

struct Inner {
    events: Vec<UsageEvent>,
    journal: Option<JsonlJournal<UsageEvent>>,
}

/// The append-only usage ledger.
///
/// A single mutex provides the one-writer-per-partition discipline; reads
/// that observe a returned append are monotone because visibility happens
/// inside the same critical section that made the event durable.
pub struct UsageLedger {
    inner: Mutex<Inner>,
}

impl UsageLedger {
    /// Best-effort in-memory ledger for development and tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                journal: None,
            }),
        }
    }

    /// Durable ledger backed by a JSONL journal at `path`.
    ///
    /// Recovers the durable prefix on open.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] if the journal cannot be opened.
    pub fn durable(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let (journal, events) = JsonlJournal::open(path.as_ref())?;
        info!(
            path = %path.as_ref().display(),
            recovered = events.len(),
            "usage ledger opened"
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                events,
                journal: Some(journal),
            }),
        })
    }

    /// Append one event. Durable before visible; all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] if the journal write fails, in which
    /// case the event is not visible to any reader.
    pub fn append(&self, event: UsageEvent) -> Result<Uuid, LedgerError> {
        let mut inner = self.lock();
        if let Some(journal) = inner.journal.as_mut() {
            journal.append(&event)?;
        }
        let event_id = event.event_id;
        inner.events.push(event);
        Ok(event_id)
    }

    /// Filtered retrieval in insertion order, truncated to `limit`.
    #[must_use]
    pub fn query(&self, filter: &LedgerFilter, limit: usize) -> Vec<UsageEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// UTC-bucket aggregation over the filtered events.
    ///
    /// Buckets are half-open intervals aligned to UTC midnights or month
    /// starts; every event lands in exactly one bucket. Rows come back in
    /// ascending bucket order.
    #[must_use]
    pub fn aggregate(&self, filter: &LedgerFilter, bucket: Bucket) -> Vec<UsageRow> {
        let mut rows: BTreeMap<DateTime<Utc>, UsageRow> = BTreeMap::new();
        for event in self.lock().events.iter().filter(|e| filter.matches(e)) {
            let start = bucket_start(event.timestamp_utc, bucket);
            let row = rows.entry(start).or_insert_with(|| UsageRow {
                bucket_start: start,
                events: 0,
                tokens_in: 0,
                tokens_out: 0,
                cost_amount: 0.0,
            });
            row.events += 1;
            row.tokens_in += event.tokens_in;
            row.tokens_out += event.tokens_out;
            row.cost_amount += event.cost_amount;
        }
        rows.into_values().collect()
    }

    /// Micro-unit cost a customer has accrued in the UTC month containing
    /// `now`, over budget-counting events only.
    #[must_use]
    pub fn month_cost_micros(&self, customer_id: &str, now: DateTime<Utc>) -> i64 {
        let start = month_start(now);
        let end = next_month_start(now);
        self.lock()
            .events
            .iter()
            .filter(|e| {
                e.customer_id == customer_id
                    && e.event_type.counts_toward_budget()
                    && in_window(e.timestamp_utc, start, end)
            })
            .map(|e| to_micros(e.cost_amount))
            .sum()
    }

    /// A caller's trial consumption within the UTC day containing `now`.
    ///
    /// Executions count `skill_execution` events; tokens sum both counters
    /// across those events.
    #[must_use]
    pub fn trial_day_usage(&self, caller_id: &str, now: DateTime<Utc>) -> TrialDayUsage {
        let start = day_start(now);
        let inner = self.lock();
        let mut usage = TrialDayUsage {
            executions: 0,
            tokens: 0,
        };
        for e in inner.events.iter().filter(|e| {
            e.caller_id == caller_id
                && e.event_type == EventType::SkillExecution
                && e.timestamp_utc >= start
        }) {
            usage.executions += 1;
            usage.tokens += e.tokens_in + e.tokens_out;
        }
        usage
    }

    /// Total number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    /// Returns `true` when no events are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
