// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! agw-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the Agent Gateway.
//!
//! If you only take one dependency, take this one.

/// Micro-currency conversion for exact budget arithmetic.
pub mod money;
/// Plan records: caps, budgets, and the autopublish flag.
pub mod plan;
/// Reason codes, decision stages, and the structured problem shape.
pub mod problem;
/// Usage events recorded in the ledger.
pub mod usage;
/// UTC calendar-day and calendar-month window math.
pub mod window;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Current gateway API version string embedded in health responses and records.
///
/// # Examples
///
/// ```
/// assert_eq!(agw_core::API_VERSION, "agw/v1");
/// ```
pub const API_VERSION: &str = "agw/v1";

/// What the skill will do with its output.
///
/// Every request that intends a side effect must declare one of the
/// side-effecting actions; `Draft` produces output without publishing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntentAction {
    /// Produce a draft only; nothing leaves the gateway.
    Draft,
    /// Publish the output to a configured integration channel.
    Publish,
    /// Send the output (mail-like delivery).
    Send,
    /// Post the output to an external surface.
    Post,
    /// Write the output into an external system of record.
    Write,
}

impl IntentAction {
    /// Returns `true` if this action produces an effect outside the gateway.
    #[must_use]
    pub fn is_side_effecting(self) -> bool {
        !matches!(self, Self::Draft)
    }
}

impl std::fmt::Display for IntentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Publish => "publish",
            Self::Send => "send",
            Self::Post => "post",
            Self::Write => "write",
        };
        write!(f, "{s}")
    }
}

/// Token, model, and cost counters as declared by the caller.
///
/// Declared values are advisory: when a trusted metering envelope validates,
/// its values override these for the remainder of the request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DeclaredMetering {
    /// Input (prompt) tokens the caller claims this invocation consumed.
    #[serde(default)]
    pub tokens_in: u64,

    /// Output (completion) tokens the caller claims this invocation produced.
    #[serde(default)]
    pub tokens_out: u64,

    /// Model identifier, if the caller knows it.
    #[serde(default)]
    pub model: Option<String>,

    /// Whether the invocation was served from a cache.
    #[serde(default)]
    pub cache_hit: bool,

    /// Estimated cost in the plan currency.
    #[serde(default)]
    pub cost_amount: Option<f64>,
}

/// Token, model, and cost counters attested by a validated metering envelope.
///
/// Produced only by the metering verifier; once present on a context these
/// values are authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AttestedMetering {
    /// Timestamp the envelope was signed at.
    pub ts: DateTime<Utc>,
    /// Attested input token count.
    pub tokens_in: u64,
    /// Attested output token count.
    pub tokens_out: u64,
    /// Attested model identifier (may be empty).
    pub model: String,
    /// Attested cache-hit flag.
    pub cache_hit: bool,
    /// Attested cost in the plan currency.
    pub cost_amount: f64,
}

/// Metering values a gate or recorder should actually use: attested when an
/// envelope validated, declared otherwise.
#[derive(Debug, Clone)]
pub struct EffectiveMetering {
    /// Input token count.
    pub tokens_in: u64,
    /// Output token count.
    pub tokens_out: u64,
    /// Model identifier, if known.
    pub model: Option<String>,
    /// Cache-hit flag.
    pub cache_hit: bool,
    /// Cost in the plan currency, if known.
    pub cost_amount: Option<f64>,
    /// Whether these values came from a validated envelope.
    pub attested: bool,
}

/// Per-request state threaded through the gate chain.
///
/// Created by the ingress, exclusively owned by the request task, destroyed
/// at response time. Gates read it and may append annotations; only the
/// metering gate sets `attested`.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Correlation identifier echoed in responses and records.
    pub correlation_id: String,
    /// Caller identity stamped by the upstream identity proxy.
    pub caller_id: String,
    /// Customer the invocation is accounted against.
    pub customer_id: String,
    /// Plan governing caps and budgets for this customer.
    pub plan_id: String,
    /// Target agent spec identifier.
    pub agent_id: String,
    /// Target skill identifier.
    pub skill_id: String,
    /// Declared intent, if any.
    pub intent_action: Option<IntentAction>,
    /// Whether the request asks for the output to be published.
    pub do_publish: bool,
    /// Whether the request asks to publish without a per-request approval.
    pub autopublish: bool,
    /// Whether the customer is in trial mode.
    pub trial_mode: bool,
    /// Approval ticket for side-effecting actions.
    pub approval_id: Option<String>,
    /// Free-form purpose recorded with usage events.
    pub purpose: Option<String>,
    /// Caller-declared metering.
    pub declared: DeclaredMetering,
    /// Metering attested by a validated envelope, if any.
    pub attested: Option<AttestedMetering>,
    /// Notes accumulated by gates along the allow path.
    pub annotations: Vec<String>,
    /// When the ingress accepted the request.
    pub received_at: DateTime<Utc>,
}

impl InvocationContext {
    /// Resolve the metering values downstream consumers must use.
    ///
    /// Envelope-attested values win over caller-declared values without
    /// exception.
    #[must_use]
    pub fn effective_metering(&self) -> EffectiveMetering {
        match &self.attested {
            Some(a) => EffectiveMetering {
                tokens_in: a.tokens_in,
                tokens_out: a.tokens_out,
                model: if a.model.is_empty() {
                    None
                } else {
                    Some(a.model.clone())
                },
                cache_hit: a.cache_hit,
                cost_amount: Some(a.cost_amount),
                attested: true,
            },
            None => EffectiveMetering {
                tokens_in: self.declared.tokens_in,
                tokens_out: self.declared.tokens_out,
                model: self.declared.model.clone(),
                cache_hit: self.declared.cache_hit,
                cost_amount: self.declared.cost_amount,
                attested: false,
            },
        }
    }

    /// Returns `true` when this request intends an effect outside the
    /// gateway, either via `do_publish` or a side-effecting intent action.
    #[must_use]
    pub fn is_side_effecting(&self) -> bool {
        self.do_publish
            || self
                .intent_action
                .is_some_and(IntentAction::is_side_effecting)
    }

    /// Append a gate annotation.
    pub fn annotate(&mut self, note: impl Into<String>) {
        self.annotations.push(note.into());
    }
}

/// Errors from contract-level operations (serialization, hashing).
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// JSON serialization or deserialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce a deterministic JSON string for hashing.
///
/// Not a full JCS implementation, but stable for our types: map keys are
/// sorted by serde_json's Value representation and numbers serialize
/// consistently.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the value cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, ContractError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> InvocationContext {
        InvocationContext {
            correlation_id: "c-1".into(),
            caller_id: "caller-1".into(),
            customer_id: "cust-1".into(),
            plan_id: "starter".into(),
            agent_id: "marketing/v1".into(),
            skill_id: "weekly-post".into(),
            intent_action: Some(IntentAction::Draft),
            do_publish: false,
            autopublish: false,
            trial_mode: false,
            approval_id: None,
            purpose: None,
            declared: DeclaredMetering {
                tokens_in: 100,
                tokens_out: 50,
                model: Some("small".into()),
                cache_hit: false,
                cost_amount: Some(0.01),
            },
            attested: None,
            annotations: vec![],
            received_at: Utc::now(),
        }
    }

    #[test]
    fn draft_is_not_side_effecting() {
        assert!(!IntentAction::Draft.is_side_effecting());
        for a in [
            IntentAction::Publish,
            IntentAction::Send,
            IntentAction::Post,
            IntentAction::Write,
        ] {
            assert!(a.is_side_effecting());
        }
    }

    #[test]
    fn effective_metering_uses_declared_without_envelope() {
        let m = ctx().effective_metering();
        assert!(!m.attested);
        assert_eq!(m.tokens_in, 100);
        assert_eq!(m.cost_amount, Some(0.01));
    }

    #[test]
    fn effective_metering_prefers_attested() {
        let mut c = ctx();
        c.attested = Some(AttestedMetering {
            ts: Utc::now(),
            tokens_in: 900,
            tokens_out: 400,
            model: "large".into(),
            cache_hit: true,
            cost_amount: 0.05,
        });
        let m = c.effective_metering();
        assert!(m.attested);
        assert_eq!(m.tokens_in, 900);
        assert_eq!(m.model.as_deref(), Some("large"));
        assert_eq!(m.cost_amount, Some(0.05));
    }

    #[test]
    fn attested_empty_model_maps_to_none() {
        let mut c = ctx();
        c.attested = Some(AttestedMetering {
            ts: Utc::now(),
            tokens_in: 1,
            tokens_out: 1,
            model: String::new(),
            cache_hit: false,
            cost_amount: 0.0,
        });
        assert_eq!(c.effective_metering().model, None);
    }

    #[test]
    fn canonical_json_is_deterministic() {
        let a = canonical_json(&serde_json::json!({"b": 1, "a": 2})).unwrap();
        let b = canonical_json(&serde_json::json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
