// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reason codes, decision stages, and the structured problem shape.
//!
//! Every failure leaving the gateway is one of these values. Codes are
//! stable wire strings; the HTTP status mapping is fixed here so that the
//! ingress and the test suite cannot drift apart.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Stage of the gate chain a decision was made at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStage {
    /// Approval gate (publish authorization).
    Approval,
    /// Trial restriction and trial cap gates.
    Trial,
    /// Monthly plan budget gate.
    Budget,
    /// Trusted metering envelope gate.
    Metering,
    /// Everything else: intent hygiene, deadlines, infrastructure.
    Other,
}

impl std::fmt::Display for DecisionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approval => "approval",
            Self::Trial => "trial",
            Self::Budget => "budget",
            Self::Metering => "metering",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// The normative reason-code catalogue.
///
/// Serialized form is the snake_case wire string (`reason_code` in problem
/// responses and audit records).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// A side-effecting request arrived without an `intent_action`.
    IntentActionRequired,
    /// A side-effecting request lacks both autopublish and an approval id.
    ApprovalRequired,
    /// Autopublish was requested but the spec or plan does not allow it.
    AutopublishNotAllowed,
    /// The path names an agent spec that is not registered.
    UnknownReferenceAgent,
    /// Trial customers may not perform production writes.
    TrialProductionWriteBlocked,
    /// The trial daily task cap is exhausted.
    TrialDailyCap,
    /// The trial daily token cap would be exceeded.
    TrialDailyTokenCap,
    /// The declared cost exceeds the trial per-call ceiling.
    TrialHighCostCall,
    /// A budgeted plan requires non-zero metering when no secret is set.
    MeteringRequiredForBudget,
    /// The monthly plan budget would be exceeded.
    MonthlyBudgetExceeded,
    /// The trusted metering envelope is missing required headers.
    MeteringEnvelopeRequired,
    /// The envelope signature does not verify.
    MeteringEnvelopeInvalid,
    /// The envelope timestamp is outside the freshness window.
    MeteringEnvelopeExpired,
    /// The request deadline expired before gating completed.
    Deadline,
    /// Infrastructure failure; the request failed closed.
    Internal,
}

impl ReasonCode {
    /// Stable wire string for this code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentActionRequired => "intent_action_required",
            Self::ApprovalRequired => "approval_required",
            Self::AutopublishNotAllowed => "autopublish_not_allowed",
            Self::UnknownReferenceAgent => "unknown_reference_agent",
            Self::TrialProductionWriteBlocked => "trial_production_write_blocked",
            Self::TrialDailyCap => "trial_daily_cap",
            Self::TrialDailyTokenCap => "trial_daily_token_cap",
            Self::TrialHighCostCall => "trial_high_cost_call",
            Self::MeteringRequiredForBudget => "metering_required_for_budget",
            Self::MonthlyBudgetExceeded => "monthly_budget_exceeded",
            Self::MeteringEnvelopeRequired => "metering_envelope_required",
            Self::MeteringEnvelopeInvalid => "metering_envelope_invalid",
            Self::MeteringEnvelopeExpired => "metering_envelope_expired",
            Self::Deadline => "deadline",
            Self::Internal => "internal",
        }
    }

    /// HTTP status the ingress must emit for this code.
    ///
    /// 403 for approval-stage denials; 429 for trial, budget, and metering
    /// denials; 422 for request/spec hygiene; 408 for deadlines; 500 for
    /// infrastructure.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ApprovalRequired | Self::AutopublishNotAllowed => 403,
            Self::TrialProductionWriteBlocked
            | Self::TrialDailyCap
            | Self::TrialDailyTokenCap
            | Self::TrialHighCostCall
            | Self::MeteringRequiredForBudget
            | Self::MonthlyBudgetExceeded
            | Self::MeteringEnvelopeRequired
            | Self::MeteringEnvelopeInvalid
            | Self::MeteringEnvelopeExpired => 429,
            Self::IntentActionRequired | Self::UnknownReferenceAgent => 422,
            Self::Deadline => 408,
            Self::Internal => 500,
        }
    }

    /// The gate-chain stage this code is reported under.
    #[must_use]
    pub fn stage(&self) -> DecisionStage {
        match self {
            Self::ApprovalRequired | Self::AutopublishNotAllowed => DecisionStage::Approval,
            Self::TrialProductionWriteBlocked
            | Self::TrialDailyCap
            | Self::TrialDailyTokenCap
            | Self::TrialHighCostCall => DecisionStage::Trial,
            Self::MonthlyBudgetExceeded => DecisionStage::Budget,
            Self::MeteringRequiredForBudget
            | Self::MeteringEnvelopeRequired
            | Self::MeteringEnvelopeInvalid
            | Self::MeteringEnvelopeExpired => DecisionStage::Metering,
            Self::IntentActionRequired
            | Self::UnknownReferenceAgent
            | Self::Deadline
            | Self::Internal => DecisionStage::Other,
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured problem response returned on every failure.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Problem {
    /// Short human-readable title.
    pub title: String,
    /// Machine-readable reason code.
    pub reason_code: ReasonCode,
    /// Structured details (e.g. `window_resets_at` for budget denials).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    /// Correlation identifier for the failed request.
    pub correlation_id: String,
}

impl Problem {
    /// Create a problem with empty details.
    #[must_use]
    pub fn new(reason_code: ReasonCode, title: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            reason_code,
            details: serde_json::Value::Null,
            correlation_id: correlation_id.into(),
        }
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_match_catalogue() {
        assert_eq!(ReasonCode::ApprovalRequired.as_str(), "approval_required");
        assert_eq!(
            ReasonCode::MonthlyBudgetExceeded.as_str(),
            "monthly_budget_exceeded"
        );
        assert_eq!(
            ReasonCode::TrialProductionWriteBlocked.as_str(),
            "trial_production_write_blocked"
        );
        assert_eq!(
            serde_json::to_string(&ReasonCode::MeteringEnvelopeInvalid).unwrap(),
            "\"metering_envelope_invalid\""
        );
    }

    #[test]
    fn status_mapping_is_fixed() {
        assert_eq!(ReasonCode::ApprovalRequired.http_status(), 403);
        assert_eq!(ReasonCode::AutopublishNotAllowed.http_status(), 403);
        assert_eq!(ReasonCode::TrialDailyCap.http_status(), 429);
        assert_eq!(ReasonCode::MonthlyBudgetExceeded.http_status(), 429);
        assert_eq!(ReasonCode::MeteringEnvelopeExpired.http_status(), 429);
        assert_eq!(ReasonCode::IntentActionRequired.http_status(), 422);
        assert_eq!(ReasonCode::Deadline.http_status(), 408);
        assert_eq!(ReasonCode::Internal.http_status(), 500);
    }

    #[test]
    fn stages_match_spec() {
        assert_eq!(ReasonCode::ApprovalRequired.stage(), DecisionStage::Approval);
        assert_eq!(ReasonCode::TrialHighCostCall.stage(), DecisionStage::Trial);
        assert_eq!(ReasonCode::MonthlyBudgetExceeded.stage(), DecisionStage::Budget);
        assert_eq!(
            ReasonCode::MeteringEnvelopeRequired.stage(),
            DecisionStage::Metering
        );
        assert_eq!(ReasonCode::Deadline.stage(), DecisionStage::Other);
    }

    #[test]
    fn problem_omits_null_details() {
        let p = Problem::new(ReasonCode::Internal, "boom", "c-1");
        let v = serde_json::to_value(&p).unwrap();
        assert!(v.get("details").is_none());

        let p = p.with_details(serde_json::json!({"k": 1}));
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["details"]["k"], 1);
    }
}
