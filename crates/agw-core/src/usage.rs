// SPDX-License-Identifier: MIT OR Apache-2.0

//! Usage events recorded in the ledger.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of metered occurrence a [`UsageEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The budget gate evaluated a budgeted invocation on the allow path.
    BudgetPrecheck,
    /// A skill executed and produced output.
    SkillExecution,
    /// An approved publish action completed.
    PublishAction,
    /// A policy denial mirrored into the ledger for dashboards.
    Denial,
}

impl EventType {
    /// Returns `true` if this event type counts toward monthly budget sums.
    ///
    /// Budget sums cover executions and publishes only; prechecks and denial
    /// mirrors are informational.
    #[must_use]
    pub fn counts_toward_budget(self) -> bool {
        matches!(self, Self::SkillExecution | Self::PublishAction)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BudgetPrecheck => "budget_precheck",
            Self::SkillExecution => "skill_execution",
            Self::PublishAction => "publish_action",
            Self::Denial => "denial",
        };
        write!(f, "{s}")
    }
}

/// One append-only ledger row. No field is ever mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UsageEvent {
    /// Time-ordered event identifier assigned at append.
    pub event_id: Uuid,
    /// Event discriminator.
    pub event_type: EventType,
    /// Correlation identifier of the originating request.
    pub correlation_id: String,
    /// Caller identity.
    pub caller_id: String,
    /// Customer the event is accounted against.
    pub customer_id: String,
    /// Agent spec identifier.
    pub agent_id: String,
    /// Free-form purpose string.
    #[serde(default)]
    pub purpose: Option<String>,
    /// Model identifier, if known.
    #[serde(default)]
    pub model: Option<String>,
    /// Whether the invocation was served from a cache.
    #[serde(default)]
    pub cache_hit: bool,
    /// Input token count.
    pub tokens_in: u64,
    /// Output token count.
    pub tokens_out: u64,
    /// Cost in the plan currency.
    pub cost_amount: f64,
    /// Event timestamp (UTC).
    pub timestamp_utc: DateTime<Utc>,
}

/// Builder for constructing [`UsageEvent`]s ergonomically.
///
/// # Examples
///
/// ```
/// use agw_core::usage::{EventType, UsageEventBuilder};
///
/// let ev = UsageEventBuilder::new(EventType::SkillExecution, "corr-1", "cust-1")
///     .caller_id("caller-1")
///     .agent_id("marketing/v1")
///     .tokens(1200, 340)
///     .cost_amount(0.05)
///     .build();
///
/// assert_eq!(ev.customer_id, "cust-1");
/// assert_eq!(ev.tokens_in, 1200);
/// ```
#[derive(Debug)]
pub struct UsageEventBuilder {
    event_type: EventType,
    correlation_id: String,
    caller_id: String,
    customer_id: String,
    agent_id: String,
    purpose: Option<String>,
    model: Option<String>,
    cache_hit: bool,
    tokens_in: u64,
    tokens_out: u64,
    cost_amount: f64,
    timestamp_utc: Option<DateTime<Utc>>,
}

impl UsageEventBuilder {
    /// Create a builder for the given type, correlation, and customer.
    #[must_use]
    pub fn new(
        event_type: EventType,
        correlation_id: impl Into<String>,
        customer_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            correlation_id: correlation_id.into(),
            caller_id: String::new(),
            customer_id: customer_id.into(),
            agent_id: String::new(),
            purpose: None,
            model: None,
            cache_hit: false,
            tokens_in: 0,
            tokens_out: 0,
            cost_amount: 0.0,
            timestamp_utc: None,
        }
    }

    /// Set the caller identity.
    #[must_use]
    pub fn caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = caller_id.into();
        self
    }

    /// Set the agent identifier.
    #[must_use]
    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    /// Set the purpose string.
    #[must_use]
    pub fn purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Set the model identifier.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the cache-hit flag.
    #[must_use]
    pub fn cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    /// Set both token counters.
    #[must_use]
    pub fn tokens(mut self, tokens_in: u64, tokens_out: u64) -> Self {
        self.tokens_in = tokens_in;
        self.tokens_out = tokens_out;
        self
    }

    /// Set the cost.
    #[must_use]
    pub fn cost_amount(mut self, cost_amount: f64) -> Self {
        self.cost_amount = cost_amount;
        self
    }

    /// Pin the event timestamp (defaults to now at build).
    #[must_use]
    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp_utc = Some(ts);
        self
    }

    /// Consume the builder and produce a [`UsageEvent`].
    ///
    /// Event ids are UUIDv7 so identifier order follows append time.
    #[must_use]
    pub fn build(self) -> UsageEvent {
        UsageEvent {
            event_id: Uuid::now_v7(),
            event_type: self.event_type,
            correlation_id: self.correlation_id,
            caller_id: self.caller_id,
            customer_id: self.customer_id,
            agent_id: self.agent_id,
            purpose: self.purpose,
            model: self.model,
            cache_hit: self.cache_hit,
            tokens_in: self.tokens_in,
            tokens_out: self.tokens_out,
            cost_amount: self.cost_amount,
            timestamp_utc: self.timestamp_utc.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventType::SkillExecution).unwrap(),
            "\"skill_execution\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::BudgetPrecheck).unwrap(),
            "\"budget_precheck\""
        );
    }

    #[test]
    fn budget_sum_covers_execution_and_publish_only() {
        assert!(EventType::SkillExecution.counts_toward_budget());
        assert!(EventType::PublishAction.counts_toward_budget());
        assert!(!EventType::BudgetPrecheck.counts_toward_budget());
        assert!(!EventType::Denial.counts_toward_budget());
    }

    #[test]
    fn builder_roundtrip() {
        let ev = UsageEventBuilder::new(EventType::PublishAction, "c", "cust")
            .caller_id("k")
            .agent_id("a")
            .model("m")
            .cache_hit(true)
            .tokens(10, 20)
            .cost_amount(0.25)
            .build();
        let json = serde_json::to_string(&ev).unwrap();
        let back: UsageEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
    }
}
