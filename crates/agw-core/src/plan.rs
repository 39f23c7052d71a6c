// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plan records: caps, budgets, and the autopublish flag.
//!
//! Plans are loaded at startup and immutable for the lifetime of the
//! process.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Per-customer-segment caps and budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlanRecord {
    /// Plan identifier referenced by invocation requests.
    pub plan_id: String,

    /// ISO currency code for all amounts on this plan.
    pub currency: String,

    /// Monthly spend ceiling. `None` disables budget gating entirely.
    ///
    /// When present and positive, every invocation under this plan must
    /// present a cost estimate or fail closed.
    #[serde(default)]
    pub monthly_budget_amount: Option<f64>,

    /// Maximum skill executions per UTC day while in trial.
    pub trial_daily_tasks_cap: u32,

    /// Maximum tokens (in + out) per UTC day while in trial.
    pub trial_daily_tokens_cap: u64,

    /// Maximum declared cost for a single trial call.
    pub trial_max_cost_per_call: f64,

    /// Whether this plan permits autopublish when the spec enables it.
    #[serde(default)]
    pub allow_autopublish: bool,
}

impl PlanRecord {
    /// Returns `true` if a positive monthly budget applies to this plan.
    #[must_use]
    pub fn has_monthly_budget(&self) -> bool {
        self.monthly_budget_amount.is_some_and(|b| b > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(budget: Option<f64>) -> PlanRecord {
        PlanRecord {
            plan_id: "starter".into(),
            currency: "USD".into(),
            monthly_budget_amount: budget,
            trial_daily_tasks_cap: 10,
            trial_daily_tokens_cap: 50_000,
            trial_max_cost_per_call: 0.10,
            allow_autopublish: false,
        }
    }

    #[test]
    fn budget_applies_only_when_positive() {
        assert!(plan(Some(10.0)).has_monthly_budget());
        assert!(!plan(Some(0.0)).has_monthly_budget());
        assert!(!plan(None).has_monthly_budget());
    }

    #[test]
    fn serde_defaults_for_optional_fields() {
        let json = r#"{
            "plan_id": "p",
            "currency": "USD",
            "trial_daily_tasks_cap": 5,
            "trial_daily_tokens_cap": 1000,
            "trial_max_cost_per_call": 0.05
        }"#;
        let p: PlanRecord = serde_json::from_str(json).unwrap();
        assert_eq!(p.monthly_budget_amount, None);
        assert!(!p.allow_autopublish);
    }
}
