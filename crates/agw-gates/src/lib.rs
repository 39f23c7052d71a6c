// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! agw-gates
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use tracing::debug;

use agw_core::money::{from_micros, to_micros};
use agw_core::plan::PlanRecord;
use agw_core::problem::{DecisionStage, ReasonCode};
use agw_core::window::next_month_start;
use agw_core::InvocationContext;
use agw_ledger::UsageLedger;
use agw_metering::{EnvelopeHeaders, MeteringVerifier};
use agw_spec::CompiledBundle;

/// A gate's objection: stage, reason, and structured details.
#[derive(Debug, Clone, PartialEq)]
pub struct Denial {
    /// Stage the chain stopped at.
    pub stage: DecisionStage,
    /// Why the request was denied.
    pub reason_code: ReasonCode,
    /// Structured details carried into the audit record and the problem
    /// response.
    pub details: serde_json::Value,
}

impl Denial {
    fn new(reason_code: ReasonCode, details: serde_json::Value) -> Self {
        Self {
            stage: reason_code.stage(),
            reason_code,
            details,
        }
    }
}

/// The ordered gate chain. Composition is fixed at construction; no gates
/// are loaded at request time.
#[derive(Debug, Clone)]
pub struct GateChain {
    verifier: MeteringVerifier,
}

impl GateChain {
    /// Build the chain around the process-wide metering verifier.
    #[must_use]
    pub fn new(verifier: MeteringVerifier) -> Self {
        Self { verifier }
    }

    /// Run every gate in order against `ctx`.
    ///
    /// On allow the context carries the accumulated annotations (and the
    /// attested metering, when an envelope validated). On deny the chain
    /// short-circuits; the caller must append exactly one audit record
    /// before responding.
    ///
    /// # Errors
    ///
    /// Returns the first gate's [`Denial`].
    pub fn evaluate(
        &self,
        ctx: &mut InvocationContext,
        bundle: &CompiledBundle,
        plan: &PlanRecord,
        ledger: &UsageLedger,
        envelope: &EnvelopeHeaders,
        now: DateTime<Utc>,
    ) -> Result<(), Denial> {
        intent_gate(ctx)?;
        approval_gate(ctx, bundle, plan)?;
        trial_restriction_gate(ctx, plan)?;
        trial_daily_cap_gate(ctx, plan, ledger, now)?;
        self.metering_gate(ctx, plan, envelope, now)?;
        budget_gate(ctx, plan, ledger, now)?;

        debug!(
            correlation_id = %ctx.correlation_id,
            annotations = ctx.annotations.len(),
            "gate chain allowed"
        );
        Ok(())
    }

    /// Gate 5: trusted metering requirement for budgeted plans.
    fn metering_gate(
        &self,
        ctx: &mut InvocationContext,
        plan: &PlanRecord,
        envelope: &EnvelopeHeaders,
        now: DateTime<Utc>,
    ) -> Result<(), Denial> {
        if !plan.has_monthly_budget() {
            return Ok(());
        }

        if self.verifier.enforcing() {
            match self.verifier.verify(&ctx.correlation_id, envelope, now) {
                Ok(Some(attested)) => {
                    ctx.annotate(format!(
                        "metering: envelope attested {} tokens at {}",
                        attested.tokens_in + attested.tokens_out,
                        agw_core::money::format_6dp(attested.cost_amount)
                    ));
                    ctx.attested = Some(attested);
                    Ok(())
                }
                // Enforcing mode never returns Ok(None).
                Ok(None) => Ok(()),
                Err(e) => Err(Denial::new(
                    e.reason_code(),
                    serde_json::json!({"error": e.to_string()}),
                )),
            }
        } else {
            // No secret configured: declared metering is accepted, but a
            // budgeted plan cannot meter a zero-cost call.
            let declared = ctx.declared.cost_amount.unwrap_or(0.0);
            if to_micros(declared) <= 0 {
                return Err(Denial::new(
                    ReasonCode::MeteringRequiredForBudget,
                    serde_json::json!({
                        "plan_id": plan.plan_id,
                        "declared_cost": declared,
                    }),
                ));
            }
            ctx.annotate("metering: caller-declared (no envelope secret configured)");
            Ok(())
        }
    }
}

/// Gate 1: a side-effecting request must name its intent action.
fn intent_gate(ctx: &mut InvocationContext) -> Result<(), Denial> {
    if ctx.do_publish && ctx.intent_action.is_none() {
        return Err(Denial::new(
            ReasonCode::IntentActionRequired,
            serde_json::json!({"hint": "side-effecting requests must declare intent_action"}),
        ));
    }
    Ok(())
}

/// Gate 2: side effects need an approval id or a doubly-enabled autopublish.
fn approval_gate(
    ctx: &mut InvocationContext,
    bundle: &CompiledBundle,
    plan: &PlanRecord,
) -> Result<(), Denial> {
    if !ctx.is_side_effecting() {
        return Ok(());
    }

    if let Some(approval_id) = &ctx.approval_id {
        let note = format!("approval: {approval_id}");
        ctx.annotate(note);
        return Ok(());
    }

    // Autopublish stands in for a per-request approval only when the spec
    // dimension and the plan flag both agree.
    if bundle.autopublish_enabled() && plan.allow_autopublish {
        ctx.annotate("approval: autopublish (spec and plan)");
        return Ok(());
    }

    if ctx.autopublish {
        return Err(Denial::new(
            ReasonCode::AutopublishNotAllowed,
            serde_json::json!({
                "spec_enabled": bundle.autopublish_enabled(),
                "plan_enabled": plan.allow_autopublish,
            }),
        ));
    }

    Err(Denial::new(
        ReasonCode::ApprovalRequired,
        serde_json::json!({"hint": "supply approval_id or enable autopublish"}),
    ))
}

/// Gate 3: trial customers cannot write to production or run expensive calls.
fn trial_restriction_gate(ctx: &mut InvocationContext, plan: &PlanRecord) -> Result<(), Denial> {
    if !ctx.trial_mode {
        return Ok(());
    }

    if ctx.is_side_effecting() {
        return Err(Denial::new(
            ReasonCode::TrialProductionWriteBlocked,
            serde_json::json!({"intent_action": ctx.intent_action.map(|a| a.to_string())}),
        ));
    }

    let declared = ctx.declared.cost_amount.unwrap_or(0.0);
    if to_micros(declared) > to_micros(plan.trial_max_cost_per_call) {
        return Err(Denial::new(
            ReasonCode::TrialHighCostCall,
            serde_json::json!({
                "declared_cost": declared,
                "trial_max_cost_per_call": plan.trial_max_cost_per_call,
            }),
        ));
    }

    Ok(())
}

/// Gate 4: trial daily task and token caps over the UTC calendar day.
fn trial_daily_cap_gate(
    ctx: &mut InvocationContext,
    plan: &PlanRecord,
    ledger: &UsageLedger,
    now: DateTime<Utc>,
) -> Result<(), Denial> {
    if !ctx.trial_mode {
        return Ok(());
    }

    let usage = ledger.trial_day_usage(&ctx.caller_id, now);

    if usage.executions >= u64::from(plan.trial_daily_tasks_cap) {
        return Err(Denial::new(
            ReasonCode::TrialDailyCap,
            serde_json::json!({
                "executions_today": usage.executions,
                "trial_daily_tasks_cap": plan.trial_daily_tasks_cap,
            }),
        ));
    }

    let requested = ctx.declared.tokens_in + ctx.declared.tokens_out;
    if usage.tokens + requested > plan.trial_daily_tokens_cap {
        return Err(Denial::new(
            ReasonCode::TrialDailyTokenCap,
            serde_json::json!({
                "tokens_today": usage.tokens,
                "tokens_requested": requested,
                "trial_daily_tokens_cap": plan.trial_daily_tokens_cap,
            }),
        ));
    }

    ctx.annotate(format!(
        "trial: {}/{} tasks today",
        usage.executions + 1,
        plan.trial_daily_tasks_cap
    ));
    Ok(())
}

/// Gate 6: monthly plan budget over the UTC calendar month.
fn budget_gate(
    ctx: &mut InvocationContext,
    plan: &PlanRecord,
    ledger: &UsageLedger,
    now: DateTime<Utc>,
) -> Result<(), Denial> {
    let Some(budget) = plan.monthly_budget_amount.filter(|b| *b > 0.0) else {
        return Ok(());
    };

    let effective_cost = ctx.effective_metering().cost_amount.unwrap_or(0.0);
    let spent = ledger.month_cost_micros(&ctx.customer_id, now);
    let budget_micros = to_micros(budget);

    if spent + to_micros(effective_cost) > budget_micros {
        return Err(Denial::new(
            ReasonCode::MonthlyBudgetExceeded,
            serde_json::json!({
                "monthly_budget_amount": budget,
                "spent": from_micros(spent),
                "effective_cost": effective_cost,
                "window_resets_at": next_month_start(now).to_rfc3339(),
            }),
        ));
    }

    ctx.annotate(format!(
        "budget: {} of {} {} consumed",
        from_micros(spent),
        budget,
        plan.currency
    ));
    Ok(())
}
