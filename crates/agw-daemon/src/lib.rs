// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! agw-daemon
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Request middleware: correlation ids, header hygiene, CORS.
pub mod middleware;
/// Built-in agent specs and playbooks registered at startup.
pub mod seed;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::{Path as AxPath, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use agw_audit::{AuditFilter, AuditLog, ChainVerification, DecisionDraft, DecisionRecord};
use agw_config::{GatewayConfig, PlanTable};
use agw_core::problem::{DecisionStage, Problem, ReasonCode};
use agw_core::usage::{EventType, UsageEvent, UsageEventBuilder};
use agw_core::window::Bucket;
use agw_core::{DeclaredMetering, IntentAction, InvocationContext};
use agw_gates::{Denial, GateChain};
use agw_ledger::{LedgerFilter, UsageLedger, UsageRow};
use agw_metering::{EnvelopeHeaders, MeteringVerifier};
use agw_playbook::{PlaybookRegistry, SkillOutput};
use agw_spec::{AgentSpec, BundleCache, DimensionRegistry};

pub use middleware::CorrelationId;

/// Shared, read-mostly process state behind every handler.
pub struct AppState {
    /// Immutable runtime configuration.
    pub config: GatewayConfig,
    /// Immutable plan table.
    pub plans: PlanTable,
    /// Registered agent specs, validated at startup.
    pub specs: BTreeMap<String, AgentSpec>,
    /// Dimension descriptor registry.
    pub registry: DimensionRegistry,
    /// Memoised compiled bundles.
    pub bundles: BundleCache,
    /// Registered playbooks.
    pub playbooks: PlaybookRegistry,
    /// The gate chain.
    pub chain: GateChain,
    /// The usage ledger.
    pub ledger: UsageLedger,
    /// The audit log.
    pub audit: AuditLog,
    /// Admission control for execute requests.
    pub admission: Semaphore,
    /// Process start, for health uptime.
    pub started_at: Instant,
}

impl AppState {
    /// Assemble process state from configuration and pre-validated parts.
    ///
    /// # Errors
    ///
    /// Returns an error if a durable store cannot be opened or a registered
    /// spec does not validate.
    pub fn build(
        config: GatewayConfig,
        plans: PlanTable,
        specs: Vec<AgentSpec>,
        playbooks: PlaybookRegistry,
    ) -> anyhow::Result<Self> {
        let registry = DimensionRegistry::platform();

        let mut spec_map = BTreeMap::new();
        for spec in specs {
            let violations = agw_spec::validate(&spec, &registry);
            if !violations.is_empty() {
                anyhow::bail!("spec '{}' does not validate: {:?}", spec.id, violations);
            }
            spec_map.insert(spec.id.clone(), spec);
        }

        let ledger = match &config.usage_ledger_path {
            Some(path) => UsageLedger::durable(path)?,
            None => UsageLedger::in_memory(),
        };
        let audit = match &config.audit_log_path {
            Some(path) => AuditLog::durable(path)?,
            None => AuditLog::in_memory(),
        };

        let verifier = MeteringVerifier::new(
            config.metering_secret.as_ref().map(|s| s.as_bytes().to_vec()),
            config.metering_ttl_seconds,
        );

        Ok(Self {
            admission: Semaphore::new(config.admission_limit),
            chain: GateChain::new(verifier),
            bundles: BundleCache::new(64),
            registry,
            specs: spec_map,
            plans,
            playbooks,
            ledger,
            audit,
            config,
            started_at: Instant::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of an execute request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Customer the invocation is accounted against.
    pub customer_id: String,
    /// Plan governing the customer's caps and budgets.
    pub plan_id: String,
    /// Declared intent action.
    #[serde(default)]
    pub intent_action: Option<IntentAction>,
    /// Whether the output should be published after execution.
    #[serde(default)]
    pub do_publish: bool,
    /// Whether to publish without a per-request approval id.
    #[serde(default)]
    pub autopublish: bool,
    /// Whether the customer is in trial mode.
    #[serde(default)]
    pub trial_mode: bool,
    /// Approval ticket for side-effecting actions.
    #[serde(default)]
    pub approval_id: Option<String>,
    /// Free-form purpose recorded with usage events.
    #[serde(default)]
    pub purpose: Option<String>,
    /// Caller-declared metering.
    #[serde(default)]
    pub metering: DeclaredMetering,
    /// Playbook inputs.
    #[serde(default)]
    pub inputs: serde_json::Value,
}

/// Body of a successful execute response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Correlation identifier, also echoed in the response headers.
    pub correlation_id: String,
    /// Always `"ok"` on this path.
    pub status: String,
    /// The unpublished draft, when the request did not publish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<SkillOutput>,
    /// The published output, when the request published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<SkillOutput>,
    /// Whether a publish action was recorded.
    pub published: bool,
}

/// Response of the preflight validation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    /// `true` when the spec compiles cleanly.
    pub valid: bool,
    /// Violations found, empty when valid.
    pub violations: Vec<agw_spec::Violation>,
}

/// Problem response wrapper carrying the HTTP status to emit.
#[derive(Debug)]
pub struct ApiProblem {
    /// HTTP status code.
    pub status: StatusCode,
    /// Structured problem body.
    pub problem: Problem,
}

impl ApiProblem {
    /// Build from a reason code using its canonical status mapping.
    #[must_use]
    pub fn from_reason(
        reason_code: ReasonCode,
        title: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            status: StatusCode::from_u16(reason_code.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            problem: Problem::new(reason_code, title, correlation_id),
        }
    }

    /// Override the HTTP status (request-hygiene problems outside the
    /// canonical mapping).
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.problem = self.problem.with_details(details);
        self
    }

    fn internal(correlation_id: &str, title: impl Into<String>) -> Self {
        Self::from_reason(ReasonCode::Internal, title, correlation_id)
    }
}

impl IntoResponse for ApiProblem {
    fn into_response(self) -> Response {
        (self.status, Json(self.problem)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum router with every gateway route and middleware layer.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/agents", get(cmd_list_agents))
        .route("/agents/{agent_id}/skills/{skill_id}", post(cmd_execute))
        .route("/specs/schema", get(cmd_schema))
        .route("/specs/validate", post(cmd_validate))
        .route("/admin/usage", get(cmd_admin_usage))
        .route("/admin/usage/aggregate", get(cmd_admin_aggregate))
        .route("/admin/decisions", get(cmd_admin_decisions))
        .layer(axum::middleware::from_fn(middleware::metering_header_hygiene))
        .layer(axum::middleware::from_fn(middleware::correlation))
        .layer(middleware::admin_cors())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn cmd_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "api_version": agw_core::API_VERSION,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "specs": state.specs.len(),
    }))
}

async fn cmd_list_agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let specs: Vec<&AgentSpec> = state.specs.values().collect();
    Json(serde_json::json!({
        "agents": specs,
        "dimensions": state.registry.listing(),
    }))
}

async fn cmd_schema() -> impl IntoResponse {
    Json(agw_spec::schema())
}

async fn cmd_validate(Json(body): Json<serde_json::Value>) -> impl IntoResponse {
    let violations = match agw_spec::parse(body) {
        Ok(spec) => agw_spec::validate(&spec, &DimensionRegistry::platform()),
        Err(violations) => violations,
    };
    let status = if violations.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (
        status,
        Json(ValidateResponse {
            valid: violations.is_empty(),
            violations,
        }),
    )
}

/// Query parameters shared by the admin usage endpoints.
#[derive(Debug, Default, Deserialize)]
struct UsageQuery {
    customer_id: Option<String>,
    agent_id: Option<String>,
    correlation_id: Option<String>,
    event_type: Option<EventType>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
    bucket: Option<Bucket>,
}

impl UsageQuery {
    fn filter(&self) -> LedgerFilter {
        LedgerFilter {
            customer_id: self.customer_id.clone(),
            agent_id: self.agent_id.clone(),
            correlation_id: self.correlation_id.clone(),
            event_type: self.event_type,
            since: self.since,
            until: self.until,
        }
    }
}

async fn cmd_admin_usage(
    Query(q): Query<UsageQuery>,
    State(state): State<Arc<AppState>>,
) -> Json<Vec<UsageEvent>> {
    Json(state.ledger.query(&q.filter(), q.limit.unwrap_or(100)))
}

async fn cmd_admin_aggregate(
    Query(q): Query<UsageQuery>,
    State(state): State<Arc<AppState>>,
) -> Json<Vec<UsageRow>> {
    let bucket = q.bucket.unwrap_or(Bucket::Day);
    Json(state.ledger.aggregate(&q.filter(), bucket))
}

/// Query parameters for the decision listing.
#[derive(Debug, Default, Deserialize)]
struct DecisionQuery {
    correlation_id: Option<String>,
    caller_id: Option<String>,
    agent_id: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

async fn cmd_admin_decisions(
    Query(q): Query<DecisionQuery>,
    State(state): State<Arc<AppState>>,
) -> Json<Vec<DecisionRecord>> {
    let filter = AuditFilter {
        correlation_id: q.correlation_id,
        caller_id: q.caller_id,
        agent_id: q.agent_id,
        since: q.since,
        until: q.until,
    };
    Json(state.audit.list(&filter, q.limit.unwrap_or(100)))
}

async fn cmd_execute(
    State(state): State<Arc<AppState>>,
    AxPath((agent_id, skill_id)): AxPath<(String, String)>,
    axum::Extension(CorrelationId(correlation_id)): axum::Extension<CorrelationId>,
    headers: HeaderMap,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiProblem> {
    // Backpressure: shed before any gate runs.
    let Ok(_permit) = state.admission.try_acquire() else {
        return Err(ApiProblem::internal(&correlation_id, "gateway overloaded")
            .with_status(StatusCode::SERVICE_UNAVAILABLE)
            .with_details(serde_json::json!({"transient": true})));
    };

    // The upstream identity proxy must have stamped the caller.
    let Some(caller_id) = header_str(&headers, "x-caller-id") else {
        return Err(
            ApiProblem::internal(&correlation_id, "caller identity missing")
                .with_status(StatusCode::UNAUTHORIZED),
        );
    };

    let request_path = format!("/agents/{agent_id}/skills/{skill_id}");

    // Resolve the reference agent.
    let Some(spec) = state.specs.get(&agent_id) else {
        let problem = ApiProblem::from_reason(
            ReasonCode::UnknownReferenceAgent,
            format!("agent '{agent_id}' is not registered"),
            &correlation_id,
        );
        record_precheck_rejection(&state, &correlation_id, &caller_id, &req, &agent_id, &request_path);
        return Err(problem);
    };

    let bundle = state
        .bundles
        .get_or_compile(spec, &state.registry)
        .map_err(|violations| {
            error!(agent_id = %agent_id, ?violations, "registered spec failed to compile");
            ApiProblem::internal(&correlation_id, "registered spec failed to compile")
        })?;

    // The path's skill must be the one the spec activates.
    let playbook_name = match bundle.skill() {
        Some(skill) if skill.name == skill_id => skill.playbook.clone(),
        _ => {
            let problem = ApiProblem::from_reason(
                ReasonCode::UnknownReferenceAgent,
                format!("agent '{agent_id}' has no skill '{skill_id}'"),
                &correlation_id,
            );
            record_precheck_rejection(&state, &correlation_id, &caller_id, &req, &agent_id, &request_path);
            return Err(problem);
        }
    };

    let Some(plan) = state.plans.get(&req.plan_id) else {
        return Err(ApiProblem::internal(&correlation_id, format!("unknown plan '{}'", req.plan_id))
            .with_status(StatusCode::UNPROCESSABLE_ENTITY));
    };

    // Impute a cost when the caller declared tokens but no cost.
    let mut declared = req.metering.clone();
    if declared.cost_amount.is_none() && (declared.tokens_in + declared.tokens_out) > 0 {
        declared.cost_amount =
            state
                .config
                .impute_cost(declared.model.as_deref(), declared.tokens_in, declared.tokens_out);
    }

    let mut ctx = InvocationContext {
        correlation_id: correlation_id.clone(),
        caller_id,
        customer_id: req.customer_id.clone(),
        plan_id: req.plan_id.clone(),
        agent_id: agent_id.clone(),
        skill_id: skill_id.clone(),
        intent_action: req.intent_action,
        do_publish: req.do_publish,
        autopublish: req.autopublish,
        trial_mode: req.trial_mode,
        approval_id: req.approval_id.clone(),
        purpose: req.purpose.clone(),
        declared,
        attested: None,
        annotations: Vec::new(),
        received_at: Utc::now(),
    };

    let envelope = EnvelopeHeaders::from_lookup(|name| header_str(&headers, name));

    // Phase A: gate evaluation under the request deadline.
    let deadline = Duration::from_secs(state.config.deadline_secs);
    let gated = tokio::time::timeout(deadline, async {
        state
            .chain
            .evaluate(&mut ctx, &bundle, plan, &state.ledger, &envelope, Utc::now())
    })
    .await;

    let allowed = match gated {
        Err(_) => {
            // Best-effort audit record; the deadline problem wins either way.
            let draft = DecisionDraft {
                correlation_id: correlation_id.clone(),
                caller_id: ctx.caller_id.clone(),
                customer_id: ctx.customer_id.clone(),
                agent_id: agent_id.clone(),
                stage: DecisionStage::Other,
                action: ctx.intent_action.map(|a| a.to_string()),
                reason_code: ReasonCode::Deadline,
                details: serde_json::json!({"deadline_secs": state.config.deadline_secs}),
                path: request_path.clone(),
            };
            if let Err(e) = state.audit.append(draft) {
                warn!(error = %e, "could not record deadline decision");
            }
            return Err(ApiProblem::from_reason(
                ReasonCode::Deadline,
                "request deadline expired before gating completed",
                &correlation_id,
            ));
        }
        Ok(result) => result,
    };

    if let Err(denial) = allowed {
        return Err(record_denial(&state, &ctx, denial, &request_path));
    }

    // Phase B: effects. Appends are not cancellable; once the skill has
    // executed its event is recorded even if the deadline has passed.
    let effective = ctx.effective_metering();

    if plan.has_monthly_budget() {
        let mut precheck = UsageEventBuilder::new(
            EventType::BudgetPrecheck,
            &correlation_id,
            &ctx.customer_id,
        )
        .caller_id(&ctx.caller_id)
        .agent_id(&agent_id)
        .purpose("budget_gate")
        .cache_hit(effective.cache_hit)
        .tokens(effective.tokens_in, effective.tokens_out)
        .cost_amount(effective.cost_amount.unwrap_or(0.0))
        .build();
        precheck.model = effective.model.clone();
        if state.ledger.append(precheck).is_err() {
            return Err(ApiProblem::internal(&correlation_id, "usage ledger unavailable"));
        }
    }

    let output = state
        .playbooks
        .execute(&playbook_name, &req.inputs)
        .map_err(|e| match e {
            agw_playbook::PlaybookError::InvalidInputs(errors) => {
                ApiProblem::internal(&correlation_id, "playbook inputs rejected")
                    .with_status(StatusCode::UNPROCESSABLE_ENTITY)
                    .with_details(serde_json::json!({"errors": errors}))
            }
            other => {
                error!(error = %other, playbook = %playbook_name, "playbook execution failed");
                ApiProblem::internal(&correlation_id, "playbook execution failed")
            }
        })?;

    let mut execution = UsageEventBuilder::new(
        EventType::SkillExecution,
        &correlation_id,
        &ctx.customer_id,
    )
    .caller_id(&ctx.caller_id)
    .agent_id(&agent_id)
    .cache_hit(effective.cache_hit)
    .tokens(effective.tokens_in, effective.tokens_out)
    .cost_amount(effective.cost_amount.unwrap_or(0.0))
    .build();
    execution.model = effective.model.clone();
    execution.purpose = ctx.purpose.clone();
    if state.ledger.append(execution).is_err() {
        return Err(ApiProblem::internal(&correlation_id, "usage ledger unavailable"));
    }

    let published = if ctx.do_publish {
        let mut publish = UsageEventBuilder::new(
            EventType::PublishAction,
            &correlation_id,
            &ctx.customer_id,
        )
        .caller_id(&ctx.caller_id)
        .agent_id(&agent_id)
        .cost_amount(0.0)
        .build();
        publish.model = effective.model.clone();
        publish.purpose = ctx.purpose.clone();
        if state.ledger.append(publish).is_err() {
            return Err(ApiProblem::internal(&correlation_id, "usage ledger unavailable"));
        }
        true
    } else {
        false
    };

    info!(
        correlation_id = %correlation_id,
        agent_id = %agent_id,
        skill_id = %skill_id,
        published,
        "skill executed"
    );

    Ok(Json(ExecuteResponse {
        correlation_id,
        status: "ok".into(),
        draft: (!published).then(|| output.clone()),
        output: published.then_some(output),
        published,
    }))
}

// ---------------------------------------------------------------------------
// Enforcement plumbing
// ---------------------------------------------------------------------------

/// Append the audit record for a denial and build the problem response.
///
/// Audit append is transactional with gate termination: if it fails, the
/// request fails closed as infrastructure.
fn record_denial(
    state: &AppState,
    ctx: &InvocationContext,
    denial: Denial,
    request_path: &str,
) -> ApiProblem {
    let draft = DecisionDraft {
        correlation_id: ctx.correlation_id.clone(),
        caller_id: ctx.caller_id.clone(),
        customer_id: ctx.customer_id.clone(),
        agent_id: ctx.agent_id.clone(),
        stage: denial.stage,
        action: ctx.intent_action.map(|a| a.to_string()),
        reason_code: denial.reason_code,
        details: denial.details.clone(),
        path: request_path.to_string(),
    };

    let record = match state.audit.append(draft) {
        Ok(record) => record,
        Err(e) => {
            error!(error = %e, correlation_id = %ctx.correlation_id, "audit append failed; failing closed");
            return ApiProblem::internal(&ctx.correlation_id, "decision could not be recorded");
        }
    };

    // Usage denials are mirrored into the ledger for operator dashboards.
    if matches!(
        denial.stage,
        DecisionStage::Trial | DecisionStage::Budget | DecisionStage::Metering
    ) {
        let mut mirror = UsageEventBuilder::new(
            EventType::Denial,
            &ctx.correlation_id,
            &ctx.customer_id,
        )
        .caller_id(&ctx.caller_id)
        .agent_id(&ctx.agent_id)
        .cost_amount(0.0)
        .build();
        mirror.purpose = Some(denial.reason_code.to_string());
        if let Err(e) = state.ledger.append(mirror) {
            warn!(error = %e, "denial mirror event not recorded");
        }
    }

    info!(
        decision_id = %record.decision_id,
        correlation_id = %ctx.correlation_id,
        reason_code = %denial.reason_code,
        stage = %denial.stage,
        "request denied"
    );

    ApiProblem::from_reason(
        denial.reason_code,
        format!("denied: {}", denial.reason_code),
        &ctx.correlation_id,
    )
    .with_details(denial.details)
}

/// Audit a pre-gate rejection (unknown agent or skill reference).
fn record_precheck_rejection(
    state: &AppState,
    correlation_id: &str,
    caller_id: &str,
    req: &ExecuteRequest,
    agent_id: &str,
    request_path: &str,
) {
    let draft = DecisionDraft {
        correlation_id: correlation_id.to_string(),
        caller_id: caller_id.to_string(),
        customer_id: req.customer_id.clone(),
        agent_id: agent_id.to_string(),
        stage: DecisionStage::Other,
        action: req.intent_action.map(|a| a.to_string()),
        reason_code: ReasonCode::UnknownReferenceAgent,
        details: serde_json::Value::Null,
        path: request_path.to_string(),
    };
    if let Err(e) = state.audit.append(draft) {
        warn!(error = %e, "could not record reference rejection");
    }
}

/// Run the audit verifier forever on the configured period.
///
/// Failures raise an operator alert and never block traffic.
pub async fn audit_verifier_task(state: Arc<AppState>) {
    let period = Duration::from_secs(state.config.audit_verify_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let outcome: ChainVerification = agw_audit::verification_pass(&state.audit);
        if !outcome.ok {
            error!(
                first_bad_index = ?outcome.first_bad_index,
                "OPERATOR ALERT: audit chain damaged"
            );
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Generate a fresh correlation id.
#[must_use]
pub fn new_correlation_id() -> String {
    Uuid::new_v4().to_string()
}
