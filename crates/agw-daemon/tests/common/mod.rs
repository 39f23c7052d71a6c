// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared fixtures for the daemon integration tests.

use std::sync::Arc;

use agw_config::{GatewayConfig, PlanTable};
use agw_daemon::{AppState, build_app, seed};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Secret shared between the test "metering component" and the gateway.
pub const SECRET: &str = "integration-test-secret";

/// URL-encoded execute path for the built-in marketing spec.
pub const MARKETING_PATH: &str = "/agents/marketing%2Fv1/skills/weekly-post";

pub fn plans() -> PlanTable {
    PlanTable::from_toml_str(
        r#"
        [plans.free]
        currency = "USD"
        trial_daily_tasks_cap = 3
        trial_daily_tokens_cap = 1000
        trial_max_cost_per_call = 0.10

        [plans.budget10]
        currency = "USD"
        monthly_budget_amount = 10.0
        trial_daily_tasks_cap = 3
        trial_daily_tokens_cap = 1000
        trial_max_cost_per_call = 0.10
    "#,
    )
    .expect("test plan table parses")
}

pub fn state(metering_secret: Option<&str>) -> Arc<AppState> {
    let config = GatewayConfig {
        metering_secret: metering_secret.map(str::to_string),
        ..GatewayConfig::default()
    };
    Arc::new(
        AppState::build(
            config,
            plans(),
            seed::builtin_specs(),
            seed::builtin_playbooks(),
        )
        .expect("test state builds"),
    )
}

pub fn app(metering_secret: Option<&str>) -> (Arc<AppState>, Router) {
    let s = state(metering_secret);
    let router = build_app(Arc::clone(&s));
    (s, router)
}

/// POST an execute request with standard test headers.
pub async fn execute(
    router: Router,
    correlation_id: &str,
    body: serde_json::Value,
    extra_headers: &[(&str, String)],
) -> Response<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(MARKETING_PATH)
        .header("content-type", "application/json")
        .header("x-caller-id", "caller-1")
        .header("x-correlation-id", correlation_id);
    for (name, value) in extra_headers {
        builder = builder.header(*name, value.as_str());
    }
    let request = builder
        .body(Body::from(body.to_string()))
        .expect("request builds");
    router.oneshot(request).await.expect("request completes")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is json")
}
