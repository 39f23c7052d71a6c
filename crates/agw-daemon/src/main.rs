// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::sync::Arc;

use agw_config::{GatewayConfig, PlanTable};
use agw_daemon::{AppState, audit_verifier_task, build_app, seed};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agw-daemon", version, about = "Agent Gateway daemon")]
struct Args {
    /// Bind address (overrides AGW_BIND).
    #[arg(long)]
    bind: Option<String>,

    /// Enable request/decision debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("agw=debug,agw_daemon=debug")
    } else {
        EnvFilter::new("agw=info,agw_daemon=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = GatewayConfig::from_env().context("load configuration")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    match agw_config::validate_config(&config) {
        Ok(warnings) => {
            for warning in warnings {
                warn!(%warning, "configuration advisory");
            }
        }
        Err(e) => return Err(e).context("validate configuration"),
    }

    let plans = PlanTable::load(config.plans_path.as_deref()).context("load plan table")?;

    let specs = match &config.specs_dir {
        Some(dir) => seed::load_specs_dir(dir)?,
        None => seed::builtin_specs(),
    };

    let state = Arc::new(
        AppState::build(config, plans, specs, seed::builtin_playbooks())
            .context("assemble gateway state")?,
    );

    // The audit verifier runs out-of-band for the life of the process.
    tokio::spawn(audit_verifier_task(Arc::clone(&state)));

    let app = build_app(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&state.config.bind)
        .await
        .with_context(|| format!("bind {}", state.config.bind))?;
    info!(
        bind = %state.config.bind,
        specs = state.specs.len(),
        metering_enforced = state.config.metering_secret.is_some(),
        "agw-daemon listening"
    );

    axum::serve(listener, app).await.context("serve")
}
