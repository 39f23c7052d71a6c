// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! agw-config
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use agw_core::plan::PlanRecord;

// ---------------------------------------------------------------------------
// Errors and warnings
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// A value could not be parsed.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional setting is missing.
    MissingOptionalSetting {
        /// Environment variable name.
        name: String,
        /// Why it matters.
        hint: String,
    },
    /// The metering TTL is unusually generous.
    LargeMeteringTtl {
        /// Configured TTL in seconds.
        secs: i64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalSetting { name, hint } => {
                write!(f, "missing optional setting '{name}': {hint}")
            }
            ConfigWarning::LargeMeteringTtl { secs } => {
                write!(f, "metering TTL of {secs}s is unusually large")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway configuration
// ---------------------------------------------------------------------------

/// Default metering envelope freshness window.
const DEFAULT_METERING_TTL_SECS: i64 = 300;

/// TTL above which a warning is produced.
const LARGE_TTL_THRESHOLD_SECS: i64 = 3_600;

/// Default wall-clock deadline for execute requests.
const DEFAULT_DEADLINE_SECS: u64 = 10;

/// Default admission limit (in-flight execute requests before shedding).
const DEFAULT_ADMISSION_LIMIT: usize = 64;

/// Default period of the out-of-band audit verifier.
const DEFAULT_AUDIT_VERIFY_INTERVAL_SECS: u64 = 300;

/// Process-wide runtime settings, immutable after startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address for the HTTP ingress.
    pub bind: String,
    /// Trusted-metering secret; presence enables envelope enforcement for
    /// budgeted plans.
    pub metering_secret: Option<String>,
    /// Envelope freshness window in seconds.
    pub metering_ttl_seconds: i64,
    /// Durable usage ledger path; in-memory when unset.
    pub usage_ledger_path: Option<PathBuf>,
    /// Durable audit log path; in-memory when unset.
    pub audit_log_path: Option<PathBuf>,
    /// Token → cost table used to impute `cost_amount` when the caller
    /// declares tokens but no cost.
    pub model_pricing: BTreeMap<String, ModelPrice>,
    /// Wall-clock deadline for execute requests, in seconds.
    pub deadline_secs: u64,
    /// In-flight execute requests admitted before shedding.
    pub admission_limit: usize,
    /// Optional TOML plan table path; built-in defaults otherwise.
    pub plans_path: Option<PathBuf>,
    /// Optional directory of agent spec JSON files loaded at startup.
    pub specs_dir: Option<PathBuf>,
    /// Period of the out-of-band audit verifier, in seconds.
    pub audit_verify_interval_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            metering_secret: None,
            metering_ttl_seconds: DEFAULT_METERING_TTL_SECS,
            usage_ledger_path: None,
            audit_log_path: None,
            model_pricing: BTreeMap::new(),
            deadline_secs: DEFAULT_DEADLINE_SECS,
            admission_limit: DEFAULT_ADMISSION_LIMIT,
            plans_path: None,
            specs_dir: None,
            audit_verify_interval_secs: DEFAULT_AUDIT_VERIFY_INTERVAL_SECS,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] when a variable is present but
    /// unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from any name → value lookup.
    ///
    /// Recognised variables: `AGW_BIND`, `METERING_ENVELOPE_SECRET`,
    /// `METERING_ENVELOPE_TTL_SECONDS`, `USAGE_LEDGER_STORE_PATH` (with
    /// `USAGE_EVENTS_STORE_PATH` as a legacy alias), `AUDIT_LOG_STORE_PATH`,
    /// `MODEL_PRICING_JSON`, `AGW_DEADLINE_SECS`, `AGW_ADMISSION_LIMIT`,
    /// `AGW_PLANS_PATH`, `AGW_SPECS_DIR`, `AGW_AUDIT_VERIFY_INTERVAL_SECS`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] when a value is unparseable.
    pub fn from_lookup(
        mut get: impl FnMut(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = get("AGW_BIND") {
            config.bind = bind;
        }
        config.metering_secret = get("METERING_ENVELOPE_SECRET").filter(|s| !s.is_empty());
        if let Some(raw) = get("METERING_ENVELOPE_TTL_SECONDS") {
            config.metering_ttl_seconds = parse(&raw, "METERING_ENVELOPE_TTL_SECONDS")?;
        }
        config.usage_ledger_path = get("USAGE_LEDGER_STORE_PATH")
            .or_else(|| get("USAGE_EVENTS_STORE_PATH"))
            .map(PathBuf::from);
        config.audit_log_path = get("AUDIT_LOG_STORE_PATH").map(PathBuf::from);
        if let Some(raw) = get("MODEL_PRICING_JSON") {
            config.model_pricing = serde_json::from_str(&raw).map_err(|e| {
                ConfigError::ParseError {
                    reason: format!("MODEL_PRICING_JSON: {e}"),
                }
            })?;
        }
        if let Some(raw) = get("AGW_DEADLINE_SECS") {
            config.deadline_secs = parse(&raw, "AGW_DEADLINE_SECS")?;
        }
        if let Some(raw) = get("AGW_ADMISSION_LIMIT") {
            config.admission_limit = parse(&raw, "AGW_ADMISSION_LIMIT")?;
        }
        config.plans_path = get("AGW_PLANS_PATH").map(PathBuf::from);
        config.specs_dir = get("AGW_SPECS_DIR").map(PathBuf::from);
        if let Some(raw) = get("AGW_AUDIT_VERIFY_INTERVAL_SECS") {
            config.audit_verify_interval_secs = parse(&raw, "AGW_AUDIT_VERIFY_INTERVAL_SECS")?;
        }

        Ok(config)
    }

    /// Impute a cost from the pricing table when the caller declared tokens
    /// but no cost. Returns `None` when the model is unknown or unpriced.
    #[must_use]
    pub fn impute_cost(&self, model: Option<&str>, tokens_in: u64, tokens_out: u64) -> Option<f64> {
        let price = self.model_pricing.get(model?)?;
        Some(
            (tokens_in as f64 / 1000.0) * price.input_per_1k
                + (tokens_out as f64 / 1000.0) * price.output_per_1k,
        )
    }
}

fn parse<T: std::str::FromStr>(raw: &str, name: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::ParseError {
        reason: format!("{name}: unparseable value '{raw}'"),
    })
}

/// Per-1k-token pricing for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    /// Cost per 1000 input tokens.
    pub input_per_1k: f64,
    /// Cost per 1000 output tokens.
    pub output_per_1k: f64,
}

/// Validate a loaded configuration, returning advisory warnings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] for hard problems (non-positive
/// TTL or deadline, zero admission limit, negative pricing).
pub fn validate_config(config: &GatewayConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.metering_ttl_seconds <= 0 {
        errors.push(format!(
            "METERING_ENVELOPE_TTL_SECONDS must be positive, got {}",
            config.metering_ttl_seconds
        ));
    } else if config.metering_ttl_seconds > LARGE_TTL_THRESHOLD_SECS {
        warnings.push(ConfigWarning::LargeMeteringTtl {
            secs: config.metering_ttl_seconds,
        });
    }

    if config.deadline_secs == 0 {
        errors.push("AGW_DEADLINE_SECS must be positive".into());
    }
    if config.admission_limit == 0 {
        errors.push("AGW_ADMISSION_LIMIT must be positive".into());
    }
    for (model, price) in &config.model_pricing {
        if price.input_per_1k < 0.0 || price.output_per_1k < 0.0 {
            errors.push(format!("MODEL_PRICING_JSON: negative price for '{model}'"));
        }
    }

    if config.metering_secret.is_none() {
        warnings.push(ConfigWarning::MissingOptionalSetting {
            name: "METERING_ENVELOPE_SECRET".into(),
            hint: "budgeted plans will accept caller-declared metering".into(),
        });
    }
    if config.usage_ledger_path.is_none() {
        warnings.push(ConfigWarning::MissingOptionalSetting {
            name: "USAGE_LEDGER_STORE_PATH".into(),
            hint: "usage events will not survive restarts".into(),
        });
    }
    if config.audit_log_path.is_none() {
        warnings.push(ConfigWarning::MissingOptionalSetting {
            name: "AUDIT_LOG_STORE_PATH".into(),
            hint: "policy decisions will not survive restarts".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Plan table
// ---------------------------------------------------------------------------

/// TOML shape of one plan entry (the id comes from the table key).
#[derive(Debug, Clone, Deserialize)]
struct PlanEntry {
    currency: String,
    #[serde(default)]
    monthly_budget_amount: Option<f64>,
    trial_daily_tasks_cap: u32,
    trial_daily_tokens_cap: u64,
    trial_max_cost_per_call: f64,
    #[serde(default)]
    allow_autopublish: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct PlanFile {
    #[serde(default)]
    plans: BTreeMap<String, PlanEntry>,
}

/// Immutable plan lookup table.
#[derive(Debug, Clone)]
pub struct PlanTable {
    plans: BTreeMap<String, PlanRecord>,
}

impl PlanTable {
    /// Built-in defaults used when no plan file is configured.
    #[must_use]
    pub fn builtin() -> Self {
        let mut plans = BTreeMap::new();
        for record in [
            PlanRecord {
                plan_id: "trial".into(),
                currency: "USD".into(),
                monthly_budget_amount: None,
                trial_daily_tasks_cap: 10,
                trial_daily_tokens_cap: 50_000,
                trial_max_cost_per_call: 0.10,
                allow_autopublish: false,
            },
            PlanRecord {
                plan_id: "starter".into(),
                currency: "USD".into(),
                monthly_budget_amount: Some(50.0),
                trial_daily_tasks_cap: 25,
                trial_daily_tokens_cap: 200_000,
                trial_max_cost_per_call: 0.25,
                allow_autopublish: false,
            },
            PlanRecord {
                plan_id: "scale".into(),
                currency: "USD".into(),
                monthly_budget_amount: Some(500.0),
                trial_daily_tasks_cap: 100,
                trial_daily_tokens_cap: 1_000_000,
                trial_max_cost_per_call: 1.00,
                allow_autopublish: true,
            },
        ] {
            plans.insert(record.plan_id.clone(), record);
        }
        Self { plans }
    }

    /// Parse a plan table from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] on malformed TOML and
    /// [`ConfigError::ValidationError`] when the table is empty.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: PlanFile = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            reason: e.to_string(),
        })?;
        if file.plans.is_empty() {
            return Err(ConfigError::ValidationError {
                reasons: vec!["plan table defines no plans".into()],
            });
        }
        let plans = file
            .plans
            .into_iter()
            .map(|(plan_id, entry)| {
                let record = PlanRecord {
                    plan_id: plan_id.clone(),
                    currency: entry.currency,
                    monthly_budget_amount: entry.monthly_budget_amount,
                    trial_daily_tasks_cap: entry.trial_daily_tasks_cap,
                    trial_daily_tokens_cap: entry.trial_daily_tokens_cap,
                    trial_max_cost_per_call: entry.trial_max_cost_per_call,
                    allow_autopublish: entry.allow_autopublish,
                };
                (plan_id, record)
            })
            .collect();
        Ok(Self { plans })
    }

    /// Load the plan table from `path`, or built-ins when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`] or a parse/validation error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            None => Ok(Self::builtin()),
            Some(p) => {
                let content =
                    std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                        path: p.display().to_string(),
                    })?;
                let table = Self::from_toml_str(&content)?;
                info!(path = %p.display(), plans = table.plans.len(), "plan table loaded");
                Ok(table)
            }
        }
    }

    /// Look up a plan by id.
    #[must_use]
    pub fn get(&self, plan_id: &str) -> Option<&PlanRecord> {
        self.plans.get(plan_id)
    }

    /// All plans, in id order.
    #[must_use]
    pub fn all(&self) -> Vec<&PlanRecord> {
        self.plans.values().collect()
    }
}
