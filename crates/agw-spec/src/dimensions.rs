// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed dimension configurations and instances.
//!
//! The source system modelled dimensions as an open dictionary with ad-hoc
//! shapes. Here the set is closed: one variant per dimension, each carrying
//! its typed configuration, with [`DimensionInstance::Null`] as the explicit
//! null sentinel. Unknown configuration fields are rejected at parse time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Names of all dimensions the platform registers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DimensionName {
    /// The skill the agent executes.
    Skill,
    /// Industry vertical the agent is tuned for.
    Industry,
    /// Team handoff and review settings.
    Team,
    /// Outbound channel integrations (and the autopublish switch).
    Integrations,
    /// Presentation settings for the customer portal.
    Ui,
    /// Locale and fallback language.
    Localization,
    /// Trial-mode behaviour overrides.
    Trial,
    /// Spend visibility settings surfaced to the customer.
    Budget,
}

impl DimensionName {
    /// Every registered dimension, in canonical order.
    pub const ALL: [DimensionName; 8] = [
        Self::Skill,
        Self::Industry,
        Self::Team,
        Self::Integrations,
        Self::Ui,
        Self::Localization,
        Self::Trial,
        Self::Budget,
    ];

    /// Stable wire string for this dimension.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Industry => "industry",
            Self::Team => "team",
            Self::Integrations => "integrations",
            Self::Ui => "ui",
            Self::Localization => "localization",
            Self::Trial => "trial",
            Self::Budget => "budget",
        }
    }
}

impl std::str::FromStr for DimensionName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or(())
    }
}

impl std::fmt::Display for DimensionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Skill dimension: which playbook runs and what inputs it takes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SkillConfig {
    /// Dimension semantic version.
    pub version: String,
    /// Skill name exposed on the execution path.
    pub name: String,
    /// Playbook the skill executes, by registered name.
    pub playbook: String,
    /// Input field names the playbook requires.
    #[serde(default)]
    pub inputs: Vec<String>,
}

/// Industry dimension: vertical tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IndustryConfig {
    /// Dimension semantic version.
    pub version: String,
    /// Industry vertical identifier.
    pub vertical: String,
    /// Optional reference into the externally-managed corpus.
    #[serde(default)]
    pub corpus_ref: Option<String>,
}

/// Team dimension: review and handoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TeamConfig {
    /// Dimension semantic version.
    pub version: String,
    /// Roles that may review this agent's output.
    #[serde(default)]
    pub reviewer_roles: Vec<String>,
    /// Whether a human review step is required before publish.
    #[serde(default)]
    pub require_review: bool,
}

/// Integrations dimension: outbound channels and autopublish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IntegrationsConfig {
    /// Dimension semantic version.
    pub version: String,
    /// Channel identifiers output may be published to.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Publish without a per-request approval id, if the plan also allows it.
    #[serde(default)]
    pub autopublish: bool,
}

/// UI dimension: portal presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UiConfig {
    /// Dimension semantic version.
    pub version: String,
    /// Theme identifier.
    pub theme: String,
    /// Optional layout identifier.
    #[serde(default)]
    pub layout: Option<String>,
}

/// Localization dimension: locale and fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LocalizationConfig {
    /// Dimension semantic version.
    pub version: String,
    /// Primary BCP-47 locale.
    pub locale: String,
    /// Fallback locale when the primary has no content.
    #[serde(default)]
    pub fallback: Option<String>,
}

/// Trial dimension: trial-mode behaviour overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TrialConfig {
    /// Dimension semantic version.
    pub version: String,
    /// Length of the trial window in days.
    pub trial_days: u32,
    /// Optional banner text shown to trial users.
    #[serde(default)]
    pub banner: Option<String>,
}

/// Budget dimension: spend visibility surfaced to the customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Dimension semantic version.
    pub version: String,
    /// Fraction of the monthly budget at which the portal warns (0–1).
    #[serde(default)]
    pub alert_threshold: Option<f64>,
    /// Whether per-call costs are shown in the portal.
    #[serde(default)]
    pub show_costs: bool,
}

/// A materialised dimension: an active typed configuration or the explicit
/// null sentinel.
///
/// Null is a first-class value, not absence: a compiled bundle carries an
/// instance for every dimension its spec type recognises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dimension", content = "config", rename_all = "snake_case")]
pub enum DimensionInstance {
    /// The explicit null sentinel.
    Null,
    /// Active skill dimension.
    Skill(SkillConfig),
    /// Active industry dimension.
    Industry(IndustryConfig),
    /// Active team dimension.
    Team(TeamConfig),
    /// Active integrations dimension.
    Integrations(IntegrationsConfig),
    /// Active UI dimension.
    Ui(UiConfig),
    /// Active localization dimension.
    Localization(LocalizationConfig),
    /// Active trial dimension.
    Trial(TrialConfig),
    /// Active budget dimension.
    Budget(BudgetConfig),
}

impl DimensionInstance {
    /// Returns `true` for the null sentinel.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The semantic version carried by an active instance, `None` for null.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::Null => None,
            Self::Skill(c) => Some(&c.version),
            Self::Industry(c) => Some(&c.version),
            Self::Team(c) => Some(&c.version),
            Self::Integrations(c) => Some(&c.version),
            Self::Ui(c) => Some(&c.version),
            Self::Localization(c) => Some(&c.version),
            Self::Trial(c) => Some(&c.version),
            Self::Budget(c) => Some(&c.version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn names_roundtrip_through_strings() {
        for name in DimensionName::ALL {
            assert_eq!(DimensionName::from_str(name.as_str()), Ok(name));
        }
        assert!(DimensionName::from_str("pricing").is_err());
    }

    #[test]
    fn unknown_config_fields_are_rejected() {
        let v = serde_json::json!({
            "version": "1.0.0",
            "name": "post",
            "playbook": "weekly",
            "surprise": true
        });
        assert!(serde_json::from_value::<SkillConfig>(v).is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let v = serde_json::json!({"version": "1.0.0", "name": "post"});
        assert!(serde_json::from_value::<SkillConfig>(v).is_err());
    }

    #[test]
    fn null_instance_has_no_version() {
        assert_eq!(DimensionInstance::Null.version(), None);
        let active = DimensionInstance::Ui(UiConfig {
            version: "2.1.0".into(),
            theme: "dark".into(),
            layout: None,
        });
        assert_eq!(active.version(), Some("2.1.0"));
        assert!(!active.is_null());
    }
}
