// SPDX-License-Identifier: MIT OR Apache-2.0

//! The compile/validate pipeline and its violation model.
//!
//! Spec failures are values, never exceptions: both operations return a
//! list of `{path, code, message}` violations that the ingress renders as a
//! 422-style problem.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::schema_for;
use serde::{Deserialize, Serialize};

use crate::dimensions::{DimensionInstance, DimensionName};
use crate::registry::DimensionRegistry;
use crate::{AgentSpec, SpecVersion};

/// Machine-readable violation discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    /// The dimension name is not in the descriptor registry at all.
    UnknownDimension,
    /// The dimension exists but the spec's type does not recognise it.
    DimensionNotRecognizedForType,
    /// A dimension the spec type recognises is neither active nor null.
    MissingDimension,
    /// An active configuration failed its descriptor's validator.
    InvalidConfig,
    /// A version string could not be parsed as `major.minor.patch`.
    InvalidVersion,
    /// An active dimension's version is outside the supported window.
    UnsupportedVersion,
}

/// One precise spec violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// JSON-pointer-ish path into the spec (e.g. `dimensions.skill.version`).
    pub path: String,
    /// Violation discriminator.
    pub code: ViolationCode,
    /// Human-readable detail.
    pub message: String,
}

impl Violation {
    fn new(path: impl Into<String>, code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code,
            message: message.into(),
        }
    }
}

/// Frozen output of a successful compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledBundle {
    /// Identifier of the compiled spec.
    pub spec_id: String,
    /// Spec-level semantic version.
    pub spec_version: String,
    /// One instance per dimension the spec type recognises.
    pub dimensions: BTreeMap<DimensionName, DimensionInstance>,
    /// When this bundle was materialised.
    pub compiled_at: DateTime<Utc>,
}

impl CompiledBundle {
    /// The instance for `name`, if the spec type recognises it.
    #[must_use]
    pub fn dimension(&self, name: DimensionName) -> Option<&DimensionInstance> {
        self.dimensions.get(&name)
    }

    /// Returns `true` when the integrations dimension is active with
    /// `autopublish = true`.
    #[must_use]
    pub fn autopublish_enabled(&self) -> bool {
        matches!(
            self.dimensions.get(&DimensionName::Integrations),
            Some(DimensionInstance::Integrations(c)) if c.autopublish
        )
    }

    /// The active skill configuration, if any.
    #[must_use]
    pub fn skill(&self) -> Option<&crate::dimensions::SkillConfig> {
        match self.dimensions.get(&DimensionName::Skill) {
            Some(DimensionInstance::Skill(c)) => Some(c),
            _ => None,
        }
    }
}

/// Validate `spec` against the registry without materialising a bundle.
///
/// Returns every violation found; an empty list means the spec compiles.
#[must_use]
pub fn validate(spec: &AgentSpec, registry: &DimensionRegistry) -> Vec<Violation> {
    match check(spec, registry) {
        Ok(_) => Vec::new(),
        Err(violations) => violations,
    }
}

/// Compile `spec` into a [`CompiledBundle`], or return the violations.
///
/// # Errors
///
/// Returns the full list of violations when the spec does not conform.
pub fn compile(
    spec: &AgentSpec,
    registry: &DimensionRegistry,
) -> Result<CompiledBundle, Vec<Violation>> {
    let dimensions = check(spec, registry)?;
    Ok(CompiledBundle {
        spec_id: spec.id.clone(),
        spec_version: spec.version.clone(),
        dimensions,
        compiled_at: Utc::now(),
    })
}

/// Emit the stable JSON Schema for the spec shape.
#[must_use]
pub fn schema() -> serde_json::Value {
    serde_json::to_value(schema_for!(AgentSpec)).unwrap_or_default()
}

/// Parse a raw JSON value into an [`AgentSpec`], mapping deserialization
/// failures into violations so the preflight endpoint never throws.
///
/// # Errors
///
/// Returns a single structural violation when the value is not spec-shaped.
pub fn parse(value: serde_json::Value) -> Result<AgentSpec, Vec<Violation>> {
    serde_json::from_value(value).map_err(|e| {
        vec![Violation::new(
            "",
            ViolationCode::InvalidConfig,
            format!("not a valid agent spec: {e}"),
        )]
    })
}

/// Shared worker for [`validate`] and [`compile`].
fn check(
    spec: &AgentSpec,
    registry: &DimensionRegistry,
) -> Result<BTreeMap<DimensionName, DimensionInstance>, Vec<Violation>> {
    let mut violations = Vec::new();
    let mut out = BTreeMap::new();

    if let Err(e) = SpecVersion::from_str(&spec.version) {
        violations.push(Violation::new("version", ViolationCode::InvalidVersion, e));
    }

    let recognized = registry.recognized_for(spec.spec_type);

    for (key, value) in &spec.dimensions {
        let path = format!("dimensions.{key}");
        let Ok(name) = DimensionName::from_str(key) else {
            violations.push(Violation::new(
                &path,
                ViolationCode::UnknownDimension,
                format!("'{key}' is not a registered dimension"),
            ));
            continue;
        };

        if !recognized.contains(&name) {
            violations.push(Violation::new(
                &path,
                ViolationCode::DimensionNotRecognizedForType,
                format!("'{key}' is not recognised for {} specs", spec.spec_type),
            ));
            continue;
        }

        if value.is_null() {
            out.insert(name, DimensionInstance::Null);
            continue;
        }

        let instance = match materialize(name, value.clone()) {
            Ok(i) => i,
            Err(e) => {
                violations.push(Violation::new(&path, ViolationCode::InvalidConfig, e));
                continue;
            }
        };

        // Version checks only apply to active instances.
        if let Some(raw) = instance.version() {
            let vpath = format!("{path}.version");
            match SpecVersion::from_str(raw) {
                Err(e) => violations.push(Violation::new(&vpath, ViolationCode::InvalidVersion, e)),
                Ok(v) => {
                    // range_for is Some here: the dimension is recognised.
                    if let Some(range) = registry.range_for(spec.spec_type, name) {
                        if !range.supports(v) {
                            violations.push(Violation::new(
                                &vpath,
                                ViolationCode::UnsupportedVersion,
                                format!("version {v} outside supported window {range}"),
                            ));
                        }
                    }
                }
            }
        }

        out.insert(name, instance);
    }

    for name in recognized {
        if !spec.dimensions.contains_key(name.as_str()) {
            violations.push(Violation::new(
                format!("dimensions.{name}"),
                ViolationCode::MissingDimension,
                format!("dimension '{name}' must be active or explicitly null"),
            ));
        }
    }

    if violations.is_empty() {
        Ok(out)
    } else {
        Err(violations)
    }
}

/// Deserialize an active configuration into its typed instance.
fn materialize(name: DimensionName, value: serde_json::Value) -> Result<DimensionInstance, String> {
    let mapped = match name {
        DimensionName::Skill => serde_json::from_value(value).map(DimensionInstance::Skill),
        DimensionName::Industry => serde_json::from_value(value).map(DimensionInstance::Industry),
        DimensionName::Team => serde_json::from_value(value).map(DimensionInstance::Team),
        DimensionName::Integrations => {
            serde_json::from_value(value).map(DimensionInstance::Integrations)
        }
        DimensionName::Ui => serde_json::from_value(value).map(DimensionInstance::Ui),
        DimensionName::Localization => {
            serde_json::from_value(value).map(DimensionInstance::Localization)
        }
        DimensionName::Trial => serde_json::from_value(value).map(DimensionInstance::Trial),
        DimensionName::Budget => serde_json::from_value(value).map(DimensionInstance::Budget),
    };
    mapped.map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SpecType;

    fn marketing_spec() -> AgentSpec {
        serde_json::from_value(serde_json::json!({
            "id": "marketing/v1",
            "spec_type": "marketing",
            "version": "1.0.0",
            "dimensions": {
                "skill": {
                    "version": "1.2.0",
                    "name": "weekly-post",
                    "playbook": "weekly-post",
                    "inputs": ["topic"]
                },
                "industry": null,
                "team": null,
                "integrations": {
                    "version": "1.0.0",
                    "channels": ["blog"],
                    "autopublish": false
                },
                "ui": {"version": "2.0.0", "theme": "light"},
                "localization": null,
                "trial": null,
                "budget": null
            }
        }))
        .unwrap()
    }

    #[test]
    fn complete_spec_compiles() {
        let registry = DimensionRegistry::platform();
        let bundle = compile(&marketing_spec(), &registry).unwrap();
        assert_eq!(bundle.spec_id, "marketing/v1");
        assert_eq!(bundle.dimensions.len(), 8);
        assert!(bundle.dimension(DimensionName::Industry).unwrap().is_null());
        assert!(!bundle.autopublish_enabled());
        assert_eq!(bundle.skill().unwrap().playbook, "weekly-post");
    }

    #[test]
    fn null_sentinel_is_valid_but_absence_is_not() {
        let registry = DimensionRegistry::platform();
        let mut spec = marketing_spec();
        spec.dimensions.remove("budget");

        let violations = validate(&spec, &registry);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].code, ViolationCode::MissingDimension);
        assert_eq!(violations[0].path, "dimensions.budget");
    }

    #[test]
    fn unknown_dimension_is_rejected() {
        let registry = DimensionRegistry::platform();
        let mut spec = marketing_spec();
        spec.dimensions
            .insert("pricing".into(), serde_json::Value::Null);

        let violations = validate(&spec, &registry);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].code, ViolationCode::UnknownDimension);
    }

    #[test]
    fn integrations_not_recognised_for_tutor() {
        let registry = DimensionRegistry::platform();
        let mut spec = marketing_spec();
        spec.spec_type = SpecType::Tutor;

        let violations = validate(&spec, &registry);
        assert!(violations
            .iter()
            .any(|v| v.code == ViolationCode::DimensionNotRecognizedForType
                && v.path == "dimensions.integrations"));
    }

    #[test]
    fn partial_configuration_is_invalid() {
        let registry = DimensionRegistry::platform();
        let mut spec = marketing_spec();
        spec.dimensions.insert(
            "skill".into(),
            serde_json::json!({"version": "1.0.0", "name": "post"}),
        );

        let violations = validate(&spec, &registry);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].code, ViolationCode::InvalidConfig);
        assert_eq!(violations[0].path, "dimensions.skill");
    }

    #[test]
    fn version_outside_window_is_rejected_at_the_edge() {
        let registry = DimensionRegistry::platform();

        // max_minor for skill under v1 is 4: 1.4.x allows, 1.5.0 denies.
        let mut spec = marketing_spec();
        spec.dimensions.insert(
            "skill".into(),
            serde_json::json!({
                "version": "1.4.9", "name": "p", "playbook": "p", "inputs": []
            }),
        );
        assert!(validate(&spec, &registry).is_empty());

        spec.dimensions.insert(
            "skill".into(),
            serde_json::json!({
                "version": "1.5.0", "name": "p", "playbook": "p", "inputs": []
            }),
        );
        let violations = validate(&spec, &registry);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].code, ViolationCode::UnsupportedVersion);
        assert_eq!(violations[0].path, "dimensions.skill.version");
    }

    #[test]
    fn multiple_violations_are_all_reported() {
        let registry = DimensionRegistry::platform();
        let mut spec = marketing_spec();
        spec.version = "one.two.three".into();
        spec.dimensions.remove("ui");
        spec.dimensions
            .insert("pricing".into(), serde_json::Value::Null);

        let violations = validate(&spec, &registry);
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn schema_is_emitted_and_stable() {
        let a = schema();
        let b = schema();
        assert_eq!(a, b);
        assert!(a["properties"]["dimensions"].is_object());
    }

    #[test]
    fn parse_maps_garbage_to_violations() {
        let err = parse(serde_json::json!({"id": 3})).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].code, ViolationCode::InvalidConfig);
    }
}
