// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! agw-spec
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-process memoisation of compiled bundles.
pub mod cache;
/// The compile/validate pipeline and its violation model.
pub mod compile;
/// Typed dimension configurations and instances.
pub mod dimensions;
/// The closed dimension descriptor registry.
pub mod registry;

pub use cache::BundleCache;
pub use compile::{CompiledBundle, Violation, ViolationCode, compile, parse, schema, validate};
pub use dimensions::{DimensionInstance, DimensionName};
pub use registry::DimensionRegistry;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed set of agent spec types the gateway recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SpecType {
    /// Marketing content agents (drafting and channel publication).
    Marketing,
    /// Tutoring agents (interactive lesson delivery, no channel output).
    Tutor,
}

impl std::fmt::Display for SpecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Marketing => "marketing",
            Self::Tutor => "tutor",
        };
        write!(f, "{s}")
    }
}

/// Declarative agent blueprint as submitted by spec tooling.
///
/// `dimensions` maps dimension names to either a configuration object or
/// JSON `null` (the explicit null sentinel). A key absent from the map is
/// *missing*, which is invalid for any dimension the spec type recognises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AgentSpec {
    /// Spec identifier (e.g. `"marketing/v1"`).
    pub id: String,
    /// Spec type from the closed set.
    pub spec_type: SpecType,
    /// Semantic version of the spec itself.
    pub version: String,
    /// Dimension name → configuration or explicit null.
    pub dimensions: BTreeMap<String, serde_json::Value>,
}

impl AgentSpec {
    /// Canonical content hash of this spec, used as the bundle cache key.
    ///
    /// # Errors
    ///
    /// Returns [`agw_core::ContractError`] if serialization fails.
    pub fn content_hash(&self) -> Result<String, agw_core::ContractError> {
        let canonical = agw_core::canonical_json(self)?;
        Ok(agw_core::sha256_hex(canonical.as_bytes()))
    }
}

/// A parsed `major.minor.patch` version.
///
/// Comparison against supported ranges is exact on major, ranged on minor;
/// patch is carried but never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecVersion {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component (ignored by range checks).
    pub patch: u64,
}

impl std::str::FromStr for SpecVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut next = |label: &str| -> Result<u64, String> {
            parts
                .next()
                .ok_or_else(|| format!("missing {label} component in '{s}'"))?
                .parse::<u64>()
                .map_err(|_| format!("non-numeric {label} component in '{s}'"))
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(format!("too many components in '{s}'"));
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl std::fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Supported version window for a dimension under a given spec type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    /// Required major version (exact match).
    pub major: u64,
    /// Lowest supported minor (inclusive).
    pub min_minor: u64,
    /// Highest supported minor (inclusive).
    pub max_minor: u64,
}

impl VersionRange {
    /// Returns `true` if `v` falls inside this range. Patch is ignored.
    #[must_use]
    pub fn supports(&self, v: SpecVersion) -> bool {
        v.major == self.major && v.minor >= self.min_minor && v.minor <= self.max_minor
    }
}

impl std::fmt::Display for VersionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.x..={}.{}.x",
            self.major, self.min_minor, self.major, self.max_minor
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn version_parses_and_displays() {
        let v = SpecVersion::from_str("1.4.2").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 4, 2));
        assert_eq!(v.to_string(), "1.4.2");
    }

    #[test]
    fn version_rejects_malformed_strings() {
        for bad in ["", "1", "1.2", "1.2.x", "1.2.3.4", "a.b.c"] {
            assert!(SpecVersion::from_str(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn range_is_exact_major_ranged_minor() {
        let range = VersionRange {
            major: 1,
            min_minor: 2,
            max_minor: 5,
        };
        assert!(range.supports(SpecVersion::from_str("1.2.0").unwrap()));
        assert!(range.supports(SpecVersion::from_str("1.5.99").unwrap()));
        assert!(!range.supports(SpecVersion::from_str("1.6.0").unwrap()));
        assert!(!range.supports(SpecVersion::from_str("1.1.9").unwrap()));
        assert!(!range.supports(SpecVersion::from_str("2.3.0").unwrap()));
    }

    #[test]
    fn patch_is_ignored_at_range_edges() {
        let range = VersionRange {
            major: 1,
            min_minor: 0,
            max_minor: 3,
        };
        assert!(range.supports(SpecVersion::from_str("1.3.999").unwrap()));
        assert!(range.supports(SpecVersion::from_str("1.0.0").unwrap()));
    }

    #[test]
    fn content_hash_is_stable_across_key_order() {
        let a: AgentSpec = serde_json::from_str(
            r#"{"id":"x","spec_type":"marketing","version":"1.0.0","dimensions":{"skill":null,"ui":null}}"#,
        )
        .unwrap();
        let b: AgentSpec = serde_json::from_str(
            r#"{"id":"x","spec_type":"marketing","version":"1.0.0","dimensions":{"ui":null,"skill":null}}"#,
        )
        .unwrap();
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());
    }
}
