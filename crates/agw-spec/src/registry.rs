// SPDX-License-Identifier: MIT OR Apache-2.0

//! The closed dimension descriptor registry.
//!
//! Populated once at startup and read-only thereafter. For each spec type it
//! records which dimensions are recognised (and therefore must appear in a
//! spec, active or null) and the supported version window per dimension.

use std::collections::BTreeMap;

use crate::dimensions::DimensionName;
use crate::{SpecType, VersionRange};

/// Registry of dimension descriptors per spec type.
#[derive(Debug, Clone)]
pub struct DimensionRegistry {
    ranges: BTreeMap<(SpecType, DimensionName), VersionRange>,
}

impl DimensionRegistry {
    /// Build the platform registry.
    ///
    /// Marketing agents recognise all eight dimensions. Tutor agents have no
    /// outbound channels, so `integrations` is not recognised for them.
    #[must_use]
    pub fn platform() -> Self {
        let mut ranges = BTreeMap::new();
        let v1 = VersionRange {
            major: 1,
            min_minor: 0,
            max_minor: 4,
        };
        let ui_v2 = VersionRange {
            major: 2,
            min_minor: 0,
            max_minor: 1,
        };

        for name in DimensionName::ALL {
            let range = if name == DimensionName::Ui { ui_v2 } else { v1 };
            ranges.insert((SpecType::Marketing, name), range);
            if name != DimensionName::Integrations {
                ranges.insert((SpecType::Tutor, name), range);
            }
        }

        Self { ranges }
    }

    /// Dimensions recognised for a spec type, in canonical order.
    #[must_use]
    pub fn recognized_for(&self, spec_type: SpecType) -> Vec<DimensionName> {
        DimensionName::ALL
            .into_iter()
            .filter(|name| self.ranges.contains_key(&(spec_type, *name)))
            .collect()
    }

    /// Supported version range for a dimension under a spec type.
    #[must_use]
    pub fn range_for(&self, spec_type: SpecType, name: DimensionName) -> Option<VersionRange> {
        self.ranges.get(&(spec_type, name)).copied()
    }

    /// Returns `true` if any spec type recognises `name`.
    #[must_use]
    pub fn is_registered(&self, name: DimensionName) -> bool {
        self.ranges.keys().any(|(_, n)| *n == name)
    }

    /// Serializable registry listing for the reference endpoint.
    #[must_use]
    pub fn listing(&self) -> Vec<RegistryEntry> {
        self.ranges
            .iter()
            .map(|((spec_type, name), range)| RegistryEntry {
                spec_type: *spec_type,
                dimension: *name,
                supported: range.to_string(),
            })
            .collect()
    }
}

impl Default for DimensionRegistry {
    fn default() -> Self {
        Self::platform()
    }
}

/// One row of the registry listing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryEntry {
    /// Spec type the entry applies to.
    pub spec_type: SpecType,
    /// Dimension name.
    pub dimension: DimensionName,
    /// Human-readable supported window.
    pub supported: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marketing_recognises_all_dimensions() {
        let reg = DimensionRegistry::platform();
        assert_eq!(reg.recognized_for(SpecType::Marketing).len(), 8);
    }

    #[test]
    fn tutor_has_no_integrations() {
        let reg = DimensionRegistry::platform();
        let dims = reg.recognized_for(SpecType::Tutor);
        assert_eq!(dims.len(), 7);
        assert!(!dims.contains(&DimensionName::Integrations));
        assert!(reg.range_for(SpecType::Tutor, DimensionName::Integrations).is_none());
    }

    #[test]
    fn ui_runs_a_newer_major() {
        let reg = DimensionRegistry::platform();
        let range = reg.range_for(SpecType::Marketing, DimensionName::Ui).unwrap();
        assert_eq!(range.major, 2);
    }
}
