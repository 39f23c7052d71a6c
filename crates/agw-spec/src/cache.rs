// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-process memoisation of compiled bundles.
//!
//! Keyed by the spec's canonical content hash. The map lock is held across
//! compilation, which gives at-most-one compile per content hash in flight;
//! compilation is pure and cheap, so the hold time is negligible.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::compile::{CompiledBundle, Violation, ViolationCode, compile};
use crate::registry::DimensionRegistry;
use crate::AgentSpec;

/// Bounded memoisation of [`CompiledBundle`]s.
#[derive(Debug)]
pub struct BundleCache {
    capacity: usize,
    inner: Mutex<HashMap<String, Arc<CompiledBundle>>>,
}

impl BundleCache {
    /// Create a cache holding at most `capacity` bundles.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Compile `spec` or return the memoised bundle for its content hash.
    ///
    /// Identical specs observe the identical `Arc` for the lifetime of the
    /// entry, which is what makes compilation deterministic per process.
    ///
    /// # Errors
    ///
    /// Returns the spec's violations; violations are never cached.
    pub fn get_or_compile(
        &self,
        spec: &AgentSpec,
        registry: &DimensionRegistry,
    ) -> Result<Arc<CompiledBundle>, Vec<Violation>> {
        let key = spec.content_hash().map_err(|e| {
            vec![Violation {
                path: String::new(),
                code: ViolationCode::InvalidConfig,
                message: format!("spec could not be canonicalised: {e}"),
            }]
        })?;

        let mut map = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(bundle) = map.get(&key) {
            return Ok(Arc::clone(bundle));
        }

        let bundle = Arc::new(compile(spec, registry)?);

        if map.len() >= self.capacity {
            // Full: drop an arbitrary entry rather than grow unboundedly.
            if let Some(evict) = map.keys().next().cloned() {
                map.remove(&evict);
            }
        }
        map.insert(key, Arc::clone(&bundle));
        Ok(bundle)
    }

    /// Number of cached bundles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Returns `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str) -> AgentSpec {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "spec_type": "tutor",
            "version": "1.0.0",
            "dimensions": {
                "skill": null,
                "industry": null,
                "team": null,
                "ui": null,
                "localization": null,
                "trial": null,
                "budget": null
            }
        }))
        .unwrap()
    }

    #[test]
    fn identical_specs_share_one_bundle() {
        let cache = BundleCache::new(8);
        let registry = DimensionRegistry::platform();

        let a = cache.get_or_compile(&spec("tutor/v1"), &registry).unwrap();
        let b = cache.get_or_compile(&spec("tutor/v1"), &registry).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_is_bounded() {
        let cache = BundleCache::new(2);
        let registry = DimensionRegistry::platform();

        for i in 0..5 {
            cache
                .get_or_compile(&spec(&format!("tutor/v{i}")), &registry)
                .unwrap();
        }
        assert!(cache.len() <= 2);
    }

    #[test]
    fn violations_are_not_cached() {
        let cache = BundleCache::new(8);
        let registry = DimensionRegistry::platform();

        let mut bad = spec("tutor/v1");
        bad.dimensions.remove("ui");
        assert!(cache.get_or_compile(&bad, &registry).is_err());
        assert!(cache.is_empty());
    }
}
