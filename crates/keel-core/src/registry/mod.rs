//! Feature registry module.
//!
//! Owning container mapping feature names to registered features. Iteration
//! is by name, which is the "registry iteration order" the dependency
//! resolver uses to break ties.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::feature::{Feature, FeatureDescriptor};

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A feature with the same name is already registered.
    #[error("duplicate feature '{0}'")]
    DuplicateFeature(String),

    /// No feature is registered under the given name.
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),

    /// The feature exists but is not enabled.
    #[error("feature '{0}' is not enabled")]
    NotEnabled(String),

    /// Registration was attempted after the options were sealed.
    #[error("feature '{0}' registered after options were sealed")]
    RegistrationClosed(String),
}

/// A registered feature together with its orchestration state.
///
/// The cell caches the descriptor at registration time and keeps the
/// enabled/force-disabled flags in atomics so that shutdown delivery can
/// read them from another thread. The feature itself sits behind an
/// [`RwLock`]: phase execution takes the write side, `begin_shutdown`
/// delivery the read side.
pub struct FeatureCell {
    descriptor: FeatureDescriptor,
    enabled: AtomicBool,
    force_disabled: AtomicBool,
    feature: RwLock<Box<dyn Feature>>,
}

impl FeatureCell {
    fn new(feature: Box<dyn Feature>) -> Self {
        let descriptor = feature.descriptor();
        let enabled = descriptor.enabled_by_default();
        Self {
            descriptor,
            enabled: AtomicBool::new(enabled),
            force_disabled: AtomicBool::new(false),
            feature: RwLock::new(feature),
        }
    }

    /// The feature name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// The cached descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &FeatureDescriptor {
        &self.descriptor
    }

    /// Whether the feature is currently enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Whether the feature has been force-disabled.
    #[must_use]
    pub fn is_force_disabled(&self) -> bool {
        self.force_disabled.load(Ordering::SeqCst)
    }

    /// Set the enabled state.
    ///
    /// Force-disable is sticky: enabling a force-disabled feature is
    /// ignored.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled && self.is_force_disabled() {
            return;
        }
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Disable the feature.
    pub fn disable(&self) {
        self.set_enabled(false);
    }

    /// Disable the feature permanently; later `set_enabled(true)` calls are
    /// ignored.
    pub fn force_disable(&self) {
        self.force_disabled.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Run a closure with mutable access to the feature.
    pub(crate) fn with_feature_mut<R>(&self, f: impl FnOnce(&mut dyn Feature) -> R) -> R {
        let mut guard = self
            .feature
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(guard.as_mut())
    }

    /// Run a closure with shared access to the feature.
    pub(crate) fn with_feature<R>(&self, f: impl FnOnce(&dyn Feature) -> R) -> R {
        let guard = self.feature.read().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }
}

impl fmt::Debug for FeatureCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureCell")
            .field("name", &self.name())
            .field("enabled", &self.is_enabled())
            .field("force_disabled", &self.is_force_disabled())
            .finish_non_exhaustive()
    }
}

/// Owning container of registered features.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    features: BTreeMap<String, Arc<FeatureCell>>,
}

impl FeatureRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feature. The registry takes ownership.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateFeature`] if a feature with the
    /// same name is already registered.
    pub fn add(&mut self, feature: Box<dyn Feature>) -> Result<(), RegistryError> {
        let cell = FeatureCell::new(feature);
        let name = cell.name().to_string();
        if self.features.contains_key(&name) {
            return Err(RegistryError::DuplicateFeature(name));
        }
        self.features.insert(name, Arc::new(cell));
        Ok(())
    }

    /// Whether a feature with the given name is registered.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    /// Look up a feature by name. Never fails; absent features yield `None`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<FeatureCell>> {
        self.features.get(name).cloned()
    }

    /// Fetch a feature by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownFeature`] when no feature with the
    /// given name is registered.
    pub fn feature(&self, name: &str) -> Result<Arc<FeatureCell>, RegistryError> {
        self.lookup(name)
            .ok_or_else(|| RegistryError::UnknownFeature(name.to_string()))
    }

    /// Fetch a feature that must be enabled.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownFeature`] for absent names and
    /// [`RegistryError::NotEnabled`] for disabled ones.
    pub fn enabled_feature(&self, name: &str) -> Result<Arc<FeatureCell>, RegistryError> {
        let cell = self.feature(name)?;
        if !cell.is_enabled() {
            return Err(RegistryError::NotEnabled(name.to_string()));
        }
        Ok(cell)
    }

    /// Visit features in registry iteration order.
    pub fn apply(&self, mut visitor: impl FnMut(&FeatureCell), enabled_only: bool) {
        for cell in self.features.values() {
            if !enabled_only || cell.is_enabled() {
                visitor(cell);
            }
        }
    }

    /// Iterate over all features in registry iteration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<FeatureCell>> {
        self.features.values()
    }

    /// Number of registered features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureDescriptor;

    struct Plain {
        name: &'static str,
        enabled_by_default: bool,
    }

    impl Feature for Plain {
        fn descriptor(&self) -> FeatureDescriptor {
            let builder = FeatureDescriptor::builder().name(self.name);
            if self.enabled_by_default {
                builder.build()
            } else {
                builder.disabled_by_default().build()
            }
        }
    }

    fn plain(name: &'static str) -> Box<Plain> {
        Box::new(Plain {
            name,
            enabled_by_default: true,
        })
    }

    #[test]
    fn test_add_and_query() {
        let mut registry = FeatureRegistry::new();
        registry.add(plain("alpha")).unwrap();
        registry.add(plain("beta")).unwrap();

        assert!(registry.exists("alpha"));
        assert!(!registry.exists("gamma"));
        assert_eq!(registry.len(), 2);
        assert!(registry.lookup("gamma").is_none());
        assert_eq!(registry.feature("beta").unwrap().name(), "beta");

        let err = registry.feature("gamma").unwrap_err();
        assert_eq!(err.to_string(), "unknown feature 'gamma'");
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = FeatureRegistry::new();
        registry.add(plain("alpha")).unwrap();

        let err = registry.add(plain("alpha")).unwrap_err();
        assert_eq!(err.to_string(), "duplicate feature 'alpha'");
    }

    #[test]
    fn test_enabled_feature() {
        let mut registry = FeatureRegistry::new();
        registry.add(plain("alpha")).unwrap();
        registry
            .add(Box::new(Plain {
                name: "beta",
                enabled_by_default: false,
            }))
            .unwrap();

        assert!(registry.enabled_feature("alpha").is_ok());
        let err = registry.enabled_feature("beta").unwrap_err();
        assert_eq!(err.to_string(), "feature 'beta' is not enabled");
    }

    #[test]
    fn test_force_disable_is_sticky() {
        let mut registry = FeatureRegistry::new();
        registry.add(plain("alpha")).unwrap();
        let cell = registry.feature("alpha").unwrap();

        cell.force_disable();
        assert!(!cell.is_enabled());

        cell.set_enabled(true);
        assert!(!cell.is_enabled(), "force-disable must be sticky");

        // disabling again is still fine
        cell.set_enabled(false);
        assert!(!cell.is_enabled());
    }

    #[test]
    fn test_apply_enabled_only() {
        let mut registry = FeatureRegistry::new();
        registry.add(plain("alpha")).unwrap();
        registry.add(plain("beta")).unwrap();
        registry.feature("alpha").unwrap().disable();

        let mut seen = Vec::new();
        registry.apply(|cell| seen.push(cell.name().to_string()), true);
        assert_eq!(seen, ["beta"]);

        seen.clear();
        registry.apply(|cell| seen.push(cell.name().to_string()), false);
        assert_eq!(seen, ["alpha", "beta"]);
    }
}
