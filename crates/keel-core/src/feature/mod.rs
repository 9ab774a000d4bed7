//! Feature contract module.
//!
//! Defines the capability set every feature must satisfy: a declarative
//! [`FeatureDescriptor`] and the lifecycle callbacks the orchestrator drives.

use crate::options::ProgramOptions;

/// Error type returned by feature phase callbacks.
///
/// Features report failures with whatever error type suits them; the
/// orchestrator only needs to display and propagate it.
pub type FeatureError = Box<dyn std::error::Error + Send + Sync>;

/// Declarative description of a feature.
///
/// The descriptor is read once at registration time and cached by the
/// registry; a feature's declarations must not change afterwards.
#[derive(Debug, Clone)]
pub struct FeatureDescriptor {
    name: String,
    optional: bool,
    starts_after: Vec<String>,
    requires: Vec<String>,
    enable_with: Option<String>,
    requires_elevated_privileges: bool,
    enabled_by_default: bool,
}

impl FeatureDescriptor {
    /// Create a new builder for `FeatureDescriptor`.
    #[must_use]
    pub fn builder() -> FeatureDescriptorBuilder {
        FeatureDescriptorBuilder::default()
    }

    /// The unique feature name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the feature is optional.
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether the feature is required.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        !self.optional
    }

    /// Names of the features this one must start after.
    #[must_use]
    pub fn starts_after(&self) -> &[String] {
        &self.starts_after
    }

    /// Names of the features that must exist and be enabled whenever this
    /// feature is enabled. Always a subset of [`Self::starts_after`].
    #[must_use]
    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    /// The feature whose enabled state this one mirrors, if any.
    #[must_use]
    pub fn enable_with(&self) -> Option<&str> {
        self.enable_with.as_deref()
    }

    /// Whether `prepare` must run with elevated privileges.
    #[must_use]
    pub const fn requires_elevated_privileges(&self) -> bool {
        self.requires_elevated_privileges
    }

    /// The enabled state the feature starts out in.
    #[must_use]
    pub const fn enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }
}

/// Builder for `FeatureDescriptor`.
#[derive(Debug)]
pub struct FeatureDescriptorBuilder {
    name: Option<String>,
    optional: bool,
    starts_after: Vec<String>,
    requires: Vec<String>,
    enable_with: Option<String>,
    requires_elevated_privileges: bool,
    enabled_by_default: bool,
}

impl Default for FeatureDescriptorBuilder {
    fn default() -> Self {
        Self {
            name: None,
            optional: false,
            starts_after: Vec::new(),
            requires: Vec::new(),
            enable_with: None,
            requires_elevated_privileges: false,
            enabled_by_default: true,
        }
    }
}

impl FeatureDescriptorBuilder {
    /// Set the feature name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark the feature as optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Declare that this feature starts after the named one.
    #[must_use]
    pub fn starts_after(mut self, other: impl Into<String>) -> Self {
        let other = other.into();
        if !self.starts_after.contains(&other) {
            self.starts_after.push(other);
        }
        self
    }

    /// Declare a hard dependency on the named feature.
    ///
    /// `requires` implies `starts_after`.
    #[must_use]
    pub fn requires(mut self, other: impl Into<String>) -> Self {
        let other = other.into();
        if !self.requires.contains(&other) {
            self.requires.push(other.clone());
        }
        self.starts_after(other)
    }

    /// Mirror the enabled state of the named feature.
    #[must_use]
    pub fn enable_with(mut self, other: impl Into<String>) -> Self {
        self.enable_with = Some(other.into());
        self
    }

    /// Require elevated privileges during `prepare`.
    #[must_use]
    pub fn requires_elevated_privileges(mut self) -> Self {
        self.requires_elevated_privileges = true;
        self
    }

    /// Start out disabled; the feature only runs if something enables it.
    #[must_use]
    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    /// Build the descriptor.
    ///
    /// # Panics
    ///
    /// Panics if no name was set or the name is empty; descriptors are built
    /// by feature authors, so this is a programming error.
    #[must_use]
    pub fn build(self) -> FeatureDescriptor {
        let name = self.name.expect("feature name is required");
        assert!(!name.is_empty(), "feature name must not be empty");
        FeatureDescriptor {
            name,
            optional: self.optional,
            starts_after: self.starts_after,
            requires: self.requires,
            enable_with: self.enable_with,
            requires_elevated_privileges: self.requires_elevated_privileges,
            enabled_by_default: self.enabled_by_default,
        }
    }
}

/// A named subsystem managed by the orchestrator.
///
/// Every phase callback defaults to a no-op; features implement only the
/// phases they care about. Callbacks are invoked on the single driver thread,
/// except [`Feature::begin_shutdown`], which may arrive from a
/// signal-handling thread and therefore takes `&self`.
///
/// Concurrency contract:
///
/// - `collect_options` through `prepare` must not start threads or open
///   non-idempotent resources. `prepare` must not write files under elevated
///   privileges that the feature later wants to access without them.
/// - From `start` onward a feature may spawn workers, open sockets and write
///   files.
/// - `stop` must join any threads the feature started; dependencies are
///   still alive at that point because teardown runs in reverse order.
pub trait Feature: Send + Sync + 'static {
    /// The feature's declarative description.
    fn descriptor(&self) -> FeatureDescriptor;

    /// Declare command line options.
    ///
    /// # Errors
    ///
    /// Fatal; aborts startup.
    fn collect_options(&mut self, options: &mut ProgramOptions) -> Result<(), FeatureError> {
        let _ = options;
        Ok(())
    }

    /// Read parsed option values into feature state.
    ///
    /// # Errors
    ///
    /// Fatal; aborts startup.
    fn load_options(&mut self, options: &ProgramOptions) -> Result<(), FeatureError> {
        let _ = options;
        Ok(())
    }

    /// Validate the combination of parsed option values.
    ///
    /// # Errors
    ///
    /// Fatal; aborts startup.
    fn validate_options(&mut self, options: &ProgramOptions) -> Result<(), FeatureError> {
        let _ = options;
        Ok(())
    }

    /// Hook for process control work (forking, pid files) before `prepare`.
    ///
    /// # Errors
    ///
    /// Fatal; aborts startup.
    fn daemonize(&mut self) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Perform preparation work. Runs under the privilege level the
    /// descriptor asked for.
    ///
    /// # Errors
    ///
    /// Fatal; aborts startup. Privileges are restored to elevated before the
    /// error propagates.
    fn prepare(&mut self) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Start the feature. Privileges have been dropped permanently by now.
    ///
    /// # Errors
    ///
    /// Fatal; already-started features are stopped in reverse order before
    /// the error propagates.
    fn start(&mut self) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Stop the feature and join any workers it started.
    ///
    /// # Errors
    ///
    /// Logged and suppressed so that the remaining features still stop.
    fn stop(&mut self) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Asynchronous shutdown notification.
    ///
    /// May be called from a different thread than the one running the
    /// feature's workers; implementations must only touch state that is safe
    /// to share with them.
    fn begin_shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let descriptor = FeatureDescriptor::builder().name("storage").build();

        assert_eq!(descriptor.name(), "storage");
        assert!(descriptor.is_required());
        assert!(!descriptor.is_optional());
        assert!(descriptor.starts_after().is_empty());
        assert!(descriptor.requires().is_empty());
        assert!(descriptor.enable_with().is_none());
        assert!(!descriptor.requires_elevated_privileges());
        assert!(descriptor.enabled_by_default());
    }

    #[test]
    fn test_requires_implies_starts_after() {
        let descriptor = FeatureDescriptor::builder()
            .name("server")
            .requires("logging")
            .starts_after("scheduler")
            .build();

        assert_eq!(descriptor.requires(), ["logging"]);
        assert_eq!(descriptor.starts_after(), ["logging", "scheduler"]);
    }

    #[test]
    fn test_duplicate_declarations_collapse() {
        let descriptor = FeatureDescriptor::builder()
            .name("server")
            .starts_after("logging")
            .requires("logging")
            .build();

        assert_eq!(descriptor.starts_after(), ["logging"]);
        assert_eq!(descriptor.requires(), ["logging"]);
    }

    #[test]
    #[should_panic(expected = "feature name is required")]
    fn test_build_without_name_panics() {
        let _ = FeatureDescriptor::builder().build();
    }

    #[test]
    #[should_panic(expected = "must not be empty")]
    fn test_build_with_empty_name_panics() {
        let _ = FeatureDescriptor::builder().name("").build();
    }
}
