//! Log configuration feature.
//!
//! Declares the `log.level` option and installs the global `tracing`
//! subscriber during `prepare`. Every other feature starts after this one so
//! their startup logs are already filtered correctly.

use keel_core::feature::{Feature, FeatureDescriptor, FeatureError};
use keel_core::options::{OptionValue, ProgramOptions, Section};
use tracing_subscriber::EnvFilter;

/// Feature name other features reference in `starts_after`.
pub const NAME: &str = "logging";

/// Configures process-wide logging.
pub struct LogFeature {
    level: String,
}

impl LogFeature {
    /// Create the feature with the default level.
    pub fn new() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Feature for LogFeature {
    fn descriptor(&self) -> FeatureDescriptor {
        FeatureDescriptor::builder().name(NAME).build()
    }

    fn collect_options(&mut self, options: &mut ProgramOptions) -> Result<(), FeatureError> {
        options.add_section(Section::new("log", "Log configuration"))?;
        options.add_option(
            "log",
            "level",
            "log level or tracing filter directive",
            OptionValue::Text("info".to_string()),
        )?;
        Ok(())
    }

    fn load_options(&mut self, options: &ProgramOptions) -> Result<(), FeatureError> {
        self.level = options.text("log.level")?.to_string();
        Ok(())
    }

    fn validate_options(&mut self, options: &ProgramOptions) -> Result<(), FeatureError> {
        let level = options.text("log.level")?;
        EnvFilter::try_new(level)
            .map_err(|error| format!("invalid log level '{level}': {error}"))?;
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), FeatureError> {
        let filter = EnvFilter::try_new(&self.level)?;
        tracing_subscriber::fmt().with_env_filter(filter).try_init()?;
        Ok(())
    }
}
