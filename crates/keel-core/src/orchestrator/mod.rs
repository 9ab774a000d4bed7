//! Orchestrator module.
//!
//! The [`Orchestrator`] is the process-wide container that owns every
//! registered feature and drives the lifecycle:
//!
//! ```text
//! collect-options -> parse -> load-options -> validate-options
//!   -> enable propagation -> dependency setup -> daemonize -> prepare
//!   -> permanent privilege drop -> start -> wait -> stop
//! ```
//!
//! Forward phases abort on the first failure. The teardown phases (`stop`,
//! `begin-shutdown`) are best-effort so that as many features as possible
//! release their resources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{error, trace, warn};

use crate::dependency;
use crate::feature::{Feature, FeatureError};
use crate::options::{OptionValue, ParseOutcome, ProgramOptions, Section};
use crate::privilege::{NullPrivilegeHooks, PrivilegeController, PrivilegeHooks};
use crate::registry::{FeatureCell, FeatureRegistry, RegistryError};
use crate::shutdown::{DeliveryGuard, ShutdownSignal};

/// Qualified name of the hidden dependency-graph switch.
const DUMP_DEPENDENCIES: &str = "dump-dependencies";

/// Guards the one-orchestrator-per-process invariant.
static ORCHESTRATOR_LIVE: AtomicBool = AtomicBool::new(false);

/// The lifecycle phases the orchestrator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Features declare their options.
    CollectOptions,
    /// Features read parsed option values.
    LoadOptions,
    /// Features validate option combinations.
    ValidateOptions,
    /// Process-control work before preparation.
    Daemonize,
    /// Preparation under controlled privileges.
    Prepare,
    /// Features come alive; threads and sockets are allowed now.
    Start,
    /// Reverse-order teardown.
    Stop,
    /// Reverse-order shutdown notification.
    BeginShutdown,
}

impl Phase {
    /// The phase name as used in logs and diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CollectOptions => "collect-options",
            Self::LoadOptions => "load-options",
            Self::ValidateOptions => "validate-options",
            Self::Daemonize => "daemonize",
            Self::Prepare => "prepare",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::BeginShutdown => "begin-shutdown",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// A second orchestrator was constructed while one was still live.
    #[error("orchestrator constructed twice; exactly one may exist per process")]
    AlreadyExists,

    /// Registry-level usage error.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Option declaration or parsing error.
    #[error(transparent)]
    Options(#[from] crate::options::OptionsError),

    /// Dependency validation or ordering error.
    #[error(transparent)]
    Dependency(#[from] dependency::DependencyError),

    /// Privilege state machine violation or hook failure.
    #[error(transparent)]
    Privilege(#[from] crate::privilege::PrivilegeError),

    /// A feature's phase callback failed.
    #[error("{phase} failed for feature '{feature}'")]
    Phase {
        /// The phase that was running.
        phase: Phase,
        /// The feature whose callback failed.
        feature: String,
        /// The feature's error.
        #[source]
        source: FeatureError,
    },
}

fn phase_error(phase: Phase, cell: &FeatureCell, source: FeatureError) -> OrchestratorError {
    OrchestratorError::Phase {
        phase,
        feature: cell.name().to_string(),
        source,
    }
}

/// How a [`Orchestrator::run`] invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The full lifecycle ran and the server has stopped.
    Completed,
    /// Help text was printed; the process should exit successfully.
    Help,
    /// The dependency graph was printed; the process should exit
    /// successfully.
    DumpedDependencies,
}

/// Shared state reachable from signal-handling threads.
///
/// The ordered list is published once, after the final dependency setup, and
/// never mutated again.
#[derive(Debug, Default)]
struct ShutdownState {
    signal: ShutdownSignal,
    ordered: OnceLock<Vec<Arc<FeatureCell>>>,
    delivery: DeliveryGuard,
}

impl ShutdownState {
    fn begin_shutdown(&self) {
        // deliver the callbacks exactly once; raising the signal is
        // idempotent on its own
        if self.delivery.claim() {
            if let Some(ordered) = self.ordered.get() {
                for cell in ordered.iter().rev() {
                    if cell.is_enabled() {
                        trace!(feature = %cell.name(), "begin-shutdown");
                        cell.with_feature(|feature| feature.begin_shutdown());
                    }
                }
            }
        }
        self.signal.raise();
    }
}

/// A cloneable handle for requesting shutdown from other threads.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    state: Arc<ShutdownState>,
}

impl ShutdownHandle {
    /// Deliver begin-shutdown to every enabled feature (in reverse order, at
    /// most once process-wide) and raise the stop signal.
    pub fn begin_shutdown(&self) {
        self.state.begin_shutdown();
    }

    /// Whether the stop signal has been raised.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.state.signal.is_raised()
    }
}

/// The feature lifecycle orchestrator.
///
/// Exactly one orchestrator may be live per process; construction fails
/// while another instance exists. The orchestrator takes ownership of every
/// registered feature and destroys them when it is dropped.
#[derive(Debug)]
pub struct Orchestrator {
    registry: FeatureRegistry,
    options: ProgramOptions,
    ordered: Vec<Arc<FeatureCell>>,
    privileges: PrivilegeController,
    shutdown: Arc<ShutdownState>,
}

impl Orchestrator {
    /// Create the orchestrator around a prepared option set.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::AlreadyExists`] while another
    /// orchestrator is live in this process.
    pub fn new(options: ProgramOptions) -> Result<Self, OrchestratorError> {
        if ORCHESTRATOR_LIVE.swap(true, Ordering::SeqCst) {
            error!("orchestrator initialized twice");
            return Err(OrchestratorError::AlreadyExists);
        }
        Ok(Self {
            registry: FeatureRegistry::new(),
            options,
            ordered: Vec::new(),
            privileges: PrivilegeController::new(Box::new(NullPrivilegeHooks)),
            shutdown: Arc::new(ShutdownState::default()),
        })
    }

    /// Install host privilege hooks. Must happen before [`Self::run`].
    pub fn set_privilege_hooks(&mut self, hooks: Box<dyn PrivilegeHooks>) {
        self.privileges = PrivilegeController::new(hooks);
    }

    /// Register a feature. The orchestrator takes ownership.
    ///
    /// # Errors
    ///
    /// Fails on duplicate names and once the options have been sealed (the
    /// registry is read-only from then on).
    pub fn add(&mut self, feature: Box<dyn Feature>) -> Result<(), OrchestratorError> {
        if self.options.is_sealed() {
            let name = feature.descriptor().name().to_string();
            return Err(RegistryError::RegistrationClosed(name).into());
        }
        self.registry.add(feature)?;
        Ok(())
    }

    /// The feature registry.
    #[must_use]
    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    /// Whether the named feature is enabled.
    ///
    /// # Errors
    ///
    /// Fails with "unknown feature" for unregistered names.
    pub fn is_enabled(&self, name: &str) -> Result<bool, OrchestratorError> {
        Ok(self.registry.feature(name)?.is_enabled())
    }

    /// Whether the named feature is optional.
    ///
    /// # Errors
    ///
    /// Fails with "unknown feature" for unregistered names.
    pub fn is_optional(&self, name: &str) -> Result<bool, OrchestratorError> {
        Ok(self.registry.feature(name)?.descriptor().is_optional())
    }

    /// Whether the named feature is required.
    ///
    /// # Errors
    ///
    /// Fails with "unknown feature" for unregistered names.
    pub fn is_required(&self, name: &str) -> Result<bool, OrchestratorError> {
        Ok(self.registry.feature(name)?.descriptor().is_required())
    }

    /// Disable the named features. Unknown names are skipped.
    pub fn disable_features(&self, names: &[&str]) {
        for name in names {
            if let Some(cell) = self.registry.lookup(name) {
                cell.disable();
            }
        }
    }

    /// Force-disable the named features (sticky). Unknown names are skipped.
    pub fn force_disable_features(&self, names: &[&str]) {
        for name in names {
            if let Some(cell) = self.registry.lookup(name) {
                cell.force_disable();
            }
        }
    }

    /// The parsed option values as a structured document, with the given
    /// qualified option names omitted.
    ///
    /// # Errors
    ///
    /// Fails before the options are sealed.
    pub fn options(&self, excludes: &[&str]) -> Result<serde_json::Value, OrchestratorError> {
        Ok(self.options.to_document(excludes)?)
    }

    /// A handle for requesting shutdown from signal-handling threads.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: Arc::clone(&self.shutdown),
        }
    }

    /// Deliver begin-shutdown to every enabled feature in reverse order and
    /// raise the stop signal. Idempotent.
    pub fn begin_shutdown(&self) {
        trace!("begin-shutdown");
        self.shutdown.begin_shutdown();
    }

    /// Whether the stop signal has been raised.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.shutdown.signal.is_raised()
    }

    /// Log a fatal condition and abort.
    ///
    /// For feature authors hitting unrecoverable setup conditions; the
    /// panic carries the diagnostic and unwinds with a backtrace when
    /// enabled.
    pub fn fail(message: &str) -> ! {
        error!(reason = %message, "cannot proceed");
        panic!("cannot proceed: {message}");
    }

    /// Drive the full lifecycle.
    ///
    /// `argv` is the complete argument vector including the program name.
    /// Returns [`RunOutcome::Help`] or [`RunOutcome::DumpedDependencies`]
    /// after printing the respective text; the caller should exit
    /// successfully in both cases. Otherwise blocks until some thread calls
    /// [`Self::begin_shutdown`] (or a handle does) and then tears the
    /// features down.
    ///
    /// # Errors
    ///
    /// Setup errors, option errors, privilege violations and forward-phase
    /// callback failures abort the run.
    pub fn run(&mut self, argv: &[String]) -> Result<RunOutcome, OrchestratorError> {
        trace!("run");

        // all features are order-independent while collecting options
        self.collect_options()?;

        // provisional order; missing dependencies are tolerated until the
        // options have settled the enabled set
        self.setup_dependencies(false)?;

        match self.options.parse(argv)? {
            ParseOutcome::Help(text) => {
                print!("{text}");
                return Ok(RunOutcome::Help);
            }
            ParseOutcome::Proceed => {}
        }
        self.options.seal();

        if self.options.flag(DUMP_DEPENDENCIES)? {
            print!("{}", dependency::render_graph(&self.registry));
            return Ok(RunOutcome::DumpedDependencies);
        }

        self.load_options()?;
        self.validate_options()?;

        dependency::enable_automatic_features(&self.registry)?;
        self.setup_dependencies(true)?;
        // publish the final order for shutdown delivery; run() executes at
        // most once per orchestrator, so a second set attempt is a no-op
        let _ = self.shutdown.ordered.set(self.ordered.clone());

        self.daemonize()?;
        self.prepare()?;
        self.privileges.drop_permanently()?;
        self.start()?;
        self.wait();
        self.stop();

        Ok(RunOutcome::Completed)
    }

    fn collect_options(&mut self) -> Result<(), OrchestratorError> {
        trace!("collect-options");
        self.options
            .add_section(Section::new("", "Global configuration"))?;
        self.options.add_hidden_option(
            "",
            DUMP_DEPENDENCIES,
            "dump the feature dependency graph in dot format and exit",
            OptionValue::Flag(false),
        )?;

        let options = &mut self.options;
        for cell in self.registry.iter() {
            if !cell.is_enabled() {
                continue;
            }
            trace!(feature = %cell.name(), "collect-options");
            cell.with_feature_mut(|feature| feature.collect_options(options))
                .map_err(|source| phase_error(Phase::CollectOptions, cell, source))?;
        }
        Ok(())
    }

    fn setup_dependencies(&mut self, fail_on_missing: bool) -> Result<(), OrchestratorError> {
        trace!(fail_on_missing, "setup-dependencies");
        if fail_on_missing {
            dependency::check_requirements(&self.registry)?;
        }
        self.ordered = dependency::linearize(&self.registry)?;
        Ok(())
    }

    fn load_options(&mut self) -> Result<(), OrchestratorError> {
        trace!("load-options");
        let options = &self.options;
        for cell in &self.ordered {
            if !cell.is_enabled() {
                continue;
            }
            trace!(feature = %cell.name(), "load-options");
            cell.with_feature_mut(|feature| feature.load_options(options))
                .map_err(|source| phase_error(Phase::LoadOptions, cell, source))?;
        }
        Ok(())
    }

    fn validate_options(&mut self) -> Result<(), OrchestratorError> {
        trace!("validate-options");
        let options = &self.options;
        for cell in &self.ordered {
            if !cell.is_enabled() {
                continue;
            }
            trace!(feature = %cell.name(), "validate-options");
            cell.with_feature_mut(|feature| feature.validate_options(options))
                .map_err(|source| phase_error(Phase::ValidateOptions, cell, source))?;
        }
        Ok(())
    }

    fn daemonize(&mut self) -> Result<(), OrchestratorError> {
        trace!("daemonize");
        for cell in &self.ordered {
            if !cell.is_enabled() {
                continue;
            }
            trace!(feature = %cell.name(), "daemonize");
            cell.with_feature_mut(Feature::daemonize)
                .map_err(|source| phase_error(Phase::Daemonize, cell, source))?;
        }
        Ok(())
    }

    /// Prepare every feature, switching the privilege level to whatever the
    /// next feature declared. On failure the elevated state is restored
    /// before the error propagates so outer cleanup code observes a known
    /// privilege level.
    fn prepare(&mut self) -> Result<(), OrchestratorError> {
        trace!("prepare");
        let mut elevated = true;
        for cell in &self.ordered {
            if !cell.is_enabled() {
                continue;
            }
            let requires_elevated = cell.descriptor().requires_elevated_privileges();
            if requires_elevated != elevated {
                if requires_elevated {
                    self.privileges.raise_temporarily()?;
                } else {
                    self.privileges.drop_temporarily()?;
                }
                elevated = requires_elevated;
            }

            trace!(feature = %cell.name(), "prepare");
            if let Err(source) = cell.with_feature_mut(Feature::prepare) {
                if !elevated {
                    if let Err(raise_error) = self.privileges.raise_temporarily() {
                        warn!(
                            error = %raise_error,
                            "failed to restore elevated privileges after prepare failure"
                        );
                    }
                }
                return Err(phase_error(Phase::Prepare, cell, source));
            }
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), OrchestratorError> {
        trace!("start");
        let mut started: Vec<Arc<FeatureCell>> = Vec::with_capacity(self.ordered.len());
        for cell in &self.ordered {
            trace!(feature = %cell.name(), "start");
            match cell.with_feature_mut(Feature::start) {
                Ok(()) => started.push(Arc::clone(cell)),
                Err(source) => {
                    let err = phase_error(Phase::Start, cell, source);
                    // unwind the started prefix so stop still mirrors start
                    stop_features(&started);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn wait(&self) {
        trace!("wait");
        self.shutdown.signal.wait();
    }

    fn stop(&mut self) {
        trace!("stop");
        stop_features(&self.ordered);
    }
}

/// Stop the given features in reverse order, best-effort.
fn stop_features(cells: &[Arc<FeatureCell>]) {
    for cell in cells.iter().rev() {
        trace!(feature = %cell.name(), "stop");
        if let Err(error) = cell.with_feature_mut(Feature::stop) {
            warn!(feature = %cell.name(), error = %error, "stop failed; continuing");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        ORCHESTRATOR_LIVE.store(false, Ordering::SeqCst);
    }
}
