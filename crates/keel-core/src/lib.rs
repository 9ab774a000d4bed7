//! # keel-core
//!
//! Core library for keel - a feature lifecycle orchestrator for long-running
//! servers.
//!
//! A *feature* is a named subsystem (logging, storage, network listener, ...)
//! with declared dependencies and a set of lifecycle callbacks. The
//! [`Orchestrator`] owns all registered features, resolves a linear start
//! order from their `starts_after` declarations, drives them through a fixed
//! phase sequence, and coordinates privileged setup work with a subsequent
//! permanent privilege drop.
//!
//! ## Features
//!
//! - **Feature contract**: declarative dependencies plus no-op-by-default
//!   phase callbacks
//! - **Dependency resolution**: enable/disable propagation and a
//!   deterministic linearization with cycle rejection
//! - **Phase execution**: forward phases are fatal, teardown phases are
//!   best-effort
//! - **Privilege discipline**: temporary raise/drop during `prepare`, then a
//!   one-way permanent drop before `start`
//! - **Prompt shutdown**: condition-variable based stop signal deliverable
//!   from signal-handling threads
//!
//! ## Example
//!
//! ```rust,no_run
//! use keel_core::options::ProgramOptions;
//! use keel_core::orchestrator::Orchestrator;
//!
//! let options = ProgramOptions::new("keeld", "an example server");
//! let mut orchestrator = Orchestrator::new(options).expect("one per process");
//! // orchestrator.add(Box::new(MyFeature::new()))?;
//! let argv: Vec<String> = std::env::args().collect();
//! orchestrator.run(&argv).expect("lifecycle failed");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod dependency;
pub mod feature;
pub mod options;
pub mod orchestrator;
pub mod privilege;
pub mod registry;
pub mod shutdown;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::feature::{Feature, FeatureDescriptor, FeatureError};
    pub use crate::options::{OptionValue, ProgramOptions, Section};
    pub use crate::orchestrator::{Orchestrator, RunOutcome, ShutdownHandle};
    pub use crate::privilege::PrivilegeHooks;
    pub use crate::shutdown::ShutdownSignal;
}

/// Re-export commonly used types at the crate root.
pub use feature::{Feature, FeatureDescriptor};
pub use options::ProgramOptions;
pub use orchestrator::{Orchestrator, RunOutcome};
pub use registry::FeatureRegistry;
pub use shutdown::ShutdownSignal;
