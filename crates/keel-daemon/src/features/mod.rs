//! Concrete features wired into keeld.

pub mod log;
pub mod worker;

pub use log::LogFeature;
pub use worker::WorkerFeature;
