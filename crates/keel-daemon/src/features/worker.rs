//! Heartbeat worker feature.
//!
//! Demonstrates the concurrency contract: the worker thread is spawned in
//! `start`, told to wind down from `begin_shutdown` (possibly on a signal
//! thread), and joined in `stop`.

use std::thread::JoinHandle;
use std::time::Duration;

use keel_core::feature::{Feature, FeatureDescriptor, FeatureError};
use keel_core::options::{OptionValue, ProgramOptions, Section};
use keel_core::shutdown::ShutdownSignal;
use tracing::info;

/// Feature name.
pub const NAME: &str = "worker";

/// Periodic heartbeat worker.
pub struct WorkerFeature {
    interval: Duration,
    stop: ShutdownSignal,
    worker: Option<JoinHandle<()>>,
}

impl WorkerFeature {
    /// Create the feature with the default heartbeat interval.
    pub fn new() -> Self {
        Self {
            interval: Duration::from_secs(30),
            stop: ShutdownSignal::new(),
            worker: None,
        }
    }
}

impl Feature for WorkerFeature {
    fn descriptor(&self) -> FeatureDescriptor {
        FeatureDescriptor::builder()
            .name(NAME)
            .starts_after(super::log::NAME)
            .build()
    }

    fn collect_options(&mut self, options: &mut ProgramOptions) -> Result<(), FeatureError> {
        options.add_section(Section::new("worker", "Worker configuration"))?;
        options.add_option(
            "worker",
            "interval",
            "seconds between heartbeats",
            OptionValue::Integer(30),
        )?;
        Ok(())
    }

    fn load_options(&mut self, options: &ProgramOptions) -> Result<(), FeatureError> {
        let seconds = options.integer("worker.interval")?;
        let seconds = u64::try_from(seconds)
            .ok()
            .filter(|&seconds| seconds > 0)
            .ok_or_else(|| format!("worker.interval must be positive, got {seconds}"))?;
        self.interval = Duration::from_secs(seconds);
        Ok(())
    }

    fn start(&mut self) -> Result<(), FeatureError> {
        let interval = self.interval;
        let stop = self.stop.clone();
        let worker = std::thread::Builder::new()
            .name("keeld-worker".to_string())
            .spawn(move || {
                while !stop.wait_timeout(interval) {
                    info!("heartbeat");
                }
            })?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FeatureError> {
        // begin_shutdown usually raised this already; stop must not rely on it
        self.stop.raise();
        if let Some(worker) = self.worker.take() {
            worker.join().map_err(|_| "worker thread panicked")?;
        }
        Ok(())
    }

    fn begin_shutdown(&self) {
        self.stop.raise();
    }
}
