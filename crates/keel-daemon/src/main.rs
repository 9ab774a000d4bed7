//! keeld - demonstration daemon built on the keel feature orchestrator.
//!
//! Wires a handful of concrete features into the orchestrator, blocks the
//! shutdown signals in every thread, and forwards SIGINT/SIGTERM to
//! [`keel_core::orchestrator::ShutdownHandle::begin_shutdown`] from a
//! dedicated signal thread. The run loop itself stays on the main thread.

mod features;
mod privileges;

use std::process::ExitCode;

use anyhow::Context;
use keel_core::options::ProgramOptions;
use keel_core::orchestrator::{Orchestrator, RunOutcome};
use nix::sys::signal::{SigSet, Signal};
use tracing::info;

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    match run(&argv) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("keeld: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(argv: &[String]) -> anyhow::Result<()> {
    let options = ProgramOptions::new("keeld", "feature-oriented server skeleton");
    let mut orchestrator = Orchestrator::new(options)?;
    orchestrator.set_privilege_hooks(Box::new(privileges::UnixPrivilegeHooks::detect()));

    orchestrator.add(Box::new(features::LogFeature::new()))?;
    orchestrator.add(Box::new(features::WorkerFeature::new()))?;

    // block the shutdown signals process-wide before any thread exists, so
    // only the dedicated signal thread ever observes them
    let mut signals = SigSet::empty();
    signals.add(Signal::SIGINT);
    signals.add(Signal::SIGTERM);
    signals
        .thread_block()
        .context("failed to block shutdown signals")?;

    let handle = orchestrator.shutdown_handle();
    std::thread::spawn(move || {
        if let Ok(signal) = signals.wait() {
            info!(signal = ?signal, "received shutdown signal");
            handle.begin_shutdown();
        }
    });

    match orchestrator.run(argv)? {
        RunOutcome::Completed => info!("keeld stopped"),
        RunOutcome::Help | RunOutcome::DumpedDependencies => {}
    }
    Ok(())
}
