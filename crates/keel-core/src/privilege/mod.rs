//! Privilege transition module.
//!
//! The controller mediates temporary raise/drop transitions during the
//! prepare phase and the one permanent drop that precedes `start`. The
//! actual OS calls are behind the [`PrivilegeHooks`] trait; the controller
//! only enforces the state machine, in particular that the permanent drop is
//! irreversible for the lifetime of the process.

use tracing::trace;

/// Privilege state machine errors. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum PrivilegeError {
    /// A temporary raise was attempted after the permanent drop.
    #[error("must not raise privileges after dropping them permanently")]
    RaiseAfterPermanentDrop,

    /// A temporary drop was attempted after the permanent drop.
    #[error("must not drop privileges after dropping them permanently")]
    DropAfterPermanentDrop,

    /// The host-provided hook failed.
    #[error("changing process privileges failed: {0}")]
    Hook(String),
}

/// Host-provided privilege mechanics.
///
/// Implementations perform the actual OS transitions (`seteuid`/`setuid`
/// equivalents). They are only ever invoked in a legal state; the controller
/// rejects calls after the permanent drop before they reach the hooks.
pub trait PrivilegeHooks: Send + Sync {
    /// Raise effective privileges back to the elevated state.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::Hook`] when the OS transition fails.
    fn raise_privileges(&self) -> Result<(), PrivilegeError>;

    /// Drop effective privileges, reversibly.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::Hook`] when the OS transition fails.
    fn drop_privileges(&self) -> Result<(), PrivilegeError>;

    /// Drop privileges for good; there is no way back afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::Hook`] when the OS transition fails.
    fn drop_privileges_permanently(&self) -> Result<(), PrivilegeError>;
}

/// Hooks that do nothing. Used when the process does not manage OS
/// privileges at all; the state machine is still enforced.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPrivilegeHooks;

impl PrivilegeHooks for NullPrivilegeHooks {
    fn raise_privileges(&self) -> Result<(), PrivilegeError> {
        Ok(())
    }

    fn drop_privileges(&self) -> Result<(), PrivilegeError> {
        Ok(())
    }

    fn drop_privileges_permanently(&self) -> Result<(), PrivilegeError> {
        Ok(())
    }
}

/// Enforces the privilege transition discipline on top of a set of hooks.
pub struct PrivilegeController {
    hooks: Box<dyn PrivilegeHooks>,
    dropped: bool,
}

impl PrivilegeController {
    /// Create a controller over the given hooks. The process starts out in
    /// the elevated state.
    #[must_use]
    pub fn new(hooks: Box<dyn PrivilegeHooks>) -> Self {
        Self {
            hooks,
            dropped: false,
        }
    }

    /// Whether the permanent drop has happened.
    #[must_use]
    pub const fn privileges_dropped(&self) -> bool {
        self.dropped
    }

    /// Temporarily raise privileges.
    ///
    /// # Errors
    ///
    /// Fatal [`PrivilegeError::RaiseAfterPermanentDrop`] once the permanent
    /// drop has happened; hook failures are passed through.
    pub fn raise_temporarily(&mut self) -> Result<(), PrivilegeError> {
        if self.dropped {
            return Err(PrivilegeError::RaiseAfterPermanentDrop);
        }
        trace!("raising privileges");
        self.hooks.raise_privileges()
    }

    /// Temporarily drop privileges.
    ///
    /// # Errors
    ///
    /// Fatal [`PrivilegeError::DropAfterPermanentDrop`] once the permanent
    /// drop has happened; hook failures are passed through.
    pub fn drop_temporarily(&mut self) -> Result<(), PrivilegeError> {
        if self.dropped {
            return Err(PrivilegeError::DropAfterPermanentDrop);
        }
        trace!("dropping privileges");
        self.hooks.drop_privileges()
    }

    /// Permanently drop privileges. One-way: any later raise or drop call
    /// fails without touching the hooks.
    ///
    /// # Errors
    ///
    /// Fatal [`PrivilegeError::DropAfterPermanentDrop`] when called twice;
    /// hook failures are passed through.
    pub fn drop_permanently(&mut self) -> Result<(), PrivilegeError> {
        if self.dropped {
            return Err(PrivilegeError::DropAfterPermanentDrop);
        }
        self.dropped = true;
        trace!("dropping privileges permanently");
        self.hooks.drop_privileges_permanently()
    }
}

impl std::fmt::Debug for PrivilegeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegeController")
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, PoisonError};

    use super::*;

    /// Records every hook invocation; shared with the test through an `Arc`.
    #[derive(Debug, Clone, Default)]
    struct RecordingHooks {
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl RecordingHooks {
        fn calls(&self) -> Vec<&'static str> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn record(&self, call: &'static str) {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(call);
        }
    }

    impl PrivilegeHooks for RecordingHooks {
        fn raise_privileges(&self) -> Result<(), PrivilegeError> {
            self.record("raise");
            Ok(())
        }

        fn drop_privileges(&self) -> Result<(), PrivilegeError> {
            self.record("drop");
            Ok(())
        }

        fn drop_privileges_permanently(&self) -> Result<(), PrivilegeError> {
            self.record("drop-permanently");
            Ok(())
        }
    }

    #[test]
    fn test_temporary_transitions_reach_hooks() {
        let hooks = RecordingHooks::default();
        let mut controller = PrivilegeController::new(Box::new(hooks.clone()));

        controller.drop_temporarily().unwrap();
        controller.raise_temporarily().unwrap();
        controller.drop_temporarily().unwrap();

        assert_eq!(hooks.calls(), ["drop", "raise", "drop"]);
        assert!(!controller.privileges_dropped());
    }

    #[test]
    fn test_permanent_drop_is_one_way() {
        let hooks = RecordingHooks::default();
        let mut controller = PrivilegeController::new(Box::new(hooks.clone()));

        controller.drop_permanently().unwrap();
        assert!(controller.privileges_dropped());

        let err = controller.raise_temporarily().unwrap_err();
        assert_eq!(
            err.to_string(),
            "must not raise privileges after dropping them permanently"
        );
        let err = controller.drop_temporarily().unwrap_err();
        assert_eq!(
            err.to_string(),
            "must not drop privileges after dropping them permanently"
        );
        assert!(controller.drop_permanently().is_err());

        // rejected calls never reach the hooks and the flag stays set
        assert_eq!(hooks.calls(), ["drop-permanently"]);
        assert!(controller.privileges_dropped());
    }
}
