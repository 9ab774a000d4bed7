//! Unix privilege hooks.
//!
//! Host side of the privilege controller. Transitions are armed when keeld
//! runs with an effective uid of root but a non-root real uid (setuid
//! execution, sudo): temporary transitions switch the effective ids back and
//! forth, the permanent drop discards the saved root ids entirely. In every
//! other credential constellation the hooks are inert.

use keel_core::privilege::{PrivilegeError, PrivilegeHooks};
use nix::unistd::{getegid, geteuid, getgid, getuid, setegid, seteuid, setgid, setuid, Gid, Uid};
use tracing::debug;

/// Privilege hooks backed by the setuid/seteuid family.
#[derive(Debug, Clone, Copy)]
pub struct UnixPrivilegeHooks {
    /// Unprivileged identity to drop to; `None` keeps the hooks inert.
    target: Option<(Uid, Gid)>,
    elevated: (Uid, Gid),
}

impl UnixPrivilegeHooks {
    /// Inspect the process credentials and arm the transitions if the
    /// process can actually change identity.
    pub fn detect() -> Self {
        let elevated = (geteuid(), getegid());
        let real = (getuid(), getgid());
        let target = (elevated.0.is_root() && !real.0.is_root()).then_some(real);
        Self { target, elevated }
    }
}

fn hook_error(errno: nix::errno::Errno) -> PrivilegeError {
    PrivilegeError::Hook(errno.to_string())
}

impl PrivilegeHooks for UnixPrivilegeHooks {
    fn raise_privileges(&self) -> Result<(), PrivilegeError> {
        if self.target.is_some() {
            // the saved set-user-id is still root, so seteuid may go back up;
            // uid first, the gid change needs the restored privileges
            seteuid(self.elevated.0).map_err(hook_error)?;
            setegid(self.elevated.1).map_err(hook_error)?;
            debug!("raised effective privileges");
        }
        Ok(())
    }

    fn drop_privileges(&self) -> Result<(), PrivilegeError> {
        if let Some((uid, gid)) = self.target {
            setegid(gid).map_err(hook_error)?;
            seteuid(uid).map_err(hook_error)?;
            debug!(uid = uid.as_raw(), gid = gid.as_raw(), "dropped effective privileges");
        }
        Ok(())
    }

    fn drop_privileges_permanently(&self) -> Result<(), PrivilegeError> {
        if let Some((uid, gid)) = self.target {
            setgid(gid).map_err(hook_error)?;
            setuid(uid).map_err(hook_error)?;
            debug!(uid = uid.as_raw(), gid = gid.as_raw(), "dropped privileges permanently");
        }
        Ok(())
    }
}
