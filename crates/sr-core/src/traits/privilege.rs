//! Privilege checks

/// Answers whether the process may reconfigure system routing
pub trait PrivilegeProbe: Send + Sync {
    /// True when running with elevated privileges
    fn is_elevated(&self) -> bool;
}

/// Privilege probe backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPrivileges;

impl PrivilegeProbe for SystemPrivileges {
    #[cfg(unix)]
    fn is_elevated(&self) -> bool {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    fn is_elevated(&self) -> bool {
        false
    }
}
