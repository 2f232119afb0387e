//! Small platform helpers.

/// True when running with root privileges.
#[cfg(unix)]
pub fn is_root() -> bool {
    #[allow(unsafe_code)]
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    euid == 0
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}
