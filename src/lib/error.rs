// SPDX-License-Identifier: Apache-2.0

// Try not implement From for RouterError here unless you are sure this
// error should always convert to a certain errno.

use nix::errno::Errno;

/// Error surfaced to the caller of an API request. Carries the errno the
/// error taxonomy (validation/conflict/not-found/busy/resource/driver) maps
/// onto, so the API dispatcher never has to re-derive it from a message
/// string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterError {
    pub errno: Errno,
    pub msg: String,
}

impl RouterError {
    pub fn new(errno: Errno, msg: impl Into<String>) -> Self {
        Self {
            errno,
            msg: msg.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(Errno::EINVAL, msg)
    }

    pub fn exists(msg: impl Into<String>) -> Self {
        Self::new(Errno::EEXIST, msg)
    }

    pub fn addr_in_use(msg: impl Into<String>) -> Self {
        Self::new(Errno::EADDRINUSE, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(Errno::ENOENT, msg)
    }

    pub fn no_device(msg: impl Into<String>) -> Self {
        Self::new(Errno::ENODEV, msg)
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::new(Errno::EBUSY, msg)
    }

    pub fn no_memory(msg: impl Into<String>) -> Self {
        Self::new(Errno::ENOMEM, msg)
    }

    pub fn net_unreachable(msg: impl Into<String>) -> Self {
        Self::new(Errno::ENETUNREACH, msg)
    }

    pub fn no_support(msg: impl Into<String>) -> Self {
        Self::new(Errno::ENOTSUP, msg)
    }

    /// Transparent pass-through of a NIC driver error code.
    pub fn driver(errno: Errno, msg: impl Into<String>) -> Self {
        Self::new(errno, msg)
    }

    pub fn bug(msg: impl Into<String>) -> Self {
        Self::new(Errno::EIO, msg)
    }

    /// True for the pair of driver errors spec.md treats as best-effort:
    /// VLAN/MAC filter operations a PMD simply doesn't implement.
    pub fn is_best_effort(&self) -> bool {
        matches!(self.errno, Errno::ENOTSUP | Errno::ENOSYS)
    }
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.msg, self.errno)
    }
}

impl std::error::Error for RouterError {}

pub type Result<T> = std::result::Result<T, RouterError>;
