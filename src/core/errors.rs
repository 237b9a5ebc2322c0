/*!
 * Error Types
 * Signal disposition errors with thiserror and miette support
 */

use miette::Diagnostic;
use nix::errno::Errno;
use thiserror::Error;

/// Signal operation result
pub type SignalResult<T> = Result<T, SignalError>;

/// Errors raised while reading or mutating the signal state of the process
///
/// Only two kinds exist. The distinction callers care about is whether the
/// process-wide disposition table (or a thread mask) may now differ from what
/// they believe it is.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Diagnostic)]
pub enum SignalError {
    /// The system call failed before this operation changed any OS state.
    #[error("System call failed, no signal state was modified: {0}")]
    #[diagnostic(
        code(signal::non_destructive),
        help("Nothing was changed. The operation can be retried or abandoned.")
    )]
    NonDestructive(Errno),

    /// A system call failed after an earlier step of the same operation
    /// already modified OS-visible signal state.
    #[error("System call failed after signal state was modified: {0}")]
    #[diagnostic(
        code(signal::destructive),
        help("Signal dispositions or masks may be inconsistent. Consider aborting the process.")
    )]
    Destructive(Errno),
}

impl SignalError {
    /// Upgrade to a destructive error
    ///
    /// Used when a step fails downstream of a step that already mutated state.
    #[must_use]
    pub fn upgrade_to_destructive(self) -> Self {
        match self {
            SignalError::NonDestructive(errno) => SignalError::Destructive(errno),
            destructive @ SignalError::Destructive(_) => destructive,
        }
    }

    /// Whether the signal state may be inconsistent after this error
    #[inline]
    pub fn is_destructive(&self) -> bool {
        matches!(self, SignalError::Destructive(_))
    }

    /// Underlying errno value
    #[inline]
    pub fn errno(&self) -> Errno {
        match self {
            SignalError::NonDestructive(errno) | SignalError::Destructive(errno) => *errno,
        }
    }
}

/// Convenience for mapping raw `nix` results
pub(crate) trait ErrnoExt<T> {
    fn non_destructive(self) -> SignalResult<T>;
    fn destructive(self) -> SignalResult<T>;
}

impl<T> ErrnoExt<T> for nix::Result<T> {
    #[inline]
    fn non_destructive(self) -> SignalResult<T> {
        self.map_err(SignalError::NonDestructive)
    }

    #[inline]
    fn destructive(self) -> SignalResult<T> {
        self.map_err(SignalError::Destructive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_to_destructive() {
        let err = SignalError::NonDestructive(Errno::EINVAL);
        assert!(!err.is_destructive());

        let upgraded = err.upgrade_to_destructive();
        assert_eq!(upgraded, SignalError::Destructive(Errno::EINVAL));
        assert!(upgraded.is_destructive());

        // Already destructive errors are left alone
        assert_eq!(upgraded.upgrade_to_destructive(), upgraded);
    }

    #[test]
    fn test_errno_accessor() {
        assert_eq!(SignalError::Destructive(Errno::EPERM).errno(), Errno::EPERM);
        assert_eq!(SignalError::NonDestructive(Errno::EFAULT).errno(), Errno::EFAULT);
    }

    #[test]
    fn test_errno_ext_mapping() {
        let failed: nix::Result<()> = Err(Errno::EAGAIN);
        assert_eq!(
            failed.non_destructive(),
            Err(SignalError::NonDestructive(Errno::EAGAIN))
        );
        assert_eq!(failed.destructive(), Err(SignalError::Destructive(Errno::EAGAIN)));

        let ok: nix::Result<u8> = Ok(3);
        assert_eq!(ok.destructive(), Ok(3));
    }
}
