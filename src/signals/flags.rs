/*!
 * Sigaction Flags
 * Bit-set over the `sa_flags` a disposition can carry
 */

use bitflags::bitflags;
use nix::libc::{self, c_int};

bitflags! {
    /// Flags of a signal disposition, as listed in `sigaction(2)`
    ///
    /// Bits the crate does not know about (e.g. `SA_RESTORER`, set behind the
    /// program's back by glibc) are dropped when reading from the OS.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SigactionFlags: c_int {
        /// For `SIGCHLD`: only notify when a child exits, not when it stops
        const NO_CHILD_STOP = libc::SA_NOCLDSTOP as c_int;
        /// For `SIGCHLD`: do not turn exited children into zombies
        const NO_CHILD_WAIT = libc::SA_NOCLDWAIT as c_int;
        /// Run the handler on the alternate stack set with `sigaltstack(2)`
        const ON_STACK = libc::SA_ONSTACK as c_int;
        /// Do not mask the signal while its handler runs
        const NO_DEFER = libc::SA_NODEFER as c_int;
        /// Reset the disposition to default when the signal is delivered
        const RESET_HANDLER = libc::SA_RESETHAND as c_int;
        /// Restart interruptible system calls after the handler returns
        const RESTART = libc::SA_RESTART as c_int;
        /// The handler takes `(signal, siginfo, context)`.
        /// Must not be set together with the ignore or default handlers.
        const SIGINFO = libc::SA_SIGINFO as c_int;
    }
}

impl SigactionFlags {
    /// Flags from the raw `sa_flags` of the OS, unknown bits dropped
    #[inline]
    pub fn from_raw(raw: c_int) -> Self {
        Self::from_bits_truncate(raw)
    }
}
