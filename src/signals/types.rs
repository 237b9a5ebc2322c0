/*!
 * Signal Types
 * POSIX signal identity and signal set conversions
 */

use crate::core::limits::NSIG;
use crate::core::sys;
use nix::libc::{self, c_int, sigset_t};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A set of signals
pub type SignalSet = BTreeSet<Signal>;

/// A POSIX signal number in `[1, NSIG)`
///
/// Not an enum so that signals the crate has no name for (realtime signals)
/// stay representable. Numbers are the platform's own, never translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "c_int", into = "c_int")]
pub struct Signal(c_int);

impl Signal {
    // ------------------------------------------------------------------------
    // Program error signals
    // ------------------------------------------------------------------------

    /// Any arithmetic error, despite the floating point name
    pub const ARITHMETIC_ERROR: Signal = Signal(libc::SIGFPE);
    pub const ILLEGAL_INSTRUCTION: Signal = Signal(libc::SIGILL);
    pub const SEGMENTATION_FAULT: Signal = Signal(libc::SIGSEGV);
    pub const BUS_ERROR: Signal = Signal(libc::SIGBUS);
    pub const ABORT_TRAP: Signal = Signal(libc::SIGABRT);
    /// Usually the same number as `ABORT_TRAP`
    pub const IOT: Signal = Signal(libc::SIGIOT);
    pub const TRACE_BREAKPOINT_TRAP: Signal = Signal(libc::SIGTRAP);
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    pub const EMULATOR_TRAP: Signal = Signal(libc::SIGEMT);
    pub const BAD_SYSTEM_CALL: Signal = Signal(libc::SIGSYS);

    // ------------------------------------------------------------------------
    // Termination signals
    // ------------------------------------------------------------------------

    /// "Normal" kill signal
    pub const TERMINATED: Signal = Signal(libc::SIGTERM);
    /// Usually Ctrl-C
    pub const INTERRUPT: Signal = Signal(libc::SIGINT);
    /// Usually Ctrl-\, quits with a core dump
    pub const QUIT: Signal = Signal(libc::SIGQUIT);
    /// Cannot be caught, blocked or ignored
    pub const KILLED: Signal = Signal(libc::SIGKILL);
    /// The user's terminal disconnected
    pub const HANGUP: Signal = Signal(libc::SIGHUP);

    // ------------------------------------------------------------------------
    // Alarm signals
    // ------------------------------------------------------------------------

    pub const ALARM_CLOCK: Signal = Signal(libc::SIGALRM);
    pub const VIRTUAL_TIMER_EXPIRED: Signal = Signal(libc::SIGVTALRM);
    pub const PROFILING_TIMER_EXPIRED: Signal = Signal(libc::SIGPROF);

    // ------------------------------------------------------------------------
    // Asynchronous I/O signals
    // ------------------------------------------------------------------------

    pub const IO_POSSIBLE: Signal = Signal(libc::SIGIO);
    pub const URGENT_IO_CONDITION: Signal = Signal(libc::SIGURG);

    // ------------------------------------------------------------------------
    // Job control signals
    // ------------------------------------------------------------------------

    pub const CHILD_EXITED: Signal = Signal(libc::SIGCHLD);
    pub const CONTINUED: Signal = Signal(libc::SIGCONT);
    /// Suspends the program. Cannot be handled, ignored or blocked.
    pub const SUSPENDED_BY_SIGNAL: Signal = Signal(libc::SIGSTOP);
    /// Suspends the program but can be handled and ignored. Usually Ctrl-Z.
    pub const SUSPENDED: Signal = Signal(libc::SIGTSTP);
    pub const STOPPED_TTY_INPUT: Signal = Signal(libc::SIGTTIN);
    pub const STOPPED_TTY_OUTPUT: Signal = Signal(libc::SIGTTOU);

    // ------------------------------------------------------------------------
    // Operation error signals
    // ------------------------------------------------------------------------

    pub const BROKEN_PIPE: Signal = Signal(libc::SIGPIPE);
    pub const CPU_TIME_LIMIT_EXCEEDED: Signal = Signal(libc::SIGXCPU);
    pub const FILE_SIZE_LIMIT_EXCEEDED: Signal = Signal(libc::SIGXFSZ);

    // ------------------------------------------------------------------------
    // Miscellaneous signals
    // ------------------------------------------------------------------------

    pub const USER_DEFINED_1: Signal = Signal(libc::SIGUSR1);
    pub const USER_DEFINED_2: Signal = Signal(libc::SIGUSR2);
    pub const WINDOW_SIZE_CHANGES: Signal = Signal(libc::SIGWINCH);
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    pub const INFORMATION_REQUEST: Signal = Signal(libc::SIGINFO);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub const POWER_FAILURE: Signal = Signal(libc::SIGPWR);

    /// Create a signal from its raw number
    ///
    /// Returns `None` outside of `[1, NSIG)`. Signal 0 only exists to probe
    /// whether a process can be signalled, it is never a valid identity.
    pub const fn new(raw: c_int) -> Option<Self> {
        if raw >= 1 && raw < NSIG {
            Some(Signal(raw))
        } else {
            None
        }
    }

    /// Raw signal number
    #[inline]
    pub const fn raw(self) -> c_int {
        self.0
    }

    /// Every signal number of the platform
    pub fn all() -> impl Iterator<Item = Signal> {
        (1..NSIG).map(Signal)
    }

    /// `SIGKILL` and `SIGSTOP` never reach user code, so they cannot be delayed
    pub const fn is_delayable(self) -> bool {
        self.0 != libc::SIGKILL && self.0 != libc::SIGSTOP
    }

    /// Whether the default action drops the signal without running anything
    ///
    /// `SIGCONT` is part of it: resuming a stopped process is its only effect.
    pub const fn is_discarded_by_default(self) -> bool {
        match self.0 {
            libc::SIGCHLD | libc::SIGCONT | libc::SIGURG | libc::SIGWINCH => true,
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            libc::SIGIO | libc::SIGINFO => true,
            _ => false,
        }
    }

    /// Short uppercase name without the `SIG` prefix, e.g. `TERM`
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            libc::SIGHUP => "HUP",
            libc::SIGINT => "INT",
            libc::SIGQUIT => "QUIT",
            libc::SIGILL => "ILL",
            libc::SIGTRAP => "TRAP",
            libc::SIGABRT => "ABRT",
            libc::SIGBUS => "BUS",
            libc::SIGFPE => "FPE",
            libc::SIGKILL => "KILL",
            libc::SIGUSR1 => "USR1",
            libc::SIGSEGV => "SEGV",
            libc::SIGUSR2 => "USR2",
            libc::SIGPIPE => "PIPE",
            libc::SIGALRM => "ALRM",
            libc::SIGTERM => "TERM",
            libc::SIGCHLD => "CHLD",
            libc::SIGCONT => "CONT",
            libc::SIGSTOP => "STOP",
            libc::SIGTSTP => "TSTP",
            libc::SIGTTIN => "TTIN",
            libc::SIGTTOU => "TTOU",
            libc::SIGURG => "URG",
            libc::SIGXCPU => "XCPU",
            libc::SIGXFSZ => "XFSZ",
            libc::SIGVTALRM => "VTALRM",
            libc::SIGPROF => "PROF",
            libc::SIGWINCH => "WINCH",
            libc::SIGIO => "IO",
            libc::SIGSYS => "SYS",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            libc::SIGPWR => "PWR",
            #[cfg(any(target_os = "linux", target_os = "android"))]
            libc::SIGSTKFLT => "STKFLT",
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            libc::SIGEMT => "EMT",
            #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
            libc::SIGINFO => "INFO",
            _ => return None,
        };
        Some(name)
    }

    // ========================================================================
    // Named groups
    // ========================================================================

    /// Hand-picked signals worth forwarding to a child process
    ///
    /// Not a system notion. Check it suits your needs before relying on it.
    pub fn to_forward_to_subprocesses() -> SignalSet {
        SignalSet::from([
            Signal::TERMINATED,
            Signal::INTERRUPT,
            Signal::QUIT,
            Signal::HANGUP,
            Signal::SUSPENDED,
            Signal::CONTINUED,
        ])
    }

    pub fn program_error_signals() -> SignalSet {
        #[allow(unused_mut)]
        let mut set = SignalSet::from([
            Signal::ARITHMETIC_ERROR,
            Signal::ILLEGAL_INSTRUCTION,
            Signal::SEGMENTATION_FAULT,
            Signal::BUS_ERROR,
            Signal::ABORT_TRAP,
            Signal::IOT,
            Signal::TRACE_BREAKPOINT_TRAP,
            Signal::BAD_SYSTEM_CALL,
        ]);
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        set.insert(Signal::EMULATOR_TRAP);
        set
    }

    pub fn termination_signals() -> SignalSet {
        SignalSet::from([
            Signal::TERMINATED,
            Signal::INTERRUPT,
            Signal::QUIT,
            Signal::KILLED,
            Signal::HANGUP,
        ])
    }

    pub fn alarm_signals() -> SignalSet {
        SignalSet::from([
            Signal::ALARM_CLOCK,
            Signal::VIRTUAL_TIMER_EXPIRED,
            Signal::PROFILING_TIMER_EXPIRED,
        ])
    }

    pub fn asynchronous_io_signals() -> SignalSet {
        SignalSet::from([Signal::IO_POSSIBLE, Signal::URGENT_IO_CONDITION])
    }

    pub fn job_control_signals() -> SignalSet {
        SignalSet::from([
            Signal::CHILD_EXITED,
            Signal::CONTINUED,
            Signal::SUSPENDED_BY_SIGNAL,
            Signal::SUSPENDED,
            Signal::STOPPED_TTY_INPUT,
            Signal::STOPPED_TTY_OUTPUT,
        ])
    }

    pub fn operation_error_signals() -> SignalSet {
        SignalSet::from([
            Signal::BROKEN_PIPE,
            Signal::CPU_TIME_LIMIT_EXCEEDED,
            Signal::FILE_SIZE_LIMIT_EXCEEDED,
        ])
    }

    pub fn miscellaneous_signals() -> SignalSet {
        #[allow(unused_mut)]
        let mut set = SignalSet::from([
            Signal::USER_DEFINED_1,
            Signal::USER_DEFINED_2,
            Signal::WINDOW_SIZE_CHANGES,
        ]);
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        set.insert(Signal::INFORMATION_REQUEST);
        set
    }

    // ========================================================================
    // OS mask conversions
    // ========================================================================

    /// OS mask containing only this signal
    pub fn sigset(self) -> sigset_t {
        let mut set = sys::empty_sigset();
        sys::sigset_add(&mut set, self.0);
        set
    }

    /// OS mask with no member
    pub fn empty_sigset() -> sigset_t {
        sys::empty_sigset()
    }

    /// OS mask built with `sigfillset`
    ///
    /// In theory the same as `to_sigset(&Signal::all().collect())`.
    pub fn full_sigset() -> sigset_t {
        sys::full_sigset()
    }

    /// Convert a set of signals to the OS mask representation
    pub fn to_sigset<'a>(signals: impl IntoIterator<Item = &'a Signal>) -> sigset_t {
        let mut set = sys::empty_sigset();
        for signal in signals {
            sys::sigset_add(&mut set, signal.0);
        }
        set
    }

    /// Convert an OS mask to a set of signals
    pub fn set_from(sigset: &sigset_t) -> SignalSet {
        Signal::all()
            .filter(|signal| sys::sigset_contains(sigset, signal.0))
            .collect()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "SIG{}", name),
            None => write!(f, "SIG{}", self.0),
        }
    }
}

impl TryFrom<c_int> for Signal {
    type Error = String;

    fn try_from(raw: c_int) -> Result<Self, Self::Error> {
        Signal::new(raw).ok_or_else(|| format!("invalid signal number {}", raw))
    }
}

impl From<Signal> for c_int {
    fn from(signal: Signal) -> c_int {
        signal.0
    }
}

impl TryFrom<Signal> for nix::sys::signal::Signal {
    type Error = nix::errno::Errno;

    fn try_from(signal: Signal) -> Result<Self, Self::Error> {
        nix::sys::signal::Signal::try_from(signal.0)
    }
}

impl From<nix::sys::signal::Signal> for Signal {
    fn from(signal: nix::sys::signal::Signal) -> Self {
        Signal(signal as c_int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_zero_is_invalid() {
        assert!(Signal::new(0).is_none());
        assert!(Signal::new(-1).is_none());
        assert!(Signal::new(NSIG).is_none());
        assert_eq!(Signal::new(libc::SIGTERM), Some(Signal::TERMINATED));
    }

    #[test]
    fn test_display() {
        assert_eq!(Signal::TERMINATED.to_string(), "SIGTERM");
        assert_eq!(Signal::USER_DEFINED_1.to_string(), "SIGUSR1");
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_display_unnamed() {
        let realtime = Signal::new(40).unwrap();
        assert_eq!(realtime.name(), None);
        assert_eq!(realtime.to_string(), "SIG40");
    }

    #[test]
    fn test_delayable() {
        assert!(!Signal::KILLED.is_delayable());
        assert!(!Signal::SUSPENDED_BY_SIGNAL.is_delayable());
        assert!(Signal::TERMINATED.is_delayable());
        assert!(Signal::SUSPENDED.is_delayable());
    }

    #[test]
    fn test_single_sigset() {
        let set = Signal::INTERRUPT.sigset();
        assert_eq!(Signal::set_from(&set), SignalSet::from([Signal::INTERRUPT]));
    }

    #[test]
    fn test_full_sigset_contains_everything_nameable() {
        let all = Signal::set_from(&Signal::full_sigset());
        assert!(all.contains(&Signal::TERMINATED));
        assert!(all.contains(&Signal::KILLED));
        assert!(Signal::set_from(&Signal::empty_sigset()).is_empty());
    }

    #[test]
    fn test_nix_conversion() {
        let nix_signal = nix::sys::signal::Signal::try_from(Signal::HANGUP).unwrap();
        assert_eq!(nix_signal, nix::sys::signal::Signal::SIGHUP);
        assert_eq!(Signal::from(nix_signal), Signal::HANGUP);
    }

    #[test]
    fn test_serde_rejects_invalid_numbers() {
        assert_eq!(Signal::try_from(libc::SIGUSR2), Ok(Signal::USER_DEFINED_2));
        assert!(Signal::try_from(0).is_err());
        assert_eq!(c_int::from(Signal::QUIT), libc::SIGQUIT);

        let json = serde_json::to_string(&Signal::QUIT).unwrap();
        assert_eq!(json, libc::SIGQUIT.to_string());
        assert_eq!(serde_json::from_str::<Signal>(&json).unwrap(), Signal::QUIT);
        assert!(serde_json::from_str::<Signal>("0").is_err());
    }
}
