/*!
 * Sigaction Record
 * Structured view of a signal disposition, with installation
 */

use super::flags::SigactionFlags;
use super::handler::SigactionHandler;
use super::types::{Signal, SignalSet};
use crate::core::errors::{ErrnoExt, SignalResult};
use crate::core::sys;
use nix::libc;
use tracing::{trace, warn};

/// A signal disposition: handler, flags and the mask blocked while it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigactionRecord {
    pub mask: SignalSet,
    pub flags: SigactionFlags,
    pub handler: SigactionHandler,
}

impl SigactionRecord {
    /// Disposition running `handler`, with an empty mask
    ///
    /// The `SIGINFO` flag is set iff the handler is `ExtendedInfo`.
    pub fn new(handler: SigactionHandler) -> Self {
        let flags = match handler {
            SigactionHandler::ExtendedInfo(_) => SigactionFlags::SIGINFO,
            SigactionHandler::Ignore | SigactionHandler::Default | SigactionHandler::Simple(_) => {
                SigactionFlags::empty()
            }
        };
        Self {
            mask: SignalSet::new(),
            flags,
            handler,
        }
    }

    /// The `SIG_IGN` disposition
    pub fn ignore() -> Self {
        Self::new(SigactionHandler::Ignore)
    }

    /// The `SIG_DFL` disposition
    pub fn default_action() -> Self {
        Self::new(SigactionHandler::Default)
    }

    /// Builder: add flags
    pub fn with_flags(mut self, flags: SigactionFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Builder: replace the mask
    pub fn with_mask(mut self, mask: SignalSet) -> Self {
        self.mask = mask;
        self
    }

    /// Read the live disposition of `signal`
    pub fn current(signal: Signal) -> SignalResult<Self> {
        let raw = sys::swap_sigaction(signal.raw(), None).non_destructive()?;
        Ok(Self::from_raw(&raw))
    }

    /// Whether `signal` is currently ignored
    pub fn is_signal_ignored(signal: Signal) -> SignalResult<bool> {
        Ok(Self::current(signal)?.handler == SigactionHandler::Ignore)
    }

    /// Whether `signal` currently has its default disposition
    pub fn is_signal_default_action(signal: Signal) -> SignalResult<bool> {
        Ok(Self::current(signal)?.handler == SigactionHandler::Default)
    }

    /// Whether a delivery of `signal` would run nothing right now
    ///
    /// Either it is ignored, or its default action discards it.
    pub fn is_signal_discarded(signal: Signal) -> SignalResult<bool> {
        Ok(match Self::current(signal)?.handler {
            SigactionHandler::Ignore => true,
            SigactionHandler::Default => signal.is_discarded_by_default(),
            SigactionHandler::Simple(_) | SigactionHandler::ExtendedInfo(_) => false,
        })
    }

    /// Only one check: `SIGINFO` must not be set with the ignore or default handler
    pub fn is_valid(&self) -> bool {
        !self.flags.contains(SigactionFlags::SIGINFO) || !self.handler.is_special()
    }

    /// Build from the raw OS structure
    ///
    /// An invalid combination is logged but kept as is.
    pub fn from_raw(raw: &libc::sigaction) -> Self {
        let flags = SigactionFlags::from_raw(raw.sa_flags as libc::c_int);
        // SAFETY: the raw structure comes from the kernel or from to_raw, its
        // handler member is consistent with SA_SIGINFO
        let handler = unsafe {
            SigactionHandler::from_address(raw.sa_sigaction, flags.contains(SigactionFlags::SIGINFO))
        };
        let record = Self {
            mask: Signal::set_from(&raw.sa_mask),
            flags,
            handler,
        };
        if !record.is_valid() {
            warn!(sigaction = ?record, "Initialized an invalid sigaction");
        }
        record
    }

    /// Convert to the raw OS structure
    pub fn to_raw(&self) -> libc::sigaction {
        if !self.is_valid() {
            warn!(sigaction = ?self, "Converting an invalid sigaction to its raw value");
        }
        // SAFETY: sigaction is plain data, all-zero is a valid value
        let mut raw: libc::sigaction = unsafe { std::mem::zeroed() };
        raw.sa_sigaction = self.handler.address();
        raw.sa_mask = Signal::to_sigset(&self.mask);
        raw.sa_flags = self.flags.bits() as _;
        raw
    }

    /// Install this disposition on `signal`
    ///
    /// Returns the previous disposition, or `None` if it was identical to this
    /// one. `sigaction` is called either way.
    ///
    /// With `revert_if_ignored`, if the previous disposition was exactly the
    /// ignore disposition it is put back and `None` is returned: an ignore set
    /// on purpose (e.g. by a parent process) is not overridden. Failing to put
    /// it back is a destructive error.
    ///
    /// This talks to the OS directly. To honor a registration of the
    /// ignore-and-redeliver delayer, go through `UnsigDelayer::install`.
    pub fn install(
        &self,
        signal: Signal,
        revert_if_ignored: bool,
    ) -> SignalResult<Option<SigactionRecord>> {
        let new_raw = self.to_raw();
        let old_raw = sys::swap_sigaction(signal.raw(), Some(&new_raw)).non_destructive()?;
        let old = Self::from_raw(&old_raw);

        if revert_if_ignored && old == Self::ignore() {
            sys::swap_sigaction(signal.raw(), Some(&old_raw)).destructive()?;
            trace!(signal = %signal, "Signal was ignored, sigaction reverted");
            return Ok(None);
        }

        trace!(signal = %signal, new = ?self, old = ?old, "Installed sigaction");
        Ok((old != *self).then_some(old))
    }
}

/// Live disposition of `signal`
pub fn current_disposition(signal: Signal) -> SignalResult<SigactionRecord> {
    SigactionRecord::current(signal)
}
