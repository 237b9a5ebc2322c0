/*!
 * Pending Events
 * signalfd-backed occurrences of a blocked signal
 */

use super::EventBackend;
use crate::core::errors::{ErrnoExt, SignalResult};
use crate::core::sys;
use crate::signals::Signal;
use nix::errno::Errno;
use nix::libc::{self, c_int};
use nix::sys::signal::SigSet;
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::os::fd::{AsFd, BorrowedFd};
use tracing::error;

/// Occurrences of a blocked signal, read from a signalfd
///
/// Reading an occurrence consumes it: the signal is no longer pending.
#[derive(Debug)]
pub(crate) struct PendingEvents {
    signal: Signal,
    fd: SignalFd,
}

impl PendingEvents {
    pub fn open(signal: Signal) -> SignalResult<Self> {
        // SAFETY: the set comes from sigemptyset and sigaddset
        let mask = unsafe { SigSet::from_sigset_t_unchecked(signal.sigset()) };
        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .non_destructive()?;
        Ok(Self { signal, fd })
    }
}

impl EventBackend for PendingEvents {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    fn drain(&mut self) -> usize {
        let mut count = 0;
        loop {
            match self.fd.read_signal() {
                Ok(Some(info)) if info.ssi_signo as c_int == self.signal.raw() => count += 1,
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    error!(signal = %self.signal, errno = %errno, "Cannot read from signalfd");
                    break;
                }
            }
        }
        count
    }

    /// The watcher must not be a thread the signal can be delivered to
    fn prepare_watcher(&self) -> SignalResult<()> {
        sys::thread_mask(libc::SIG_BLOCK, Some(&self.signal.sigset()))
            .map(drop)
            .non_destructive()
    }
}
