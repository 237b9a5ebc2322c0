/*!
 * Notifier Events
 * Counting handler standing in for the ignore disposition of delayed signals
 *
 * An ignored signal is discarded by the kernel before anyone can observe it.
 * The notifier disposition behaves like ignore for the program (the real
 * handler never runs) but counts each delivery and wakes the watcher through
 * a socket. The handler only touches atomics and calls `write(2)`.
 */

use super::{discard_available, EventBackend};
use crate::core::errors::{SignalError, SignalResult};
use crate::core::limits::NSIG;
use crate::delayed::thread::os_error;
use crate::signals::{SigactionFlags, SigactionHandler, SigactionRecord, Signal};
use nix::errno::Errno;
use nix::libc::{self, c_int, c_void, siginfo_t};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use tracing::trace;

const SLOTS: usize = NSIG as usize;

#[allow(clippy::declare_interior_mutable_const)]
const NO_COUNT: AtomicUsize = AtomicUsize::new(0);
#[allow(clippy::declare_interior_mutable_const)]
const NO_FD: AtomicI32 = AtomicI32::new(-1);

/// Deliveries observed per signal number, not yet drained
static COUNTS: [AtomicUsize; SLOTS] = [NO_COUNT; SLOTS];
/// Write end of the wake-up socket per signal number, -1 when detached
static WAKE_FDS: [AtomicI32; SLOTS] = [NO_FD; SLOTS];

fn slot(signal: Signal) -> Option<usize> {
    usize::try_from(signal.raw()).ok().filter(|slot| *slot < SLOTS)
}

extern "C" fn notify(signo: c_int, _info: *mut siginfo_t, _context: *mut c_void) {
    let saved = Errno::last_raw();
    if let Some(slot) = usize::try_from(signo).ok().filter(|slot| *slot < SLOTS) {
        COUNTS[slot].fetch_add(1, Ordering::SeqCst);
        let fd = WAKE_FDS[slot].load(Ordering::SeqCst);
        if fd >= 0 {
            let byte = 1u8;
            // SAFETY: write(2) is async-signal-safe. A full socket is fine, the
            // count is already recorded and the reader is readable.
            unsafe { libc::write(fd, &byte as *const u8 as *const c_void, 1) };
        }
    }
    Errno::set_raw(saved);
}

/// Exclusive use of the notifier slot of one signal
///
/// Owns the write end of the wake-up socket. Only one slot per signal can be
/// claimed at a time in the process; dropping it releases the slot.
#[derive(Debug)]
pub(crate) struct NotifierSlot {
    signal: Signal,
    slot: usize,
    writer: UnixStream,
}

impl NotifierSlot {
    fn claim(signal: Signal, writer: UnixStream) -> SignalResult<Self> {
        let slot = slot(signal).ok_or(SignalError::NonDestructive(Errno::EINVAL))?;
        WAKE_FDS[slot]
            .compare_exchange(-1, writer.as_raw_fd(), Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| SignalError::NonDestructive(Errno::EBUSY))?;
        COUNTS[slot].store(0, Ordering::SeqCst);
        Ok(Self {
            signal,
            slot,
            writer,
        })
    }
}

impl Drop for NotifierSlot {
    fn drop(&mut self) {
        let _ = WAKE_FDS[self.slot].compare_exchange(
            self.writer.as_raw_fd(),
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        trace!(signal = %self.signal, "Notifier slot released");
    }
}

/// Occurrences of one signal counted by the notifier disposition
#[derive(Debug)]
pub(crate) struct NotifierEvents {
    slot: usize,
    reader: UnixStream,
}

impl NotifierEvents {
    /// The disposition installed on signals being watched
    pub fn disposition() -> SigactionRecord {
        SigactionRecord::new(SigactionHandler::ExtendedInfo(notify)).with_flags(SigactionFlags::RESTART)
    }

    /// Claim the slot of `signal` and install the notifier disposition on it
    ///
    /// Fails with `EBUSY` while another claim on the same signal is alive.
    /// The events only count while the returned slot is kept.
    pub fn attach(signal: Signal) -> SignalResult<(Self, NotifierSlot)> {
        let (writer, reader) = UnixStream::pair().map_err(os_error)?;
        writer.set_nonblocking(true).map_err(os_error)?;
        reader.set_nonblocking(true).map_err(os_error)?;

        let claimed = NotifierSlot::claim(signal, writer)?;
        let events = Self {
            slot: claimed.slot,
            reader,
        };

        // On failure the slot is released when `claimed` drops
        Self::disposition().install(signal, false)?;
        Ok((events, claimed))
    }
}

impl EventBackend for NotifierEvents {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }

    fn drain(&mut self) -> usize {
        discard_available(&mut self.reader);
        COUNTS[self.slot].swap(0, Ordering::SeqCst)
    }
}
