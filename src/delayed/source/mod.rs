/*!
 * Signal Sources
 * Per-signal watcher threads reporting occurrence counts to a delayer
 */

mod notifier;
#[cfg(any(target_os = "linux", target_os = "android"))]
mod signalfd;

pub(crate) use notifier::{NotifierEvents, NotifierSlot};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use signalfd::PendingEvents;

use super::thread::os_error;
use crate::core::errors::{SignalError, SignalResult};
use crate::core::limits::WATCHER_POLL_INTERVAL;
use crate::signals::Signal;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io::{self, Read};
use std::net::Shutdown;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, trace};

/// Where occurrences of one signal are counted
pub(crate) trait EventBackend: Send + 'static {
    /// Readable when at least one occurrence is waiting
    fn as_fd(&self) -> BorrowedFd<'_>;

    /// Occurrences recorded since the previous call
    fn drain(&mut self) -> usize;

    /// Run once on the watcher thread before it starts waiting
    fn prepare_watcher(&self) -> SignalResult<()> {
        Ok(())
    }
}

/// Handler invoked on the watcher thread with the number of occurrences
///
/// The flag is set once the source was cancelled. Handlers check it under the
/// same lock the cancellation happens under.
pub(crate) type EventHandler = Box<dyn FnMut(usize, &AtomicBool) + Send>;

/// A running watcher
///
/// Dropping the source cancels it. The watcher thread is not joined: it may be
/// waiting on the very lock the dropping thread holds.
#[derive(Debug)]
pub(crate) struct SignalSource {
    signal: Signal,
    cancelled: Arc<AtomicBool>,
    cancel: Option<UnixStream>,
}

impl SignalSource {
    /// Start watching `backend` on a new thread
    pub fn spawn<B: EventBackend>(
        signal: Signal,
        backend: B,
        thread_name: String,
        on_event: EventHandler,
    ) -> SignalResult<Self> {
        let (cancel, cancel_rx) = UnixStream::pair().map_err(os_error)?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = flume::bounded::<SignalResult<()>>(1);

        let flag = cancelled.clone();
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let prepared = backend.prepare_watcher();
                let watching = prepared.is_ok();
                let _ = ready_tx.send(prepared);
                if watching {
                    watch(signal, backend, cancel_rx, flag, on_event);
                }
            })
            .map_err(os_error)?;

        ready_rx
            .recv()
            .unwrap_or(Err(SignalError::NonDestructive(Errno::EPIPE)))?;

        debug!(signal = %signal, "Signal source started");
        Ok(Self {
            signal,
            cancelled,
            cancel: Some(cancel),
        })
    }

    #[inline]
    pub fn signal(&self) -> Signal {
        self.signal
    }
}

impl Drop for SignalSource {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.shutdown(Shutdown::Both);
        }
        debug!(signal = %self.signal(), "Signal source cancelled");
    }
}

fn watch<B: EventBackend>(
    signal: Signal,
    mut backend: B,
    cancel_rx: UnixStream,
    cancelled: Arc<AtomicBool>,
    mut on_event: EventHandler,
) {
    let timeout = u16::try_from(WATCHER_POLL_INTERVAL.as_millis())
        .map(PollTimeout::from)
        .unwrap_or(PollTimeout::MAX);

    loop {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        let (events_ready, cancel_ready) = {
            let mut fds = [
                PollFd::new(backend.as_fd(), PollFlags::POLLIN),
                PollFd::new(cancel_rx.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, timeout) {
                Ok(_) => (
                    fds[0].revents().is_some_and(|r| !r.is_empty()),
                    fds[1].revents().is_some_and(|r| !r.is_empty()),
                ),
                Err(Errno::EINTR) => continue,
                Err(errno) => {
                    error!(signal = %signal, errno = %errno, "Cannot wait for signal events, stopping the watcher");
                    break;
                }
            }
        };

        if cancel_ready || cancelled.load(Ordering::SeqCst) {
            break;
        }
        if !events_ready {
            continue;
        }

        let count = backend.drain();
        if count > 0 {
            trace!(signal = %signal, count, "Signal occurrences observed");
            on_event(count, &cancelled);
        }
    }

    trace!(signal = %signal, "Watcher exiting");
}

/// Read and discard everything currently buffered in a non-blocking stream
pub(crate) fn discard_available(stream: &mut UnixStream) {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Backend counting one occurrence per byte written to a socket
    struct ByteEvents {
        reader: UnixStream,
    }

    impl EventBackend for ByteEvents {
        fn as_fd(&self) -> BorrowedFd<'_> {
            self.reader.as_fd()
        }

        fn drain(&mut self) -> usize {
            let mut buf = [0u8; 64];
            match self.reader.read(&mut buf) {
                Ok(n) => n,
                Err(_) => 0,
            }
        }
    }

    fn byte_source(seen: Arc<AtomicUsize>) -> (SignalSource, UnixStream) {
        let (writer, reader) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        let source = SignalSource::spawn(
            Signal::HANGUP,
            ByteEvents { reader },
            "sigdelay-watch-test".to_string(),
            Box::new(move |count, cancelled| {
                if !cancelled.load(Ordering::SeqCst) {
                    seen.fetch_add(count, Ordering::SeqCst);
                }
            }),
        )
        .unwrap();
        (source, writer)
    }

    fn wait_for(counter: &AtomicUsize, expected: usize) -> bool {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) == expected {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_events_reach_the_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let (source, mut writer) = byte_source(seen.clone());

        writer.write_all(&[1, 1, 1]).unwrap();
        assert!(wait_for(&seen, 3));
        assert_eq!(source.signal(), Signal::HANGUP);
    }

    #[test]
    fn test_no_events_after_cancel() {
        let seen = Arc::new(AtomicUsize::new(0));
        let (source, mut writer) = byte_source(seen.clone());

        drop(source);
        thread::sleep(Duration::from_millis(50));
        let _ = writer.write_all(&[1]);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_discard_available() {
        let (mut writer, mut reader) = UnixStream::pair().unwrap();
        reader.set_nonblocking(true).unwrap();
        writer.write_all(&[0; 100]).unwrap();

        discard_available(&mut reader);
        let mut buf = [0u8; 1];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }
}
