/*!
 * Dedicated Signal Thread
 * Single-slot rendezvous running signal actions on one long-lived thread
 *
 * A caller posts one action and blocks until the thread reports its
 * completion. The thread never logs while an action is in flight: log lines
 * are collected in the completion and emitted by the caller.
 */

use crate::core::errors::{ErrnoExt, SignalError, SignalResult};
use crate::core::sys;
use crate::signals::Signal;
use nix::errno::Errno;
use nix::libc;
use std::fmt;
use std::io;
use std::thread;
use tracing::{debug, error};

/// Work run on a dedicated thread
pub(crate) trait ThreadAction: fmt::Debug + Send + 'static {
    /// Perform the action
    ///
    /// Failures that do not abort the action go to `completion` as log lines.
    fn run(self, completion: &mut Completion) -> SignalResult<()>;
}

/// A log line produced on the dedicated thread
#[derive(Debug, Clone)]
pub(crate) struct ThreadLog {
    pub message: &'static str,
    pub signal: Signal,
    pub errno: Errno,
}

/// What the dedicated thread reports back for one action
#[derive(Debug, Default)]
pub(crate) struct Completion {
    error: Option<SignalError>,
    logs: Vec<ThreadLog>,
}

impl Completion {
    /// Record a non-fatal failure
    pub fn log(&mut self, message: &'static str, signal: Signal, errno: Errno) {
        self.logs.push(ThreadLog {
            message,
            signal,
            errno,
        });
    }

    /// Emit collected logs on the calling thread and return the action result
    fn into_result(self) -> SignalResult<()> {
        for log in &self.logs {
            error!(signal = %log.signal, errno = %log.errno, "{}", log.message);
        }
        self.error.map_or(Ok(()), Err)
    }
}

type Request<A> = (A, flume::Sender<Completion>);

/// Handle to a dedicated thread
///
/// The thread exits once every handle is dropped.
pub(crate) struct DedicatedThread<A: ThreadAction> {
    name: String,
    requests: flume::Sender<Request<A>>,
}

impl<A: ThreadAction> DedicatedThread<A> {
    /// Spawn the thread and wait until it is ready
    ///
    /// The new thread starts by unblocking every signal. Failing to do so is
    /// destructive: the thread exists but cannot serve.
    pub fn spawn(name: &str) -> SignalResult<Self> {
        let (requests, inbox) = flume::bounded::<Request<A>>(0);
        let (ready_tx, ready_rx) = flume::bounded::<SignalResult<()>>(1);

        let thread_name = name.to_string();
        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let empty = sys::empty_sigset();
                let unmasked = sys::thread_mask(libc::SIG_SETMASK, Some(&empty))
                    .map(drop)
                    .destructive();
                let serving = unmasked.is_ok();
                let _ = ready_tx.send(unmasked);
                if serving {
                    serve(inbox);
                }
            })
            .map_err(os_error)?;

        ready_rx
            .recv()
            .unwrap_or(Err(SignalError::Destructive(Errno::EPIPE)))?;

        debug!(thread = %thread_name, "Dedicated signal thread started");
        Ok(Self {
            name: thread_name,
            requests,
        })
    }

    /// Run `action` on the thread and wait for its completion
    pub fn execute(&self, action: A) -> SignalResult<()> {
        let (reply_tx, reply_rx) = flume::bounded(1);
        self.requests
            .send((action, reply_tx))
            .map_err(|_| SignalError::NonDestructive(Errno::EPIPE))?;

        let completion = reply_rx
            .recv()
            .map_err(|_| SignalError::Destructive(Errno::EPIPE))?;
        completion.into_result()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<A: ThreadAction> fmt::Debug for DedicatedThread<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedicatedThread")
            .field("name", &self.name)
            .finish()
    }
}

fn serve<A: ThreadAction>(inbox: flume::Receiver<Request<A>>) {
    while let Ok((action, reply)) = inbox.recv() {
        let mut completion = Completion::default();
        if let Err(err) = action.run(&mut completion) {
            completion.error = Some(err);
        }
        let _ = reply.send(completion);
    }
}

pub(crate) fn os_error(err: io::Error) -> SignalError {
    SignalError::NonDestructive(err.raw_os_error().map_or(Errno::EAGAIN, Errno::from_raw))
}
