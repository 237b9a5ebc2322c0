/*!
 * Block Delayer
 * Delay signals by keeping them blocked on every thread but one
 *
 * `bootstrap` blocks the given signals on the calling thread (threads spawned
 * later inherit the mask) and starts the dedicated thread, the only one a
 * delayed signal is ever delivered to. Registering a signal blocks it on the
 * dedicated thread too; occurrences then stay pending and are read from a
 * signalfd. Allowed occurrences are resent to the dedicated thread and
 * delivered inside `sigsuspend`. Dropped ones are discarded under a
 * temporary ignore disposition.
 *
 * Sigactions are never swapped while the signal is allowed through. The
 * price: bootstrap must happen before any other thread exists, and the
 * program must not unblock the signals afterwards.
 */

use super::batch;
use super::config::DelayerConfig;
use super::registration::{DelayedRegistration, VoteReply, Voter};
use super::source::{PendingEvents, SignalSource};
use super::thread::{Completion, DedicatedThread, ThreadAction};
use super::traits::SigactionDelayer;
use super::vote::poll_voters;
use crate::core::errors::{ErrnoExt, SignalError, SignalResult};
use crate::core::sys;
use crate::monitoring::OccurrenceSpan;
use crate::signals::{SigactionRecord, Signal, SignalSet};
use nix::errno::Errno;
use nix::libc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace};

static BOOTSTRAPPED: AtomicBool = AtomicBool::new(false);

/// Block-and-suspend delayer
///
/// Obtained once per process from [`BlockDelayer::bootstrap`]. Cloning gives
/// another handle to the same delayer.
#[derive(Clone)]
pub struct BlockDelayer {
    inner: Arc<BlockInner>,
}

struct BlockInner {
    config: DelayerConfig,
    thread: DedicatedThread<BlockAction>,
    signals: Mutex<HashMap<Signal, BlockedSignal>>,
}

/// A signal with at least one registration
struct BlockedSignal {
    voters: HashMap<DelayedRegistration, Voter>,
    _source: SignalSource,
}

#[derive(Debug, Clone, Copy)]
enum BlockAction {
    Block(Signal),
    Unblock(Signal),
    /// Deliver one occurrence to the live sigaction
    Suspend(Signal),
    /// Discard one occurrence
    Drop(Signal),
}

impl ThreadAction for BlockAction {
    fn run(self, completion: &mut Completion) -> SignalResult<()> {
        match self {
            BlockAction::Block(signal) => sys::thread_mask(libc::SIG_BLOCK, Some(&signal.sigset()))
                .map(drop)
                .destructive(),
            BlockAction::Unblock(signal) => sys::thread_mask(libc::SIG_UNBLOCK, Some(&signal.sigset()))
                .map(drop)
                .destructive(),
            BlockAction::Suspend(signal) => suspend(signal, completion),
            BlockAction::Drop(signal) => discard(signal, completion),
        }
    }
}

fn suspend(signal: Signal, completion: &mut Completion) -> SignalResult<()> {
    // sigsuspend only returns after a handler ran
    let is_discarded = SigactionRecord::is_signal_discarded(signal)?;
    let unblocked = if is_discarded {
        None
    } else {
        let mut mask = sys::current_thread_mask().non_destructive()?;
        sys::sigset_remove(&mut mask, signal.raw());
        Some(mask)
    };

    // A failed sigpending counts as not pending
    let pending = sys::pending_signals()
        .map(|pending| sys::sigset_contains(&pending, signal.raw()))
        .unwrap_or(false);
    if !pending {
        if let Err(errno) = sys::kill_current_thread(signal.raw()) {
            completion.log("Cannot resend signal to the dedicated thread", signal, errno);
        }
    }

    // The disposition may change between the check and the wait, there is
    // no way to make this atomic.
    if let Some(mask) = unblocked {
        sys::suspend_with_mask(&mask);
    }
    Ok(())
}

fn discard(signal: Signal, completion: &mut Completion) -> SignalResult<()> {
    let mut unblocked = sys::current_thread_mask().non_destructive()?;
    sys::sigset_remove(&mut unblocked, signal.raw());

    // Pending instances are discarded as soon as the disposition is ignore
    let previous = SigactionRecord::ignore().install(signal, false)?;

    // Deliver (and so discard) one instance while unblocked, in case one is
    // still in flight toward this thread
    let mut restore_mask = Ok(());
    match sys::thread_mask(libc::SIG_SETMASK, Some(&unblocked)) {
        Ok(blocked) => {
            if let Err(errno) = sys::kill_current_thread(signal.raw()) {
                completion.log("Cannot resend signal to the dedicated thread to drop it", signal, errno);
            }
            restore_mask = sys::thread_mask(libc::SIG_SETMASK, Some(&blocked)).map(drop).destructive();
        }
        Err(errno) => completion.log("Cannot unblock signal on the dedicated thread to drop it", signal, errno),
    }

    if let Some(previous) = previous {
        previous
            .install(signal, false)
            .map_err(SignalError::upgrade_to_destructive)?;
    }
    restore_mask
}

impl BlockDelayer {
    /// Block `signals` on the calling thread and start the dedicated thread
    ///
    /// Must be called before the process spawns any thread, and only the
    /// signals given here can be delayed. Only the calling thread and threads
    /// it spawns afterwards get the mask.
    ///
    /// # Panics
    /// When called more than once in a process.
    pub fn bootstrap(signals: &SignalSet) -> SignalResult<Self> {
        Self::bootstrap_with_config(signals, DelayerConfig::block())
    }

    /// [`BlockDelayer::bootstrap`] with a custom configuration
    ///
    /// # Panics
    /// When called more than once in a process.
    pub fn bootstrap_with_config(signals: &SignalSet, config: DelayerConfig) -> SignalResult<Self> {
        if BOOTSTRAPPED.swap(true, Ordering::SeqCst) {
            panic!("The block delayer can be bootstrapped only once");
        }

        let mask = Signal::to_sigset(signals);
        sys::thread_mask(libc::SIG_SETMASK, Some(&mask)).non_destructive()?;

        let thread = DedicatedThread::spawn(config.thread_name)
            .map_err(SignalError::upgrade_to_destructive)?;

        debug!(signals = ?signals, thread = %thread.name(), "Block delayer bootstrapped");
        Ok(Self {
            inner: Arc::new(BlockInner {
                config,
                thread,
                signals: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Whether [`BlockDelayer::bootstrap`] was already called in this process
    pub fn is_bootstrapped() -> bool {
        BOOTSTRAPPED.load(Ordering::SeqCst)
    }

    /// Signals currently delayed
    pub fn delayed_signals(&self) -> SignalSet {
        self.inner.signals.lock().keys().copied().collect()
    }
}

impl fmt::Debug for BlockDelayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDelayer")
            .field("config", &self.inner.config)
            .field("thread", &self.inner.thread)
            .finish_non_exhaustive()
    }
}

impl SigactionDelayer for BlockDelayer {
    fn register_delayed_sigaction<F>(
        &self,
        signal: Signal,
        voter: F,
    ) -> SignalResult<DelayedRegistration>
    where
        F: Fn(Signal, VoteReply) + Send + Sync + 'static,
    {
        let voter: Voter = Arc::new(voter);
        let mut signals = self.inner.signals.lock();
        self.inner.register_locked(&mut signals, signal, voter)
    }

    fn unregister_delayed_sigaction(&self, registration: &DelayedRegistration) -> SignalResult<()> {
        let mut signals = self.inner.signals.lock();
        self.inner.unregister_locked(&mut signals, registration)
    }

    fn register_delayed_sigactions<F>(
        &self,
        signals: &SignalSet,
        voter: F,
    ) -> SignalResult<HashMap<Signal, DelayedRegistration>>
    where
        F: Fn(Signal, VoteReply) + Send + Sync + 'static,
    {
        let voter: Voter = Arc::new(voter);
        let mut state = self.inner.signals.lock();
        batch::register_all(
            &mut *state,
            signals,
            &voter,
            |state, signal, voter| self.inner.register_locked(state, signal, voter),
            |state, registration| self.inner.unregister_locked(state, registration),
        )
    }

    fn unregister_delayed_sigactions<'a, I>(&self, registrations: I) -> HashMap<Signal, SignalError>
    where
        I: IntoIterator<Item = &'a DelayedRegistration>,
    {
        let mut state = self.inner.signals.lock();
        batch::unregister_all(&mut *state, registrations, |state, registration| {
            self.inner.unregister_locked(state, registration)
        })
    }

    fn is_delaying(&self, signal: Signal) -> bool {
        self.inner.signals.lock().contains_key(&signal)
    }
}

impl BlockInner {
    fn register_locked(
        self: &Arc<Self>,
        signals: &mut HashMap<Signal, BlockedSignal>,
        signal: Signal,
        voter: Voter,
    ) -> SignalResult<DelayedRegistration> {
        if !signal.is_delayable() {
            return Err(SignalError::NonDestructive(Errno::EINVAL));
        }

        let registration = DelayedRegistration::new(signal);

        if let Some(entry) = signals.get_mut(&signal) {
            entry.voters.insert(registration, voter);
            return Ok(registration);
        }

        self.thread.execute(BlockAction::Block(signal))?;
        let source = self.watch(signal).map_err(|err| self.abort_registration(signal, err))?;

        signals.insert(
            signal,
            BlockedSignal {
                voters: HashMap::from([(registration, voter)]),
                _source: source,
            },
        );
        info!(signal = %signal, "Signal delayed");
        Ok(registration)
    }

    fn unregister_locked(
        &self,
        signals: &mut HashMap<Signal, BlockedSignal>,
        registration: &DelayedRegistration,
    ) -> SignalResult<()> {
        let signal = registration.signal();
        let Some(entry) = signals.get_mut(&signal) else {
            error!(registration = %registration, "Delayed sigaction unregistered more than once");
            return Ok(());
        };
        if !entry.voters.contains_key(registration) {
            error!(registration = %registration, "Delayed sigaction unregistered more than once");
            return Ok(());
        }

        if entry.voters.len() > 1 {
            entry.voters.remove(registration);
            return Ok(());
        }

        self.thread.execute(BlockAction::Unblock(signal))?;
        signals.remove(&signal);
        info!(signal = %signal, "Signal no longer delayed");
        Ok(())
    }

    fn watch(self: &Arc<Self>, signal: Signal) -> SignalResult<SignalSource> {
        let events = PendingEvents::open(signal)?;
        let delayer = Arc::downgrade(self);
        SignalSource::spawn(
            signal,
            events,
            self.config.watcher_name(signal),
            Box::new(move |count, cancelled| {
                if let Some(delayer) = delayer.upgrade() {
                    delayer.process(signal, count, cancelled);
                }
            }),
        )
    }

    fn abort_registration(&self, signal: Signal, err: SignalError) -> SignalError {
        match self.thread.execute(BlockAction::Unblock(signal)) {
            Ok(()) => err,
            Err(unblock) => {
                error!(signal = %signal, error = %unblock, "Cannot unblock signal after a failed registration");
                err.upgrade_to_destructive()
            }
        }
    }

    /// Put every occurrence to the voters, then deliver or discard it
    fn process(&self, signal: Signal, count: usize, cancelled: &AtomicBool) {
        let signals = self.signals.lock();
        if cancelled.load(Ordering::SeqCst) {
            trace!(signal = %signal, count, "Dropping occurrences received after the delay ended");
            return;
        }
        let Some(entry) = signals.get(&signal) else {
            error!(signal = %signal, "INTERNAL ERROR: occurrence received for a signal that is not delayed");
            return;
        };
        debug!(signal = %signal, count, "Processing delayed signal");

        let voters: Vec<Voter> = entry.voters.values().cloned().collect();
        for _ in 0..count {
            let occurrence = OccurrenceSpan::new(signal, voters.len());
            let _entered = occurrence.enter();
            let allowed = poll_voters(signal, &voters);
            occurrence.record_outcome(allowed);
            let action = if allowed {
                BlockAction::Suspend(signal)
            } else {
                debug!(signal = %signal, "Signal dropped by its voters");
                BlockAction::Drop(signal)
            };
            if let Err(err) = self.thread.execute(action) {
                error!(signal = %signal, action = ?action, error = %err, "Cannot deliver or drop delayed signal");
            }
        }
    }
}
