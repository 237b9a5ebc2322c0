/*!
 * Unsig Delayer
 * Delay signals by taking their sigaction away, then resending them
 *
 * While a signal is delayed its live disposition is the notifier, which
 * behaves like ignore for the program. The sigaction that was live before
 * (the "original") is kept aside. Every observed occurrence is put to the
 * voters; when they all allow it, the dedicated thread briefly reinstalls the
 * original, sends the signal to itself, and puts the notifier back.
 *
 * Works for every delayable signal and on every supported platform, at the
 * cost of the sigaction being swapped (process-wide) during each resend.
 */

use super::batch;
use super::config::DelayerConfig;
use super::registration::{DelayedRegistration, VoteReply, Voter};
use super::source::{NotifierEvents, NotifierSlot, SignalSource};
use super::thread::{Completion, DedicatedThread, ThreadAction};
use super::traits::SigactionDelayer;
use super::vote::poll_voters;
use crate::core::errors::{SignalError, SignalResult};
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
use tracing::{debug, error, info, trace, warn};

/// Ignore-and-redeliver delayer
///
/// Cloning gives another handle to the same delayer. Registrations made
/// through a delayer are only known to that delayer: use a single one per
/// process. A signal already delayed by another `UnsigDelayer` cannot be
/// registered (`EBUSY`). Unregister everything before dropping the last handle, or the
/// delayed signals stay silently swallowed.
#[derive(Clone)]
pub struct UnsigDelayer {
    inner: Arc<UnsigInner>,
}

struct UnsigInner {
    config: DelayerConfig,
    state: Mutex<UnsigState>,
}

#[derive(Default)]
struct UnsigState {
    /// Spawned on first resend
    thread: Option<DedicatedThread<UnsigAction>>,
    signals: HashMap<Signal, UnsigactionedSignal>,
}

/// A signal with at least one registration
struct UnsigactionedSignal {
    original: SigactionRecord,
    voters: HashMap<DelayedRegistration, Voter>,
    _source: SignalSource,
    /// Released as soon as the entry goes, the watcher may outlive it
    _slot: NotifierSlot,
}

#[derive(Debug)]
enum UnsigAction {
    /// Run the original sigaction for one occurrence of the signal
    Resend {
        signal: Signal,
        original: SigactionRecord,
    },
}

impl ThreadAction for UnsigAction {
    fn run(self, completion: &mut Completion) -> SignalResult<()> {
        match self {
            UnsigAction::Resend { signal, original } => {
                let previous = original.install(signal, false)?;

                // Unblocked on this thread: the handler runs before the call returns
                if let Err(errno) = sys::kill_current_thread(signal.raw()) {
                    completion.log(
                        "Cannot resend signal to the dedicated thread, the original sigaction did not run",
                        signal,
                        errno,
                    );
                }
                if let Err(errno) = sys::thread_mask(libc::SIG_SETMASK, Some(&sys::empty_sigset())) {
                    completion.log(
                        "Cannot reset the dedicated thread mask after a resend, later resends might not be delivered",
                        signal,
                        errno,
                    );
                }

                if let Some(previous) = previous {
                    previous
                        .install(signal, false)
                        .map_err(SignalError::upgrade_to_destructive)?;
                }
                Ok(())
            }
        }
    }
}

impl UnsigDelayer {
    pub fn new() -> Self {
        Self::with_config(DelayerConfig::unsig())
    }

    pub fn with_config(config: DelayerConfig) -> Self {
        Self {
            inner: Arc::new(UnsigInner {
                config,
                state: Mutex::new(UnsigState::default()),
            }),
        }
    }

    /// Replace the sigaction run when a delayed signal is allowed through
    ///
    /// Returns the previous original, or `None` (and does nothing) if the
    /// signal is not delayed.
    pub fn update_original_sigaction(
        &self,
        signal: Signal,
        sigaction: SigactionRecord,
    ) -> Option<SigactionRecord> {
        let mut state = self.inner.state.lock();
        state
            .signals
            .get_mut(&signal)
            .map(|entry| std::mem::replace(&mut entry.original, sigaction))
    }

    /// The sigaction run when a delayed signal is allowed through
    pub fn original_sigaction(&self, signal: Signal) -> Option<SigactionRecord> {
        let state = self.inner.state.lock();
        state.signals.get(&signal).map(|entry| entry.original.clone())
    }

    /// Install `sigaction` on `signal`, honoring delays
    ///
    /// If the signal is delayed, only the original sigaction is updated, the
    /// OS is not touched and `revert_if_ignored` does not apply. Otherwise
    /// this is [`SigactionRecord::install`].
    pub fn install(
        &self,
        signal: Signal,
        sigaction: &SigactionRecord,
        revert_if_ignored: bool,
    ) -> SignalResult<Option<SigactionRecord>> {
        let mut state = self.inner.state.lock();
        match state.signals.get_mut(&signal) {
            Some(entry) => {
                let previous = std::mem::replace(&mut entry.original, sigaction.clone());
                trace!(signal = %signal, "Updated original sigaction of a delayed signal");
                Ok((previous != *sigaction).then_some(previous))
            }
            None => sigaction.install(signal, revert_if_ignored),
        }
    }

    /// Signals currently delayed
    pub fn delayed_signals(&self) -> SignalSet {
        self.inner.state.lock().signals.keys().copied().collect()
    }
}

impl Default for UnsigDelayer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UnsigDelayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsigDelayer")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl SigactionDelayer for UnsigDelayer {
    fn register_delayed_sigaction<F>(
        &self,
        signal: Signal,
        voter: F,
    ) -> SignalResult<DelayedRegistration>
    where
        F: Fn(Signal, VoteReply) + Send + Sync + 'static,
    {
        let voter: Voter = Arc::new(voter);
        let mut state = self.inner.state.lock();
        self.inner.register_locked(&mut state, signal, voter)
    }

    fn unregister_delayed_sigaction(&self, registration: &DelayedRegistration) -> SignalResult<()> {
        let mut state = self.inner.state.lock();
        self.inner.unregister_locked(&mut state, registration)
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
        let mut state = self.inner.state.lock();
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
        let mut state = self.inner.state.lock();
        batch::unregister_all(&mut *state, registrations, |state, registration| {
            self.inner.unregister_locked(state, registration)
        })
    }

    fn is_delaying(&self, signal: Signal) -> bool {
        self.inner.state.lock().signals.contains_key(&signal)
    }
}

impl UnsigInner {
    fn register_locked(
        self: &Arc<Self>,
        state: &mut UnsigState,
        signal: Signal,
        voter: Voter,
    ) -> SignalResult<DelayedRegistration> {
        if !signal.is_delayable() {
            return Err(SignalError::NonDestructive(Errno::EINVAL));
        }

        let registration = DelayedRegistration::new(signal);

        if let Some(entry) = state.signals.get_mut(&signal) {
            // Someone may have installed a sigaction directly since the delay started
            if let Some(bypassed) = NotifierEvents::disposition().install(signal, false)? {
                warn!(
                    signal = %signal,
                    sigaction = ?bypassed,
                    "Sigaction of a delayed signal was changed directly, it becomes the original sigaction"
                );
                entry.original = bypassed;
            }
            entry.voters.insert(registration, voter);
            return Ok(registration);
        }

        let original = SigactionRecord::ignore()
            .install(signal, false)?
            .unwrap_or_else(SigactionRecord::ignore);

        let (source, slot) = self
            .watch(signal)
            .map_err(|err| abort_registration(signal, &original, err))?;

        state.signals.insert(
            signal,
            UnsigactionedSignal {
                original,
                voters: HashMap::from([(registration, voter)]),
                _source: source,
                _slot: slot,
            },
        );
        info!(signal = %signal, "Signal delayed");
        Ok(registration)
    }

    fn unregister_locked(
        &self,
        state: &mut UnsigState,
        registration: &DelayedRegistration,
    ) -> SignalResult<()> {
        let signal = registration.signal();
        let Some(entry) = state.signals.get_mut(&signal) else {
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

        // Last registration: the registration stays if the original cannot be restored
        entry.original.install(signal, false)?;
        state.signals.remove(&signal);
        info!(signal = %signal, "Signal no longer delayed");
        Ok(())
    }

    fn watch(self: &Arc<Self>, signal: Signal) -> SignalResult<(SignalSource, NotifierSlot)> {
        let (events, slot) = NotifierEvents::attach(signal)?;
        let delayer = Arc::downgrade(self);
        let source = SignalSource::spawn(
            signal,
            events,
            self.config.watcher_name(signal),
            Box::new(move |count, cancelled| {
                if let Some(delayer) = delayer.upgrade() {
                    delayer.process(signal, count, cancelled);
                }
            }),
        )?;
        Ok((source, slot))
    }

    /// Put every occurrence to the voters and resend the allowed ones
    fn process(&self, signal: Signal, count: usize, cancelled: &AtomicBool) {
        let mut state = self.state.lock();
        if cancelled.load(Ordering::SeqCst) {
            trace!(signal = %signal, count, "Dropping occurrences received after the delay ended");
            return;
        }
        debug!(signal = %signal, count, "Processing delayed signal");

        for _ in 0..count {
            let Some(entry) = state.signals.get(&signal) else {
                error!(signal = %signal, "INTERNAL ERROR: occurrence received for a signal that is not delayed");
                return;
            };
            let original = entry.original.clone();
            let voters: Vec<Voter> = entry.voters.values().cloned().collect();

            let occurrence = OccurrenceSpan::new(signal, voters.len());
            let _entered = occurrence.enter();
            let allowed = poll_voters(signal, &voters);
            occurrence.record_outcome(allowed);
            if !allowed {
                debug!(signal = %signal, "Signal dropped by its voters");
                continue;
            }
            if let Err(err) = self.execute(&mut state, UnsigAction::Resend { signal, original }) {
                error!(signal = %signal, error = %err, "Cannot resend signal to its original sigaction");
            }
        }
    }

    fn execute(&self, state: &mut UnsigState, action: UnsigAction) -> SignalResult<()> {
        let thread = match state.thread.take() {
            Some(thread) => thread,
            None => DedicatedThread::spawn(self.config.thread_name)?,
        };
        let result = thread.execute(action);
        state.thread = Some(thread);
        result
    }
}

/// Restore `original` after a registration failed halfway
fn abort_registration(signal: Signal, original: &SigactionRecord, err: SignalError) -> SignalError {
    match original.install(signal, false) {
        Ok(_) => err,
        Err(restore) => {
            error!(signal = %signal, error = %restore, "Cannot restore sigaction after a failed registration");
            err.upgrade_to_destructive()
        }
    }
}
