/*!
 * Delayer Traits
 * Registration interface shared by the delaying strategies
 */

use super::registration::{DelayedRegistration, VoteReply};
use crate::core::errors::{SignalError, SignalResult};
use crate::signals::{Signal, SignalSet};
use std::collections::HashMap;

/// Delay delivery of signals until registered voters agree
pub trait SigactionDelayer: Send + Sync {
    /// Register a voter for `signal`
    ///
    /// The first registration for a signal starts delaying it. The
    /// "uncatchable" signals (`SIGKILL`, `SIGSTOP`) fail with `EINVAL`.
    fn register_delayed_sigaction<F>(
        &self,
        signal: Signal,
        voter: F,
    ) -> SignalResult<DelayedRegistration>
    where
        F: Fn(Signal, VoteReply) + Send + Sync + 'static;

    /// Remove a registration
    ///
    /// Removing the last registration of a signal stops delaying it.
    /// Unregistering twice is logged and otherwise ignored.
    fn unregister_delayed_sigaction(&self, registration: &DelayedRegistration) -> SignalResult<()>;

    /// Register the same voter for every signal in `signals`, all or nothing
    ///
    /// On failure the registrations already made are rolled back and the
    /// first error is returned.
    fn register_delayed_sigactions<F>(
        &self,
        signals: &SignalSet,
        voter: F,
    ) -> SignalResult<HashMap<Signal, DelayedRegistration>>
    where
        F: Fn(Signal, VoteReply) + Send + Sync + 'static;

    /// Remove every registration, returning the failures by signal
    fn unregister_delayed_sigactions<'a, I>(&self, registrations: I) -> HashMap<Signal, SignalError>
    where
        I: IntoIterator<Item = &'a DelayedRegistration>;

    /// Whether at least one registration currently delays `signal`
    fn is_delaying(&self, signal: Signal) -> bool;
}
