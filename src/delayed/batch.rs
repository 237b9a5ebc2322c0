/*!
 * Batch Registration
 * Register or unregister many signals under one lock acquisition
 */

use super::registration::{DelayedRegistration, Voter};
use crate::core::errors::{SignalError, SignalResult};
use crate::signals::{Signal, SignalSet};
use std::collections::HashMap;
use tracing::error;

/// Register `voter` for every signal, rolling back on the first failure
pub(crate) fn register_all<S>(
    state: &mut S,
    signals: &SignalSet,
    voter: &Voter,
    mut register: impl FnMut(&mut S, Signal, Voter) -> SignalResult<DelayedRegistration>,
    mut unregister: impl FnMut(&mut S, &DelayedRegistration) -> SignalResult<()>,
) -> SignalResult<HashMap<Signal, DelayedRegistration>> {
    let mut registered = HashMap::with_capacity(signals.len());

    for &signal in signals {
        match register(state, signal, voter.clone()) {
            Ok(registration) => {
                registered.insert(signal, registration);
            }
            Err(err) => {
                for registration in registered.values() {
                    if let Err(rollback) = unregister(state, registration) {
                        error!(
                            signal = %registration.signal(),
                            error = %rollback,
                            "Cannot unregister delayed sigaction while rolling back a failed registration"
                        );
                    }
                }
                return Err(err);
            }
        }
    }

    Ok(registered)
}

/// Unregister everything, collecting failures by signal
pub(crate) fn unregister_all<'a, S>(
    state: &mut S,
    registrations: impl IntoIterator<Item = &'a DelayedRegistration>,
    mut unregister: impl FnMut(&mut S, &DelayedRegistration) -> SignalResult<()>,
) -> HashMap<Signal, SignalError> {
    let mut failures = HashMap::new();
    for registration in registrations {
        if let Err(err) = unregister(state, registration) {
            failures.insert(registration.signal(), err);
        }
    }
    failures
}
