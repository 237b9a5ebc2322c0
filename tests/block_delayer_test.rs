/*!
 * Block Delayer Tests
 * Bootstrap and registration bookkeeping
 *
 * Bootstrap is once per process, so everything lives in a single test.
 * No signal is sent here: the test harness threads do not share the mask,
 * delivery is covered by the end-to-end tests.
 */

#![cfg(any(target_os = "linux", target_os = "android"))]

use nix::errno::Errno;
use pretty_assertions::assert_eq;
use sigdelay::{BlockDelayer, SigactionDelayer, Signal, SignalError, SignalSet};

#[test]
fn test_bootstrap_and_registration() {
    assert!(!BlockDelayer::is_bootstrapped());
    let delayer = BlockDelayer::bootstrap(&SignalSet::from([Signal::USER_DEFINED_2])).unwrap();
    assert!(BlockDelayer::is_bootstrapped());

    let first = delayer
        .register_delayed_sigaction(Signal::USER_DEFINED_2, |_, r| r.allow())
        .unwrap();
    let second = delayer
        .register_delayed_sigaction(Signal::USER_DEFINED_2, |_, r| r.drop_signal())
        .unwrap();
    assert!(delayer.is_delaying(Signal::USER_DEFINED_2));
    assert_eq!(
        delayer.delayed_signals(),
        SignalSet::from([Signal::USER_DEFINED_2])
    );

    delayer.unregister_delayed_sigaction(&first).unwrap();
    delayer.unregister_delayed_sigaction(&first).unwrap();
    assert!(delayer.is_delaying(Signal::USER_DEFINED_2));

    delayer.unregister_delayed_sigaction(&second).unwrap();
    assert!(!delayer.is_delaying(Signal::USER_DEFINED_2));
    assert!(delayer.delayed_signals().is_empty());

    let err = delayer
        .register_delayed_sigaction(Signal::KILLED, |_, r| r.allow())
        .unwrap_err();
    assert_eq!(err, SignalError::NonDestructive(Errno::EINVAL));

    let again = std::panic::catch_unwind(|| BlockDelayer::bootstrap(&SignalSet::new()));
    assert!(again.is_err());
}
