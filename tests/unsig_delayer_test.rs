/*!
 * Unsig Delayer Tests
 * In-process delays of SIGUSR1/SIGUSR2 with the ignore-and-redeliver strategy
 */

use nix::errno::Errno;
use nix::libc::c_int;
use nix::sys::signal::{raise, Signal as UnixSignal};
use pretty_assertions::assert_eq;
use serial_test::serial;
use sigdelay::{
    current_disposition, SigactionDelayer, SigactionHandler, SigactionRecord, Signal, SignalError,
    SignalSet, UnsigDelayer, VoteReply,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

static USR1_RUNS: AtomicUsize = AtomicUsize::new(0);

extern "C" fn count_usr1(_: c_int) {
    USR1_RUNS.fetch_add(1, Ordering::SeqCst);
}

extern "C" fn other_handler(_: c_int) {}

fn counting_handler() -> SigactionRecord {
    SigactionRecord::new(SigactionHandler::Simple(count_usr1))
}

fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Install the counting handler on SIGUSR1, returning what to restore
fn setup_usr1() -> SigactionRecord {
    let before = current_disposition(Signal::USER_DEFINED_1).unwrap();
    counting_handler().install(Signal::USER_DEFINED_1, false).unwrap();
    USR1_RUNS.store(0, Ordering::SeqCst);
    before
}

#[test]
#[serial]
fn test_allowed_signal_runs_original_once() {
    let before = setup_usr1();
    let delayer = UnsigDelayer::new();
    let votes = Arc::new(AtomicUsize::new(0));

    let mut registrations = Vec::new();
    for _ in 0..2 {
        let votes = votes.clone();
        registrations.push(
            delayer
                .register_delayed_sigaction(Signal::USER_DEFINED_1, move |_, reply| {
                    votes.fetch_add(1, Ordering::SeqCst);
                    reply.allow();
                })
                .unwrap(),
        );
    }

    assert!(delayer.is_delaying(Signal::USER_DEFINED_1));
    assert_ne!(current_disposition(Signal::USER_DEFINED_1).unwrap(), counting_handler());
    assert_eq!(
        delayer.original_sigaction(Signal::USER_DEFINED_1),
        Some(counting_handler())
    );

    raise(UnixSignal::SIGUSR1).unwrap();
    assert!(wait_until(|| USR1_RUNS.load(Ordering::SeqCst) == 1));
    assert_eq!(votes.load(Ordering::SeqCst), 2);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(USR1_RUNS.load(Ordering::SeqCst), 1);

    for registration in &registrations {
        delayer.unregister_delayed_sigaction(registration).unwrap();
    }
    assert!(!delayer.is_delaying(Signal::USER_DEFINED_1));
    assert_eq!(current_disposition(Signal::USER_DEFINED_1).unwrap(), counting_handler());

    before.install(Signal::USER_DEFINED_1, false).unwrap();
}

#[test]
#[serial]
fn test_handler_waits_for_the_vote() {
    let before = setup_usr1();
    let delayer = UnsigDelayer::new();
    let (replies_tx, replies_rx) = flume::unbounded::<VoteReply>();

    let registration = delayer
        .register_delayed_sigaction(Signal::USER_DEFINED_1, move |_, reply| {
            let _ = replies_tx.send(reply);
        })
        .unwrap();

    raise(UnixSignal::SIGUSR1).unwrap();
    let reply = replies_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(reply.signal(), Signal::USER_DEFINED_1);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(USR1_RUNS.load(Ordering::SeqCst), 0);

    reply.allow();
    assert!(wait_until(|| USR1_RUNS.load(Ordering::SeqCst) == 1));

    delayer.unregister_delayed_sigaction(&registration).unwrap();
    before.install(Signal::USER_DEFINED_1, false).unwrap();
}

#[test]
#[serial]
fn test_single_drop_vote_skips_the_handler() {
    let before = setup_usr1();
    let delayer = UnsigDelayer::new();
    let votes = Arc::new(AtomicUsize::new(0));

    let allow_votes = votes.clone();
    let allowing = delayer
        .register_delayed_sigaction(Signal::USER_DEFINED_1, move |_, reply| {
            allow_votes.fetch_add(1, Ordering::SeqCst);
            reply.allow();
        })
        .unwrap();
    let drop_votes = votes.clone();
    let dropping = delayer
        .register_delayed_sigaction(Signal::USER_DEFINED_1, move |_, reply| {
            drop_votes.fetch_add(1, Ordering::SeqCst);
            reply.drop_signal();
        })
        .unwrap();

    raise(UnixSignal::SIGUSR1).unwrap();
    assert!(wait_until(|| votes.load(Ordering::SeqCst) == 2));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(USR1_RUNS.load(Ordering::SeqCst), 0);

    let failures = delayer.unregister_delayed_sigactions([&allowing, &dropping]);
    assert!(failures.is_empty());
    assert_eq!(current_disposition(Signal::USER_DEFINED_1).unwrap(), counting_handler());

    before.install(Signal::USER_DEFINED_1, false).unwrap();
}

#[test]
#[serial]
fn test_abandoned_vote_counts_as_allowed() {
    let before = setup_usr1();
    let delayer = UnsigDelayer::new();

    let registration = delayer
        .register_delayed_sigaction(Signal::USER_DEFINED_1, |_, reply| drop(reply))
        .unwrap();

    raise(UnixSignal::SIGUSR1).unwrap();
    assert!(wait_until(|| USR1_RUNS.load(Ordering::SeqCst) == 1));

    delayer.unregister_delayed_sigaction(&registration).unwrap();
    before.install(Signal::USER_DEFINED_1, false).unwrap();
}

#[test]
#[serial]
fn test_unregister_twice_is_harmless() {
    let signal = Signal::USER_DEFINED_2;
    let before = current_disposition(signal).unwrap();
    let delayer = UnsigDelayer::new();

    let first = delayer.register_delayed_sigaction(signal, |_, r| r.allow()).unwrap();
    let second = delayer.register_delayed_sigaction(signal, |_, r| r.allow()).unwrap();
    assert_ne!(first, second);

    delayer.unregister_delayed_sigaction(&first).unwrap();
    delayer.unregister_delayed_sigaction(&first).unwrap();
    assert!(delayer.is_delaying(signal));

    delayer.unregister_delayed_sigaction(&second).unwrap();
    delayer.unregister_delayed_sigaction(&second).unwrap();
    assert!(!delayer.is_delaying(signal));
    assert_eq!(current_disposition(signal).unwrap(), before);
}

#[test]
#[serial]
fn test_install_through_the_delayer() {
    let signal = Signal::USER_DEFINED_2;
    let before = current_disposition(signal).unwrap();
    let delayer = UnsigDelayer::new();
    let handler = SigactionRecord::new(SigactionHandler::Simple(other_handler));

    assert_eq!(delayer.update_original_sigaction(signal, handler.clone()), None);

    let registration = delayer.register_delayed_sigaction(signal, |_, r| r.allow()).unwrap();
    let live = current_disposition(signal).unwrap();

    // Only the original is updated, the live disposition stays
    assert_eq!(delayer.install(signal, &handler, true).unwrap(), Some(before.clone()));
    assert_eq!(delayer.install(signal, &handler, true).unwrap(), None);
    assert_eq!(current_disposition(signal).unwrap(), live);
    assert_eq!(delayer.original_sigaction(signal), Some(handler.clone()));

    let previous = delayer.update_original_sigaction(signal, SigactionRecord::ignore());
    assert_eq!(previous, Some(handler.clone()));
    delayer.update_original_sigaction(signal, handler.clone());

    delayer.unregister_delayed_sigaction(&registration).unwrap();
    assert_eq!(current_disposition(signal).unwrap(), handler);

    before.install(signal, false).unwrap();
}

#[test]
#[serial]
fn test_direct_install_becomes_the_original() {
    let signal = Signal::USER_DEFINED_2;
    let before = current_disposition(signal).unwrap();
    let delayer = UnsigDelayer::new();
    let handler = SigactionRecord::new(SigactionHandler::Simple(other_handler));

    let first = delayer.register_delayed_sigaction(signal, |_, r| r.allow()).unwrap();
    let live = current_disposition(signal).unwrap();

    // Bypass the delayer, then register again: the delay is restored
    handler.install(signal, false).unwrap();
    let second = delayer.register_delayed_sigaction(signal, |_, r| r.allow()).unwrap();
    assert_eq!(current_disposition(signal).unwrap(), live);
    assert_eq!(delayer.original_sigaction(signal), Some(handler.clone()));

    let failures = delayer.unregister_delayed_sigactions([&first, &second]);
    assert!(failures.is_empty());
    assert_eq!(current_disposition(signal).unwrap(), handler);

    before.install(signal, false).unwrap();
}

#[test]
fn test_uncatchable_signals_are_rejected() {
    let delayer = UnsigDelayer::new();
    for signal in [Signal::KILLED, Signal::SUSPENDED_BY_SIGNAL] {
        let err = delayer.register_delayed_sigaction(signal, |_, r| r.allow()).unwrap_err();
        assert_eq!(err, SignalError::NonDestructive(Errno::EINVAL));
    }
    assert!(delayer.delayed_signals().is_empty());
}

#[test]
#[serial]
fn test_batch_registration_rolls_back() {
    let before = current_disposition(Signal::HANGUP).unwrap();
    let delayer = UnsigDelayer::new();

    let signals = SignalSet::from([Signal::HANGUP, Signal::KILLED]);
    let err = delayer
        .register_delayed_sigactions(&signals, |_, r| r.allow())
        .unwrap_err();
    assert_eq!(err, SignalError::NonDestructive(Errno::EINVAL));

    assert!(!delayer.is_delaying(Signal::HANGUP));
    assert_eq!(current_disposition(Signal::HANGUP).unwrap(), before);
}

#[test]
#[serial]
fn test_batch_registration() {
    let before_usr1 = current_disposition(Signal::USER_DEFINED_1).unwrap();
    let before_usr2 = current_disposition(Signal::USER_DEFINED_2).unwrap();
    let delayer = UnsigDelayer::new();

    let signals = SignalSet::from([Signal::USER_DEFINED_1, Signal::USER_DEFINED_2]);
    let registrations = delayer
        .register_delayed_sigactions(&signals, |_, r| r.allow())
        .unwrap();
    assert_eq!(registrations.len(), 2);
    assert_eq!(delayer.delayed_signals(), signals);
    for (signal, registration) in &registrations {
        assert_eq!(registration.signal(), *signal);
    }

    let failures = delayer.unregister_delayed_sigactions(registrations.values());
    assert!(failures.is_empty());
    assert!(delayer.delayed_signals().is_empty());
    assert_eq!(current_disposition(Signal::USER_DEFINED_1).unwrap(), before_usr1);
    assert_eq!(current_disposition(Signal::USER_DEFINED_2).unwrap(), before_usr2);
}

#[test]
#[serial]
fn test_second_delayer_cannot_take_a_delayed_signal() {
    let signal = Signal::USER_DEFINED_2;
    let before = current_disposition(signal).unwrap();
    let first = UnsigDelayer::new();
    let second = UnsigDelayer::new();

    let registration = first.register_delayed_sigaction(signal, |_, r| r.allow()).unwrap();
    let live = current_disposition(signal).unwrap();

    let err = second
        .register_delayed_sigaction(signal, |_, r| r.allow())
        .unwrap_err();
    assert_eq!(err, SignalError::NonDestructive(Errno::EBUSY));
    assert!(!second.is_delaying(signal));
    assert_eq!(current_disposition(signal).unwrap(), live);

    // Released as soon as the first delayer lets go
    first.unregister_delayed_sigaction(&registration).unwrap();
    assert_eq!(current_disposition(signal).unwrap(), before);
    let registration = second.register_delayed_sigaction(signal, |_, r| r.allow()).unwrap();
    second.unregister_delayed_sigaction(&registration).unwrap();
    assert_eq!(current_disposition(signal).unwrap(), before);
}
