/*!
 * Sigdelay Helper - Main Entry Point
 *
 * Small driver used by the end-to-end tests and for manual checks:
 * - delay-signal-unsig: delay one signal with the ignore-and-redeliver delayer
 * - delay-signal-block: delay one signal with the block delayer
 * - manual-test: send SIGTERM to itself twice while it is delayed, only
 *   the first occurrence is allowed through
 *
 * Logs go to stderr; stdout only carries the lines the tests assert on.
 */

use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::{miette, IntoDiagnostic};
use nix::libc::{self, c_int, c_void};
use nix::sys::signal::{kill, Signal as UnixSignal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::info;

use sigdelay::{
    init_tracing, SigactionDelayer, SigactionHandler, SigactionRecord, Signal, UnsigDelayer,
    VoteReply,
};

/// Delay before the helper voters allow a signal through
const VOTE_DELAY: Duration = Duration::from_millis(500);

static OCCURRENCES: AtomicUsize = AtomicUsize::new(0);

#[derive(Parser)]
#[command(name = "sigdelay-helper", about = "Exercise delayed signal delivery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delay a signal by ignoring it and resending it once allowed
    DelaySignalUnsig(DelayArgs),
    /// Delay a signal by keeping it blocked until allowed (Linux and Android)
    DelaySignalBlock(DelayArgs),
    /// Delay SIGTERM and send it to ourselves twice
    ManualTest {
        #[arg(long, value_enum, default_value_t = Mode::Unsig)]
        mode: Mode,
    },
}

#[derive(Args)]
struct DelayArgs {
    #[arg(long)]
    signal_number: c_int,
    /// Keep the current disposition instead of installing the printing handler
    #[arg(long)]
    keep_disposition: bool,
    /// Drop the 1st, 3rd, ... occurrences and allow the others
    #[arg(long)]
    drop_every_other: bool,
    /// Silent voters allowing every occurrence, on top of the printing one
    #[arg(long, default_value_t = 0)]
    extra_voters: usize,
    /// Stop delaying and exit once this many occurrences were voted on
    #[arg(long)]
    exit_after: Option<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Unsig,
    Block,
}

fn main() -> miette::Result<()> {
    match Cli::parse().command {
        Command::DelaySignalUnsig(args) => delay_signal_unsig(&args),
        Command::DelaySignalBlock(args) => delay_signal_block(&args),
        Command::ManualTest { mode } => manual_test(mode),
    }
}

fn delay_signal_unsig(args: &DelayArgs) -> miette::Result<()> {
    init_tracing();
    let signal = parse_signal(args.signal_number)?;
    delay_signal(&UnsigDelayer::new(), signal, args)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn delay_signal_block(args: &DelayArgs) -> miette::Result<()> {
    let signal = parse_signal(args.signal_number)?;
    // Before anything else can spawn a thread
    let delayer = sigdelay::BlockDelayer::bootstrap(&[signal].into())?;
    init_tracing();
    delay_signal(&delayer, signal, args)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn delay_signal_block(_args: &DelayArgs) -> miette::Result<()> {
    Err(block_unavailable())
}

/// Register the voters described by `args`, then wait
///
/// The printing voter answers after [`VOTE_DELAY`] and writes its decision
/// to stdout just before answering.
fn delay_signal<D: SigactionDelayer>(delayer: &D, signal: Signal, args: &DelayArgs) -> miette::Result<()> {
    if !args.keep_disposition {
        SigactionRecord::new(SigactionHandler::Simple(print_in_handler)).install(signal, true)?;
    }

    let (voted_tx, voted_rx) = flume::unbounded::<()>();
    let drop_every_other = args.drop_every_other;
    let occurrences = AtomicUsize::new(0);
    let mut registrations = vec![delayer.register_delayed_sigaction(signal, move |_, reply| {
        let allow = !drop_every_other || occurrences.fetch_add(1, Ordering::SeqCst) % 2 == 1;
        let voted = voted_tx.clone();
        thread::spawn(move || {
            thread::sleep(VOTE_DELAY);
            if allow {
                write_raw(1, b"allowing signal to be resent\n");
            } else {
                write_raw(1, b"dropping signal\n");
            }
            reply.vote(allow);
            let _ = voted.send(());
        });
    })?];
    for _ in 0..args.extra_voters {
        registrations.push(delayer.register_delayed_sigaction(signal, |_, reply| reply.allow())?);
    }

    let Some(limit) = args.exit_after else {
        sleep_forever()
    };
    for _ in 0..limit {
        voted_rx.recv().into_diagnostic()?;
    }
    // Waits for the last occurrence to be delivered or dropped
    if let Some((signal, err)) = delayer.unregister_delayed_sigactions(&registrations).into_iter().next() {
        return Err(miette!("Cannot stop delaying {signal}: {err}"));
    }
    write_raw(1, b"no longer delayed\n");
    Ok(())
}

fn manual_test(mode: Mode) -> miette::Result<()> {
    let delayed = Signal::TERMINATED;
    match mode {
        Mode::Unsig => {
            init_tracing();
            install_logging_handlers(delayed)?;
            let delayer = UnsigDelayer::new();
            delayer.register_delayed_sigaction(delayed, allow_every_other)?;
            send_twice(delayed)
        }
        Mode::Block => manual_test_block(delayed),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn manual_test_block(delayed: Signal) -> miette::Result<()> {
    let delayer = sigdelay::BlockDelayer::bootstrap(&Signal::to_forward_to_subprocesses())?;
    init_tracing();
    install_logging_handlers(delayed)?;
    delayer.register_delayed_sigaction(delayed, allow_every_other)?;
    send_twice(delayed)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn manual_test_block(_delayed: Signal) -> miette::Result<()> {
    Err(block_unavailable())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn block_unavailable() -> miette::Report {
    miette!("The block delayer is only available on Linux and Android")
}

fn install_logging_handlers(delayed: Signal) -> miette::Result<()> {
    SigactionRecord::new(SigactionHandler::Simple(log_in_handler)).install(Signal::INTERRUPT, true)?;
    SigactionRecord::new(SigactionHandler::Simple(log_in_handler)).install(delayed, true)?;
    Ok(())
}

fn send_twice(delayed: Signal) -> miette::Result<()> {
    let unix_signal = UnixSignal::try_from(delayed).map_err(|e| miette!("{e}"))?;
    for attempt in ["1st", "2nd"] {
        thread::sleep(Duration::from_secs(1));
        info!(signal = %delayed, "Sending signal to myself ({attempt} time)");
        kill(Pid::this(), unix_signal).into_diagnostic()?;
    }
    thread::sleep(Duration::from_secs(3));
    Ok(())
}

fn parse_signal(signal_number: c_int) -> miette::Result<Signal> {
    Signal::new(signal_number).ok_or_else(|| miette!("Invalid signal number {signal_number}"))
}

/// Voter allowing every other occurrence, after a delay
fn allow_every_other(signal: Signal, reply: VoteReply) {
    let allow = OCCURRENCES.fetch_add(1, Ordering::SeqCst) % 2 == 0;
    thread::spawn(move || {
        thread::sleep(VOTE_DELAY);
        if allow {
            info!(signal = %signal, "Allowing signal to be resent");
        } else {
            info!(signal = %signal, "Dropping signal");
        }
        reply.vote(allow);
    });
}

extern "C" fn print_in_handler(_signal: c_int) {
    write_raw(1, b"in sigaction handler\n");
}

extern "C" fn log_in_handler(signal: c_int) {
    let message: &[u8] = if signal == libc::SIGINT {
        b"in sigaction handler for interrupt\n"
    } else {
        b"in sigaction handler for terminated\n"
    };
    write_raw(2, message);
}

/// Unbuffered write, usable from a signal handler
fn write_raw(fd: c_int, bytes: &[u8]) {
    // SAFETY: write(2) is async-signal-safe and the buffer outlives the call
    unsafe { libc::write(fd, bytes.as_ptr() as *const c_void, bytes.len()) };
}

fn sleep_forever() -> ! {
    loop {
        thread::park();
    }
}
