/*!
 * Delayed Sigactions
 * Hold signal delivery until registered voters agree
 *
 * Two strategies implement [`SigactionDelayer`]:
 * - [`UnsigDelayer`] takes the sigaction away and resends allowed signals
 * - [`BlockDelayer`] keeps signals blocked and delivers allowed ones on a
 *   dedicated thread (Linux and Android)
 *
 * Voters are called on a per-signal watcher thread, one occurrence at a time.
 * While voting, every other registration and occurrence of the same delayer
 * waits.
 */

mod batch;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod block;
pub mod config;
pub mod registration;
mod source;
mod thread;
pub mod traits;
pub mod unsig;
mod vote;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use block::BlockDelayer;
pub use config::DelayerConfig;
pub use registration::{DelayedRegistration, VoteReply, Voter};
pub use traits::SigactionDelayer;
pub use unsig::UnsigDelayer;
