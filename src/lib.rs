/*!
 * Sigdelay Library
 * Delay POSIX signal delivery until registered voters allow it
 *
 * - [`signals`]: signal identities and sigaction records
 * - [`delayed`]: the delaying strategies and their registrations
 * - [`monitoring`]: tracing setup
 */

pub mod core;
pub mod delayed;
pub mod monitoring;
pub mod signals;

// Re-exports
pub use crate::core::{SignalError, SignalResult};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use delayed::BlockDelayer;
pub use delayed::{
    DelayedRegistration, DelayerConfig, SigactionDelayer, UnsigDelayer, VoteReply, Voter,
};
pub use monitoring::init_tracing;
pub use signals::{
    current_disposition, ExtendedInfoHandlerFn, SigactionFlags, SigactionHandler, SigactionRecord,
    Signal, SignalSet, SimpleHandlerFn,
};
