/*!
 * Signals Module
 * Signal identity and the sigaction data model
 */

pub mod flags;
pub mod handler;
pub mod sigaction;
pub mod types;

// Re-export public API
pub use flags::SigactionFlags;
pub use handler::{ExtendedInfoHandlerFn, SigactionHandler, SimpleHandlerFn};
pub use sigaction::{current_disposition, SigactionRecord};
pub use types::{Signal, SignalSet};
