/*!
 * Core Module
 * Error types, platform limits and raw signal calls
 */

pub mod errors;
pub mod limits;
pub(crate) mod sys;

// Re-export for convenience
pub use errors::{SignalError, SignalResult};
pub use limits::NSIG;
