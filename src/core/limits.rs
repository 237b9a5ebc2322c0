/*!
 * System Limits and Constants
 *
 * Centralized location for platform signal limits and delayer defaults.
 *
 * - Platform-dictated values are marked with [PLATFORM]
 * - Values that shape thread behavior are marked with [THREAD]
 */

use nix::libc::c_int;
use std::time::Duration;

// =============================================================================
// SIGNAL NUMBERING
// =============================================================================

/// One past the highest signal number
/// [PLATFORM] Linux reserves 64 signals (32 standard + realtime)
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const NSIG: c_int = 65;

/// One past the highest signal number
/// [PLATFORM] BSD-derived systems only define the 31 standard signals
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const NSIG: c_int = 32;

// =============================================================================
// DEDICATED THREADS
// =============================================================================

/// Name of the thread resending signals for the ignore-and-redeliver strategy
/// [THREAD]
pub const UNSIG_THREAD_NAME: &str = "sigdelay-unsig";

/// Name of the only thread with delayed signals unblocked (block strategy)
/// [THREAD]
pub const BLOCK_THREAD_NAME: &str = "sigdelay-block";

/// Prefix of the per-signal watcher thread names
/// [THREAD]
pub const WATCHER_THREAD_PREFIX: &str = "sigdelay-watch";

/// Upper bound on how long an idle watcher takes to notice cancellation
/// [THREAD]
pub const WATCHER_POLL_INTERVAL: Duration = Duration::from_millis(500);
