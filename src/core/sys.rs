/*!
 * Raw Signal Calls
 * Thin wrappers over the libc signal primitives, reporting failures as `Errno`
 *
 * Signal numbers outside of the standard set (realtime signals on Linux) are
 * not representable by `nix::sys::signal::Signal`, so the calls working on
 * arbitrary numbers go through libc directly.
 */

use nix::errno::Errno;
use nix::libc::{self, c_int, sigset_t};
use std::mem::MaybeUninit;
use std::ptr;

// ============================================================================
// Signal Sets
// ============================================================================

/// A sigset with no member
pub(crate) fn empty_sigset() -> sigset_t {
    let mut set = MaybeUninit::<sigset_t>::uninit();
    // SAFETY: sigemptyset fully initializes the set it is given
    unsafe {
        libc::sigemptyset(set.as_mut_ptr());
        set.assume_init()
    }
}

/// A sigset containing every signal
pub(crate) fn full_sigset() -> sigset_t {
    let mut set = MaybeUninit::<sigset_t>::uninit();
    // SAFETY: sigfillset fully initializes the set it is given
    unsafe {
        libc::sigfillset(set.as_mut_ptr());
        set.assume_init()
    }
}

#[inline]
pub(crate) fn sigset_add(set: &mut sigset_t, signo: c_int) {
    // SAFETY: set is a valid, initialized sigset
    unsafe { libc::sigaddset(set, signo) };
}

#[inline]
pub(crate) fn sigset_remove(set: &mut sigset_t, signo: c_int) {
    // SAFETY: set is a valid, initialized sigset
    unsafe { libc::sigdelset(set, signo) };
}

#[inline]
pub(crate) fn sigset_contains(set: &sigset_t, signo: c_int) -> bool {
    // SAFETY: set is a valid, initialized sigset
    unsafe { libc::sigismember(set, signo) == 1 }
}

// ============================================================================
// Dispositions
// ============================================================================

/// Install `new` (if any) for `signo` and return the disposition that was live
pub(crate) fn swap_sigaction(
    signo: c_int,
    new: Option<&libc::sigaction>,
) -> nix::Result<libc::sigaction> {
    let mut old = MaybeUninit::<libc::sigaction>::zeroed();
    let new_ptr = new.map_or(ptr::null(), |action| action as *const libc::sigaction);
    // SAFETY: both pointers are valid for the duration of the call
    let res = unsafe { libc::sigaction(signo, new_ptr, old.as_mut_ptr()) };
    Errno::result(res)?;
    // SAFETY: sigaction succeeded and filled the old action
    Ok(unsafe { old.assume_init() })
}

// ============================================================================
// Thread Masks and Delivery
// ============================================================================

/// Apply `set` to the calling thread's mask with `how`, returning the old mask
pub(crate) fn thread_mask(how: c_int, set: Option<&sigset_t>) -> nix::Result<sigset_t> {
    let mut old = empty_sigset();
    let set_ptr = set.map_or(ptr::null(), |set| set as *const sigset_t);
    // SAFETY: both pointers are valid for the duration of the call
    let ret = unsafe { libc::pthread_sigmask(how, set_ptr, &mut old) };
    if ret != 0 {
        return Err(Errno::from_raw(ret));
    }
    Ok(old)
}

/// Mask of the calling thread
#[inline]
pub(crate) fn current_thread_mask() -> nix::Result<sigset_t> {
    thread_mask(libc::SIG_BLOCK, None)
}

/// Thread-directed send to the calling thread
pub(crate) fn kill_current_thread(signo: c_int) -> nix::Result<()> {
    // SAFETY: pthread_self always designates a live thread
    let ret = unsafe { libc::pthread_kill(libc::pthread_self(), signo) };
    if ret != 0 {
        return Err(Errno::from_raw(ret));
    }
    Ok(())
}

/// Signals pending on the calling thread or on the process
pub(crate) fn pending_signals() -> nix::Result<sigset_t> {
    let mut set = empty_sigset();
    // SAFETY: set is valid for writes
    let res = unsafe { libc::sigpending(&mut set) };
    Errno::result(res)?;
    Ok(set)
}

/// Atomically replace the thread mask with `mask` and wait for one signal
/// delivery, then restore the previous mask.
pub(crate) fn suspend_with_mask(mask: &sigset_t) {
    // SAFETY: mask is a valid sigset. sigsuspend always returns -1 (EINTR)
    // after a handler ran, there is nothing to report.
    unsafe { libc::sigsuspend(mask) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigset_membership() {
        let mut set = empty_sigset();
        assert!(!sigset_contains(&set, libc::SIGUSR1));

        sigset_add(&mut set, libc::SIGUSR1);
        assert!(sigset_contains(&set, libc::SIGUSR1));
        assert!(!sigset_contains(&set, libc::SIGUSR2));

        sigset_remove(&mut set, libc::SIGUSR1);
        assert!(!sigset_contains(&set, libc::SIGUSR1));

        let full = full_sigset();
        assert!(sigset_contains(&full, libc::SIGTERM));
    }

    #[test]
    fn test_read_only_calls() {
        // Reading the disposition or the mask never changes anything
        assert!(swap_sigaction(libc::SIGUSR2, None).is_ok());
        assert!(current_thread_mask().is_ok());
        assert!(pending_signals().is_ok());
    }

    #[test]
    fn test_invalid_signal_number() {
        assert_eq!(swap_sigaction(0, None).err(), Some(Errno::EINVAL));
    }
}
