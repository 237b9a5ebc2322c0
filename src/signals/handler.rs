/*!
 * Sigaction Handler
 * The handler part of a signal disposition
 */

use nix::libc::{self, c_int, c_void, siginfo_t, sighandler_t};
use std::fmt;

/// Handler taking only the signal number (`sa_handler`)
pub type SimpleHandlerFn = extern "C" fn(c_int);

/// Handler receiving the siginfo and the user context (`sa_sigaction`)
pub type ExtendedInfoHandlerFn = extern "C" fn(c_int, *mut siginfo_t, *mut c_void);

/// What a disposition does when the signal is delivered
///
/// Two handlers are equal iff they are the same variant and, for the function
/// variants, point to the same address. `Ignore` and `Default` are their own
/// variants: `Simple` wrapping a function whose address happens to equal the
/// `SIG_IGN` sentinel is still not `Ignore`.
#[derive(Clone, Copy)]
pub enum SigactionHandler {
    Ignore,
    Default,
    Simple(SimpleHandlerFn),
    ExtendedInfo(ExtendedInfoHandlerFn),
}

impl SigactionHandler {
    /// Address stored in the raw `sigaction` for this handler
    pub fn address(&self) -> sighandler_t {
        match self {
            SigactionHandler::Ignore => libc::SIG_IGN,
            SigactionHandler::Default => libc::SIG_DFL,
            SigactionHandler::Simple(handler) => *handler as sighandler_t,
            SigactionHandler::ExtendedInfo(handler) => *handler as sighandler_t,
        }
    }

    /// Interpret a raw handler address
    ///
    /// `siginfo` tells which member of the raw union is meaningful.
    ///
    /// # Safety
    /// `address` must be `SIG_IGN`, `SIG_DFL` or the address of a function with
    /// the signature matching `siginfo`, as the kernel hands back.
    pub(crate) unsafe fn from_address(address: sighandler_t, siginfo: bool) -> Self {
        match address {
            libc::SIG_IGN => SigactionHandler::Ignore,
            libc::SIG_DFL => SigactionHandler::Default,
            _ if siginfo => SigactionHandler::ExtendedInfo(std::mem::transmute::<
                sighandler_t,
                ExtendedInfoHandlerFn,
            >(address)),
            _ => SigactionHandler::Simple(std::mem::transmute::<sighandler_t, SimpleHandlerFn>(
                address,
            )),
        }
    }

    /// Whether this is the ignore or the default handler
    #[inline]
    pub fn is_special(&self) -> bool {
        matches!(self, SigactionHandler::Ignore | SigactionHandler::Default)
    }
}

impl PartialEq for SigactionHandler {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SigactionHandler::Ignore, SigactionHandler::Ignore)
            | (SigactionHandler::Default, SigactionHandler::Default) => true,
            (SigactionHandler::Simple(_), SigactionHandler::Simple(_))
            | (SigactionHandler::ExtendedInfo(_), SigactionHandler::ExtendedInfo(_)) => {
                self.address() == other.address()
            }
            (SigactionHandler::Ignore, _)
            | (SigactionHandler::Default, _)
            | (SigactionHandler::Simple(_), _)
            | (SigactionHandler::ExtendedInfo(_), _) => false,
        }
    }
}

impl Eq for SigactionHandler {}

impl fmt::Debug for SigactionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigactionHandler::Ignore => write!(f, "Ignore"),
            SigactionHandler::Default => write!(f, "Default"),
            SigactionHandler::Simple(_) => write!(f, "Simple({:#x})", self.address()),
            SigactionHandler::ExtendedInfo(_) => write!(f, "ExtendedInfo({:#x})", self.address()),
        }
    }
}
