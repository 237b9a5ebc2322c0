/*!
 * Consensus
 * Fan one signal occurrence out to every voter and AND the answers
 */

use super::registration::{Vote, VoteReply, Voter};
use crate::signals::Signal;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, trace, warn};

/// Ask every voter about one occurrence of `signal` and wait for all answers
///
/// Returns whether the signal may run its real handler. With no voter the
/// answer is `true`. There is no timeout: a voter that never answers blocks
/// the caller forever.
pub(crate) fn poll_voters<'a>(signal: Signal, voters: impl IntoIterator<Item = &'a Voter>) -> bool {
    let (tx, rx) = flume::unbounded();

    let mut expected = 0usize;
    for voter in voters {
        let reply = VoteReply::new(signal, tx.clone());
        expected += 1;
        // A panicking voter drops its reply while unwinding, which counts as an answer
        if panic::catch_unwind(AssertUnwindSafe(|| voter(signal, reply))).is_err() {
            error!(signal = %signal, "Voter panicked");
        }
    }
    drop(tx);

    let mut allowed = true;
    for _ in 0..expected {
        match rx.recv() {
            Ok(Vote::Allow) => {}
            Ok(Vote::Drop) => allowed = false,
            Ok(Vote::Abandoned) => {
                warn!(signal = %signal, "Vote reply dropped without an answer, counting it as allowed")
            }
            Err(_) => {
                error!(signal = %signal, "INTERNAL ERROR: vote channel closed before every voter answered");
                break;
            }
        }
    }

    trace!(signal = %signal, voters = expected, allowed, "Consensus reached");
    allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn voter(f: impl Fn(Signal, VoteReply) + Send + Sync + 'static) -> Voter {
        Arc::new(f)
    }

    #[test]
    fn test_no_voter_allows() {
        assert!(poll_voters(Signal::TERMINATED, &Vec::<Voter>::new()));
    }

    #[test]
    fn test_unanimous_allow() {
        let voters = vec![voter(|_, r| r.allow()), voter(|_, r| r.allow())];
        assert!(poll_voters(Signal::TERMINATED, &voters));
    }

    #[test]
    fn test_single_drop_vetoes() {
        let voters = vec![
            voter(|_, r| r.allow()),
            voter(|_, r| r.drop_signal()),
            voter(|_, r| r.allow()),
        ];
        assert!(!poll_voters(Signal::TERMINATED, &voters));
    }

    #[test]
    fn test_waits_for_late_answers() {
        let answered = Arc::new(AtomicUsize::new(0));
        let late = {
            let answered = answered.clone();
            voter(move |_, reply| {
                let answered = answered.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(50));
                    answered.fetch_add(1, Ordering::SeqCst);
                    reply.allow();
                });
            })
        };

        assert!(poll_voters(Signal::HANGUP, &[late]));
        assert_eq!(answered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abandoned_reply_counts_as_allow() {
        let voters = vec![voter(|_, reply| drop(reply))];
        assert!(poll_voters(Signal::HANGUP, &voters));
    }

    #[test]
    fn test_panicking_voter_does_not_hang() {
        let voters = vec![voter(|_, _| panic!("voter failure")), voter(|_, r| r.drop_signal())];
        assert!(!poll_voters(Signal::HANGUP, &voters));
    }

    #[test]
    fn test_voter_sees_signal() {
        let voters = vec![voter(|signal, reply| reply.vote(signal == Signal::QUIT))];
        assert!(poll_voters(Signal::QUIT, &voters));
        assert!(!poll_voters(Signal::HANGUP, &voters));
    }
}
