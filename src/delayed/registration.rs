/*!
 * Delayed Registrations
 * Handles correlating a signal with one registered voter, and voter replies
 */

use crate::signals::Signal;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Voter consulted before a delayed signal runs its real handler
///
/// The voter receives the signal and a [`VoteReply`] it must answer, now or
/// later and from any thread. Delivery of the signal (and of every other
/// signal of the same delayer) waits until all voters answered.
///
/// A voter must not register or unregister on the delayer calling it.
pub type Voter = Arc<dyn Fn(Signal, VoteReply) + Send + Sync>;

/// Handle returned by a delayer for one registered voter
///
/// Equality and hashing only look at the unique id.
#[derive(Debug, Clone, Copy)]
pub struct DelayedRegistration {
    id: Uuid,
    signal: Signal,
}

impl DelayedRegistration {
    pub(crate) fn new(signal: Signal) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal,
        }
    }

    /// Signal this registration delays
    #[inline]
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Process-unique id of the registration
    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl PartialEq for DelayedRegistration {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DelayedRegistration {}

impl Hash for DelayedRegistration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for DelayedRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.signal, self.id)
    }
}

// ============================================================================
// Votes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Vote {
    Allow,
    Drop,
    /// The reply was dropped without an answer
    Abandoned,
}

/// Answer slot handed to a voter for one signal occurrence
///
/// Consumed by answering. Dropping it unanswered counts as allowing the
/// signal, and is logged.
pub struct VoteReply {
    signal: Signal,
    tx: Option<flume::Sender<Vote>>,
}

impl VoteReply {
    pub(crate) fn new(signal: Signal, tx: flume::Sender<Vote>) -> Self {
        Self {
            signal,
            tx: Some(tx),
        }
    }

    /// Signal being voted on
    #[inline]
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Answer: run the real handler (`true`) or drop the signal (`false`)
    pub fn vote(mut self, allow: bool) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(if allow { Vote::Allow } else { Vote::Drop });
        }
    }

    /// Let the signal run its real handler
    pub fn allow(self) {
        self.vote(true)
    }

    /// Drop this occurrence of the signal
    pub fn drop_signal(self) {
        self.vote(false)
    }
}

impl Drop for VoteReply {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Vote::Abandoned);
        }
    }
}

impl fmt::Debug for VoteReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoteReply")
            .field("signal", &self.signal)
            .field("answered", &self.tx.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registration_identity() {
        let first = DelayedRegistration::new(Signal::TERMINATED);
        let second = DelayedRegistration::new(Signal::TERMINATED);
        assert_ne!(first, second);
        assert_eq!(first, first);
        assert_eq!(first.signal(), Signal::TERMINATED);

        let set: HashSet<_> = [first, second, first].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_reply_sends_exactly_once() {
        let (tx, rx) = flume::unbounded();
        VoteReply::new(Signal::HANGUP, tx.clone()).allow();
        VoteReply::new(Signal::HANGUP, tx.clone()).drop_signal();
        drop(VoteReply::new(Signal::HANGUP, tx));

        let votes: Vec<_> = rx.iter().collect();
        assert_eq!(votes, vec![Vote::Allow, Vote::Drop, Vote::Abandoned]);
    }
}
