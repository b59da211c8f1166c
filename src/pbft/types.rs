/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the vote collections used by the [`QuorumTracker`](super::tracker::QuorumTracker).

use std::collections::{HashMap, HashSet};

use crate::types::basic::{Address, CommittedSeal, CryptoHash, Round};

/// A single vote: `sender` attested to `digest`, optionally with some `extra` attachment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote<E> {
    pub sender: Address,
    pub digest: CryptoHash,
    pub extra: E,
}

/// Collects the votes of one kind cast in a single view. Each sender votes at most once; later votes
/// from the same sender are duplicates, whatever digest they name.
///
/// Votes are kept in arrival order.
#[derive(Clone, Debug)]
pub struct VoteSet<E> {
    voters: HashSet<Address>,
    votes: Vec<Vote<E>>,
}

/// Prepare votes carry no attachment.
pub type PrepareSet = VoteSet<()>;

/// Commit votes carry the sender's committed seal over the digest.
pub type CommitSet = VoteSet<CommittedSeal>;

impl<E> VoteSet<E> {
    pub fn new() -> VoteSet<E> {
        VoteSet {
            voters: HashSet::new(),
            votes: Vec::new(),
        }
    }

    /// Insert a vote. Returns `false` and leaves the set unchanged if `sender` has already voted.
    pub fn insert(&mut self, sender: Address, digest: CryptoHash, extra: E) -> bool {
        if !self.voters.insert(sender) {
            return false;
        }
        self.votes.push(Vote {
            sender,
            digest,
            extra,
        });
        true
    }

    pub fn contains(&self, sender: &Address) -> bool {
        self.voters.contains(sender)
    }

    /// Number of votes for exactly `digest`.
    pub fn count(&self, digest: &CryptoHash) -> usize {
        self.matching(digest).count()
    }

    /// The votes for exactly `digest`, in arrival order.
    pub fn matching<'a>(&'a self, digest: &'a CryptoHash) -> impl Iterator<Item = &'a Vote<E>> + 'a {
        self.votes.iter().filter(move |vote| &vote.digest == digest)
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

impl<E> Default for VoteSet<E> {
    fn default() -> Self {
        VoteSet::new()
    }
}

/// Keeps the highest round each validator has requested to move to within the current sequence.
#[derive(Clone, Debug, Default)]
pub struct RoundChangeSet {
    requests: HashMap<Address, Round>,
}

impl RoundChangeSet {
    pub fn new() -> RoundChangeSet {
        RoundChangeSet {
            requests: HashMap::new(),
        }
    }

    /// Record that `sender` requested `round`. Returns `false` if `sender` had already requested
    /// `round` or a higher round, in which case nothing changes.
    pub fn insert(&mut self, sender: Address, round: Round) -> bool {
        match self.requests.get(&sender) {
            Some(requested) if *requested >= round => false,
            _ => {
                self.requests.insert(sender, round);
                true
            }
        }
    }

    /// The highest round `sender` has requested.
    pub fn requested(&self, sender: &Address) -> Option<Round> {
        self.requests.get(sender).copied()
    }

    /// The largest round `R` such that at least `threshold` distinct validators requested a round of at
    /// least `R`, if that round is above `current`.
    ///
    /// This is the `threshold`-th highest request.
    pub fn target_round(&self, threshold: usize, current: Round) -> Option<Round> {
        if threshold == 0 || self.requests.len() < threshold {
            return None;
        }
        let mut rounds: Vec<Round> = self.requests.values().copied().collect();
        rounds.sort_unstable_by(|a, b| b.cmp(a));
        let target = rounds[threshold - 1];
        (target > current).then_some(target)
    }

    /// Forget every request for a round below `round`.
    pub fn retain_from(&mut self, round: Round) {
        self.requests.retain(|_, requested| *requested >= round)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[test]
fn vote_set_rejects_second_vote_from_same_sender_test() {
    let alice = Address::new([1; 20]);
    let bob = Address::new([2; 20]);
    let x = CryptoHash::new([7; 32]);
    let y = CryptoHash::new([8; 32]);

    let mut prepares = PrepareSet::new();
    assert!(prepares.insert(alice, x, ()));
    assert!(!prepares.insert(alice, x, ()));
    assert!(!prepares.insert(alice, y, ()));
    assert!(prepares.insert(bob, y, ()));

    assert_eq!(prepares.len(), 2);
    assert_eq!(prepares.count(&x), 1);
    assert_eq!(prepares.count(&y), 1);
}

#[test]
fn round_change_target_test() {
    let validator = |i: u8| Address::new([i; 20]);
    let mut round_changes = RoundChangeSet::new();

    round_changes.insert(validator(1), Round::new(5));
    assert_eq!(round_changes.target_round(2, Round::new(0)), None);

    round_changes.insert(validator(2), Round::new(3));
    assert_eq!(round_changes.target_round(2, Round::new(0)), Some(Round::new(3)));
    assert_eq!(round_changes.target_round(2, Round::new(3)), None);

    round_changes.insert(validator(2), Round::new(7));
    assert_eq!(round_changes.target_round(2, Round::new(3)), Some(Round::new(5)));

    // Lower requests never replace higher ones.
    assert!(!round_changes.insert(validator(2), Round::new(6)));
    assert_eq!(round_changes.requested(&validator(2)), Some(Round::new(7)));

    round_changes.retain_from(Round::new(6));
    assert_eq!(round_changes.len(), 1);
}
