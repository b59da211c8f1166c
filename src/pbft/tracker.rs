/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Round/phase state of a single validator, and the rules that move it forward.
//!
//! [`QuorumTracker`] owns the [`RoundState`] of the current sequence and is the only thing that mutates
//! it. Callers feed it messages that have already been authenticated and classified as belonging to the
//! current sequence, and it answers with either [`VoteOutcome::Duplicate`] or the list of
//! [`Transition`]s that the message caused. Every transition fires exactly once per view.
//!
//! ## Quorums
//!
//! With `N` validators, `f = floor((N-1)/3)` and `Q = N - f`:
//! - `Q` Prepares for the accepted digest move `Preprepared` to `Prepared`.
//! - `Q` Commits (with seals) for the accepted digest move `Prepared` to `Committed`. A Commit quorum
//!   reached while `Preprepared` implies a Prepare quorum, so both transitions fire, in order.
//! - `f + 1` distinct validators requesting a round of at least `R > current round` move the validator
//!   to the largest such `R`.
//!
//! Only votes for identical digests are counted together.

use crate::{
    messages::payloads::Subject,
    types::{
        basic::{Address, CommittedSeal, CryptoHash, Round, Sequence, View},
        block::Block,
        validator_set::ValidatorSet,
    },
};

use super::{
    phase::Phase,
    types::{CommitSet, PrepareSet, RoundChangeSet},
};

/// The per-sequence state of a validator. Created at [`Phase::AcceptRequest`] when the validator starts
/// a sequence, and replaced when the sequence completes.
#[derive(Clone, Debug)]
pub struct RoundState {
    view: View,
    phase: Phase,
    proposal: Option<Block>,
    locked: Option<Block>,
    prepares: PrepareSet,
    commits: CommitSet,
    round_changes: RoundChangeSet,
}

impl RoundState {
    fn new(view: View) -> RoundState {
        RoundState {
            view,
            phase: Phase::AcceptRequest,
            proposal: None,
            locked: None,
            prepares: PrepareSet::new(),
            commits: CommitSet::new(),
            round_changes: RoundChangeSet::new(),
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The proposal accepted in the current view.
    pub fn proposal(&self) -> Option<&Block> {
        self.proposal.as_ref()
    }

    /// The block this validator is locked on in the current sequence. A validator locks on a block when
    /// it becomes `Prepared` on it, and stays locked across round changes.
    pub fn locked(&self) -> Option<&Block> {
        self.locked.as_ref()
    }

    pub fn prepares(&self) -> &PrepareSet {
        &self.prepares
    }

    pub fn commits(&self) -> &CommitSet {
        &self.commits
    }

    pub fn round_changes(&self) -> &RoundChangeSet {
        &self.round_changes
    }
}

/// A change of phase or round caused by a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// `AcceptRequest -> Preprepared`: a proposal for `digest` was accepted.
    Preprepared { digest: CryptoHash },

    /// `Preprepared -> Prepared`: the validator is now locked on `block`.
    Prepared { block: Block },

    /// `Prepared -> Committed`. `seals` are the committed seals of the `Q` Commits that formed the
    /// quorum, in arrival order.
    Committed {
        block: Block,
        seals: Vec<CommittedSeal>,
    },

    /// Any non-terminal phase `-> AcceptRequest` in `round` of the same sequence.
    RoundChanged { round: Round },
}

/// What accepting a message did to the [`RoundState`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The sender had already cast this kind of vote in this view. Nothing changed.
    Duplicate,

    /// The message was recorded, causing the listed transitions (possibly none).
    Counted(Vec<Transition>),
}

/// Tracks the current view and the votes cast in it, and decides when quorums are reached.
pub struct QuorumTracker {
    validator_set: ValidatorSet,
    state: RoundState,
}

impl QuorumTracker {
    /// Create a tracker for the first round of `sequence`, decided on by `validator_set`.
    pub fn new(sequence: Sequence, validator_set: ValidatorSet) -> QuorumTracker {
        QuorumTracker {
            validator_set,
            state: RoundState::new(View::start_of(sequence)),
        }
    }

    pub fn state(&self) -> &RoundState {
        &self.state
    }

    pub fn view(&self) -> View {
        self.state.view
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    /// Accept `block`, proposed by `sender` in `view`.
    ///
    /// # Preconditions
    ///
    /// `sender` is the proposer of `view`, and `block` is a valid block for the current sequence.
    pub fn accept_proposal(
        &mut self,
        sender: Address,
        view: View,
        block: Block,
    ) -> Result<VoteOutcome, TrackerError> {
        self.authorize(&sender)?;
        self.check_current(view)?;
        if self.state.phase != Phase::AcceptRequest {
            return Ok(VoteOutcome::Duplicate);
        }
        if let Some(locked) = &self.state.locked {
            if locked.hash != block.hash {
                return Err(TrackerError::LockedOnOtherBlock {
                    locked: locked.hash,
                    proposed: block.hash,
                });
            }
        }

        let digest = block.hash;
        self.state.proposal = Some(block);
        self.enter(Phase::Preprepared)?;

        let mut transitions = vec![Transition::Preprepared { digest }];
        transitions.extend(self.advance()?);
        Ok(VoteOutcome::Counted(transitions))
    }

    /// Record `sender`'s Prepare for `subject`.
    pub fn add_prepare(
        &mut self,
        sender: Address,
        subject: &Subject,
    ) -> Result<VoteOutcome, TrackerError> {
        self.authorize(&sender)?;
        self.check_current(subject.view)?;
        if !self.state.prepares.insert(sender, subject.digest, ()) {
            return Ok(VoteOutcome::Duplicate);
        }
        Ok(VoteOutcome::Counted(self.advance()?))
    }

    /// Record `sender`'s Commit for `subject`, together with its committed seal.
    ///
    /// # Preconditions
    ///
    /// `committed_seal` has been verified to be `sender`'s seal over `subject.digest`.
    pub fn add_commit(
        &mut self,
        sender: Address,
        subject: &Subject,
        committed_seal: CommittedSeal,
    ) -> Result<VoteOutcome, TrackerError> {
        self.authorize(&sender)?;
        self.check_current(subject.view)?;
        if committed_seal.is_empty() {
            return Err(TrackerError::EmptyCommittedSeal { sender });
        }
        if !self
            .state
            .commits
            .insert(sender, subject.digest, committed_seal)
        {
            return Ok(VoteOutcome::Duplicate);
        }
        Ok(VoteOutcome::Counted(self.advance()?))
    }

    /// Record that `sender` requested to move to `round` of the current sequence, and move there (or to
    /// a higher round) if enough validators requested it.
    pub fn add_round_change(
        &mut self,
        sender: Address,
        round: Round,
    ) -> Result<VoteOutcome, TrackerError> {
        self.authorize(&sender)?;
        let received = self.state.view.with_round(round);
        if round < self.state.view.round {
            return Err(TrackerError::WrongView {
                current: self.state.view,
                received,
            });
        }
        if !self.state.round_changes.insert(sender, round) {
            return Ok(VoteOutcome::Duplicate);
        }

        let target = self
            .state
            .round_changes
            .target_round(self.validator_set.round_change_threshold(), self.state.view.round);
        match target {
            Some(round) => Ok(VoteOutcome::Counted(vec![self.move_to_round(round)?])),
            None => Ok(VoteOutcome::Counted(Vec::new())),
        }
    }

    /// Move to `round` of the current sequence, forgetting the current round's proposal and votes but
    /// keeping the lock and the round change requests for `round` and above.
    pub fn move_to_round(&mut self, round: Round) -> Result<Transition, TrackerError> {
        if round <= self.state.view.round || self.state.phase == Phase::Committed {
            return Err(TrackerError::InvalidTransition {
                view: self.state.view,
                from: self.state.phase,
                to: Phase::AcceptRequest,
            });
        }

        let state = &mut self.state;
        state.view = state.view.with_round(round);
        state.phase = Phase::AcceptRequest;
        state.proposal = None;
        state.prepares = PrepareSet::new();
        state.commits = CommitSet::new();
        state.round_changes.retain_from(round);

        Ok(Transition::RoundChanged { round })
    }

    /// Replace the round state with a fresh one for the first round of `sequence`.
    pub fn new_sequence(
        &mut self,
        sequence: Sequence,
        validator_set: ValidatorSet,
    ) -> Result<(), TrackerError> {
        if sequence <= self.state.view.sequence {
            return Err(TrackerError::InvalidTransition {
                view: self.state.view,
                from: self.state.phase,
                to: Phase::AcceptRequest,
            });
        }

        self.validator_set = validator_set;
        self.state = RoundState::new(View::start_of(sequence));
        Ok(())
    }

    /// Fire every transition that the votes collected so far justify.
    fn advance(&mut self) -> Result<Vec<Transition>, TrackerError> {
        let mut transitions = Vec::new();
        let block = match &self.state.proposal {
            Some(block) => block.clone(),
            None => return Ok(transitions),
        };
        let quorum = self.validator_set.quorum();

        if self.state.phase == Phase::Preprepared
            && (self.state.prepares.count(&block.hash) >= quorum
                || self.state.commits.count(&block.hash) >= quorum)
        {
            self.enter(Phase::Prepared)?;
            self.state.locked = Some(block.clone());
            transitions.push(Transition::Prepared {
                block: block.clone(),
            });
        }

        if self.state.phase == Phase::Prepared && self.state.commits.count(&block.hash) >= quorum {
            self.enter(Phase::Committed)?;
            let seals = self
                .state
                .commits
                .matching(&block.hash)
                .take(quorum)
                .map(|vote| vote.extra.clone())
                .collect();
            transitions.push(Transition::Committed { block, seals });
        }

        Ok(transitions)
    }

    fn enter(&mut self, to: Phase) -> Result<(), TrackerError> {
        if self.state.phase.next() != Some(to) {
            return Err(TrackerError::InvalidTransition {
                view: self.state.view,
                from: self.state.phase,
                to,
            });
        }
        self.state.phase = to;
        Ok(())
    }

    fn authorize(&self, sender: &Address) -> Result<(), TrackerError> {
        if self.validator_set.contains(sender) {
            Ok(())
        } else {
            Err(TrackerError::Unauthorized { sender: *sender })
        }
    }

    fn check_current(&self, view: View) -> Result<(), TrackerError> {
        if view == self.state.view {
            Ok(())
        } else {
            Err(TrackerError::WrongView {
                current: self.state.view,
                received: view,
            })
        }
    }
}

/// The ways the [`QuorumTracker`] can refuse a message.
#[derive(Debug, PartialEq, Eq)]
pub enum TrackerError {
    /// `sender` is not in the validator set of the current sequence.
    Unauthorized { sender: Address },

    /// The message is not for the view it was offered in.
    WrongView { current: View, received: View },

    /// A Commit arrived without a committed seal.
    EmptyCommittedSeal { sender: Address },

    /// A proposal for a block other than the one this validator is locked on.
    LockedOnOtherBlock {
        locked: CryptoHash,
        proposed: CryptoHash,
    },

    /// A transition that would move the state backwards or skip a phase. Indicates a bug; fatal.
    InvalidTransition { view: View, from: Phase, to: Phase },
}

#[cfg(test)]
fn test_validators(n: u8) -> Vec<Address> {
    (1..=n).map(|i| Address::new([i; 20])).collect()
}

#[cfg(test)]
fn test_block(sequence: u64, data: u8) -> Block {
    use crate::types::basic::Data;
    Block::new(Sequence::new(sequence), CryptoHash::zero(), Data::new(vec![data]))
}

#[test]
fn prepare_quorum_fires_exactly_once_test() {
    let validators = test_validators(4);
    let mut tracker = QuorumTracker::new(Sequence::new(1), validators.iter().copied().collect());
    let view = tracker.view();
    let block = test_block(1, 0);
    let subject = Subject {
        view,
        digest: block.hash,
    };

    assert_eq!(
        tracker.accept_proposal(validators[0], view, block.clone()),
        Ok(VoteOutcome::Counted(vec![Transition::Preprepared {
            digest: block.hash
        }]))
    );

    // Q - 1 = 2 Prepares.
    for validator in &validators[..2] {
        assert_eq!(
            tracker.add_prepare(*validator, &subject),
            Ok(VoteOutcome::Counted(Vec::new()))
        );
    }
    assert_eq!(tracker.phase(), Phase::Preprepared);

    // Duplicates do not count.
    assert_eq!(
        tracker.add_prepare(validators[0], &subject),
        Ok(VoteOutcome::Duplicate)
    );
    assert_eq!(tracker.phase(), Phase::Preprepared);

    // Q = 3 Prepares.
    assert_eq!(
        tracker.add_prepare(validators[2], &subject),
        Ok(VoteOutcome::Counted(vec![Transition::Prepared {
            block: block.clone()
        }]))
    );
    assert_eq!(tracker.phase(), Phase::Prepared);
    assert_eq!(tracker.state().locked(), Some(&block));

    // Later Prepares are counted but cause no further transition.
    assert_eq!(
        tracker.add_prepare(validators[3], &subject),
        Ok(VoteOutcome::Counted(Vec::new()))
    );
    assert_eq!(tracker.state().prepares().len(), 4);
}

#[test]
fn only_identical_digests_form_a_quorum_test() {
    let validators = test_validators(4);
    let mut tracker = QuorumTracker::new(Sequence::new(1), validators.iter().copied().collect());
    let view = tracker.view();
    let block = test_block(1, 0);
    tracker
        .accept_proposal(validators[0], view, block.clone())
        .unwrap();

    tracker
        .add_prepare(validators[0], &Subject { view, digest: block.hash })
        .unwrap();
    tracker
        .add_prepare(validators[1], &Subject { view, digest: block.hash })
        .unwrap();
    tracker
        .add_prepare(validators[2], &Subject { view, digest: CryptoHash::new([9; 32]) })
        .unwrap();
    tracker
        .add_prepare(validators[3], &Subject { view, digest: CryptoHash::new([8; 32]) })
        .unwrap();

    assert_eq!(tracker.phase(), Phase::Preprepared);
}

#[test]
fn commit_quorum_hands_over_seals_test() {
    let validators = test_validators(4);
    let mut tracker = QuorumTracker::new(Sequence::new(10), validators.iter().copied().collect());
    let view = tracker.view();
    assert_eq!(view, View::new(Sequence::new(10), Round::new(0)));

    let block = test_block(10, 1);
    let subject = Subject {
        view,
        digest: block.hash,
    };
    let seal = |i: u8| CommittedSeal::new(vec![i; 96]);

    tracker
        .accept_proposal(validators[0], view, block.clone())
        .unwrap();
    assert_eq!(tracker.phase(), Phase::Preprepared);

    for validator in &validators[..3] {
        tracker.add_prepare(*validator, &subject).unwrap();
    }
    assert_eq!(tracker.phase(), Phase::Prepared);

    // Arrival order: 3, 1, 2.
    assert_eq!(
        tracker.add_commit(validators[2], &subject, seal(3)),
        Ok(VoteOutcome::Counted(Vec::new()))
    );
    assert_eq!(
        tracker.add_commit(validators[0], &subject, seal(1)),
        Ok(VoteOutcome::Counted(Vec::new()))
    );
    assert_eq!(
        tracker.add_commit(validators[1], &subject, seal(2)),
        Ok(VoteOutcome::Counted(vec![Transition::Committed {
            block,
            seals: vec![seal(3), seal(1), seal(2)],
        }]))
    );
    assert_eq!(tracker.phase(), Phase::Committed);

    // A fourth Commit changes nothing.
    assert_eq!(
        tracker.add_commit(validators[3], &subject, seal(4)),
        Ok(VoteOutcome::Counted(Vec::new()))
    );
}

#[test]
fn commit_quorum_passes_through_prepared_test() {
    let validators = test_validators(4);
    let mut tracker = QuorumTracker::new(Sequence::new(1), validators.iter().copied().collect());
    let view = tracker.view();
    let block = test_block(1, 0);
    let subject = Subject {
        view,
        digest: block.hash,
    };

    // Commits arrive before the proposal.
    for (i, validator) in validators[1..].iter().enumerate() {
        tracker
            .add_commit(*validator, &subject, CommittedSeal::new(vec![i as u8; 96]))
            .unwrap();
    }
    assert_eq!(tracker.phase(), Phase::AcceptRequest);

    match tracker.accept_proposal(validators[0], view, block.clone()) {
        Ok(VoteOutcome::Counted(transitions)) => {
            assert_eq!(transitions.len(), 3);
            assert_eq!(
                transitions[0],
                Transition::Preprepared { digest: block.hash }
            );
            assert_eq!(transitions[1], Transition::Prepared { block: block.clone() });
            assert!(matches!(transitions[2], Transition::Committed { ref seals, .. } if seals.len() == 3));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn empty_committed_seal_is_rejected_test() {
    let validators = test_validators(4);
    let mut tracker = QuorumTracker::new(Sequence::new(1), validators.iter().copied().collect());
    let subject = Subject {
        view: tracker.view(),
        digest: CryptoHash::zero(),
    };

    assert_eq!(
        tracker.add_commit(validators[0], &subject, CommittedSeal::empty()),
        Err(TrackerError::EmptyCommittedSeal {
            sender: validators[0]
        })
    );
    assert!(tracker.state().commits().is_empty());
}

#[test]
fn unauthorized_senders_are_rejected_test() {
    let validators = test_validators(4);
    let mut tracker = QuorumTracker::new(Sequence::new(1), validators.iter().copied().collect());
    let outsider = Address::new([99; 20]);
    let subject = Subject {
        view: tracker.view(),
        digest: CryptoHash::zero(),
    };

    assert_eq!(
        tracker.add_prepare(outsider, &subject),
        Err(TrackerError::Unauthorized { sender: outsider })
    );
    assert_eq!(
        tracker.add_round_change(outsider, Round::new(3)),
        Err(TrackerError::Unauthorized { sender: outsider })
    );
}

#[test]
fn round_change_needs_f_plus_one_requests_test() {
    let validators = test_validators(4);
    let mut tracker = QuorumTracker::new(Sequence::new(1), validators.iter().copied().collect());

    // One validator asking for round 5 is not enough (f + 1 = 2).
    assert_eq!(
        tracker.add_round_change(validators[0], Round::new(5)),
        Ok(VoteOutcome::Counted(Vec::new()))
    );
    assert_eq!(tracker.view().round, Round::new(0));
    assert_eq!(
        tracker.add_round_change(validators[0], Round::new(5)),
        Ok(VoteOutcome::Duplicate)
    );

    // A second one is.
    assert_eq!(
        tracker.add_round_change(validators[1], Round::new(5)),
        Ok(VoteOutcome::Counted(vec![Transition::RoundChanged {
            round: Round::new(5)
        }]))
    );
    assert_eq!(tracker.view(), View::new(Sequence::new(1), Round::new(5)));
    assert_eq!(tracker.phase(), Phase::AcceptRequest);
    assert_eq!(tracker.state().round_changes().len(), 2);
}

#[test]
fn round_change_moves_to_largest_supported_round_test() {
    let validators = test_validators(7);
    let mut tracker = QuorumTracker::new(Sequence::new(1), validators.iter().copied().collect());

    // f + 1 = 3.
    tracker.add_round_change(validators[0], Round::new(9)).unwrap();
    tracker.add_round_change(validators[1], Round::new(4)).unwrap();
    assert_eq!(
        tracker.add_round_change(validators[2], Round::new(6)),
        Ok(VoteOutcome::Counted(vec![Transition::RoundChanged {
            round: Round::new(4)
        }]))
    );

    // Requests below the new round were forgotten; the others remain.
    assert_eq!(tracker.state().round_changes().len(), 3);
    assert_eq!(
        tracker.add_round_change(validators[3], Round::new(2)),
        Err(TrackerError::WrongView {
            current: View::new(Sequence::new(1), Round::new(4)),
            received: View::new(Sequence::new(1), Round::new(2)),
        })
    );
}

#[test]
fn lock_survives_round_change_test() {
    let validators = test_validators(4);
    let mut tracker = QuorumTracker::new(Sequence::new(1), validators.iter().copied().collect());
    let view = tracker.view();
    let block = test_block(1, 0);
    let subject = Subject {
        view,
        digest: block.hash,
    };

    tracker
        .accept_proposal(validators[0], view, block.clone())
        .unwrap();
    for validator in &validators[..3] {
        tracker.add_prepare(*validator, &subject).unwrap();
    }
    assert_eq!(tracker.phase(), Phase::Prepared);

    tracker.move_to_round(Round::new(1)).unwrap();
    assert_eq!(tracker.phase(), Phase::AcceptRequest);
    assert!(tracker.state().proposal().is_none());
    assert!(tracker.state().prepares().is_empty());
    assert_eq!(tracker.state().locked(), Some(&block));

    let view = tracker.view();
    let other = test_block(1, 1);
    assert_eq!(
        tracker.accept_proposal(validators[1], view, other.clone()),
        Err(TrackerError::LockedOnOtherBlock {
            locked: block.hash,
            proposed: other.hash
        })
    );
    assert!(tracker
        .accept_proposal(validators[1], view, block.clone())
        .is_ok());

    // A new sequence starts unlocked.
    tracker
        .new_sequence(Sequence::new(2), validators.iter().copied().collect())
        .unwrap();
    assert_eq!(tracker.state().locked(), None);
    assert_eq!(tracker.view(), View::start_of(Sequence::new(2)));
}

#[test]
fn regressions_are_invalid_transitions_test() {
    let validators = test_validators(4);
    let mut tracker = QuorumTracker::new(Sequence::new(5), validators.iter().copied().collect());
    tracker.move_to_round(Round::new(2)).unwrap();

    assert!(matches!(
        tracker.move_to_round(Round::new(2)),
        Err(TrackerError::InvalidTransition { .. })
    ));
    assert!(matches!(
        tracker.new_sequence(Sequence::new(4), validators.iter().copied().collect()),
        Err(TrackerError::InvalidTransition { .. })
    ));
}
