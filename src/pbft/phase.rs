/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The phases of a consensus round and the classification of incoming views.

use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
};

use crate::types::basic::View;

/// The phase a validator is in within a single view.
///
/// Phases are totally ordered: `AcceptRequest < Preprepared < Prepared < Committed`. Within a sequence a
/// validator only ever moves forward through this order, except when a round change sends it back to
/// `AcceptRequest` in a higher round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Waiting for the view's proposer to propose.
    AcceptRequest,

    /// Accepted a proposal and sent a Prepare for it.
    Preprepared,

    /// Saw a quorum of Prepares for the accepted proposal, locked it, and sent a Commit for it.
    Prepared,

    /// Saw a quorum of Commits for the accepted proposal. Terminal within a sequence.
    Committed,
}

impl Phase {
    /// Compare two phases: -1 if `self` comes before `other`, 0 if they are equal, +1 if `self` comes
    /// after `other`.
    pub fn compare(&self, other: &Phase) -> i8 {
        match self.cmp(other) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    /// The phase that directly follows this one, if any.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::AcceptRequest => Some(Phase::Preprepared),
            Phase::Preprepared => Some(Phase::Prepared),
            Phase::Prepared => Some(Phase::Committed),
            Phase::Committed => None,
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::AcceptRequest => "Accept request",
            Phase::Preprepared => "Preprepared",
            Phase::Prepared => "Prepared",
            Phase::Committed => "Committed",
        })
    }
}

/// How a message's view relates to the view a validator is currently in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewClass {
    /// For an earlier sequence, or an earlier round of the current sequence. Discarded.
    Stale,

    /// For exactly the current view. Processed against the current phase.
    Current,

    /// For a higher round of the current sequence. Round changes are counted immediately; other kinds
    /// are buffered until the validator reaches that round.
    FutureRound,

    /// For a higher sequence. Buffered.
    FutureSequence,
}

/// Classify `received` against the `current` view.
pub fn classify(current: View, received: View) -> ViewClass {
    match received.sequence.cmp(&current.sequence) {
        Ordering::Less => ViewClass::Stale,
        Ordering::Greater => ViewClass::FutureSequence,
        Ordering::Equal => match received.round.cmp(&current.round) {
            Ordering::Less => ViewClass::Stale,
            Ordering::Equal => ViewClass::Current,
            Ordering::Greater => ViewClass::FutureRound,
        },
    }
}

#[test]
fn phase_total_order_test() {
    let phases = [
        Phase::AcceptRequest,
        Phase::Preprepared,
        Phase::Prepared,
        Phase::Committed,
    ];

    for (i, a) in phases.iter().enumerate() {
        for (j, b) in phases.iter().enumerate() {
            let expected = match i.cmp(&j) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
            assert_eq!(a.compare(b), expected);
            assert_eq!(a.compare(b), -b.compare(a));
        }
    }

    assert_eq!(Phase::AcceptRequest.next(), Some(Phase::Preprepared));
    assert_eq!(Phase::Committed.next(), None);
}

#[test]
fn phase_display_test() {
    assert_eq!(Phase::AcceptRequest.to_string(), "Accept request");
    assert_eq!(Phase::Preprepared.to_string(), "Preprepared");
    assert_eq!(Phase::Prepared.to_string(), "Prepared");
    assert_eq!(Phase::Committed.to_string(), "Committed");
}

#[test]
fn classify_test() {
    use crate::types::basic::{Round, Sequence};

    let view = |s, r| View::new(Sequence::new(s), Round::new(r));
    let current = view(10, 2);

    assert_eq!(classify(current, view(9, 7)), ViewClass::Stale);
    assert_eq!(classify(current, view(10, 1)), ViewClass::Stale);
    assert_eq!(classify(current, view(10, 2)), ViewClass::Current);
    assert_eq!(classify(current, view(10, 3)), ViewClass::FutureRound);
    assert_eq!(classify(current, view(11, 0)), ViewClass::FutureSequence);
}
