/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that determine what roles a validator should play in a given view.

use crate::types::{
    basic::{Address, View},
    validator_set::ValidatorSet,
};

/// Deterministically select the proposer of `view` from `validator_set`.
///
/// Proposers are selected round robin over the [ordering of validators](ValidatorSet#ordering-of-validators):
/// the proposer of `(sequence, round)` is the validator at position `(sequence + round) mod N`. Every
/// round change within a sequence therefore hands the proposer role to the next validator, and every
/// new sequence starts with a different proposer than the previous one did.
///
/// Returns `None` if `validator_set` is empty.
pub fn select_proposer(view: View, validator_set: &ValidatorSet) -> Option<Address> {
    if validator_set.is_empty() {
        return None;
    }
    let n = validator_set.len() as u64;
    let index = (view.sequence.int() % n + view.round.int() % n) % n;
    validator_set.get(index as usize).copied()
}

/// Check whether `validator` is the proposer of `view` according to [`select_proposer`].
pub fn is_proposer(validator: &Address, view: View, validator_set: &ValidatorSet) -> bool {
    select_proposer(view, validator_set).as_ref() == Some(validator)
}

#[test]
fn select_proposer_fairness_test() {
    use crate::types::{
        basic::{Round, Sequence},
        crypto_primitives::{address_of, SigningKey},
    };
    use rand_core::OsRng;

    let mut csprg = OsRng {};
    let n = 20;
    let validator_set: ValidatorSet = (0..n)
        .map(|_| address_of(&SigningKey::generate(&mut csprg).verifying_key()))
        .collect();

    // Over N consecutive rounds of one sequence, every validator proposes exactly once.
    let proposers: Vec<Address> = (0..n)
        .map(|round| {
            select_proposer(
                View::new(Sequence::new(7), Round::new(round)),
                &validator_set,
            )
            .unwrap()
        })
        .collect();
    validator_set.validators().for_each(|validator| {
        assert_eq!(
            proposers
                .iter()
                .filter(|proposer| proposer == &validator)
                .count(),
            1
        )
    });

    // Consecutive sequences rotate the proposer too.
    let first = View::start_of(Sequence::new(1));
    let second = View::start_of(Sequence::new(2));
    assert_ne!(
        select_proposer(first, &validator_set),
        select_proposer(second, &validator_set)
    );
    assert!(is_proposer(
        &select_proposer(first, &validator_set).unwrap(),
        first,
        &validator_set
    ));

    // Rounds far beyond N wrap around without overflow.
    assert!(select_proposer(
        View::new(Sequence::new(u64::MAX), Round::new(u64::MAX)),
        &validator_set
    )
    .is_some());

    assert_eq!(
        select_proposer(first, &ValidatorSet::new()),
        None
    );
}
