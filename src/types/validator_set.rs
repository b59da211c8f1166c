/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store information about the validator set of a sequence.

use std::slice;

use super::basic::Address;

/// Stores the identities of the validators that take part in agreeing on a sequence. Every validator
/// has exactly one vote.
///
/// ## Ordering of validators
///
/// `ValidatorSet` internally maintains the list of validators in ascending order of their [`Address`]es,
/// and avails the methods [`validators`](ValidatorSet::validators), [`get`](ValidatorSet::get), and
/// [`position`](ValidatorSet::position) that users can use to get them in this order. Proposer selection
/// depends on this ordering.
///
/// ## Fault tolerance
///
/// A validator set of `N` validators tolerates [`f`](ValidatorSet::f) `= floor((N-1)/3)` Byzantine
/// validators and makes decisions with [`quorum`](ValidatorSet::quorum) `= N - f` matching votes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatorSet {
    // The addresses of validators are included here in ascending order.
    validators: Vec<Address>,
}

impl ValidatorSet {
    /// Create an empty validator set.
    pub fn new() -> ValidatorSet {
        Self {
            validators: Vec::new(),
        }
    }

    /// Put `validator` into the validator set, placing it in a position that preserves the
    /// [ordering of validators](Self#ordering-of-validators). Does nothing if `validator` is already
    /// in the set.
    pub fn put(&mut self, validator: Address) {
        if let Err(insert_pos) = self.validators.binary_search(&validator) {
            self.validators.insert(insert_pos, validator);
        }
    }

    /// Remove `validator` from the validator set, returning whether it was in the set.
    pub fn remove(&mut self, validator: &Address) -> bool {
        if let Ok(pos) = self.validators.binary_search(validator) {
            self.validators.remove(pos);
            true
        } else {
            false
        }
    }

    /// Check whether the validator set contains `validator`.
    pub fn contains(&self, validator: &Address) -> bool {
        self.validators.binary_search(validator).is_ok()
    }

    /// Get the position of `validator` in the [ordering of validators](Self#ordering-of-validators).
    pub fn position(&self, validator: &Address) -> Option<usize> {
        self.validators.binary_search(validator).ok()
    }

    /// Get the validator at position `pos`.
    pub fn get(&self, pos: usize) -> Option<&Address> {
        self.validators.get(pos)
    }

    /// Get an iterator through validators' addresses which walks through them in ascending order.
    pub fn validators(&self) -> slice::Iter<Address> {
        self.validators.iter()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// The maximum number of Byzantine validators this validator set tolerates: `floor((N-1)/3)`.
    pub fn f(&self) -> usize {
        self.len().saturating_sub(1) / 3
    }

    /// The minimum number of distinct matching votes that make a binding decision: `N - f`.
    pub fn quorum(&self) -> usize {
        self.len() - self.f()
    }

    /// The minimum number of distinct validators whose round change requests force this validator to
    /// move to a higher round: `f + 1`. At least one of them is honest.
    pub fn round_change_threshold(&self) -> usize {
        self.f() + 1
    }
}

impl FromIterator<Address> for ValidatorSet {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let mut validator_set = ValidatorSet::new();
        iter.into_iter().for_each(|validator| validator_set.put(validator));
        validator_set
    }
}

#[test]
fn quorum_thresholds_test() {
    let validator_set_of = |n: u8| -> ValidatorSet {
        (0..n).map(|i| Address::new([i; 20])).collect()
    };

    // (N, f, Q)
    for (n, f, q) in [(1, 0, 1), (2, 0, 2), (3, 0, 3), (4, 1, 3), (5, 1, 4), (7, 2, 5), (10, 3, 7)] {
        let validator_set = validator_set_of(n);
        assert_eq!(validator_set.f(), f);
        assert_eq!(validator_set.quorum(), q);
        assert!(validator_set.quorum() >= 2 * validator_set.f() + 1);
        assert_eq!(validator_set.round_change_threshold(), f + 1);
    }

    assert_eq!(ValidatorSet::new().quorum(), 0);
}

#[test]
fn validators_are_ordered_and_unique_test() {
    let mut validator_set = ValidatorSet::new();
    validator_set.put(Address::new([3; 20]));
    validator_set.put(Address::new([1; 20]));
    validator_set.put(Address::new([2; 20]));
    validator_set.put(Address::new([1; 20]));

    assert_eq!(validator_set.len(), 3);
    assert_eq!(validator_set.position(&Address::new([2; 20])), Some(1));
    assert_eq!(
        validator_set.validators().copied().collect::<Vec<_>>(),
        vec![Address::new([1; 20]), Address::new([2; 20]), Address::new([3; 20])]
    );

    assert!(validator_set.remove(&Address::new([2; 20])));
    assert!(!validator_set.contains(&Address::new([2; 20])));
}
