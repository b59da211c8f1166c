/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The types defined in [`crate::types::basic`] are "inert" types, i.e., those that are sent around and
//! inspected, but have no active behavior. Most of these types follow the newtype pattern and the API for
//! using these types is defined in this module.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, AddAssign, SubAssign},
};

/// Height of the block that a consensus instance is trying to agree on.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Sequence(u64);

impl Sequence {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Sequence {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Sequence {
    type Output = Sequence;

    fn add(self, rhs: u64) -> Self::Output {
        Sequence(self.0.saturating_add(rhs))
    }
}

/// Attempt number within a [`Sequence`]. Increases on every accepted round change.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Round(u64);

impl Round {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn init() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Round {
    type Output = Round;

    fn add(self, rhs: u64) -> Self::Output {
        Round(self.0.saturating_add(rhs))
    }
}

/// Identifies a single consensus attempt: a `(sequence, round)` pair.
///
/// Views are totally ordered: first by sequence, then by round. The derived `Ord` relies on the field
/// declaration order below.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct View {
    pub sequence: Sequence,
    pub round: Round,
}

impl View {
    pub const fn new(sequence: Sequence, round: Round) -> Self {
        Self { sequence, round }
    }

    /// The first view of `sequence`.
    pub const fn start_of(sequence: Sequence) -> Self {
        Self {
            sequence,
            round: Round::init(),
        }
    }

    /// The view in the same sequence at `round`.
    pub const fn with_round(&self, round: Round) -> Self {
        Self {
            sequence: self.sequence,
            round,
        }
    }
}

impl Display for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.sequence, self.round)
    }
}

/// A SHA-256 digest. Used for envelope digests and block hashes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Identity of a validator.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Address([u8; 20]);

impl Address {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 20] {
        self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(self.0))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Signature represented in bytes. The layout is defined by the [`Signer`](crate::types::crypto_primitives::Signer)
/// that produced it.
#[derive(Clone, Default, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes(Vec<u8>);

impl SignatureBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(&self.0))
    }
}

/// A validator's signature attesting its commitment to a specific block. A quorum of committed seals
/// over the same block is the proof that the block is final.
#[derive(Clone, Default, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct CommittedSeal(Vec<u8>);

impl CommittedSeal {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for CommittedSeal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD_NO_PAD.encode(&self.0))
    }
}

/// Opaque block contents, produced and interpreted by the [`Backend`](crate::backend::Backend).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Data(Vec<u8>);

impl Data {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Size of a buffer (in bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct BufferSize(u64);

impl BufferSize {
    pub fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl AddAssign<u64> for BufferSize {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl SubAssign<u64> for BufferSize {
    fn sub_assign(&mut self, rhs: u64) {
        self.0.sub_assign(rhs)
    }
}

#[test]
fn view_total_order_test() {
    let view = |s, r| View::new(Sequence::new(s), Round::new(r));

    assert!(view(1, 9) < view(2, 0));
    assert!(view(2, 0) < view(2, 1));
    assert!(view(2, 1) > view(1, 100));
    assert_eq!(view(3, 3), view(3, 3));
    assert_eq!(View::start_of(Sequence::new(7)).with_round(Round::new(4)), view(7, 4));
}

#[test]
fn sequence_and_round_addition_saturates_test() {
    assert_eq!(Sequence::new(9) + 1, Sequence::new(10));
    assert_eq!(Sequence::new(u64::MAX) + 1, Sequence::new(u64::MAX));
    assert_eq!(Round::new(u64::MAX - 1) + 5, Round::new(u64::MAX));
}
