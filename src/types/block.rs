/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the block candidate type carried by [`Proposal`](crate::messages::payloads::Proposal)s.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

use crate::types::{basic::*, crypto_primitives::CryptoHasher};

/// A block proposed for finalization at `sequence`. Its contents are opaque to consensus; only its hash
/// is voted on.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub sequence: Sequence,
    pub hash: CryptoHash,
    pub parent: CryptoHash,
    pub data: Data,
}

impl Block {
    pub fn new(sequence: Sequence, parent: CryptoHash, data: Data) -> Block {
        Block {
            sequence,
            hash: Block::hash(sequence, &parent, &data),
            parent,
            data,
        }
    }

    pub fn hash(sequence: Sequence, parent: &CryptoHash, data: &Data) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(sequence.int().to_le_bytes());
        hasher.update(parent.bytes());
        hasher.update(data.bytes());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Checks if `hash` is the hash of the block's other fields.
    pub fn is_correct(&self) -> bool {
        self.hash == Block::hash(self.sequence, &self.parent, &self.data)
    }
}

#[test]
fn block_hash_covers_all_fields_test() {
    let block = Block::new(Sequence::new(4), CryptoHash::zero(), Data::new(vec![1, 2, 3]));
    assert!(block.is_correct());

    let mut tampered = block.clone();
    tampered.data = Data::new(vec![1, 2, 4]);
    assert!(!tampered.is_correct());

    let other_height = Block::new(Sequence::new(5), CryptoHash::zero(), Data::new(vec![1, 2, 3]));
    assert_ne!(block.hash, other_height.hash);
}
