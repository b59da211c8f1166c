/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Backend`] trait, through which the consensus engine consults and informs the rest of the
//! blockchain.
//!
//! Block production, execution, governance, and storage are all outside of istanbul-rs. The engine only
//! agrees on which block comes next; the backend decides what blocks contain, who the validators are,
//! and what happens to a block once it is final.
//!
//! ## Determinism
//!
//! All validators must agree on the answers of [`validator_set`](Backend::validator_set) and
//! [`proposer`](Backend::proposer) for the same arguments. Otherwise they cannot agree on who is allowed
//! to vote or propose, and consensus stalls.

use crate::{
    pbft::roles::select_proposer,
    types::{
        basic::{Address, CommittedSeal, Sequence, View},
        block::Block,
        validator_set::ValidatorSet,
    },
};

pub trait Backend: Send + 'static {
    /// Get the validators that decide `sequence`.
    fn validator_set(&self, sequence: Sequence) -> ValidatorSet;

    /// Get the validator allowed to propose in `view`.
    ///
    /// The default implementation selects proposers [round robin](select_proposer). Implementors that
    /// override it must keep it deterministic.
    fn proposer(&self, view: View) -> Option<Address> {
        select_proposer(view, &self.validator_set(view.sequence))
    }

    /// Called when this validator is the proposer of a view and is not locked on a block. Returns the
    /// block to propose at `sequence`, or `None` if no block can be produced right now (in which case the
    /// view eventually times out).
    fn propose_block(&mut self, sequence: Sequence) -> Option<Block>;

    /// Called on every proposal received from the proposer of the current view. Only blocks that pass
    /// this check are prepared.
    fn validate_block(&mut self, block: &Block) -> Result<(), BlockValidationError>;

    /// Called exactly once per sequence, when `block` becomes final. `committed_seals` are the seals of
    /// the quorum of Commits that finalized it, in the order they arrived.
    fn on_committed(&mut self, sequence: Sequence, block: &Block, committed_seals: &[CommittedSeal]);

    /// The highest sequence that has been committed so far. The engine starts at the sequence after it.
    fn last_committed_sequence(&self) -> Sequence;
}

/// The reasons a [`Backend`] can give for rejecting a proposed block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockValidationError {
    /// The block does not extend the last committed block.
    UnknownParent,

    /// The block's contents are invalid according to the backend's rules.
    InvalidContents,

    /// The block could not be validated in time.
    RanOutOfTime,
}
