//! [`ChainBackend`], a simple implementation of [`Backend`] used in all of the integration tests.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use istanbul_rs::{
    backend::{Backend, BlockValidationError},
    types::{
        basic::{CommittedSeal, CryptoHash, Data, Sequence},
        block::Block,
        validator_set::ValidatorSet,
    },
};

/// A block committed by a [`ChainBackend`], with the seals it was committed with.
#[derive(Clone)]
pub(crate) struct CommittedBlock {
    pub(crate) sequence: Sequence,
    pub(crate) block: Block,
    pub(crate) committed_seals: Vec<CommittedSeal>,
}

/// A simple implementation of [`Backend`] for use in integration tests.
///
/// The chain backend keeps a linear chain of committed blocks in memory, which the test can read through
/// the shared handle returned by [`chain`](ChainBackend::chain). Every proposed block extends the last
/// committed block, and blocks that do not are rejected.
///
/// ## Pacing
///
/// The backend only proposes blocks up to the sequence stored in its `height_limit`, which the test can
/// raise while the engine runs. With a single validator, nothing else slows the chain down.
///
/// ## Base
///
/// The chain starts right after sequence `base`, which is 0 unless set with
/// [`starting_after`](ChainBackend::starting_after).
pub(crate) struct ChainBackend {
    validator_set: ValidatorSet,
    chain: Arc<Mutex<Vec<CommittedBlock>>>,
    height_limit: Arc<AtomicU64>,
    base: u64,
}

impl ChainBackend {
    pub(crate) fn new(validator_set: ValidatorSet, height_limit: Arc<AtomicU64>) -> ChainBackend {
        ChainBackend {
            validator_set,
            chain: Arc::new(Mutex::new(Vec::new())),
            height_limit,
            base: 0,
        }
    }

    pub(crate) fn starting_after(mut self, base: Sequence) -> ChainBackend {
        self.base = base.int();
        self
    }

    pub(crate) fn chain(&self) -> Arc<Mutex<Vec<CommittedBlock>>> {
        self.chain.clone()
    }

    fn tip(&self) -> CryptoHash {
        self.chain
            .lock()
            .unwrap()
            .last()
            .map_or(CryptoHash::zero(), |committed| committed.block.hash)
    }
}

impl Backend for ChainBackend {
    fn validator_set(&self, _: Sequence) -> ValidatorSet {
        self.validator_set.clone()
    }

    fn propose_block(&mut self, sequence: Sequence) -> Option<Block> {
        if sequence.int() > self.height_limit.load(Ordering::SeqCst) {
            return None;
        }
        let data = Data::new(sequence.int().to_le_bytes().to_vec());
        Some(Block::new(sequence, self.tip(), data))
    }

    fn validate_block(&mut self, block: &Block) -> Result<(), BlockValidationError> {
        if block.parent != self.tip() {
            return Err(BlockValidationError::UnknownParent);
        }
        if block.data.bytes() != block.sequence.int().to_le_bytes() {
            return Err(BlockValidationError::InvalidContents);
        }
        Ok(())
    }

    fn on_committed(&mut self, sequence: Sequence, block: &Block, committed_seals: &[CommittedSeal]) {
        self.chain.lock().unwrap().push(CommittedBlock {
            sequence,
            block: block.clone(),
            committed_seals: committed_seals.to_vec(),
        })
    }

    fn last_committed_sequence(&self) -> Sequence {
        Sequence::new(self.base + self.chain.lock().unwrap().len() as u64)
    }
}
