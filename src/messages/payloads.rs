/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the kind-specific inner payloads carried inside an [`Envelope`](super::envelope::Envelope).

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{basic::*, block::Block};

use super::{envelope::MessageKind, to_bytes};

/// A consensus message, decoded from an envelope's payload according to the envelope's kind.
///
/// Envelopes are interpreted into this type exactly once, at the boundary (see
/// [`Envelope::message`](super::envelope::Envelope::message)), so that the rest of the engine never has
/// to re-interpret payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Prepare(Subject),
    Commit(Subject),
    RoundChange(Subject),
}

impl ConsensusMessage {
    pub fn proposal(view: View, block: Block) -> ConsensusMessage {
        ConsensusMessage::Proposal(Proposal { view, block })
    }

    pub fn prepare(view: View, digest: CryptoHash) -> ConsensusMessage {
        ConsensusMessage::Prepare(Subject { view, digest })
    }

    pub fn commit(view: View, digest: CryptoHash) -> ConsensusMessage {
        ConsensusMessage::Commit(Subject { view, digest })
    }

    pub fn round_change(view: View, digest: CryptoHash) -> ConsensusMessage {
        ConsensusMessage::RoundChange(Subject { view, digest })
    }

    /// Returns the [`MessageKind`] that an envelope carrying this message must have.
    pub fn kind(&self) -> MessageKind {
        match self {
            ConsensusMessage::Proposal(_) => MessageKind::Proposal,
            ConsensusMessage::Prepare(_) => MessageKind::Prepare,
            ConsensusMessage::Commit(_) => MessageKind::Commit,
            ConsensusMessage::RoundChange(_) => MessageKind::RoundChange,
        }
    }

    /// Returns the view that the message belongs to.
    pub fn view(&self) -> View {
        match self {
            ConsensusMessage::Proposal(Proposal { view, .. }) => *view,
            ConsensusMessage::Prepare(Subject { view, .. })
            | ConsensusMessage::Commit(Subject { view, .. })
            | ConsensusMessage::RoundChange(Subject { view, .. }) => *view,
        }
    }

    /// Returns the digest the message is about: the proposed block's hash for proposals, the subject's
    /// digest otherwise.
    pub fn digest(&self) -> CryptoHash {
        match self {
            ConsensusMessage::Proposal(Proposal { block, .. }) => block.hash,
            ConsensusMessage::Prepare(Subject { digest, .. })
            | ConsensusMessage::Commit(Subject { digest, .. })
            | ConsensusMessage::RoundChange(Subject { digest, .. }) => *digest,
        }
    }

    /// Serialize the inner structure into the bytes that go into an envelope's `payload`.
    pub fn payload_bytes(&self) -> Vec<u8> {
        match self {
            ConsensusMessage::Proposal(proposal) => to_bytes(proposal),
            ConsensusMessage::Prepare(subject)
            | ConsensusMessage::Commit(subject)
            | ConsensusMessage::RoundChange(subject) => to_bytes(subject),
        }
    }
}

/// Payload of a [`MessageKind::Proposal`] envelope: the block that the view's proposer wants finalized.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub view: View,
    pub block: Block,
}

/// Payload of [`MessageKind::Prepare`], [`MessageKind::Commit`], and [`MessageKind::RoundChange`]
/// envelopes: the `(view, digest)` pair that the sender attests to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Subject {
    pub view: View,
    pub digest: CryptoHash,
}
