/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events that an [`IstanbulEngine`](crate::engine::IstanbulEngine) emits.
//!
//! An event for a given action indicates that the action has been completed. Users can register handlers
//! for events through [`EngineSpec`](crate::engine::EngineSpec); handlers run on a dedicated event bus
//! thread, so slow handlers never hold up consensus.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::types::{
    basic::{Address, CryptoHash, Sequence, View},
    block::Block,
};

/// Enumerates all events defined for istanbul-rs.
pub enum Event {
    // Events that change the view.
    StartRound(StartRoundEvent),
    RoundChange(RoundChangeEvent),
    RoundTimeout(RoundTimeoutEvent),
    // Events that involve receiving a message.
    ReceiveProposal(ReceiveProposalEvent),
    // Events that involve moving through the phases of a view.
    Preprepare(PreprepareEvent),
    Prepare(PrepareEvent),
    CommitBlock(CommitBlockEvent),
    // Events that involve broadcasting a message.
    SendRoundChange(SendRoundChangeEvent),
}

impl Event {
    /// Send the event to the event bus, if one is listening.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus stops listening only when the engine stops. Events published after that
            // point are of no interest to anyone.
            let _ = event_publisher.send(self);
        }
    }
}

/// This validator started `view`. `proposer` is the validator expected to propose in it.
pub struct StartRoundEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub proposer: Option<Address>,
}

/// This validator received a proposal for `block` from `origin` in `view`.
pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub view: View,
    pub block: Block,
}

/// This validator accepted the proposal of `block` in `view`, and broadcasted a Prepare for it.
pub struct PreprepareEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub block: CryptoHash,
}

/// This validator saw a quorum of Prepares for `block` in `view`, locked on it, and broadcasted a Commit
/// for it.
pub struct PrepareEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub block: CryptoHash,
}

/// `block` became final at `sequence` and was handed to the backend together with its committed seals.
pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub sequence: Sequence,
    pub block: CryptoHash,
    pub committed_seals: usize,
}

/// This validator broadcasted a request to move to `view`.
pub struct SendRoundChangeEvent {
    pub timestamp: SystemTime,
    pub view: View,
}

/// Enough validators requested a round change, so this validator moved to `view`.
pub struct RoundChangeEvent {
    pub timestamp: SystemTime,
    pub view: View,
}

/// The round timer of `view` expired before the sequence was committed.
pub struct RoundTimeoutEvent {
    pub timestamp: SystemTime,
    pub view: View,
}
