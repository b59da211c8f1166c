/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the engine's
//! [configuration](crate::engine::Configuration).
//!
//! istanbul-rs logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveProposal](crate::events::ReceiveProposalEvent) is printed:
//!
//! ```text
//! ReceiveProposal, 1701329264, Id5u7f6, 10, 0, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the address of the origin
//!   of the proposal.
//! - The fourth and fifth values are the sequence and round of the proposal.
//! - The sixth value is the first seven characters of the Base64 encoding of the hash of the proposed
//!   block.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const START_ROUND: &str = "StartRound";
pub const ROUND_CHANGE: &str = "RoundChange";
pub const ROUND_TIMEOUT: &str = "RoundTimeout";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";

pub const PREPREPARE: &str = "Preprepare";
pub const PREPARE: &str = "Prepare";
pub const COMMIT_BLOCK: &str = "CommitBlock";

pub const SEND_ROUND_CHANGE: &str = "SendRoundChange";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_round_event: &StartRoundEvent| {
            let proposer = start_round_event
                .proposer
                .map(|proposer| first_seven_base64_chars(&proposer.bytes()))
                .unwrap_or_else(|| String::from("None"));
            log::info!(
                "{}, {}, {}, {}, {}",
                START_ROUND,
                secs_since_unix_epoch(start_round_event.timestamp),
                start_round_event.view.sequence,
                start_round_event.view.round,
                proposer
            )
        };
        Box::new(logger)
    }
}

impl Logger for RoundChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |round_change_event: &RoundChangeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ROUND_CHANGE,
                secs_since_unix_epoch(round_change_event.timestamp),
                round_change_event.view.sequence,
                round_change_event.view.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for RoundTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |round_timeout_event: &RoundTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ROUND_TIMEOUT,
                secs_since_unix_epoch(round_timeout_event.timestamp),
                round_timeout_event.view.sequence,
                round_timeout_event.view.round
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                first_seven_base64_chars(&receive_proposal_event.origin.bytes()),
                receive_proposal_event.view.sequence,
                receive_proposal_event.view.round,
                first_seven_base64_chars(&receive_proposal_event.block.hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for PreprepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |preprepare_event: &PreprepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PREPREPARE,
                secs_since_unix_epoch(preprepare_event.timestamp),
                preprepare_event.view.sequence,
                preprepare_event.view.round,
                first_seven_base64_chars(&preprepare_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for PrepareEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |prepare_event: &PrepareEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PREPARE,
                secs_since_unix_epoch(prepare_event.timestamp),
                prepare_event.view.sequence,
                prepare_event.view.round,
                first_seven_base64_chars(&prepare_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                commit_block_event.sequence,
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.committed_seals
            )
        };
        Box::new(logger)
    }
}

impl Logger for SendRoundChangeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_round_change_event: &SendRoundChangeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                SEND_ROUND_CHANGE,
                secs_since_unix_epoch(send_round_change_event.timestamp),
                send_round_change_event.view.sequence,
                send_round_change_event.view.round
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7
// characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

// Events stamped before the Unix Epoch (a misconfigured clock) are logged at 0.
fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[test]
fn first_seven_base64_chars_test() {
    assert_eq!(first_seven_base64_chars(&[0u8; 32]), "AAAAAAA");
    assert_eq!(first_seven_base64_chars(&[255u8]), "/w");
}
