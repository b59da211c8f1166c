/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The Istanbul Byzantine fault tolerant consensus protocol.
//!
//! ## Phases
//!
//! Each validator works on one [view](crate::types::basic::View) at a time: a sequence (the height of
//! the block being agreed on) and a round (the attempt at agreeing on it). Within a view, a validator
//! moves through the [`Phase`](phase::Phase)s in order:
//! 1. **AcceptRequest**: waiting for the view's proposer to propose a block.
//! 2. **Preprepared**: accepted the proposal, and broadcast a Prepare for it.
//! 3. **Prepared**: collected a quorum of Prepares (or Commits), locked the block, and broadcast a
//!    Commit carrying a committed seal.
//! 4. **Committed**: collected a quorum of Commits. The block and a quorum of seals are handed to the
//!    backend, and the validator moves on to the next sequence.
//!
//! A quorum is `N - f` matching votes out of `N` validators, where `f = floor((N - 1) / 3)`.
//!
//! ## Round changes
//!
//! If a round does not commit before its timeout, validators broadcast RoundChange messages for a higher
//! round. Once `f + 1` validators have requested rounds at least as high as some round above the current
//! one, the validator moves to the highest such round, keeping the block it is locked on.
//!
//! ## Submodules
//!
//! - [`tracker`]: the pure state machine that counts votes and decides transitions.
//! - [`types`]: the vote sets the tracker counts with.
//! - [`roles`]: proposer selection.
//! - [`phase`]: phases and view classification.
//! - `implementation`: the validator that wires the tracker to the network, the timer, and the backend.

pub(crate) mod implementation;

pub use implementation::CoreError;

pub mod phase;

pub mod roles;

pub mod tracker;

pub mod types;
