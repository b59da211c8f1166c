/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of the Istanbul Byzantine fault tolerant consensus protocol.
//!
//! A validator running `istanbul_rs` agrees with the other validators of its committee on one block per
//! sequence, tolerating up to `f = floor((N - 1) / 3)` Byzantine validators out of `N`. The library
//! user provides:
//! - A [`Backend`](backend::Backend), which supplies validator sets, proposes and validates blocks, and
//!   receives committed blocks together with their committed seals.
//! - A [`Network`](networking::network::Network), which broadcasts and receives encoded envelopes.
//! - A [`Signer`](types::crypto_primitives::Signer) and a [`Verifier`](types::crypto_primitives::Verifier).
//!
//! and builds an [engine](engine::IstanbulEngine) from them using [`EngineSpec`](engine::EngineSpec).
//!
//! ## Crate layout
//!
//! - [`messages`]: the wire envelope and the consensus messages it carries.
//! - [`pbft`]: phases, vote counting, and proposer selection.
//! - [`pacemaker`]: round timeouts.
//! - [`networking`]: the network trait.
//! - [`engine`]: building, starting, and stopping a validator.
//! - [`events`] and [`logging`]: observing a running validator.

pub(crate) mod algorithm;

pub mod backend;

pub mod engine;

pub(crate) mod event_bus;

pub mod events;

pub mod logging;

pub mod messages;

pub mod networking;

pub mod pacemaker;

pub mod pbft;

pub mod types;
