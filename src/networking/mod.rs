/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Abstract network trait, and the threads and types that move messages between it and the consensus
//! thread.
//!
//! ## Receiving
//!
//! A poller thread drains the [`Network`](network::Network) and hands raw messages to a pool of
//! verification workers. The workers [decode and authenticate](crate::messages::envelope::Envelope::from_wire)
//! them in parallel, and post the envelopes that pass into the consensus thread's inbound queue.
//!
//! ## Sending
//!
//! The consensus thread signs and encodes its own messages, then broadcasts them through a
//! `SenderHandle`.

pub mod network;

pub(crate) mod receiving;

pub(crate) mod sending;
