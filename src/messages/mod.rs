/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages sent between validators, and their wire encoding.
//!
//! Every message travels inside an [`Envelope`](envelope::Envelope), which identifies its sender and
//! carries a signature over its contents. The envelope's `payload` holds one of the kind-specific inner
//! structures defined in [`payloads`]. Envelopes are decoded and authenticated on receipt, and their
//! payloads are interpreted into a [`ConsensusMessage`](payloads::ConsensusMessage) once, before they
//! reach the consensus state machine.

use borsh::BorshSerialize;

pub mod envelope;

pub mod payloads;

pub(crate) fn to_bytes<T: BorshSerialize>(value: &T) -> Vec<u8> {
    // Safety: serializing into a `Vec<u8>` cannot fail.
    value.try_to_vec().unwrap()
}
