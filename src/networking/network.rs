/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Network`] trait, which the engine uses to exchange encoded envelopes with other validators.

use crate::types::basic::Address;

/// A peer-to-peer transport that delivers opaque byte messages between validators.
///
/// The engine only ever hands the network encoded [`Envelope`](crate::messages::envelope::Envelope)s,
/// and expects to receive the same from it. Authentication happens inside the engine, so the network
/// does not need to vouch for the origin of the messages it delivers.
///
/// The engine clones the network once per thread that uses it. Clones must share their underlying
/// connections.
pub trait Network: Clone + Send + 'static {
    /// Send a message to every other validator without blocking. The message must not be delivered back
    /// to this validator: the engine handles its own messages locally.
    fn broadcast(&mut self, message: Vec<u8>);

    /// Receive a message from any peer. Returns immediately with a `None` if no message is available now.
    ///
    /// The returned address is the transport-level origin of the message, which may differ from the
    /// sender named in the envelope if messages are gossiped.
    fn recv(&mut self) -> Option<(Address, Vec<u8>)>;

    /// Inform the network that `peer` delivered a message whose signature does not belong to the sender
    /// it claims. Implementations may use this to disconnect from or rate limit the peer. Does nothing by
    /// default.
    fn penalize(&mut self, _peer: Address) {}
}
