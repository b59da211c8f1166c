/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.

use std::{
    collections::{BTreeMap, VecDeque},
    ops::Bound::{Excluded, Unbounded},
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use crate::{
    algorithm::InboundEvent,
    messages::envelope::{Envelope, EnvelopeError},
    types::{
        basic::{Address, BufferSize, Sequence, View},
        crypto_primitives::Verifier,
    },
};

use super::network::Network;

/// Spawn the poller thread, which polls the [`Network`] for messages, together with a pool of
/// `verification_workers` worker threads, which decode and authenticate them in parallel.
///
/// Authenticated envelopes are posted to `inbound`, the consensus thread's inbound queue, in the order
/// the workers finish them. Envelopes that fail authentication with an
/// [`InvalidSigner`](EnvelopeError::InvalidSigner) error get their origin
/// [penalized](Network::penalize). Every other undecodable message is dropped.
///
/// The workers exit when the poller exits, and the poller exits when it receives a shutdown signal.
pub(crate) fn start_polling<N: Network>(
    mut network: N,
    verifier: Arc<dyn Verifier>,
    verification_workers: usize,
    inbound: Sender<InboundEvent>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let (to_workers, raw_messages) = mpsc::channel::<(Address, Vec<u8>)>();
        let raw_messages = Arc::new(Mutex::new(raw_messages));
        let workers: Vec<JoinHandle<()>> = (0..verification_workers.max(1))
            .map(|_| {
                start_verification_worker(
                    network.clone(),
                    verifier.clone(),
                    raw_messages.clone(),
                    inbound.clone(),
                )
            })
            .collect();

        loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => (),
            }

            if let Some((origin, bytes)) = network.recv() {
                let _ = to_workers.send((origin, bytes));
            } else {
                thread::yield_now()
            }
        }

        // Dropping the sending end makes every worker's `recv` fail once the queue is drained.
        drop(to_workers);
        workers.into_iter().for_each(|worker| {
            let _ = worker.join();
        });
    })
}

fn start_verification_worker<N: Network>(
    mut network: N,
    verifier: Arc<dyn Verifier>,
    raw_messages: Arc<Mutex<Receiver<(Address, Vec<u8>)>>>,
    inbound: Sender<InboundEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        // The lock is only held while waiting for the next message, not while verifying it.
        let next = match raw_messages.lock() {
            Ok(raw_messages) => raw_messages.recv(),
            Err(_) => return,
        };
        let (origin, bytes) = match next {
            Ok(raw_message) => raw_message,
            Err(_) => return,
        };

        match Envelope::from_wire(&bytes, Some(verifier.as_ref())) {
            Ok(envelope) => {
                if inbound.send(InboundEvent::Message(envelope)).is_err() {
                    // The consensus thread has halted.
                    return;
                }
            }
            Err(EnvelopeError::InvalidSigner { claimed, recovered }) => {
                log::debug!(
                    "dropping message from {}: claims to be from {}, but was signed by {:?}",
                    origin,
                    claimed,
                    recovered
                );
                network.penalize(origin)
            }
            Err(err) => log::debug!("dropping message from {}: {:?}", origin, err),
        }
    })
}

/// Message buffer for storing received envelopes for future views.
///
/// Its size is bounded by its capacity, and when the capacity is reached messages for the highest views
/// may be removed.
pub(crate) struct FutureMessageBuffer {
    buffer_capacity: BufferSize,
    buffer: BTreeMap<View, VecDeque<Envelope>>,
    buffer_size: BufferSize,
}

impl FutureMessageBuffer {
    /// Create an empty message buffer.
    pub(crate) fn new(buffer_capacity: BufferSize) -> Self {
        Self {
            buffer_capacity,
            buffer: BTreeMap::new(),
            buffer_size: BufferSize::new(0),
        }
    }

    /// Try inserting `envelope`, which belongs to `view`, into the buffer.
    ///
    /// If storing the envelope would make the buffer grow beyond its capacity, this function either:
    /// 1. Drops the envelope, if the envelopes for views higher than `view` do not take up enough space
    ///    to make room for it, or
    /// 2. Removes just enough highest-viewed envelopes from the buffer to make space for it.
    ///
    /// Envelopes for views at or below `view` are never removed to make room.
    ///
    /// Returns whether the envelope was inserted.
    pub(crate) fn insert(&mut self, view: View, envelope: Envelope) -> bool {
        let bytes_requested = envelope.size();
        if bytes_requested > self.buffer_capacity.int() {
            return false;
        }

        let buffer_will_be_overloaded = self
            .buffer_size
            .int()
            .checked_add(bytes_requested)
            .map_or(true, |new_size| new_size > self.buffer_capacity.int());
        if buffer_will_be_overloaded {
            let bytes_to_remove =
                bytes_requested - (self.buffer_capacity.int() - self.buffer_size.int());
            let bytes_above_view: u64 = self
                .buffer
                .range((Excluded(view), Unbounded))
                .flat_map(|(_, envelopes)| envelopes)
                .map(Envelope::size)
                .sum();
            if bytes_above_view < bytes_to_remove {
                return false;
            }
            self.remove_highest_viewed_msgs(bytes_to_remove);
        }

        self.buffer_size += bytes_requested;
        self.buffer.entry(view).or_default().push_back(envelope);
        true
    }

    /// Remove and return every envelope of `sequence`, in ascending order of view and, within a view, in
    /// insertion order.
    pub(crate) fn take_sequence(&mut self, sequence: Sequence) -> Vec<Envelope> {
        let mut sequence_and_above = self.buffer.split_off(&View::start_of(sequence));
        if let Some(next) = sequence.int().checked_add(1) {
            let mut above = sequence_and_above.split_off(&View::start_of(Sequence::new(next)));
            self.buffer.append(&mut above);
        }

        let taken: Vec<Envelope> = sequence_and_above.into_values().flatten().collect();
        let taken_bytes: u64 = taken.iter().map(Envelope::size).sum();
        self.buffer_size -= taken_bytes;
        taken
    }

    /// Remove all envelopes for views lower than `current_view`.
    pub(crate) fn remove_expired_msgs(&mut self, current_view: View) {
        let retained = self.buffer.split_off(&current_view);
        let expired_bytes: u64 = self.buffer.values().flatten().map(Envelope::size).sum();
        self.buffer_size -= expired_bytes;
        self.buffer = retained;
    }

    /// Given the number of bytes that need to be removed, removes just enough highest-viewed envelopes
    /// to free up (at least) the required number of bytes in the buffer.
    fn remove_highest_viewed_msgs(&mut self, bytes_to_remove: u64) {
        let mut bytes_removed = 0;
        while bytes_removed < bytes_to_remove {
            let mut highest = match self.buffer.last_entry() {
                Some(highest) => highest,
                None => break,
            };
            if let Some(envelope) = highest.get_mut().pop_back() {
                bytes_removed += envelope.size();
            }
            if highest.get().is_empty() {
                highest.remove();
            }
        }
        self.buffer_size -= bytes_removed;
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.values().map(VecDeque::len).sum()
    }

    pub(crate) fn size(&self) -> BufferSize {
        self.buffer_size
    }
}

#[cfg(test)]
fn buffered_prepare(sequence: u64, round: u64) -> (View, Envelope) {
    use crate::{
        messages::payloads::ConsensusMessage,
        types::basic::{CryptoHash, Round},
    };

    let view = View::new(Sequence::new(sequence), Round::new(round));
    let envelope = Envelope::wrap(
        &ConsensusMessage::prepare(view, CryptoHash::zero()),
        Address::new([1; 20]),
    );
    (view, envelope)
}

#[test]
fn buffer_evicts_highest_views_first_test() {
    use crate::messages::envelope::MessageKind;

    let (_, sample) = buffered_prepare(0, 0);
    let envelope_size = sample.size();

    // Room for exactly three envelopes.
    let mut buffer = FutureMessageBuffer::new(BufferSize::new(3 * envelope_size));
    for sequence in [5, 3, 7] {
        let (view, envelope) = buffered_prepare(sequence, 0);
        assert!(buffer.insert(view, envelope));
    }
    assert_eq!(buffer.size().int(), 3 * envelope_size);

    // As high as the highest view: dropped.
    let (view, envelope) = buffered_prepare(7, 0);
    assert!(!buffer.insert(view, envelope));
    let (view, envelope) = buffered_prepare(9, 0);
    assert!(!buffer.insert(view, envelope));

    // Lower than the highest view: the highest is evicted to make room.
    let (view, envelope) = buffered_prepare(4, 0);
    assert!(buffer.insert(view, envelope));
    assert_eq!(buffer.len(), 3);
    assert!(buffer.take_sequence(Sequence::new(7)).is_empty());
    assert_eq!(buffer.size().int(), 3 * envelope_size);

    // Evicting never reaches below the incoming view: a large envelope that needs more room than the
    // higher views hold is dropped instead.
    let mut buffer = FutureMessageBuffer::new(BufferSize::new(3 * envelope_size));
    for sequence in [5, 7] {
        let (view, envelope) = buffered_prepare(sequence, 0);
        assert!(buffer.insert(view, envelope));
    }
    let sized = |size: u64| {
        let header = Envelope::new(MessageKind::Prepare, Vec::new(), Address::new([2; 20])).size();
        Envelope::new(MessageKind::Prepare, vec![0; (size - header) as usize], Address::new([2; 20]))
    };
    let between = View::start_of(Sequence::new(6));
    assert!(!buffer.insert(between, sized(2 * envelope_size + envelope_size / 2)));
    assert_eq!(buffer.len(), 2);
    assert_eq!(buffer.size().int(), 2 * envelope_size);

    // Exactly as much room as the higher views hold: they are evicted.
    assert!(buffer.insert(between, sized(2 * envelope_size)));
    assert_eq!(buffer.take_sequence(Sequence::new(5)).len(), 1);
    assert_eq!(buffer.take_sequence(Sequence::new(6)).len(), 1);
    assert!(buffer.take_sequence(Sequence::new(7)).is_empty());
    assert_eq!(buffer.size().int(), 0);

    // Too large to ever fit.
    let mut tiny = FutureMessageBuffer::new(BufferSize::new(envelope_size - 1));
    let (view, envelope) = buffered_prepare(1, 0);
    assert!(!tiny.insert(view, envelope));
}

#[test]
fn buffer_replays_by_sequence_and_prunes_expired_test() {
    let mut buffer = FutureMessageBuffer::new(BufferSize::new(u64::MAX));
    for (sequence, round) in [(2, 0), (3, 1), (3, 0), (3, 4), (4, 0)] {
        let (view, envelope) = buffered_prepare(sequence, round);
        assert!(buffer.insert(view, envelope));
    }

    let taken: Vec<View> = buffer
        .take_sequence(Sequence::new(3))
        .iter()
        .map(|envelope| envelope.view().unwrap())
        .collect();
    assert_eq!(
        taken.iter().map(|view| view.round.int()).collect::<Vec<_>>(),
        vec![0, 1, 4]
    );
    assert_eq!(buffer.len(), 2);

    buffer.remove_expired_msgs(View::start_of(Sequence::new(4)));
    assert_eq!(buffer.len(), 1);
    assert_eq!(buffer.size().int(), buffered_prepare(4, 0).1.size());

    // The last sequence there is can be taken too.
    let (view, envelope) = buffered_prepare(u64::MAX, 2);
    assert!(buffer.insert(view, envelope));
    assert_eq!(buffer.take_sequence(Sequence::new(u64::MAX)).len(), 1);
    assert_eq!(buffer.len(), 1);
}
