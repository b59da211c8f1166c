/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The algorithm thread, the driving force of an Istanbul validator.
//!
//! The algorithm thread is the single consumer of the validator's inbound queue. Everything that can
//! change the validator's round state arrives through this queue as an [`InboundEvent`]:
//! 1. Envelopes received from other validators, already decoded and authenticated by the
//!    [verification workers](crate::networking).
//! 2. Round timeouts posted by the [round timer](crate::pacemaker).
//!
//! The thread feeds these to its [`Core`] one by one, in the order they arrive. Because nothing else
//! touches the round state, no locking is needed anywhere in the consensus logic.
//!
//! The thread exits when it receives a shutdown signal, or when the `Core` reports a
//! [fatal](CoreError::is_fatal) error. In both cases it hands the `Core` back. After a shutdown the
//! engine can be [restarted](crate::engine::Engine::start) from where it stopped; after a fatal error
//! it discards the `Core` and stays halted.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    backend::Backend,
    messages::envelope::Envelope,
    networking::network::Network,
    pbft::{
        implementation::{Core, CoreError},
        tracker::TrackerError,
    },
    types::basic::View,
};

/// An input to the algorithm thread.
#[derive(Debug)]
pub(crate) enum InboundEvent {
    /// An authenticated envelope from another validator.
    Message(Envelope),

    /// The timeout of `View` elapsed.
    Timeout(View),
}

/// What the algorithm thread returns when it exits.
pub(crate) struct AlgorithmExit<N: Network, B: Backend> {
    pub(crate) core: Core<N, B>,
    /// The error that halted the thread, if it did not exit because of a shutdown signal.
    pub(crate) fatal: Option<CoreError>,
}

pub(crate) fn start_algorithm<N: Network, B: Backend>(
    mut core: Core<N, B>,
    inbound: Receiver<InboundEvent>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<AlgorithmExit<N, B>> {
    thread::spawn(move || {
        if let Err(err) = core.enter() {
            return halt(core, err);
        }

        loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => {
                    core.suspend();
                    return AlgorithmExit { core, fatal: None };
                }
                Err(TryRecvError::Empty) => (),
            }

            let event = match inbound.recv_timeout(INBOUND_POLL_INTERVAL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    // The round timer holds a sending end while attached, so this only happens while
                    // shutting down. Wait for the signal.
                    thread::sleep(INBOUND_POLL_INTERVAL);
                    continue;
                }
            };

            match core.on_event(event) {
                Ok(()) => (),
                Err(err) if err.is_fatal() => return halt(core, err),
                Err(err) => log::debug!("dropped inbound event: {:?}", err),
            }
        }
    })
}

fn halt<N: Network, B: Backend>(mut core: Core<N, B>, err: CoreError) -> AlgorithmExit<N, B> {
    match &err {
        CoreError::Tracker(TrackerError::InvalidTransition { view, from, to }) => log::error!(
            "consensus halted in view {}: invalid transition from {} to {}",
            view,
            from,
            to
        ),
        _ => log::error!("consensus halted: {:?}", err),
    }
    core.suspend();
    AlgorithmExit {
        core,
        fatal: Some(err),
    }
}

/// How long the algorithm thread waits for an inbound event before checking for the shutdown signal
/// again.
const INBOUND_POLL_INTERVAL: Duration = Duration::from_millis(10);
