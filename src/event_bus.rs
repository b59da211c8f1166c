/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [`Event`]s published by the consensus thread and invokes the
//! handlers registered for them.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

/// Pointer to a handler closure, parametrised by the argument (the event type).
pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// The handlers registered for each event type. When logging is enabled, the default logging handler of
/// each event type is registered before any user-defined handler.
pub(crate) struct EventHandlers {
    pub(crate) start_round_handlers: Vec<HandlerPtr<StartRoundEvent>>,
    pub(crate) round_change_handlers: Vec<HandlerPtr<RoundChangeEvent>>,
    pub(crate) round_timeout_handlers: Vec<HandlerPtr<RoundTimeoutEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) preprepare_handlers: Vec<HandlerPtr<PreprepareEvent>>,
    pub(crate) prepare_handlers: Vec<HandlerPtr<PrepareEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) send_round_change_handlers: Vec<HandlerPtr<SendRoundChangeEvent>>,
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        start_round_handler: Option<HandlerPtr<StartRoundEvent>>,
        round_change_handler: Option<HandlerPtr<RoundChangeEvent>>,
        round_timeout_handler: Option<HandlerPtr<RoundTimeoutEvent>>,
        receive_proposal_handler: Option<HandlerPtr<ReceiveProposalEvent>>,
        preprepare_handler: Option<HandlerPtr<PreprepareEvent>>,
        prepare_handler: Option<HandlerPtr<PrepareEvent>>,
        commit_block_handler: Option<HandlerPtr<CommitBlockEvent>>,
        send_round_change_handler: Option<HandlerPtr<SendRoundChangeEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            start_round_handlers: handlers(log_events, start_round_handler),
            round_change_handlers: handlers(log_events, round_change_handler),
            round_timeout_handlers: handlers(log_events, round_timeout_handler),
            receive_proposal_handlers: handlers(log_events, receive_proposal_handler),
            preprepare_handlers: handlers(log_events, preprepare_handler),
            prepare_handlers: handlers(log_events, prepare_handler),
            commit_block_handlers: handlers(log_events, commit_block_handler),
            send_round_change_handlers: handlers(log_events, send_round_change_handler),
        }
    }

    /// Check whether no handler is registered for any event. If so, the engine does not start an event
    /// bus at all.
    pub(crate) fn is_empty(&self) -> bool {
        self.start_round_handlers.is_empty()
            && self.round_change_handlers.is_empty()
            && self.round_timeout_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.preprepare_handlers.is_empty()
            && self.prepare_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.send_round_change_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartRound(start_round_event) => self
                .start_round_handlers
                .iter()
                .for_each(|handler| handler(&start_round_event)),

            Event::RoundChange(round_change_event) => self
                .round_change_handlers
                .iter()
                .for_each(|handler| handler(&round_change_event)),

            Event::RoundTimeout(round_timeout_event) => self
                .round_timeout_handlers
                .iter()
                .for_each(|handler| handler(&round_timeout_event)),

            Event::ReceiveProposal(receive_proposal_event) => self
                .receive_proposal_handlers
                .iter()
                .for_each(|handler| handler(&receive_proposal_event)),

            Event::Preprepare(preprepare_event) => self
                .preprepare_handlers
                .iter()
                .for_each(|handler| handler(&preprepare_event)),

            Event::Prepare(prepare_event) => self
                .prepare_handlers
                .iter()
                .for_each(|handler| handler(&prepare_event)),

            Event::CommitBlock(commit_block_event) => self
                .commit_block_handlers
                .iter()
                .for_each(|handler| handler(&commit_block_event)),

            Event::SendRoundChange(send_round_change_event) => self
                .send_round_change_handlers
                .iter()
                .for_each(|handler| handler(&send_round_change_event)),
        }
    }
}

fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger())
    }
    handlers.extend(user_handler);
    handlers
}

/// Start the event bus thread, which polls `event_subscriber` for events and fires the matching
/// `event_handlers` until it receives a shutdown signal. Returns the handlers when it exits, so that a
/// restarted engine can start a new event bus with them.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<EventHandlers> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                // Fire the handlers of the events published before the shutdown.
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event)
                }
                return event_handlers;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => {
                // The consensus thread keeps the publishing end for as long as the engine lives, so this
                // only happens while shutting down. Wait for the signal.
                thread::sleep(EVENT_POLL_INTERVAL)
            }
        }
    })
}

/// How long the event bus waits for an event before checking for the shutdown signal again.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[test]
fn event_bus_fires_registered_handlers_test() {
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::SystemTime;

    use crate::types::basic::{Sequence, View};

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_by_handler = seen.clone();
    let handlers = EventHandlers::new(
        false,
        Some(Box::new(move |event: &StartRoundEvent| {
            seen_by_handler.lock().unwrap().push(event.view)
        })),
        None,
        None,
        None,
        None,
        None,
        None,
        None,
    );
    assert!(!handlers.is_empty());

    let (publisher, subscriber) = mpsc::channel();
    let (shutdown, shutdown_receiver) = mpsc::channel();
    let event_bus = start_event_bus(handlers, subscriber, shutdown_receiver);

    let publisher = Some(publisher);
    for sequence in 1..=3 {
        Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            view: View::start_of(Sequence::new(sequence)),
            proposer: None,
        })
        .publish(&publisher);
    }
    shutdown.send(()).unwrap();
    let handlers = event_bus.join().unwrap();

    assert_eq!(seen.lock().unwrap().len(), 3);
    assert_eq!(handlers.start_round_handlers.len(), 1);
    assert!(EventHandlers::new(false, None, None, None, None, None, None, None, None).is_empty());
}
