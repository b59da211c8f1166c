/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, start, and stop an Istanbul validator.
//!
//! They key components of this module are:
//! - The builder-pattern interface to construct a [specification of the engine](EngineSpec) with:
//!   1. `EngineSpec::builder` to construct an `EngineSpecBuilder`,
//!   2. The setters of the `EngineSpecBuilder`, and
//!   3. The `EngineSpecBuilder::build` method to construct an [`EngineSpec`],
//! - The function to [build](EngineSpec::build) an [`IstanbulEngine`] from its specification,
//! - The [`Engine`] trait, through which the engine is [started](Engine::start) and
//!   [stopped](Engine::stop).
//!
//! ## Building an engine
//!
//! ```ignore
//! let mut engine =
//!     EngineSpec::builder()
//!     .backend(backend)
//!     .network(network)
//!     .signer(Ed25519Signer::new(signing_key))
//!     .verifier(Ed25519Verifier)
//!     .configuration(configuration)
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .build();
//!
//! engine.start()?;
//! ```
//!
//! ### Required setters
//!
//! - `.backend(...)`
//! - `.network(...)`
//! - `.signer(...)`
//! - `.verifier(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from [crate::events]:
//! - `.on_start_round(...)`
//! - `.on_round_change(...)`
//! - `.on_round_timeout(...)`
//! - `.on_receive_proposal(...)`
//! - `.on_preprepare(...)`
//! - `.on_prepare(...)`
//! - `.on_commit_block(...)`
//! - `.on_send_round_change(...)`
//!
//! ## Stopping and restarting
//!
//! [`stop`](Engine::stop) shuts the engine's threads down and keeps the round state they were working
//! on. A later [`start`](Engine::start) resumes from that state, so a validator that is restarted
//! within a round keeps every vote it counted and every lock it holds.
//!
//! An engine whose algorithm thread [halted](EngineError::Halted) keeps nothing, and cannot be started
//! again.

use std::{
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread::JoinHandle,
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::{
    algorithm::{start_algorithm, AlgorithmExit, InboundEvent},
    backend::Backend,
    event_bus::*,
    events::*,
    networking::{network::Network, receiving::start_polling},
    pacemaker::TimeoutPolicy,
    pbft::implementation::{Core, CoreConfiguration, CoreError},
    types::{
        basic::BufferSize,
        crypto_primitives::{Signer, Verifier},
    },
};

/// The control surface of a consensus engine.
pub trait Engine {
    /// Start processing messages and timeouts. The first start begins the round after the backend's last
    /// committed sequence; later starts resume where the engine was stopped.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Stop processing. Stopping an engine that is not running does nothing.
    fn stop(&mut self) -> Result<(), EngineError>;
}

/// Stores the user-defined parameters required to run the engine, that is:
/// 1. The base round timeout, which the timeout of each round doubles from.
/// 2. The maximum round timeout.
/// 3. The future message buffer capacity, which defines the maximum number of bytes that envelopes for
///    views this validator has not reached may take up. If this capacity is about to be exceeded, some
///    messages might be removed to make space for new messages.
/// 4. The number of verification workers, which decode and authenticate received messages in parallel.
/// 5. The "Log Events" flag, if set to "true" then logs should be printed.
///
/// ## Round timeouts
///
/// Round `r` times out after `min(request_timeout * 2^r, max_request_timeout)`. `max_request_timeout`
/// should be "well below" [u64::MAX] seconds.
///
/// ## Log Events
///
/// `istanbul_rs` logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, Copy, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.request_timeout(...)`
    - `.max_request_timeout(...)`
    - `.future_msg_buffer_capacity(...)`
    - `.verification_workers(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the timeout of round 0. Required."))]
    pub request_timeout: Duration,
    #[builder(setter(doc = "Set the upper bound of the round timeout. Required."))]
    pub max_request_timeout: Duration,
    #[builder(setter(
        doc = "Set the maximum number of bytes that can be stored in the future message buffer at any given moment. Required."
    ))]
    pub future_msg_buffer_capacity: BufferSize,
    #[builder(setter(doc = "Set the number of threads that verify received messages. Required."))]
    pub verification_workers: usize,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl From<Configuration> for CoreConfiguration {
    fn from(value: Configuration) -> Self {
        CoreConfiguration {
            timeout_policy: TimeoutPolicy::new(value.request_timeout, value.max_request_timeout),
            future_msg_buffer_capacity: value.future_msg_buffer_capacity,
        }
    }
}

/// Stores all necessary parameters and trait implementations required to run an [`IstanbulEngine`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building an [EngineSpec]. On the builder call the following methods to construct a valid [EngineSpec].

    Required:
    - `.backend(...)`
    - `.network(...)`
    - `.signer(...)`
    - `.verifier(...)`
    - `.configuration(...)`

    Optional:
    - `.on_start_round(...)`
    - `.on_round_change(...)`
    - `.on_round_timeout(...)`
    - `.on_receive_proposal(...)`
    - `.on_preprepare(...)`
    - `.on_prepare(...)`
    - `.on_commit_block(...)`
    - `.on_send_round_change(...)`
"))]
pub struct EngineSpec<N: Network, B: Backend> {
    // Required parameters
    #[builder(setter(
        doc = "Set the application's view of the chain. The argument must implement the [Backend](crate::backend::Backend) trait. Required."
    ))]
    backend: B,
    #[builder(setter(
        doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."
    ))]
    network: N,
    #[builder(setter(
        transform = |signer: impl Signer| Box::new(signer) as Box<dyn Signer>,
        doc = "Set the validator's identity, used to sign its messages and committed seals. Required."
    ))]
    signer: Box<dyn Signer>,
    #[builder(setter(
        transform = |verifier: impl Verifier| Arc::new(verifier) as Arc<dyn Verifier>,
        doc = "Set the verifier that recovers the signers of received messages and committed seals. Required."
    ))]
    verifier: Arc<dyn Verifier>,
    #[builder(setter(
        doc = "Set the [configuration](Configuration), which contains the necessary parameters to run the engine. Required."
    ))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the validator starts a round. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundChangeEvent>),
    doc = "Register a handler closure to be invoked after enough validators request a round change for the validator to move to a higher round. Optional."))]
    on_round_change: Option<HandlerPtr<RoundChangeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the validator's current round times out. Optional."))]
    on_round_timeout: Option<HandlerPtr<RoundTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the validator receives a proposal for the current view. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PreprepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PreprepareEvent>),
    doc = "Register a handler closure to be invoked after the validator accepts a proposal. Optional."))]
    on_preprepare: Option<HandlerPtr<PreprepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PrepareEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PrepareEvent>),
    doc = "Register a handler closure to be invoked after the validator collects a quorum of Prepares and locks a block. Optional."))]
    on_prepare: Option<HandlerPtr<PrepareEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendRoundChangeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendRoundChangeEvent>),
    doc = "Register a handler closure to be invoked after the validator broadcasts a round change request. Optional."))]
    on_send_round_change: Option<HandlerPtr<SendRoundChangeEvent>>,
}

impl<N: Network, B: Backend> EngineSpec<N, B> {
    /// Assemble an [`IstanbulEngine`] from this specification. No thread is started until the engine is
    /// [started](Engine::start).
    pub fn build(self) -> IstanbulEngine<N, B> {
        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_start_round,
            self.on_round_change,
            self.on_round_timeout,
            self.on_receive_proposal,
            self.on_preprepare,
            self.on_prepare,
            self.on_commit_block,
            self.on_send_round_change,
        );

        let core = Core::new(
            self.signer,
            self.verifier.clone(),
            self.backend,
            self.network.clone(),
            self.configuration.into(),
        );

        IstanbulEngine {
            network: self.network,
            verifier: self.verifier,
            verification_workers: self.configuration.verification_workers,
            stopped: Some(Stopped {
                core,
                event_handlers,
            }),
            running: None,
        }
    }
}

/// A handle to an Istanbul validator. When this value is dropped, all of its background threads are
/// gracefully shut down.
pub struct IstanbulEngine<N: Network, B: Backend> {
    network: N,
    verifier: Arc<dyn Verifier>,
    verification_workers: usize,
    stopped: Option<Stopped<N, B>>,
    running: Option<Running<N, B>>,
}

// What a stopped engine keeps, ready for the next start.
struct Stopped<N: Network, B: Backend> {
    core: Core<N, B>,
    event_handlers: EventHandlers,
}

struct Running<N: Network, B: Backend> {
    algorithm: JoinHandle<AlgorithmExit<N, B>>,
    algorithm_shutdown: Sender<()>,
    poller: JoinHandle<()>,
    poller_shutdown: Sender<()>,
    event_bus: EventBus,
}

enum EventBus {
    // No handler is registered, so no thread is needed.
    Idle(EventHandlers),
    Running {
        handle: JoinHandle<EventHandlers>,
        shutdown: Sender<()>,
    },
}

impl<N: Network, B: Backend> IstanbulEngine<N, B> {
    /// Check whether the engine's threads are running.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl<N: Network, B: Backend> Engine for IstanbulEngine<N, B> {
    fn start(&mut self) -> Result<(), EngineError> {
        if self.running.is_some() {
            return Err(EngineError::AlreadyStarted);
        }
        let Stopped {
            mut core,
            event_handlers,
        } = self.stopped.take().ok_or(EngineError::Crashed)?;

        let (inbound, inbound_receiver) = mpsc::channel::<InboundEvent>();

        let (event_bus, event_publisher) = if event_handlers.is_empty() {
            (EventBus::Idle(event_handlers), None)
        } else {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let handle = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
            (EventBus::Running { handle, shutdown }, Some(event_publisher))
        };

        core.attach(inbound.clone(), event_publisher);

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(
            self.network.clone(),
            self.verifier.clone(),
            self.verification_workers,
            inbound,
            poller_shutdown_receiver,
        );

        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let algorithm = start_algorithm(core, inbound_receiver, algorithm_shutdown_receiver);

        self.running = Some(Running {
            algorithm,
            algorithm_shutdown,
            poller,
            poller_shutdown,
            event_bus,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        let Running {
            algorithm,
            algorithm_shutdown,
            poller,
            poller_shutdown,
            event_bus,
        } = match self.running.take() {
            Some(running) => running,
            None => return Ok(()),
        };

        // The algorithm thread goes first, so that it cannot publish events after the event bus exits.
        // The poller outlives it so that the workers never find the inbound queue closed while the
        // algorithm is still running. A thread that already exited ignores its signal.
        let _ = algorithm_shutdown.send(());
        let exit = algorithm.join();

        let _ = poller_shutdown.send(());
        let poller_exit = poller.join();

        let event_handlers = match event_bus {
            EventBus::Idle(event_handlers) => Ok(event_handlers),
            EventBus::Running { handle, shutdown } => {
                let _ = shutdown.send(());
                handle.join()
            }
        };

        match (exit, poller_exit, event_handlers) {
            (Ok(AlgorithmExit { core, fatal }), Ok(()), Ok(event_handlers)) => match fatal {
                // The round state is corrupted. Nothing is kept, so the engine cannot be started again.
                Some(err) => Err(EngineError::Halted(err)),
                None => {
                    self.stopped = Some(Stopped {
                        core,
                        event_handlers,
                    });
                    Ok(())
                }
            },
            _ => Err(EngineError::Crashed),
        }
    }
}

impl<N: Network, B: Backend> Drop for IstanbulEngine<N, B> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("engine stopped with an error: {:?}", err)
        }
    }
}

/// The ways starting or stopping an [`IstanbulEngine`] can fail.
#[derive(Debug)]
pub enum EngineError {
    /// [`start`](Engine::start) was called on a running engine.
    AlreadyStarted,

    /// The algorithm thread halted on a fatal error. The engine is stopped for good: its round state is
    /// discarded, and starting it again fails with [`Crashed`](EngineError::Crashed).
    Halted(CoreError),

    /// One of the engine's threads panicked, or the engine halted earlier. The engine cannot be started
    /// again.
    Crashed,
}
