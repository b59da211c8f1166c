/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Event-driven implementation of a single Istanbul validator.
//!
//! Main type: [`Core`].

use std::{
    cmp::max,
    collections::VecDeque,
    sync::{mpsc::Sender, Arc},
    time::SystemTime,
};

use crate::{
    algorithm::InboundEvent,
    backend::{Backend, BlockValidationError},
    events::*,
    messages::{
        envelope::{Envelope, EnvelopeError},
        payloads::{ConsensusMessage, Proposal, Subject},
    },
    networking::{network::Network, receiving::FutureMessageBuffer, sending::SenderHandle},
    pacemaker::{RoundTimer, TimeoutPolicy},
    types::{
        basic::{Address, BufferSize, CommittedSeal, CryptoHash, Round, Sequence, View},
        crypto_primitives::{committed_seal_bytes, Signer, Verifier},
    },
};

use super::{
    phase::{classify, Phase, ViewClass},
    tracker::{QuorumTracker, TrackerError, Transition, VoteOutcome},
};

/// The consensus state machine of a single validator.
///
/// # Usage
///
/// `Core` is meant to be used in an event-oriented fashion by a single thread (the algorithm thread),
/// which feeds it the [`InboundEvent`]s it receives through [`on_event`](Self::on_event). `Core` owns the
/// [`QuorumTracker`], and through it all of the validator's round state, so nothing else ever needs
/// to lock or share that state.
///
/// # Own messages
///
/// The network does not deliver a validator's broadcasts back to it. Instead, every envelope `Core`
/// broadcasts is also queued locally and processed through the same path as envelopes received from
/// other validators, before `on_event` returns.
pub(crate) struct Core<N: Network, B: Backend> {
    me: Box<dyn Signer>,
    verifier: Arc<dyn Verifier>,
    backend: B,
    sender_handle: SenderHandle<N>,
    tracker: QuorumTracker,
    future_messages: FutureMessageBuffer,
    local_messages: VecDeque<Envelope>,
    timer: RoundTimer,
    timeout_policy: TimeoutPolicy,
    // The highest round this validator requested to move to in the current sequence.
    last_requested_round: Option<Round>,
    started: bool,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network, B: Backend> Core<N, B> {
    /// Create a validator that will start at the sequence after the backend's last committed sequence.
    pub(crate) fn new(
        me: Box<dyn Signer>,
        verifier: Arc<dyn Verifier>,
        backend: B,
        network: N,
        config: CoreConfiguration,
    ) -> Self {
        let sequence = backend.last_committed_sequence() + 1;
        let tracker = QuorumTracker::new(sequence, backend.validator_set(sequence));
        Self {
            me,
            verifier,
            backend,
            sender_handle: SenderHandle::new(network),
            tracker,
            future_messages: FutureMessageBuffer::new(config.future_msg_buffer_capacity),
            local_messages: VecDeque::new(),
            timer: RoundTimer::new(),
            timeout_policy: config.timeout_policy,
            last_requested_round: None,
            started: false,
            event_publisher: None,
        }
    }

    /// Post round timeouts into `inbound` and events into `event_publisher` from now on.
    pub(crate) fn attach(
        &mut self,
        inbound: Sender<InboundEvent>,
        event_publisher: Option<Sender<Event>>,
    ) {
        self.timer.attach(inbound);
        self.event_publisher = event_publisher;
    }

    /// Start the first round, or, if the validator was started before, re-arm the timer of the view it
    /// stopped in.
    pub(crate) fn enter(&mut self) -> Result<(), CoreError> {
        if self.started {
            let view = self.tracker.view();
            let round = max(view.round, self.last_requested_round.unwrap_or(view.round));
            self.timer.arm(view, self.timeout_policy.timeout(round));
        } else {
            self.started = true;
            self.start_round();
        }
        self.process_local_messages()
    }

    /// Stop the round timer and event publishing. The round state is kept as is.
    pub(crate) fn suspend(&mut self) {
        self.timer.detach();
        self.event_publisher = None;
    }

    /// Handle one event from the inbound queue, and then every message it caused this validator to
    /// send.
    ///
    /// Errors are returned for the event itself, or for the first fatal error among the messages it
    /// caused. Non-fatal errors of the latter are only logged.
    pub(crate) fn on_event(&mut self, event: InboundEvent) -> Result<(), CoreError> {
        let result = match event {
            InboundEvent::Message(envelope) => self.on_envelope(envelope),
            InboundEvent::Timeout(view) => self.on_timeout(view),
        };
        if let Err(err) = &result {
            if err.is_fatal() {
                return result;
            }
        }
        self.process_local_messages()?;
        result
    }

    fn process_local_messages(&mut self) -> Result<(), CoreError> {
        while let Some(envelope) = self.local_messages.pop_front() {
            let shown = envelope.to_string();
            if let Err(err) = self.on_envelope(envelope) {
                if err.is_fatal() {
                    return Err(err);
                }
                log::debug!("dropped local message {}: {:?}", shown, err);
            }
        }
        Ok(())
    }

    /// Classify an authenticated envelope against the current view, and process, buffer, or discard it
    /// accordingly.
    fn on_envelope(&mut self, envelope: Envelope) -> Result<(), CoreError> {
        let message = envelope.message()?;
        let current = self.tracker.view();
        let received = message.view();

        match (classify(current, received), message) {
            (ViewClass::Stale, _) => Err(CoreError::StaleView { current, received }),
            (ViewClass::FutureRound, ConsensusMessage::RoundChange(subject))
            | (ViewClass::Current, ConsensusMessage::RoundChange(subject)) => {
                self.on_receive_round_change(envelope.sender, &subject)
            }
            (ViewClass::FutureRound, _) | (ViewClass::FutureSequence, _) => {
                let shown = envelope.to_string();
                if self.future_messages.insert(received, envelope) {
                    log::trace!(
                        "buffered message for view {}, {} messages ({} bytes) buffered",
                        received,
                        self.future_messages.len(),
                        self.future_messages.size().int()
                    );
                    Ok(())
                } else {
                    log::debug!("no room to buffer {} for view {}", shown, received);
                    Err(CoreError::FutureView { current, received })
                }
            }
            (ViewClass::Current, ConsensusMessage::Proposal(proposal)) => {
                self.on_receive_proposal(envelope.sender, proposal)
            }
            (ViewClass::Current, ConsensusMessage::Prepare(subject)) => {
                self.on_receive_prepare(envelope.sender, &subject)
            }
            (ViewClass::Current, ConsensusMessage::Commit(subject)) => {
                self.on_receive_commit(envelope.sender, &subject, envelope.committed_seal)
            }
        }
    }

    fn on_receive_proposal(&mut self, origin: Address, proposal: Proposal) -> Result<(), CoreError> {
        let Proposal { view, block } = proposal;

        // 1. Check that the proposal comes from the proposer of the view.
        if self.backend.proposer(view) != Some(origin) {
            return Err(CoreError::NotProposer {
                sender: origin,
                view,
            });
        }
        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin,
            view,
            block: block.clone(),
        })
        .publish(&self.event_publisher);

        // 2. Check that the block is well-formed and, unless this validator is locked on it already, that
        //    the backend accepts it.
        if block.sequence != view.sequence || !block.is_correct() {
            return Err(CoreError::MalformedBlock { sender: origin });
        }
        let state = self.tracker.state();
        if state.phase() == Phase::AcceptRequest && state.locked().is_none() {
            self.backend
                .validate_block(&block)
                .map_err(|reason| CoreError::RejectedBlock {
                    sender: origin,
                    reason,
                })?;
        }

        // 3. Accept it.
        let outcome = self.tracker.accept_proposal(origin, view, block)?;
        self.apply(outcome)
    }

    fn on_receive_prepare(&mut self, origin: Address, subject: &Subject) -> Result<(), CoreError> {
        let outcome = self.tracker.add_prepare(origin, subject)?;
        self.apply(outcome)
    }

    fn on_receive_commit(
        &mut self,
        origin: Address,
        subject: &Subject,
        committed_seal: CommittedSeal,
    ) -> Result<(), CoreError> {
        // Empty seals are refused by the tracker.
        if !committed_seal.is_empty() {
            let recovered = self
                .verifier
                .verify(&committed_seal_bytes(&subject.digest), committed_seal.bytes());
            if !matches!(recovered, Ok(signer) if signer == origin) {
                return Err(CoreError::InvalidCommittedSeal { sender: origin });
            }
        }
        let outcome = self.tracker.add_commit(origin, subject, committed_seal)?;
        self.apply(outcome)
    }

    fn on_receive_round_change(
        &mut self,
        origin: Address,
        subject: &Subject,
    ) -> Result<(), CoreError> {
        let outcome = self.tracker.add_round_change(origin, subject.view.round)?;
        self.apply(outcome)
    }

    /// Ignore a timeout for any view but the current one. For the current view, request to move to a
    /// round above every round requested so far, and wait for that round's timeout.
    fn on_timeout(&mut self, view: View) -> Result<(), CoreError> {
        if view != self.tracker.view() {
            return Ok(());
        }
        Event::RoundTimeout(RoundTimeoutEvent {
            timestamp: SystemTime::now(),
            view,
        })
        .publish(&self.event_publisher);

        let round = max(view.round, self.last_requested_round.unwrap_or(view.round)) + 1;
        self.request_round_change(round);
        self.timer.arm(view, self.timeout_policy.timeout(round));
        Ok(())
    }

    fn apply(&mut self, outcome: VoteOutcome) -> Result<(), CoreError> {
        match outcome {
            VoteOutcome::Duplicate => Ok(()),
            VoteOutcome::Counted(transitions) => transitions
                .into_iter()
                .try_for_each(|transition| self.on_transition(transition)),
        }
    }

    fn on_transition(&mut self, transition: Transition) -> Result<(), CoreError> {
        let view = self.tracker.view();
        match transition {
            Transition::Preprepared { digest } => {
                Event::Preprepare(PreprepareEvent {
                    timestamp: SystemTime::now(),
                    view,
                    block: digest,
                })
                .publish(&self.event_publisher);
                self.broadcast(ConsensusMessage::prepare(view, digest), None);
            }

            Transition::Prepared { block } => {
                Event::Prepare(PrepareEvent {
                    timestamp: SystemTime::now(),
                    view,
                    block: block.hash,
                })
                .publish(&self.event_publisher);
                let seal = self.me.sign(&committed_seal_bytes(&block.hash));
                self.broadcast(
                    ConsensusMessage::commit(view, block.hash),
                    Some(CommittedSeal::new(seal.bytes().to_vec())),
                );
            }

            Transition::Committed { block, seals } => {
                self.backend.on_committed(view.sequence, &block, &seals);
                Event::CommitBlock(CommitBlockEvent {
                    timestamp: SystemTime::now(),
                    sequence: view.sequence,
                    block: block.hash,
                    committed_seals: seals.len(),
                })
                .publish(&self.event_publisher);
                self.start_sequence(view.sequence + 1)?;
            }

            Transition::RoundChanged { round } => {
                Event::RoundChange(RoundChangeEvent {
                    timestamp: SystemTime::now(),
                    view,
                })
                .publish(&self.event_publisher);
                if self.last_requested_round.map_or(true, |requested| requested < round) {
                    self.request_round_change(round);
                }
                self.start_round();
            }
        }
        Ok(())
    }

    fn start_sequence(&mut self, sequence: Sequence) -> Result<(), CoreError> {
        let validator_set = self.backend.validator_set(sequence);
        self.tracker.new_sequence(sequence, validator_set)?;
        self.last_requested_round = None;
        self.start_round();
        Ok(())
    }

    /// Arm the timer of the current view, replay the messages buffered for the current sequence, and
    /// propose if this validator is the view's proposer.
    fn start_round(&mut self) {
        let view = self.tracker.view();
        let proposer = self.backend.proposer(view);
        Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            view,
            proposer,
        })
        .publish(&self.event_publisher);

        self.timer.arm(view, self.timeout_policy.timeout(view.round));

        // Messages for later rounds of the sequence are buffered again when they are replayed.
        self.future_messages.remove_expired_msgs(view);
        let replayed = self.future_messages.take_sequence(view.sequence);
        self.local_messages.extend(replayed);

        if proposer == Some(self.me.address()) {
            self.propose(view)
        }
    }

    /// Propose the block this validator is locked on, or, if it is not locked, a new block from the
    /// backend.
    fn propose(&mut self, view: View) {
        let block = match self.tracker.state().locked() {
            Some(locked) => Some(locked.clone()),
            None => self.backend.propose_block(view.sequence),
        };
        match block {
            Some(block) if block.sequence == view.sequence => {
                self.broadcast(ConsensusMessage::proposal(view, block), None)
            }
            Some(block) => log::warn!(
                "backend proposed a block for sequence {} in view {}",
                block.sequence,
                view
            ),
            None => log::debug!("backend has no block to propose in view {}", view),
        }
    }

    fn request_round_change(&mut self, round: Round) {
        self.last_requested_round = Some(round);
        let view = self.tracker.view().with_round(round);
        let digest = self
            .tracker
            .state()
            .locked()
            .map_or(CryptoHash::zero(), |locked| locked.hash);

        Event::SendRoundChange(SendRoundChangeEvent {
            timestamp: SystemTime::now(),
            view,
        })
        .publish(&self.event_publisher);
        self.broadcast(ConsensusMessage::round_change(view, digest), None);
    }

    /// Sign and broadcast `message`, and queue it for local processing. Validators outside of the current
    /// validator set only listen.
    fn broadcast(&mut self, message: ConsensusMessage, committed_seal: Option<CommittedSeal>) {
        let me = self.me.address();
        if !self.tracker.validator_set().contains(&me) {
            return;
        }

        let mut envelope = Envelope::wrap(&message, me).sign(self.me.as_ref());
        if let Some(committed_seal) = committed_seal {
            envelope = envelope.with_committed_seal(committed_seal);
        }
        self.sender_handle.broadcast(&envelope);
        self.local_messages.push_back(envelope);
    }
}

/// Configuration parameters for [`Core`].
#[derive(Clone, Copy)]
pub(crate) struct CoreConfiguration {
    pub(crate) timeout_policy: TimeoutPolicy,
    pub(crate) future_msg_buffer_capacity: BufferSize,
}

/// The ways handling an [`InboundEvent`] can fail.
///
/// All of them only concern the offending message, and the validator carries on with the next one,
/// except for [`TrackerError::InvalidTransition`], which means that the round state is corrupted. See
/// [`is_fatal`](Self::is_fatal).
#[derive(Debug)]
pub enum CoreError {
    /// The envelope's payload could not be interpreted.
    Envelope(EnvelopeError),

    /// The tracker refused the message.
    Tracker(TrackerError),

    /// The message is for a view this validator has left.
    StaleView { current: View, received: View },

    /// The message is for a view this validator has not reached, and the future message buffer had no
    /// room for it.
    FutureView { current: View, received: View },

    /// A proposal from a validator that is not the proposer of its view.
    NotProposer { sender: Address, view: View },

    /// A proposal whose block is not for the proposal's sequence, or whose hash is wrong.
    MalformedBlock { sender: Address },

    /// A proposal whose block the backend rejected.
    RejectedBlock {
        sender: Address,
        reason: BlockValidationError,
    },

    /// A Commit whose committed seal was not produced by its sender over its digest.
    InvalidCommittedSeal { sender: Address },
}

impl CoreError {
    /// Whether the validator must halt. Only an invalid phase transition is fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::Tracker(TrackerError::InvalidTransition { .. })
        )
    }
}

impl From<EnvelopeError> for CoreError {
    fn from(value: EnvelopeError) -> Self {
        CoreError::Envelope(value)
    }
}

impl From<TrackerError> for CoreError {
    fn from(value: TrackerError) -> Self {
        CoreError::Tracker(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rand_core::OsRng;

    use super::*;
    use crate::{
        messages::envelope::MessageKind,
        pbft::roles::select_proposer,
        types::{
            basic::Data,
            block::Block,
            crypto_primitives::{Ed25519Signer, Ed25519Verifier, SigningKey},
            validator_set::ValidatorSet,
        },
    };

    type Committed = Arc<Mutex<Vec<(Sequence, Block, Vec<CommittedSeal>)>>>;

    struct TestBackend {
        validator_set: ValidatorSet,
        last_committed: Sequence,
        committed: Committed,
    }

    impl Backend for TestBackend {
        fn validator_set(&self, _: Sequence) -> ValidatorSet {
            self.validator_set.clone()
        }

        fn propose_block(&mut self, sequence: Sequence) -> Option<Block> {
            Some(Block::new(sequence, CryptoHash::zero(), Data::new(vec![1, 2, 3])))
        }

        fn validate_block(&mut self, _: &Block) -> Result<(), BlockValidationError> {
            Ok(())
        }

        fn on_committed(&mut self, sequence: Sequence, block: &Block, seals: &[CommittedSeal]) {
            self.last_committed = sequence;
            self.committed
                .lock()
                .unwrap()
                .push((sequence, block.clone(), seals.to_vec()))
        }

        fn last_committed_sequence(&self) -> Sequence {
            self.last_committed
        }
    }

    #[derive(Clone)]
    struct RecordingNetwork(Arc<Mutex<Vec<Envelope>>>);

    impl Network for RecordingNetwork {
        fn broadcast(&mut self, message: Vec<u8>) {
            self.0.lock().unwrap().push(Envelope::decode(&message).unwrap())
        }

        fn recv(&mut self) -> Option<(Address, Vec<u8>)> {
            None
        }
    }

    struct Fixture {
        signers: Vec<Ed25519Signer>,
        core: Core<RecordingNetwork, TestBackend>,
        broadcasts: Arc<Mutex<Vec<Envelope>>>,
        committed: Committed,
    }

    // Four validators, ordered by address. The core under test is the validator at `me`, and starts at
    // `last_committed + 1`.
    fn fixture(me: usize, last_committed: u64) -> Fixture {
        fixture_of(4, me, last_committed)
    }

    fn fixture_of(validators: usize, me: usize, last_committed: u64) -> Fixture {
        let mut signers: Vec<Ed25519Signer> = (0..validators)
            .map(|_| Ed25519Signer::new(SigningKey::generate(&mut OsRng)))
            .collect();
        signers.sort_by_key(|signer| signer.address());
        let validator_set: ValidatorSet = signers.iter().map(|signer| signer.address()).collect();

        let committed = Committed::default();
        let broadcasts = Arc::new(Mutex::new(Vec::new()));
        let core = Core::new(
            Box::new(signers[me].clone()),
            Arc::new(Ed25519Verifier),
            TestBackend {
                validator_set,
                last_committed: Sequence::new(last_committed),
                committed: committed.clone(),
            },
            RecordingNetwork(broadcasts.clone()),
            CoreConfiguration {
                timeout_policy: TimeoutPolicy::new(
                    std::time::Duration::from_secs(1),
                    std::time::Duration::from_secs(8),
                ),
                future_msg_buffer_capacity: BufferSize::new(1 << 20),
            },
        );

        Fixture {
            signers,
            core,
            broadcasts,
            committed,
        }
    }

    impl Fixture {
        fn signer_of(&self, address: Address) -> &Ed25519Signer {
            self.signers
                .iter()
                .find(|signer| signer.address() == address)
                .unwrap()
        }

        fn deliver(
            &mut self,
            from: usize,
            message: ConsensusMessage,
            seal: Option<CommittedSeal>,
        ) -> Result<(), CoreError> {
            let signer = &self.signers[from];
            let mut envelope = Envelope::wrap(&message, signer.address()).sign(signer);
            if let Some(seal) = seal {
                envelope = envelope.with_committed_seal(seal);
            }
            self.core.on_event(InboundEvent::Message(envelope))
        }

        fn seal_of(&self, from: usize, digest: &CryptoHash) -> CommittedSeal {
            CommittedSeal::new(self.signers[from].sign(&committed_seal_bytes(digest)).bytes().to_vec())
        }

        fn broadcast_kinds(&self) -> Vec<MessageKind> {
            self.broadcasts
                .lock()
                .unwrap()
                .iter()
                .map(|envelope| envelope.kind().unwrap())
                .collect()
        }
    }

    #[test]
    fn commits_sequence_with_quorum_of_seals_test() {
        let mut fixture = fixture(0, 9);
        fixture.core.enter().unwrap();

        let view = View::new(Sequence::new(10), Round::new(0));
        assert_eq!(fixture.core.tracker.view(), view);
        assert_eq!(fixture.core.tracker.phase(), Phase::AcceptRequest);

        let proposer = select_proposer(view, fixture.core.tracker.validator_set()).unwrap();
        let proposer_index = fixture
            .signers
            .iter()
            .position(|signer| signer.address() == proposer)
            .unwrap();
        assert_ne!(proposer_index, 0);
        assert_eq!(fixture.signer_of(proposer).address(), proposer);
        let others: Vec<usize> = (1..4).filter(|i| *i != proposer_index).collect();

        // Proposal -> Preprepared, and this validator's Prepare is broadcast.
        let block = Block::new(Sequence::new(10), CryptoHash::zero(), Data::new(vec![7]));
        fixture
            .deliver(proposer_index, ConsensusMessage::proposal(view, block.clone()), None)
            .unwrap();
        assert_eq!(fixture.core.tracker.phase(), Phase::Preprepared);
        assert_eq!(fixture.broadcast_kinds(), vec![MessageKind::Prepare]);

        // Own Prepare + 2 more = Q -> Prepared, and this validator's Commit is broadcast with a seal.
        fixture
            .deliver(proposer_index, ConsensusMessage::prepare(view, block.hash), None)
            .unwrap();
        assert_eq!(fixture.core.tracker.phase(), Phase::Preprepared);
        fixture
            .deliver(others[0], ConsensusMessage::prepare(view, block.hash), None)
            .unwrap();
        assert_eq!(fixture.core.tracker.phase(), Phase::Prepared);
        assert_eq!(
            fixture.broadcast_kinds(),
            vec![MessageKind::Prepare, MessageKind::Commit]
        );
        let own_commit = fixture.broadcasts.lock().unwrap()[1].clone();
        assert_eq!(own_commit.committed_seal, fixture.seal_of(0, &block.hash));

        // Own Commit + 2 more = Q -> Committed.
        let seal = fixture.seal_of(others[1], &block.hash);
        fixture
            .deliver(others[1], ConsensusMessage::commit(view, block.hash), Some(seal))
            .unwrap();
        assert!(fixture.committed.lock().unwrap().is_empty());
        let seal = fixture.seal_of(proposer_index, &block.hash);
        fixture
            .deliver(proposer_index, ConsensusMessage::commit(view, block.hash), Some(seal))
            .unwrap();

        let committed = fixture.committed.lock().unwrap().clone();
        assert_eq!(committed.len(), 1);
        let (sequence, committed_block, seals) = &committed[0];
        assert_eq!(*sequence, Sequence::new(10));
        assert_eq!(committed_block, &block);
        assert_eq!(
            seals,
            &vec![
                fixture.seal_of(0, &block.hash),
                fixture.seal_of(others[1], &block.hash),
                fixture.seal_of(proposer_index, &block.hash),
            ]
        );

        // The next sequence has started.
        assert_eq!(fixture.core.tracker.view(), View::start_of(Sequence::new(11)));
        assert_eq!(fixture.core.tracker.phase(), Phase::AcceptRequest);

        // A late Commit for sequence 10 is stale, and does not commit it again.
        let seal = fixture.seal_of(others[0], &block.hash);
        assert!(matches!(
            fixture.deliver(others[0], ConsensusMessage::commit(view, block.hash), Some(seal)),
            Err(CoreError::StaleView { .. })
        ));
        assert_eq!(fixture.committed.lock().unwrap().len(), 1);
    }

    #[test]
    fn proposer_proposes_and_prepares_own_block_test() {
        // At sequence 4, round 0, the proposer is the validator at position 0.
        let mut fixture = fixture(0, 3);
        fixture.core.enter().unwrap();

        assert_eq!(
            fixture.broadcast_kinds(),
            vec![MessageKind::Proposal, MessageKind::Prepare]
        );
        assert_eq!(fixture.core.tracker.phase(), Phase::Preprepared);
        assert_eq!(fixture.core.tracker.state().prepares().len(), 1);
    }

    #[test]
    fn rejects_bad_proposals_and_seals_test() {
        let mut fixture = fixture(0, 9);
        fixture.core.enter().unwrap();
        let view = fixture.core.tracker.view();
        let proposer = select_proposer(view, fixture.core.tracker.validator_set()).unwrap();
        let proposer_index = fixture
            .signers
            .iter()
            .position(|signer| signer.address() == proposer)
            .unwrap();
        let impostor = (1..4).find(|i| *i != proposer_index).unwrap();
        let block = Block::new(Sequence::new(10), CryptoHash::zero(), Data::new(vec![7]));

        assert!(matches!(
            fixture.deliver(impostor, ConsensusMessage::proposal(view, block.clone()), None),
            Err(CoreError::NotProposer { .. })
        ));

        let mut malformed = block.clone();
        malformed.data = Data::new(vec![8]);
        assert!(matches!(
            fixture.deliver(proposer_index, ConsensusMessage::proposal(view, malformed), None),
            Err(CoreError::MalformedBlock { .. })
        ));
        assert_eq!(fixture.core.tracker.phase(), Phase::AcceptRequest);

        // A seal made by someone other than the Commit's sender.
        let stolen = fixture.seal_of(proposer_index, &block.hash);
        assert!(matches!(
            fixture.deliver(impostor, ConsensusMessage::commit(view, block.hash), Some(stolen)),
            Err(CoreError::InvalidCommittedSeal { .. })
        ));
        assert!(matches!(
            fixture.deliver(impostor, ConsensusMessage::commit(view, block.hash), None),
            Err(CoreError::Tracker(TrackerError::EmptyCommittedSeal { .. }))
        ));
        assert!(fixture.core.tracker.state().commits().is_empty());
    }

    #[test]
    fn timeouts_request_increasing_rounds_test() {
        let mut fixture = fixture(0, 9);
        fixture.core.enter().unwrap();
        let view = fixture.core.tracker.view();

        // A timeout for another view is ignored.
        fixture
            .core
            .on_event(InboundEvent::Timeout(view.with_round(Round::new(3))))
            .unwrap();
        assert!(fixture.broadcast_kinds().is_empty());

        fixture.core.on_event(InboundEvent::Timeout(view)).unwrap();
        fixture.core.on_event(InboundEvent::Timeout(view)).unwrap();

        let requested: Vec<View> = fixture
            .broadcasts
            .lock()
            .unwrap()
            .iter()
            .map(|envelope| envelope.view().unwrap())
            .collect();
        assert_eq!(
            requested,
            vec![view.with_round(Round::new(1)), view.with_round(Round::new(2))]
        );
        assert_eq!(fixture.core.tracker.view(), view);

        // One more validator asking for round 2 makes f + 1.
        fixture
            .deliver(
                1,
                ConsensusMessage::round_change(view.with_round(Round::new(2)), CryptoHash::zero()),
                None,
            )
            .unwrap();
        assert_eq!(fixture.core.tracker.view(), view.with_round(Round::new(2)));

        // Round 2 of sequence 10 is this validator's to propose in.
        assert_eq!(fixture.core.tracker.phase(), Phase::Preprepared);
        assert_eq!(
            fixture.broadcast_kinds()[2..],
            [MessageKind::Proposal, MessageKind::Prepare]
        );
    }

    #[test]
    fn future_messages_are_replayed_test() {
        let mut fixture = fixture(0, 9);
        fixture.core.enter().unwrap();
        let future = View::start_of(Sequence::new(11));

        fixture
            .deliver(1, ConsensusMessage::prepare(future, CryptoHash::zero()), None)
            .unwrap();
        assert!(fixture.core.tracker.state().prepares().is_empty());

        // Move to sequence 11 directly.
        fixture.core.start_sequence(Sequence::new(11)).unwrap();
        fixture.core.process_local_messages().unwrap();
        assert_eq!(fixture.core.tracker.view(), future);
        assert!(fixture
            .core
            .tracker
            .state()
            .prepares()
            .contains(&fixture.signers[1].address()));
    }

    #[test]
    fn receive_proposal_event_is_published_for_proposer_only_test() {
        let mut fixture = fixture(0, 9);
        let (inbound, _inbound_receiver) = std::sync::mpsc::channel();
        let (event_publisher, events) = std::sync::mpsc::channel();
        fixture.core.attach(inbound, Some(event_publisher));
        fixture.core.enter().unwrap();
        let view = fixture.core.tracker.view();
        let proposer = select_proposer(view, fixture.core.tracker.validator_set()).unwrap();
        let proposer_index = fixture
            .signers
            .iter()
            .position(|signer| signer.address() == proposer)
            .unwrap();
        let impostor = (1..4).find(|i| *i != proposer_index).unwrap();
        let block = Block::new(Sequence::new(10), CryptoHash::zero(), Data::new(vec![7]));
        let received_proposals = |events: &std::sync::mpsc::Receiver<Event>| {
            events
                .try_iter()
                .filter_map(|event| match event {
                    Event::ReceiveProposal(event) => Some(event.origin),
                    _ => None,
                })
                .collect::<Vec<Address>>()
        };

        assert!(matches!(
            fixture.deliver(impostor, ConsensusMessage::proposal(view, block.clone()), None),
            Err(CoreError::NotProposer { .. })
        ));
        assert!(received_proposals(&events).is_empty());

        fixture
            .deliver(proposer_index, ConsensusMessage::proposal(view, block), None)
            .unwrap();
        assert_eq!(received_proposals(&events), vec![proposer]);
        fixture.core.suspend();
    }

    #[test]
    fn committing_the_last_sequence_is_fatal_test() {
        // A lone validator is its own quorum, so entering the first round commits it.
        let mut fixture = fixture_of(1, 0, u64::MAX - 1);
        let view = View::start_of(Sequence::new(u64::MAX));
        assert_eq!(fixture.core.tracker.view(), view);

        let err = fixture.core.enter().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            CoreError::Tracker(TrackerError::InvalidTransition { view: halted_in, .. }) if halted_in == view
        ));
        let committed = fixture.committed.lock().unwrap().clone();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].0, Sequence::new(u64::MAX));

        // The same holds for any attempt to go back to an earlier sequence.
        assert!(fixture
            .core
            .start_sequence(Sequence::new(3))
            .unwrap_err()
            .is_fatal());
    }
}
