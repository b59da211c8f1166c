use std::{
    sync::{atomic::AtomicU64, Arc, Mutex},
    time::Duration,
};

use istanbul_rs::{
    engine::{Configuration, Engine, EngineError, EngineSpec, IstanbulEngine},
    events::{
        CommitBlockEvent, PrepareEvent, ReceiveProposalEvent, RoundChangeEvent, RoundTimeoutEvent,
    },
    types::{
        basic::{Address, BufferSize, Sequence},
        crypto_primitives::{Ed25519Signer, Ed25519Verifier, Signer, SigningKey},
        validator_set::ValidatorSet,
    },
};

use crate::common::{
    chain_backend::{ChainBackend, CommittedBlock},
    logging::{first_seven_base64_chars, log_with_context},
    network::NetworkStub,
};

/// Things the Nodes will have in common:
/// - Validator Set.
/// - Configuration.
/// - Height limit.
///
/// Things that they will differ in:
/// - Backend instance.
/// - Network instance.
/// - Signing key.
pub(crate) struct Node {
    address: Address,
    chain: Arc<Mutex<Vec<CommittedBlock>>>,
    engine: IstanbulEngine<NetworkStub, ChainBackend>,
}

impl Node {
    /// Build a node. The node does not run until it is [started](Node::start).
    pub(crate) fn new(
        signing_key: SigningKey,
        network: NetworkStub,
        validator_set: ValidatorSet,
        height_limit: Arc<AtomicU64>,
    ) -> Node {
        Node::starting_after(signing_key, network, validator_set, height_limit, Sequence::new(0))
    }

    /// Build a node whose chain already holds every sequence up to `last_committed`.
    pub(crate) fn starting_after(
        signing_key: SigningKey,
        network: NetworkStub,
        validator_set: ValidatorSet,
        height_limit: Arc<AtomicU64>,
        last_committed: Sequence,
    ) -> Node {
        let signer = Ed25519Signer::new(signing_key);
        let address = signer.address();
        let backend = ChainBackend::new(validator_set, height_limit).starting_after(last_committed);
        let chain = backend.chain();

        let configuration = Configuration::builder()
            .request_timeout(Duration::from_millis(300))
            .max_request_timeout(Duration::from_millis(2400))
            .future_msg_buffer_capacity(BufferSize::new(1 << 20))
            .verification_workers(2)
            .log_events(false)
            .build();

        let engine = EngineSpec::builder()
            .backend(backend)
            .network(network)
            .signer(signer)
            .verifier(Ed25519Verifier)
            .configuration(configuration)
            .on_receive_proposal(receive_proposal_handler(address))
            .on_prepare(prepare_handler(address))
            .on_commit_block(commit_block_handler(address))
            .on_round_timeout(round_timeout_handler(address))
            .on_round_change(round_change_handler(address))
            .build()
            .build();

        Node {
            address,
            chain,
            engine,
        }
    }

    pub(crate) fn start(&mut self) -> Result<(), EngineError> {
        self.engine.start()
    }

    pub(crate) fn stop(&mut self) -> Result<(), EngineError> {
        self.engine.stop()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub(crate) fn address(&self) -> Address {
        self.address
    }

    pub(crate) fn committed_blocks(&self) -> Vec<CommittedBlock> {
        self.chain.lock().unwrap().clone()
    }

    pub(crate) fn height(&self) -> u64 {
        self.chain.lock().unwrap().len() as u64
    }
}

fn receive_proposal_handler(
    address: Address,
) -> impl Fn(&ReceiveProposalEvent) + Send + 'static {
    move |receive_proposal_event| {
        log_with_context(
            Some(address),
            &format!(
                "Received Proposal, origin: {}, view: {}, block hash: {}",
                first_seven_base64_chars(&receive_proposal_event.origin.bytes()),
                receive_proposal_event.view,
                first_seven_base64_chars(&receive_proposal_event.block.hash.bytes()),
            ),
        );
    }
}

fn prepare_handler(address: Address) -> impl Fn(&PrepareEvent) + Send + 'static {
    move |prepare_event| {
        log_with_context(
            Some(address),
            &format!(
                "Prepared, view: {}, block hash: {}",
                prepare_event.view,
                first_seven_base64_chars(&prepare_event.block.bytes()),
            ),
        );
    }
}

fn commit_block_handler(address: Address) -> impl Fn(&CommitBlockEvent) + Send + 'static {
    move |commit_block_event| {
        log_with_context(
            Some(address),
            &format!(
                "Committed Block, sequence: {}, block hash: {}, no. of seals: {}",
                commit_block_event.sequence,
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.committed_seals,
            ),
        );
    }
}

fn round_timeout_handler(address: Address) -> impl Fn(&RoundTimeoutEvent) + Send + 'static {
    move |round_timeout_event| {
        log_with_context(
            Some(address),
            &format!("Round Timeout, view: {}", round_timeout_event.view),
        );
    }
}

fn round_change_handler(address: Address) -> impl Fn(&RoundChangeEvent) + Send + 'static {
    move |round_change_event| {
        log_with_context(
            Some(address),
            &format!("Round Change, view: {}", round_change_event.view),
        );
    }
}
