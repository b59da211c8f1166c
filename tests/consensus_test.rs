use std::{
    sync::{atomic::AtomicU64, Arc},
    thread,
    time::{Duration, Instant},
};

use istanbul_rs::types::{
    crypto_primitives::{
        address_of, committed_seal_bytes, Ed25519Verifier, SigningKey, Verifier,
    },
    validator_set::ValidatorSet,
};
use log::LevelFilter;
use rand_core::OsRng;

mod common;

use crate::common::{logging::setup_logger, network::mock_network, node::Node};

#[test]
fn four_validators_commit_the_same_chain_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Initialize test components.

    // 1.1. Create signing keys for 4 validators.
    let mut csprg = OsRng {};
    let signing_keys: Vec<SigningKey> = (0..4).map(|_| SigningKey::generate(&mut csprg)).collect();
    let verifier = Ed25519Verifier;
    let addresses: Vec<_> = signing_keys
        .iter()
        .map(|signing_key| address_of(&signing_key.verifying_key()))
        .collect();
    let validator_set: ValidatorSet = addresses.iter().copied().collect();

    // 1.2. Create a mock network connecting the 4 validators.
    let network_stubs = mock_network(addresses.iter().copied());

    // 1.3. Create the nodes. Blocks are proposed without limit.
    let height_limit = Arc::new(AtomicU64::new(u64::MAX));
    let mut nodes: Vec<Node> = signing_keys
        .into_iter()
        .zip(network_stubs)
        .map(|(signing_key, network)| {
            Node::new(signing_key, network, validator_set.clone(), height_limit.clone())
        })
        .collect();

    // 2. Simultaneously start all validators.
    nodes.iter_mut().for_each(|node| node.start().unwrap());

    // 3. Poll the chain of every validator until each has committed 3 blocks.
    log::debug!("Polling the chain of every validator until each has committed 3 blocks.");
    let deadline = Instant::now() + Duration::from_secs(60);
    while nodes.iter().any(|node| node.height() < 3) {
        assert!(Instant::now() < deadline, "validators did not commit 3 blocks in time");
        thread::sleep(Duration::from_millis(100));
    }
    nodes.iter_mut().for_each(|node| node.stop().unwrap());

    // 4. Check that every validator committed the same blocks, once per sequence, each with a quorum of
    //    seals from distinct validators.
    let reference = nodes[0].committed_blocks();
    for node in &nodes {
        let committed = node.committed_blocks();
        for (i, committed_block) in committed.iter().take(3).enumerate() {
            assert_eq!(committed_block.sequence.int(), i as u64 + 1);
            assert_eq!(committed_block.block, reference[i].block);
            assert_eq!(committed_block.committed_seals.len(), validator_set.quorum());

            let mut sealers: Vec<_> = committed_block
                .committed_seals
                .iter()
                .map(|seal| {
                    verifier
                        .verify(&committed_seal_bytes(&committed_block.block.hash), seal.bytes())
                        .unwrap()
                })
                .collect();
            assert!(sealers.iter().all(|sealer| validator_set.contains(sealer)));
            sealers.sort();
            sealers.dedup();
            assert_eq!(sealers.len(), validator_set.quorum());
        }
        log::debug!("{} committed {} blocks.", node.address(), committed.len());
    }

    // 5. Check that the committed blocks form a chain.
    for pair in reference.windows(2) {
        assert_eq!(pair[1].block.parent, pair[0].block.hash);
    }
}
