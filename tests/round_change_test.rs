use std::{
    sync::{atomic::AtomicU64, Arc},
    thread,
    time::{Duration, Instant},
};

use istanbul_rs::{
    pbft::roles::select_proposer,
    types::{
        basic::{Sequence, View},
        crypto_primitives::{address_of, SigningKey},
        validator_set::ValidatorSet,
    },
};
use log::LevelFilter;
use rand_core::OsRng;

mod common;

use crate::common::{logging::setup_logger, network::mock_network, node::Node};

#[test]
fn absent_proposer_is_replaced_by_round_change_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Initialize test components.

    // 1.1. Create signing keys for 4 validators, and a mock network connecting them.
    let mut csprg = OsRng {};
    let signing_keys: Vec<SigningKey> = (0..4).map(|_| SigningKey::generate(&mut csprg)).collect();
    let addresses: Vec<_> = signing_keys
        .iter()
        .map(|signing_key| address_of(&signing_key.verifying_key()))
        .collect();
    let validator_set: ValidatorSet = addresses.iter().copied().collect();
    let network_stubs = mock_network(addresses.iter().copied());

    // 1.2. Create the nodes.
    let height_limit = Arc::new(AtomicU64::new(u64::MAX));
    let mut nodes: Vec<Node> = signing_keys
        .into_iter()
        .zip(network_stubs)
        .map(|(signing_key, network)| {
            Node::new(signing_key, network, validator_set.clone(), height_limit.clone())
        })
        .collect();

    // 2. Start every validator except the proposer of the first view, which stays silent.
    let absent = select_proposer(View::start_of(Sequence::new(1)), &validator_set).unwrap();
    log::debug!("Starting every validator except {}.", absent);
    nodes
        .iter_mut()
        .filter(|node| node.address() != absent)
        .for_each(|node| node.start().unwrap());

    // 3. The remaining 3 validators are a quorum. Poll their chains until each has committed 2 blocks,
    //    which requires moving past round 0 of sequence 1.
    log::debug!("Polling the chain of every running validator until each has committed 2 blocks.");
    let deadline = Instant::now() + Duration::from_secs(60);
    while nodes
        .iter()
        .filter(|node| node.is_running())
        .any(|node| node.height() < 2)
    {
        assert!(Instant::now() < deadline, "validators did not change round in time");
        thread::sleep(Duration::from_millis(100));
    }
    nodes.iter_mut().for_each(|node| node.stop().unwrap());

    // 4. The absent validator committed nothing, and the others agree.
    let running: Vec<&Node> = nodes.iter().filter(|node| node.address() != absent).collect();
    let reference = running[0].committed_blocks();
    for node in &running {
        let committed = node.committed_blocks();
        assert_eq!(committed[0].block, reference[0].block);
        assert_eq!(committed[1].block, reference[1].block);
        assert_eq!(committed[0].committed_seals.len(), validator_set.quorum());
    }
    let absent_node = nodes.iter().find(|node| node.address() == absent).unwrap();
    assert_eq!(absent_node.height(), 0);
}
