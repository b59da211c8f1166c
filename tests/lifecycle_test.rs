use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use istanbul_rs::{
    engine::EngineError,
    types::{
        basic::Sequence,
        crypto_primitives::{address_of, SigningKey},
        validator_set::ValidatorSet,
    },
};
use log::LevelFilter;
use rand_core::OsRng;

mod common;

use crate::common::{logging::setup_logger, network::mock_network, node::Node};

fn wait_for_height(node: &Node, height: u64) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while node.height() < height {
        assert!(Instant::now() < deadline, "validator did not reach height {} in time", height);
        thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn stop_and_restart_resume_from_retained_state_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Create a single validator, which is a quorum by itself, limited to proposing 2 blocks.
    let signing_key = SigningKey::generate(&mut OsRng {});
    let address = address_of(&signing_key.verifying_key());
    let validator_set: ValidatorSet = [address].into_iter().collect();
    let network = mock_network([address].into_iter()).remove(0);
    let height_limit = Arc::new(AtomicU64::new(2));
    let mut node = Node::new(signing_key, network, validator_set, height_limit.clone());

    // 2. Start it. Starting it a second time fails.
    node.start().unwrap();
    assert!(node.is_running());
    assert!(matches!(node.start(), Err(EngineError::AlreadyStarted)));
    wait_for_height(&node, 2);

    // 3. Stop it. Stopping is idempotent, and a stopped validator commits nothing.
    node.stop().unwrap();
    node.stop().unwrap();
    assert!(!node.is_running());
    height_limit.store(4, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(500));
    assert_eq!(node.height(), 2);

    // 4. Restart it. It carries on from sequence 3.
    node.start().unwrap();
    wait_for_height(&node, 4);
    node.stop().unwrap();

    let committed = node.committed_blocks();
    assert_eq!(committed.len(), 4);
    for (i, committed_block) in committed.iter().enumerate() {
        assert_eq!(committed_block.sequence.int(), i as u64 + 1);
        assert_eq!(committed_block.committed_seals.len(), 1);
    }
    for pair in committed.windows(2) {
        assert_eq!(pair[1].block.parent, pair[0].block.hash);
    }
}

#[test]
fn halted_validator_cannot_be_restarted_test() {
    setup_logger(LevelFilter::Debug);

    // 1. Create a single validator whose chain ends one sequence short of the last one there is.
    let signing_key = SigningKey::generate(&mut OsRng {});
    let address = address_of(&signing_key.verifying_key());
    let validator_set: ValidatorSet = [address].into_iter().collect();
    let network = mock_network([address].into_iter()).remove(0);
    let height_limit = Arc::new(AtomicU64::new(u64::MAX));
    let mut node = Node::starting_after(
        signing_key,
        network,
        validator_set,
        height_limit,
        Sequence::new(u64::MAX - 1),
    );

    // 2. It commits the last sequence, after which there is no sequence to move to, and halts.
    node.start().unwrap();
    wait_for_height(&node, 1);
    assert_eq!(node.committed_blocks()[0].sequence, Sequence::new(u64::MAX));

    // 3. Stopping reports the halt, and the validator stays down.
    assert!(matches!(node.stop(), Err(EngineError::Halted(err)) if err.is_fatal()));
    assert!(!node.is_running());
    assert!(matches!(node.start(), Err(EngineError::Crashed)));
    assert!(!node.is_running());
    node.stop().unwrap();
    assert_eq!(node.height(), 1);
}
