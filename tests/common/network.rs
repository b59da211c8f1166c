use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use istanbul_rs::{networking::network::Network, types::basic::Address};

/// A mock network stub which passes messages from and to threads using channels.
///
/// Broadcasts reach every peer except the sender.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_address: Address,
    all_peers: HashMap<Address, Sender<(Address, Vec<u8>)>>,
    inbox: Arc<Mutex<Receiver<(Address, Vec<u8>)>>>,
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: Vec<u8>) {
        for (peer, inbox) in &self.all_peers {
            if *peer != self.my_address {
                let _ = inbox.send((self.my_address, message.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(Address, Vec<u8>)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = Address>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(Address, Receiver<(Address, Vec<u8>)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_address, inbox)| NetworkStub {
            my_address,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
