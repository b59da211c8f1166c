pub(crate) mod chain_backend;

pub(crate) mod logging;

pub(crate) mod network;

pub(crate) mod node;
