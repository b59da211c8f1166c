//! Types and traits that are used across multiple components of istanbul-rs.
//!
//! Other types and traits, specific to single components, can be found in the "types" submodules of
//! their components, e.g., [`crate::pbft::types`].

pub mod basic;

pub mod block;

pub mod crypto_primitives;

pub mod validator_set;
