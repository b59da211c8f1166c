/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! Consensus never implements signature math itself. It signs and authenticates through two injected
//! capabilities:
//! 1. [`Signer`]: signs this validator's outgoing messages and committed seals.
//! 2. [`Verifier`]: recovers the [`Address`] that produced a signature over some bytes.
//!
//! This module also provides Ed25519 implementations of both capabilities ([`Ed25519Signer`] and
//! [`Ed25519Verifier`]), backed by the [`ed25519_dalek`] crate, and re-exports the [`sha2`] hasher used
//! for digests.
//!
//! ## Ed25519 signature layout
//!
//! Ed25519 does not support public key recovery, so signatures produced by [`Ed25519Signer`] carry the
//! signer's verifying key in front of the signature proper:
//!
//! ```text
//! verifying_key (32 bytes) || signature (64 bytes)
//! ```
//!
//! The address of a verifying key is the first 20 bytes of its SHA-256 hash.

use ed25519_dalek::{Signer as _, Verifier as _};

use crate::messages::envelope::MessageKind;

use super::basic::{Address, CryptoHash, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, SigningKey, VerifyingKey};

/// Capability to sign bytes on behalf of a single validator.
pub trait Signer: Send + 'static {
    /// The address that [`Verifier::verify`] recovers from signatures produced by this signer.
    fn address(&self) -> Address;

    /// Sign an arbitrary `message`.
    fn sign(&self, message: &[u8]) -> SignatureBytes;
}

/// Capability to recover the signer of a signature.
///
/// Implementations must be stateless and side-effect-free: the engine calls `verify` concurrently from
/// several verification workers.
pub trait Verifier: Send + Sync + 'static {
    /// Return the address that produced `signature` over `signed_bytes`.
    fn verify(&self, signed_bytes: &[u8], signature: &[u8]) -> Result<Address, VerifyError>;
}

/// Enumerates the ways a [`Verifier`] can fail to recover a signer.
#[derive(Debug)]
pub enum VerifyError {
    /// The signature does not have the length that the verifier expects.
    MalformedSignature { len: usize },

    /// The embedded public key is not a valid key.
    InvalidPublicKey(SignatureError),

    /// The signature does not verify against the signed bytes.
    InvalidSignature(SignatureError),
}

/// Compute the address of an Ed25519 verifying key.
pub fn address_of(verifying_key: &VerifyingKey) -> Address {
    let digest = CryptoHasher::digest(verifying_key.to_bytes());
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[..20]);
    Address::new(address)
}

/// The bytes that a committed seal over the block identified by `digest` signs.
///
/// The trailing Commit code separates seals from every other signature a validator produces.
pub fn committed_seal_bytes(digest: &CryptoHash) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(33);
    bytes.extend_from_slice(&digest.bytes());
    bytes.push(MessageKind::Commit.code() as u8);
    bytes
}

/// A facade around [`SigningKey`] that implements [`Signer`].
#[derive(Clone)]
pub struct Ed25519Signer(SigningKey);

impl Ed25519Signer {
    /// Create an `Ed25519Signer` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Ed25519Signer {
        Ed25519Signer(signing_key)
    }

    /// Get the `VerifyingKey` of this signer.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }
}

impl Signer for Ed25519Signer {
    fn address(&self) -> Address {
        address_of(&self.public())
    }

    fn sign(&self, message: &[u8]) -> SignatureBytes {
        let mut bytes = Vec::with_capacity(ED25519_SIGNATURE_LEN);
        bytes.extend_from_slice(&self.public().to_bytes());
        bytes.extend_from_slice(&self.0.sign(message).to_bytes());
        SignatureBytes::new(bytes)
    }
}

/// Verifies signatures produced by [`Ed25519Signer`].
#[derive(Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl Verifier for Ed25519Verifier {
    fn verify(&self, signed_bytes: &[u8], signature: &[u8]) -> Result<Address, VerifyError> {
        if signature.len() != ED25519_SIGNATURE_LEN {
            return Err(VerifyError::MalformedSignature {
                len: signature.len(),
            });
        }

        let (key_bytes, signature_bytes) = signature.split_at(32);
        let mut key = [0u8; 32];
        key.copy_from_slice(key_bytes);
        let mut sig = [0u8; 64];
        sig.copy_from_slice(signature_bytes);

        let verifying_key =
            VerifyingKey::from_bytes(&key).map_err(VerifyError::InvalidPublicKey)?;
        verifying_key
            .verify(signed_bytes, &Signature::from_bytes(&sig))
            .map_err(VerifyError::InvalidSignature)?;

        Ok(address_of(&verifying_key))
    }
}

/// Length of a signature produced by [`Ed25519Signer`].
const ED25519_SIGNATURE_LEN: usize = 32 + 64;

#[test]
fn ed25519_verifier_recovers_signer_test() {
    use rand_core::OsRng;

    let signer = Ed25519Signer::new(SigningKey::generate(&mut OsRng));
    let other = Ed25519Signer::new(SigningKey::generate(&mut OsRng));
    let message = b"prepare".to_vec();

    let signature = signer.sign(&message);
    assert_eq!(
        Ed25519Verifier.verify(&message, signature.bytes()).unwrap(),
        signer.address()
    );
    assert_ne!(signer.address(), other.address());

    // Tampered message.
    assert!(matches!(
        Ed25519Verifier.verify(b"commit", signature.bytes()),
        Err(VerifyError::InvalidSignature(_))
    ));

    // Truncated signature.
    assert!(matches!(
        Ed25519Verifier.verify(&message, &signature.bytes()[..40]),
        Err(VerifyError::MalformedSignature { len: 40 })
    ));
}
