/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The authenticated, self-describing unit of consensus communication.
//!
//! ## Wire format
//!
//! An [`Envelope`] is encoded with Borsh as the following fixed-order sequence of fields:
//!
//! ```text
//! digest: [u8; 32] | kind: u64 | payload: Vec<u8> | sender: [u8; 20] | signature: Vec<u8> | committed_seal: Vec<u8>
//! ```
//!
//! Decoding fails on truncated input and on trailing bytes. There is no best-effort decoding.
//!
//! ## Signing domain
//!
//! An envelope's `signature` is computed over [`signing_payload`](Envelope::signing_payload): the same
//! encoding with `signature` and `committed_seal` written as empty byte sequences. The committed seal is
//! attached to Commit messages independently of the message signature, and the message signature must
//! never depend on it. Both encodings are produced by the single routine `write_fields` so that their
//! field order cannot drift apart.

use std::{
    fmt::{self, Display, Formatter},
    io::{self, Write},
};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

use crate::types::{
    basic::*,
    crypto_primitives::{CryptoHasher, Signer, Verifier},
};

use super::{
    payloads::{ConsensusMessage, Proposal, Subject},
    to_bytes,
};

/// The closed set of consensus message kinds, and their codes on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Also known as "preprepare".
    Proposal,
    Prepare,
    Commit,
    RoundChange,
}

impl MessageKind {
    pub const fn code(&self) -> u64 {
        match self {
            MessageKind::Proposal => 0,
            MessageKind::Prepare => 1,
            MessageKind::Commit => 2,
            MessageKind::RoundChange => 3,
        }
    }

    pub const fn from_code(code: u64) -> Option<MessageKind> {
        match code {
            0 => Some(MessageKind::Proposal),
            1 => Some(MessageKind::Prepare),
            2 => Some(MessageKind::Commit),
            3 => Some(MessageKind::RoundChange),
            _ => None,
        }
    }
}

/// A signed consensus message as it travels between validators.
///
/// `code` holds the raw kind code exactly as it was received, so that an envelope with an unknown kind
/// still round-trips. Use [`kind`](Envelope::kind) to interpret it.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize)]
pub struct Envelope {
    pub digest: CryptoHash,
    pub code: u64,
    pub payload: Vec<u8>,
    pub sender: Address,
    pub signature: SignatureBytes,
    pub committed_seal: CommittedSeal,
}

/// Selects which fields [`Envelope::write_fields`] writes verbatim.
#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldMode {
    /// Every field as it is.
    Full,
    /// `signature` and `committed_seal` written as empty.
    ForSigning,
}

impl Envelope {
    /// Create an unsigned envelope of `kind` carrying `payload` from `sender`. The digest is the SHA-256
    /// hash of `payload`.
    pub fn new(kind: MessageKind, payload: Vec<u8>, sender: Address) -> Envelope {
        Envelope {
            digest: CryptoHash::new(CryptoHasher::digest(&payload).into()),
            code: kind.code(),
            payload,
            sender,
            signature: SignatureBytes::empty(),
            committed_seal: CommittedSeal::empty(),
        }
    }

    /// Create an unsigned envelope carrying `message` from `sender`.
    pub fn wrap(message: &ConsensusMessage, sender: Address) -> Envelope {
        Envelope::new(message.kind(), message.payload_bytes(), sender)
    }

    /// Sign the envelope's [`signing_payload`](Self::signing_payload) with `signer`.
    pub fn sign(mut self, signer: &dyn Signer) -> Envelope {
        self.signature = signer.sign(&self.signing_payload());
        self
    }

    /// Attach a committed seal. Attaching a seal does not invalidate the envelope's signature.
    pub fn with_committed_seal(mut self, committed_seal: CommittedSeal) -> Envelope {
        self.committed_seal = committed_seal;
        self
    }

    /// Interpret the envelope's kind code.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::InvalidMessage`] if the code is outside the closed set of [`MessageKind`]s.
    pub fn kind(&self) -> Result<MessageKind, EnvelopeError> {
        MessageKind::from_code(self.code).ok_or(EnvelopeError::InvalidMessage { code: self.code })
    }

    /// Serialize every field of the envelope in wire order.
    pub fn encode(&self) -> Vec<u8> {
        to_bytes(self)
    }

    /// Deserialize an envelope from `bytes`, which must contain exactly one encoded envelope.
    pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
        Ok(Envelope::try_from_slice(bytes)?)
    }

    /// Get the bytes that `signature` signs: the envelope encoded with `signature` and `committed_seal`
    /// cleared.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Safety: writing into a `Vec<u8>` cannot fail.
        self.write_fields(&mut bytes, FieldMode::ForSigning).unwrap();
        bytes
    }

    /// Decode an envelope received from the network, authenticate it if a `verifier` is given, and check
    /// that its digest is the hash of its payload.
    ///
    /// Passing `None` as the verifier skips authentication. Only do so for envelopes that come from a
    /// trusted, local source; never for network input.
    pub fn from_wire(
        bytes: &[u8],
        verifier: Option<&dyn Verifier>,
    ) -> Result<Envelope, EnvelopeError> {
        let envelope = Envelope::decode(bytes)?;
        if let Some(verifier) = verifier {
            envelope.authenticate(verifier)?;
        }
        if envelope.digest != CryptoHash::new(CryptoHasher::digest(&envelope.payload).into()) {
            return Err(EnvelopeError::DigestMismatch {
                sender: envelope.sender,
            });
        }
        Ok(envelope)
    }

    /// Check that `signature` was produced by `sender` over the envelope's signing payload.
    pub fn authenticate(&self, verifier: &dyn Verifier) -> Result<(), EnvelopeError> {
        match verifier.verify(&self.signing_payload(), self.signature.bytes()) {
            Ok(recovered) if recovered == self.sender => Ok(()),
            Ok(recovered) => Err(EnvelopeError::InvalidSigner {
                claimed: self.sender,
                recovered: Some(recovered),
            }),
            Err(err) => {
                log::debug!("failed to recover signer of envelope from {}: {:?}", self.sender, err);
                Err(EnvelopeError::InvalidSigner {
                    claimed: self.sender,
                    recovered: None,
                })
            }
        }
    }

    /// Decode the payload into a caller-chosen shape. The caller must choose the shape that matches
    /// [`kind`](Self::kind); prefer [`message`](Self::message), which chooses it.
    pub fn decode_inner<T: BorshDeserialize>(&self) -> Result<T, DecodeError> {
        Ok(T::try_from_slice(&self.payload)?)
    }

    /// Decode the payload according to the envelope's kind.
    pub fn message(&self) -> Result<ConsensusMessage, EnvelopeError> {
        let message = match self.kind()? {
            MessageKind::Proposal => ConsensusMessage::Proposal(self.decode_inner::<Proposal>()?),
            MessageKind::Prepare => ConsensusMessage::Prepare(self.decode_inner::<Subject>()?),
            MessageKind::Commit => ConsensusMessage::Commit(self.decode_inner::<Subject>()?),
            MessageKind::RoundChange => {
                ConsensusMessage::RoundChange(self.decode_inner::<Subject>()?)
            }
        };
        Ok(message)
    }

    /// Get the view that the envelope belongs to.
    pub fn view(&self) -> Result<View, EnvelopeError> {
        match self.kind()? {
            MessageKind::Proposal => Ok(self.decode_inner::<Proposal>()?.view),
            MessageKind::Prepare | MessageKind::Commit | MessageKind::RoundChange => {
                Ok(self.decode_inner::<Subject>()?.view)
            }
        }
    }

    /// Approximate number of bytes the envelope occupies in memory.
    pub fn size(&self) -> u64 {
        (32 + 8 + 20 + self.payload.len() + self.signature.len() + self.committed_seal.len()) as u64
    }

    fn write_fields<W: Write>(&self, writer: &mut W, mode: FieldMode) -> io::Result<()> {
        self.digest.serialize(writer)?;
        self.code.serialize(writer)?;
        self.payload.serialize(writer)?;
        self.sender.serialize(writer)?;
        match mode {
            FieldMode::Full => {
                self.signature.serialize(writer)?;
                self.committed_seal.serialize(writer)?;
            }
            FieldMode::ForSigning => {
                SignatureBytes::empty().serialize(writer)?;
                CommittedSeal::empty().serialize(writer)?;
            }
        }
        Ok(())
    }
}

/// A short form for logs: the raw kind code and the claimed sender.
impl Display for Envelope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{Code: {}, Address: {}}}", self.code, self.sender)
    }
}

impl BorshSerialize for Envelope {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.write_fields(writer, FieldMode::Full)
    }
}

/// Bytes could not be decoded into the requested structure: they were truncated, malformed, or had
/// trailing bytes.
#[derive(Debug)]
pub struct DecodeError(io::Error);

impl From<io::Error> for DecodeError {
    fn from(value: io::Error) -> Self {
        DecodeError(value)
    }
}

/// Enumerates the ways an envelope can fail to be decoded, authenticated, or interpreted.
#[derive(Debug)]
pub enum EnvelopeError {
    /// See: [`DecodeError`].
    Decode(DecodeError),

    /// The signature was not produced by the claimed `sender`. `recovered` is the address that did
    /// produce it, if one could be recovered at all.
    InvalidSigner {
        claimed: Address,
        recovered: Option<Address>,
    },

    /// The envelope's kind code is not one of the [`MessageKind`]s.
    InvalidMessage { code: u64 },

    /// The envelope's digest is not the hash of its payload.
    DigestMismatch { sender: Address },
}

impl From<DecodeError> for EnvelopeError {
    fn from(value: DecodeError) -> Self {
        EnvelopeError::Decode(value)
    }
}

impl From<io::Error> for EnvelopeError {
    fn from(value: io::Error) -> Self {
        EnvelopeError::Decode(DecodeError(value))
    }
}

#[cfg(test)]
fn signed_prepare(signer: &dyn Signer) -> Envelope {
    let view = View::new(Sequence::new(10), Round::new(2));
    let message = ConsensusMessage::prepare(view, CryptoHash::new([7u8; 32]));
    Envelope::wrap(&message, signer.address()).sign(signer)
}

#[test]
fn encode_decode_round_trip_test() {
    use crate::types::{
        block::Block,
        crypto_primitives::{Ed25519Signer, SigningKey},
    };
    use rand_core::OsRng;

    let signer = Ed25519Signer::new(SigningKey::generate(&mut OsRng));
    let block = Block::new(Sequence::new(1), CryptoHash::zero(), Data::new(vec![9; 100]));
    let proposal = ConsensusMessage::proposal(View::start_of(Sequence::new(1)), block);

    let envelopes = [
        Envelope::wrap(&proposal, signer.address()).sign(&signer),
        signed_prepare(&signer).with_committed_seal(CommittedSeal::new(vec![1, 2, 3])),
        Envelope::new(MessageKind::Commit, Vec::new(), Address::new([0; 20])),
    ];

    for envelope in envelopes {
        let bytes = envelope.encode();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.encode(), bytes);
    }
}

#[test]
fn decode_rejects_truncated_and_trailing_bytes_test() {
    let envelope = Envelope::new(MessageKind::Prepare, vec![1, 2, 3, 4], Address::new([5; 20]));
    let bytes = envelope.encode();

    for len in [0, 1, 31, 40, bytes.len() - 1] {
        assert!(Envelope::decode(&bytes[..len]).is_err(), "decoded {len} bytes");
    }

    let mut extended = bytes.clone();
    extended.push(0);
    assert!(Envelope::decode(&extended).is_err());
}

#[test]
fn signing_payload_ignores_committed_seal_test() {
    use crate::types::crypto_primitives::{Ed25519Signer, SigningKey};
    use rand_core::OsRng;

    let signer = Ed25519Signer::new(SigningKey::generate(&mut OsRng));
    let envelope = signed_prepare(&signer);
    let sealed = envelope
        .clone()
        .with_committed_seal(CommittedSeal::new(vec![42; 96]));

    assert_ne!(envelope.encode(), sealed.encode());
    assert_eq!(envelope.signing_payload(), sealed.signing_payload());

    // Computing the signing payload does not touch the envelope.
    let before = sealed.clone();
    let _ = sealed.signing_payload();
    assert_eq!(before, sealed);
}

#[test]
fn from_wire_authenticates_sender_test() {
    use crate::types::crypto_primitives::{Ed25519Signer, Ed25519Verifier, SigningKey};
    use rand_core::OsRng;

    let signer = Ed25519Signer::new(SigningKey::generate(&mut OsRng));
    let impostor = Ed25519Signer::new(SigningKey::generate(&mut OsRng));

    // Correctly signed, with a seal attached after signing.
    let envelope = signed_prepare(&signer).with_committed_seal(CommittedSeal::new(vec![1; 96]));
    let received = Envelope::from_wire(&envelope.encode(), Some(&Ed25519Verifier)).unwrap();
    assert_eq!(received, envelope);

    // Signed by someone other than the claimed sender.
    let mut forged = Envelope::wrap(
        &ConsensusMessage::commit(View::start_of(Sequence::new(3)), CryptoHash::zero()),
        signer.address(),
    );
    forged.signature = impostor.sign(&forged.signing_payload());
    match Envelope::from_wire(&forged.encode(), Some(&Ed25519Verifier)) {
        Err(EnvelopeError::InvalidSigner { claimed, recovered }) => {
            assert_eq!(claimed, signer.address());
            assert_eq!(recovered, Some(impostor.address()));
        }
        other => panic!("expected InvalidSigner, got {other:?}"),
    }

    // Payload tampered with after signing.
    let mut tampered = signed_prepare(&signer);
    tampered.payload[0] ^= 1;
    assert!(matches!(
        Envelope::from_wire(&tampered.encode(), Some(&Ed25519Verifier)),
        Err(EnvelopeError::InvalidSigner { recovered: None, .. })
    ));

    // Without a verifier, the forged envelope is accepted as is.
    assert!(Envelope::from_wire(&forged.encode(), None).is_ok());

    // Correctly signed over a digest that does not match the payload.
    let mut mismatched = Envelope::wrap(
        &ConsensusMessage::prepare(View::start_of(Sequence::new(3)), CryptoHash::zero()),
        signer.address(),
    );
    mismatched.digest = CryptoHash::new([1; 32]);
    let mismatched = mismatched.sign(&signer);
    assert!(matches!(
        Envelope::from_wire(&mismatched.encode(), Some(&Ed25519Verifier)),
        Err(EnvelopeError::DigestMismatch { .. })
    ));
}

#[test]
fn view_dispatches_on_kind_test() {
    let view = View::new(Sequence::new(10), Round::new(0));
    let round_change = Envelope::wrap(
        &ConsensusMessage::round_change(view, CryptoHash::zero()),
        Address::new([1; 20]),
    );
    assert_eq!(round_change.view().unwrap(), view);
    assert_eq!(
        round_change.message().unwrap(),
        ConsensusMessage::round_change(view, CryptoHash::zero())
    );

    let mut unknown = round_change.clone();
    unknown.code = 99;
    assert!(matches!(
        unknown.view(),
        Err(EnvelopeError::InvalidMessage { code: 99 })
    ));

    // A Subject payload does not decode as a Proposal.
    let mut mislabeled = round_change;
    mislabeled.code = MessageKind::Proposal.code();
    assert!(matches!(mislabeled.view(), Err(EnvelopeError::Decode(_))));
}

#[test]
fn display_shows_code_and_sender_test() {
    let sender = Address::new([5; 20]);
    let envelope = Envelope::new(MessageKind::Commit, vec![1, 2, 3], sender);
    assert_eq!(envelope.to_string(), format!("{{Code: 2, Address: {}}}", sender));

    let mut unknown = envelope;
    unknown.code = 42;
    assert!(unknown.to_string().starts_with("{Code: 42, Address: "));
}
