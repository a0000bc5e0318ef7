//! Type definitions and wire layout for the PQ Noise protocol

use std::fmt;

use crypto::ml_dsa::{MlDsaSignature, ML_DSA_SIGNATURE_LEN};
use crypto::ml_kem::{MlKemCiphertext, MlKemPublicKey, ML_KEM_CIPHERTEXT_LEN, ML_KEM_PUBLIC_KEY_LEN};
use crypto::traits::KemPublicKey;
use crypto::traits::Signature;
use serde::{Deserialize, Serialize};

use crate::error::HandshakeError;

/// Fixed magic prefix of both handshake messages.
pub const MAGIC: [u8; 4] = [0xF9, 0xBE, 0xB4, 0xD9];

/// Protocol version carried big-endian in every handshake message.
pub const PROTOCOL_VERSION: u16 = 1;

/// Protocol identifier string
pub const PROTOCOL_ID: &str = "/pq-noise/1.0.0";

/// Cipher suite negotiated by every handshake.
pub const SUITE: &str = "NoisePQ_MLKEM1024_MLDSA65_HKDF-SHA3-512_CHACHA20-POLY1305";

pub const KEM_CIPHERTEXT_LEN: usize = ML_KEM_CIPHERTEXT_LEN;
pub const SIGNATURE_LEN: usize = ML_DSA_SIGNATURE_LEN;

pub const HELLO_HEADER_LEN: usize = 8;
pub const HELLO_PADDING_LEN: usize = 32;
pub const HELLO_LEN: usize = HELLO_HEADER_LEN + KEM_CIPHERTEXT_LEN + HELLO_PADDING_LEN;

pub const REPLY_HEADER_LEN: usize = 7;
pub const REPLY_LEN: usize = REPLY_HEADER_LEN + SIGNATURE_LEN;

pub const STATUS_OK: u8 = 0;

/// Common `magic | version` prefix of every handshake message.
pub const HEADER_LEN: usize = 6;
pub const RANDOM_LEN: usize = 32;
pub const KEM_PUBLIC_KEY_LEN: usize = ML_KEM_PUBLIC_KEY_LEN;

// Three-message ephemeral flow.
pub const EPHEMERAL_HELLO_LEN: usize = HEADER_LEN + RANDOM_LEN;
/// Bytes of the ephemeral reply covered by the responder's signature.
pub const EPHEMERAL_REPLY_SIGNED_LEN: usize = REPLY_HEADER_LEN + RANDOM_LEN + KEM_PUBLIC_KEY_LEN;
pub const EPHEMERAL_REPLY_LEN: usize = EPHEMERAL_REPLY_SIGNED_LEN + SIGNATURE_LEN;
pub const CLIENT_KEM_LEN: usize = HEADER_LEN + KEM_CIPHERTEXT_LEN;

/// Explicit counter carried in front of every sealed transport message.
pub const NONCE_PREFIX_LEN: usize = 8;
pub const TAG_LEN: usize = crypto::aead::TAG_LEN;

/// Bytes added to a plaintext by `seal`.
pub const TRANSPORT_OVERHEAD: usize = NONCE_PREFIX_LEN + TAG_LEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which KEM key the initiator encapsulates to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeMode {
    /// Two messages. The initiator encapsulates to the server's long-term KEM
    /// key, so a leaked `kem.sk` exposes past sessions.
    #[default]
    StaticKem,
    /// Three messages. The responder signs a fresh KEM key for every
    /// handshake and discards it once the session keys are derived.
    EphemeralKem,
}

impl HandshakeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeMode::StaticKem => "static-kem",
            HandshakeMode::EphemeralKem => "ephemeral-kem",
        }
    }
}

impl fmt::Display for HandshakeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake progress. Transitions only move forward; `Error` is absorbing.
/// `SentReply` is only reached by an ephemeral-mode responder waiting for the
/// initiator's ciphertext.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeState {
    Init,
    SentHello,
    SentReply,
    Established,
    Error,
}

impl HandshakeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeState::Init => "init",
            HandshakeState::SentHello => "sent-hello",
            HandshakeState::SentReply => "sent-reply",
            HandshakeState::Established => "established",
            HandshakeState::Error => "error",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared header check: magic then version.
fn check_header(bytes: &[u8]) -> Result<(), HandshakeError> {
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[..4]);
    if magic != MAGIC {
        return Err(HandshakeError::BadMagic(magic));
    }
    let version = u16::from_be_bytes([bytes[4], bytes[5]]);
    if version != PROTOCOL_VERSION {
        return Err(HandshakeError::UnsupportedVersion(version));
    }
    Ok(())
}

/// Initiator's hello: `magic | version | ct_len | ciphertext | padding`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientHello {
    pub ciphertext: MlKemCiphertext,
    /// Random filler. Ignored by the receiver but covered by the transcript.
    pub padding: Vec<u8>,
}

impl ClientHello {
    pub fn new(ciphertext: MlKemCiphertext, padding: [u8; HELLO_PADDING_LEN]) -> Self {
        Self {
            ciphertext,
            padding: padding.to_vec(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let ct = self.ciphertext.as_bytes();
        let mut out = Vec::with_capacity(HELLO_HEADER_LEN + ct.len() + self.padding.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        out.extend_from_slice(&(ct.len() as u16).to_be_bytes());
        out.extend_from_slice(ct);
        out.extend_from_slice(&self.padding);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() < HELLO_HEADER_LEN {
            return Err(HandshakeError::TooShort {
                needed: HELLO_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        check_header(bytes)?;
        let declared = u16::from_be_bytes([bytes[6], bytes[7]]) as usize;
        let body_end = HELLO_HEADER_LEN + declared;
        if bytes.len() < body_end {
            return Err(HandshakeError::TooShort {
                needed: body_end,
                actual: bytes.len(),
            });
        }
        if declared != KEM_CIPHERTEXT_LEN {
            return Err(HandshakeError::CiphertextLength {
                expected: KEM_CIPHERTEXT_LEN,
                declared,
            });
        }
        if bytes.len() > body_end + HELLO_PADDING_LEN {
            return Err(HandshakeError::TooLong {
                max: body_end + HELLO_PADDING_LEN,
                actual: bytes.len(),
            });
        }
        let ciphertext = MlKemCiphertext::from_bytes(&bytes[HELLO_HEADER_LEN..body_end]).map_err(
            |_| HandshakeError::CiphertextLength {
                expected: KEM_CIPHERTEXT_LEN,
                declared,
            },
        )?;
        Ok(Self {
            ciphertext,
            padding: bytes[body_end..].to_vec(),
        })
    }
}

/// Responder's reply: `magic | version | status | signature`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerHello {
    pub signature: MlDsaSignature,
}

impl ServerHello {
    pub fn new(signature: MlDsaSignature) -> Self {
        Self { signature }
    }

    pub fn encode(&self) -> Vec<u8> {
        let sig = self.signature.as_bytes();
        let mut out = Vec::with_capacity(REPLY_HEADER_LEN + sig.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
        out.push(STATUS_OK);
        out.extend_from_slice(sig);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() < REPLY_HEADER_LEN {
            return Err(HandshakeError::TooShort {
                needed: REPLY_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        check_header(bytes)?;
        let status = bytes[6];
        if status != STATUS_OK {
            return Err(HandshakeError::PeerRejected(status));
        }
        if bytes.len() != REPLY_LEN {
            return Err(HandshakeError::ReplyLength {
                expected: REPLY_LEN,
                actual: bytes.len(),
            });
        }
        let signature = MlDsaSignature::from_bytes(&bytes[REPLY_HEADER_LEN..]).map_err(|_| {
            HandshakeError::ReplyLength {
                expected: REPLY_LEN,
                actual: bytes.len(),
            }
        })?;
        Ok(Self { signature })
    }
}

fn header() -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[..4].copy_from_slice(&MAGIC);
    out[4..].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    out
}

/// Exact-length check shared by the fixed-size ephemeral messages.
fn check_exact(bytes: &[u8], expected: usize) -> Result<(), HandshakeError> {
    if bytes.len() < expected {
        return Err(HandshakeError::TooShort {
            needed: expected,
            actual: bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(HandshakeError::TooLong {
            max: expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

/// Ephemeral-mode opener: `magic | version | client_random`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EphemeralHello {
    pub random: [u8; RANDOM_LEN],
}

impl EphemeralHello {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(EPHEMERAL_HELLO_LEN);
        out.extend_from_slice(&header());
        out.extend_from_slice(&self.random);
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() < HEADER_LEN {
            return Err(HandshakeError::TooShort {
                needed: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        check_header(bytes)?;
        check_exact(bytes, EPHEMERAL_HELLO_LEN)?;
        let mut random = [0u8; RANDOM_LEN];
        random.copy_from_slice(&bytes[HEADER_LEN..]);
        Ok(Self { random })
    }
}

/// Ephemeral-mode reply:
/// `magic | version | status | server_random | kem_public | signature`.
/// The signature covers the transcript up to and including `kem_public`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EphemeralReply {
    pub random: [u8; RANDOM_LEN],
    pub kem_public: MlKemPublicKey,
    pub signature: MlDsaSignature,
}

impl EphemeralReply {
    /// The signed prefix of the reply, before the signature exists.
    pub fn signed_prefix(random: &[u8; RANDOM_LEN], kem_public: &MlKemPublicKey) -> Vec<u8> {
        let mut out = Vec::with_capacity(EPHEMERAL_REPLY_LEN);
        out.extend_from_slice(&header());
        out.push(STATUS_OK);
        out.extend_from_slice(random);
        out.extend_from_slice(kem_public.as_bytes());
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Self::signed_prefix(&self.random, &self.kem_public);
        out.extend_from_slice(self.signature.as_bytes());
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() < REPLY_HEADER_LEN {
            return Err(HandshakeError::TooShort {
                needed: REPLY_HEADER_LEN,
                actual: bytes.len(),
            });
        }
        check_header(bytes)?;
        let status = bytes[6];
        if status != STATUS_OK {
            return Err(HandshakeError::PeerRejected(status));
        }
        if bytes.len() != EPHEMERAL_REPLY_LEN {
            return Err(HandshakeError::ReplyLength {
                expected: EPHEMERAL_REPLY_LEN,
                actual: bytes.len(),
            });
        }
        let length_error = || HandshakeError::ReplyLength {
            expected: EPHEMERAL_REPLY_LEN,
            actual: bytes.len(),
        };
        let mut random = [0u8; RANDOM_LEN];
        random.copy_from_slice(&bytes[REPLY_HEADER_LEN..REPLY_HEADER_LEN + RANDOM_LEN]);
        let kem_public =
            MlKemPublicKey::from_bytes(&bytes[REPLY_HEADER_LEN + RANDOM_LEN..EPHEMERAL_REPLY_SIGNED_LEN])
                .map_err(|_| length_error())?;
        let signature = MlDsaSignature::from_bytes(&bytes[EPHEMERAL_REPLY_SIGNED_LEN..])
            .map_err(|_| length_error())?;
        Ok(Self {
            random,
            kem_public,
            signature,
        })
    }
}

/// Ephemeral-mode final message: `magic | version | ciphertext`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientKem {
    pub ciphertext: MlKemCiphertext,
}

impl ClientKem {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CLIENT_KEM_LEN);
        out.extend_from_slice(&header());
        out.extend_from_slice(self.ciphertext.as_bytes());
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() < HEADER_LEN {
            return Err(HandshakeError::TooShort {
                needed: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        check_header(bytes)?;
        let declared = bytes.len() - HEADER_LEN;
        let ciphertext = MlKemCiphertext::from_bytes(&bytes[HEADER_LEN..]).map_err(|_| {
            HandshakeError::CiphertextLength {
                expected: KEM_CIPHERTEXT_LEN,
                declared,
            }
        })?;
        Ok(Self { ciphertext })
    }
}
