//! Error types for the PQ Noise protocol

use thiserror::Error;

use crate::metrics::FailureClass;
use crate::types::{HandshakeState, Role};

/// Errors that can occur during PQ Noise protocol operations
#[derive(Debug, Error)]
pub enum PqNoiseError {
    /// Cryptographic operation failed
    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    /// Required static key material is missing or unusable
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Handshake protocol error
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Post-handshake authentication failure. Nonce mismatch, tag mismatch
    /// and truncation are deliberately indistinguishable.
    #[error("transport authentication failed")]
    TransportAuth,

    /// Transport operation attempted before the handshake completed
    #[error("session is not established")]
    NotEstablished,

    /// The session is latched in the error state and must be discarded
    #[error("session has failed and must be discarded")]
    SessionFailed,

    /// The handshake yielded more than one candidate key set and the peer has
    /// not yet sent a frame that selects one
    #[error("session keys are not yet confirmed by the peer")]
    KeyUnconfirmed,

    /// The send counter would wrap; the session must be replaced
    #[error("send nonce space exhausted")]
    NonceExhausted,

    /// I/O error during communication
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Timeout during operation
    #[error("operation timed out")]
    Timeout,

    /// Frame exceeds the configured limit
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
}

impl PqNoiseError {
    /// Classification used for metrics and log routing. `None` for errors that
    /// are not handshake failures.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            PqNoiseError::Config(_) => Some(FailureClass::Configuration),
            PqNoiseError::Handshake(e) => Some(e.class()),
            PqNoiseError::Crypto(_) => Some(FailureClass::Cryptographic),
            _ => None,
        }
    }
}

/// Missing or inconsistent static key material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server KEM public key is required")]
    MissingKemPublicKey,

    #[error("responder requires the server KEM secret key")]
    MissingKemSecretKey,

    #[error("responder requires the server signing key")]
    MissingSigningKey,

    #[error("initiator requires the server verification key")]
    MissingVerifyingKey,

    #[error("KEM secret key does not match the configured public key")]
    KemKeyMismatch,

    #[error("invalid key material in {0}")]
    InvalidKeyMaterial(String),
}

/// Specific handshake errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Message shorter than its fixed header or declared body
    #[error("message too short: need at least {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    /// Message longer than its fixed layout allows
    #[error("message too long: at most {max} bytes, got {actual}")]
    TooLong { max: usize, actual: usize },

    #[error("bad magic bytes {}", hex::encode(.0))]
    BadMagic([u8; 4]),

    /// Protocol version mismatch
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// Declared ciphertext length differs from the KEM's fixed size
    #[error("invalid ciphertext length: expected {expected}, declared {declared}")]
    CiphertextLength { expected: usize, declared: usize },

    #[error("invalid reply length: expected {expected}, got {actual}")]
    ReplyLength { expected: usize, actual: usize },

    /// Responder answered with a nonzero status byte
    #[error("peer rejected handshake with status {0}")]
    PeerRejected(u8),

    #[error("KEM encapsulation failed")]
    Encapsulation,

    #[error("KEM decapsulation failed")]
    Decapsulation,

    /// Invalid signature from peer
    #[error("invalid transcript signature")]
    InvalidSignature,

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// The first transport frame opened under none of the candidate key sets
    #[error("first transport frame matches no server KEM key")]
    KeyConfirmation,

    /// Message delivered in a state that does not expect it
    #[error("unexpected handshake message for {role} in state {state}")]
    UnexpectedMessage { role: Role, state: HandshakeState },

    /// Connection closed during handshake
    #[error("connection closed during handshake")]
    ConnectionClosed,
}

impl HandshakeError {
    pub fn class(&self) -> FailureClass {
        match self {
            HandshakeError::TooShort { .. }
            | HandshakeError::TooLong { .. }
            | HandshakeError::BadMagic(_)
            | HandshakeError::UnsupportedVersion(_)
            | HandshakeError::CiphertextLength { .. }
            | HandshakeError::ReplyLength { .. } => FailureClass::Malformed,
            HandshakeError::Encapsulation
            | HandshakeError::Decapsulation
            | HandshakeError::InvalidSignature
            | HandshakeError::KeyDerivation
            | HandshakeError::KeyConfirmation => FailureClass::Cryptographic,
            HandshakeError::PeerRejected(_)
            | HandshakeError::UnexpectedMessage { .. }
            | HandshakeError::ConnectionClosed => FailureClass::Protocol,
        }
    }
}

/// Result type for PQ Noise operations
pub type Result<T> = std::result::Result<T, PqNoiseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_split_malformed_from_cryptographic() {
        assert_eq!(
            HandshakeError::BadMagic([0; 4]).class(),
            FailureClass::Malformed
        );
        assert_eq!(
            HandshakeError::InvalidSignature.class(),
            FailureClass::Cryptographic
        );
        assert_eq!(HandshakeError::PeerRejected(1).class(), FailureClass::Protocol);
        assert_eq!(
            HandshakeError::TooLong { max: 1, actual: 2 }.class(),
            FailureClass::Malformed
        );
        assert_eq!(
            HandshakeError::KeyConfirmation.class(),
            FailureClass::Cryptographic
        );
        assert_eq!(PqNoiseError::KeyUnconfirmed.failure_class(), None);

        let err = PqNoiseError::from(ConfigError::MissingKemSecretKey);
        assert_eq!(err.failure_class(), Some(FailureClass::Configuration));
        assert_eq!(PqNoiseError::TransportAuth.failure_class(), None);
    }

    #[test]
    fn messages_are_non_empty() {
        let err = PqNoiseError::from(HandshakeError::BadMagic([1, 2, 3, 4]));
        assert_eq!(err.to_string(), "handshake error: bad magic bytes 01020304");
        assert!(!PqNoiseError::from(ConfigError::MissingKemSecretKey)
            .to_string()
            .is_empty());
    }
}
