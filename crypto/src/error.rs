#[cfg(feature = "std")]
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum CryptoError {
    #[cfg_attr(
        feature = "std",
        error("invalid length: expected {expected} bytes, found {actual}")
    )]
    InvalidLength { expected: usize, actual: usize },

    #[cfg_attr(feature = "std", error("verification failed"))]
    VerificationFailed,

    #[cfg_attr(feature = "std", error("encapsulation failed"))]
    EncapsulationFailed,

    #[cfg_attr(feature = "std", error("decapsulation failed"))]
    DecapsulationFailed,

    #[cfg_attr(feature = "std", error("invalid key"))]
    InvalidKey,

    #[cfg_attr(feature = "std", error("invalid signature"))]
    InvalidSignature,

    #[cfg_attr(feature = "std", error("encryption failed"))]
    EncryptionFailed,

    /// Authentication failure. Tag, length and ciphertext corruption all map
    /// here and carry no detail.
    #[cfg_attr(feature = "std", error("decryption failed"))]
    DecryptionFailed,

    #[cfg_attr(
        feature = "std",
        error("key derivation output too long: requested {requested} bytes, max {max}")
    )]
    KdfOutputTooLong { requested: usize, max: usize },
}

#[cfg(not(feature = "std"))]
impl core::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CryptoError::InvalidLength { expected, actual } => {
                write!(
                    f,
                    "invalid length: expected {} bytes, found {}",
                    expected, actual
                )
            }
            CryptoError::VerificationFailed => write!(f, "verification failed"),
            CryptoError::EncapsulationFailed => write!(f, "encapsulation failed"),
            CryptoError::DecapsulationFailed => write!(f, "decapsulation failed"),
            CryptoError::InvalidKey => write!(f, "invalid key"),
            CryptoError::InvalidSignature => write!(f, "invalid signature"),
            CryptoError::EncryptionFailed => write!(f, "encryption failed"),
            CryptoError::DecryptionFailed => write!(f, "decryption failed"),
            CryptoError::KdfOutputTooLong { requested, max } => write!(
                f,
                "key derivation output too long: requested {} bytes, max {}",
                requested, max
            ),
        }
    }
}

/// Check that `bytes` has exactly `expected` bytes.
pub(crate) fn check_len(bytes: &[u8], expected: usize) -> Result<(), CryptoError> {
    if bytes.len() != expected {
        return Err(CryptoError::InvalidLength {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}
