//! ML-KEM-1024 (FIPS 203) key encapsulation.
//!
//! Thin wrapper over the `ml-kem` crate exposing byte-oriented key types behind
//! the KEM capability traits. Decapsulation uses implicit rejection: a corrupted
//! ciphertext yields an unrelated shared secret rather than an error, so a
//! tampered handshake surfaces later as a key mismatch.

use alloc::vec::Vec;
use ml_kem::kem::{Decapsulate, Encapsulate};
use ml_kem::{Ciphertext, Encoded, EncodedSizeUser, KemCore, MlKem1024, B32};
use rand_core::CryptoRngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::deterministic::seed32;
use crate::error::{check_len, CryptoError};
use crate::traits::{KemKeyPair, KemPublicKey, KemSecretKey};

pub const ML_KEM_PUBLIC_KEY_LEN: usize = 1568;
pub const ML_KEM_SECRET_KEY_LEN: usize = 3168;
pub const ML_KEM_CIPHERTEXT_LEN: usize = 1568;
pub const ML_KEM_SHARED_SECRET_LEN: usize = 32;

type EncapsulationKey = <MlKem1024 as KemCore>::EncapsulationKey;
type DecapsulationKey = <MlKem1024 as KemCore>::DecapsulationKey;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MlKemCiphertext {
    bytes: [u8; ML_KEM_CIPHERTEXT_LEN],
}

impl MlKemCiphertext {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        check_len(bytes, ML_KEM_CIPHERTEXT_LEN)?;
        let mut arr = [0u8; ML_KEM_CIPHERTEXT_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn to_inner(&self) -> Result<Ciphertext<MlKem1024>, CryptoError> {
        Ciphertext::<MlKem1024>::try_from(self.bytes.as_slice()).map_err(|_| {
            CryptoError::InvalidLength {
                expected: ML_KEM_CIPHERTEXT_LEN,
                actual: self.bytes.len(),
            }
        })
    }
}

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MlKemSharedSecret {
    bytes: [u8; ML_KEM_SHARED_SECRET_LEN],
}

impl MlKemSharedSecret {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        check_len(bytes, ML_KEM_SHARED_SECRET_LEN)?;
        let mut arr = [0u8; ML_KEM_SHARED_SECRET_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl core::fmt::Debug for MlKemSharedSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MlKemSharedSecret").finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MlKemPublicKey {
    bytes: [u8; ML_KEM_PUBLIC_KEY_LEN],
}

impl MlKemPublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn from_inner(ek: &EncapsulationKey) -> Self {
        let encoded = ek.as_bytes();
        let mut bytes = [0u8; ML_KEM_PUBLIC_KEY_LEN];
        bytes.copy_from_slice(encoded.as_slice());
        Self { bytes }
    }

    fn to_inner(&self) -> Result<EncapsulationKey, CryptoError> {
        let encoded = Encoded::<EncapsulationKey>::try_from(self.bytes.as_slice())
            .map_err(|_| CryptoError::InvalidKey)?;
        Ok(EncapsulationKey::from_bytes(&encoded))
    }
}

impl KemPublicKey for MlKemPublicKey {
    type Ciphertext = MlKemCiphertext;
    type SharedSecret = MlKemSharedSecret;

    fn encapsulate(
        &self,
        rng: &mut impl CryptoRngCore,
    ) -> Result<(Self::Ciphertext, Self::SharedSecret), CryptoError> {
        let ek = self.to_inner()?;
        let (ct, ss) = ek
            .encapsulate(rng)
            .map_err(|_| CryptoError::EncapsulationFailed)?;
        let ciphertext = MlKemCiphertext::from_bytes(ct.as_slice())?;
        let shared_secret = MlKemSharedSecret::from_bytes(ss.as_slice())?;
        Ok((ciphertext, shared_secret))
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        check_len(bytes, ML_KEM_PUBLIC_KEY_LEN)?;
        let mut arr = [0u8; ML_KEM_PUBLIC_KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }
}

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MlKemSecretKey {
    bytes: [u8; ML_KEM_SECRET_KEY_LEN],
}

impl MlKemSecretKey {
    fn from_inner(dk: &DecapsulationKey) -> Self {
        let encoded = dk.as_bytes();
        let mut bytes = [0u8; ML_KEM_SECRET_KEY_LEN];
        bytes.copy_from_slice(encoded.as_slice());
        Self { bytes }
    }

    fn to_inner(&self) -> Result<DecapsulationKey, CryptoError> {
        let encoded = Encoded::<DecapsulationKey>::try_from(self.bytes.as_slice())
            .map_err(|_| CryptoError::InvalidKey)?;
        Ok(DecapsulationKey::from_bytes(&encoded))
    }
}

impl core::fmt::Debug for MlKemSecretKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MlKemSecretKey").finish_non_exhaustive()
    }
}

impl KemSecretKey for MlKemSecretKey {
    type PublicKey = MlKemPublicKey;
    type Ciphertext = MlKemCiphertext;
    type SharedSecret = MlKemSharedSecret;

    fn decapsulate(
        &self,
        ciphertext: &Self::Ciphertext,
    ) -> Result<Self::SharedSecret, CryptoError> {
        let dk = self.to_inner()?;
        let ss = dk
            .decapsulate(&ciphertext.to_inner()?)
            .map_err(|_| CryptoError::DecapsulationFailed)?;
        MlKemSharedSecret::from_bytes(ss.as_slice())
    }

    /// The FIPS 203 decapsulation key embeds the encapsulation key.
    fn public_key(&self) -> Self::PublicKey {
        let offset = ML_KEM_SECRET_KEY_LEN - ML_KEM_PUBLIC_KEY_LEN - 64;
        let mut bytes = [0u8; ML_KEM_PUBLIC_KEY_LEN];
        bytes.copy_from_slice(&self.bytes[offset..offset + ML_KEM_PUBLIC_KEY_LEN]);
        MlKemPublicKey { bytes }
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        check_len(bytes, ML_KEM_SECRET_KEY_LEN)?;
        let mut arr = [0u8; ML_KEM_SECRET_KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MlKemKeyPair {
    public: MlKemPublicKey,
    secret: MlKemSecretKey,
}

impl MlKemKeyPair {
    fn from_inner(dk: &DecapsulationKey, ek: &EncapsulationKey) -> Self {
        Self {
            public: MlKemPublicKey::from_inner(ek),
            secret: MlKemSecretKey::from_inner(dk),
        }
    }

    /// Rebuild a key pair from a stored secret key.
    pub fn from_secret_key(secret: MlKemSecretKey) -> Self {
        Self {
            public: secret.public_key(),
            secret,
        }
    }
}

impl KemKeyPair for MlKemKeyPair {
    type PublicKey = MlKemPublicKey;
    type SecretKey = MlKemSecretKey;
    type Ciphertext = MlKemCiphertext;
    type SharedSecret = MlKemSharedSecret;

    fn generate(rng: &mut impl CryptoRngCore) -> Self {
        let (dk, ek) = MlKem1024::generate(rng);
        Self::from_inner(&dk, &ek)
    }

    fn generate_deterministic(seed: &[u8]) -> Self {
        let d: B32 = seed32(b"ml-kem-1024-d", seed).into();
        let z: B32 = seed32(b"ml-kem-1024-z", seed).into();
        let (dk, ek) = MlKem1024::generate_deterministic(&d, &z);
        Self::from_inner(&dk, &ek)
    }

    fn public_key(&self) -> &Self::PublicKey {
        &self.public
    }

    fn secret_key(&self) -> &Self::SecretKey {
        &self.secret
    }

    fn into_parts(self) -> (Self::PublicKey, Self::SecretKey) {
        (self.public, self.secret)
    }
}
