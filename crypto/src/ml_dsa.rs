//! ML-DSA-65 (FIPS 204) signatures, used by the responder to sign the
//! handshake transcript.

use alloc::vec::Vec;
use ml_dsa::signature::{Signer, Verifier};
use ml_dsa::{MlDsa65, B32};
use rand_core::CryptoRngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::deterministic::seed32;
use crate::error::{check_len, CryptoError};
use crate::traits::{Signature as SigTrait, SigningKey as SigningKeyTrait, VerifyKey};

pub const ML_DSA_PUBLIC_KEY_LEN: usize = 1952;
pub const ML_DSA_SECRET_KEY_LEN: usize = 4032;
pub const ML_DSA_SIGNATURE_LEN: usize = 3309;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MlDsaSignature {
    bytes: Vec<u8>,
}

impl MlDsaSignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        check_len(bytes, ML_DSA_SIGNATURE_LEN)?;
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }
}

impl SigTrait for MlDsaSignature {
    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MlDsaPublicKey {
    bytes: [u8; ML_DSA_PUBLIC_KEY_LEN],
}

impl MlDsaPublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn to_inner(&self) -> ml_dsa::VerifyingKey<MlDsa65> {
        ml_dsa::VerifyingKey::<MlDsa65>::decode(&self.bytes.into())
    }
}

impl VerifyKey for MlDsaPublicKey {
    type Signature = MlDsaSignature;

    fn verify(&self, message: &[u8], signature: &Self::Signature) -> Result<(), CryptoError> {
        let sig_bytes: [u8; ML_DSA_SIGNATURE_LEN] = signature
            .bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;
        let sig = ml_dsa::Signature::<MlDsa65>::decode(&sig_bytes.into())
            .ok_or(CryptoError::InvalidSignature)?;
        self.to_inner()
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        check_len(bytes, ML_DSA_PUBLIC_KEY_LEN)?;
        let mut arr = [0u8; ML_DSA_PUBLIC_KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }
}

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MlDsaSecretKey {
    bytes: [u8; ML_DSA_SECRET_KEY_LEN],
}

impl MlDsaSecretKey {
    fn from_xi(mut xi: [u8; 32]) -> Self {
        let seed: B32 = xi.into();
        xi.zeroize();
        let sk = ml_dsa::SigningKey::<MlDsa65>::from_seed(&seed);
        let encoded = sk.encode();
        let mut bytes = [0u8; ML_DSA_SECRET_KEY_LEN];
        bytes.copy_from_slice(encoded.as_ref());
        Self { bytes }
    }

    fn to_inner(&self) -> ml_dsa::SigningKey<MlDsa65> {
        ml_dsa::SigningKey::<MlDsa65>::decode(&self.bytes.into())
    }
}

impl core::fmt::Debug for MlDsaSecretKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MlDsaSecretKey").finish_non_exhaustive()
    }
}

impl SigningKeyTrait for MlDsaSecretKey {
    type VerifyKey = MlDsaPublicKey;
    type Signature = MlDsaSignature;

    fn generate(rng: &mut impl CryptoRngCore) -> Self {
        let mut xi = [0u8; 32];
        rng.fill_bytes(&mut xi);
        Self::from_xi(xi)
    }

    fn generate_deterministic(seed: &[u8]) -> Self {
        Self::from_xi(seed32(b"ml-dsa-65-xi", seed))
    }

    fn sign(&self, message: &[u8]) -> Self::Signature {
        let sig = self.to_inner().sign(message);
        MlDsaSignature {
            bytes: sig.encode().to_vec(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        check_len(bytes, ML_DSA_SECRET_KEY_LEN)?;
        let mut arr = [0u8; ML_DSA_SECRET_KEY_LEN];
        arr.copy_from_slice(bytes);
        Ok(Self { bytes: arr })
    }

    fn verify_key(&self) -> Self::VerifyKey {
        let vk = self.to_inner().verifying_key();
        let encoded = vk.encode();
        let mut bytes = [0u8; ML_DSA_PUBLIC_KEY_LEN];
        bytes.copy_from_slice(encoded.as_ref());
        MlDsaPublicKey { bytes }
    }
}

/// Signing key together with its verification key.
#[derive(Clone, Debug)]
pub struct MlDsaKeyPair {
    pub secret: MlDsaSecretKey,
    pub public: MlDsaPublicKey,
}

impl MlDsaKeyPair {
    pub fn generate(rng: &mut impl CryptoRngCore) -> Self {
        Self::from_secret(MlDsaSecretKey::generate(rng))
    }

    pub fn generate_deterministic(seed: &[u8]) -> Self {
        Self::from_secret(MlDsaSecretKey::generate_deterministic(seed))
    }

    pub fn from_secret(secret: MlDsaSecretKey) -> Self {
        let public = secret.verify_key();
        Self { secret, public }
    }
}
