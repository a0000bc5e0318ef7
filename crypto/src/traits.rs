//! Capability traits for the primitives the handshake consumes.

use alloc::vec::Vec;
use rand_core::CryptoRngCore;

use crate::error::CryptoError;

pub trait Signature: Sized + Clone {
    fn as_bytes(&self) -> &[u8];
    fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

pub trait SigningKey: Sized {
    type VerifyKey: VerifyKey<Signature = Self::Signature>;
    type Signature: Signature;

    fn generate(rng: &mut impl CryptoRngCore) -> Self;
    fn generate_deterministic(seed: &[u8]) -> Self;
    fn sign(&self, message: &[u8]) -> Self::Signature;
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError>;
    fn verify_key(&self) -> Self::VerifyKey;
}

pub trait VerifyKey: Sized + Clone {
    type Signature: Signature;

    fn verify(&self, message: &[u8], signature: &Self::Signature) -> Result<(), CryptoError>;
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError>;
}

pub trait KemPublicKey: Sized + Clone {
    type Ciphertext: Sized + Clone;
    type SharedSecret: Sized + Clone;

    fn encapsulate(
        &self,
        rng: &mut impl CryptoRngCore,
    ) -> Result<(Self::Ciphertext, Self::SharedSecret), CryptoError>;
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError>;
}

pub trait KemSecretKey: Sized {
    type PublicKey: KemPublicKey;
    type Ciphertext: Sized + Clone;
    type SharedSecret: Sized + Clone;

    fn decapsulate(&self, ciphertext: &Self::Ciphertext)
        -> Result<Self::SharedSecret, CryptoError>;
    fn public_key(&self) -> Self::PublicKey;
    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError>;
}

pub trait KemKeyPair: Sized {
    type PublicKey: KemPublicKey<Ciphertext = Self::Ciphertext, SharedSecret = Self::SharedSecret>;
    type SecretKey: KemSecretKey<
        PublicKey = Self::PublicKey,
        Ciphertext = Self::Ciphertext,
        SharedSecret = Self::SharedSecret,
    >;
    type Ciphertext: Sized + Clone;
    type SharedSecret: Sized + Clone;

    fn generate(rng: &mut impl CryptoRngCore) -> Self;
    fn generate_deterministic(seed: &[u8]) -> Self;
    fn public_key(&self) -> &Self::PublicKey;
    fn secret_key(&self) -> &Self::SecretKey;
    fn into_parts(self) -> (Self::PublicKey, Self::SecretKey);
}
