//! HKDF over SHA3-512 (extract-and-expand).
//!
//! Extraction compresses `(salt, ikm)` into a 64-byte pseudorandom key; expansion
//! chains HMAC blocks over `info` and a block counter and truncates to the
//! requested length. The function is pure: equal inputs always give equal output,
//! which is what lets both peers arrive at the same session keys.

use alloc::vec;
use alloc::vec::Vec;
use hkdf::Hkdf;
use sha3::Sha3_512;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Size of the extracted pseudorandom key and of each expansion block.
pub const HASH_LEN: usize = 64;

/// RFC 5869 bound on the expansion output.
pub const MAX_OUTPUT_LEN: usize = 255 * HASH_LEN;

/// One-shot extract-and-expand.
pub fn derive(
    salt: &[u8],
    ikm: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, CryptoError> {
    HkdfSha3::extract(salt, ikm).expand_to_vec(info, output_len)
}

/// Extracted HKDF state; expand as many labelled outputs as needed from one
/// extraction.
#[derive(Clone)]
pub struct HkdfSha3 {
    inner: Hkdf<Sha3_512>,
}

impl HkdfSha3 {
    pub fn extract(salt: &[u8], ikm: &[u8]) -> Self {
        Self {
            inner: Hkdf::<Sha3_512>::new(Some(salt), ikm),
        }
    }

    pub fn expand(&self, info: &[u8], out: &mut [u8]) -> Result<(), CryptoError> {
        self.inner
            .expand(info, out)
            .map_err(|_| CryptoError::KdfOutputTooLong {
                requested: out.len(),
                max: MAX_OUTPUT_LEN,
            })
    }

    pub fn expand_to_vec(&self, info: &[u8], output_len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut out = vec![0u8; output_len];
        if let Err(err) = self.expand(info, &mut out) {
            out.zeroize();
            return Err(err);
        }
        Ok(out)
    }

    pub fn expand_array<const N: usize>(&self, info: &[u8]) -> Result<[u8; N], CryptoError> {
        let mut out = [0u8; N];
        self.expand(info, &mut out)?;
        Ok(out)
    }
}
