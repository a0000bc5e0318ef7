use alloc::vec::Vec;
use core::cmp::min;
use sha2::{Digest, Sha256};

/// Expand the provided input into a deterministic byte vector of the requested length.
pub fn expand_to_length(domain: &[u8], input: &[u8], length: usize) -> Vec<u8> {
    let mut counter = 0u32;
    let mut output = Vec::with_capacity(length);
    while output.len() < length {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(counter.to_be_bytes());
        hasher.update(input);
        let digest = hasher.finalize();
        let take = min(length - output.len(), digest.len());
        output.extend_from_slice(&digest[..take]);
        counter = counter.wrapping_add(1);
    }
    output
}

/// Derive a 32-byte key generation seed bound to `domain`.
pub fn seed32(domain: &[u8], input: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&expand_to_length(domain, input, 32));
    out
}
