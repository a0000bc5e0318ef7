use sha2::Sha256;
use sha3::digest::Digest;
use sha3::Sha3_256;

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    let digest = Sha3_256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Short, non-secret fingerprint of a public key for logs.
pub fn fingerprint(public_key: &[u8]) -> [u8; 8] {
    let digest = sha256(public_key);
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}
