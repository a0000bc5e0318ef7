//! Transcript, key schedule and directional transport ciphers

use crypto::aead::{AeadCipher, NONCE_LEN};
use crypto::hashes::sha3_256;
use crypto::kdf::HkdfSha3;
use crypto::ml_kem::MlKemSharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{HandshakeError, PqNoiseError, Result};
use crate::types::{Role, NONCE_PREFIX_LEN, TRANSPORT_OVERHEAD};

pub const KDF_SALT: &[u8] = b"PQNoise";
pub const LABEL_I2R: &[u8] = b"PQNoise/v1 initiator->responder";
pub const LABEL_R2I: &[u8] = b"PQNoise/v1 responder->initiator";
pub const LABEL_BINDING: &[u8] = b"PQNoise/v1 session-binding";

/// Ordered record of every handshake byte exchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    bytes: Vec<u8>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA3-256 of the bytes recorded so far.
    pub fn hash(&self) -> [u8; 32] {
        sha3_256(&self.bytes)
    }
}

/// Keys derived from one handshake, already oriented for the local role.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub(crate) key_out: [u8; 32],
    pub(crate) key_in: [u8; 32],
    pub(crate) binding: [u8; 32],
}

impl SessionKeys {
    /// Expand the KEM shared secret into the two directional keys and the
    /// session-binding value. Both labelled keys are derived on both sides and
    /// assigned by role, so the initiator's `key_out` is the responder's
    /// `key_in` and vice versa.
    pub fn derive(
        role: Role,
        shared_secret: &MlKemSharedSecret,
        transcript: &Transcript,
    ) -> Result<Self> {
        let transcript_hash = transcript.hash();
        let kdf = HkdfSha3::extract(KDF_SALT, shared_secret.as_bytes());
        let expand = |label: &[u8]| -> Result<[u8; 32]> {
            let mut info = Vec::with_capacity(label.len() + transcript_hash.len());
            info.extend_from_slice(label);
            info.extend_from_slice(&transcript_hash);
            kdf.expand_array::<32>(&info)
                .map_err(|_| PqNoiseError::Handshake(HandshakeError::KeyDerivation))
        };

        let i2r = expand(LABEL_I2R)?;
        let r2i = expand(LABEL_R2I)?;
        let binding = expand(LABEL_BINDING)?;
        let (key_out, key_in) = match role {
            Role::Initiator => (i2r, r2i),
            Role::Responder => (r2i, i2r),
        };
        Ok(Self {
            key_out,
            key_in,
            binding,
        })
    }

    pub(crate) fn into_ciphers(self) -> (SendCipher, RecvCipher) {
        (
            SendCipher::new(&self.key_out, self.binding),
            RecvCipher::new(&self.key_in, self.binding),
        )
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// AEAD nonce for a counter: little-endian in the low eight bytes, high four
/// bytes zero.
pub fn nonce_from_counter(counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    nonce
}

fn bound_ad(binding: &[u8; 32], ad: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(binding.len() + ad.len());
    out.extend_from_slice(binding);
    out.extend_from_slice(ad);
    out
}

/// Outbound half: owns `key_out` and `send_nonce`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SendCipher {
    #[zeroize(skip)]
    cipher: AeadCipher,
    binding: [u8; 32],
    nonce: u64,
}

impl SendCipher {
    fn new(key: &[u8; 32], binding: [u8; 32]) -> Self {
        Self {
            cipher: AeadCipher::new(key),
            binding,
            nonce: 0,
        }
    }

    /// Produce `nonce_le(8) || ciphertext || tag(16)`. The counter only
    /// advances on success.
    pub fn seal(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let next = self
            .nonce
            .checked_add(1)
            .ok_or(PqNoiseError::NonceExhausted)?;
        let sealed = self.cipher.seal(
            &nonce_from_counter(self.nonce),
            &bound_ad(&self.binding, ad),
            plaintext,
        )?;
        let mut out = Vec::with_capacity(TRANSPORT_OVERHEAD + plaintext.len());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(&sealed);
        self.nonce = next;
        Ok(out)
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}

/// Inbound half: owns `key_in` and `recv_nonce`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RecvCipher {
    #[zeroize(skip)]
    cipher: AeadCipher,
    binding: [u8; 32],
    nonce: u64,
}

impl RecvCipher {
    fn new(key: &[u8; 32], binding: [u8; 32]) -> Self {
        Self {
            cipher: AeadCipher::new(key),
            binding,
            nonce: 0,
        }
    }

    /// Authenticate and decrypt a sealed message. The embedded counter must
    /// equal the expected one exactly; any failure leaves the counter alone.
    pub fn open(&mut self, ad: &[u8], wire: &[u8]) -> Result<Vec<u8>> {
        if wire.len() < TRANSPORT_OVERHEAD {
            return Err(PqNoiseError::TransportAuth);
        }
        let mut counter = [0u8; NONCE_PREFIX_LEN];
        counter.copy_from_slice(&wire[..NONCE_PREFIX_LEN]);
        if u64::from_le_bytes(counter) != self.nonce {
            return Err(PqNoiseError::TransportAuth);
        }
        let plaintext = self
            .cipher
            .open(
                &nonce_from_counter(self.nonce),
                &bound_ad(&self.binding, ad),
                &wire[NONCE_PREFIX_LEN..],
            )
            .map_err(|_| PqNoiseError::TransportAuth)?;
        self.nonce = self.nonce.wrapping_add(1);
        Ok(plaintext)
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}
