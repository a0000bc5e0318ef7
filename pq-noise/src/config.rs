//! Configuration for the PQ Noise protocol

use std::sync::Arc;
use std::time::Duration;

use crypto::hashes::fingerprint;
use crypto::ml_dsa::{MlDsaKeyPair, MlDsaPublicKey, MlDsaSecretKey};
use crypto::ml_kem::{MlKemKeyPair, MlKemPublicKey, MlKemSecretKey};
use crypto::traits::{KemKeyPair, KemSecretKey, SigningKey};

use crate::error::{ConfigError, Result};
use crate::keystore::KeyStore;
use crate::metrics::PqMetrics;
use crate::types::{HandshakeMode, Role};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
pub const DEFAULT_REKEY_BYTES: u64 = 32 * 1024 * 1024;
pub const DEFAULT_REKEY_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Static server key material. Shared behind an `Arc` so a rotation swaps the
/// whole set for new sessions while in-flight sessions keep the one they began
/// with.
#[derive(Clone, Debug)]
pub struct ServerKeys {
    pub kem_public: MlKemPublicKey,
    pub kem_secret: Option<MlKemSecretKey>,
    /// KEM secret retired by the last rotation. Hellos from clients still
    /// holding the old public key decapsulate under it until the next rotation.
    pub kem_secret_prev: Option<MlKemSecretKey>,
    pub sig_public: Option<MlDsaPublicKey>,
    pub sig_secret: Option<MlDsaSecretKey>,
}

impl ServerKeys {
    /// What an initiator needs to know about a server.
    pub fn public(kem_public: MlKemPublicKey, sig_public: MlDsaPublicKey) -> Self {
        Self {
            kem_public,
            kem_secret: None,
            kem_secret_prev: None,
            sig_public: Some(sig_public),
            sig_secret: None,
        }
    }

    pub fn full(kem: MlKemKeyPair, sig: MlDsaKeyPair) -> Self {
        let (kem_public, kem_secret) = kem.into_parts();
        Self {
            kem_public,
            kem_secret: Some(kem_secret),
            kem_secret_prev: None,
            sig_public: Some(sig.public),
            sig_secret: Some(sig.secret),
        }
    }

    /// Copy with every secret removed.
    pub fn public_only(&self) -> Self {
        Self {
            kem_public: self.kem_public.clone(),
            kem_secret: None,
            kem_secret_prev: None,
            sig_public: self.sig_public.clone(),
            sig_secret: None,
        }
    }

    pub fn kem_fingerprint(&self) -> [u8; 8] {
        fingerprint(self.kem_public.as_bytes())
    }

    pub fn identity_fingerprint(&self) -> Option<[u8; 8]> {
        self.sig_public.as_ref().map(|pk| fingerprint(pk.as_bytes()))
    }
}

/// Byte-volume and age thresholds after which a session should be replaced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RekeyPolicy {
    pub max_bytes: u64,
    pub max_age: Duration,
}

impl Default for RekeyPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_REKEY_BYTES,
            max_age: DEFAULT_REKEY_INTERVAL,
        }
    }
}

impl RekeyPolicy {
    pub fn should_rekey(&self, bytes: u64, elapsed: Duration) -> bool {
        bytes >= self.max_bytes || elapsed >= self.max_age
    }
}

/// Configuration for PQ Noise handshakes
#[derive(Clone, Debug)]
pub struct PqNoiseConfig {
    pub keys: Arc<ServerKeys>,

    /// Both peers must agree on the mode; it is not negotiated on the wire.
    pub mode: HandshakeMode,

    /// Handshake deadline applied by the async transport
    pub handshake_timeout: Duration,

    /// Largest length-delimited frame the async transport accepts
    pub max_frame_len: usize,

    pub rekey: RekeyPolicy,

    pub metrics: Arc<PqMetrics>,

    /// Whether to log detailed handshake information
    pub verbose_logging: bool,
}

impl PqNoiseConfig {
    /// Create a new configuration
    pub fn new(keys: ServerKeys) -> Self {
        Self {
            keys: Arc::new(keys),
            mode: HandshakeMode::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            rekey: RekeyPolicy::default(),
            metrics: PqMetrics::global(),
            verbose_logging: false,
        }
    }

    /// Client side: the server's KEM public key and verification key.
    pub fn initiator(server_kem_pk: MlKemPublicKey, server_sig_pk: MlDsaPublicKey) -> Self {
        Self::new(ServerKeys::public(server_kem_pk, server_sig_pk))
    }

    /// Server side: both long-term key pairs.
    pub fn responder(kem: MlKemKeyPair, sig: MlDsaKeyPair) -> Self {
        Self::new(ServerKeys::full(kem, sig))
    }

    /// Responders load (or create) their key pairs, plus the KEM key retired
    /// by the last rotation if one is kept; initiators load only the
    /// published public halves.
    pub fn from_keystore(store: &KeyStore, role: Role) -> Result<Self> {
        let config = match role {
            Role::Responder => {
                let kem = store.load_or_generate_kem()?;
                let identity = store.load_or_generate_identity()?;
                let config = Self::responder(kem, identity);
                match store.load_previous_kem()? {
                    Some(previous) => config.with_previous_kem_secret(previous.into_parts().1),
                    None => config,
                }
            }
            Role::Initiator => Self::initiator(
                store.load_kem_public_key()?,
                store.load_identity_public_key()?,
            ),
        };
        Ok(config.with_metrics(store.metrics()))
    }

    /// The configuration a client of this server would use.
    pub fn public_view(&self) -> Self {
        Self {
            keys: Arc::new(self.keys.public_only()),
            ..self.clone()
        }
    }

    /// Also accept hellos encapsulated to a retired KEM key.
    pub fn with_previous_kem_secret(mut self, sk: MlKemSecretKey) -> Self {
        Arc::make_mut(&mut self.keys).kem_secret_prev = Some(sk);
        self
    }

    pub fn with_mode(mut self, mode: HandshakeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the handshake timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PqMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_rekey_policy(mut self, policy: RekeyPolicy) -> Self {
        self.rekey = policy;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    /// Enable verbose logging
    pub fn with_verbose_logging(mut self) -> Self {
        self.verbose_logging = true;
        self
    }
}

/// Builder for PqNoiseConfig
pub struct PqNoiseConfigBuilder {
    kem_public: Option<MlKemPublicKey>,
    kem_secret: Option<MlKemSecretKey>,
    kem_secret_prev: Option<MlKemSecretKey>,
    sig_public: Option<MlDsaPublicKey>,
    sig_secret: Option<MlDsaSecretKey>,
    mode: HandshakeMode,
    handshake_timeout: Duration,
    max_frame_len: usize,
    rekey: RekeyPolicy,
    metrics: Option<Arc<PqMetrics>>,
    verbose_logging: bool,
}

impl Default for PqNoiseConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PqNoiseConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            kem_public: None,
            kem_secret: None,
            kem_secret_prev: None,
            sig_public: None,
            sig_secret: None,
            mode: HandshakeMode::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            rekey: RekeyPolicy::default(),
            metrics: None,
            verbose_logging: false,
        }
    }

    pub fn server_kem_public_key(mut self, pk: MlKemPublicKey) -> Self {
        self.kem_public = Some(pk);
        self
    }

    /// Also fills in the public key when none was given.
    pub fn server_kem_secret_key(mut self, sk: MlKemSecretKey) -> Self {
        self.kem_secret = Some(sk);
        self
    }

    pub fn server_previous_kem_secret_key(mut self, sk: MlKemSecretKey) -> Self {
        self.kem_secret_prev = Some(sk);
        self
    }

    pub fn mode(mut self, mode: HandshakeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn server_verifying_key(mut self, pk: MlDsaPublicKey) -> Self {
        self.sig_public = Some(pk);
        self
    }

    pub fn server_signing_key(mut self, sk: MlDsaSecretKey) -> Self {
        self.sig_secret = Some(sk);
        self
    }

    /// Set the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn rekey_policy(mut self, policy: RekeyPolicy) -> Self {
        self.rekey = policy;
        self
    }

    pub fn metrics(mut self, metrics: Arc<PqMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enable verbose logging
    pub fn verbose(mut self) -> Self {
        self.verbose_logging = true;
        self
    }

    /// Build the configuration
    pub fn build(self) -> std::result::Result<PqNoiseConfig, ConfigError> {
        let kem_public = match (self.kem_public, &self.kem_secret) {
            (Some(pk), Some(sk)) => {
                if sk.public_key() != pk {
                    return Err(ConfigError::KemKeyMismatch);
                }
                pk
            }
            (Some(pk), None) => pk,
            (None, Some(sk)) => sk.public_key(),
            (None, None) => return Err(ConfigError::MissingKemPublicKey),
        };
        let sig_public = self
            .sig_public
            .or_else(|| self.sig_secret.as_ref().map(|sk| sk.verify_key()));

        let keys = ServerKeys {
            kem_public,
            kem_secret: self.kem_secret,
            kem_secret_prev: self.kem_secret_prev,
            sig_public,
            sig_secret: self.sig_secret,
        };
        Ok(PqNoiseConfig {
            keys: Arc::new(keys),
            mode: self.mode,
            handshake_timeout: self.handshake_timeout,
            max_frame_len: self.max_frame_len,
            rekey: self.rekey,
            metrics: self.metrics.unwrap_or_else(PqMetrics::global),
            verbose_logging: self.verbose_logging,
        })
    }
}
