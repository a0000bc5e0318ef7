//! ML-KEM-1024 / ML-DSA-65 handshake state machine.
//!
//! Static mode, two messages:
//!
//! ```text
//! Initiator                                   Responder
//!   encapsulate(server_kem_pk) -> ct, ss
//!   Hello = magic|ver|len|ct|pad   ------->   decapsulate(ct) -> ss
//!                                             sig = Sign(transcript)
//!                                  <-------   Reply = magic|ver|status|sig
//!   Verify(transcript, sig)
//! ```
//!
//! Both sides feed the KEM shared secret and the hash of the hello into the
//! key schedule. Only the responder authenticates; the handshake messages are
//! not encrypted, so the ciphertext length is visible on the wire.
//!
//! Ephemeral mode, three messages:
//!
//! ```text
//! Initiator                                   Responder
//!   Hello = magic|ver|client_random ------->  generate (eph_pk, eph_sk)
//!                                             sig = Sign(transcript)
//!                    <-------   Reply = magic|ver|status|server_random|eph_pk|sig
//!   Verify(transcript, sig)
//!   encapsulate(eph_pk) -> ct, ss
//!   Kem = magic|ver|ct             ------->   decapsulate(ct) -> ss
//! ```
//!
//! Here the keys are derived over all three messages and the long-term KEM
//! key is not used at all.

use crypto::ml_kem::MlKemKeyPair;
use crypto::traits::{KemKeyPair, KemPublicKey, KemSecretKey, SigningKey, VerifyKey};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::PqNoiseConfig;
use crate::error::{ConfigError, HandshakeError, PqNoiseError, Result};
use crate::noise::{SessionKeys, Transcript};
use crate::types::{
    ClientHello, ClientKem, EphemeralHello, EphemeralReply, HandshakeMode, HandshakeState, Role,
    ServerHello, EPHEMERAL_REPLY_SIGNED_LEN, HELLO_PADDING_LEN, RANDOM_LEN, SUITE,
};

/// Handshake state machine
pub struct PqHandshake {
    role: Role,
    config: PqNoiseConfig,
    state: HandshakeState,
    transcript: Transcript,
    /// Keys derived before the handshake is complete; released only once
    /// `Established`. A responder holding a retired KEM key derives one set
    /// per key, current key first.
    pending: Vec<SessionKeys>,
    /// Ephemeral-mode responder key, dropped as soon as it has decapsulated.
    ephemeral: Option<MlKemKeyPair>,
}

impl PqHandshake {
    /// Create a new handshake instance
    pub fn new(role: Role, config: PqNoiseConfig) -> Self {
        Self {
            role,
            config,
            state: HandshakeState::Init,
            transcript: Transcript::new(),
            pending: Vec::new(),
            ephemeral: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mode(&self) -> HandshakeMode {
        self.config.mode
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Produce the first message. For a responder this is a no-op in every
    /// state: it returns an empty message and leaves the state alone.
    pub fn start(&mut self) -> Result<Vec<u8>> {
        self.guard(|hs| match (hs.role, hs.config.mode) {
            (Role::Initiator, HandshakeMode::StaticKem) => hs.write_hello(),
            (Role::Initiator, HandshakeMode::EphemeralKem) => hs.write_ephemeral_hello(),
            (Role::Responder, _) => Ok(Vec::new()),
        })
    }

    /// Consume a peer message and return the answer, which is empty when this
    /// side has nothing more to send.
    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        self.guard(|hs| match (hs.role, hs.config.mode) {
            (Role::Initiator, HandshakeMode::StaticKem) => hs.read_reply(message),
            (Role::Responder, HandshakeMode::StaticKem) => hs.read_hello(message),
            (Role::Initiator, HandshakeMode::EphemeralKem) => hs.read_ephemeral_reply(message),
            (Role::Responder, HandshakeMode::EphemeralKem) => match hs.state {
                HandshakeState::Init => hs.read_ephemeral_hello(message),
                _ => hs.read_client_kem(message),
            },
        })
    }

    /// Hand over the candidate session keys. Only yields once, and only when
    /// `Established`. There is more than one candidate only when a retired
    /// KEM key is configured; the first is always the current key's.
    pub fn take_session_keys(&mut self) -> Vec<SessionKeys> {
        if self.state == HandshakeState::Established {
            std::mem::take(&mut self.pending)
        } else {
            Vec::new()
        }
    }

    /// Latch `Error` from outside the message flow, e.g. when no candidate key
    /// set authenticates the first transport frame.
    pub(crate) fn abort(&mut self) {
        self.state = HandshakeState::Error;
        self.pending.clear();
        self.ephemeral = None;
    }

    fn guard<F>(&mut self, step: F) -> Result<Vec<u8>>
    where
        F: FnOnce(&mut Self) -> Result<Vec<u8>>,
    {
        if self.state == HandshakeState::Error {
            return Err(PqNoiseError::SessionFailed);
        }
        match step(self) {
            Ok(out) => Ok(out),
            Err(err) => {
                self.abort();
                if matches!(err, PqNoiseError::Handshake(HandshakeError::InvalidSignature)) {
                    tracing::warn!(
                        role = %self.role,
                        "transcript signature rejected: possible man-in-the-middle"
                    );
                }
                Err(err)
            }
        }
    }

    fn write_hello(&mut self) -> Result<Vec<u8>> {
        if self.state != HandshakeState::Init {
            return Err(unexpected(self.role, self.state));
        }
        let (ciphertext, shared_secret) = self
            .config
            .keys
            .kem_public
            .encapsulate(&mut OsRng)
            .map_err(|_| HandshakeError::Encapsulation)?;
        let mut padding = [0u8; HELLO_PADDING_LEN];
        OsRng.fill_bytes(&mut padding);

        let hello = ClientHello::new(ciphertext, padding).encode();
        self.transcript.append(&hello);
        self.pending = vec![SessionKeys::derive(
            self.role,
            &shared_secret,
            &self.transcript,
        )?];
        self.state = HandshakeState::SentHello;

        tracing::debug!(
            role = %self.role,
            stage = "hello-sent",
            len = hello.len(),
            server = %hex::encode(self.config.keys.kem_fingerprint()),
            "PQ handshake stage"
        );
        Ok(hello)
    }

    fn read_hello(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if self.state != HandshakeState::Init {
            return Err(unexpected(self.role, self.state));
        }
        let keys = self.config.keys.clone();
        let kem_secret = keys
            .kem_secret
            .as_ref()
            .ok_or(ConfigError::MissingKemSecretKey)?;
        let sig_secret = keys
            .sig_secret
            .as_ref()
            .ok_or(ConfigError::MissingSigningKey)?;

        let hello = ClientHello::parse(message)?;
        self.transcript.append(message);
        tracing::debug!(
            role = %self.role,
            stage = "hello-received",
            len = message.len(),
            "PQ handshake stage"
        );

        // Implicit rejection means decapsulating under the wrong key still
        // succeeds, so which key the initiator used is only settled by its
        // first transport frame.
        let mut candidates = Vec::with_capacity(2);
        for secret in std::iter::once(kem_secret).chain(keys.kem_secret_prev.as_ref()) {
            let shared_secret = secret
                .decapsulate(&hello.ciphertext)
                .map_err(|_| HandshakeError::Decapsulation)?;
            candidates.push(SessionKeys::derive(
                self.role,
                &shared_secret,
                &self.transcript,
            )?);
        }

        let signature = sig_secret.sign(self.transcript.as_bytes());
        let reply = ServerHello::new(signature).encode();
        self.transcript.append(&reply);

        self.pending = candidates;
        self.state = HandshakeState::Established;
        self.log_established();
        Ok(reply)
    }

    fn read_reply(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if self.state != HandshakeState::SentHello {
            return Err(unexpected(self.role, self.state));
        }
        let keys = self.config.keys.clone();
        let sig_public = keys
            .sig_public
            .as_ref()
            .ok_or(ConfigError::MissingVerifyingKey)?;

        let reply = ServerHello::parse(message)?;
        // The signature covers exactly what the responder saw: our hello.
        sig_public
            .verify(self.transcript.as_bytes(), &reply.signature)
            .map_err(|_| HandshakeError::InvalidSignature)?;
        self.transcript.append(message);

        self.state = HandshakeState::Established;
        self.log_established();
        Ok(Vec::new())
    }

    fn write_ephemeral_hello(&mut self) -> Result<Vec<u8>> {
        if self.state != HandshakeState::Init {
            return Err(unexpected(self.role, self.state));
        }
        let mut random = [0u8; RANDOM_LEN];
        OsRng.fill_bytes(&mut random);
        let hello = EphemeralHello { random }.encode();
        self.transcript.append(&hello);
        self.state = HandshakeState::SentHello;

        tracing::debug!(
            role = %self.role,
            stage = "hello-sent",
            mode = %self.config.mode,
            len = hello.len(),
            "PQ handshake stage"
        );
        Ok(hello)
    }

    fn read_ephemeral_hello(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let keys = self.config.keys.clone();
        let sig_secret = keys
            .sig_secret
            .as_ref()
            .ok_or(ConfigError::MissingSigningKey)?;

        EphemeralHello::parse(message)?;
        self.transcript.append(message);

        let ephemeral = MlKemKeyPair::generate(&mut OsRng);
        let mut random = [0u8; RANDOM_LEN];
        OsRng.fill_bytes(&mut random);
        self.transcript
            .append(&EphemeralReply::signed_prefix(&random, ephemeral.public_key()));
        let reply = EphemeralReply {
            random,
            kem_public: ephemeral.public_key().clone(),
            signature: sig_secret.sign(self.transcript.as_bytes()),
        }
        .encode();
        self.transcript.append(&reply[EPHEMERAL_REPLY_SIGNED_LEN..]);

        self.ephemeral = Some(ephemeral);
        self.state = HandshakeState::SentReply;
        tracing::debug!(
            role = %self.role,
            stage = "reply-sent",
            mode = %self.config.mode,
            len = reply.len(),
            "PQ handshake stage"
        );
        Ok(reply)
    }

    fn read_ephemeral_reply(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if self.state != HandshakeState::SentHello {
            return Err(unexpected(self.role, self.state));
        }
        let keys = self.config.keys.clone();
        let sig_public = keys
            .sig_public
            .as_ref()
            .ok_or(ConfigError::MissingVerifyingKey)?;

        let reply = EphemeralReply::parse(message)?;
        // The signature covers our hello, the server random and the fresh key.
        self.transcript.append(&message[..EPHEMERAL_REPLY_SIGNED_LEN]);
        sig_public
            .verify(self.transcript.as_bytes(), &reply.signature)
            .map_err(|_| HandshakeError::InvalidSignature)?;
        self.transcript.append(&message[EPHEMERAL_REPLY_SIGNED_LEN..]);

        let (ciphertext, shared_secret) = reply
            .kem_public
            .encapsulate(&mut OsRng)
            .map_err(|_| HandshakeError::Encapsulation)?;
        let kem = ClientKem { ciphertext }.encode();
        self.transcript.append(&kem);
        self.pending = vec![SessionKeys::derive(
            self.role,
            &shared_secret,
            &self.transcript,
        )?];

        self.state = HandshakeState::Established;
        self.log_established();
        Ok(kem)
    }

    fn read_client_kem(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if self.state != HandshakeState::SentReply {
            return Err(unexpected(self.role, self.state));
        }
        let kem = ClientKem::parse(message)?;
        let ephemeral = self
            .ephemeral
            .take()
            .ok_or(HandshakeError::Decapsulation)?;
        self.transcript.append(message);

        let shared_secret = ephemeral
            .secret_key()
            .decapsulate(&kem.ciphertext)
            .map_err(|_| HandshakeError::Decapsulation)?;
        self.pending = vec![SessionKeys::derive(
            self.role,
            &shared_secret,
            &self.transcript,
        )?];

        self.state = HandshakeState::Established;
        self.log_established();
        Ok(Vec::new())
    }

    fn log_established(&self) {
        if self.config.verbose_logging {
            tracing::info!(
                role = %self.role,
                mode = %self.config.mode,
                suite = SUITE,
                transcript_len = self.transcript.len(),
                server = %hex::encode(self.config.keys.kem_fingerprint()),
                "PQ handshake established"
            );
        } else {
            tracing::debug!(role = %self.role, stage = "established", "PQ handshake stage");
        }
    }
}

fn unexpected(role: Role, state: HandshakeState) -> PqNoiseError {
    HandshakeError::UnexpectedMessage { role, state }.into()
}

/// Convenience for tests and tools: a responder config with fresh keys.
pub fn ephemeral_responder_config() -> PqNoiseConfig {
    use crypto::ml_dsa::MlDsaKeyPair;
    PqNoiseConfig::responder(
        MlKemKeyPair::generate(&mut OsRng),
        MlDsaKeyPair::generate(&mut OsRng),
    )
}
