//! The PQ Noise session: handshake followed by the sealed transport.
//!
//! A session is synchronous and owns no I/O. The caller moves complete
//! handshake messages and sealed frames between peers. The transport enforces
//! strict in-order delivery, so frames must travel over a reliable ordered
//! stream; any reordering or loss surfaces as an authentication failure.
//!
//! A responder that still accepts a retired KEM key cannot tell from the
//! hello which key the initiator used. It keeps one key set per candidate and
//! installs whichever opens the initiator's first frame; until then it can
//! receive but not send.

use std::sync::Arc;

use crate::config::PqNoiseConfig;
use crate::error::{HandshakeError, PqNoiseError, Result};
use crate::handshake::PqHandshake;
use crate::metrics::{FailureClass, PqMetrics};
use crate::noise::{RecvCipher, SendCipher, SessionKeys};
use crate::types::{HandshakeState, Role};

/// Keeps `sessions_active` accurate: decremented when the last half of an
/// established session is dropped.
#[derive(Debug)]
struct ActiveSession {
    metrics: Arc<PqMetrics>,
}

impl ActiveSession {
    fn start(metrics: Arc<PqMetrics>) -> Arc<Self> {
        metrics.record_session_start();
        Arc::new(Self { metrics })
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.metrics.record_session_end();
    }
}

/// Outbound half of an established session.
pub struct SessionSender {
    cipher: SendCipher,
    metrics: Arc<PqMetrics>,
    _active: Arc<ActiveSession>,
}

impl SessionSender {
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.seal_with_ad(plaintext, &[])
    }

    pub fn seal_with_ad(&mut self, plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>> {
        let wire = self.cipher.seal(ad, plaintext)?;
        self.metrics.record_bytes_encrypted(plaintext.len());
        Ok(wire)
    }

    pub fn nonce(&self) -> u64 {
        self.cipher.nonce()
    }
}

/// Inbound half of an established session.
pub struct SessionReceiver {
    cipher: RecvCipher,
    metrics: Arc<PqMetrics>,
    _active: Arc<ActiveSession>,
}

impl SessionReceiver {
    pub fn open(&mut self, wire: &[u8]) -> Result<Vec<u8>> {
        self.open_with_ad(wire, &[])
    }

    /// Failures never advance the expected nonce and never poison the
    /// session; the caller decides whether to drop the connection.
    pub fn open_with_ad(&mut self, wire: &[u8], ad: &[u8]) -> Result<Vec<u8>> {
        match self.cipher.open(ad, wire) {
            Ok(plaintext) => {
                self.metrics.record_bytes_decrypted(plaintext.len());
                Ok(plaintext)
            }
            Err(err) => {
                self.metrics.record_transport_failure();
                tracing::debug!(expected_nonce = self.cipher.nonce(), "PQ open failed");
                Err(err)
            }
        }
    }

    pub fn nonce(&self) -> u64 {
        self.cipher.nonce()
    }
}

pub struct PqNoiseSession {
    handshake: PqHandshake,
    metrics: Arc<PqMetrics>,
    last_error: Option<String>,
    sender: Option<SessionSender>,
    receiver: Option<SessionReceiver>,
    /// Cipher pairs awaiting the first inbound frame, current KEM key first.
    unconfirmed: Vec<(SendCipher, RecvCipher)>,
}

impl PqNoiseSession {
    pub fn new(role: Role, config: PqNoiseConfig) -> Self {
        let metrics = config.metrics.clone();
        Self {
            handshake: PqHandshake::new(role, config),
            metrics,
            last_error: None,
            sender: None,
            receiver: None,
            unconfirmed: Vec::new(),
        }
    }

    pub fn initiator(config: PqNoiseConfig) -> Self {
        Self::new(Role::Initiator, config)
    }

    pub fn responder(config: PqNoiseConfig) -> Self {
        Self::new(Role::Responder, config)
    }

    pub fn role(&self) -> Role {
        self.handshake.role()
    }

    pub fn state(&self) -> HandshakeState {
        self.handshake.state()
    }

    pub fn is_established(&self) -> bool {
        self.state() == HandshakeState::Established
    }

    /// Diagnostic for the failure that latched the session, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn transcript(&self) -> &[u8] {
        self.handshake.transcript().as_bytes()
    }

    pub fn send_nonce(&self) -> u64 {
        self.sender.as_ref().map_or(0, SessionSender::nonce)
    }

    pub fn recv_nonce(&self) -> u64 {
        self.receiver.as_ref().map_or(0, SessionReceiver::nonce)
    }

    /// First handshake message. Responders always get an empty message and
    /// keep their state.
    pub fn start_handshake(&mut self) -> Result<Vec<u8>> {
        let counts = self.role() == Role::Initiator && self.state() == HandshakeState::Init;
        if counts {
            self.metrics.record_handshake_attempt();
        }
        let result = self.handshake.start();
        self.settle(result)
    }

    /// Feed one complete handshake message from the peer and return the
    /// message to send back (empty when there is nothing to send).
    pub fn on_handshake_message(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if self.role() == Role::Responder && self.state() == HandshakeState::Init {
            self.metrics.record_handshake_attempt();
        }
        let result = self.handshake.read_message(message);
        self.settle(result)
    }

    fn settle(&mut self, result: Result<Vec<u8>>) -> Result<Vec<u8>> {
        match result {
            Ok(out) => {
                if self.is_established() {
                    self.commit();
                }
                Ok(out)
            }
            Err(PqNoiseError::SessionFailed) => Err(PqNoiseError::SessionFailed),
            Err(err) => {
                let reason = err.to_string();
                if let Some(class) = err.failure_class() {
                    self.metrics.record_handshake_failure(class, &reason);
                }
                tracing::debug!(role = %self.role(), error = %reason, "PQ session failed");
                self.last_error = Some(reason);
                Err(err)
            }
        }
    }

    /// Take the handshake's keys, if it still holds any. A single key set is
    /// installed at once; several wait for the peer's first frame.
    fn commit(&mut self) {
        let mut candidates = self.handshake.take_session_keys();
        match candidates.len() {
            0 => {}
            1 => {
                if let Some(keys) = candidates.pop() {
                    let (send, recv) = keys.into_ciphers();
                    self.install(send, recv);
                }
            }
            n => {
                tracing::debug!(
                    role = %self.role(),
                    candidates = n,
                    "PQ session awaiting key confirmation"
                );
                self.unconfirmed = candidates
                    .into_iter()
                    .map(SessionKeys::into_ciphers)
                    .collect();
            }
        }
    }

    /// Install both directional ciphers at once.
    fn install(&mut self, send: SendCipher, recv: RecvCipher) {
        let active = ActiveSession::start(self.metrics.clone());
        self.sender = Some(SessionSender {
            cipher: send,
            metrics: self.metrics.clone(),
            _active: active.clone(),
        });
        self.receiver = Some(SessionReceiver {
            cipher: recv,
            metrics: self.metrics.clone(),
            _active: active,
        });
        self.metrics.record_handshake_success();
    }

    /// Trial-open the first inbound frame under each candidate. The first that
    /// authenticates wins; if none does the session fails.
    fn confirm(&mut self, wire: &[u8], ad: &[u8]) -> Result<Vec<u8>> {
        let candidates = std::mem::take(&mut self.unconfirmed);
        for (index, (send, mut recv)) in candidates.into_iter().enumerate() {
            if let Ok(plaintext) = recv.open(ad, wire) {
                tracing::debug!(role = %self.role(), candidate = index, "PQ session key confirmed");
                self.install(send, recv);
                self.metrics.record_bytes_decrypted(plaintext.len());
                return Ok(plaintext);
            }
        }

        self.handshake.abort();
        let err = PqNoiseError::from(HandshakeError::KeyConfirmation);
        let reason = err.to_string();
        self.metrics
            .record_handshake_failure(FailureClass::Cryptographic, &reason);
        tracing::debug!(role = %self.role(), error = %reason, "PQ session failed");
        self.last_error = Some(reason);
        Err(err)
    }

    fn check_transport(&self) -> Result<()> {
        match self.state() {
            HandshakeState::Established => Ok(()),
            HandshakeState::Error => Err(PqNoiseError::SessionFailed),
            _ => Err(PqNoiseError::NotEstablished),
        }
    }

    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.seal_with_ad(plaintext, &[])
    }

    pub fn seal_with_ad(&mut self, plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>> {
        self.check_transport()?;
        if !self.unconfirmed.is_empty() {
            return Err(PqNoiseError::KeyUnconfirmed);
        }
        self.sender
            .as_mut()
            .ok_or(PqNoiseError::NotEstablished)?
            .seal_with_ad(plaintext, ad)
    }

    pub fn open(&mut self, wire: &[u8]) -> Result<Vec<u8>> {
        self.open_with_ad(wire, &[])
    }

    pub fn open_with_ad(&mut self, wire: &[u8], ad: &[u8]) -> Result<Vec<u8>> {
        self.check_transport()?;
        if !self.unconfirmed.is_empty() {
            return self.confirm(wire, ad);
        }
        self.receiver
            .as_mut()
            .ok_or(PqNoiseError::NotEstablished)?
            .open_with_ad(wire, ad)
    }

    /// Separate the outbound and inbound paths so they can run on different
    /// threads. Only available once established and confirmed.
    pub fn into_split(mut self) -> Result<(SessionSender, SessionReceiver)> {
        self.check_transport()?;
        if !self.unconfirmed.is_empty() {
            return Err(PqNoiseError::KeyUnconfirmed);
        }
        match (self.sender.take(), self.receiver.take()) {
            (Some(sender), Some(receiver)) => Ok((sender, receiver)),
            _ => Err(PqNoiseError::NotEstablished),
        }
    }
}

/// Complete a handshake between two in-memory sessions, in either mode.
pub fn connect_pair(
    initiator: PqNoiseConfig,
    responder: PqNoiseConfig,
) -> Result<(PqNoiseSession, PqNoiseSession)> {
    let mut i = PqNoiseSession::initiator(initiator);
    let mut r = PqNoiseSession::responder(responder);
    r.start_handshake()?;
    let mut message = i.start_handshake()?;
    while !message.is_empty() {
        message = r.on_handshake_message(&message)?;
        if message.is_empty() {
            break;
        }
        message = i.on_handshake_message(&message)?;
    }
    Ok((i, r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::ephemeral_responder_config;
    use crate::metrics::PqMetrics;
    use crate::types::{NONCE_PREFIX_LEN, TRANSPORT_OVERHEAD};

    fn configs(metrics: &Arc<PqMetrics>) -> (PqNoiseConfig, PqNoiseConfig) {
        let server = ephemeral_responder_config().with_metrics(metrics.clone());
        (server.public_view(), server)
    }

    /// A server that rotated away from a retired KEM key, a client still
    /// pinned to the retired public key, and one holding the current key.
    fn rotated(metrics: &Arc<PqMetrics>) -> (PqNoiseConfig, PqNoiseConfig, PqNoiseConfig) {
        use crypto::ml_kem::MlKemKeyPair;
        use crypto::traits::KemKeyPair;
        let retired = MlKemKeyPair::generate_deterministic(b"session-retired-kem");
        let (current_client, server) = configs(metrics);
        let stale_client = PqNoiseConfig::initiator(
            retired.public_key().clone(),
            server.keys.sig_public.clone().unwrap(),
        )
        .with_metrics(metrics.clone());
        let server = server.with_previous_kem_secret(retired.secret_key().clone());
        (stale_client, current_client, server)
    }

    #[test]
    fn test_secure_session_round_trip() {
        let metrics = Arc::new(PqMetrics::new());
        let (client, server) = configs(&metrics);
        let (mut initiator, mut responder) = connect_pair(client, server).unwrap();

        assert!(initiator.is_established());
        assert!(responder.is_established());
        assert_eq!(initiator.transcript(), responder.transcript());

        let wire = initiator.seal(b"ping").unwrap();
        assert_eq!(wire.len(), 4 + TRANSPORT_OVERHEAD);
        assert_eq!(responder.open(&wire).unwrap(), b"ping");

        let wire = responder.seal(b"pong").unwrap();
        assert_eq!(initiator.open(&wire).unwrap(), b"pong");

        assert_eq!(initiator.send_nonce(), 1);
        assert_eq!(initiator.recv_nonce(), 1);

        let snap = metrics.snapshot();
        assert_eq!(snap.handshakes_attempted, 2);
        assert_eq!(snap.handshakes_successful, 2);
        assert_eq!(snap.bytes_encrypted, 8);
        assert_eq!(snap.bytes_decrypted, 8);
        assert_eq!(snap.sessions_active, 2);
    }

    #[test]
    fn test_session_stats_follow_lifetime() {
        let metrics = Arc::new(PqMetrics::new());
        let (client, server) = configs(&metrics);
        let (initiator, responder) = connect_pair(client, server).unwrap();
        assert_eq!(metrics.sessions_active(), 2);

        drop(responder);
        assert_eq!(metrics.sessions_active(), 1);

        let (sender, receiver) = initiator.into_split().unwrap();
        assert_eq!(metrics.sessions_active(), 1);
        drop(sender);
        assert_eq!(metrics.sessions_active(), 1);
        drop(receiver);
        assert_eq!(metrics.sessions_active(), 0);
    }

    #[test]
    fn transport_before_established_is_refused() {
        let metrics = Arc::new(PqMetrics::new());
        let (client, _) = configs(&metrics);
        let mut session = PqNoiseSession::initiator(client);
        assert!(matches!(
            session.seal(b"early"),
            Err(PqNoiseError::NotEstablished)
        ));
        session.start_handshake().unwrap();
        assert!(matches!(
            session.open(&[0u8; 32]),
            Err(PqNoiseError::NotEstablished)
        ));
        assert!(session.into_split().is_err());
    }

    #[test]
    fn failed_open_does_not_latch() {
        let metrics = Arc::new(PqMetrics::new());
        let (client, server) = configs(&metrics);
        let (mut initiator, mut responder) = connect_pair(client, server).unwrap();

        let wire = initiator.seal(b"data").unwrap();
        let mut bad = wire.clone();
        *bad.last_mut().unwrap() ^= 1;
        assert!(matches!(
            responder.open(&bad),
            Err(PqNoiseError::TransportAuth)
        ));
        assert_eq!(responder.state(), HandshakeState::Established);
        assert_eq!(responder.recv_nonce(), 0);
        assert_eq!(responder.open(&wire).unwrap(), b"data");
        assert_eq!(metrics.snapshot().transport_auth_failures, 1);
    }

    #[test]
    fn failure_latches_and_records_reason() {
        let metrics = Arc::new(PqMetrics::new());
        let (_, server) = configs(&metrics);
        let mut responder = PqNoiseSession::responder(server);
        assert!(responder.on_handshake_message(b"garbage").is_err());
        assert_eq!(responder.state(), HandshakeState::Error);
        let reason = responder.last_error().unwrap().to_string();
        assert!(!reason.is_empty());

        assert!(matches!(
            responder.on_handshake_message(b"again"),
            Err(PqNoiseError::SessionFailed)
        ));
        assert_eq!(responder.last_error(), Some(reason.as_str()));
        assert!(matches!(
            responder.seal(b"x"),
            Err(PqNoiseError::SessionFailed)
        ));

        let snap = metrics.snapshot();
        assert_eq!(snap.handshakes_attempted, 1);
        assert_eq!(snap.handshakes_failed, 1);
        assert_eq!(snap.malformed_failures, 1);
    }

    #[test]
    fn responder_start_after_establishing_changes_nothing() {
        let metrics = Arc::new(PqMetrics::new());
        let (client, server) = configs(&metrics);
        let (mut initiator, mut responder) = connect_pair(client, server).unwrap();

        assert!(responder.start_handshake().unwrap().is_empty());
        assert_eq!(responder.state(), HandshakeState::Established);
        assert!(responder.last_error().is_none());
        let wire = initiator.seal(b"still").unwrap();
        assert_eq!(responder.open(&wire).unwrap(), b"still");
        assert_eq!(metrics.snapshot().handshakes_failed, 0);
    }

    #[test]
    fn stale_client_is_confirmed_by_its_first_frame() {
        let metrics = Arc::new(PqMetrics::new());
        let (stale_client, _, server) = rotated(&metrics);
        let (mut initiator, mut responder) = connect_pair(stale_client, server).unwrap();

        assert!(responder.is_established());
        assert_eq!(metrics.snapshot().handshakes_successful, 1);
        assert!(matches!(
            responder.seal(b"too early"),
            Err(PqNoiseError::KeyUnconfirmed)
        ));

        let first = initiator.seal(b"old key").unwrap();
        assert_eq!(responder.open(&first).unwrap(), b"old key");
        assert_eq!(responder.recv_nonce(), 1);
        let answer = responder.seal(b"confirmed").unwrap();
        assert_eq!(initiator.open(&answer).unwrap(), b"confirmed");

        let snap = metrics.snapshot();
        assert_eq!(snap.handshakes_successful, 2);
        assert_eq!(snap.sessions_active, 2);
        assert_eq!(snap.bytes_decrypted, 7 + 9);
    }

    #[test]
    fn current_client_still_works_next_to_a_retired_key() {
        let metrics = Arc::new(PqMetrics::new());
        let (_, current_client, server) = rotated(&metrics);
        let (_, responder) = connect_pair(current_client.clone(), server.clone()).unwrap();
        assert!(matches!(
            responder.into_split(),
            Err(PqNoiseError::KeyUnconfirmed)
        ));

        let (mut initiator, mut responder) = connect_pair(current_client, server).unwrap();
        let wire = initiator.seal(b"new key").unwrap();
        assert_eq!(responder.open(&wire).unwrap(), b"new key");
        let (mut tx, _rx) = responder.into_split().unwrap();
        assert_eq!(initiator.open(&tx.seal(b"ok").unwrap()).unwrap(), b"ok");
    }

    #[test]
    fn unconfirmable_first_frame_fails_the_session() {
        let metrics = Arc::new(PqMetrics::new());
        let (stale_client, _, server) = rotated(&metrics);
        let (mut initiator, mut responder) = connect_pair(stale_client, server).unwrap();

        let mut wire = initiator.seal(b"tampered").unwrap();
        wire[NONCE_PREFIX_LEN] ^= 0x01;
        assert!(matches!(
            responder.open(&wire),
            Err(PqNoiseError::Handshake(HandshakeError::KeyConfirmation))
        ));
        assert_eq!(responder.state(), HandshakeState::Error);
        assert!(responder.last_error().is_some());
        assert!(matches!(
            responder.open(&wire),
            Err(PqNoiseError::SessionFailed)
        ));

        let snap = metrics.snapshot();
        assert_eq!(snap.handshakes_failed, 1);
        assert_eq!(snap.crypto_failures, 1);
        assert_eq!(snap.sessions_active, 1);
    }

    #[test]
    fn ephemeral_mode_sessions_exchange_traffic() {
        use crate::types::HandshakeMode;
        let metrics = Arc::new(PqMetrics::new());
        let (client, server) = configs(&metrics);
        let (mut initiator, mut responder) = connect_pair(
            client.with_mode(HandshakeMode::EphemeralKem),
            server.with_mode(HandshakeMode::EphemeralKem),
        )
        .unwrap();

        assert_eq!(initiator.transcript(), responder.transcript());
        let wire = initiator.seal(b"ping").unwrap();
        assert_eq!(responder.open(&wire).unwrap(), b"ping");
        let wire = responder.seal(b"pong").unwrap();
        assert_eq!(initiator.open(&wire).unwrap(), b"pong");

        let snap = metrics.snapshot();
        assert_eq!(snap.handshakes_attempted, 2);
        assert_eq!(snap.handshakes_successful, 2);
    }

    #[test]
    fn split_halves_work_across_threads() {
        let metrics = Arc::new(PqMetrics::new());
        let (client, server) = configs(&metrics);
        let (initiator, responder) = connect_pair(client, server).unwrap();
        let (mut i_send, _i_recv) = initiator.into_split().unwrap();
        let (_r_send, mut r_recv) = responder.into_split().unwrap();

        let producer = std::thread::spawn(move || {
            (0..16u8)
                .map(|i| i_send.seal(&[i; 3]).unwrap())
                .collect::<Vec<_>>()
        });
        for (i, wire) in producer.join().unwrap().into_iter().enumerate() {
            assert_eq!(r_recv.open(&wire).unwrap(), vec![i as u8; 3]);
        }
        assert_eq!(r_recv.nonce(), 16);
    }
}
