//! Process-wide handshake and transport counters.
//!
//! Every update is a relaxed atomic add: recording never blocks, never fails
//! and never contends with the seal/open hot path.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::types::SUITE;

/// Why a handshake failed, at the granularity operators care about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    /// Bad magic, bad version, truncated or mis-sized fields.
    Malformed,
    /// Decapsulation or signature verification failed.
    Cryptographic,
    /// Message out of order, peer rejection, connection dropped.
    Protocol,
    /// Required local key material missing.
    Configuration,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Malformed => "malformed",
            FailureClass::Cryptographic => "cryptographic",
            FailureClass::Protocol => "protocol",
            FailureClass::Configuration => "configuration",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct PqMetrics {
    handshakes_attempted: AtomicU64,
    handshakes_successful: AtomicU64,
    handshakes_failed: AtomicU64,
    malformed_failures: AtomicU64,
    crypto_failures: AtomicU64,
    config_failures: AtomicU64,
    bytes_encrypted: AtomicU64,
    bytes_decrypted: AtomicU64,
    transport_auth_failures: AtomicU64,
    rekeys_performed: AtomicU64,
    sessions_active: AtomicU64,
    mlkem1024_handshakes: AtomicU64,
    chacha20poly1305_sessions: AtomicU64,
}

static GLOBAL: OnceLock<Arc<PqMetrics>> = OnceLock::new();

impl PqMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every session that was not given its own.
    pub fn global() -> Arc<PqMetrics> {
        GLOBAL.get_or_init(|| Arc::new(PqMetrics::new())).clone()
    }

    pub fn record_handshake_attempt(&self) {
        self.handshakes_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_success(&self) {
        self.handshakes_successful.fetch_add(1, Ordering::Relaxed);
        self.mlkem1024_handshakes.fetch_add(1, Ordering::Relaxed);
        tracing::info!(suite = SUITE, "PQ handshake successful");
    }

    pub fn record_handshake_failure(&self, class: FailureClass, reason: &str) {
        self.handshakes_failed.fetch_add(1, Ordering::Relaxed);
        match class {
            FailureClass::Malformed => {
                self.malformed_failures.fetch_add(1, Ordering::Relaxed);
            }
            FailureClass::Cryptographic => {
                self.crypto_failures.fetch_add(1, Ordering::Relaxed);
            }
            FailureClass::Configuration => {
                self.config_failures.fetch_add(1, Ordering::Relaxed);
            }
            FailureClass::Protocol => {}
        }
        tracing::warn!(class = %class, reason, "PQ handshake failed");
    }

    pub fn record_bytes_encrypted(&self, bytes: usize) {
        self.bytes_encrypted
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_bytes_decrypted(&self, bytes: usize) {
        self.bytes_decrypted
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_transport_failure(&self) {
        self.transport_auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rekey(&self) {
        self.rekeys_performed.fetch_add(1, Ordering::Relaxed);
        tracing::info!("PQ key rotation performed");
    }

    pub fn record_session_start(&self) {
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
        self.chacha20poly1305_sessions
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero so a stray end after `reset` cannot wrap.
    pub fn record_session_end(&self) {
        let _ = self
            .sessions_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn sessions_active(&self) -> u64 {
        self.sessions_active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            handshakes_attempted: self.handshakes_attempted.load(Ordering::Relaxed),
            handshakes_successful: self.handshakes_successful.load(Ordering::Relaxed),
            handshakes_failed: self.handshakes_failed.load(Ordering::Relaxed),
            malformed_failures: self.malformed_failures.load(Ordering::Relaxed),
            crypto_failures: self.crypto_failures.load(Ordering::Relaxed),
            config_failures: self.config_failures.load(Ordering::Relaxed),
            bytes_encrypted: self.bytes_encrypted.load(Ordering::Relaxed),
            bytes_decrypted: self.bytes_decrypted.load(Ordering::Relaxed),
            transport_auth_failures: self.transport_auth_failures.load(Ordering::Relaxed),
            rekeys_performed: self.rekeys_performed.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            mlkem1024_handshakes: self.mlkem1024_handshakes.load(Ordering::Relaxed),
            chacha20poly1305_sessions: self.chacha20poly1305_sessions.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter. Intended for test harnesses.
    pub fn reset(&self) {
        for counter in [
            &self.handshakes_attempted,
            &self.handshakes_successful,
            &self.handshakes_failed,
            &self.malformed_failures,
            &self.crypto_failures,
            &self.config_failures,
            &self.bytes_encrypted,
            &self.bytes_decrypted,
            &self.transport_auth_failures,
            &self.rekeys_performed,
            &self.sessions_active,
            &self.mlkem1024_handshakes,
            &self.chacha20poly1305_sessions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub handshakes_attempted: u64,
    pub handshakes_successful: u64,
    pub handshakes_failed: u64,
    pub malformed_failures: u64,
    pub crypto_failures: u64,
    pub config_failures: u64,
    pub bytes_encrypted: u64,
    pub bytes_decrypted: u64,
    pub transport_auth_failures: u64,
    pub rekeys_performed: u64,
    pub sessions_active: u64,
    pub mlkem1024_handshakes: u64,
    pub chacha20poly1305_sessions: u64,
}

impl MetricsSnapshot {
    pub fn to_map(&self) -> BTreeMap<&'static str, u64> {
        BTreeMap::from([
            ("handshakes_attempted", self.handshakes_attempted),
            ("handshakes_successful", self.handshakes_successful),
            ("handshakes_failed", self.handshakes_failed),
            ("malformed_failures", self.malformed_failures),
            ("crypto_failures", self.crypto_failures),
            ("config_failures", self.config_failures),
            ("bytes_encrypted", self.bytes_encrypted),
            ("bytes_decrypted", self.bytes_decrypted),
            ("transport_auth_failures", self.transport_auth_failures),
            ("rekeys_performed", self.rekeys_performed),
            ("sessions_active", self.sessions_active),
            ("mlkem1024_handshakes", self.mlkem1024_handshakes),
            ("chacha20poly1305_sessions", self.chacha20poly1305_sessions),
        ])
    }
}
