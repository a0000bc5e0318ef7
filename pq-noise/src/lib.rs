//! Post-Quantum Noise Protocol
//!
//! A two-message handshake that establishes a ChaCha20-Poly1305 session from
//! a single ML-KEM-1024 encapsulation, authenticated by the responder's
//! ML-DSA-65 signature over the handshake transcript.
//!
//! # Protocol Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PQ Noise Handshake                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  1. ML-KEM-1024 Encaps  │  Initiator -> server KEM key      │
//! │  2. ML-KEM-1024 Decaps  │  Responder recovers shared secret │
//! │  3. HKDF-SHA3-512       │  Directional keys + session AD    │
//! │  4. ML-DSA-65 Sign      │  Responder signs the transcript   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! With [`HandshakeMode::EphemeralKem`] the responder instead signs a fresh
//! ML-KEM key per connection and the initiator encapsulates to it in a third
//! message, so a later leak of the server's long-term keys does not expose
//! recorded sessions.
//!
//! The handshake itself is not encrypted. After it completes every message is
//! `nonce_le(8) || ciphertext || tag(16)` and nonces must arrive strictly in
//! order, so the session needs a reliable ordered stream underneath.
//!
//! # Example
//!
//! ```rust,ignore
//! use pq_noise::{PqNoiseConfig, PqNoiseSession};
//!
//! let server_config = PqNoiseConfig::responder(kem_keypair, identity_keypair);
//! let client_config = server_config.public_view();
//!
//! let mut client = PqNoiseSession::initiator(client_config);
//! let mut server = PqNoiseSession::responder(server_config);
//!
//! let hello = client.start_handshake()?;
//! let reply = server.on_handshake_message(&hello)?;
//! client.on_handshake_message(&reply)?;
//!
//! let wire = client.seal(b"Hello, quantum world!")?;
//! assert_eq!(server.open(&wire)?, b"Hello, quantum world!");
//! ```

pub mod config;
pub mod error;
pub mod handshake;
pub mod keystore;
pub mod metrics;
pub mod noise;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{PqNoiseConfig, PqNoiseConfigBuilder, RekeyPolicy, ServerKeys};
pub use error::{ConfigError, HandshakeError, PqNoiseError};
pub use handshake::PqHandshake;
pub use keystore::{KeyRotationPolicy, KeyStore};
pub use metrics::{FailureClass, MetricsSnapshot, PqMetrics};
pub use session::{PqNoiseSession, SessionReceiver, SessionSender};
pub use transport::{PqTransport, SecureStream};
pub use types::{HandshakeMode, HandshakeState, Role};
