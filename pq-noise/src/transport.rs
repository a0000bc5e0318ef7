//! Async driver running the handshake and sealed transport over a stream.
//!
//! Frames are length-delimited. Only reliable, ordered byte streams (TCP, Unix
//! sockets, in-memory pipes) are supported: the receive side accepts nonces
//! strictly in sequence.

use std::time::{Duration, Instant};

use bincode::Options;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::config::PqNoiseConfig;
use crate::error::{HandshakeError, PqNoiseError, Result};
use crate::metrics::FailureClass;
use crate::session::PqNoiseSession;
use crate::types::{Role, SUITE, TRANSPORT_OVERHEAD};

/// PQ-secure transport layer for establishing secure connections
pub struct PqTransport {
    config: PqNoiseConfig,
}

impl PqTransport {
    /// Create a new PQ transport with the given configuration
    pub fn new(config: PqNoiseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PqNoiseConfig {
        &self.config
    }

    /// Upgrade a socket connection as the initiator
    pub async fn upgrade_outbound<S>(&self, socket: S) -> Result<SecureStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.with_deadline(Role::Initiator, self.do_initiator_handshake(socket))
            .await
    }

    /// Upgrade a socket connection as the responder
    pub async fn upgrade_inbound<S>(&self, socket: S) -> Result<SecureStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.with_deadline(Role::Responder, self.do_responder_handshake(socket))
            .await
    }

    async fn with_deadline<S, F>(&self, role: Role, handshake: F) -> Result<SecureStream<S>>
    where
        F: std::future::Future<Output = Result<SecureStream<S>>>,
    {
        match timeout(self.config.handshake_timeout, handshake).await {
            Ok(result) => result,
            Err(_) => {
                self.config
                    .metrics
                    .record_handshake_failure(FailureClass::Protocol, "handshake timed out");
                tracing::warn!(
                    role = %role,
                    timeout_ms = self.config.handshake_timeout.as_millis() as u64,
                    "PQ handshake timed out"
                );
                Err(PqNoiseError::Timeout)
            }
        }
    }

    fn framed<S>(&self, socket: S) -> Framed<S, LengthDelimitedCodec>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut codec = LengthDelimitedCodec::new();
        codec.set_max_frame_length(self.config.max_frame_len);
        Framed::new(socket, codec)
    }

    async fn do_initiator_handshake<S>(&self, socket: S) -> Result<SecureStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = self.framed(socket);
        let mut session = PqNoiseSession::initiator(self.config.clone());

        let hello = session.start_handshake()?;
        framed.send(Bytes::from(hello)).await?;

        if self.config.verbose_logging {
            tracing::debug!(mode = %self.config.mode, "Sent PQ hello");
        }

        self.drive(&mut framed, &mut session).await?;

        if self.config.verbose_logging {
            tracing::info!(
                server = %hex::encode(self.config.keys.kem_fingerprint()),
                suite = SUITE,
                "PQ handshake complete (initiator)"
            );
        }

        Ok(SecureStream::new(framed, session, &self.config))
    }

    async fn do_responder_handshake<S>(&self, socket: S) -> Result<SecureStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = self.framed(socket);
        let mut session = PqNoiseSession::responder(self.config.clone());
        session.start_handshake()?;

        self.drive(&mut framed, &mut session).await?;

        if self.config.verbose_logging {
            tracing::info!(suite = SUITE, "PQ handshake complete (responder)");
        }

        Ok(SecureStream::new(framed, session, &self.config))
    }

    /// Exchange handshake frames until the session is established. Works for
    /// both the two-message and the three-message flow.
    async fn drive<S>(
        &self,
        framed: &mut Framed<S, LengthDelimitedCodec>,
        session: &mut PqNoiseSession,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while !session.is_established() {
            let message = self.next_handshake_frame(framed).await?;
            if self.config.verbose_logging {
                tracing::debug!(len = message.len(), "Received PQ handshake message");
            }
            let reply = session.on_handshake_message(&message)?;
            if !reply.is_empty() {
                framed.send(Bytes::from(reply)).await?;
            }
        }
        Ok(())
    }

    async fn next_handshake_frame<S>(
        &self,
        framed: &mut Framed<S, LengthDelimitedCodec>,
    ) -> Result<bytes::BytesMut>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match framed.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(err)) => {
                self.config.metrics.record_handshake_failure(
                    FailureClass::Protocol,
                    "unreadable handshake frame",
                );
                Err(err.into())
            }
            None => {
                self.config.metrics.record_handshake_failure(
                    FailureClass::Protocol,
                    "connection closed during handshake",
                );
                Err(HandshakeError::ConnectionClosed.into())
            }
        }
    }
}

fn message_options(limit: usize) -> impl Options {
    bincode::DefaultOptions::new().with_limit(limit as u64)
}

/// An established, encrypted stream. Any authentication failure is fatal:
/// later calls return `SessionFailed`.
pub struct SecureStream<S> {
    stream: Framed<S, LengthDelimitedCodec>,
    session: PqNoiseSession,
    max_frame_len: usize,
    rekey: crate::config::RekeyPolicy,
    established_at: Instant,
    bytes_sent: u64,
    bytes_received: u64,
    failed: bool,
}

impl<S> SecureStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(
        stream: Framed<S, LengthDelimitedCodec>,
        session: PqNoiseSession,
        config: &PqNoiseConfig,
    ) -> Self {
        Self {
            stream,
            session,
            max_frame_len: config.max_frame_len,
            rekey: config.rekey,
            established_at: Instant::now(),
            bytes_sent: 0,
            bytes_received: 0,
            failed: false,
        }
    }

    pub fn role(&self) -> Role {
        self.session.role()
    }

    pub fn session(&self) -> &PqNoiseSession {
        &self.session
    }

    /// Plaintext bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Plaintext bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }

    /// Whether the stream has carried enough traffic, or lived long enough,
    /// that the caller should replace it with a fresh handshake.
    pub fn needs_rekey(&self) -> bool {
        self.rekey.should_rekey(self.bytes_sent, self.age())
    }

    /// Send an encrypted message
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.failed {
            return Err(PqNoiseError::SessionFailed);
        }
        let frame_len = data.len() + TRANSPORT_OVERHEAD;
        if frame_len > self.max_frame_len {
            return Err(PqNoiseError::FrameTooLarge {
                len: frame_len,
                max: self.max_frame_len,
            });
        }
        let sealed = self.session.seal(data)?;
        // The nonce is spent even if the write fails, so the stream cannot be
        // reused after an I/O error.
        if let Err(err) = self.stream.send(Bytes::from(sealed)).await {
            self.failed = true;
            return Err(err.into());
        }
        self.bytes_sent += data.len() as u64;
        Ok(())
    }

    /// Receive and decrypt a message. `None` on clean end of stream.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        if self.failed {
            return Err(PqNoiseError::SessionFailed);
        }
        match self.stream.next().await {
            Some(Ok(frame)) => match self.session.open(&frame) {
                Ok(plaintext) => {
                    self.bytes_received += plaintext.len() as u64;
                    Ok(Some(plaintext))
                }
                Err(err) => {
                    self.failed = true;
                    tracing::warn!(role = %self.role(), "PQ stream authentication failed");
                    Err(err)
                }
            },
            Some(Err(e)) => {
                self.failed = true;
                Err(e.into())
            }
            None => Ok(None),
        }
    }

    /// Send a serializable message
    pub async fn send_message<M: serde::Serialize>(&mut self, message: &M) -> Result<()> {
        let data = message_options(self.max_frame_len).serialize(message)?;
        self.send(&data).await
    }

    /// Receive and deserialize a message
    pub async fn recv_message<M: serde::de::DeserializeOwned>(&mut self) -> Result<Option<M>> {
        match self.recv().await? {
            Some(data) => Ok(Some(
                message_options(self.max_frame_len).deserialize(&data)?,
            )),
            None => Ok(None),
        }
    }

    /// Close the session gracefully
    pub async fn close(mut self) -> Result<()> {
        SinkExt::<Bytes>::close(&mut self.stream)
            .await
            .map_err(PqNoiseError::from)
    }
}
