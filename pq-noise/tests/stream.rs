//! `PqTransport` over real sockets and in-memory pipes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pq_noise::handshake::ephemeral_responder_config;
use pq_noise::{
    KeyStore, PqMetrics, PqNoiseConfig, PqNoiseError, PqNoiseSession, PqTransport, Role,
};
use serde::{Deserialize, Serialize};
use tokio::io::duplex;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Request {
    Ping(u64),
    Put { key: String, value: Vec<u8> },
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn keystore_backed_server_over_tcp() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let metrics = Arc::new(PqMetrics::new());
    let store = KeyStore::open(dir.path())
        .unwrap()
        .with_metrics(metrics.clone());

    let server = PqTransport::new(
        PqNoiseConfig::from_keystore(&store, Role::Responder)
            .unwrap()
            .with_verbose_logging(),
    );
    let client = PqTransport::new(PqNoiseConfig::from_keystore(&store, Role::Initiator).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server_task = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut stream = server.upgrade_inbound(socket).await.unwrap();
        while let Some(request) = stream.recv_message::<Request>().await.unwrap() {
            stream.send_message(&request).await.unwrap();
        }
        stream.bytes_received()
    });

    let socket = TcpStream::connect(addr).await.unwrap();
    let mut stream = client.upgrade_outbound(socket).await.unwrap();
    assert_eq!(stream.role(), Role::Initiator);
    assert!(stream.session().is_established());

    let requests = vec![
        Request::Ping(7),
        Request::Put {
            key: "validator".into(),
            value: vec![0xAA; 2048],
        },
    ];
    for request in &requests {
        stream.send_message(request).await.unwrap();
        let echoed: Request = stream.recv_message().await.unwrap().unwrap();
        assert_eq!(&echoed, request);
    }
    let sent = stream.bytes_sent();
    stream.close().await.unwrap();

    let received = server_task.await.unwrap();
    assert_eq!(received, sent);

    let snap = metrics.snapshot();
    assert_eq!(snap.handshakes_successful, 2);
    assert_eq!(snap.handshakes_failed, 0);
}

#[tokio::test]
async fn tampered_frame_kills_the_stream() {
    let metrics = Arc::new(PqMetrics::new());
    let server_config = ephemeral_responder_config().with_metrics(metrics.clone());
    let mut raw_client = PqNoiseSession::initiator(server_config.public_view());
    let server = PqTransport::new(server_config);

    let (client_io, server_io) = duplex(64 * 1024);
    let server_task = tokio::spawn(async move {
        let mut stream = server.upgrade_inbound(server_io).await.unwrap();
        let first = stream.recv().await.unwrap();
        let second = stream.recv().await;
        let third = stream.recv().await;
        let send_after = stream.send(b"too late").await;
        (first, second, third, send_after)
    });

    // Drive the handshake by hand so the transport frames can be corrupted.
    let mut framed = Framed::new(client_io, LengthDelimitedCodec::new());
    framed
        .send(Bytes::from(raw_client.start_handshake().unwrap()))
        .await
        .unwrap();
    let reply = framed.next().await.unwrap().unwrap();
    raw_client.on_handshake_message(&reply).unwrap();

    framed
        .send(Bytes::from(raw_client.seal(b"clean").unwrap()))
        .await
        .unwrap();
    let mut bad = raw_client.seal(b"dirty").unwrap();
    let last = bad.len() - 1;
    bad[last] ^= 0x01;
    framed.send(Bytes::from(bad)).await.unwrap();

    let (first, second, third, send_after) = server_task.await.unwrap();
    assert_eq!(first.as_deref(), Some(&b"clean"[..]));
    assert!(matches!(second, Err(PqNoiseError::TransportAuth)));
    assert!(matches!(third, Err(PqNoiseError::SessionFailed)));
    assert!(matches!(send_after, Err(PqNoiseError::SessionFailed)));
    assert_eq!(metrics.snapshot().transport_auth_failures, 1);
}

#[tokio::test]
async fn client_with_wrong_identity_is_refused() {
    let server = ephemeral_responder_config();
    let impostor = ephemeral_responder_config();
    // KEM key from the real server, identity from someone else.
    let client_config = PqNoiseConfig::initiator(
        server.keys.kem_public.clone(),
        impostor.keys.sig_public.clone().unwrap(),
    );
    let client_metrics = client_config.metrics.clone();
    let server = PqTransport::new(server);
    let client = PqTransport::new(client_config);

    let (a, b) = duplex(64 * 1024);
    let (client_result, server_result) =
        tokio::join!(client.upgrade_outbound(a), server.upgrade_inbound(b));
    assert!(server_result.is_ok());
    assert!(matches!(
        client_result.err(),
        Some(PqNoiseError::Handshake(
            pq_noise::HandshakeError::InvalidSignature
        ))
    ));
    assert!(client_metrics.snapshot().crypto_failures >= 1);
}

#[tokio::test]
async fn silent_peer_hits_the_deadline() {
    let metrics = Arc::new(PqMetrics::new());
    let server = PqTransport::new(
        ephemeral_responder_config()
            .with_metrics(metrics.clone())
            .with_timeout(Duration::from_millis(50)),
    );
    // Keep the client half open but never write.
    let (_client_io, server_io) = duplex(1024);
    let result = server.upgrade_inbound(server_io).await;
    assert!(matches!(result.err(), Some(PqNoiseError::Timeout)));
    assert_eq!(metrics.snapshot().handshakes_failed, 1);
}

#[tokio::test]
async fn client_on_a_rotated_key_is_served_over_a_stream() {
    let dir = tempfile::tempdir().unwrap();
    let metrics = Arc::new(PqMetrics::new());
    let store = KeyStore::open(dir.path())
        .unwrap()
        .with_metrics(metrics.clone());
    let stale_config = PqNoiseConfig::from_keystore(&store, Role::Initiator).unwrap();
    store.rotate_kem().unwrap();

    let server = PqTransport::new(PqNoiseConfig::from_keystore(&store, Role::Responder).unwrap());
    let client = PqTransport::new(stale_config);
    let (a, b) = duplex(64 * 1024);
    let (client_result, server_result) =
        tokio::join!(client.upgrade_outbound(a), server.upgrade_inbound(b));
    let (mut client, mut server) = (client_result.unwrap(), server_result.unwrap());

    // The server answers only after the client's first frame picks the key.
    assert!(matches!(
        server.send(b"premature").await,
        Err(PqNoiseError::KeyUnconfirmed)
    ));
    client.send_message(&Request::Ping(1)).await.unwrap();
    let request: Request = server.recv_message().await.unwrap().unwrap();
    assert_eq!(request, Request::Ping(1));
    server.send_message(&Request::Ping(2)).await.unwrap();
    assert_eq!(
        client.recv_message::<Request>().await.unwrap(),
        Some(Request::Ping(2))
    );
    assert_eq!(metrics.snapshot().handshakes_successful, 2);
}
