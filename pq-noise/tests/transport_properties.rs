//! Properties of the sealed transport once a session is established.

use std::sync::Arc;

use pq_noise::handshake::ephemeral_responder_config;
use pq_noise::session::connect_pair;
use pq_noise::types::{NONCE_PREFIX_LEN, TRANSPORT_OVERHEAD};
use pq_noise::{PqMetrics, PqNoiseError, PqNoiseSession};
use proptest::prelude::*;

fn established(metrics: &Arc<PqMetrics>) -> (PqNoiseSession, PqNoiseSession) {
    let server = ephemeral_responder_config().with_metrics(metrics.clone());
    connect_pair(server.public_view(), server).expect("handshake")
}

#[test]
fn sealed_length_around_the_kib_boundary() {
    let metrics = Arc::new(PqMetrics::new());
    let (mut i, mut r) = established(&metrics);

    for (expected_nonce, len) in [0usize, 1, 1023, 1024, 1025].into_iter().enumerate() {
        let payload: Vec<u8> = (0..len).map(|b| b as u8).collect();
        let wire = i.seal(&payload).unwrap();
        assert_eq!(wire.len(), len + TRANSPORT_OVERHEAD);
        assert_eq!(
            u64::from_le_bytes(wire[..NONCE_PREFIX_LEN].try_into().unwrap()),
            expected_nonce as u64
        );
        assert_eq!(r.open(&wire).unwrap(), payload);
    }
    assert_eq!(i.send_nonce(), 5);
    assert_eq!(r.recv_nonce(), 5);
}

#[test]
fn truncated_frames_are_rejected() {
    let metrics = Arc::new(PqMetrics::new());
    let (mut i, mut r) = established(&metrics);
    let wire = i.seal(b"hello").unwrap();

    for cut in [0, 1, NONCE_PREFIX_LEN, TRANSPORT_OVERHEAD - 1, wire.len() - 1] {
        assert!(matches!(
            r.open(&wire[..cut]),
            Err(PqNoiseError::TransportAuth)
        ));
    }
    assert_eq!(r.recv_nonce(), 0);
    // The untouched frame still opens afterwards.
    assert_eq!(r.open(&wire).unwrap(), b"hello");
    assert_eq!(metrics.snapshot().transport_auth_failures, 5);
}

#[test]
fn replay_and_reorder_are_rejected() {
    let metrics = Arc::new(PqMetrics::new());
    let (mut i, mut r) = established(&metrics);

    let first = i.seal(b"one").unwrap();
    let second = i.seal(b"two").unwrap();

    assert!(r.open(&second).is_err(), "skipped nonce");
    assert_eq!(r.open(&first).unwrap(), b"one");
    assert!(r.open(&first).is_err(), "replay");
    assert_eq!(r.open(&second).unwrap(), b"two");
}

#[test]
fn associated_data_must_match() {
    let metrics = Arc::new(PqMetrics::new());
    let (mut i, mut r) = established(&metrics);

    let wire = i.seal_with_ad(b"payload", b"channel-7").unwrap();
    assert!(r.open_with_ad(&wire, b"channel-8").is_err());
    assert!(r.open(&wire).is_err());
    assert_eq!(r.open_with_ad(&wire, b"channel-7").unwrap(), b"payload");
}

#[test]
fn frames_do_not_cross_sessions() {
    let metrics = Arc::new(PqMetrics::new());
    let server = ephemeral_responder_config().with_metrics(metrics.clone());
    let (mut a_i, _a_r) = connect_pair(server.public_view(), server.clone()).unwrap();
    let (_b_i, mut b_r) = connect_pair(server.public_view(), server).unwrap();

    // Same server keys, same nonce, different encapsulation.
    let wire = a_i.seal(b"for session a").unwrap();
    assert!(b_r.open(&wire).is_err());
}

#[test]
fn directions_use_distinct_keys() {
    let metrics = Arc::new(PqMetrics::new());
    let (mut i, mut r) = established(&metrics);

    let from_initiator = i.seal(b"mirror").unwrap();
    let from_responder = r.seal(b"mirror").unwrap();
    assert_ne!(from_initiator, from_responder);
    // A frame reflected back to its sender does not authenticate.
    assert!(i.open(&from_initiator).is_err());
}

#[test]
fn split_halves_keep_counting() {
    let metrics = Arc::new(PqMetrics::new());
    let (mut i, r) = established(&metrics);
    let (mut r_tx, mut r_rx) = r.into_split().unwrap();

    let wire = i.seal(b"before").unwrap();
    assert_eq!(r_rx.open(&wire).unwrap(), b"before");
    let reply = r_tx.seal(b"after").unwrap();
    assert_eq!(i.open(&reply).unwrap(), b"after");
    assert_eq!((r_tx.nonce(), r_rx.nonce()), (1, 1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn any_bit_flip_is_rejected_without_advancing(
        payload in proptest::collection::vec(any::<u8>(), 0..256),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let metrics = Arc::new(PqMetrics::new());
        let (mut i, mut r) = established(&metrics);

        let wire = i.seal(&payload).unwrap();
        let mut tampered = wire.clone();
        let at = index.index(tampered.len());
        tampered[at] ^= 1 << bit;

        prop_assert!(matches!(r.open(&tampered), Err(PqNoiseError::TransportAuth)));
        prop_assert_eq!(r.recv_nonce(), 0);
        prop_assert!(r.is_established());
        prop_assert_eq!(r.open(&wire).unwrap(), payload);
    }
}
