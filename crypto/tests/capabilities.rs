use pqnoise_crypto::aead::{AeadCipher, NONCE_LEN, TAG_LEN};
use pqnoise_crypto::kdf::derive;
use pqnoise_crypto::ml_dsa::{MlDsaKeyPair, ML_DSA_PUBLIC_KEY_LEN, ML_DSA_SIGNATURE_LEN};
use pqnoise_crypto::ml_kem::{
    MlKemKeyPair, MlKemPublicKey, ML_KEM_CIPHERTEXT_LEN, ML_KEM_PUBLIC_KEY_LEN,
    ML_KEM_SHARED_SECRET_LEN,
};
use pqnoise_crypto::traits::{
    KemKeyPair, KemPublicKey, KemSecretKey, Signature, SigningKey, VerifyKey,
};
use pqnoise_crypto::CryptoError;
use proptest::prelude::*;
use rand::rngs::OsRng;

/// Exercise a KEM purely through the capability traits.
fn kem_agrees<K>(keypair: &K) -> bool
where
    K: KemKeyPair,
    K::SharedSecret: PartialEq,
{
    let (ct, ss) = keypair
        .public_key()
        .encapsulate(&mut OsRng)
        .expect("encapsulation");
    let recovered = keypair.secret_key().decapsulate(&ct).expect("decapsulation");
    recovered == ss
}

#[test]
fn ml_kem_through_capability_traits() {
    let keypair = MlKemKeyPair::generate(&mut OsRng);
    assert!(kem_agrees(&keypair));

    // Initiator side only ever sees the serialized public key.
    let published = keypair.public_key().to_bytes();
    assert_eq!(published.len(), ML_KEM_PUBLIC_KEY_LEN);
    let pk = MlKemPublicKey::from_bytes(&published).expect("public key");
    let (ct, ss) = pk.encapsulate(&mut OsRng).expect("encapsulation");
    assert_eq!(ct.as_bytes().len(), ML_KEM_CIPHERTEXT_LEN);
    assert_eq!(ss.as_bytes().len(), ML_KEM_SHARED_SECRET_LEN);
    assert_eq!(keypair.secret_key().decapsulate(&ct).expect("decapsulation"), ss);
}

#[test]
fn ml_dsa_through_capability_traits() {
    let keypair = MlDsaKeyPair::generate(&mut OsRng);
    let transcript = [0xF9u8, 0xBE, 0xB4, 0xD9, 0x00, 0x01];
    let signature = keypair.secret.sign(&transcript);
    assert_eq!(signature.as_bytes().len(), ML_DSA_SIGNATURE_LEN);
    assert_eq!(keypair.public.to_bytes().len(), ML_DSA_PUBLIC_KEY_LEN);
    keypair
        .public
        .verify(&transcript, &signature)
        .expect("signature must verify");

    let other = MlDsaKeyPair::generate(&mut OsRng);
    assert_eq!(
        other.public.verify(&transcript, &signature),
        Err(CryptoError::VerificationFailed)
    );
}

#[test]
fn kdf_feeds_aead() {
    let okm = derive(b"PQNoise", b"shared secret", b"Keys", 64).expect("derive");
    let mut key = [0u8; 32];
    key.copy_from_slice(&okm[..32]);
    let cipher = AeadCipher::new(&key);
    let sealed = cipher.seal(&[0u8; NONCE_LEN], b"", b"ping").expect("seal");
    assert_eq!(sealed.len(), 4 + TAG_LEN);
    assert_eq!(cipher.open(&[0u8; NONCE_LEN], b"", &sealed).expect("open"), b"ping");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn aead_rejects_any_single_bit_flip(
        plaintext in proptest::collection::vec(any::<u8>(), 0..256),
        ad in proptest::collection::vec(any::<u8>(), 0..32),
        bit in any::<usize>(),
    ) {
        let cipher = AeadCipher::new(&[0x42u8; 32]);
        let nonce = [3u8; NONCE_LEN];
        let sealed = cipher.seal(&nonce, &ad, &plaintext).unwrap();
        prop_assert_eq!(cipher.open(&nonce, &ad, &sealed).unwrap(), plaintext);

        let mut tampered = sealed.clone();
        let idx = bit % (tampered.len() * 8);
        tampered[idx / 8] ^= 1 << (idx % 8);
        prop_assert_eq!(
            cipher.open(&nonce, &ad, &tampered).unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn aead_rejects_truncation(
        plaintext in proptest::collection::vec(any::<u8>(), 0..128),
        cut in 1usize..160,
    ) {
        let cipher = AeadCipher::new(&[0x24u8; 32]);
        let nonce = [5u8; NONCE_LEN];
        let sealed = cipher.seal(&nonce, b"", &plaintext).unwrap();
        let keep = sealed.len().saturating_sub(cut);
        prop_assert!(cipher.open(&nonce, b"", &sealed[..keep]).is_err());
    }
}
