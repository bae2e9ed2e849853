//! Deterministic stand-in for the E2EE key store.
//!
//! Real identity keys are asymmetric. Here the "public key" of an identity
//! is simply the base64 of its private key, which keeps sender verification
//! meaningful (a packet signed by one identity fails against another's key)
//! without a key-agreement scheme in tests.
//!
//! - Signatures are HMAC-SHA256 under the identity key
//! - Control payloads are `nonce || AES-256-GCM(session key, tag || plaintext)`
//! - The session key is sealed with AES-256-GCM under the recipient identity
//!   key; `encrypted_mk` carries the nonce

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use call_engine::ports::CryptoProvider;
use common::secret::SecretBox;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

/// Length of an HMAC-SHA256 tag.
const TAG_LEN: usize = 32;

/// [`CryptoProvider`] backed by `ring` primitives.
#[derive(Default)]
pub struct MockCrypto {
    private_key: Option<Vec<u8>>,
    corrupt_session_keys: bool,
}

impl MockCrypto {
    /// Key store holding `private_key` as the local identity key.
    #[must_use]
    pub fn new(private_key: Vec<u8>) -> Self {
        Self {
            private_key: Some(private_key),
            corrupt_session_keys: false,
        }
    }

    /// Key store without a provisioned identity key.
    #[must_use]
    pub fn without_identity() -> Self {
        Self::default()
    }

    /// Make every session-key recovery fail.
    #[must_use]
    pub fn failing_session_keys(mut self) -> Self {
        self.corrupt_session_keys = true;
        self
    }

    /// Public key string published for `private_key`.
    #[must_use]
    pub fn public_key_of(private_key: &[u8]) -> String {
        BASE64.encode(private_key)
    }

    /// Seal `session_key` for the holder of `private_key`.
    ///
    /// Returns `(encrypted_key, encrypted_mk)` as carried by a start-call
    /// response.
    #[must_use]
    pub fn seal_session_key(private_key: &[u8], session_key: &[u8]) -> (Bytes, Bytes) {
        let nonce = random_nonce();
        let mut sealed = session_key.to_vec();
        aead_key(private_key)
            .seal_in_place_append_tag(nonce_from(&nonce), Aad::empty(), &mut sealed)
            .unwrap();
        (Bytes::from(sealed), Bytes::copy_from_slice(&nonce))
    }
}

impl CryptoProvider for MockCrypto {
    fn local_private_key(&self) -> Option<SecretBox<Vec<u8>>> {
        self.private_key
            .as_ref()
            .map(|key| SecretBox::new(Box::new(key.clone())))
    }

    fn decrypt_session_key(
        &self,
        private_key: &[u8],
        encrypted_key: &[u8],
        encrypted_mk: &[u8],
    ) -> Option<SecretBox<Vec<u8>>> {
        if self.corrupt_session_keys || encrypted_mk.len() != NONCE_LEN {
            return None;
        }
        let key = try_aead_key(private_key)?;
        let nonce = Nonce::try_assume_unique_for_key(encrypted_mk).ok()?;
        let mut in_out = encrypted_key.to_vec();
        let plaintext = key.open_in_place(nonce, Aad::empty(), &mut in_out).ok()?;
        Some(SecretBox::new(Box::new(plaintext.to_vec())))
    }

    fn sign(&self, private_key: &[u8], data: &[u8]) -> Vec<u8> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, private_key);
        hmac::sign(&key, data).as_ref().to_vec()
    }

    fn encrypt_control_message(
        &self,
        plaintext: &[u8],
        private_key: &[u8],
        session_key: &[u8],
        _timestamp: i64,
    ) -> Option<Vec<u8>> {
        let key = try_aead_key(session_key)?;
        let nonce = random_nonce();

        let mut in_out = self.sign(private_key, plaintext);
        in_out.extend_from_slice(plaintext);
        key.seal_in_place_append_tag(nonce_from(&nonce), Aad::empty(), &mut in_out)
            .ok()?;

        let mut packet = nonce.to_vec();
        packet.extend_from_slice(&in_out);
        Some(packet)
    }

    fn decrypt_control_message(
        &self,
        ciphertext: &[u8],
        sender_public_key: &str,
        session_key: &[u8],
    ) -> Option<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN {
            return None;
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        let key = try_aead_key(session_key)?;
        let nonce = Nonce::try_assume_unique_for_key(nonce).ok()?;
        let mut in_out = sealed.to_vec();
        let opened = key.open_in_place(nonce, Aad::empty(), &mut in_out).ok()?;

        if opened.len() < TAG_LEN {
            return None;
        }
        let (tag, plaintext) = opened.split_at(TAG_LEN);
        let sender_key = BASE64.decode(sender_public_key).ok()?;
        let verify_key = hmac::Key::new(hmac::HMAC_SHA256, &sender_key);
        hmac::verify(&verify_key, plaintext, tag).ok()?;
        Some(plaintext.to_vec())
    }
}

fn try_aead_key(key: &[u8]) -> Option<LessSafeKey> {
    UnboundKey::new(&AES_256_GCM, key).ok().map(LessSafeKey::new)
}

fn aead_key(key: &[u8]) -> LessSafeKey {
    try_aead_key(key).expect("test keys are 32 bytes")
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    SystemRandom::new().fill(&mut nonce).unwrap();
    nonce
}

fn nonce_from(bytes: &[u8; NONCE_LEN]) -> Nonce {
    Nonce::assume_unique_for_key(*bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    const ALICE: [u8; 32] = [0x11; 32];
    const BOB: [u8; 32] = [0x22; 32];
    const SESSION: [u8; 32] = [0x5a; 32];

    #[test]
    fn test_session_key_recovery() {
        let crypto = MockCrypto::new(ALICE.to_vec());
        let (key, mk) = MockCrypto::seal_session_key(&ALICE, &SESSION);

        let recovered = crypto.decrypt_session_key(&ALICE, &key, &mk).unwrap();
        assert_eq!(recovered.expose_secret().as_slice(), SESSION.as_slice());

        assert!(crypto.decrypt_session_key(&BOB, &key, &mk).is_none());
        assert!(MockCrypto::new(ALICE.to_vec())
            .failing_session_keys()
            .decrypt_session_key(&ALICE, &key, &mk)
            .is_none());
    }

    #[test]
    fn test_control_message_sender_is_verified() {
        let crypto = MockCrypto::without_identity();
        let packet = crypto
            .encrypt_control_message(b"{\"a\":1}", &ALICE, &SESSION, 0)
            .unwrap();

        let opened = crypto.decrypt_control_message(&packet, &MockCrypto::public_key_of(&ALICE), &SESSION);
        assert_eq!(opened.as_deref(), Some(b"{\"a\":1}".as_slice()));

        let forged = crypto.decrypt_control_message(&packet, &MockCrypto::public_key_of(&BOB), &SESSION);
        assert!(forged.is_none());
    }
}
