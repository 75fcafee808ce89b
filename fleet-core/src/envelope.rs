//! Payload encryption per §4.2: AES-256-GCM sealing of the JSON report body,
//! with `machine_id` as associated data. Grounded on the AEAD usage pattern in
//! the pack's `quantum_forge_secure_comms` crate (`crypto_protocols.rs`),
//! simplified to the spec's fixed envelope shape instead of an encapsulated
//! per-message key.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("decrypt_failed")]
    DecryptFailed,
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// The sealed wire envelope. `encrypted: false` carries the plaintext report
/// body directly in `ciphertext` as a JSON string so both modes share one
/// envelope shape on the wire (nonce/tag are empty strings in that case).
///
/// `machine_id` travels alongside the ciphertext in cleartext — it is the
/// AEAD's associated data, not a secret, but the server needs it up front to
/// know *which* AAD to open with before it has seen the plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub machine_id: String,
    pub encrypted: bool,
    pub version: u8,
    #[serde(default)]
    pub nonce: String,
    pub ciphertext: String,
    #[serde(default)]
    pub tag: String,
}

/// Decode a base64 32-byte key from agent/server configuration.
pub fn decode_key(b64: &str) -> Result<[u8; KEY_LEN], EncryptError> {
    let bytes = BASE64
        .decode(b64)
        .map_err(|e| EncryptError::MalformedEnvelope(e.to_string()))?;
    if bytes.len() != KEY_LEN {
        return Err(EncryptError::InvalidKeyLength(bytes.len()));
    }
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Constant-time comparison of two raw keys, for mismatch detection without
/// leaking timing (used when agent and server both advertise a key so a
/// future handshake could verify agreement without transmitting it).
pub fn keys_equal(a: &[u8; KEY_LEN], b: &[u8; KEY_LEN]) -> bool {
    a.ct_eq(b).into()
}

/// Seal `plaintext` (the serialized report body) under `key`, with
/// `machine_id` as associated data. A fresh random 12-byte nonce is drawn
/// per call — nonces are never reused under a given key.
pub fn seal(plaintext: &[u8], key: &[u8; KEY_LEN], machine_id: &str) -> Envelope {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let sealed = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: machine_id.as_bytes(),
            },
        )
        .expect("AES-256-GCM encryption of a bounded in-memory payload cannot fail");

    let split_at = sealed.len() - TAG_LEN;
    let (ciphertext, tag) = sealed.split_at(split_at);

    Envelope {
        machine_id: machine_id.to_string(),
        encrypted: true,
        version: 1,
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
        tag: BASE64.encode(tag),
    }
}

/// Wrap `plaintext` unencrypted, for the no-key bypass path.
pub fn wrap_plaintext(plaintext: &[u8], machine_id: &str) -> Envelope {
    Envelope {
        machine_id: machine_id.to_string(),
        encrypted: false,
        version: 1,
        nonce: String::new(),
        ciphertext: String::from_utf8_lossy(plaintext).into_owned(),
        tag: String::new(),
    }
}

/// Open a sealed envelope, using `envelope.machine_id` as the AEAD
/// associated data. Rejects on tag mismatch, wrong key, wrong AAD, or a
/// malformed envelope — never falls back to treating it as plaintext.
pub fn open(envelope: &Envelope, key: &[u8; KEY_LEN]) -> Result<Vec<u8>, EncryptError> {
    let machine_id = envelope.machine_id.as_str();
    if !envelope.encrypted {
        return Err(EncryptError::MalformedEnvelope(
            "open() called on a plaintext envelope".into(),
        ));
    }

    let nonce_bytes = BASE64
        .decode(&envelope.nonce)
        .map_err(|e| EncryptError::MalformedEnvelope(e.to_string()))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(EncryptError::MalformedEnvelope("nonce must be 12 bytes".into()));
    }
    let ciphertext = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| EncryptError::MalformedEnvelope(e.to_string()))?;
    let tag = BASE64
        .decode(&envelope.tag)
        .map_err(|e| EncryptError::MalformedEnvelope(e.to_string()))?;
    if tag.len() != TAG_LEN {
        return Err(EncryptError::MalformedEnvelope("tag must be 16 bytes".into()));
    }

    let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
    sealed.extend_from_slice(&ciphertext);
    sealed.extend_from_slice(&tag);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&nonce_bytes);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &sealed,
                aad: machine_id.as_bytes(),
            },
        )
        .map_err(|_| EncryptError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> [u8; KEY_LEN] {
        [byte; KEY_LEN]
    }

    #[test]
    fn seal_then_open_round_trips() {
        let k = key(7);
        let plaintext = br#"{"machine_id":"mac-01"}"#;
        let env = seal(plaintext, &k, "mac-01");
        let opened = open(&env, &k).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn wrong_key_fails_decrypt() {
        let k1 = key(1);
        let k2 = key(2);
        let env = seal(b"payload", &k1, "mac-01");
        let err = open(&env, &k2).unwrap_err();
        assert!(matches!(err, EncryptError::DecryptFailed));
    }

    #[test]
    fn wrong_aad_fails_decrypt() {
        let k = key(3);
        let mut env = seal(b"payload", &k, "mac-01");
        env.machine_id = "mac-02".to_string();
        let err = open(&env, &k).unwrap_err();
        assert!(matches!(err, EncryptError::DecryptFailed));
    }

    #[test]
    fn tampered_ciphertext_fails_decrypt() {
        let k = key(9);
        let mut env = seal(b"payload", &k, "mac-01");
        let mut raw = BASE64.decode(&env.ciphertext).unwrap();
        raw[0] ^= 0xFF;
        env.ciphertext = BASE64.encode(raw);
        let err = open(&env, &k).unwrap_err();
        assert!(matches!(err, EncryptError::DecryptFailed));
    }

    #[test]
    fn nonces_are_not_reused_across_calls() {
        let k = key(4);
        let a = seal(b"same payload", &k, "mac-01");
        let b = seal(b"same payload", &k, "mac-01");
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn decode_key_rejects_wrong_length() {
        let short = BASE64.encode([1u8; 16]);
        assert!(matches!(
            decode_key(&short),
            Err(EncryptError::InvalidKeyLength(16))
        ));
    }
}
