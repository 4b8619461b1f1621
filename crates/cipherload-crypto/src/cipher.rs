use std::path::PathBuf;

use cipherload_core::record::{Record, RecordError};
use rand::rngs::OsRng;
use rsa::{traits::PublicKeyParts, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{envelope, keys::KeyPair};

/// PKCS#1 v1.5 padding consumes 11 bytes of every block.
pub const PKCS1_V15_OVERHEAD: usize = 11;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Plaintext does not fit in a single RSA block. Never truncated or chunked.
    #[error("payload of {len} bytes exceeds RSA capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },
    #[error("encrypt failed: {0}")]
    Encrypt(String),
    /// Wrong key, tampered or malformed ciphertext.
    #[error("decrypt failed: {0}")]
    Decrypt(String),
    #[error("decrypted payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("payload is not a valid record: {0}")]
    Record(#[from] RecordError),
    #[error("malformed envelope: {0}")]
    Envelope(String),
    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How records are sealed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CipherMode {
    /// Raw RSA PKCS#1 v1.5; payloads are capped at the key capacity.
    #[default]
    Rsa,
    /// AES-256-GCM payload with an RSA-wrapped data key; no size cap.
    Envelope,
}

/// Largest plaintext one PKCS#1 v1.5 block can carry for `key`.
pub fn capacity(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(PKCS1_V15_OVERHEAD)
}

/// RSA-encrypt raw bytes, rejecting anything above [`capacity`].
pub fn encrypt_bytes(plaintext: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    let capacity = capacity(public_key);
    if plaintext.len() > capacity {
        return Err(CryptoError::PayloadTooLarge {
            len: plaintext.len(),
            capacity,
        });
    }
    public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| CryptoError::Encrypt(e.to_string()))
}

pub fn decrypt_bytes(ciphertext: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    private_key
        .decrypt(Pkcs1v15Encrypt, ciphertext)
        .map_err(|e| CryptoError::Decrypt(e.to_string()))
}

/// Serialize `record` with [`Record::to_json_bytes`] and RSA-encrypt it.
pub fn encrypt(record: &Record, public_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    let plaintext = record.to_json_bytes()?;
    encrypt_bytes(&plaintext, public_key)
}

/// RSA-decrypt, UTF-8 decode and parse back into a record.
pub fn decrypt(ciphertext: &[u8], private_key: &RsaPrivateKey) -> Result<Record, CryptoError> {
    let plaintext = decrypt_bytes(ciphertext, private_key)?;
    parse_plaintext(plaintext)
}

pub(crate) fn parse_plaintext(plaintext: Vec<u8>) -> Result<Record, CryptoError> {
    let text = String::from_utf8(plaintext)?;
    Ok(Record::from_json_str(&text)?)
}

/// Keypair plus the sealing mode, passed down to everything that encrypts or decrypts.
#[derive(Debug, Clone)]
pub struct RecordCipher {
    keys: KeyPair,
    mode: CipherMode,
}

impl RecordCipher {
    pub fn new(keys: KeyPair, mode: CipherMode) -> Self {
        Self { keys, mode }
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    pub fn seal(&self, record: &Record) -> Result<Vec<u8>, CryptoError> {
        match self.mode {
            CipherMode::Rsa => encrypt(record, &self.keys.public),
            CipherMode::Envelope => envelope::seal(&record.to_json_bytes()?, &self.keys.public),
        }
    }

    pub fn open(&self, ciphertext: &[u8]) -> Result<Record, CryptoError> {
        match self.mode {
            CipherMode::Rsa => decrypt(ciphertext, &self.keys.private),
            CipherMode::Envelope => {
                parse_plaintext(envelope::open(ciphertext, &self.keys.private)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{keys::generate_keypair, test_support};

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).expect("object")
    }

    #[test]
    fn round_trips_a_record() {
        let keys = test_support::keys();
        let original = record(json!({"name": "a", "age": 30, "email": "a@example.com"}));

        let ciphertext = encrypt(&original, &keys.public).expect("encrypt");
        assert_eq!(ciphertext.len(), keys.public.size());
        assert_eq!(decrypt(&ciphertext, &keys.private).expect("decrypt"), original);
    }

    #[test]
    fn ciphertext_is_randomized() {
        let keys = test_support::keys();
        let original = record(json!({"name": "a"}));
        let first = encrypt(&original, &keys.public).expect("encrypt");
        let second = encrypt(&original, &keys.public).expect("encrypt");
        assert_ne!(first, second);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let keys = test_support::keys();
        let limit = capacity(&keys.public);
        assert_eq!(limit, 128 - PKCS1_V15_OVERHEAD);

        // {"bio": "xxx…"} is 11 bytes of framing plus the value.
        let fits = record(json!({"bio": "x".repeat(limit - 11)}));
        assert_eq!(fits.to_json_bytes().expect("json").len(), limit);
        encrypt(&fits, &keys.public).expect("exactly at capacity");

        let too_big = record(json!({"bio": "x".repeat(limit - 10)}));
        let err = encrypt(&too_big, &keys.public).expect_err("one byte over");
        assert!(matches!(
            err,
            CryptoError::PayloadTooLarge { len, capacity } if len == limit + 1 && capacity == limit
        ));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let keys = test_support::keys();
        let other = generate_keypair(1024).expect("other keypair");
        let ciphertext = encrypt(&record(json!({"name": "a"})), &keys.public).expect("encrypt");

        let err = decrypt(&ciphertext, &other.private).expect_err("wrong key");
        assert!(matches!(err, CryptoError::Decrypt(_)));
    }

    #[test]
    fn non_json_plaintext_is_a_record_error() {
        let keys = test_support::keys();
        let ciphertext = encrypt_bytes(b"not json", &keys.public).expect("encrypt");
        let err = decrypt(&ciphertext, &keys.private).expect_err("not json");
        assert!(matches!(err, CryptoError::Record(RecordError::Json(_))));

        let ciphertext = encrypt_bytes(&[0xff, 0xfe], &keys.public).expect("encrypt");
        let err = decrypt(&ciphertext, &keys.private).expect_err("not utf-8");
        assert!(matches!(err, CryptoError::Utf8(_)));
    }

    #[test]
    fn envelope_mode_lifts_the_size_limit() {
        let cipher = RecordCipher::new(test_support::keys().clone(), CipherMode::Envelope);
        let big = record(json!({"bio": "x".repeat(4096), "name": "a"}));

        let sealed = cipher.seal(&big).expect("seal");
        assert_eq!(cipher.open(&sealed).expect("open"), big);

        let rsa_only = RecordCipher::new(test_support::keys().clone(), CipherMode::Rsa);
        assert!(matches!(
            rsa_only.seal(&big),
            Err(CryptoError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn cipher_mode_parses_lowercase() {
        let mode: CipherMode = serde_json::from_str(r#""envelope""#).expect("parse");
        assert_eq!(mode, CipherMode::Envelope);
        assert_eq!(CipherMode::default(), CipherMode::Rsa);
    }
}
