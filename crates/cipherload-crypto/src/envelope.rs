//! Hybrid sealing for payloads larger than one RSA block.
//!
//! A fresh AES-256-GCM data key encrypts the payload and is itself wrapped
//! with RSA PKCS#1 v1.5. The blob is JSON with URL-safe unpadded base64 fields:
//! `{"wrapped_key": …, "nonce": …, "ciphertext": …}`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::cipher::{decrypt_bytes, encrypt_bytes, CryptoError};

const DATA_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeBlob {
    wrapped_key: String,
    nonce: String,
    ciphertext: String,
}

pub fn seal(plaintext: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    let data_key = Aes256Gcm::generate_key(&mut OsRng);
    let cipher = Aes256Gcm::new(&data_key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encrypt(format!("aes-gcm: {e}")))?;
    let wrapped_key = encrypt_bytes(data_key.as_slice(), public_key)?;

    let blob = EnvelopeBlob {
        wrapped_key: URL_SAFE_NO_PAD.encode(wrapped_key),
        nonce: URL_SAFE_NO_PAD.encode(nonce.as_slice()),
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
    };
    serde_json::to_vec(&blob).map_err(|e| CryptoError::Envelope(e.to_string()))
}

pub fn open(sealed: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    let blob: EnvelopeBlob =
        serde_json::from_slice(sealed).map_err(|e| CryptoError::Envelope(e.to_string()))?;

    let data_key = decrypt_bytes(&decode_field("wrapped_key", &blob.wrapped_key)?, private_key)?;
    if data_key.len() != DATA_KEY_LEN {
        return Err(CryptoError::Envelope(format!(
            "expected {DATA_KEY_LEN}-byte data key, got {}",
            data_key.len()
        )));
    }

    let nonce_bytes = decode_field("nonce", &blob.nonce)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::Envelope(format!(
            "expected {NONCE_LEN}-byte nonce, got {}",
            nonce_bytes.len()
        )));
    }
    let ciphertext = decode_field("ciphertext", &blob.ciphertext)?;

    let cipher = Aes256Gcm::new_from_slice(&data_key)
        .map_err(|e| CryptoError::Envelope(format!("cipher init failed: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|e| CryptoError::Decrypt(format!("aes-gcm: {e}")))
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| CryptoError::Envelope(format!("{field} decode failed: {e}")))
}
