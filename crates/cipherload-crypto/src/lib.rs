//! RSA key management and record encryption.
//! Keys live in PEM files on disk; records are sealed with RSA PKCS#1 v1.5,
//! or with an RSA-wrapped AES-GCM data key when envelope mode is selected.

pub mod cipher;
pub mod envelope;
pub mod files;
pub mod keys;

pub use cipher::{CipherMode, CryptoError, RecordCipher};
pub use keys::{KeyError, KeyPair, PemKeyStore};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::OnceLock;

    use crate::keys::{generate_keypair, KeyPair};

    /// One small keypair per test binary; 2048-bit generation is slow in debug builds.
    pub fn keys() -> &'static KeyPair {
        static KEYS: OnceLock<KeyPair> = OnceLock::new();
        KEYS.get_or_init(|| generate_keypair(1024).expect("generate test keypair"))
    }
}
