use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
};

use rand::rngs::OsRng;
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding},
    traits::PublicKeyParts,
    RsaPrivateKey, RsaPublicKey,
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const PUBLIC_KEY_FILE: &str = "public_key.pem";
pub const PRIVATE_KEY_FILE: &str = "private_key.pem";
pub const DEFAULT_KEY_BITS: usize = 2048;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key file i/o at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid PEM in {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("PEM encode error: {0}")]
    Encode(String),
    #[error("key generation error: {0}")]
    Generation(String),
    #[error("public key in {} does not belong to the private key", path.display())]
    Mismatch { path: PathBuf },
}

/// RSA public/private pair. `Debug` never prints key material.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public: RsaPublicKey,
    pub private: RsaPrivateKey,
}

impl KeyPair {
    pub fn from_private(private: RsaPrivateKey) -> Self {
        Self {
            public: private.to_public_key(),
            private,
        }
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.public.n().bits()
    }

    /// PKCS#1 encoding of both halves, public first.
    pub fn to_pem(&self) -> Result<(String, String), KeyError> {
        let public = self
            .public
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encode(e.to_string()))?;
        let private = self
            .private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| KeyError::Encode(e.to_string()))?;
        Ok((public, private.to_string()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

/// Generate a fresh keypair of `bits` size.
pub fn generate_keypair(bits: usize) -> Result<KeyPair, KeyError> {
    let private =
        RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| KeyError::Generation(e.to_string()))?;
    Ok(KeyPair::from_private(private))
}

/// Load the keypair in `dir`, generating and persisting a 2048-bit one if either file is missing.
pub fn get_or_create_keys(dir: impl Into<PathBuf>) -> Result<KeyPair, KeyError> {
    PemKeyStore::new(dir).get_or_create_keys()
}

/// Keypair persisted as `public_key.pem` / `private_key.pem` in one directory.
///
/// Both files must exist for the pair to be loaded; otherwise a new pair is
/// generated and both files are (re)written. There is no cross-process lock:
/// two first-time callers racing on an empty directory each generate a pair
/// and the last rename wins per file.
#[derive(Debug, Clone)]
pub struct PemKeyStore {
    dir: PathBuf,
    bits: usize,
}

impl PemKeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            bits: DEFAULT_KEY_BITS,
        }
    }

    /// Override the modulus size used when a new pair has to be generated.
    pub fn with_bits(mut self, bits: usize) -> Self {
        self.bits = bits;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn public_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    pub fn private_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    pub fn exists(&self) -> bool {
        self.public_path().exists() && self.private_path().exists()
    }

    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn get_or_create_keys(&self) -> Result<KeyPair, KeyError> {
        if self.exists() {
            debug!("loading existing keypair");
            return self.load();
        }

        info!(bits = self.bits, "no keypair found, generating");
        let keys = generate_keypair(self.bits)?;
        self.save(&keys)?;
        Ok(keys)
    }

    fn load(&self) -> Result<KeyPair, KeyError> {
        let public_path = self.public_path();
        let private_path = self.private_path();

        let public_pem = read_to_string(&public_path)?;
        let private_pem = read_to_string(&private_path)?;

        let public =
            RsaPublicKey::from_pkcs1_pem(&public_pem).map_err(|e| KeyError::Decode {
                path: public_path.clone(),
                reason: e.to_string(),
            })?;
        let private =
            RsaPrivateKey::from_pkcs1_pem(&private_pem).map_err(|e| KeyError::Decode {
                path: private_path,
                reason: e.to_string(),
            })?;

        if private.to_public_key() != public {
            return Err(KeyError::Mismatch { path: public_path });
        }
        Ok(KeyPair { public, private })
    }

    fn save(&self, keys: &KeyPair) -> Result<(), KeyError> {
        fs::create_dir_all(&self.dir).map_err(|source| KeyError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let (public_pem, private_pem) = keys.to_pem()?;
        write_atomic(&self.dir, &self.public_path(), public_pem.as_bytes())?;
        write_atomic(&self.dir, &self.private_path(), private_pem.as_bytes())
    }
}

fn read_to_string(path: &Path) -> Result<String, KeyError> {
    fs::read_to_string(path).map_err(|source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), KeyError> {
    let io_err = |source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
