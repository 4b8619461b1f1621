use std::{fs, path::Path};

use cipherload_core::record::Record;
use tracing::instrument;

use crate::cipher::{CryptoError, RecordCipher};

/// Encrypt the JSON record in `input` and write the sealed bytes to `output`.
#[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub fn encrypt_file(input: &Path, output: &Path, cipher: &RecordCipher) -> Result<(), CryptoError> {
    let bytes = read(input)?;
    let record = Record::from_json_slice(&bytes)?;
    let sealed = cipher.seal(&record)?;
    fs::write(output, sealed).map_err(|source| CryptoError::Io {
        path: output.to_path_buf(),
        source,
    })
}

/// Decrypt the sealed bytes in `input` back into a record.
#[instrument(skip_all, fields(input = %input.display()))]
pub fn decrypt_file(input: &Path, cipher: &RecordCipher) -> Result<Record, CryptoError> {
    let sealed = read(input)?;
    cipher.open(&sealed)
}

fn read(path: &Path) -> Result<Vec<u8>, CryptoError> {
    fs::read(path).map_err(|source| CryptoError::Io {
        path: path.to_path_buf(),
        source,
    })
}
