//! Record pipeline: download ciphertext, decrypt, re-upload the plaintext
//! copy and load the record into the warehouse. Also the reverse leg that
//! encrypts local JSON records and uploads the ciphertext.
//!
//! Steps run one after another with no compensation: a failure after the
//! plaintext upload leaves that copy in place without a warehouse row.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use cipherload_core::{
    object_store::{ObjectLocation, ObjectStore, ObjectStoreError, APPLICATION_JSON, TEXT_PLAIN},
    record::{Record, RecordError},
    warehouse::{InsertOutcome, TableRef, Warehouse, WarehouseError},
};
use cipherload_crypto::{CryptoError, RecordCipher};
use thiserror::Error;
use tracing::{info, instrument, warn};

pub const DEFAULT_BUCKET: &str = "ta_data_engineer";
pub const ENCRYPTED_PREFIX: &str = "encrypted_files";
pub const DECRYPTED_PREFIX: &str = "decrypted_files";
pub const DEFAULT_DATASET: &str = "user_data";
pub const DEFAULT_TABLE: &str = "users";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid record name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("reading {}: {source}", path.display())]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    ParseSource {
        path: PathBuf,
        #[source]
        source: RecordError,
    },
    #[error("downloading {location}: {source}")]
    Download {
        location: String,
        #[source]
        source: ObjectStoreError,
    },
    #[error("decrypting {name}: {source}")]
    Decrypt {
        name: String,
        #[source]
        source: CryptoError,
    },
    #[error("encrypting {name}: {source}")]
    Encrypt {
        name: String,
        #[source]
        source: CryptoError,
    },
    #[error("serializing {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: RecordError,
    },
    #[error("uploading {location}: {source}")]
    Upload {
        location: String,
        #[source]
        source: ObjectStoreError,
    },
    #[error("loading into {table}: {source}")]
    Warehouse {
        table: String,
        #[source]
        source: WarehouseError,
    },
}

impl PipelineError {
    /// Step that failed, for logs and summaries.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::InvalidName { .. } => "validate",
            PipelineError::ReadSource { .. } | PipelineError::ParseSource { .. } => "read",
            PipelineError::Download { .. } => "download",
            PipelineError::Decrypt { .. } => "decrypt",
            PipelineError::Encrypt { .. } | PipelineError::Serialize { .. } => "encode",
            PipelineError::Upload { .. } => "upload",
            PipelineError::Warehouse { .. } => "warehouse",
        }
    }
}

/// Where ciphertext and plaintext live and which table receives rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub bucket: String,
    pub encrypted_prefix: String,
    pub decrypted_prefix: String,
    pub table: TableRef,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            encrypted_prefix: ENCRYPTED_PREFIX.to_string(),
            decrypted_prefix: DECRYPTED_PREFIX.to_string(),
            table: TableRef::new(DEFAULT_DATASET, DEFAULT_TABLE),
        }
    }
}

impl PipelineSettings {
    /// `{encrypted_prefix}/{name}`
    pub fn encrypted_location(&self, name: &str) -> ObjectLocation {
        ObjectLocation::new(&self.bucket, format!("{}/{name}", self.encrypted_prefix))
    }

    /// `{decrypted_prefix}/{name}.json`
    pub fn decrypted_location(&self, name: &str) -> ObjectLocation {
        ObjectLocation::new(&self.bucket, format!("{}/{name}.json", self.decrypted_prefix))
    }
}

/// Outcome of one successfully processed record.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub name: String,
    pub record: Record,
    pub plaintext_uri: String,
    pub insert: InsertOutcome,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RecordFailure {
    pub name: String,
    pub error: PipelineError,
}

/// Result of processing a batch of names.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<PipelineReport>,
    pub failures: Vec<RecordFailure>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    cipher: RecordCipher,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        cipher: RecordCipher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            warehouse,
            cipher,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Download → decrypt → upload plaintext copy → warehouse insert, for one record.
    #[instrument(skip(self), fields(store = self.store.name(), warehouse = self.warehouse.name()))]
    pub async fn process(&self, name: &str) -> Result<PipelineReport, PipelineError> {
        check_name(name)?;

        let encrypted = self.settings.encrypted_location(name);
        let ciphertext = self
            .store
            .get(&encrypted)
            .await
            .map_err(|source| PipelineError::Download {
                location: encrypted.to_string(),
                source,
            })?;

        let record = self
            .cipher
            .open(&ciphertext)
            .map_err(|source| PipelineError::Decrypt {
                name: name.to_string(),
                source,
            })?;

        let plaintext = record
            .to_json_bytes()
            .map_err(|source| PipelineError::Serialize {
                name: name.to_string(),
                source,
            })?;
        let decrypted = self.settings.decrypted_location(name);
        let plaintext_uri = self
            .store
            .put(&decrypted, &plaintext, APPLICATION_JSON)
            .await
            .map_err(|source| PipelineError::Upload {
                location: decrypted.to_string(),
                source,
            })?;

        let table = &self.settings.table;
        let insert = self
            .warehouse
            .write(table, &record)
            .await
            .map_err(|source| PipelineError::Warehouse {
                table: table.to_string(),
                source,
            })?;

        info!(%plaintext_uri, %table, fields = record.len(), "record processed");
        Ok(PipelineReport {
            name: name.to_string(),
            record,
            plaintext_uri,
            insert,
            processed_at: Utc::now(),
        })
    }

    /// Encrypt `record` and upload it as the ciphertext for `name`.
    #[instrument(skip(self, record), fields(store = self.store.name()))]
    pub async fn seed_record(&self, name: &str, record: &Record) -> Result<String, PipelineError> {
        check_name(name)?;
        let ciphertext = self
            .cipher
            .seal(record)
            .map_err(|source| PipelineError::Encrypt {
                name: name.to_string(),
                source,
            })?;

        let location = self.settings.encrypted_location(name);
        let uri = self
            .store
            .put(&location, &ciphertext, TEXT_PLAIN)
            .await
            .map_err(|source| PipelineError::Upload {
                location: location.to_string(),
                source,
            })?;
        info!(%uri, "ciphertext uploaded");
        Ok(uri)
    }

    /// Read the JSON record at `source`, encrypt it and upload the ciphertext for `name`.
    pub async fn seed(&self, name: &str, source: &Path) -> Result<String, PipelineError> {
        check_name(name)?;
        let bytes = fs::read(source).map_err(|err| PipelineError::ReadSource {
            path: source.to_path_buf(),
            source: err,
        })?;
        let record = Record::from_json_slice(&bytes).map_err(|err| PipelineError::ParseSource {
            path: source.to_path_buf(),
            source: err,
        })?;
        self.seed_record(name, &record).await
    }

    /// Process `names` in order. Stops at the first failure unless `keep_going`.
    pub async fn run<I, S>(&self, names: I, keep_going: bool) -> Result<RunSummary, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut summary = RunSummary::default();
        for name in names {
            let name = name.as_ref();
            match self.process(name).await {
                Ok(report) => summary.reports.push(report),
                Err(error) if keep_going => {
                    warn!(record = name, stage = error.stage(), %error, "record failed, continuing");
                    summary.failures.push(RecordFailure {
                        name: name.to_string(),
                        error,
                    });
                }
                Err(error) => return Err(error),
            }
        }
        Ok(summary)
    }
}

fn check_name(name: &str) -> Result<(), PipelineError> {
    let reason = if name.is_empty() {
        "empty"
    } else if name == "." || name == ".." {
        "relative path"
    } else if name.contains(['/', '\\']) {
        "contains a path separator"
    } else {
        return Ok(());
    };
    Err(PipelineError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use cipherload_core::{object_store::InMemoryObjectStore, warehouse::InMemoryWarehouse};
    use cipherload_crypto::{
        cipher::{self, CipherMode},
        keys::{generate_keypair, KeyPair},
    };
    use serde_json::json;

    use super::*;

    fn keys() -> &'static KeyPair {
        static KEYS: OnceLock<KeyPair> = OnceLock::new();
        KEYS.get_or_init(|| generate_keypair(1024).expect("generate test keypair"))
    }

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).expect("object")
    }

    struct Harness {
        store: InMemoryObjectStore,
        warehouse: InMemoryWarehouse,
        pipeline: Pipeline,
    }

    fn harness(mode: CipherMode) -> Harness {
        let store = InMemoryObjectStore::new();
        let warehouse = InMemoryWarehouse::new();
        let pipeline = Pipeline::new(
            Arc::new(store.clone()),
            Arc::new(warehouse.clone()),
            RecordCipher::new(keys().clone(), mode),
            PipelineSettings::default(),
        );
        Harness {
            store,
            warehouse,
            pipeline,
        }
    }

    #[tokio::test]
    async fn end_to_end_single_field_record() {
        let h = harness(CipherMode::Rsa);
        let original = record(json!({"name": "a"}));
        let settings = h.pipeline.settings().clone();

        let uri = h
            .pipeline
            .seed_record("user_a", &original)
            .await
            .expect("seed");
        assert_eq!(uri, "memory://ta_data_engineer/encrypted_files/user_a");
        let encrypted = settings.encrypted_location("user_a");
        assert_eq!(h.store.content_type(&encrypted).as_deref(), Some(TEXT_PLAIN));

        let report = h.pipeline.process("user_a").await.expect("process");
        assert_eq!(report.record, original);
        assert_eq!(
            report.plaintext_uri,
            "memory://ta_data_engineer/decrypted_files/user_a.json"
        );

        let decrypted = settings.decrypted_location("user_a");
        assert_eq!(
            h.store.get(&decrypted).await.expect("plaintext copy"),
            br#"{"name": "a"}"#.to_vec()
        );
        assert_eq!(
            h.store.content_type(&decrypted).as_deref(),
            Some(APPLICATION_JSON)
        );

        let rows = h.warehouse.rows(&settings.table);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"].as_deref(), Some("a"));
        assert_eq!(report.insert.rows, 1);
    }

    #[tokio::test]
    async fn plaintext_copy_keeps_source_field_order() {
        let h = harness(CipherMode::Rsa);
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("user_b.json");
        let body = r#"{"name": "b", "age": 41, "email": "b@example.com", "nickname": null}"#;
        fs::write(&source, body).expect("write source");

        h.pipeline.seed("user_b", &source).await.expect("seed");
        let before = Utc::now();
        let report = h.pipeline.process("user_b").await.expect("process");
        assert!(report.processed_at >= before && report.processed_at <= Utc::now());

        let decrypted = h.pipeline.settings().decrypted_location("user_b");
        assert_eq!(
            h.store.get(&decrypted).await.expect("plaintext copy"),
            body.as_bytes().to_vec()
        );
        let columns = h
            .warehouse
            .schema(&h.pipeline.settings().table)
            .expect("table")
            .columns;
        assert_eq!(columns, vec!["name", "age", "email", "nickname"]);
    }

    #[tokio::test]
    async fn decrypts_ciphertext_produced_outside_the_pipeline() {
        let h = harness(CipherMode::Rsa);
        let original = record(json!({"name": "c", "age": 7}));
        let ciphertext = cipher::encrypt(&original, &keys().public).expect("encrypt");
        let location = h.pipeline.settings().encrypted_location("user_c");
        h.store
            .put(&location, &ciphertext, TEXT_PLAIN)
            .await
            .expect("upload");

        let report = h.pipeline.process("user_c").await.expect("process");
        assert_eq!(report.record, original);
        let rows = h.warehouse.rows(&h.pipeline.settings().table);
        assert_eq!(rows[0]["age"].as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn missing_ciphertext_fails_before_any_side_effect() {
        let h = harness(CipherMode::Rsa);
        let err = h.pipeline.process("user_x").await.expect_err("missing");

        assert_eq!(err.stage(), "download");
        assert!(matches!(
            err,
            PipelineError::Download {
                source: ObjectStoreError::NotFound { .. },
                ..
            }
        ));
        assert!(h.store.is_empty());
        assert!(h.warehouse.rows(&h.pipeline.settings().table).is_empty());
    }

    #[tokio::test]
    async fn ciphertext_from_another_key_is_a_decrypt_error() {
        let h = harness(CipherMode::Rsa);
        let other = generate_keypair(1024).expect("other keypair");
        let ciphertext = cipher::encrypt(&record(json!({"name": "a"})), &other.public).expect("encrypt");
        h.store
            .put(
                &h.pipeline.settings().encrypted_location("user_a"),
                &ciphertext,
                TEXT_PLAIN,
            )
            .await
            .expect("upload");

        let err = h.pipeline.process("user_a").await.expect_err("wrong key");
        assert_eq!(err.stage(), "decrypt");
    }

    #[tokio::test]
    async fn warehouse_failures_are_returned_after_plaintext_upload() {
        let h = harness(CipherMode::Rsa);
        h.pipeline
            .seed_record("user_a", &record(json!({"name": "a"})))
            .await
            .expect("seed a");
        h.pipeline
            .seed_record("user_b", &record(json!({"name": "b", "email": "b@x.io"})))
            .await
            .expect("seed b");

        h.pipeline.process("user_a").await.expect("process a");
        let err = h.pipeline.process("user_b").await.expect_err("schema drift");

        assert_eq!(err.stage(), "warehouse");
        assert!(matches!(
            err,
            PipelineError::Warehouse {
                source: WarehouseError::Insert { .. },
                ..
            }
        ));
        // No compensation: the plaintext copy stays behind.
        let decrypted = h.pipeline.settings().decrypted_location("user_b");
        assert!(h.store.get(&decrypted).await.is_ok());
        assert_eq!(h.warehouse.rows(&h.pipeline.settings().table).len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_first_failure_unless_keep_going() {
        let h = harness(CipherMode::Rsa);
        for name in ["user_a", "user_c"] {
            h.pipeline
                .seed_record(name, &record(json!({"name": name})))
                .await
                .expect("seed");
        }
        let names = ["user_a", "user_b", "user_c"];

        let err = h.pipeline.run(names, false).await.expect_err("user_b missing");
        assert_eq!(err.stage(), "download");
        assert_eq!(h.warehouse.rows(&h.pipeline.settings().table).len(), 1);

        let summary = h.pipeline.run(names, true).await.expect("keep going");
        assert!(!summary.is_success());
        assert_eq!(summary.reports.len(), 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].name, "user_b");
    }

    #[tokio::test]
    async fn seeds_from_local_json_file() {
        let h = harness(CipherMode::Envelope);
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("user_a.json");
        let bio = "y".repeat(500);
        fs::write(&source, json!({"name": "a", "bio": bio}).to_string()).expect("write source");

        h.pipeline.seed("user_a", &source).await.expect("seed");
        let report = h.pipeline.process("user_a").await.expect("process");
        assert_eq!(report.record.get("bio"), Some(&json!(bio)));

        let err = h
            .pipeline
            .seed("user_b", &dir.path().join("user_b.json"))
            .await
            .expect_err("missing source");
        assert_eq!(err.stage(), "read");
    }

    #[tokio::test]
    async fn rejects_names_that_escape_the_prefix() {
        let h = harness(CipherMode::Rsa);
        for name in ["", "..", "a/b"] {
            let err = h.pipeline.process(name).await.expect_err("invalid name");
            assert!(matches!(err, PipelineError::InvalidName { .. }));
        }
    }

    #[tokio::test]
    async fn seed_validates_name_before_reading_source() {
        let h = harness(CipherMode::Rsa);
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("x.json");
        fs::write(&source, r#"{"name": "x"}"#).expect("write source");

        for name in ["../x", ""] {
            let err = h.pipeline.seed(name, &source).await.expect_err("invalid name");
            assert_eq!(err.stage(), "validate");
        }
        let err = h
            .pipeline
            .seed("../missing", &dir.path().join("missing.json"))
            .await
            .expect_err("invalid name wins over missing file");
        assert_eq!(err.stage(), "validate");
        assert!(h.store.is_empty());
    }

    #[test]
    fn default_locations_follow_naming_convention() {
        let settings = PipelineSettings::default();
        assert_eq!(
            settings.encrypted_location("user_a").to_string(),
            "ta_data_engineer/encrypted_files/user_a"
        );
        assert_eq!(
            settings.decrypted_location("user_a").to_string(),
            "ta_data_engineer/decrypted_files/user_a.json"
        );
        assert_eq!(settings.table.to_string(), "user_data.users");
    }
}
