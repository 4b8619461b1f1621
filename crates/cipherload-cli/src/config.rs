use std::{
    fs,
    path::{Path, PathBuf},
};

use cipherload_cloud::GcpConfig;
use cipherload_core::warehouse::TableRef;
use cipherload_crypto::{keys::DEFAULT_KEY_BITS, CipherMode};
use cipherload_pipeline::{
    PipelineSettings, DECRYPTED_PREFIX, DEFAULT_BUCKET, DEFAULT_DATASET, DEFAULT_TABLE,
    ENCRYPTED_PREFIX,
};
use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/cipherload/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Directory holding `public_key.pem` and `private_key.pem`.
    pub key_dir: PathBuf,
    /// Modulus size used when a new keypair is generated.
    pub key_bits: usize,
    /// Directory of plaintext `{name}.json` files read by `seed`.
    pub data_dir: PathBuf,
    pub bucket: String,
    pub encrypted_prefix: String,
    pub decrypted_prefix: String,
    /// Record names processed when none are given on the command line.
    pub records: Vec<String>,
    pub cipher: CipherMode,
    pub warehouse: WarehouseConfig,
    pub backend: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from("keys"),
            key_bits: DEFAULT_KEY_BITS,
            data_dir: PathBuf::from("data"),
            bucket: DEFAULT_BUCKET.to_string(),
            encrypted_prefix: ENCRYPTED_PREFIX.to_string(),
            decrypted_prefix: DECRYPTED_PREFIX.to_string(),
            records: vec!["user_a".into(), "user_b".into(), "user_c".into()],
            cipher: CipherMode::default(),
            warehouse: WarehouseConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            bucket: self.bucket.clone(),
            encrypted_prefix: self.encrypted_prefix.clone(),
            decrypted_prefix: self.decrypted_prefix.clone(),
            table: TableRef::new(&self.warehouse.dataset, &self.warehouse.table),
        }
    }

    /// Plaintext input for `name` under `data_dir`.
    pub fn source_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.json"))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct WarehouseConfig {
    pub dataset: String,
    pub table: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.to_string(),
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

/// Where objects and rows go.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Files under `root`: `objects/` for blobs, `warehouse/` for tables.
    Local { root: PathBuf },
    /// Cloud Storage + BigQuery.
    Gcp(GcpConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Local {
            root: PathBuf::from("cipherload-data"),
        }
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("cipherload").join("config.toml"))
}

/// Write `config` to `path` unless a file is already there, creating parent directories.
/// An existing file is left untouched so user edits are never clobbered.
pub fn write_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.pipeline_settings(), PipelineSettings::default());
    }

    #[test]
    fn parses_gcp_config() {
        let contents = r#"
            key_dir = "/etc/cipherload/keys"
            records = ["user_a"]
            cipher = "envelope"
            [warehouse]
            dataset = "staging"
            [backend]
            kind = "gcp"
            project_id = "acme-data"
            access_token = "ya29.token"
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                key_dir: PathBuf::from("/etc/cipherload/keys"),
                records: vec!["user_a".into()],
                cipher: CipherMode::Envelope,
                warehouse: WarehouseConfig {
                    dataset: "staging".into(),
                    table: "users".into(),
                },
                backend: BackendConfig::Gcp(GcpConfig {
                    project_id: "acme-data".into(),
                    access_token: Some("ya29.token".into()),
                    storage_endpoint: None,
                    bigquery_endpoint: None,
                }),
                ..Config::default()
            }
        );
        assert_eq!(cfg.pipeline_settings().table.to_string(), "staging.users");
    }

    #[test]
    fn parses_local_backend() {
        let cfg: Config = toml::from_str(
            r#"
            [backend]
            kind = "local"
            root = "/var/lib/cipherload"
        "#,
        )
        .expect("parse");
        assert_eq!(
            cfg.backend,
            BackendConfig::Local {
                root: PathBuf::from("/var/lib/cipherload")
            }
        );
    }

    #[test]
    fn write_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/config.toml");
        let cfg = Config {
            key_bits: 3072,
            ..Config::default()
        };

        write_if_missing(&cfg, &path).expect("write should succeed");
        let second = write_if_missing(&Config::default(), &path).expect("second write ok");
        assert_eq!(second, path);

        let loaded = load_from_path(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn source_path_uses_data_dir() {
        let cfg = Config::default();
        assert_eq!(cfg.source_path("user_a"), PathBuf::from("data/user_a.json"));
    }
}
