use std::sync::Arc;

use cipherload_cloud::{BigQueryWarehouse, GcpConfig, GcsObjectStore};
use cipherload_core::{object_store::ObjectStore, warehouse::Warehouse};
use cipherload_crypto::{PemKeyStore, RecordCipher};
use cipherload_store::{fs_store::LocalObjectStore, fs_warehouse::LocalWarehouse};
use color_eyre::Result;
use tracing::debug;

use crate::config::{BackendConfig, Config};

const TOKEN_ENV_VARS: [&str; 2] = ["CIPHERLOAD_ACCESS_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN"];

pub struct Backends {
    pub store: Arc<dyn ObjectStore>,
    pub warehouse: Arc<dyn Warehouse>,
}

/// Build the object store and warehouse selected in the config.
pub fn from_config(config: &Config) -> Result<Backends> {
    match &config.backend {
        BackendConfig::Local { root } => {
            debug!(?root, "using local backends");
            Ok(Backends {
                store: Arc::new(LocalObjectStore::new(root.join("objects"))),
                warehouse: Arc::new(LocalWarehouse::new(root.join("warehouse"))),
            })
        }
        BackendConfig::Gcp(gcp) => {
            let token = resolve_access_token(gcp).ok_or_else(|| {
                color_eyre::eyre::eyre!(
                    "no GCP access token: set backend.access_token or {}",
                    TOKEN_ENV_VARS.join(" / ")
                )
            })?;
            debug!(project = %gcp.project_id, "using gcs + bigquery backends");
            Ok(Backends {
                store: Arc::new(GcsObjectStore::new(gcp, token.clone())),
                warehouse: Arc::new(BigQueryWarehouse::new(gcp, token)),
            })
        }
    }
}

fn resolve_access_token(gcp: &GcpConfig) -> Option<String> {
    gcp.access_token.clone().or_else(|| {
        TOKEN_ENV_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
    })
}

pub fn key_store(config: &Config) -> PemKeyStore {
    PemKeyStore::new(&config.key_dir).with_bits(config.key_bits)
}

/// Load (or create) the keypair once and wrap it for the configured cipher mode.
pub fn cipher_from_config(config: &Config) -> Result<RecordCipher> {
    let keys = key_store(config).get_or_create_keys()?;
    Ok(RecordCipher::new(keys, config.cipher))
}
