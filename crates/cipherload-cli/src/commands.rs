use std::path::Path;

use chrono::SecondsFormat;

use cipherload_crypto::files;
use cipherload_pipeline::{Pipeline, PipelineReport, RunSummary};
use color_eyre::Result;
use tracing::{error, info};

use crate::{backends, config::Config};

fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let cipher = backends::cipher_from_config(config)?;
    let backends = backends::from_config(config)?;
    Ok(Pipeline::new(
        backends.store,
        backends.warehouse,
        cipher,
        config.pipeline_settings(),
    ))
}

fn names_or_configured(names: Vec<String>, config: &Config) -> Vec<String> {
    if names.is_empty() {
        config.records.clone()
    } else {
        names
    }
}

/// Process records end to end; errors out if any record failed.
pub async fn run(names: Vec<String>, keep_going: bool, config: &Config) -> Result<RunSummary> {
    let pipeline = build_pipeline(config)?;
    let names = names_or_configured(names, config);
    info!(records = names.len(), keep_going, "starting pipeline run");

    let summary = pipeline.run(&names, keep_going).await?;
    for report in &summary.reports {
        println!("{}", describe(report));
    }
    for failure in &summary.failures {
        error!(
            record = %failure.name,
            stage = failure.error.stage(),
            error = %failure.error,
            "record failed"
        );
    }
    if !summary.is_success() {
        color_eyre::eyre::bail!(
            "{} of {} records failed",
            summary.failures.len(),
            names.len()
        );
    }
    Ok(summary)
}

/// One output line per processed record.
fn describe(report: &PipelineReport) -> String {
    format!(
        "{} {}: {} -> {} ({} row)",
        report.processed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        report.name,
        report.plaintext_uri,
        report.insert.table,
        report.insert.rows
    )
}

/// Encrypt `{data_dir}/{name}.json` for each name and upload the ciphertext.
pub async fn seed(names: Vec<String>, config: &Config) -> Result<Vec<String>> {
    let pipeline = build_pipeline(config)?;
    let mut uris = Vec::new();
    for name in names_or_configured(names, config) {
        let uri = pipeline.seed(&name, &config.source_path(&name)).await?;
        println!("{name}: {uri}");
        uris.push(uri);
    }
    Ok(uris)
}

pub fn encrypt(input: &Path, output: &Path, config: &Config) -> Result<()> {
    let cipher = backends::cipher_from_config(config)?;
    files::encrypt_file(input, output, &cipher)?;
    println!("Encrypted {} -> {}", input.display(), output.display());
    Ok(())
}

pub fn decrypt(input: &Path, config: &Config) -> Result<()> {
    let cipher = backends::cipher_from_config(config)?;
    let record = files::decrypt_file(input, &cipher)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub fn init_keys(config: &Config) -> Result<()> {
    let store = backends::key_store(config);
    let existed = store.exists();
    let keys = store.get_or_create_keys()?;
    let verb = if existed { "Loaded" } else { "Generated" };
    println!(
        "{verb} {}-bit keypair in {}",
        keys.bits(),
        store.dir().display()
    );
    Ok(())
}
