use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "cipherload",
    about = "Encrypt user records, ship them through object storage and load them into a warehouse",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Optional subcommand; defaults to `run` over the configured records.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Download, decrypt, re-upload and load records into the warehouse.
    Run {
        /// Record names; the configured list when empty.
        names: Vec<String>,
        /// Continue with the next record after a failure.
        #[arg(long)]
        keep_going: bool,
    },
    /// Encrypt `{data_dir}/{name}.json` and upload the ciphertext.
    Seed {
        /// Record names; the configured list when empty.
        names: Vec<String>,
    },
    /// Encrypt a local JSON file.
    Encrypt { input: PathBuf, output: PathBuf },
    /// Decrypt a local file and print the record.
    Decrypt { input: PathBuf },
    /// Manage the RSA keypair.
    #[command(subcommand)]
    Keys(KeysCommand),
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

impl Default for Command {
    fn default() -> Self {
        Command::Run {
            names: Vec::new(),
            keep_going: false,
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeysCommand {
    /// Load the keypair, generating it if either PEM file is missing.
    Init,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
