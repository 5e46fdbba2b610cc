use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;

/// Objects of at least this many bytes are copied part by part.
pub const MULTIPART_COPY_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Size of every part of a chunked copy except possibly the last.
pub const COPY_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Smallest part size accepted from configuration.
pub const MIN_COPY_PART_SIZE: u64 = COPY_PART_SIZE;

/// Most parts a single chunked copy may be split into.
pub const MAX_COPY_PARTS: u32 = 10_000;

/// Keys requested per listing page.
pub const LIST_BATCH_SIZE: usize = 100;

/// Thresholds used by the object manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPolicy {
    pub multipart_threshold: u64,
    pub part_size: u64,
    pub list_batch_size: usize,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            multipart_threshold: MULTIPART_COPY_THRESHOLD,
            part_size: COPY_PART_SIZE,
            list_batch_size: LIST_BATCH_SIZE,
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_dir: String,
    pub database_url: String,
    pub policy: TransferPolicy,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Move, delete and consolidate objects in an object store")]
pub struct Cli {
    /// Directory where object payloads are stored (overrides OBJECT_RELOCATOR_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_RELOCATOR_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the metadata schema and exit
    Init,
    /// Create a bucket
    Mb { bucket: String },
    /// Upload a local file to an address
    Put { address: String, file: String },
    /// Print size and existence of an object as JSON
    Stat { address: String },
    /// List keys in a bucket
    Ls {
        bucket: String,
        #[arg(long)]
        prefix: Option<String>,
        /// Regex a key has to contain
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Delete an object, or every object under a prefix with --recursive
    Rm {
        address: String,
        #[arg(long)]
        recursive: bool,
    },
    /// Copy an object to a new address and verify its size
    Mv { source: String, dest: String },
    /// Promote the single part-* file under `<address>/` to `<address>`
    Consolidate { address: String },
}

impl AppConfig {
    /// Merge CLI args over environment variables over defaults.
    pub fn from_env_and_args(cli: &Cli) -> Result<Self> {
        let env_storage =
            env::var("OBJECT_RELOCATOR_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("OBJECT_RELOCATOR_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/object_store.db".into());

        let mut policy = TransferPolicy::default();
        match env::var("OBJECT_RELOCATOR_PART_SIZE") {
            Ok(value) => policy.part_size = parse_part_size(&value)?,
            Err(env::VarError::NotPresent) => {}
            Err(err) => return Err(err).context("reading OBJECT_RELOCATOR_PART_SIZE"),
        }

        Ok(Self {
            storage_dir: cli.storage_dir.clone().unwrap_or(env_storage),
            database_url: cli.database_url.clone().unwrap_or(env_db),
            policy,
        })
    }
}

/// Parse a part size in bytes, refusing anything below `MIN_COPY_PART_SIZE`.
fn parse_part_size(value: &str) -> Result<u64> {
    let part_size = value
        .trim()
        .parse::<u64>()
        .with_context(|| format!("parsing OBJECT_RELOCATOR_PART_SIZE value `{}`", value))?;
    anyhow::ensure!(
        part_size >= MIN_COPY_PART_SIZE,
        "OBJECT_RELOCATOR_PART_SIZE must be at least {} bytes, got {}",
        MIN_COPY_PART_SIZE,
        part_size
    );
    Ok(part_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_uses_named_constants() {
        let policy = TransferPolicy::default();
        assert_eq!(policy.multipart_threshold, 1 << 30);
        assert_eq!(policy.part_size, 5 << 20);
        assert_eq!(policy.list_batch_size, 100);
    }

    #[test]
    fn cli_args_override_environment() {
        let cli = Cli::parse_from([
            "object-relocator",
            "--storage-dir",
            "/tmp/objects",
            "--database-url",
            "sqlite:///tmp/meta.db",
            "ls",
            "bucket",
            "--pattern",
            "part-",
        ]);
        let cfg = AppConfig::from_env_and_args(&cli).unwrap();
        assert_eq!(cfg.storage_dir, "/tmp/objects");
        assert_eq!(cfg.database_url, "sqlite:///tmp/meta.db");
        assert!(matches!(
            cli.command,
            Command::Ls { ref bucket, pattern: Some(ref p), .. } if bucket == "bucket" && p == "part-"
        ));
    }

    #[test]
    fn part_size_below_floor_is_rejected() {
        assert_eq!(parse_part_size("5242880").unwrap(), 5 << 20);
        assert_eq!(parse_part_size(" 16777216 ").unwrap(), 16 << 20);
        assert!(parse_part_size("1").is_err());
        assert!(parse_part_size("0").is_err());
        assert!(parse_part_size("5242879").is_err());
        assert!(parse_part_size("five").is_err());
    }
}
