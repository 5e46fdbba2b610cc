use anyhow::{Context, Result};
use clap::Parser;
use object_relocator::{
    ObjectAddress, ObjectManager, ObjectStoreClient, StorageService,
    config::{AppConfig, Cli, Command},
};
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config ---
    let cli = Cli::parse();
    let cfg = AppConfig::from_env_and_args(&cli)?;
    tracing::debug!("starting with config: {:?}", cfg);

    // --- Open local store ---
    let store = StorageService::open(&cfg.database_url, &cfg.storage_dir)
        .await
        .with_context(|| format!("opening store at {}", cfg.database_url))?;

    if matches!(cli.command, Command::Init) {
        store.migrate().await.context("applying schema")?;
        tracing::info!("schema is up to date");
        return Ok(());
    }

    let store = Arc::new(store);
    let manager = ObjectManager::with_policy(Arc::clone(&store), cfg.policy);
    run(cli.command, &store, &manager).await
}

async fn run(
    command: Command,
    store: &StorageService,
    manager: &ObjectManager<StorageService>,
) -> Result<()> {
    match command {
        Command::Init => {}
        Command::Mb { bucket } => {
            store
                .create_bucket(&bucket)
                .await
                .with_context(|| format!("creating bucket `{}`", bucket))?;
            println!("created {}", bucket);
        }
        Command::Put { address, file } => {
            let addr = ObjectAddress::parse(&address)?;
            let reader = File::open(&file)
                .await
                .with_context(|| format!("opening {}", file))?;
            let object = store
                .put_object_stream(
                    addr.bucket(),
                    addr.key(),
                    None,
                    ReaderStream::new(reader),
                )
                .await
                .with_context(|| format!("uploading {} to {}", file, addr))?;
            println!("{} {} bytes", addr, object.size_bytes);
        }
        Command::Stat { address } => {
            let addr = ObjectAddress::parse(&address)?;
            let meta = store.get_metadata(addr.bucket(), addr.key()).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Command::Ls {
            bucket,
            prefix,
            pattern,
        } => {
            let keys = manager
                .list(&bucket, prefix.as_deref(), pattern.as_deref())
                .await?;
            for key in keys {
                println!("{}", key);
            }
        }
        Command::Rm { address, recursive } => {
            let addr = ObjectAddress::parse(&address)?;
            if recursive {
                let deleted = manager
                    .delete_objects_under_prefix(addr.bucket(), addr.key())
                    .await?;
                println!("deleted {} objects", deleted);
            } else if manager.delete_object(addr.bucket(), addr.key()).await? {
                println!("deleted {}", addr);
            } else {
                println!("{} does not exist", addr);
            }
        }
        Command::Mv { source, dest } => {
            let report = manager.move_object_url(&source, &dest).await?;
            println!(
                "copied {} bytes to {} ({:?})",
                report.size_bytes, dest, report.strategy
            );
        }
        Command::Consolidate { address } => {
            let report = manager.consolidate_url(&address).await?;
            println!(
                "promoted {} ({} bytes) to {}, removed {} objects",
                report.promoted_key, report.size_bytes, address, report.removed
            );
        }
    }
    Ok(())
}
