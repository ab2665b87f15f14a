use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use artifact_store::utils::cli::{Args, Command};
use artifact_store::{
    DirectoryOrdering, FileSystemStorageProvider, Location, Quota, StorageConfig, StorageProvider,
};
use clap::Parser;
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = validate_config(&args).await;

    let provider = FileSystemStorageProvider::new(&config).await?;
    let outcome = run(&provider, args.command).await;
    provider.shutdown().await;
    outcome
}

async fn run(provider: &FileSystemStorageProvider, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Put { location, file } => {
            let location = Location::parse(&location)?;
            let source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("cannot open `{}`", file.display()))?;
            provider
                .put(&location, Box::pin(ReaderStream::new(source)))
                .await?;
            tracing::info!(%location, "stored");
        }
        Command::Get { location } => {
            let mut stream = provider.get(&Location::parse(&location)?).await?;
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = stream.try_next().await? {
                stdout.write_all(&chunk).await?;
            }
            stdout.flush().await?;
        }
        Command::Stat { location } => {
            let details = provider.stat(&Location::parse(&location)?).await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        Command::Ls { location } => {
            for child in provider.list(&Location::parse(&location)?).await? {
                println!("{child}");
            }
        }
        Command::Rm { location } => {
            let location = Location::parse(&location)?;
            provider.remove(&location).await?;
            tracing::info!(%location, "removed");
        }
        Command::Usage => {
            println!("{}", provider.usage().await?);
        }
    }
    Ok(())
}

async fn validate_config(args: &Args) -> StorageConfig {
    let mut validation_errors = Vec::new();

    let root_dir = Path::new(&args.root);
    match tokio::fs::metadata(root_dir).await {
        Ok(meta) => {
            if !meta.is_dir() {
                validation_errors.push(format!(
                    "ARTIFACT_STORE_ROOTDIR `{}` exists but is not a directory",
                    args.root.display(),
                ));
            }
        }
        Err(_) => validation_errors.push(format!(
            "ARTIFACT_STORE_ROOTDIR `{}` does not exist.",
            args.root.display(),
        )),
    }

    let quota = args.quota.parse::<Quota>().unwrap_or_else(|err| {
        validation_errors.push(format!("ARTIFACT_STORE_QUOTA: {}", err.message));
        Quota::Unlimited
    });

    let mut config = StorageConfig::new(&args.root)
        .with_quota(quota)
        .with_lock_idle_timeout(Duration::from_secs(args.lock_idle_secs))
        .with_directory_ordering(if args.directories_first {
            DirectoryOrdering::DirectoriesFirst
        } else {
            DirectoryOrdering::FilesFirst
        });
    if let Some(staging_dir) = &args.staging_dir {
        config = config.with_staging_dir(staging_dir);
    }

    if let Err(err) = tokio::fs::create_dir_all(&config.staging_dir).await {
        validation_errors.push(format!(
            "staging directory `{}` cannot be created: {err}",
            config.staging_dir.display(),
        ));
    }

    if !validation_errors.is_empty() {
        eprintln!("{}", validation_errors.join("\n"));
        std::process::exit(1);
    }

    config
}
