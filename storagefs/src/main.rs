mod commands;
mod migrate;

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use commands::{Command, USAGE};
use storagefs_common::config::FsConfig;
use storagefs_vfs::StorageFs;

const DEFAULT_CONFIG_PATH: &str = "storagefs.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(|s| s.as_str()), Some("-h" | "--help" | "help")) {
        println!("{}", USAGE);
        return Ok(());
    }
    let invocation = match commands::parse_args(&args) {
        Ok(inv) => inv,
        Err(e) => {
            eprintln!("storagefs: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    // Load config
    let config_path = invocation.config.unwrap_or_else(|| {
        PathBuf::from(
            std::env::var("STORAGEFS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()),
        )
    });
    let config = FsConfig::load(&config_path)?;
    let storage = storagefs_backends::from_config(&config.backend)
        .with_context(|| format!("Failed to set up {} backend", config.backend.type_name()))?;
    info!(backend = %storage.kind(), root = %config.root.display(), "Storage backend ready");

    match invocation.command {
        Command::Migrate { delete } => {
            let source = config.media_root.as_ref().unwrap_or(&config.root);
            let summary = migrate::migrate(storage.as_ref(), source, delete).await?;
            println!(
                "uploaded {}, skipped {}, deleted {}, failed {}",
                summary.uploaded, summary.skipped, summary.deleted, summary.failed
            );
            if summary.failed > 0 {
                anyhow::bail!("{} file(s) failed to migrate", summary.failed);
            }
        }
        command => {
            let fs = StorageFs::new(storage, config.fs_options());
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            commands::run(&fs, command, &mut out).await?;
        }
    }
    Ok(())
}
