use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use rederive::{FileMaterializer, ManifestStore, Settings, WatcherService, logging, paths};

#[derive(Parser)]
#[command(name = "rederive")]
#[command(about = "Re-save derived files when the sources they depend on change")]
struct Cli {
    /// Root directory the manifest is anchored to
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default watcher.toml under the root
    Init {
        /// Overwrite an existing watcher.toml
        #[arg(short, long)]
        force: bool,
    },

    /// Register a source -> derived association and persist it
    Register {
        /// File to watch for changes
        source: PathBuf,

        /// File to re-save when the source changes
        derived: PathBuf,
    },

    /// Print persisted associations and whether each is still live
    List,

    /// Restore persisted associations and watch until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("root directory {} not found", cli.root.display()))?;
    let settings = Settings::load(&root)
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to load settings")?;
    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => {
            Settings::write_default(&root, force)?;
            println!("wrote {}", root.join(rederive::config::SETTINGS_FILE).display());
        }

        Commands::Register { source, derived } => {
            let source = std::path::absolute(&source)?;
            let derived = std::path::absolute(&derived)?;
            if !derived.exists() {
                bail!("derived file {} does not exist", derived.display());
            }

            let (service, _events): (WatcherService<PathBuf>, _) =
                WatcherService::open(root, Arc::new(FileMaterializer), &settings)?;
            service.register_new(&source, &derived, derived.clone())?;
            println!("registered {} -> {}", source.display(), derived.display());
            service.close();
        }

        Commands::List => {
            list_associations(&root, &settings)?;
        }

        Commands::Watch => {
            let (service, events): (WatcherService<PathBuf>, _) =
                WatcherService::open(root.clone(), Arc::new(FileMaterializer), &settings)?;

            let resolver_root = root.clone();
            let report =
                service.restore_all(|relative| paths::to_absolute(&resolver_root, relative).ok())?;
            println!(
                "watching {} association(s) ({} skipped, {} corrupt)",
                report.restored, report.skipped, report.corrupt
            );

            let looper = service.clone();
            let loop_task = tokio::spawn(async move { looper.run(events).await });

            tokio::signal::ctrl_c().await?;
            service.close();
            loop_task.await??;
        }
    }

    Ok(())
}

fn list_associations(root: &Path, settings: &Settings) -> Result<()> {
    let store = ManifestStore::with_file_name(&settings.manifest_name);
    let records = match store.load(root) {
        Ok(records) => records,
        Err(rederive::ManifestError::Missing { path }) => {
            println!("no manifest at {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for record in records {
        match record {
            Ok(record) => {
                let live = paths::to_absolute(root, &record.source).is_ok_and(|p| p.exists())
                    && paths::to_absolute(root, &record.derived).is_ok_and(|p| p.exists());
                let status = if live { "live " } else { "stale" };
                println!(
                    "{status}  {} -> {}",
                    record.source.display(),
                    record.derived.display()
                );
            }
            Err(e) => eprintln!("warning: {e}"),
        }
    }
    Ok(())
}
