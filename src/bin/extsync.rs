// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use extsync::{
    config::Settings,
    extension::Extension,
    fetch::Fetcher,
    path::default_config_dir,
    reconcile::{error_chain, Lifecycle, Reconciler},
    secret::{SecretLookup, SecretStore},
    sync::{
        overrides::{collect_resource_overrides, FileOverrideSink, OverrideConfigMap, OverrideSink},
        tracker::FileTracker,
        SyncEngine,
    },
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::exit,
    sync::Arc,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "extsync [options] <extsync-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to settings file.
    #[arg(short, long, global = true, value_name = "path")]
    pub settings: Option<PathBuf>,

    /// Override shared output root.
    #[arg(short, long, global = true, value_name = "path")]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let settings = load_settings(self.settings.as_deref(), self.output)?;
        match self.command {
            Command::Sync(opts) => run_sync(settings, opts).await,
            Command::Remove(opts) => run_remove(settings, opts).await,
            Command::Status(_) => run_status(settings),
            Command::Overrides(_) => run_overrides(settings),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Synchronize extension sources into the output root.
    #[command(override_usage = "extsync sync [options] [<manifest>]...")]
    Sync(SyncOptions),

    /// Remove files of extensions and delete their manifests.
    #[command(override_usage = "extsync remove [options] <manifest>...")]
    Remove(RemoveOptions),

    /// Show snapshot and ownership information of the output root.
    #[command(override_usage = "extsync status [options]")]
    Status(StatusOptions),

    /// Print derived resource override document.
    #[command(override_usage = "extsync overrides [options]")]
    Overrides(OverridesOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncOptions {
    /// Manifests to synchronize, all manifests in the manifest directory if
    /// none are given.
    #[arg(value_name = "manifest")]
    pub manifests: Vec<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    /// Manifests of extensions to remove.
    #[arg(required = true, value_name = "manifest")]
    pub manifests: Vec<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct StatusOptions {}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct OverridesOptions {}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn load_settings(path: Option<&Path>, output: Option<PathBuf>) -> Result<Settings> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => Some(default_config_dir()?.join("settings.toml")).filter(|path| path.exists()),
    };

    let settings = match path {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read settings {:?}", path.display()))?
            .parse::<Settings>()?,
        None => Settings::try_default()?,
    };

    Ok(match output {
        Some(output) => settings.with_output_path(output),
        None => settings,
    })
}

fn build_reconciler(settings: &Settings) -> Result<Reconciler> {
    let fetcher = Fetcher::new(&settings.known_hosts)?;
    let secrets: Arc<dyn SecretLookup> = Arc::new(SecretStore::load(&settings.secrets)?);
    let sink: Arc<dyn OverrideSink> =
        Arc::new(FileOverrideSink::from(&settings.override_config_map));
    let engine = SyncEngine::new(&settings.output_path, fetcher, secrets, sink)?;

    Ok(Reconciler::new(engine))
}

fn manifest_paths(settings: &Settings, paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    if !paths.is_empty() {
        return Ok(paths);
    }

    let pattern = settings.manifests.join("*.toml");
    let mut paths = glob::glob(&pattern.to_string_lossy())?.collect::<Result<Vec<_>, _>>()?;
    paths.sort();

    Ok(paths)
}

fn load_manifest(path: &Path) -> Result<Extension> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {:?}", path.display()))?
        .parse()
        .with_context(|| format!("failed to parse manifest {:?}", path.display()))
}

fn save_manifest(path: &Path, extension: &Extension) -> Result<()> {
    std::fs::write(path, extension.to_string())
        .with_context(|| format!("failed to write manifest {:?}", path.display()))
}

async fn run_sync(settings: Settings, opts: SyncOptions) -> Result<()> {
    let paths = manifest_paths(&settings, opts.manifests)?;
    if paths.is_empty() {
        info!("no extension manifests in {:?}", settings.manifests.display());
        return Ok(());
    }

    let reconciler = build_reconciler(&settings)?;
    let bar = ProgressBar::new(paths.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{elapsed_precise:.green}  {msg:<40}  [{wide_bar:.yellow/blue}]")?
            .progress_chars("-Cco."),
    );
    bar.set_message("synchronizing extensions");

    let mut manifests = Vec::with_capacity(paths.len());
    for path in paths {
        let extension = load_manifest(&path)?;
        manifests.push((path, extension));
    }

    let pending = manifests.into_iter().map(|(path, mut extension)| {
        let reconciler = &reconciler;
        let bar = bar.clone();
        async move {
            let result = reconciler.reconcile(&mut extension).await;
            bar.inc(1);
            (path, extension, result)
        }
    });
    let results = join_all(pending).await;
    bar.finish_and_clear();

    let mut failures = 0;
    for (path, extension, result) in results {
        save_manifest(&path, &extension)?;
        if let Err(error) = result {
            warn!("{}: {}", extension.name(), error_chain(&error));
            failures += 1;
        }
    }

    if failures > 0 {
        return Err(anyhow!("{failures} extensions failed to synchronize"));
    }

    Ok(())
}

async fn run_remove(settings: Settings, opts: RemoveOptions) -> Result<()> {
    let reconciler = build_reconciler(&settings)?;

    for path in opts.manifests {
        let mut extension = load_manifest(&path)?;
        extension.metadata.deletion_requested = true;

        match reconciler.reconcile(&mut extension).await {
            Ok(Lifecycle::Removed) => {
                std::fs::remove_file(&path)
                    .with_context(|| format!("failed to delete manifest {:?}", path.display()))?;
                info!("removed extension {}", extension.name());
            }
            Ok(_) => save_manifest(&path, &extension)?,
            Err(error) => {
                save_manifest(&path, &extension)?;
                return Err(error.into());
            }
        }
    }

    Ok(())
}

fn run_status(settings: Settings) -> Result<()> {
    let reconciler = build_reconciler(&settings)?;
    let engine = reconciler.engine();

    println!("output root: {}", engine.output_path().display());
    for path in manifest_paths(&settings, Vec::new())? {
        let extension = load_manifest(&path)?;
        let snapshot = engine.snapshot_store(extension.name()).load();
        let ready = match extension.status.ready() {
            Some(condition) => format!("{:?}: {}", condition.status, condition.message),
            None => "unknown".into(),
        };

        println!("\n{} ({})", extension.name(), ready);
        for revision in &snapshot.revisions {
            println!("  revision {revision}");
        }
        println!("  {} files placed", snapshot.files.len());
    }

    let tracker = FileTracker::load(engine.tracker_path())?;
    let mut owners = BTreeMap::new();
    for (_, metadata) in tracker.iter() {
        *owners.entry(metadata.owner.clone()).or_insert(0usize) += 1;
    }

    println!("\ntracked files: {}", tracker.len());
    for (owner, count) in owners {
        println!("  {owner}: {count}");
    }

    Ok(())
}

fn run_overrides(settings: Settings) -> Result<()> {
    let overrides = collect_resource_overrides(&settings.output_path)?;
    let config_map = OverrideConfigMap::build(
        &settings.override_config_map.name,
        &settings.override_config_map.namespace,
        &overrides,
    )?;
    print!("{}", serde_yaml_ng::to_string(&config_map)?);

    Ok(())
}
