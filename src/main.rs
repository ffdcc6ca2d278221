use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docfeed::aggregate::RecencyAggregator;
use docfeed::broadcast::{Broadcaster, Notification};
use docfeed::cache::{NoopCache, TtlCache};
use docfeed::cli::{Cli, Commands};
use docfeed::config::DocfeedConfig;
use docfeed::context::RepositoryContext;
use docfeed::fs::resolve_path;
use docfeed::git::diff::{file_diff, is_revision_id};
use docfeed::git::log::{history, last_commits_batch};
use docfeed::git::status::{head_revision, is_dirty, working_dir_status};
use docfeed::output::{print_diff, print_history, print_last, print_recent, print_status};
use docfeed::record::ExtensionSet;
use docfeed::watcher::{WatchedRepository, start_watcher};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docfeed=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: &Path, explicit: Option<&Path>) -> Result<DocfeedConfig> {
    match explicit {
        Some(file) => DocfeedConfig::load_from(file),
        None => Ok(DocfeedConfig::load(path)),
    }
}

async fn open_context(path: &Path, config: &DocfeedConfig) -> Result<RepositoryContext> {
    RepositoryContext::from_config(path, config)
        .await
        .with_context(|| format!("cannot open {}", path.display()))
}

/// The directories a long-running command serves: every `[[repos]]` entry
/// (named) when the config lists any, otherwise `path` alone (unnamed).
async fn open_repositories(
    path: &Path,
    config: &DocfeedConfig,
) -> Result<Vec<(Option<String>, RepositoryContext)>> {
    if !config.is_multi_repo() {
        return Ok(vec![(None, open_context(path, config).await?)]);
    }
    let problems = config.validate();
    if !problems.is_empty() {
        bail!("invalid configuration:\n  {}", problems.join("\n  "));
    }
    let mut repos = Vec::with_capacity(config.repos.len());
    for repo in &config.repos {
        let context = open_context(&repo.path, config).await?;
        info!(repo = %repo.name, root = %context.root().display(), versioned = context.is_versioned(), "serving");
        repos.push((Some(repo.name.clone()), context));
    }
    Ok(repos)
}

fn watched(repos: &[(Option<String>, RepositoryContext)]) -> Vec<WatchedRepository> {
    repos
        .iter()
        .map(|(name, context)| WatchedRepository::new(name.clone(), context.root()))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Recent {
            path,
            limit,
            ext,
            config,
            format,
        } => {
            let config = load_config(&path, config.as_deref())?;
            let extensions = if ext.is_empty() {
                config.extension_set()
            } else {
                ExtensionSet::new(&ext)
            };
            let context = open_context(&path, &config).await?;
            let aggregator = RecencyAggregator::new(Arc::new(NoopCache));
            let feed = aggregator.aggregate(&context, limit, &extensions).await;
            print_recent(&feed, format);
        }

        Commands::History {
            path,
            file,
            limit,
            format,
        } => {
            let config = DocfeedConfig::load(&path);
            let context = open_context(&path, &config).await?;
            resolve_path(context.root(), &file).with_context(|| format!("invalid path {file:?}"))?;
            let revisions = history(&context, &file, limit).await;
            print_history(&revisions, format);
        }

        Commands::Last {
            path,
            files,
            format,
        } => {
            let config = DocfeedConfig::load(&path);
            let context = open_context(&path, &config).await?;
            for file in &files {
                resolve_path(context.root(), file)
                    .with_context(|| format!("invalid path {file:?}"))?;
            }
            let found = last_commits_batch(&context, &files).await;
            print_last(&files, &found, format);
        }

        Commands::Diff {
            path,
            file,
            revision,
            format,
        } => {
            if !is_revision_id(&revision) {
                bail!("invalid revision id {revision:?} (expected 4 to 40 hex digits)");
            }
            let config = DocfeedConfig::load(&path);
            let context = open_context(&path, &config).await?;
            resolve_path(context.root(), &file).with_context(|| format!("invalid path {file:?}"))?;
            let Some(diff) = file_diff(&context, &file, &revision).await else {
                bail!("no change to {file} in revision {revision}");
            };
            print_diff(&diff, format);
        }

        Commands::Status { path, format } => {
            let config = DocfeedConfig::load(&path);
            let context = open_context(&path, &config).await?;
            if !context.is_versioned() {
                warn!("{} is not inside a git work tree", context.root().display());
            }
            let status = working_dir_status(&context).await;
            let head = head_revision(&context).await;
            let dirty = is_dirty(&context).await;
            print_status(&status, head.as_deref(), dirty, format);
        }

        Commands::Watch { path, config } => {
            let config = load_config(&path, config.as_deref())?;
            let repos = open_repositories(&path, &config).await?;
            let broadcaster = Broadcaster::new();
            broadcaster.on_files_changed(|batch| {
                let line = serde_json::to_string(&Notification::FilesChanged(batch.clone()));
                match line {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(error = %err, "failed to encode notification"),
                }
            });
            let handle = start_watcher(
                watched(&repos),
                config.event_filter(),
                config.timing(),
                Arc::new(TtlCache::new(config.ttl())),
                broadcaster,
            )?;
            tokio::signal::ctrl_c().await?;
            handle.shutdown().await;
        }

        #[cfg(feature = "web")]
        Commands::Serve {
            path,
            host,
            port,
            config,
        } => {
            use docfeed::server::{AppState, ServedRepository, serve};

            let config = load_config(&path, config.as_deref())?;
            let repos = open_repositories(&path, &config).await?;
            let host = host.unwrap_or_else(|| config.host.clone());
            let port = port.unwrap_or(config.port);
            let addr = tokio::net::lookup_host((host.as_str(), port))
                .await
                .with_context(|| format!("cannot resolve {host}"))?
                .next()
                .with_context(|| format!("no address for {host}"))?;

            let cache = Arc::new(TtlCache::new(config.ttl()));
            let broadcaster = Broadcaster::new();
            let watcher = start_watcher(
                watched(&repos),
                config.event_filter(),
                config.timing(),
                cache.clone(),
                broadcaster.clone(),
            )?;
            let state = AppState::new(
                repos
                    .into_iter()
                    .map(|(name, context)| ServedRepository { name, context })
                    .collect(),
                RecencyAggregator::new(cache),
                config.extension_set(),
                broadcaster,
            );
            let served = serve(state, addr).await;
            watcher.shutdown().await;
            served?;
        }

        Commands::InitConfig { file, force } => {
            if file.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", file.display());
            }
            DocfeedConfig::write_example(&file)?;
            println!("Wrote {}", file.display());
        }
    }

    Ok(())
}
