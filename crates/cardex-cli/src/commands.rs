//! CLI command implementations.

use cardex_core::{BasicRenderer, EntryKind, JsonModuleLoader};
use cardex_index::{CardOptions, CardResult, IndexWriter, Query};
use cardex_indexer::config::CONFIG_DIR;
use cardex_indexer::{
    watch_realm, FsRealm, IndexUpdater, IndexerConfig, RealmAdapter, RealmFetcher, UpdaterOptions,
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// One realm directory: its config, files and index store.
struct Workspace {
    config: IndexerConfig,
    realm: Arc<FsRealm>,
    writer: Arc<IndexWriter>,
}

impl Workspace {
    fn open(path: &Path, realm_url: Option<&str>) -> Result<Self> {
        let mut config = IndexerConfig::load(path)?;
        if let Some(url) = realm_url {
            config.realm_url = url.to_string();
        }
        let realm = FsRealm::new(path, config.realm()?)
            .follow_symlinks(config.follow_symlinks)
            .always_ignore(config.always_ignore.clone());
        let store_dir = config.store_dir(path);
        debug!("Opening index store at {}", store_dir.display());
        let writer = IndexWriter::open(&store_dir)?;
        Ok(Self {
            config,
            realm: Arc::new(realm),
            writer: Arc::new(writer),
        })
    }

    fn realm_url(&self) -> &str {
        self.realm.realm_url().as_str()
    }

    fn updater(&self) -> IndexUpdater {
        let realm: Arc<dyn RealmAdapter> = self.realm.clone();
        let loader = JsonModuleLoader::new(Arc::new(RealmFetcher::new(realm.clone())))
            .with_mapper(self.config.url_mapper());
        IndexUpdater::new(
            realm,
            self.writer.clone(),
            Arc::new(loader),
            Arc::new(BasicRenderer),
            UpdaterOptions::from(&self.config),
        )
    }
}

/// Initialize Cardex in a realm directory.
pub fn init(path: &Path, realm_url: Option<&str>) -> Result<()> {
    let config_path = IndexerConfig::path_for(path);
    if config_path.exists() {
        println!("{} Already initialized", "✓".green());
        return Ok(());
    }

    let mut config = IndexerConfig::default();
    if let Some(url) = realm_url {
        config.realm_url = url.to_string();
    }
    // Reject a bad realm URL before anything lands on disk.
    config.realm()?;
    config.save(path)?;

    println!("{} Initialized Cardex in {}", "✓".green(), path.display());
    println!("  Realm URL: {}", config.realm_url.cyan());
    println!("  Run {} to index the realm", "cardex index".cyan());
    Ok(())
}

/// Index a realm directory from scratch.
pub async fn index(path: &Path, realm_url: Option<&str>) -> Result<()> {
    let workspace = Workspace::open(path, realm_url)?;
    index_workspace(&workspace).await
}

async fn index_workspace(workspace: &Workspace) -> Result<()> {
    println!("{} {}", "Indexing".cyan(), workspace.realm_url());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("Reading realm...");

    let start = Instant::now();
    let updater = workspace.updater();
    updater.run().await?;
    if let Some(pass) = updater.indexing() {
        pass.await?;
    }
    spinner.finish_and_clear();

    let stats = updater.stats();
    println!(
        "{} Indexed {} instances and {} modules in {}ms",
        "✓".green(),
        stats.instances_indexed.to_string().cyan(),
        stats.modules_indexed.to_string().cyan(),
        start.elapsed().as_millis()
    );
    println!(
        "  Version {}",
        workspace.writer.current_version(workspace.realm_url())
    );

    let errors = stats.instance_errors + stats.module_errors;
    if errors > 0 {
        println!("\n{} {} entries with errors:", "⚠".yellow(), errors);
        print_errors(workspace, 5);
    }
    Ok(())
}

fn print_errors(workspace: &Workspace, limit: usize) {
    let Some(snapshot) = workspace.writer.snapshot(workspace.realm_url()) else {
        return;
    };
    let failed: Vec<_> = snapshot
        .entries()
        .filter(|entry| entry.kind == EntryKind::Error)
        .collect();
    for entry in failed.iter().take(limit) {
        if let Some(error) = &entry.error {
            println!("  {} - {} {}", entry.url.red(), error.status, error.detail);
        }
    }
    if failed.len() > limit {
        println!("  ... and {} more", failed.len() - limit);
    }
}

/// Query text is inline JSON, or `@file` to read it from a file.
fn read_query_text(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(file) => Ok(fs::read_to_string(file)?),
        None => Ok(arg.to_string()),
    }
}

/// Run a query against the current index.
pub fn query(path: &Path, realm_url: Option<&str>, query: &str, json: bool) -> Result<()> {
    let workspace = Workspace::open(path, realm_url)?;
    let query = Query::from_json(&read_query_text(query)?)?;
    let result = workspace.writer.query(workspace.realm_url(), &query)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result.to_document())?);
        return Ok(());
    }

    if result.cards.is_empty() {
        println!("No matching cards");
        return Ok(());
    }

    println!(
        "Found {} cards (showing {}):\n",
        result.total,
        result.cards.len()
    );
    for (id, entry) in result.ids().iter().zip(&result.cards) {
        let card_type = entry.types.first().map(String::as_str).unwrap_or("");
        println!("  {} {}", id.cyan(), card_type.dimmed());
    }
    Ok(())
}

/// Print one card from the index.
pub fn card(path: &Path, realm_url: Option<&str>, url: &str, links: bool) -> Result<()> {
    let workspace = Workspace::open(path, realm_url)?;
    let options = CardOptions { load_links: links };
    match workspace.writer.card(url, options) {
        None => {
            println!("{} No card at {}", "✗".red(), url);
        }
        Some(CardResult::Doc { doc }) => {
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Some(CardResult::Error { error }) => {
            println!("{} {} {}", "✗".red(), error.status.to_string().red(), error.detail);
            if !error.deps.is_empty() {
                println!("  {} {}", "Depends on:".dimmed(), error.deps.join(", "));
            }
            if error.last_known_good_html.is_some() {
                println!("  {}", "A last known good rendering is available".dimmed());
            }
        }
    }
    Ok(())
}

/// Show index status.
pub fn status(path: &Path, realm_url: Option<&str>) -> Result<()> {
    if !path.join(CONFIG_DIR).exists() {
        println!("{} Cardex not initialized in this directory", "✗".red());
        println!("  Run {} to initialize", "cardex init".cyan());
        return Ok(());
    }

    let workspace = Workspace::open(path, realm_url)?;
    println!("{}", "Cardex Status".cyan().bold());
    println!();
    println!("  {} {}", "Realm:".dimmed(), workspace.realm_url());

    let Some(snapshot) = workspace.writer.snapshot(workspace.realm_url()) else {
        println!("  {} not indexed yet", "Index:".dimmed());
        return Ok(());
    };
    let (instances, modules, errors) = snapshot.counts();
    println!("  {} {}", "Version:".dimmed(), snapshot.version());
    println!("  {} {}", "Instances:".dimmed(), instances);
    println!("  {} {}", "Modules:".dimmed(), modules);
    println!(
        "  {} {}",
        "Errors:".dimmed(),
        if errors > 0 {
            errors.to_string().red().to_string()
        } else {
            errors.to_string()
        }
    );
    if errors > 0 {
        println!();
        print_errors(&workspace, 10);
    }
    Ok(())
}

/// Index the realm, then keep the index current as files change.
pub async fn watch(path: &Path, realm_url: Option<&str>) -> Result<()> {
    let workspace = Workspace::open(path, realm_url)?;
    let updater = Arc::new(workspace.updater());

    updater.run().await?;
    if let Some(pass) = updater.indexing() {
        pass.await?;
    }
    println!("{} {}", "✓".green(), updater.stats());

    let debounce = Duration::from_millis(workspace.config.debounce_ms);
    println!("{} Watching {}", "✓".green(), path.display());
    println!("  Press {} to stop", "Ctrl+C".cyan());

    tokio::select! {
        result = watch_realm(updater.clone(), workspace.realm.clone(), debounce) => result?,
        _ = tokio::signal::ctrl_c() => println!("\nStopped watching"),
    }
    Ok(())
}
