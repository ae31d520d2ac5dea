//! Cardex CLI - Command-line interface for Cardex
//!
//! This is the main entry point for users working with a realm's index.
//! It provides commands for indexing, querying and watching a realm.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "cardex")]
#[command(author = "Cardex Contributors")]
#[command(version)]
#[command(about = "Versioned card index for realms", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Realm URL, overriding the configured one
    #[arg(long, global = true)]
    realm_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Cardex in a realm directory
    Init {
        /// Realm directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Index the realm from scratch
    Index {
        /// Realm directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Search the index
    Query {
        /// Query JSON, or @file to read it from a file
        query: String,

        /// Realm directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Print the full JSON response
        #[arg(long)]
        json: bool,
    },

    /// Print one card
    Card {
        /// Card URL
        url: String,

        /// Realm directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Include linked cards
        #[arg(long)]
        links: bool,
    },

    /// Show index status and statistics
    Status {
        /// Realm directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Index the realm and keep it current as files change
    Watch {
        /// Realm directory (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let realm_url = cli.realm_url.as_deref();
    let result = match cli.command {
        Commands::Init { path } => commands::init(&path, realm_url),
        Commands::Index { path } => commands::index(&path, realm_url).await,
        Commands::Query { query, path, json } => commands::query(&path, realm_url, &query, json),
        Commands::Card { url, path, links } => commands::card(&path, realm_url, &url, links),
        Commands::Status { path } => commands::status(&path, realm_url),
        Commands::Watch { path } => commands::watch(&path, realm_url).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
