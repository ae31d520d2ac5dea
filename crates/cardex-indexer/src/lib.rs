//! Cardex Indexer - keeping a realm's index in sync with its files
//!
//! This crate handles everything that turns files into index versions:
//! - Reading realms (on disk or in memory)
//! - Ignore rules, gitignore style
//! - Full and incremental indexing passes
//! - The per-realm job queue and the updater in front of it
//! - Watching a realm directory for changes
//!
//! # Example
//!
//! ```no_run
//! use cardex_core::{BasicRenderer, JsonModuleLoader, RealmUrl};
//! use cardex_index::IndexWriter;
//! use cardex_indexer::{FsRealm, IndexUpdater, RealmAdapter, RealmFetcher, UpdaterOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let realm: Arc<dyn RealmAdapter> =
//!     Arc::new(FsRealm::new("./realm", RealmUrl::new("http://localhost:4201/")?));
//! let loader = Arc::new(JsonModuleLoader::new(Arc::new(RealmFetcher::new(realm.clone()))));
//! let writer = Arc::new(IndexWriter::open("./realm/.cardex/index")?);
//! let updater = IndexUpdater::new(realm, writer, loader, Arc::new(BasicRenderer), UpdaterOptions::default());
//! updater.run().await?;
//! println!("{}", updater.stats());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ignore;
pub mod job;
pub mod queue;
pub mod realm;
pub mod updater;
pub mod watch;

pub use config::IndexerConfig;
pub use error::IndexerError;
pub use ignore::{IgnoreData, IgnoreMatcher};
pub use job::{
    FromScratchArgs, FromScratchResult, IncrementalArgs, IncrementalResult, IndexRunner,
    Operation, Stats,
};
pub use queue::{Completion, Job, JobOutcome, JobQueue, JobRunner, LocalRunner};
pub use realm::{FileEntry, FsRealm, MemoryRealm, RealmAdapter, RealmFetcher};
pub use updater::{IndexUpdater, UpdateOptions, UpdaterOptions};
pub use watch::{watch_realm, FileChange, RealmWatcher};
