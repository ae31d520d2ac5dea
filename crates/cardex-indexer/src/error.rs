//! Indexer errors.
//!
//! These are orchestration failures: the pass could not run or could not
//! publish. Problems with individual cards and modules never end up here,
//! they become error entries in the index.

use cardex_core::UrlError;
use cardex_index::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid ignore rules in '{url}': {message}")]
    IgnoreRules { url: String, message: String },

    #[error("Realm URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Config error: {0}")]
    Config(String),

    /// A job was handed to a runner serving a different realm.
    #[error("Job for realm '{requested}' sent to the indexer of '{served}'")]
    WrongRealm { requested: String, served: String },

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Job queue is full")]
    QueueFull,

    #[error("Indexing worker has shut down")]
    WorkerGone,

    #[error("Indexing job panicked: {0}")]
    JobPanicked(String),

    /// A job runner reported a failure of its own.
    #[error("Indexing job failed: {0}")]
    Runner(String),
}
