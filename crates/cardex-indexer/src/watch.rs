//! File watcher for realms on disk.
//!
//! Uses notify through its debouncer, so an editor's burst of writes to one
//! file turns into one change. Every change becomes a queued update on the
//! realm's [`IndexUpdater`]; the queue merges repeats for the same URL.

use crate::error::IndexerError;
use crate::realm::{FsRealm, RealmAdapter};
use crate::updater::IndexUpdater;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A debounced change under the realm root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub url: String,
    pub deleted: bool,
}

/// Turns a changed path into the realm URL it affects. Directories and
/// paths outside the realm don't count.
pub fn classify(realm: &FsRealm, path: &Path) -> Option<FileChange> {
    if path.is_dir() {
        return None;
    }
    let local = realm.relative_path(path)?;
    Some(FileChange {
        url: realm.realm_url().join(&local),
        deleted: !path.exists(),
    })
}

/// Watches a realm directory.
pub struct RealmWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<DebounceEventResult>,
    realm: Arc<FsRealm>,
}

impl RealmWatcher {
    pub fn new(realm: Arc<FsRealm>, debounce: Duration) -> Result<Self, IndexerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            let _ = tx.send(result);
        })?;
        debouncer
            .watcher()
            .watch(realm.root(), RecursiveMode::Recursive)?;
        info!("Watching {}", realm.root().display());
        Ok(Self {
            _debouncer: debouncer,
            rx,
            realm,
        })
    }

    /// The next batch of changes; `None` once the watcher is gone.
    pub async fn next_changes(&mut self) -> Option<Vec<FileChange>> {
        loop {
            match self.rx.recv().await? {
                Ok(events) => {
                    let mut paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
                    paths.sort();
                    paths.dedup();
                    let changes: Vec<FileChange> = paths
                        .iter()
                        .filter_map(|path| classify(&self.realm, path))
                        .collect();
                    if !changes.is_empty() {
                        return Some(changes);
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            }
        }
    }
}

/// Feeds every change under the realm root to the updater until the
/// watcher stops.
pub async fn watch_realm(
    updater: Arc<IndexUpdater>,
    realm: Arc<FsRealm>,
    debounce: Duration,
) -> Result<(), IndexerError> {
    let mut watcher = RealmWatcher::new(realm, debounce)?;
    while let Some(changes) = watcher.next_changes().await {
        for change in changes {
            if updater.is_ignored(&change.url) {
                debug!("Ignoring change to {}", change.url);
                continue;
            }
            debug!(
                "{} {}",
                if change.deleted { "Deleted" } else { "Changed" },
                change.url
            );
            if let Err(e) = updater.schedule(&change.url, change.deleted).await {
                warn!("Could not queue {}: {}", change.url, e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardex_core::url::RealmUrl;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_classify_paths() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Person")).unwrap();
        fs::write(dir.path().join("Person/1.json"), "{}").unwrap();
        let realm = FsRealm::new(dir.path(), RealmUrl::new("http://test-realm/test/").unwrap());

        assert_eq!(
            classify(&realm, &dir.path().join("Person/1.json")),
            Some(FileChange {
                url: "http://test-realm/test/Person/1.json".into(),
                deleted: false,
            })
        );
        assert_eq!(
            classify(&realm, &dir.path().join("Person/2.json")).map(|c| c.deleted),
            Some(true)
        );
        assert_eq!(classify(&realm, &dir.path().join("Person")), None);
        assert_eq!(classify(&realm, Path::new("/somewhere/else.json")), None);
    }
}
