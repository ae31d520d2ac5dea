//! Realm storage adapters.
//!
//! The indexer reads realm files through [`RealmAdapter`]. [`FsRealm`]
//! serves a directory on disk, [`MemoryRealm`] keeps files in memory for
//! tests and embedding. [`RealmFetcher`] lets the module loader read module
//! source through the same adapters.

use crate::error::IndexerError;
use crate::ignore::INTERNAL_DIRS;
use cardex_core::url::RealmUrl;
use cardex_core::{LoaderError, SourceFetcher};
use ignore::WalkBuilder;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::debug;

/// One file's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Realm-relative path using `/` separators.
    pub path: String,
    pub content: String,
    pub last_modified: u64,
}

/// Read access to the files of a realm.
pub trait RealmAdapter: Send + Sync {
    fn realm_url(&self) -> &RealmUrl;

    /// Realm-relative paths of every file, sorted.
    fn list_files(&self) -> Result<Vec<String>, IndexerError>;

    /// Reads a file; `Ok(None)` if it doesn't exist.
    fn read_file(&self, path: &str) -> Result<Option<FileEntry>, IndexerError>;

    /// Reads a file by URL.
    fn read_url(&self, url: &str) -> Result<Option<FileEntry>, IndexerError> {
        match self.realm_url().local_path(url) {
            Some(path) => self.read_file(path),
            None => Ok(None),
        }
    }
}

/// A realm backed by a directory.
pub struct FsRealm {
    root: PathBuf,
    realm_url: RealmUrl,
    follow_symlinks: bool,
    always_ignore: Vec<String>,
}

impl FsRealm {
    pub fn new(root: impl Into<PathBuf>, realm_url: RealmUrl) -> Self {
        Self {
            root: root.into(),
            realm_url,
            follow_symlinks: false,
            always_ignore: vec!["node_modules".to_string()],
        }
    }

    /// Builder pattern: follow symbolic links while walking.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Builder pattern: directories never walked into.
    pub fn always_ignore(mut self, names: Vec<String>) -> Self {
        self.always_ignore = names;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Realm-relative path of a file under the root.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |acc, seg| acc.join(seg))
    }
}

impl RealmAdapter for FsRealm {
    fn realm_url(&self) -> &RealmUrl {
        &self.realm_url
    }

    fn list_files(&self) -> Result<Vec<String>, IndexerError> {
        let skip: Vec<String> = INTERNAL_DIRS
            .iter()
            .map(|s| s.to_string())
            .chain(self.always_ignore.iter().cloned())
            .collect();

        // Ignore files are applied by the matcher, not the walker: the
        // indexer needs to see the ignore files themselves.
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(self.follow_symlinks)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir && skip.iter().any(|name| entry.file_name() == name.as_str()))
            })
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| IndexerError::Io(std::io::Error::other(e.to_string())))?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if let Some(rel) = self.relative_path(entry.path()) {
                files.push(rel);
            }
        }
        files.sort();
        debug!("Found {} files under {}", files.len(), self.root.display());
        Ok(files)
    }

    fn read_file(&self, path: &str) -> Result<Option<FileEntry>, IndexerError> {
        let full = self.full_path(path);
        if !full.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&full)?;
        let last_modified = fs::metadata(&full)?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Some(FileEntry {
            path: path.to_string(),
            content,
            last_modified,
        }))
    }
}

/// An in-memory realm with a logical modification clock.
pub struct MemoryRealm {
    realm_url: RealmUrl,
    files: RwLock<BTreeMap<String, (String, u64)>>,
    clock: RwLock<u64>,
}

impl MemoryRealm {
    pub fn new(realm_url: RealmUrl) -> Self {
        Self {
            realm_url,
            files: RwLock::new(BTreeMap::new()),
            clock: RwLock::new(0),
        }
    }

    /// Builder pattern: seed a file.
    pub fn with_file(self, path: &str, content: impl Into<String>) -> Self {
        self.write(path, content);
        self
    }

    /// Writes a file and returns its URL.
    pub fn write(&self, path: &str, content: impl Into<String>) -> String {
        let stamp = {
            let mut clock = self.clock.write();
            *clock += 1;
            *clock
        };
        let path = path.trim_start_matches('/').to_string();
        self.files.write().insert(path.clone(), (content.into(), stamp));
        self.realm_url.join(&path)
    }

    /// Removes a file and returns its URL.
    pub fn remove(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        self.files.write().remove(path);
        self.realm_url.join(path)
    }
}

impl RealmAdapter for MemoryRealm {
    fn realm_url(&self) -> &RealmUrl {
        &self.realm_url
    }

    fn list_files(&self) -> Result<Vec<String>, IndexerError> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn read_file(&self, path: &str) -> Result<Option<FileEntry>, IndexerError> {
        Ok(self
            .files
            .read()
            .get(path)
            .map(|(content, stamp)| FileEntry {
                path: path.to_string(),
                content: content.clone(),
                last_modified: *stamp,
            }))
    }
}

/// Serves module source out of realm adapters.
pub struct RealmFetcher {
    realms: Vec<Arc<dyn RealmAdapter>>,
}

impl RealmFetcher {
    pub fn new(realm: Arc<dyn RealmAdapter>) -> Self {
        Self {
            realms: vec![realm],
        }
    }

    /// Builder pattern: also serve another realm.
    pub fn with_realm(mut self, realm: Arc<dyn RealmAdapter>) -> Self {
        self.realms.push(realm);
        self
    }
}

impl SourceFetcher for RealmFetcher {
    fn fetch(&self, url: &str) -> Result<Option<String>, LoaderError> {
        for realm in &self.realms {
            if !realm.realm_url().contains(url) {
                continue;
            }
            return realm
                .read_url(url)
                .map(|file| file.map(|f| f.content))
                .map_err(|e| LoaderError::Fetch {
                    url: url.to_string(),
                    message: e.to_string(),
                });
        }
        Ok(None)
    }
}
