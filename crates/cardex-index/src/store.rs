//! Versioned index storage.
//!
//! Rows live in sled under `r:{realm}\0{url}\0{version}` and each realm's
//! current version under `v:{realm}`. A publish writes every changed row
//! plus the new version pointer in one batch, then swaps the in-memory
//! snapshot map. Readers hold an `Arc<RealmSnapshot>` and never see a half
//! published version.

use crate::error::StoreError;
use crate::snapshot::RealmSnapshot;
use arc_swap::ArcSwap;
use cardex_core::{EntryKind, ErrorDoc, IndexedEntry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::{Batch, Db};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// How a publish treats rows it wasn't given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// The given entries are the realm's complete contents.
    #[default]
    Replace,
    /// Unmentioned entries carry forward from the previous version.
    Merge,
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub mode: PublishMode,
    /// URLs to drop (merge mode).
    pub removed: Vec<String>,
}

impl PublishOptions {
    pub fn replace() -> Self {
        Self::default()
    }

    pub fn merge(removed: Vec<String>) -> Self {
        Self {
            mode: PublishMode::Merge,
            removed,
        }
    }
}

/// The persisted row. JSON columns are kept as text.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRow {
    url: String,
    kind: String,
    pristine_doc: Option<String>,
    search_doc: Option<String>,
    isolated_html: Option<String>,
    scoped_css_urls: Vec<String>,
    deps: Vec<String>,
    types: Vec<String>,
    error_doc: Option<String>,
    last_modified: String,
    realm_version: u64,
    realm_url: String,
    file_alias: String,
    is_deleted: bool,
}

impl StoredRow {
    fn from_entry(entry: &IndexedEntry) -> Result<Self, StoreError> {
        let to_text = |v: &Option<serde_json::Value>| -> Result<Option<String>, StoreError> {
            v.as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(StoreError::from)
        };
        Ok(Self {
            url: entry.url.clone(),
            kind: entry.kind.as_str().to_string(),
            pristine_doc: to_text(&entry.pristine_doc)?,
            search_doc: to_text(&entry.search_doc)?,
            isolated_html: entry.isolated_html.clone(),
            scoped_css_urls: entry.scoped_css_urls.clone(),
            deps: entry.deps.iter().cloned().collect(),
            types: entry.types.clone(),
            error_doc: entry.error.as_ref().map(serde_json::to_string).transpose()?,
            last_modified: entry.last_modified.to_string(),
            realm_version: entry.realm_version,
            realm_url: entry.realm_url.clone(),
            file_alias: entry.file_alias().to_string(),
            is_deleted: false,
        })
    }

    fn tombstone(realm_url: &str, url: &str, version: u64) -> Self {
        Self {
            url: url.to_string(),
            kind: EntryKind::Error.as_str().to_string(),
            pristine_doc: None,
            search_doc: None,
            isolated_html: None,
            scoped_css_urls: Vec::new(),
            deps: Vec::new(),
            types: Vec::new(),
            error_doc: None,
            last_modified: "0".to_string(),
            realm_version: version,
            realm_url: realm_url.to_string(),
            file_alias: cardex_core::url::trim_module_extension(url).to_string(),
            is_deleted: true,
        }
    }

    fn into_entry(self) -> Result<IndexedEntry, StoreError> {
        let from_text = |v: Option<String>| -> Result<Option<serde_json::Value>, StoreError> {
            v.map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(StoreError::from)
        };
        let kind = EntryKind::parse(&self.kind)
            .ok_or_else(|| StoreError::Corrupted(format!("unknown row kind '{}'", self.kind)))?;
        let last_modified = self
            .last_modified
            .parse()
            .map_err(|_| StoreError::Corrupted(format!("bad last_modified for {}", self.url)))?;
        let error: Option<ErrorDoc> = self
            .error_doc
            .map(|s| serde_json::from_str(&s))
            .transpose()?;
        Ok(IndexedEntry {
            url: self.url,
            kind,
            pristine_doc: from_text(self.pristine_doc)?,
            search_doc: from_text(self.search_doc)?,
            isolated_html: self.isolated_html,
            scoped_css_urls: self.scoped_css_urls,
            types: self.types,
            deps: self.deps.into_iter().collect(),
            error,
            last_modified,
            realm_version: self.realm_version,
            realm_url: self.realm_url,
        })
    }
}

fn realm_prefix(realm_url: &str) -> Vec<u8> {
    format!("r:{}\0", realm_url).into_bytes()
}

fn row_prefix(realm_url: &str, url: &str) -> Vec<u8> {
    format!("r:{}\0{}\0", realm_url, url).into_bytes()
}

fn row_key(realm_url: &str, url: &str, version: u64) -> Vec<u8> {
    let mut key = row_prefix(realm_url, url);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

fn version_key(realm_url: &str) -> Vec<u8> {
    format!("v:{}", realm_url).into_bytes()
}

type SnapshotMap = HashMap<String, Arc<RealmSnapshot>>;

/// The index writer: durable rows plus the current snapshot of each realm.
pub struct IndexWriter {
    db: Db,
    snapshots: ArcSwap<SnapshotMap>,
    publish_lock: Mutex<()>,
}

impl IndexWriter {
    /// Opens or creates an index at the specified path, rebuilding the
    /// current snapshot of every realm it holds.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// An index that disappears when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let mut snapshots = SnapshotMap::new();
        for item in db.scan_prefix(b"v:") {
            let (key, value) = item?;
            let realm_url = std::str::from_utf8(&key[2..])
                .map_err(|e| StoreError::Corrupted(e.to_string()))?
                .to_string();
            let version: u64 = bincode::deserialize(&value)?;
            let entries = Self::load_rows(&db, &realm_url, version)?;
            debug!(
                "Loaded realm {} at version {} ({} entries)",
                realm_url,
                version,
                entries.len()
            );
            snapshots.insert(
                realm_url.clone(),
                Arc::new(RealmSnapshot::new(realm_url, version, entries)),
            );
        }
        Ok(Self {
            db,
            snapshots: ArcSwap::from_pointee(snapshots),
            publish_lock: Mutex::new(()),
        })
    }

    /// Reads the newest row at or below `version` for every URL of a realm.
    fn load_rows(
        db: &Db,
        realm_url: &str,
        version: u64,
    ) -> Result<BTreeMap<String, Arc<IndexedEntry>>, StoreError> {
        let mut rows: BTreeMap<String, StoredRow> = BTreeMap::new();
        // Keys sort by url then big-endian version, so later rows win.
        for item in db.scan_prefix(realm_prefix(realm_url)) {
            let (_key, value) = item?;
            let row: StoredRow = bincode::deserialize(&value)?;
            if row.realm_version <= version {
                rows.insert(row.url.clone(), row);
            }
        }
        let mut entries = BTreeMap::new();
        for (url, row) in rows {
            if !row.is_deleted {
                entries.insert(url, Arc::new(row.into_entry()?));
            }
        }
        Ok(entries)
    }

    /// True if no version has ever been published for this realm.
    pub fn is_new_index(&self, realm_url: &str) -> bool {
        !self.snapshots.load().contains_key(realm_url)
    }

    /// The realm's current version, 0 if never published.
    pub fn current_version(&self, realm_url: &str) -> u64 {
        self.snapshot(realm_url).map(|s| s.version()).unwrap_or(0)
    }

    /// The current snapshot of a realm.
    pub fn snapshot(&self, realm_url: &str) -> Option<Arc<RealmSnapshot>> {
        self.snapshots.load().get(realm_url).cloned()
    }

    /// Every realm with a published version.
    pub fn realms(&self) -> Vec<String> {
        let mut realms: Vec<String> = self.snapshots.load().keys().cloned().collect();
        realms.sort();
        realms
    }

    /// The realm a URL belongs to (longest matching realm URL).
    pub fn realm_of(&self, url: &str) -> Option<String> {
        self.snapshots
            .load()
            .keys()
            .filter(|realm| url.starts_with(realm.as_str()))
            .max_by_key(|realm| realm.len())
            .cloned()
    }

    /// Publishes a new version of a realm.
    ///
    /// Rows are written at `current + 1` and the version pointer moves in the
    /// same batch; the in-memory snapshot swaps only after the batch is
    /// durable.
    pub fn publish(
        &self,
        realm_url: &str,
        entries: Vec<IndexedEntry>,
        options: PublishOptions,
    ) -> Result<Arc<RealmSnapshot>, StoreError> {
        let _guard = self.publish_lock.lock();
        let previous = self.snapshot(realm_url);
        let version = previous.as_ref().map(|s| s.version()).unwrap_or(0) + 1;

        let mut next: BTreeMap<String, Arc<IndexedEntry>> = match (&previous, options.mode) {
            (Some(prev), PublishMode::Merge) => prev.entry_map().clone(),
            _ => BTreeMap::new(),
        };
        let mut batch = Batch::default();
        let mut written = 0usize;

        let removed: BTreeSet<&str> = options.removed.iter().map(String::as_str).collect();
        for url in &removed {
            next.remove(*url);
        }

        for mut entry in entries {
            if removed.contains(entry.url.as_str()) {
                continue;
            }
            entry.realm_version = version;
            entry.realm_url = realm_url.to_string();
            let row = StoredRow::from_entry(&entry)?;
            batch.insert(row_key(realm_url, &entry.url, version), bincode::serialize(&row)?);
            written += 1;
            next.insert(entry.url.clone(), Arc::new(entry));
        }

        // Anything that was visible and no longer is gets a tombstone so
        // historical reads and reopening agree with the snapshot.
        if let Some(prev) = &previous {
            for url in prev.entry_map().keys() {
                if !next.contains_key(url) {
                    let row = StoredRow::tombstone(realm_url, url, version);
                    batch.insert(row_key(realm_url, url, version), bincode::serialize(&row)?);
                }
            }
        }

        batch.insert(version_key(realm_url), bincode::serialize(&version)?);
        self.db.apply_batch(batch)?;
        self.db.flush()?;

        let snapshot = Arc::new(RealmSnapshot::new(realm_url.to_string(), version, next));
        self.snapshots.rcu(|current| {
            let mut map = SnapshotMap::clone(current);
            map.insert(realm_url.to_string(), snapshot.clone());
            map
        });
        info!(
            "Published {} version {} ({} rows written, {} entries)",
            realm_url,
            version,
            written,
            snapshot.len()
        );
        Ok(snapshot)
    }

    /// Reads one entry, at the current version by default.
    ///
    /// Instance URLs may be given with or without `.json`.
    pub fn read(
        &self,
        url: &str,
        at_version: Option<u64>,
    ) -> Result<Option<Arc<IndexedEntry>>, StoreError> {
        let Some(realm_url) = self.realm_of(url) else {
            return Ok(None);
        };
        let Some(snapshot) = self.snapshot(&realm_url) else {
            return Ok(None);
        };
        match at_version {
            None => Ok(snapshot.get_card(url)),
            Some(v) if v >= snapshot.version() => Ok(snapshot.get_card(url)),
            Some(v) => {
                if let Some(hit) = self.read_row(&realm_url, url, v)? {
                    return Ok(Some(hit));
                }
                let file_url = cardex_core::url::instance_file_url(url);
                if file_url != url {
                    return self.read_row(&realm_url, &file_url, v);
                }
                Ok(None)
            }
        }
    }

    fn read_row(
        &self,
        realm_url: &str,
        url: &str,
        version: u64,
    ) -> Result<Option<Arc<IndexedEntry>>, StoreError> {
        let mut newest: Option<StoredRow> = None;
        for item in self.db.scan_prefix(row_prefix(realm_url, url)) {
            let (_key, value) = item?;
            let row: StoredRow = bincode::deserialize(&value)?;
            if row.realm_version > version {
                break;
            }
            newest = Some(row);
        }
        match newest {
            Some(row) if !row.is_deleted => Ok(Some(Arc::new(row.into_entry()?))),
            _ => Ok(None),
        }
    }
}
