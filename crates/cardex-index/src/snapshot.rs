//! An immutable view of one realm at one version.

use cardex_core::url::{instance_file_url, trim_module_extension};
use cardex_core::{EntryKind, IndexedEntry};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RealmSnapshot {
    realm_url: String,
    version: u64,
    entries: BTreeMap<String, Arc<IndexedEntry>>,
    /// Module canonical URL -> file URL.
    modules: BTreeMap<String, String>,
}

impl RealmSnapshot {
    pub fn new(
        realm_url: String,
        version: u64,
        entries: BTreeMap<String, Arc<IndexedEntry>>,
    ) -> Self {
        let modules = entries
            .values()
            .filter(|e| e.is_module_file())
            .map(|e| (e.file_alias().to_string(), e.url.clone()))
            .collect();
        Self {
            realm_url,
            version,
            entries,
            modules,
        }
    }

    pub fn realm_url(&self) -> &str {
        &self.realm_url
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an entry by its exact file URL.
    pub fn get(&self, url: &str) -> Option<Arc<IndexedEntry>> {
        self.entries.get(url).cloned()
    }

    /// Looks up a card by id or file URL, or a module by canonical URL.
    pub fn get_card(&self, url: &str) -> Option<Arc<IndexedEntry>> {
        if let Some(hit) = self.entries.get(url) {
            return Some(hit.clone());
        }
        if let Some(file) = self.modules.get(trim_module_extension(url)) {
            return self.entries.get(file).cloned();
        }
        self.entries.get(instance_file_url(url).as_ref()).cloned()
    }

    /// The entry for a module, by canonical or file URL.
    pub fn module(&self, url: &str) -> Option<Arc<IndexedEntry>> {
        self.modules
            .get(trim_module_extension(url))
            .and_then(|file| self.entries.get(file))
            .cloned()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<IndexedEntry>> {
        self.entries.values()
    }

    pub(crate) fn entry_map(&self) -> &BTreeMap<String, Arc<IndexedEntry>> {
        &self.entries
    }

    /// Successfully indexed instances.
    pub fn instances(&self) -> impl Iterator<Item = &Arc<IndexedEntry>> {
        self.entries.values().filter(|e| e.kind == EntryKind::Instance)
    }

    /// Counts of (instances, modules, errors).
    pub fn counts(&self) -> (usize, usize, usize) {
        self.entries.values().fold((0, 0, 0), |(i, m, e), entry| match entry.kind {
            EntryKind::Instance => (i + 1, m, e),
            EntryKind::Module => (i, m + 1, e),
            EntryKind::Error => (i, m, e + 1),
        })
    }
}
