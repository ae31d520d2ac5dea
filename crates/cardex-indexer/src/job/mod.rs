//! Indexing jobs.
//!
//! A job is one pass over a realm, either from scratch or incremental for a
//! single changed URL. Either way the pass ends with exactly one publish (or
//! none, if nothing changed), so readers only ever see complete versions.
//!
//! Problems with individual files never fail a job: they turn into error
//! entries. A job fails only if it can't read the realm or can't publish.

mod instance;
mod module;

use crate::error::IndexerError;
use crate::ignore::{is_ignore_file, IgnoreData, IgnoreMatcher};
use crate::realm::{FileEntry, RealmAdapter};
use cardex_core::url::{is_instance_url, is_module_url, RealmUrl};
use cardex_core::{EntryKind, IndexedEntry, LoaderSource, ModuleLoader, Renderer, SchemaResolver};
use cardex_index::{DependencyGraph, IndexWriter, PublishOptions, RealmSnapshot};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Arguments of a from-scratch pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FromScratchArgs {
    #[serde(rename = "realmURL")]
    pub realm_url: RealmUrl,
    pub realm_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FromScratchResult {
    pub ignore_data: IgnoreData,
    pub stats: Stats,
}

/// What happened to the changed URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[default]
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Arguments of an incremental pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalArgs {
    pub url: String,
    #[serde(rename = "realmURL")]
    pub realm_url: RealmUrl,
    pub realm_username: String,
    pub operation: Operation,
    /// Ignore rules in effect, as returned by the previous pass.
    pub ignore_data: IgnoreData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalResult {
    /// Every URL the pass recomputed or removed.
    pub invalidations: Vec<String>,
    pub ignore_data: IgnoreData,
    pub stats: Stats,
}

/// Counters for the entries one pass touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub instances_indexed: usize,
    pub modules_indexed: usize,
    pub instance_errors: usize,
    pub module_errors: usize,
    /// Entries written plus entries removed.
    pub total_index_entries: usize,
}

impl Stats {
    fn tally(entries: &[IndexedEntry], removed: usize) -> Self {
        let mut stats = Self {
            total_index_entries: entries.len() + removed,
            ..Self::default()
        };
        for entry in entries {
            match (entry.kind, entry.is_module_file()) {
                (EntryKind::Instance, _) => stats.instances_indexed += 1,
                (EntryKind::Module, _) => stats.modules_indexed += 1,
                (EntryKind::Error, true) => stats.module_errors += 1,
                (EntryKind::Error, false) => stats.instance_errors += 1,
            }
        }
        stats
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instances, {} modules, {} instance errors, {} module errors",
            self.instances_indexed, self.modules_indexed, self.instance_errors, self.module_errors
        )
    }
}

/// Runs indexing passes for one realm.
pub struct IndexRunner {
    realm: Arc<dyn RealmAdapter>,
    writer: Arc<IndexWriter>,
    loader: Arc<dyn ModuleLoader>,
    renderer: Arc<dyn Renderer>,
    always_ignore: Vec<String>,
}

impl IndexRunner {
    pub fn new(
        realm: Arc<dyn RealmAdapter>,
        writer: Arc<IndexWriter>,
        loader: Arc<dyn ModuleLoader>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            realm,
            writer,
            loader,
            renderer,
            always_ignore: vec!["node_modules".to_string()],
        }
    }

    /// Builder pattern: directory names that are never indexed.
    pub fn with_always_ignore(mut self, names: Vec<String>) -> Self {
        self.always_ignore = names;
        self
    }

    pub fn realm(&self) -> &Arc<dyn RealmAdapter> {
        &self.realm
    }

    pub fn writer(&self) -> &Arc<IndexWriter> {
        &self.writer
    }

    pub fn always_ignore(&self) -> &[String] {
        &self.always_ignore
    }

    fn check_realm(&self, requested: &RealmUrl) -> Result<(), IndexerError> {
        if requested != self.realm.realm_url() {
            return Err(IndexerError::WrongRealm {
                requested: requested.to_string(),
                served: self.realm.realm_url().to_string(),
            });
        }
        Ok(())
    }

    fn pass<'a>(&'a self, matcher: &'a IgnoreMatcher, previous: Option<&'a RealmSnapshot>) -> Pass<'a> {
        Pass {
            realm: self.realm.as_ref(),
            matcher,
            loader: self.loader.as_ref(),
            resolver: SchemaResolver::new(Arc::new(LoaderSource(self.loader.clone()))),
            renderer: self.renderer.as_ref(),
            previous,
        }
    }

    /// Reindexes the whole realm, discarding everything indexed before.
    pub fn from_scratch(&self, args: &FromScratchArgs) -> Result<FromScratchResult, IndexerError> {
        self.check_realm(&args.realm_url)?;
        let start = Instant::now();
        let realm_url = self.realm.realm_url().clone();
        info!("Starting full index of {} as {}", realm_url, args.realm_username);

        let paths = self.realm.list_files()?;
        let builtin = IgnoreMatcher::empty(&realm_url, &self.always_ignore);
        let mut ignore_data = IgnoreData::new();
        for path in paths.iter().filter(|p| is_ignore_file(p)) {
            if builtin.is_ignored_path(path, false) {
                continue;
            }
            if let Some(file) = self.realm.read_file(path)? {
                ignore_data.insert_file(&realm_url.join(path), file.content);
            }
        }
        let matcher = IgnoreMatcher::new(&realm_url, &ignore_data, &self.always_ignore)?;

        let mut files = Vec::new();
        for path in &paths {
            if !(is_module_url(path) || is_instance_url(path)) {
                continue;
            }
            if matcher.is_ignored_path(path, false) {
                debug!("Ignoring {}", path);
                continue;
            }
            if let Some(file) = self.realm.read_file(path)? {
                files.push(file);
            }
        }

        self.loader.clear();
        let previous = self.writer.snapshot(realm_url.as_str());
        let entries = self.pass(&matcher, previous.as_deref()).index_files(&files);
        let stats = Stats::tally(&entries, 0);

        self.writer
            .publish(realm_url.as_str(), entries, PublishOptions::replace())?;
        info!(
            "Indexed {} files of {} ({}) in {:?}",
            files.len(),
            realm_url,
            stats,
            start.elapsed()
        );
        Ok(FromScratchResult { ignore_data, stats })
    }

    /// Reindexes one changed URL and everything that depends on it.
    pub fn incremental(&self, args: &IncrementalArgs) -> Result<IncrementalResult, IndexerError> {
        self.check_realm(&args.realm_url)?;
        let start = Instant::now();
        let realm_url = self.realm.realm_url().clone();
        let matcher = IgnoreMatcher::new(&realm_url, &args.ignore_data, &self.always_ignore)?;

        if matcher.is_ignored(&args.url) {
            debug!("Skipping ignored {}", args.url);
            return Ok(IncrementalResult {
                invalidations: Vec::new(),
                ignore_data: args.ignore_data.clone(),
                stats: Stats::default(),
            });
        }

        let previous = self.writer.snapshot(realm_url.as_str());
        let invalidations: Vec<String> = match &previous {
            Some(prev) => DependencyGraph::from_snapshot(prev).invalidations(&args.url),
            None => vec![args.url.clone()],
        }
        .into_iter()
        .filter(|url| !matcher.is_ignored(url))
        .collect();
        info!(
            "{} of {} invalidates {} entries",
            args.operation,
            args.url,
            invalidations.len()
        );
        self.loader.invalidate(&invalidations);

        let mut files: Vec<FileEntry> = Vec::new();
        let mut removed: Vec<String> = Vec::new();
        for url in &invalidations {
            let deleted = *url == args.url && args.operation == Operation::Delete;
            let file = if deleted { None } else { self.realm.read_url(url)? };
            match file {
                Some(file) => files.push(file),
                None => {
                    if previous.as_ref().is_some_and(|p| p.get(url).is_some()) {
                        removed.push(url.clone());
                    }
                }
            }
        }

        let entries = self.pass(&matcher, previous.as_deref()).index_files(&files);
        let stats = Stats::tally(&entries, removed.len());

        if entries.is_empty() && removed.is_empty() {
            debug!("Nothing to publish for {}", args.url);
        } else {
            self.writer
                .publish(realm_url.as_str(), entries, PublishOptions::merge(removed))?;
        }
        info!("Incremental pass for {} done ({}) in {:?}", args.url, stats, start.elapsed());

        Ok(IncrementalResult {
            invalidations,
            ignore_data: args.ignore_data.clone(),
            stats,
        })
    }
}

/// Everything a pass shares between the files it indexes.
pub(crate) struct Pass<'a> {
    realm: &'a dyn RealmAdapter,
    matcher: &'a IgnoreMatcher,
    loader: &'a dyn ModuleLoader,
    resolver: SchemaResolver,
    renderer: &'a dyn Renderer,
    previous: Option<&'a RealmSnapshot>,
}

impl Pass<'_> {
    /// Indexes modules first, then instances in parallel. Files that are
    /// neither are skipped.
    fn index_files(&self, files: &[FileEntry]) -> Vec<IndexedEntry> {
        let (modules, instances): (Vec<&FileEntry>, Vec<&FileEntry>) = files
            .iter()
            .filter(|f| is_module_url(&f.path) || is_instance_url(&f.path))
            .partition(|f| is_module_url(&f.path));

        let mut entries: Vec<IndexedEntry> =
            modules.iter().map(|file| self.index_module(file)).collect();
        entries.par_extend(instances.par_iter().map(|file| self.index_instance(file)));
        entries
    }

    fn url_of(&self, file: &FileEntry) -> String {
        self.realm.realm_url().join(&file.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardex_core::{BasicRenderer, JsonModuleLoader};
    use crate::realm::{MemoryRealm, RealmFetcher};
    use serde_json::json;

    const REALM: &str = "http://test-realm/test/";

    const PERSON: &str = r#"{
        "imports": ["https://cardstack.com/base/card-api"],
        "exports": {
            "Person": {
                "parent": {"module": "https://cardstack.com/base/card-api", "name": "CardDef"},
                "fields": [
                    {"name": "firstName", "kind": "contains",
                     "card": {"module": "https://cardstack.com/base/card-api", "name": "StringField"}}
                ]
            }
        }
    }"#;

    fn person(name: &str) -> String {
        json!({
            "data": {
                "attributes": {"firstName": name},
                "meta": {"adoptsFrom": {"module": "../person", "name": "Person"}}
            }
        })
        .to_string()
    }

    fn runner(realm: Arc<MemoryRealm>) -> IndexRunner {
        let loader = Arc::new(JsonModuleLoader::new(Arc::new(RealmFetcher::new(realm.clone()))));
        IndexRunner::new(
            realm,
            Arc::new(IndexWriter::temporary().unwrap()),
            loader,
            Arc::new(BasicRenderer),
        )
    }

    fn realm_url() -> RealmUrl {
        RealmUrl::new(REALM).unwrap()
    }

    #[test]
    fn test_from_scratch_counts() {
        let realm = Arc::new(
            MemoryRealm::new(realm_url())
                .with_file("person.gts", PERSON)
                .with_file("Person/1.json", person("Hassan"))
                .with_file("Person/2.json", person("Mango"))
                .with_file("Person/broken.json", "{nope")
                .with_file("README.md", "# hi"),
        );
        let runner = runner(realm);
        let result = runner
            .from_scratch(&FromScratchArgs {
                realm_url: realm_url(),
                realm_username: "test".into(),
            })
            .unwrap();
        assert_eq!(result.stats.instances_indexed, 2);
        assert_eq!(result.stats.modules_indexed, 1);
        assert_eq!(result.stats.instance_errors, 1);
        assert_eq!(result.stats.total_index_entries, 4);

        let snapshot = runner.writer().snapshot(REALM).unwrap();
        let entry = snapshot.get_card("http://test-realm/test/Person/1").unwrap();
        assert_eq!(entry.search_doc.as_ref().unwrap()["firstName"], "Hassan");
        assert!(entry.deps.contains("http://test-realm/test/person"));
        let broken = snapshot.get("http://test-realm/test/Person/broken.json").unwrap();
        assert_eq!(broken.error.as_ref().unwrap().status, 400);
    }

    #[test]
    fn test_incremental_touching_nothing_reports_zero() {
        let realm = Arc::new(MemoryRealm::new(realm_url()).with_file("person.gts", PERSON));
        let runner = runner(realm.clone());
        runner
            .from_scratch(&FromScratchArgs {
                realm_url: realm_url(),
                realm_username: "test".into(),
            })
            .unwrap();
        let url = realm.write("notes.txt", "hello");
        let result = runner
            .incremental(&IncrementalArgs {
                url,
                realm_url: realm_url(),
                realm_username: "test".into(),
                operation: Operation::Update,
                ignore_data: IgnoreData::new(),
            })
            .unwrap();
        assert_eq!(result.stats, Stats::default());
        assert_eq!(runner.writer().current_version(REALM), 1);
    }

    #[test]
    fn test_wrong_realm_is_rejected() {
        let realm = Arc::new(MemoryRealm::new(realm_url()));
        let runner = runner(realm);
        let err = runner
            .from_scratch(&FromScratchArgs {
                realm_url: RealmUrl::new("http://elsewhere/").unwrap(),
                realm_username: "test".into(),
            })
            .unwrap_err();
        assert!(matches!(err, IndexerError::WrongRealm { .. }));
    }

    #[test]
    fn test_args_wire_format() {
        let args: IncrementalArgs = serde_json::from_value(json!({
            "url": "http://test-realm/test/a.json",
            "realmURL": REALM,
            "realmUsername": "test",
            "operation": "delete",
            "ignoreData": {"http://test-realm/test/": "*.txt"}
        }))
        .unwrap();
        assert_eq!(args.operation, Operation::Delete);
        assert_eq!(args.ignore_data.len(), 1);
    }
}
