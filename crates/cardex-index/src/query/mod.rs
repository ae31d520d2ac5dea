//! Query engine.
//!
//! Queries run against one [`RealmSnapshot`], so an indexing pass that
//! publishes mid-query can't change the answer. A query is type-checked,
//! filtered, sorted, counted and then paged, in that order.

mod definitions;
mod filter;

pub use definitions::SnapshotDefinitions;
pub use filter::{
    compare_values, total_order, values_equal, AnyFilter, ContainsFilter, EqFilter, EveryFilter,
    FieldPath, Filter, NotFilter, Predicate, RangeBounds, RangeFilter, TypeFilter,
};

use crate::error::QueryError;
use crate::snapshot::RealmSnapshot;
use crate::store::IndexWriter;
use cardex_core::schema::{base_card_ref, DefinitionSource, SchemaResolver};
use cardex_core::url::instance_file_url;
use cardex_core::{CodeRef, EntryKind, ErrorDoc, IndexedEntry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<CodeRef>,
    #[serde(default)]
    pub direction: Direction,
}

/// Zero-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

/// A complete query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<Page>,
    /// Restricts results to these cards (ids or file URLs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_urls: Option<Vec<String>>,
}

impl Query {
    /// Parses the JSON wire format.
    pub fn from_json(text: &str) -> Result<Self, QueryError> {
        serde_json::from_str(text).map_err(|e| QueryError::Invalid(e.to_string()))
    }

    /// Builder pattern: set the filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Builder pattern: add a sort key.
    pub fn sorted_by(mut self, by: &str, on: Option<CodeRef>, direction: Direction) -> Self {
        self.sort.push(Sort {
            by: by.to_string(),
            on,
            direction,
        });
        self
    }
}

/// Matching cards plus the total before paging.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub cards: Vec<Arc<IndexedEntry>>,
    pub total: usize,
}

impl QueryResult {
    /// Card ids in result order.
    pub fn ids(&self) -> Vec<String> {
        self.cards
            .iter()
            .map(|c| cardex_core::url::card_id(&c.url).to_string())
            .collect()
    }

    /// The wire response: resources under `data`, `meta.page.total`.
    pub fn to_document(&self) -> Value {
        let data: Vec<Value> = self
            .cards
            .iter()
            .filter_map(|c| c.pristine_doc.as_ref())
            .map(|doc| doc.get("data").cloned().unwrap_or(Value::Null))
            .collect();
        json!({ "data": data, "meta": { "page": { "total": self.total } } })
    }
}

/// What `card()` found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CardResult {
    Doc { doc: Value },
    Error { error: ErrorDoc },
}

/// Options for [`QueryEngine::card`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CardOptions {
    /// Embed linked cards under `included`.
    pub load_links: bool,
}

struct CompiledSort {
    path: FieldPath,
    direction: Direction,
}

/// Read-only queries over one snapshot.
pub struct QueryEngine {
    snapshot: Arc<RealmSnapshot>,
    resolver: SchemaResolver,
}

impl QueryEngine {
    pub fn new(snapshot: Arc<RealmSnapshot>) -> Self {
        let definitions = SnapshotDefinitions::new(snapshot.clone());
        Self {
            snapshot,
            resolver: SchemaResolver::new(Arc::new(definitions)),
        }
    }

    /// An engine that can also see modules outside the snapshot.
    pub fn with_fallback(snapshot: Arc<RealmSnapshot>, fallback: Arc<dyn DefinitionSource>) -> Self {
        let definitions = SnapshotDefinitions::new(snapshot.clone()).with_fallback(fallback);
        Self {
            snapshot,
            resolver: SchemaResolver::new(Arc::new(definitions)),
        }
    }

    pub fn snapshot(&self) -> &Arc<RealmSnapshot> {
        &self.snapshot
    }

    /// Runs a query.
    pub fn search(&self, query: &Query) -> Result<QueryResult, QueryError> {
        let predicate = query
            .filter
            .as_ref()
            .map(|f| Predicate::compile(&self.resolver, f))
            .transpose()?;
        let sorts = self.compile_sorts(&query.sort)?;
        let allowed: Option<HashSet<String>> = query.card_urls.as_ref().map(|urls| {
            urls.iter()
                .map(|u| instance_file_url(u).into_owned())
                .collect()
        });

        let mut matched: Vec<Arc<IndexedEntry>> = self
            .snapshot
            .instances()
            .filter(|e| allowed.as_ref().map_or(true, |a| a.contains(&e.url)))
            .filter(|e| predicate.as_ref().map_or(true, |p| p.matches(e)))
            .cloned()
            .collect();

        // Precompute sort keys once per card.
        let mut keyed: Vec<(Vec<Option<Value>>, Arc<IndexedEntry>)> = matched
            .drain(..)
            .map(|entry| {
                let empty = Value::Null;
                let doc = entry.search_doc.as_ref().unwrap_or(&empty);
                let keys = sorts.iter().map(|s| s.path.sort_value(doc)).collect();
                (keys, entry)
            })
            .collect();
        keyed.sort_by(|(a_keys, a), (b_keys, b)| {
            for (i, sort) in sorts.iter().enumerate() {
                let ordering = compare_sort_keys(&a_keys[i], &b_keys[i], sort.direction);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.url.cmp(&b.url)
        });

        let total = keyed.len();
        let cards: Vec<Arc<IndexedEntry>> = match query.page {
            Some(page) => keyed
                .into_iter()
                .skip(page.number.saturating_mul(page.size))
                .take(page.size)
                .map(|(_, e)| e)
                .collect(),
            None => keyed.into_iter().map(|(_, e)| e).collect(),
        };
        debug!(
            "Query on {} v{} matched {} cards",
            self.snapshot.realm_url(),
            self.snapshot.version(),
            total
        );
        Ok(QueryResult { cards, total })
    }

    fn compile_sorts(&self, sorts: &[Sort]) -> Result<Vec<CompiledSort>, QueryError> {
        sorts
            .iter()
            .map(|sort| {
                let on = sort.on.clone().unwrap_or_else(base_card_ref);
                let card = filter::resolve_type(&self.resolver, &on)?;
                let path = FieldPath::resolve(&self.resolver, &card, &sort.by)?;
                if path.plural {
                    return Err(QueryError::PluralSort {
                        path: sort.by.clone(),
                    });
                }
                Ok(CompiledSort {
                    path,
                    direction: sort.direction,
                })
            })
            .collect()
    }

    /// Reads one card. Modules and unknown URLs give `None`.
    pub fn card(&self, url: &str, options: CardOptions) -> Option<CardResult> {
        let entry = self.snapshot.get_card(url)?;
        match entry.kind {
            EntryKind::Module => None,
            EntryKind::Error => entry.error.clone().map(|error| CardResult::Error { error }),
            EntryKind::Instance => {
                let mut doc = entry.pristine_doc.clone()?;
                if options.load_links {
                    let included = self.included(&entry);
                    if let Some(obj) = doc.as_object_mut() {
                        obj.insert("included".to_string(), Value::Array(included));
                    }
                }
                Some(CardResult::Doc { doc })
            }
        }
    }

    /// Linked resources reachable from `root`, breadth first. Each card is
    /// included once; the root itself shows up if something links back.
    fn included(&self, root: &IndexedEntry) -> Vec<Value> {
        let mut included = Vec::new();
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = linked_ids(root).into();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let Some(entry) = self.snapshot.get_card(&id) else {
                continue;
            };
            if entry.kind != EntryKind::Instance {
                continue;
            }
            if let Some(data) = entry.pristine_doc.as_ref().and_then(|d| d.get("data")) {
                included.push(data.clone());
            }
            queue.extend(linked_ids(&entry));
        }
        included
    }
}

fn linked_ids(entry: &IndexedEntry) -> Vec<String> {
    let Some(Value::Object(relationships)) = entry
        .pristine_doc
        .as_ref()
        .and_then(|d| d.get("data"))
        .and_then(|d| d.get("relationships"))
    else {
        return Vec::new();
    };
    relationships
        .values()
        .filter_map(|r| r.get("links")?.get("self")?.as_str().map(str::to_string))
        .collect()
}

/// Nulls sort last in both directions.
fn compare_sort_keys(a: &Option<Value>, b: &Option<Value>, direction: Direction) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ordering = total_order(x, y);
            match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            }
        }
    }
}

impl IndexWriter {
    /// Queries a realm's current version.
    pub fn query(&self, realm_url: &str, query: &Query) -> Result<QueryResult, QueryError> {
        match self.snapshot(realm_url) {
            Some(snapshot) => QueryEngine::new(snapshot).search(query),
            None => Ok(QueryResult {
                cards: Vec::new(),
                total: 0,
            }),
        }
    }

    /// Reads a card from its realm's current version.
    pub fn card(&self, url: &str, options: CardOptions) -> Option<CardResult> {
        let realm = self.realm_of(url)?;
        let snapshot = self.snapshot(&realm)?;
        QueryEngine::new(snapshot).card(url, options)
    }
}

#[cfg(test)]
mod tests;
