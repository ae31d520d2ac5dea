//! Reverse dependency graph over index entries.
//!
//! Every entry lists the URLs it depends on. We flip those lists into a
//! graph whose edges point from a dependency to the entries that depend
//! on it, so "what must be recomputed when X changes" is a plain BFS.
//! The graph is built once per pass from the previous snapshot and never
//! mutated afterwards.

use crate::snapshot::RealmSnapshot;
use cardex_core::url::trim_module_extension;
use cardex_core::IndexedEntry;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// dependency -> dependent edges, keyed by URL.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from a set of entries.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a Arc<IndexedEntry>>,
    {
        let mut graph = Self::new();
        for entry in entries {
            graph.add_entry(entry);
        }
        graph
    }

    /// Builds the graph from a snapshot.
    pub fn from_snapshot(snapshot: &RealmSnapshot) -> Self {
        Self::from_entries(snapshot.entries())
    }

    fn node(&mut self, url: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(url) {
            return *idx;
        }
        let idx = self.graph.add_node(url.to_string());
        self.index.insert(url.to_string(), idx);
        idx
    }

    /// Records that `entry` depends on each of its deps.
    pub fn add_entry(&mut self, entry: &IndexedEntry) {
        let dependent = self.node(&entry.url);
        for dep in &entry.deps {
            if dep == &entry.url {
                continue;
            }
            let dependency = self.node(dep);
            if self.graph.find_edge(dependency, dependent).is_none() {
                self.graph.add_edge(dependency, dependent, ());
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Entries that depend directly on `url`.
    pub fn dependents(&self, url: &str) -> Vec<String> {
        let mut out: BTreeSet<String> = BTreeSet::new();
        for key in Self::keys_for(url) {
            if let Some(idx) = self.index.get(key) {
                out.extend(
                    self.graph
                        .neighbors_directed(*idx, Direction::Outgoing)
                        .map(|n| self.graph[n].clone()),
                );
            }
        }
        out.into_iter().collect()
    }

    /// The invalidation set for a changed URL: the URL itself plus every
    /// entry whose deps reach it transitively. Cycles are fine, each URL is
    /// visited once.
    pub fn invalidations(&self, changed: &str) -> Vec<String> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        visited.insert(changed.to_string());
        queue.push_back(changed.to_string());

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(&current) {
                if visited.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }
        visited.into_iter().collect()
    }

    /// A module file is depended on through its extension-less URL too.
    fn keys_for(url: &str) -> Vec<&str> {
        let alias = trim_module_extension(url);
        if alias == url {
            vec![url]
        } else {
            vec![url, alias]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(url: &str, deps: &[&str]) -> Arc<IndexedEntry> {
        Arc::new(
            IndexedEntry::instance(url, json!({}), json!({}))
                .with_deps(deps.iter().map(|d| d.to_string())),
        )
    }

    #[test]
    fn test_transitive_invalidation_through_module_alias() {
        let entries = vec![
            Arc::new(IndexedEntry::module("http://r/person.gts", json!({}))),
            Arc::new(
                IndexedEntry::module("http://r/employee.gts", json!({}))
                    .with_deps(vec!["http://r/person".to_string()]),
            ),
            entry("http://r/Employee/1.json", &["http://r/employee"]),
            entry("http://r/Person/1.json", &["http://r/person"]),
            entry("http://r/Pet/1.json", &["http://r/pet"]),
        ];
        let graph = DependencyGraph::from_entries(&entries);

        let invalidated = graph.invalidations("http://r/person.gts");
        assert_eq!(
            invalidated,
            vec![
                "http://r/Employee/1.json",
                "http://r/Person/1.json",
                "http://r/employee.gts",
                "http://r/person.gts",
            ]
        );
    }

    #[test]
    fn test_cycles_terminate() {
        let entries = vec![
            entry("http://r/a.json", &["http://r/b.json"]),
            entry("http://r/b.json", &["http://r/a.json"]),
            entry("http://r/c.json", &["http://r/a.json"]),
        ];
        let graph = DependencyGraph::from_entries(&entries);
        assert_eq!(
            graph.invalidations("http://r/a.json"),
            vec!["http://r/a.json", "http://r/b.json", "http://r/c.json"]
        );
        assert_eq!(graph.dependents("http://r/b.json"), vec!["http://r/a.json"]);
    }

    #[test]
    fn test_unknown_url_invalidates_only_itself() {
        let graph = DependencyGraph::new();
        assert_eq!(graph.invalidations("http://r/new.json"), vec!["http://r/new.json"]);
        assert_eq!(graph.node_count(), 0);
    }
}
