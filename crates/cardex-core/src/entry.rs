//! Index entry representation.
//!
//! An IndexedEntry is one row of the index: a card instance, a module, or
//! an error standing in for either. Entries are immutable once published;
//! a new realm version replaces them wholesale.

use crate::url::{is_module_url, trim_module_extension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// What kind of row this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Instance,
    Module,
    Error,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Module => "module",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instance" => Some(Self::Instance),
            "module" => Some(Self::Module),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an entry failed to index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDoc {
    pub detail: String,
    /// HTTP-style status: 404 for missing dependencies, 400 for documents
    /// and modules that don't parse, and otherwise the renderer's status
    /// or 500.
    pub status: u16,
    /// URLs whose change may fix this error.
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_good_doc: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_known_good_html: Option<String>,
}

impl ErrorDoc {
    pub fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            status,
            deps: Vec::new(),
            last_known_good_doc: None,
            last_known_good_html: None,
        }
    }

    /// Builder pattern: record the URLs that caused the error.
    pub fn with_deps(mut self, deps: impl IntoIterator<Item = String>) -> Self {
        self.deps = deps.into_iter().collect();
        self
    }

    /// Builder pattern: keep the last successful render.
    pub fn with_last_known_good(mut self, doc: Option<Value>, html: Option<String>) -> Self {
        self.last_known_good_doc = doc;
        self.last_known_good_html = html;
        self
    }
}

/// One row of the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedEntry {
    /// File URL (instances keep their `.json`, modules their extension).
    pub url: String,
    pub kind: EntryKind,
    /// Canonical document: the normalized card resource for instances,
    /// the schema declaration for modules.
    pub pristine_doc: Option<Value>,
    /// Query-friendly projection of an instance's fields.
    pub search_doc: Option<Value>,
    pub isolated_html: Option<String>,
    pub scoped_css_urls: Vec<String>,
    /// Ancestor type keys, most specific first.
    pub types: Vec<String>,
    /// URLs this entry must be recomputed for when they change.
    pub deps: BTreeSet<String>,
    pub error: Option<ErrorDoc>,
    /// Source file modification time (seconds or a logical clock).
    pub last_modified: u64,
    pub realm_version: u64,
    pub realm_url: String,
}

impl IndexedEntry {
    fn empty(url: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            url: url.into(),
            kind,
            pristine_doc: None,
            search_doc: None,
            isolated_html: None,
            scoped_css_urls: Vec::new(),
            types: Vec::new(),
            deps: BTreeSet::new(),
            error: None,
            last_modified: 0,
            realm_version: 0,
            realm_url: String::new(),
        }
    }

    /// Creates an instance entry.
    pub fn instance(url: impl Into<String>, pristine_doc: Value, search_doc: Value) -> Self {
        let mut entry = Self::empty(url, EntryKind::Instance);
        entry.pristine_doc = Some(pristine_doc);
        entry.search_doc = Some(search_doc);
        entry
    }

    /// Creates a module entry holding the module's schema declaration.
    pub fn module(url: impl Into<String>, definition: Value) -> Self {
        let mut entry = Self::empty(url, EntryKind::Module);
        entry.pristine_doc = Some(definition);
        entry
    }

    /// Creates an error entry.
    pub fn error(url: impl Into<String>, error: ErrorDoc) -> Self {
        let mut entry = Self::empty(url, EntryKind::Error);
        entry.deps = error.deps.iter().cloned().collect();
        entry.error = Some(error);
        entry
    }

    /// Builder pattern: set rendered output.
    pub fn with_html(mut self, html: impl Into<String>, scoped_css_urls: Vec<String>) -> Self {
        self.isolated_html = Some(html.into());
        self.scoped_css_urls = scoped_css_urls;
        self
    }

    /// Builder pattern: set types.
    pub fn with_types(mut self, types: Vec<String>) -> Self {
        self.types = types;
        self
    }

    /// Builder pattern: add deps.
    pub fn with_deps(mut self, deps: impl IntoIterator<Item = String>) -> Self {
        self.deps.extend(deps);
        self
    }

    /// Builder pattern: set the modification time.
    pub fn with_last_modified(mut self, last_modified: u64) -> Self {
        self.last_modified = last_modified;
        self
    }

    /// True if the underlying file is a module (error entries included).
    pub fn is_module_file(&self) -> bool {
        is_module_url(&self.url)
    }

    /// The extension-less alias of the file, used to match canonical
    /// module URLs in dependency lists.
    pub fn file_alias(&self) -> &str {
        trim_module_extension(&self.url)
    }

    /// The last successful rendering of this card, if any: the entry itself
    /// when it's a good instance, otherwise whatever an error carried forward.
    pub fn last_known_good(&self) -> (Option<Value>, Option<String>) {
        match (&self.kind, &self.error) {
            (EntryKind::Instance, _) => (self.pristine_doc.clone(), self.isolated_html.clone()),
            (EntryKind::Error, Some(error)) => (
                error.last_known_good_doc.clone(),
                error.last_known_good_html.clone(),
            ),
            _ => (None, None),
        }
    }
}
