//! Instance indexing.
//!
//! Building the search doc walks the card's fields and follows links into
//! other instances, which may link back. Linked documents are loaded once
//! per instance into a small arena keyed by card id; the walk keeps the
//! chain of cards it's inside of, and a link to one of them is written as
//! `{"id": ...}` instead of being expanded again.

use super::module::schema_error_doc;
use super::Pass;
use crate::realm::FileEntry;
use cardex_core::url::instance_file_url;
use cardex_core::{
    relationship_key, CardDocument, DocumentError, ErrorDoc, FieldError, FieldKind, IndexedEntry,
    Link, RenderRequest, ResolvedCard, SchemaError,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why an instance couldn't be indexed.
#[derive(Debug)]
enum Failure {
    Document(DocumentError),
    Schema(SchemaError),
    Field(FieldError),
    MissingLink { url: String },
    BrokenLink { url: String, message: String },
}

impl Failure {
    fn into_error_doc(self) -> ErrorDoc {
        match self {
            Self::Document(e) => ErrorDoc::new(400, e.to_string()),
            Self::Schema(e) => schema_error_doc(&e),
            Self::Field(e) => ErrorDoc::new(500, e.to_string()),
            Self::MissingLink { url } => {
                ErrorDoc::new(404, format!("linked card '{}' not found", url)).with_deps([url])
            }
            Self::BrokenLink { url, message } => {
                ErrorDoc::new(400, format!("linked card '{}' is invalid: {}", url, message))
                    .with_deps([url])
            }
        }
    }
}

/// A linked document and its resolved card type.
struct Linked {
    doc: CardDocument,
    card: Arc<ResolvedCard>,
}

/// Per-instance walk state.
struct Walk<'p, 'a> {
    pass: &'p Pass<'a>,
    docs: HashMap<String, Arc<Linked>>,
    deps: BTreeSet<String>,
}

impl<'p, 'a> Walk<'p, 'a> {
    fn new(pass: &'p Pass<'a>) -> Self {
        Self {
            pass,
            docs: HashMap::new(),
            deps: BTreeSet::new(),
        }
    }

    fn resolve(&mut self, doc: &CardDocument) -> Result<Arc<ResolvedCard>, Failure> {
        let adopts_from = doc.adopts_from().map_err(Failure::Document)?;
        self.deps.insert(adopts_from.root_module().to_string());
        let card = self
            .pass
            .resolver
            .resolve(&adopts_from)
            .map_err(Failure::Schema)?;
        self.deps.extend(card.modules.iter().cloned());
        Ok(card)
    }

    /// Loads a linked card into the arena.
    fn load(&mut self, id: &str) -> Result<Arc<Linked>, Failure> {
        if let Some(hit) = self.docs.get(id) {
            return Ok(hit.clone());
        }
        let file_url = instance_file_url(id).into_owned();
        self.deps.insert(file_url.clone());

        // Links leaving the realm or into ignored files dangle.
        if !self.pass.realm.realm_url().contains(&file_url) || self.pass.matcher.is_ignored(&file_url)
        {
            return Err(Failure::MissingLink { url: file_url });
        }
        let file = match self.pass.realm.read_url(&file_url) {
            Ok(Some(file)) => file,
            Ok(None) => return Err(Failure::MissingLink { url: file_url }),
            Err(e) => {
                return Err(Failure::BrokenLink {
                    url: file_url,
                    message: e.to_string(),
                })
            }
        };
        let doc = CardDocument::parse(&file_url, &file.content).map_err(|e| Failure::BrokenLink {
            url: file_url.clone(),
            message: e.to_string(),
        })?;
        let card = match self.resolve(&doc) {
            Err(Failure::Document(e)) => {
                return Err(Failure::BrokenLink {
                    url: file_url,
                    message: e.to_string(),
                })
            }
            other => other?,
        };
        let linked = Arc::new(Linked { doc, card });
        self.docs.insert(id.to_string(), linked.clone());
        Ok(linked)
    }

    /// The search projection of every field of `card`. `attributes` is the
    /// card's (or composite field's) own attribute object, `prefix` the
    /// relationship key path leading to it.
    fn project_fields(
        &mut self,
        card: &ResolvedCard,
        doc: &CardDocument,
        attributes: &Value,
        prefix: &str,
        ancestors: &mut Vec<String>,
    ) -> Result<Map<String, Value>, Failure> {
        let mut out = Map::new();
        for field in &card.fields {
            let field_card = self
                .pass
                .resolver
                .field_card(field)
                .map_err(Failure::Schema)?;
            self.deps.extend(field_card.modules.iter().cloned());

            let value = if field.computed {
                self.pass
                    .loader
                    .compute_field(&card.id, field, attributes)
                    .map_err(Failure::Field)?
            } else {
                match field.kind {
                    FieldKind::Contains => {
                        let key = relationship_key(prefix, &field.name, None);
                        self.project_contained(
                            &field_card,
                            doc,
                            attributes.get(&field.name),
                            &key,
                            ancestors,
                        )?
                    }
                    FieldKind::ContainsMany => {
                        let mut items = Vec::new();
                        if let Some(Value::Array(values)) = attributes.get(&field.name) {
                            for (i, item) in values.iter().enumerate() {
                                let key = relationship_key(prefix, &field.name, Some(i));
                                items.push(self.project_contained(
                                    &field_card,
                                    doc,
                                    Some(item),
                                    &key,
                                    ancestors,
                                )?);
                            }
                        }
                        Value::Array(items)
                    }
                    FieldKind::LinksTo => {
                        match doc.link(&relationship_key(prefix, &field.name, None)) {
                            Link::Card(id) => self.project_link(&id, ancestors)?,
                            Link::Null | Link::Absent => Value::Null,
                        }
                    }
                    FieldKind::LinksToMany => {
                        let mut items = Vec::new();
                        let mut i = 0;
                        loop {
                            match doc.link(&relationship_key(prefix, &field.name, Some(i))) {
                                Link::Absent => break,
                                Link::Null => {}
                                Link::Card(id) => items.push(self.project_link(&id, ancestors)?),
                            }
                            i += 1;
                        }
                        Value::Array(items)
                    }
                }
            };
            out.insert(field.name.clone(), value);
        }
        Ok(out)
    }

    fn project_contained(
        &mut self,
        field_card: &ResolvedCard,
        doc: &CardDocument,
        value: Option<&Value>,
        prefix: &str,
        ancestors: &mut Vec<String>,
    ) -> Result<Value, Failure> {
        if field_card.holds_scalar() {
            return Ok(value.cloned().unwrap_or(Value::Null));
        }
        match value {
            Some(attributes @ Value::Object(_)) => Ok(Value::Object(self.project_fields(
                field_card,
                doc,
                attributes,
                prefix,
                ancestors,
            )?)),
            _ => Ok(Value::Null),
        }
    }

    fn project_link(&mut self, id: &str, ancestors: &mut Vec<String>) -> Result<Value, Failure> {
        if ancestors.iter().any(|a| a == id) {
            return Ok(json!({ "id": id }));
        }
        let linked = self.load(id)?;
        ancestors.push(id.to_string());
        let projected = self.project_fields(
            &linked.card,
            &linked.doc,
            linked.doc.attributes(),
            "",
            ancestors,
        );
        ancestors.pop();
        let mut fields = projected?;
        fields.insert("id".to_string(), Value::String(id.to_string()));
        Ok(Value::Object(fields))
    }
}

impl Pass<'_> {
    /// Indexes one instance file. Never fails: problems become an error
    /// entry that depends on whatever could fix it.
    pub(super) fn index_instance(&self, file: &FileEntry) -> IndexedEntry {
        let url = self.url_of(file);
        debug!("Indexing instance {}", url);
        let mut walk = Walk::new(self);
        let mut types = Vec::new();

        let outcome = CardDocument::parse(&url, &file.content)
            .map_err(Failure::Document)
            .and_then(|doc| {
                let card = walk.resolve(&doc)?;
                types = card.type_keys();
                let mut ancestors = vec![doc.id.clone()];
                let mut search = walk.project_fields(
                    &card,
                    &doc,
                    doc.attributes(),
                    "",
                    &mut ancestors,
                )?;
                search.insert("id".to_string(), Value::String(doc.id.clone()));
                Ok((doc, Value::Object(search)))
            });

        let (doc, search_doc) = match outcome {
            Ok(built) => built,
            Err(failure) => {
                let error = failure.into_error_doc();
                warn!("Instance {} failed to index ({}): {}", url, error.status, error.detail);
                return IndexedEntry::error(&url, error)
                    .with_types(types)
                    .with_deps(walk.deps)
                    .with_last_modified(file.last_modified);
            }
        };

        let pristine_doc = match doc.adopts_from() {
            Ok(adopts_from) => {
                doc.pristine(&adopts_from, self.realm.realm_url().as_str(), file.last_modified)
            }
            Err(e) => {
                return IndexedEntry::error(&url, Failure::Document(e).into_error_doc())
                    .with_deps(walk.deps)
                    .with_last_modified(file.last_modified)
            }
        };

        let request = RenderRequest {
            id: &doc.id,
            pristine_doc: &pristine_doc,
            search_doc: &search_doc,
            types: &types,
        };
        match self.renderer.render(&request) {
            Ok(rendered) => IndexedEntry::instance(&url, pristine_doc, search_doc)
                .with_html(rendered.html, rendered.scoped_css_urls)
                .with_types(types)
                .with_deps(walk.deps)
                .with_last_modified(file.last_modified),
            Err(e) => {
                let (last_doc, last_html) = self
                    .previous
                    .and_then(|snapshot| snapshot.get(&url))
                    .map(|entry| entry.last_known_good())
                    .unwrap_or((None, None));
                warn!("Rendering {} failed: {}", url, e);
                IndexedEntry::error(
                    &url,
                    ErrorDoc::new(e.status, e.message).with_last_known_good(last_doc, last_html),
                )
                .with_types(types)
                .with_deps(walk.deps)
                .with_last_modified(file.last_modified)
            }
        }
    }
}
