//! Module indexing and error classification.

use super::Pass;
use crate::realm::FileEntry;
use cardex_core::{CodeRef, ErrorDoc, IndexedEntry, LoaderError, SchemaError};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Error document for a module that failed to load.
pub(crate) fn loader_error_doc(err: &LoaderError) -> ErrorDoc {
    match err {
        LoaderError::NotFound { url } => ErrorDoc::new(404, err.to_string()).with_deps([url.clone()]),
        LoaderError::Parse { .. } => ErrorDoc::new(400, err.to_string()),
        LoaderError::Fetch { .. } => ErrorDoc::new(500, err.to_string()),
    }
}

/// Error document for a card reference that failed to resolve. A missing
/// module is a 404 that depends on the module, so creating it fixes us.
pub(crate) fn schema_error_doc(err: &SchemaError) -> ErrorDoc {
    match err {
        SchemaError::Loader(inner) => loader_error_doc(inner),
        _ => match err.missing_module() {
            Some(module) => ErrorDoc::new(404, err.to_string()).with_deps([module.to_string()]),
            None => ErrorDoc::new(500, err.to_string()),
        },
    }
}

impl Pass<'_> {
    /// Loads a module and checks every export resolves, fields included.
    pub(super) fn index_module(&self, file: &FileEntry) -> IndexedEntry {
        let url = self.url_of(file);
        debug!("Indexing module {}", url);

        let loaded = match self.loader.resolve(&url) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Module {} failed to load: {}", url, e);
                return IndexedEntry::error(&url, loader_error_doc(&e))
                    .with_last_modified(file.last_modified);
            }
        };

        let mut deps: BTreeSet<String> = loaded.deps.iter().cloned().collect();
        let mut failure: Option<SchemaError> = None;
        'exports: for name in loaded.definition.exports.keys() {
            let card = match self
                .resolver
                .resolve_code_ref(&CodeRef::new(loaded.url.clone(), name.clone()))
            {
                Ok(card) => card,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            deps.extend(card.modules.iter().cloned());
            for field in &card.fields {
                match self.resolver.field_card(field) {
                    Ok(field_card) => deps.extend(field_card.modules.iter().cloned()),
                    Err(e) => {
                        failure = Some(e);
                        break 'exports;
                    }
                }
            }
        }
        deps.remove(&loaded.url);

        let entry = match failure {
            None => match serde_json::to_value(loaded.definition.as_ref()) {
                Ok(definition) => IndexedEntry::module(&url, definition),
                Err(e) => IndexedEntry::error(&url, ErrorDoc::new(500, e.to_string())),
            },
            Some(e) => {
                warn!("Module {} has an unresolvable export: {}", url, e);
                IndexedEntry::error(&url, schema_error_doc(&e))
            }
        };
        entry.with_deps(deps).with_last_modified(file.last_modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_module_depends_on_it() {
        let doc = schema_error_doc(&SchemaError::Loader(LoaderError::not_found("http://r/person")));
        assert_eq!(doc.status, 404);
        assert_eq!(doc.deps, vec!["http://r/person".to_string()]);

        let doc = schema_error_doc(&SchemaError::MissingExport {
            module: "http://r/person".into(),
            name: "Person".into(),
        });
        assert_eq!(doc.status, 404);

        let doc = schema_error_doc(&SchemaError::CyclicAncestry { card: "x".into() });
        assert_eq!(doc.status, 500);
        assert!(doc.deps.is_empty());
    }

    #[test]
    fn test_parse_errors_are_bad_requests() {
        let doc = loader_error_doc(&LoaderError::Parse {
            url: "http://r/person.gts".into(),
            message: "expected value".into(),
        });
        assert_eq!(doc.status, 400);
    }
}
