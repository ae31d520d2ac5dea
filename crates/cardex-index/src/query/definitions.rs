//! Schema definitions as seen by a snapshot.
//!
//! Module entries keep their declarations in `pristine_doc`, so queries
//! can be type-checked against exactly the schema that was indexed.

use crate::snapshot::RealmSnapshot;
use cardex_core::schema::{base_module, DefinitionSource, ModuleDef, BASE_CARD_API};
use cardex_core::url::trim_module_extension;
use cardex_core::{EntryKind, LoaderError};
use std::sync::Arc;

pub struct SnapshotDefinitions {
    snapshot: Arc<RealmSnapshot>,
    fallback: Option<Arc<dyn DefinitionSource>>,
}

impl SnapshotDefinitions {
    pub fn new(snapshot: Arc<RealmSnapshot>) -> Self {
        Self {
            snapshot,
            fallback: None,
        }
    }

    /// Builder pattern: consult another source for modules outside the
    /// snapshot (other realms).
    pub fn with_fallback(mut self, fallback: Arc<dyn DefinitionSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl DefinitionSource for SnapshotDefinitions {
    fn module(&self, url: &str) -> Result<Arc<ModuleDef>, LoaderError> {
        let canonical = trim_module_extension(url);
        if canonical == BASE_CARD_API {
            return Ok(base_module());
        }
        if let Some(entry) = self.snapshot.module(canonical) {
            return match (&entry.kind, &entry.pristine_doc) {
                (EntryKind::Module, Some(doc)) => serde_json::from_value::<ModuleDef>(doc.clone())
                    .map(Arc::new)
                    .map_err(|e| LoaderError::Parse {
                        url: entry.url.clone(),
                        message: e.to_string(),
                    }),
                _ => Err(LoaderError::not_found(canonical)),
            };
        }
        match &self.fallback {
            Some(fallback) => fallback.module(canonical),
            None => Err(LoaderError::not_found(canonical)),
        }
    }
}
