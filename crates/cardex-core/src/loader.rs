//! Module loading.
//!
//! The indexer never evaluates module code itself. It asks a
//! [`ModuleLoader`] to resolve a module URL into its schema declarations
//! and the URLs it depends on, and tells the loader which URLs to forget
//! when files change.
//!
//! [`JsonModuleLoader`] is the loader we ship: module files carry their
//! schema as a JSON declaration. Anything that can produce a [`ModuleDef`]
//! (a transpiler, a remote service) can implement the trait instead.

use crate::card_ref::CodeRef;
use crate::error::{FieldError, LoaderError};
use crate::schema::{base_module, CardDecl, DefinitionSource, FieldDef, ModuleDef, BASE_CARD_API};
use crate::url::{
    extension, resolve_url, trim_module_extension, UrlMapper, MODULE_EXTENSIONS,
};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Supplies raw module source by URL.
pub trait SourceFetcher: Send + Sync {
    /// Returns `Ok(None)` when nothing exists at the URL.
    fn fetch(&self, url: &str) -> Result<Option<String>, LoaderError>;
}

/// A resolved module.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModule {
    /// Canonical (extension-less) URL.
    pub url: String,
    /// The URL of the file the source came from.
    pub file_url: String,
    pub source: String,
    /// Canonical URLs of the modules this one depends on.
    pub deps: Vec<String>,
    pub definition: Arc<ModuleDef>,
}

/// The dependency-resolver contract the indexer consumes.
pub trait ModuleLoader: Send + Sync {
    /// Resolves a module URL (with or without extension).
    fn resolve(&self, url: &str) -> Result<Arc<LoadedModule>, LoaderError>;

    /// Forgets anything cached for these URLs.
    fn invalidate(&self, urls: &[String]);

    /// Forgets everything.
    fn clear(&self);

    /// Computes the value of a computed field from the owning card's
    /// attributes. The default evaluates the field's declarative expression.
    fn compute_field(
        &self,
        owner: &CodeRef,
        field: &FieldDef,
        attributes: &Value,
    ) -> Result<Value, FieldError> {
        match &field.compute {
            Some(expr) => expr.evaluate(owner, &field.name, attributes),
            None => Err(FieldError::NotComputable {
                card: owner.internal_key(),
                field: field.name.clone(),
            }),
        }
    }
}

/// Adapts a [`ModuleLoader`] into a [`DefinitionSource`].
pub struct LoaderSource(pub Arc<dyn ModuleLoader>);

impl DefinitionSource for LoaderSource {
    fn module(&self, url: &str) -> Result<Arc<ModuleDef>, LoaderError> {
        self.0.resolve(url).map(|m| m.definition.clone())
    }
}

/// The on-disk shape of a JSON module declaration.
#[derive(Debug, Deserialize)]
struct ModuleSource {
    #[serde(default)]
    imports: Vec<String>,
    #[serde(default)]
    exports: BTreeMap<String, CardDecl>,
}

/// Loads modules whose source is a JSON schema declaration.
pub struct JsonModuleLoader {
    fetcher: Arc<dyn SourceFetcher>,
    mapper: UrlMapper,
    cache: DashMap<String, Arc<LoadedModule>>,
}

impl JsonModuleLoader {
    pub fn new(fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            fetcher,
            mapper: UrlMapper::default(),
            cache: DashMap::new(),
        }
    }

    /// Builder pattern: remap URLs before fetching.
    pub fn with_mapper(mut self, mapper: UrlMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Candidate file URLs for a module URL, most likely first.
    fn candidates(&self, url: &str) -> Vec<String> {
        let mapped = self.mapper.map(url).into_owned();
        let canonical = trim_module_extension(&mapped).to_string();
        let mut candidates = Vec::with_capacity(MODULE_EXTENSIONS.len() + 1);
        if extension(&mapped).is_some_and(|ext| MODULE_EXTENSIONS.contains(&ext)) {
            candidates.push(mapped.clone());
        }
        for ext in MODULE_EXTENSIONS {
            let candidate = format!("{}.{}", canonical, ext);
            if !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        candidates
    }

    fn fetch_first(&self, url: &str) -> Result<Option<(String, String)>, LoaderError> {
        for candidate in self.candidates(url) {
            if let Some(source) = self.fetcher.fetch(&candidate)? {
                return Ok(Some((candidate, source)));
            }
        }
        Ok(None)
    }

    fn exists(&self, url: &str) -> Result<bool, LoaderError> {
        if trim_module_extension(url) == BASE_CARD_API {
            return Ok(true);
        }
        Ok(self.fetch_first(url)?.is_some())
    }

    fn load(&self, canonical: &str) -> Result<LoadedModule, LoaderError> {
        let (fetched_url, source) = self
            .fetch_first(canonical)?
            .ok_or_else(|| LoaderError::not_found(canonical))?;
        // References inside the module are relative to its public URL.
        let file_url = self.mapper.unmap(&fetched_url).into_owned();

        let parsed: ModuleSource =
            serde_json::from_str(&source).map_err(|e| LoaderError::Parse {
                url: file_url.clone(),
                message: e.to_string(),
            })?;

        let imports: Vec<String> = parsed
            .imports
            .iter()
            .map(|import| trim_module_extension(&resolve_url(&file_url, import)).to_string())
            .collect();
        for import in &imports {
            if !self.exists(import)? {
                return Err(LoaderError::not_found(import.clone()));
            }
        }

        let exports = parsed
            .exports
            .into_iter()
            .map(|(name, mut decl)| {
                decl.parent = decl.parent.map(|p| p.resolved_against(&file_url));
                for field in &mut decl.fields {
                    field.card = field.card.resolved_against(&file_url);
                }
                (name, decl)
            })
            .collect();

        let definition = ModuleDef {
            url: canonical.to_string(),
            imports,
            exports,
        };
        let deps = definition.referenced_modules().into_iter().collect();
        Ok(LoadedModule {
            url: canonical.to_string(),
            file_url,
            source,
            deps,
            definition: Arc::new(definition),
        })
    }
}

impl ModuleLoader for JsonModuleLoader {
    fn resolve(&self, url: &str) -> Result<Arc<LoadedModule>, LoaderError> {
        let canonical = trim_module_extension(url).to_string();
        if canonical == BASE_CARD_API {
            return Ok(base_loaded_module());
        }
        if let Some(hit) = self.cache.get(&canonical) {
            return Ok(hit.clone());
        }
        debug!("Loading module {}", canonical);
        let loaded = Arc::new(self.load(&canonical)?);
        self.cache.insert(canonical, loaded.clone());
        Ok(loaded)
    }

    fn invalidate(&self, urls: &[String]) {
        for url in urls {
            self.cache.remove(trim_module_extension(url));
        }
    }

    fn clear(&self) {
        self.cache.clear();
    }
}

/// The base module as a loaded module.
pub fn base_loaded_module() -> Arc<LoadedModule> {
    let definition = base_module();
    Arc::new(LoadedModule {
        url: BASE_CARD_API.to_string(),
        file_url: format!("{}.gts", BASE_CARD_API),
        source: String::new(),
        deps: Vec::new(),
        definition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldKind, SchemaResolver};
    use crate::CardRef;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Files(Mutex<HashMap<String, String>>);

    impl Files {
        fn put(&self, url: &str, source: &str) {
            self.0.lock().unwrap().insert(url.to_string(), source.to_string());
        }
    }

    impl SourceFetcher for Files {
        fn fetch(&self, url: &str) -> Result<Option<String>, LoaderError> {
            Ok(self.0.lock().unwrap().get(url).cloned())
        }
    }

    const PERSON: &str = r#"{
        "imports": ["https://cardstack.com/base/card-api"],
        "exports": {
            "Person": {
                "parent": {"module": "https://cardstack.com/base/card-api", "name": "CardDef"},
                "fields": [
                    {"name": "firstName", "kind": "contains",
                     "card": {"module": "https://cardstack.com/base/card-api", "name": "StringField"}},
                    {"name": "pet", "kind": "linksTo", "card": {"module": "./pet", "name": "Pet"}}
                ]
            }
        }
    }"#;

    #[test]
    fn test_resolve_json_module() {
        let files = Arc::new(Files::default());
        files.put("http://r/person.gts", PERSON);
        let loader = JsonModuleLoader::new(files);

        let module = loader.resolve("http://r/person").unwrap();
        assert_eq!(module.file_url, "http://r/person.gts");
        assert_eq!(module.deps, vec!["http://r/pet".to_string(), BASE_CARD_API.to_string()]);
        let person = &module.definition.exports["Person"];
        assert_eq!(person.fields[1].kind, FieldKind::LinksTo);
        assert_eq!(person.fields[1].card.module, "http://r/pet");
    }

    #[test]
    fn test_missing_import_is_not_found() {
        let files = Arc::new(Files::default());
        files.put(
            "http://r/employee.gts",
            r#"{"imports": ["./person"], "exports": {}}"#,
        );
        let loader = JsonModuleLoader::new(files);
        let err = loader.resolve("http://r/employee.gts").unwrap_err();
        assert_eq!(err, LoaderError::not_found("http://r/person"));
    }

    #[test]
    fn test_invalidate_refetches() {
        let files = Arc::new(Files::default());
        files.put("http://r/thing.gts", r#"{"exports": {"Thing": {}}}"#);
        let loader = JsonModuleLoader::new(files.clone());
        assert!(loader.resolve("http://r/thing").is_ok());

        files.0.lock().unwrap().clear();
        assert!(loader.resolve("http://r/thing").is_ok(), "served from cache");
        loader.invalidate(&["http://r/thing.gts".to_string()]);
        assert!(loader.resolve("http://r/thing").is_err());
    }

    #[test]
    fn test_mapped_realm_urls() {
        let files = Arc::new(Files::default());
        files.put("http://localhost:4201/catalog/pet.gts", r#"{"exports": {"Pet": {}}}"#);
        let loader = JsonModuleLoader::new(files).with_mapper(
            UrlMapper::new().with_mapping("https://catalog.example/", "http://localhost:4201/catalog/"),
        );
        let module = loader.resolve("https://catalog.example/pet").unwrap();
        assert_eq!(module.file_url, "https://catalog.example/pet.gts");
    }

    #[test]
    fn test_loader_as_definition_source() {
        let files = Arc::new(Files::default());
        files.put("http://r/person.gts", PERSON);
        let loader: Arc<dyn ModuleLoader> = Arc::new(JsonModuleLoader::new(files));
        let resolver = SchemaResolver::new(Arc::new(LoaderSource(loader)));
        let person = resolver
            .resolve(&CardRef::exported("http://r/person", "Person"))
            .unwrap();
        assert_eq!(person.types.len(), 2);
    }
}
