//! Cardex Core - card data model and schema resolution
//!
//! This crate holds everything the indexer and the query engine agree on:
//! URLs, card references, module schema declarations, index entries, and
//! the collaborator traits (module loading, rendering) the indexer calls
//! into without knowing how they work.
//!
//! # Example
//!
//! ```no_run
//! use cardex_core::{CardRef, SchemaResolver, DefinitionSource};
//! use std::sync::Arc;
//!
//! fn describe(source: Arc<dyn DefinitionSource>) {
//!     let resolver = SchemaResolver::new(source);
//!     let person = resolver
//!         .resolve(&CardRef::exported("http://localhost/realm/person", "Person"))
//!         .unwrap();
//!     for ty in person.type_keys() {
//!         println!("{}", ty);
//!     }
//! }
//! ```

pub mod card_ref;
pub mod doc;
pub mod entry;
pub mod error;
pub mod loader;
pub mod render;
pub mod schema;
pub mod url;

pub use card_ref::{CardRef, CodeRef, NestedRef};
pub use doc::{relationship_key, CardDocument, Link};
pub use entry::{EntryKind, ErrorDoc, IndexedEntry};
pub use error::{DocumentError, FieldError, LoaderError, SchemaError, UrlError};
pub use loader::{JsonModuleLoader, LoadedModule, LoaderSource, ModuleLoader, SourceFetcher};
pub use render::{BasicRenderer, RenderError, RenderRequest, Rendered, Renderer};
pub use schema::{
    base_card_ref, base_module, CardDecl, ComputeExpr, DefKind, DefinitionSource, FieldDef,
    FieldKind, ModuleDef, Queryable, ResolvedCard, SchemaResolver, BASE_CARD_API,
};
pub use url::{RealmUrl, UrlMapper};
