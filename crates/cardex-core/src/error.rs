//! Error types for the core crate.
//!
//! We keep errors simple and actionable. Each variant tells you
//! exactly what went wrong and which URL, card or field it was about,
//! because indexing surfaces these to users as error entries.

use thiserror::Error;

/// Things that can go wrong when loading a schema module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// No file backs this module URL. The URL is the module's canonical
    /// (extension-less) URL so it can be recorded as a dependency.
    #[error("module not found: '{url}'")]
    NotFound { url: String },

    /// The module source exists but could not be understood.
    #[error("failed to parse module '{url}': {message}")]
    Parse { url: String, message: String },

    /// The bytes could not be fetched.
    #[error("failed to fetch '{url}': {message}")]
    Fetch { url: String, message: String },
}

impl LoaderError {
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// The URL of the missing module, if this is a missing-module error.
    pub fn missing_url(&self) -> Option<&str> {
        match self {
            Self::NotFound { url } => Some(url),
            _ => None,
        }
    }
}

/// Things that can go wrong when resolving a card reference to a schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// The module loaded but doesn't export the requested name.
    #[error("module '{module}' has no export named '{name}'")]
    MissingExport { module: String, name: String },

    /// A card's ancestor chain loops back on itself.
    #[error("card '{card}' has a cyclic ancestor chain")]
    CyclicAncestry { card: String },

    /// A `fieldOf` reference named a field the card doesn't have.
    #[error("card '{card}' has no field named '{field}'")]
    UnknownField { card: String, field: String },

    /// An `ancestorOf` reference on a root card.
    #[error("card '{card}' has no ancestor")]
    NoAncestor { card: String },
}

impl SchemaError {
    /// The URL of a missing module somewhere in the chain, if that's the cause.
    pub fn missing_module(&self) -> Option<&str> {
        match self {
            Self::Loader(e) => e.missing_url(),
            Self::MissingExport { module, .. } => Some(module),
            _ => None,
        }
    }
}

/// Errors raised while computing a field value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The field is computed but nothing knows how to compute it.
    #[error("field '{field}' of '{card}' is computed but has no computation")]
    NotComputable { card: String, field: String },

    /// The computation ran and failed.
    #[error("computing field '{field}' of '{card}' failed: {message}")]
    Computation {
        card: String,
        field: String,
        message: String,
    },
}

/// URL parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("'{0}' is not an absolute URL")]
    NotAbsolute(String),
}

/// Problems with a card instance document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("invalid JSON in '{url}': {message}")]
    InvalidJson { url: String, message: String },

    /// The document has no `data` resource object.
    #[error("'{url}' is not a card document: missing 'data'")]
    MissingData { url: String },

    /// The resource doesn't say which card it adopts from.
    #[error("'{url}' has no 'meta.adoptsFrom' card reference")]
    MissingAdoptsFrom { url: String },
}
