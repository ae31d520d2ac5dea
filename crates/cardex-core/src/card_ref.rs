//! Card references.
//!
//! A card reference names a schema definition without evaluating anything.
//! The plain form is a module export (`{module, name}`); the nested forms
//! say "the card type of field F of card C" or "the parent of card C".
//! Resolving them to actual definitions happens in [`crate::schema`].

use crate::url::{resolve_url, trim_module_extension};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to a named export of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeRef {
    pub module: String,
    pub name: String,
}

impl CodeRef {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// The canonical (extension-less) module URL.
    pub fn module_url(&self) -> &str {
        trim_module_extension(&self.module)
    }

    /// Stable string key used in `types` lists and type filters.
    pub fn internal_key(&self) -> String {
        format!("{}/{}", self.module_url(), self.name)
    }

    /// Resolves the module against a base URL and drops any module extension.
    pub fn resolved_against(&self, base: &str) -> Self {
        let module = resolve_url(base, &self.module);
        Self {
            module: trim_module_extension(&module).to_string(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for CodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.internal_key())
    }
}

/// A reference to a card or field definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CardRef {
    Nested(NestedRef),
    Exported(CodeRef),
}

/// The structural reference forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NestedRef {
    /// The card type of field `field` on `card`.
    FieldOf { card: Box<CardRef>, field: String },
    /// The parent definition of `card`.
    AncestorOf { card: Box<CardRef> },
}

impl CardRef {
    pub fn exported(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Exported(CodeRef::new(module, name))
    }

    pub fn field_of(card: CardRef, field: impl Into<String>) -> Self {
        Self::Nested(NestedRef::FieldOf {
            card: Box::new(card),
            field: field.into(),
        })
    }

    pub fn ancestor_of(card: CardRef) -> Self {
        Self::Nested(NestedRef::AncestorOf {
            card: Box::new(card),
        })
    }

    /// Resolves every module URL in the reference against `base`.
    pub fn resolved_against(&self, base: &str) -> Self {
        match self {
            Self::Exported(code) => Self::Exported(code.resolved_against(base)),
            Self::Nested(NestedRef::FieldOf { card, field }) => {
                Self::field_of(card.resolved_against(base), field.clone())
            }
            Self::Nested(NestedRef::AncestorOf { card }) => {
                Self::ancestor_of(card.resolved_against(base))
            }
        }
    }

    /// The module the reference is ultimately rooted in.
    pub fn root_module(&self) -> &str {
        match self {
            Self::Exported(code) => code.module_url(),
            Self::Nested(NestedRef::FieldOf { card, .. })
            | Self::Nested(NestedRef::AncestorOf { card }) => card.root_module(),
        }
    }
}

impl From<CodeRef> for CardRef {
    fn from(code: CodeRef) -> Self {
        Self::Exported(code)
    }
}

impl fmt::Display for CardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exported(code) => write!(f, "{}", code),
            Self::Nested(NestedRef::FieldOf { card, field }) => {
                write!(f, "fieldOf({}, {})", card, field)
            }
            Self::Nested(NestedRef::AncestorOf { card }) => write!(f, "ancestorOf({})", card),
        }
    }
}
