//! Schema declarations and card resolution.
//!
//! A module exports card and field declarations. Each declaration names its
//! parent through a [`CardRef`] and lists its own fields. Resolution turns a
//! reference into a [`ResolvedCard`]: the concrete definition with every
//! inherited field folded in and the ordered ancestor chain recorded as
//! `types`. No runtime type system is involved, it's plain data walking.

use crate::card_ref::{CardRef, CodeRef, NestedRef};
use crate::error::{FieldError, LoaderError, SchemaError};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// URL of the built-in base card API module.
pub const BASE_CARD_API: &str = "https://cardstack.com/base/card-api";

/// How a field holds its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Contains,
    ContainsMany,
    LinksTo,
    LinksToMany,
}

impl FieldKind {
    pub fn is_link(self) -> bool {
        matches!(self, Self::LinksTo | Self::LinksToMany)
    }

    pub fn is_plural(self) -> bool {
        matches!(self, Self::ContainsMany | Self::LinksToMany)
    }
}

/// A field declared on a card or composite field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    /// The card or field type of the value.
    pub card: CodeRef,
    /// Computed fields are derived from other attributes at index time.
    #[serde(default)]
    pub computed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute: Option<ComputeExpr>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind, card: CodeRef) -> Self {
        Self {
            name: name.into(),
            kind,
            card,
            computed: false,
            compute: None,
        }
    }

    /// Builder pattern: mark as computed by the given expression.
    pub fn computed_by(mut self, expr: ComputeExpr) -> Self {
        self.computed = true;
        self.compute = Some(expr);
        self
    }
}

/// Whether a declaration is a card (has identity) or a field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum DefKind {
    #[default]
    Card,
    Field,
}

/// Transform applied to a field's value before it is compared or sorted.
///
/// This is how a type customizes ordering. An enum-like field can declare
/// `ordinal` so that `draft < review < published` regardless of spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Queryable {
    Identity,
    /// Strings that look like numbers become numbers.
    Numeric,
    /// Strings compare case-insensitively.
    Lowercase,
    /// The value's position in the declared list.
    Ordinal { values: Vec<Value> },
    /// Strings become their character count. Query paths fan plural
    /// fields out before transforming, so stored arrays never reach this;
    /// an array only shows up here as a filter operand.
    Length,
}

impl Queryable {
    pub fn apply(&self, value: &Value) -> Value {
        match self {
            Self::Identity => value.clone(),
            Self::Numeric => match value {
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or_else(|| value.clone()),
                other => other.clone(),
            },
            Self::Lowercase => match value {
                Value::String(s) => Value::String(s.to_lowercase()),
                other => other.clone(),
            },
            Self::Ordinal { values } => values
                .iter()
                .position(|v| v == value)
                .map(|idx| Value::from(idx as u64))
                .unwrap_or(Value::Null),
            Self::Length => match value {
                Value::Array(items) => Value::from(items.len() as u64),
                Value::String(s) => Value::from(s.chars().count() as u64),
                Value::Null => Value::Null,
                _ => Value::from(1u64),
            },
        }
    }
}

/// A declarative field computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ComputeExpr {
    /// Concatenates parts. A part starting with `$` is an attribute path.
    Concat { parts: Vec<String> },
    /// Number of items in a plural attribute.
    Length { of: String },
}

impl ComputeExpr {
    /// Evaluates the expression against a card's attributes.
    pub fn evaluate(&self, owner: &CodeRef, field: &str, attributes: &Value) -> Result<Value, FieldError> {
        let fail = |message: String| FieldError::Computation {
            card: owner.internal_key(),
            field: field.to_string(),
            message,
        };
        match self {
            Self::Concat { parts } => {
                let mut out = String::new();
                for part in parts {
                    match part.strip_prefix('$') {
                        Some(path) => match lookup_path(attributes, path) {
                            None | Some(Value::Null) => {}
                            Some(Value::String(s)) => out.push_str(s),
                            Some(Value::Number(n)) => out.push_str(&n.to_string()),
                            Some(Value::Bool(b)) => out.push_str(&b.to_string()),
                            Some(other) => {
                                return Err(fail(format!(
                                    "'{}' is not a scalar value: {}",
                                    path, other
                                )))
                            }
                        },
                        None => out.push_str(part),
                    }
                }
                Ok(Value::String(out))
            }
            Self::Length { of } => match lookup_path(attributes, of) {
                None | Some(Value::Null) => Ok(Value::from(0u64)),
                Some(Value::Array(items)) => Ok(Value::from(items.len() as u64)),
                Some(other) => Err(fail(format!("'{}' is not a list: {}", of, other))),
            },
        }
    }
}

fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| current.get(segment))
}

/// A card or field declaration as exported by a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CardDecl {
    #[serde(default)]
    pub kind: DefKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<CardRef>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Primitive field types hold scalar values directly.
    #[serde(default)]
    pub primitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queryable: Option<Queryable>,
}

impl CardDecl {
    pub fn card(parent: Option<CardRef>) -> Self {
        Self {
            kind: DefKind::Card,
            parent,
            ..Default::default()
        }
    }

    pub fn primitive_field(queryable: Option<Queryable>) -> Self {
        Self {
            kind: DefKind::Field,
            parent: Some(CardRef::exported(BASE_CARD_API, "FieldDef")),
            primitive: true,
            queryable,
            ..Default::default()
        }
    }

    /// Builder pattern: add a field.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }
}

/// The schema contents of one module, with every reference absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModuleDef {
    /// Canonical (extension-less) module URL.
    pub url: String,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub exports: BTreeMap<String, CardDecl>,
}

impl ModuleDef {
    /// Every other module this module's declarations mention.
    pub fn referenced_modules(&self) -> BTreeSet<String> {
        let mut modules: BTreeSet<String> = self.imports.iter().cloned().collect();
        for decl in self.exports.values() {
            if let Some(parent) = &decl.parent {
                modules.insert(parent.root_module().to_string());
            }
            for field in &decl.fields {
                modules.insert(field.card.module_url().to_string());
            }
        }
        modules.remove(&self.url);
        modules
    }
}

/// The built-in base module every realm builds on.
pub fn base_module() -> Arc<ModuleDef> {
    static BASE: Lazy<Arc<ModuleDef>> = Lazy::new(|| {
        let string = CodeRef::new(BASE_CARD_API, "StringField");
        let mut exports = BTreeMap::new();
        exports.insert(
            "CardDef".to_string(),
            CardDecl::card(None)
                .with_field(FieldDef::new("title", FieldKind::Contains, string.clone()))
                .with_field(FieldDef::new("description", FieldKind::Contains, string.clone()))
                .with_field(FieldDef::new("thumbnailURL", FieldKind::Contains, string)),
        );
        exports.insert(
            "FieldDef".to_string(),
            CardDecl {
                kind: DefKind::Field,
                ..Default::default()
            },
        );
        exports.insert("StringField".to_string(), CardDecl::primitive_field(None));
        exports.insert(
            "NumberField".to_string(),
            CardDecl::primitive_field(Some(Queryable::Numeric)),
        );
        exports.insert("BooleanField".to_string(), CardDecl::primitive_field(None));
        exports.insert("DateField".to_string(), CardDecl::primitive_field(None));
        exports.insert("DatetimeField".to_string(), CardDecl::primitive_field(None));
        Arc::new(ModuleDef {
            url: BASE_CARD_API.to_string(),
            imports: Vec::new(),
            exports,
        })
    });
    BASE.clone()
}

/// The root card type every card descends from.
pub fn base_card_ref() -> CodeRef {
    CodeRef::new(BASE_CARD_API, "CardDef")
}

/// Anything that can hand out module definitions by URL.
pub trait DefinitionSource: Send + Sync {
    fn module(&self, url: &str) -> Result<Arc<ModuleDef>, LoaderError>;
}

/// A fully resolved card or field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCard {
    pub id: CodeRef,
    pub kind: DefKind,
    pub primitive: bool,
    pub queryable: Option<Queryable>,
    /// Own and inherited fields. A redeclared field replaces the inherited one
    /// in place.
    pub fields: Vec<FieldDef>,
    /// The ancestor chain, most specific first, starting with `id`.
    pub types: Vec<CodeRef>,
    /// Canonical URLs of every module in the ancestor chain.
    pub modules: BTreeSet<String>,
}

impl ResolvedCard {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The `types` list in its stored string form.
    pub fn type_keys(&self) -> Vec<String> {
        self.types.iter().map(CodeRef::internal_key).collect()
    }

    /// True if values of this type are stored as-is rather than as an object
    /// of sub-fields.
    pub fn holds_scalar(&self) -> bool {
        self.primitive || (self.kind == DefKind::Field && self.fields.is_empty())
    }
}

/// Resolves card references through a [`DefinitionSource`], caching results.
pub struct SchemaResolver {
    source: Arc<dyn DefinitionSource>,
    cache: DashMap<CodeRef, Arc<ResolvedCard>>,
}

impl SchemaResolver {
    pub fn new(source: Arc<dyn DefinitionSource>) -> Self {
        Self {
            source,
            cache: DashMap::new(),
        }
    }

    /// Resolves any card reference.
    pub fn resolve(&self, card: &CardRef) -> Result<Arc<ResolvedCard>, SchemaError> {
        let code = self.lower(card)?;
        self.resolve_code_ref(&code)
    }

    /// Resolves a module export, walking the ancestor chain.
    pub fn resolve_code_ref(&self, code: &CodeRef) -> Result<Arc<ResolvedCard>, SchemaError> {
        let key = CodeRef::new(code.module_url(), code.name.clone());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }

        let mut chain: Vec<(CodeRef, CardDecl)> = Vec::new();
        let mut seen: HashSet<CodeRef> = HashSet::new();
        let mut current = Some(key.clone());
        while let Some(link) = current {
            if !seen.insert(link.clone()) {
                return Err(SchemaError::CyclicAncestry {
                    card: key.internal_key(),
                });
            }
            let module = self.source.module(link.module_url())?;
            let decl = module
                .exports
                .get(&link.name)
                .cloned()
                .ok_or_else(|| SchemaError::MissingExport {
                    module: link.module_url().to_string(),
                    name: link.name.clone(),
                })?;
            current = match &decl.parent {
                Some(parent) => Some(self.lower(parent)?),
                None => None,
            };
            chain.push((link, decl));
        }

        // Fold fields from the root ancestor down so children override.
        let mut fields: Vec<FieldDef> = Vec::new();
        for (_, decl) in chain.iter().rev() {
            for field in &decl.fields {
                match fields.iter_mut().find(|f| f.name == field.name) {
                    Some(existing) => *existing = field.clone(),
                    None => fields.push(field.clone()),
                }
            }
        }

        let own = &chain[0].1;
        let queryable = chain.iter().find_map(|(_, decl)| decl.queryable.clone());
        let resolved = Arc::new(ResolvedCard {
            id: key.clone(),
            kind: own.kind,
            primitive: chain.iter().any(|(_, decl)| decl.primitive),
            queryable,
            fields,
            modules: chain
                .iter()
                .map(|(code, _)| code.module_url().to_string())
                .collect(),
            types: chain.into_iter().map(|(code, _)| code).collect(),
        });
        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Resolves the type of a field.
    pub fn field_card(&self, field: &FieldDef) -> Result<Arc<ResolvedCard>, SchemaError> {
        self.resolve_code_ref(&field.card)
    }

    /// Turns a structural reference into the module export it denotes.
    fn lower(&self, card: &CardRef) -> Result<CodeRef, SchemaError> {
        match card {
            CardRef::Exported(code) => Ok(code.clone()),
            CardRef::Nested(NestedRef::FieldOf { card, field }) => {
                let owner = self.resolve(card)?;
                owner
                    .field(field)
                    .map(|f| f.card.clone())
                    .ok_or_else(|| SchemaError::UnknownField {
                        card: owner.id.internal_key(),
                        field: field.clone(),
                    })
            }
            CardRef::Nested(NestedRef::AncestorOf { card }) => {
                let code = self.lower(card)?;
                let module = self.source.module(code.module_url())?;
                let decl = module
                    .exports
                    .get(&code.name)
                    .ok_or_else(|| SchemaError::MissingExport {
                        module: code.module_url().to_string(),
                        name: code.name.clone(),
                    })?;
                match &decl.parent {
                    Some(parent) => self.lower(parent),
                    None => Err(SchemaError::NoAncestor {
                        card: code.internal_key(),
                    }),
                }
            }
        }
    }

    /// Drops cached resolutions.
    pub fn clear(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    struct Modules(HashMap<String, Arc<ModuleDef>>);

    impl DefinitionSource for Modules {
        fn module(&self, url: &str) -> Result<Arc<ModuleDef>, LoaderError> {
            if url == BASE_CARD_API {
                return Ok(base_module());
            }
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| LoaderError::not_found(url))
        }
    }

    fn string_field() -> CodeRef {
        CodeRef::new(BASE_CARD_API, "StringField")
    }

    fn fixture() -> SchemaResolver {
        let mut person = ModuleDef {
            url: "http://r/person".into(),
            ..Default::default()
        };
        person.exports.insert(
            "Person".into(),
            CardDecl::card(Some(base_card_ref().into()))
                .with_field(FieldDef::new("firstName", FieldKind::Contains, string_field())),
        );
        let mut employee = ModuleDef {
            url: "http://r/employee".into(),
            imports: vec!["http://r/person".into()],
            ..Default::default()
        };
        employee.exports.insert(
            "Employee".into(),
            CardDecl::card(Some(CardRef::exported("http://r/person", "Person")))
                .with_field(FieldDef::new("department", FieldKind::Contains, string_field())),
        );
        let mut loops = ModuleDef {
            url: "http://r/loops".into(),
            ..Default::default()
        };
        loops.exports.insert(
            "A".into(),
            CardDecl::card(Some(CardRef::exported("http://r/loops", "B"))),
        );
        loops.exports.insert(
            "B".into(),
            CardDecl::card(Some(CardRef::exported("http://r/loops", "A"))),
        );

        let modules = [person, employee, loops]
            .into_iter()
            .map(|m| (m.url.clone(), Arc::new(m)))
            .collect();
        SchemaResolver::new(Arc::new(Modules(modules)))
    }

    #[test]
    fn test_resolve_ancestor_chain() {
        let resolver = fixture();
        let employee = resolver
            .resolve(&CardRef::exported("http://r/employee", "Employee"))
            .unwrap();
        assert_eq!(
            employee.type_keys(),
            vec![
                "http://r/employee/Employee",
                "http://r/person/Person",
                "https://cardstack.com/base/card-api/CardDef",
            ]
        );
        let names: Vec<_> = employee.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["title", "description", "thumbnailURL", "firstName", "department"]
        );
        assert!(employee.modules.contains("http://r/person"));
    }

    #[test]
    fn test_resolve_nested_refs() {
        let resolver = fixture();
        let ancestor = resolver
            .resolve(&CardRef::ancestor_of(CardRef::exported(
                "http://r/employee",
                "Employee",
            )))
            .unwrap();
        assert_eq!(ancestor.id.name, "Person");

        let field = resolver
            .resolve(&CardRef::field_of(
                CardRef::exported("http://r/person", "Person"),
                "firstName",
            ))
            .unwrap();
        assert!(field.holds_scalar());

        let err = resolver
            .resolve(&CardRef::field_of(
                CardRef::exported("http://r/person", "Person"),
                "nope",
            ))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownField { .. }));
    }

    #[test]
    fn test_missing_module_is_reported() {
        let resolver = fixture();
        let err = resolver
            .resolve(&CardRef::exported("http://r/missing", "Thing"))
            .unwrap_err();
        assert_eq!(err.missing_module(), Some("http://r/missing"));
    }

    #[test]
    fn test_cyclic_ancestry_is_an_error() {
        let resolver = fixture();
        let err = resolver
            .resolve(&CardRef::exported("http://r/loops", "A"))
            .unwrap_err();
        assert!(matches!(err, SchemaError::CyclicAncestry { .. }));
    }

    #[test]
    fn test_queryable_transforms() {
        let ordinal = Queryable::Ordinal {
            values: vec![json!("draft"), json!("review"), json!("published")],
        };
        assert_eq!(ordinal.apply(&json!("review")), json!(1));
        assert_eq!(ordinal.apply(&json!("unknown")), Value::Null);
        assert_eq!(Queryable::Numeric.apply(&json!("12")), json!(12.0));
        assert_eq!(Queryable::Length.apply(&json!(["a", "b"])), json!(2));
    }

    #[test]
    fn test_compute_concat() {
        let owner = CodeRef::new("http://r/person", "Person");
        let expr = ComputeExpr::Concat {
            parts: vec!["$firstName".into(), " ".into(), "$lastName".into()],
        };
        let value = expr
            .evaluate(&owner, "fullName", &json!({"firstName": "Mango", "lastName": "Abdel-Rahman"}))
            .unwrap();
        assert_eq!(value, json!("Mango Abdel-Rahman"));

        let err = expr
            .evaluate(&owner, "fullName", &json!({"firstName": {"oops": true}}))
            .unwrap_err();
        assert!(matches!(err, FieldError::Computation { .. }));
    }
}
