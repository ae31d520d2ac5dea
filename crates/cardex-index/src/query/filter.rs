//! Filter grammar and evaluation.
//!
//! Filters arrive as JSON trees. Before running, a tree is compiled against
//! the schema into a [`Predicate`]: every `on` and `type` reference must
//! resolve, every path must name real fields, and each path remembers the
//! queryable transform of its leaf type.

use crate::error::QueryError;
use cardex_core::schema::{base_card_ref, Queryable, ResolvedCard, SchemaResolver};
use cardex_core::{CardRef, CodeRef, IndexedEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A filter node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    Any(AnyFilter),
    Every(EveryFilter),
    Not(NotFilter),
    Eq(EqFilter),
    Contains(ContainsFilter),
    Range(RangeFilter),
    Type(TypeFilter),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnyFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<CodeRef>,
    pub any: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EveryFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<CodeRef>,
    pub every: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<CodeRef>,
    pub not: Box<Filter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<CodeRef>,
    pub eq: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainsFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<CodeRef>,
    pub contains: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<CodeRef>,
    pub range: BTreeMap<String, RangeBounds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<CodeRef>,
    #[serde(rename = "type")]
    pub card_type: CodeRef,
}

/// Bounds of a range comparison. All present bounds must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
}

impl Filter {
    pub fn on(&self) -> Option<&CodeRef> {
        match self {
            Self::Any(f) => f.on.as_ref(),
            Self::Every(f) => f.on.as_ref(),
            Self::Not(f) => f.on.as_ref(),
            Self::Eq(f) => f.on.as_ref(),
            Self::Contains(f) => f.on.as_ref(),
            Self::Range(f) => f.on.as_ref(),
            Self::Type(f) => f.on.as_ref(),
        }
    }
}

/// A checked field path.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    pub segments: Vec<String>,
    /// Goes through a `containsMany` or `linksToMany`.
    pub plural: bool,
    pub queryable: Option<Queryable>,
}

impl FieldPath {
    /// Resolves a dotted path against a card.
    pub fn resolve(
        resolver: &SchemaResolver,
        card: &ResolvedCard,
        path: &str,
    ) -> Result<Self, QueryError> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(QueryError::Invalid(format!("empty segment in path '{}'", path)));
        }
        let unknown = || QueryError::UnknownField {
            card: card.id.internal_key(),
            path: path.to_string(),
        };

        let mut current: Arc<ResolvedCard> = Arc::new(card.clone());
        let mut plural = false;
        let mut queryable = None;
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            if segment == "id" && last {
                queryable = None;
                break;
            }
            if current.holds_scalar() {
                return Err(unknown());
            }
            let field = current.field(segment).ok_or_else(unknown)?.clone();
            plural |= field.kind.is_plural();
            let next = resolver.field_card(&field).map_err(|e| QueryError::UnknownType {
                card: field.card.internal_key(),
                reason: e.to_string(),
            })?;
            if last {
                queryable = next.queryable.clone();
            }
            current = next;
        }
        Ok(Self {
            segments,
            plural,
            queryable,
        })
    }

    /// Every value at this path, fanning out over arrays. `None` stands for
    /// absent, null, or an empty list.
    pub fn values<'a>(&self, doc: &'a Value) -> Vec<Option<&'a Value>> {
        let mut out = Vec::new();
        collect(doc, &self.segments, &mut out);
        out
    }

    fn transform(&self, value: &Value) -> Value {
        match &self.queryable {
            Some(q) => q.apply(value),
            None => value.clone(),
        }
    }

    /// The single sort key of this path.
    pub fn sort_value(&self, doc: &Value) -> Option<Value> {
        self.values(doc)
            .into_iter()
            .flatten()
            .map(|v| self.transform(v))
            .find(|v| !v.is_null())
    }
}

fn collect<'a>(value: &'a Value, segments: &[String], out: &mut Vec<Option<&'a Value>>) {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                out.push(None);
            }
            for item in items {
                collect(item, segments, out);
            }
        }
        Value::Null => out.push(None),
        _ if segments.is_empty() => out.push(Some(value)),
        Value::Object(map) => match map.get(&segments[0]) {
            Some(next) => collect(next, &segments[1..], out),
            None => out.push(None),
        },
        _ => out.push(None),
    }
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between comparable JSON scalars.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used for sorting mixed values: booleans, numbers, strings,
/// then anything else by its JSON text.
pub fn total_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Bool(_) => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            _ => 3,
        }
    }
    compare_values(a, b)
        .unwrap_or_else(|| rank(a).cmp(&rank(b)).then_with(|| a.to_string().cmp(&b.to_string())))
}

/// A compiled filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Any(Vec<Predicate>),
    Every(Vec<Predicate>),
    Not(Box<Predicate>),
    Type(String),
    Eq { path: FieldPath, value: Value },
    Contains { path: FieldPath, needle: String },
    Range { path: FieldPath, bounds: RangeBounds },
}

impl Predicate {
    /// Type-checks a filter and turns it into a predicate.
    pub fn compile(resolver: &SchemaResolver, filter: &Filter) -> Result<Self, QueryError> {
        let base = resolve_type(resolver, &base_card_ref())?;
        compile_node(resolver, filter, &base)
    }

    pub fn matches(&self, entry: &IndexedEntry) -> bool {
        let empty = Value::Null;
        let doc = entry.search_doc.as_ref().unwrap_or(&empty);
        match self {
            Self::Any(children) => children.iter().any(|p| p.matches(entry)),
            Self::Every(children) => children.iter().all(|p| p.matches(entry)),
            Self::Not(inner) => !inner.matches(entry),
            Self::Type(key) => entry.types.iter().any(|t| t == key),
            Self::Eq { path, value } => {
                let found = path.values(doc);
                if value.is_null() {
                    return found.iter().all(Option::is_none);
                }
                let target = path.transform(value);
                found.into_iter().flatten().any(|v| {
                    let candidate = path.transform(v);
                    // Values a transform can't place compare as written.
                    if target.is_null() || candidate.is_null() {
                        values_equal(v, value)
                    } else {
                        values_equal(&candidate, &target)
                    }
                })
            }
            Self::Contains { path, needle } => path.values(doc).into_iter().flatten().any(|v| {
                v.as_str()
                    .is_some_and(|s| s.to_lowercase().contains(needle.as_str()))
            }),
            Self::Range { path, bounds } => path
                .values(doc)
                .into_iter()
                .flatten()
                .any(|v| in_range(&path.transform(v), path, bounds)),
        }
    }
}

fn in_range(value: &Value, path: &FieldPath, bounds: &RangeBounds) -> bool {
    let check = |bound: &Option<Value>, ok: fn(Ordering) -> bool| match bound {
        None => true,
        Some(b) => compare_values(value, &path.transform(b)).is_some_and(ok),
    };
    check(&bounds.lt, Ordering::is_lt)
        && check(&bounds.lte, Ordering::is_le)
        && check(&bounds.gt, Ordering::is_gt)
        && check(&bounds.gte, Ordering::is_ge)
}

pub(crate) fn resolve_type(
    resolver: &SchemaResolver,
    code: &CodeRef,
) -> Result<Arc<ResolvedCard>, QueryError> {
    resolver
        .resolve(&CardRef::Exported(code.clone()))
        .map_err(|e| QueryError::UnknownType {
            card: code.internal_key(),
            reason: e.to_string(),
        })
}

fn compile_node(
    resolver: &SchemaResolver,
    filter: &Filter,
    inherited: &Arc<ResolvedCard>,
) -> Result<Predicate, QueryError> {
    let target = match filter.on() {
        Some(on) => resolve_type(resolver, on)?,
        None => inherited.clone(),
    };

    let predicate = match filter {
        Filter::Any(f) => Predicate::Any(
            f.any
                .iter()
                .map(|child| compile_node(resolver, child, &target))
                .collect::<Result<_, _>>()?,
        ),
        Filter::Every(f) => Predicate::Every(
            f.every
                .iter()
                .map(|child| compile_node(resolver, child, &target))
                .collect::<Result<_, _>>()?,
        ),
        Filter::Not(f) => Predicate::Not(Box::new(compile_node(resolver, &f.not, &target)?)),
        Filter::Type(f) => Predicate::Type(resolve_type(resolver, &f.card_type)?.id.internal_key()),
        Filter::Eq(f) => Predicate::Every(
            f.eq.iter()
                .map(|(path, value)| {
                    Ok(Predicate::Eq {
                        path: FieldPath::resolve(resolver, &target, path)?,
                        value: value.clone(),
                    })
                })
                .collect::<Result<_, QueryError>>()?,
        ),
        Filter::Contains(f) => Predicate::Every(
            f.contains
                .iter()
                .map(|(path, value)| {
                    let needle = value.as_str().ok_or_else(|| {
                        QueryError::Invalid(format!("'contains' on '{}' needs a string", path))
                    })?;
                    Ok(Predicate::Contains {
                        path: FieldPath::resolve(resolver, &target, path)?,
                        needle: needle.to_lowercase(),
                    })
                })
                .collect::<Result<_, QueryError>>()?,
        ),
        Filter::Range(f) => Predicate::Every(
            f.range
                .iter()
                .map(|(path, bounds)| {
                    if bounds == &RangeBounds::default() {
                        return Err(QueryError::Invalid(format!(
                            "range on '{}' has no bounds",
                            path
                        )));
                    }
                    Ok(Predicate::Range {
                        path: FieldPath::resolve(resolver, &target, path)?,
                        bounds: bounds.clone(),
                    })
                })
                .collect::<Result<_, QueryError>>()?,
        ),
    };

    Ok(match filter.on() {
        Some(_) => Predicate::Every(vec![Predicate::Type(target.id.internal_key()), predicate]),
        None => predicate,
    })
}
