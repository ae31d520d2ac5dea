//! Rendering seam.
//!
//! Indexing asks a [`Renderer`] for the isolated HTML of every instance it
//! indexes. A render failure becomes an error entry, so renderers report
//! problems through [`RenderError`] instead of panicking.

use serde_json::Value;
use std::fmt::Write as _;
use thiserror::Error;

/// Everything a renderer gets to see about one instance.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    /// The card id (instance URL without `.json`).
    pub id: &'a str,
    pub pristine_doc: &'a Value,
    pub search_doc: &'a Value,
    /// Ancestor type keys, most specific first.
    pub types: &'a [String],
}

/// Renderer output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rendered {
    pub html: String,
    pub scoped_css_urls: Vec<String>,
}

/// A render that blew up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("render failed ({status}): {message}")]
pub struct RenderError {
    pub message: String,
    pub status: u16,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: 500,
        }
    }
}

/// Turns an instance into HTML.
pub trait Renderer: Send + Sync {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Rendered, RenderError>;
}

/// Renders a plain definition list of the search doc.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicRenderer;

impl Renderer for BasicRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Rendered, RenderError> {
        let mut html = String::new();
        let card_type = request.types.first().map(String::as_str).unwrap_or("");
        let _ = write!(
            html,
            "<article class=\"card\" data-id=\"{}\" data-type=\"{}\">",
            escape(request.id),
            escape(card_type)
        );
        if let Some(title) = request.search_doc.get("title").and_then(Value::as_str) {
            let _ = write!(html, "<h1>{}</h1>", escape(title));
        }
        html.push_str("<dl>");
        if let Some(fields) = request.search_doc.as_object() {
            for (name, value) in fields {
                if name == "id" || name == "title" {
                    continue;
                }
                let _ = write!(html, "<dt>{}</dt><dd>{}</dd>", escape(name), escape(&summary(value)));
            }
        }
        html.push_str("</dl></article>");
        Ok(Rendered {
            html,
            scoped_css_urls: Vec::new(),
        })
    }
}

fn summary(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(summary).collect::<Vec<_>>().join(", "),
        Value::Object(map) => match map.get("title").or_else(|| map.get("id")) {
            Some(v) => summary(v),
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}

/// Minimal HTML escaping for text and attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_renderer_escapes() {
        let doc = json!({});
        let search = json!({"id": "http://r/a", "title": "<b>Hi</b>", "owner": {"id": "http://r/p", "firstName": "Mango"}});
        let types = vec!["http://r/pet/Pet".to_string()];
        let rendered = BasicRenderer
            .render(&RenderRequest {
                id: "http://r/a",
                pristine_doc: &doc,
                search_doc: &search,
                types: &types,
            })
            .unwrap();
        assert!(rendered.html.contains("<h1>&lt;b&gt;Hi&lt;/b&gt;</h1>"));
        assert!(rendered.html.contains("<dt>owner</dt><dd>http://r/p</dd>"));
        assert!(!rendered.html.contains("<b>"));
    }
}
