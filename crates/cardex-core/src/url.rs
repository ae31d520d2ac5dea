//! Realm URL helpers.
//!
//! Everything in a realm is addressed by an absolute URL under the realm's
//! base URL. We only ever need a handful of string operations on them
//! (joining, relativizing, resolving `./` and `../` references, swapping
//! extensions), so they live here as small pure functions.

use crate::error::UrlError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// File extensions that mark a file as a schema module.
pub const MODULE_EXTENSIONS: &[&str] = &["gts", "ts", "js", "mjs"];

/// File extension of card instance documents.
pub const INSTANCE_EXTENSION: &str = "json";

/// The base URL of a realm. Always ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RealmUrl(String);

impl RealmUrl {
    /// Parses a realm URL, appending the trailing slash if it's missing.
    pub fn new(url: impl Into<String>) -> Result<Self, UrlError> {
        let url = url.into();
        if !has_scheme(&url) {
            return Err(UrlError::NotAbsolute(url));
        }
        let (origin, path) = split_origin(&url);
        let mut normalized = format!("{}{}", origin, normalize_path(path));
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Joins a realm-relative path onto the realm URL.
    pub fn join(&self, path: &str) -> String {
        format!("{}{}", self.0, path.trim_start_matches('/'))
    }

    /// True if the URL lives inside this realm.
    pub fn contains(&self, url: &str) -> bool {
        url.starts_with(&self.0)
    }

    /// Returns the realm-relative path of a URL inside this realm.
    pub fn local_path<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.0.as_str())
    }
}

impl fmt::Display for RealmUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RealmUrl {
    type Error = UrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RealmUrl> for String {
    fn from(value: RealmUrl) -> Self {
        value.0
    }
}

/// True if the string starts with a URL scheme such as `http://`.
pub fn has_scheme(s: &str) -> bool {
    match s.find("://") {
        Some(0) | None => false,
        Some(idx) => s[..idx]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
    }
}

/// Splits `http://host/a/b` into (`http://host`, `/a/b`).
fn split_origin(url: &str) -> (&str, &str) {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(slash) => url.split_at(after_scheme + slash),
        None => (url, "/"),
    }
}

/// Collapses `.` and `..` segments and duplicate slashes.
fn normalize_path(path: &str) -> String {
    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    let mut joined = format!("/{}", segments.join("/"));
    if trailing && !joined.ends_with('/') {
        joined.push('/');
    }
    joined
}

/// Resolves a possibly-relative reference against a base URL.
///
/// Absolute references are normalized and returned; `/path` references
/// replace the base path; everything else is resolved against the base's
/// directory.
pub fn resolve_url(base: &str, reference: &str) -> String {
    if has_scheme(reference) {
        let (origin, path) = split_origin(reference);
        return format!("{}{}", origin, normalize_path(path));
    }
    let (origin, base_path) = split_origin(base);
    let path = if reference.starts_with('/') {
        reference.to_string()
    } else {
        let dir_end = base_path.rfind('/').map(|i| i + 1).unwrap_or(0);
        format!("{}{}", &base_path[..dir_end], reference)
    };
    format!("{}{}", origin, normalize_path(&path))
}

/// Returns the extension of the last path segment, if any.
pub fn extension(url: &str) -> Option<&str> {
    let last = url.rsplit('/').next()?;
    let dot = last.rfind('.')?;
    if dot == 0 {
        return None;
    }
    Some(&last[dot + 1..])
}

/// True if the URL points at a schema module file.
pub fn is_module_url(url: &str) -> bool {
    extension(url).is_some_and(|ext| MODULE_EXTENSIONS.contains(&ext))
}

/// True if the URL points at a card instance document.
pub fn is_instance_url(url: &str) -> bool {
    extension(url) == Some(INSTANCE_EXTENSION)
}

/// Strips a module file extension, giving the module's canonical URL.
///
/// `http://realm/person.gts` and `http://realm/person` name the same module.
pub fn trim_module_extension(url: &str) -> &str {
    match extension(url) {
        Some(ext) if MODULE_EXTENSIONS.contains(&ext) => &url[..url.len() - ext.len() - 1],
        _ => url,
    }
}

/// The card id for an instance file URL (the URL without `.json`).
pub fn card_id(url: &str) -> &str {
    url.strip_suffix(".json").unwrap_or(url)
}

/// The instance file URL for a card id.
pub fn instance_file_url(id: &str) -> Cow<'_, str> {
    if is_instance_url(id) {
        Cow::Borrowed(id)
    } else {
        Cow::Owned(format!("{}.{}", id, INSTANCE_EXTENSION))
    }
}

/// Realm-to-realm URL remapping.
///
/// Lets a realm refer to another realm by a public URL while the bytes are
/// fetched from a different (for example local) location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMapper {
    mappings: Vec<UrlMapping>,
}

/// A single prefix mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMapping {
    pub from: String,
    pub to: String,
}

impl UrlMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: add a prefix mapping.
    pub fn with_mapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.mappings.push(UrlMapping {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Maps a URL through the first matching prefix.
    pub fn map<'a>(&self, url: &'a str) -> Cow<'a, str> {
        for mapping in &self.mappings {
            if let Some(rest) = url.strip_prefix(mapping.from.as_str()) {
                return Cow::Owned(format!("{}{}", mapping.to, rest));
            }
        }
        Cow::Borrowed(url)
    }

    /// Reverses [`UrlMapper::map`].
    pub fn unmap<'a>(&self, url: &'a str) -> Cow<'a, str> {
        for mapping in &self.mappings {
            if let Some(rest) = url.strip_prefix(mapping.to.as_str()) {
                return Cow::Owned(format!("{}{}", mapping.from, rest));
            }
        }
        Cow::Borrowed(url)
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realm_url_adds_trailing_slash() {
        let realm = RealmUrl::new("http://test-realm/test").unwrap();
        assert_eq!(realm.as_str(), "http://test-realm/test/");
        assert_eq!(realm.join("posts/1.json"), "http://test-realm/test/posts/1.json");
        assert_eq!(
            realm.local_path("http://test-realm/test/posts/1.json"),
            Some("posts/1.json")
        );
        assert!(RealmUrl::new("not-a-url").is_err());
    }

    #[test]
    fn test_resolve_relative_references() {
        let base = "http://test-realm/test/posts/1.json";
        assert_eq!(resolve_url(base, "../person"), "http://test-realm/test/person");
        assert_eq!(resolve_url(base, "./2"), "http://test-realm/test/posts/2");
        assert_eq!(resolve_url(base, "/other/x"), "http://test-realm/other/x");
        assert_eq!(
            resolve_url(base, "https://cardstack.com/base/card-api"),
            "https://cardstack.com/base/card-api"
        );
    }

    #[test]
    fn test_module_and_instance_detection() {
        assert!(is_module_url("http://r/person.gts"));
        assert!(!is_module_url("http://r/person"));
        assert!(is_instance_url("http://r/Person/1.json"));
        assert_eq!(trim_module_extension("http://r/person.gts"), "http://r/person");
        assert_eq!(trim_module_extension("http://r/Person/1.json"), "http://r/Person/1.json");
        assert_eq!(card_id("http://r/Person/1.json"), "http://r/Person/1");
        assert_eq!(instance_file_url("http://r/Person/1"), "http://r/Person/1.json");
        assert_eq!(extension("http://r/.gitignore"), None);
    }

    #[test]
    fn test_url_mapper_roundtrip() {
        let mapper = UrlMapper::new().with_mapping("http://remote/base/", "http://localhost:4201/base/");
        let mapped = mapper.map("http://remote/base/card-api");
        assert_eq!(mapped, "http://localhost:4201/base/card-api");
        assert_eq!(mapper.unmap(&mapped), "http://remote/base/card-api");
        assert_eq!(mapper.map("http://elsewhere/x"), "http://elsewhere/x");
    }
}
