//! Ignore rules.
//!
//! A realm can put `.gitignore` files in any directory. We keep their raw
//! text keyed by directory URL ([`IgnoreData`]) so it can travel with job
//! arguments and results, and compile it into an [`IgnoreMatcher`] that
//! answers "is this URL ignored?" with gitignore semantics: deeper files
//! win over shallower ones, and `!pattern` re-includes.

use crate::error::IndexerError;
use cardex_core::url::RealmUrl;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the per-directory ignore file.
pub const IGNORE_FILE: &str = ".gitignore";

/// Directories the indexer keeps for itself.
pub const INTERNAL_DIRS: &[&str] = &[".git", ".cardex"];

/// Raw ignore file text by directory URL (always ending in `/`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IgnoreData(BTreeMap<String, String>);

impl IgnoreData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the ignore file found at `file_url`.
    pub fn insert_file(&mut self, file_url: &str, text: impl Into<String>) {
        let dir = match file_url.rfind('/') {
            Some(idx) => &file_url[..=idx],
            None => file_url,
        };
        self.0.insert(dir.to_string(), text.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// True if the URL names an ignore file.
pub fn is_ignore_file(url: &str) -> bool {
    url.rsplit('/').next() == Some(IGNORE_FILE)
}

// Gitignore matchers work on paths, so realm URLs are mapped under a fixed
// virtual root.
fn virtual_path(local: &str) -> PathBuf {
    Path::new("/realm").join(local.trim_end_matches('/'))
}

/// Compiled ignore rules for one realm.
pub struct IgnoreMatcher {
    realm: RealmUrl,
    /// (directory depth, local directory, matcher), deepest first.
    rules: Vec<(usize, String, Gitignore)>,
    always_ignore: Vec<String>,
}

impl IgnoreMatcher {
    pub fn new(
        realm: &RealmUrl,
        data: &IgnoreData,
        always_ignore: &[String],
    ) -> Result<Self, IndexerError> {
        let mut rules = Vec::new();
        for (dir_url, text) in data.iter() {
            let Some(local_dir) = realm.local_path(dir_url) else {
                continue;
            };
            let root = virtual_path(local_dir);
            let mut builder = GitignoreBuilder::new(&root);
            for line in text.lines() {
                builder.add_line(None, line).map_err(|e| IndexerError::IgnoreRules {
                    url: dir_url.clone(),
                    message: e.to_string(),
                })?;
            }
            let gitignore = builder.build().map_err(|e| IndexerError::IgnoreRules {
                url: dir_url.clone(),
                message: e.to_string(),
            })?;
            let depth = local_dir.split('/').filter(|s| !s.is_empty()).count();
            rules.push((depth, local_dir.to_string(), gitignore));
        }
        rules.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(Self {
            realm: realm.clone(),
            rules,
            always_ignore: always_ignore.to_vec(),
        })
    }

    /// A matcher with only the built-in rules.
    pub fn empty(realm: &RealmUrl, always_ignore: &[String]) -> Self {
        Self {
            realm: realm.clone(),
            rules: Vec::new(),
            always_ignore: always_ignore.to_vec(),
        }
    }

    pub fn realm(&self) -> &RealmUrl {
        &self.realm
    }

    /// True if the URL must not be indexed or served. URLs outside the
    /// realm are not ours to ignore.
    pub fn is_ignored(&self, url: &str) -> bool {
        let Some(local) = self.realm.local_path(url) else {
            return false;
        };
        self.is_ignored_path(local, url.ends_with('/'))
    }

    /// Same as [`IgnoreMatcher::is_ignored`] for a realm-relative path.
    pub fn is_ignored_path(&self, local: &str, is_dir: bool) -> bool {
        let segments: Vec<&str> = local.split('/').filter(|s| !s.is_empty()).collect();
        let dir_segments = if is_dir {
            &segments[..]
        } else {
            &segments[..segments.len().saturating_sub(1)]
        };
        if dir_segments.iter().any(|s| {
            INTERNAL_DIRS.contains(s) || self.always_ignore.iter().any(|name| name == s)
        }) {
            return true;
        }

        // A file can't be re-included once a parent directory is excluded.
        for depth in 1..=dir_segments.len() {
            if self.verdict(&dir_segments[..depth].join("/"), true) {
                return true;
            }
        }
        !is_dir && self.verdict(local, false)
    }

    /// The deepest rule file with an opinion on `local` decides.
    fn verdict(&self, local: &str, is_dir: bool) -> bool {
        let path = virtual_path(local);
        for (_, dir, gitignore) in &self.rules {
            if !local.starts_with(dir.as_str()) {
                continue;
            }
            let matched = gitignore.matched(&path, is_dir);
            if matched.is_ignore() {
                return true;
            }
            if matched.is_whitelist() {
                return false;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(files: &[(&str, &str)]) -> IgnoreMatcher {
        let realm = RealmUrl::new("http://test-realm/test/").unwrap();
        let mut data = IgnoreData::new();
        for (url, text) in files {
            data.insert_file(url, *text);
        }
        IgnoreMatcher::new(&realm, &data, &["node_modules".to_string()]).unwrap()
    }

    #[test]
    fn test_gitignore_patterns() {
        let m = matcher(&[(
            "http://test-realm/test/.gitignore",
            "ignore-me*.json\ndir/\nposts/please-ignore-me.json\n",
        )]);
        assert!(m.is_ignored("http://test-realm/test/ignore-me-1.json"));
        assert!(m.is_ignored("http://test-realm/test/posts/ignore-me-2.json"));
        assert!(m.is_ignored("http://test-realm/test/dir/card.json"));
        assert!(m.is_ignored("http://test-realm/test/posts/please-ignore-me.json"));
        assert!(!m.is_ignored("http://test-realm/test/posts/keep-me.json"));
        assert!(!m.is_ignored("http://test-realm/test/person.gts"));
    }

    #[test]
    fn test_nested_files_and_negation() {
        let m = matcher(&[
            ("http://test-realm/test/.gitignore", "*.json\n"),
            ("http://test-realm/test/keep/.gitignore", "!important.json\n"),
        ]);
        assert!(m.is_ignored("http://test-realm/test/a.json"));
        assert!(m.is_ignored("http://test-realm/test/keep/other.json"));
        assert!(!m.is_ignored("http://test-realm/test/keep/important.json"));
    }

    #[test]
    fn test_excluded_directory_cannot_be_reincluded() {
        let m = matcher(&[
            ("http://test-realm/test/.gitignore", "dir/\n"),
            ("http://test-realm/test/dir/.gitignore", "!keep.json\n"),
        ]);
        assert!(m.is_ignored("http://test-realm/test/dir/keep.json"));
        assert!(m.is_ignored("http://test-realm/test/dir/nested/keep.json"));
        assert!(!m.is_ignored("http://test-realm/test/keep.json"));
    }

    #[test]
    fn test_always_ignored_directories() {
        let m = matcher(&[]);
        assert!(m.is_ignored("http://test-realm/test/node_modules/pkg/index.js"));
        assert!(m.is_ignored("http://test-realm/test/a/node_modules/x.json"));
        assert!(m.is_ignored("http://test-realm/test/.cardex/config.json"));
        assert!(!m.is_ignored("http://test-realm/test/node_modules.json"));
        assert!(!m.is_ignored("http://elsewhere/node_modules/x.json"));
    }

    #[test]
    fn test_ignore_data_keys_by_directory() {
        let mut data = IgnoreData::new();
        data.insert_file("http://r/sub/.gitignore", "x");
        assert_eq!(data.iter().next().unwrap().0, "http://r/sub/");
        assert!(is_ignore_file("http://r/sub/.gitignore"));
        assert!(!is_ignore_file("http://r/sub/gitignore.json"));
    }
}
