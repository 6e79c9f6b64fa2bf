//! Keyword loading and normalization.

use std::collections::HashSet;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

/// A search term: the spelling the user gave plus its comparison form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    original: String,
    normalized: String,
}

impl Keyword {
    /// `None` when the input is blank after trimming.
    pub fn new(raw: &str) -> Option<Self> {
        let original = raw.trim();
        if original.is_empty() {
            return None;
        }
        Some(Self {
            original: original.to_owned(),
            normalized: normalize(original),
        })
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

/// Case-insensitive comparison form shared by keywords and cell text.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Non-empty, deduplicated keywords in first-seen order.
#[derive(Debug, Clone)]
pub struct KeywordSet {
    keywords: Vec<Keyword>,
}

impl KeywordSet {
    /// Union of an inline comma list and a newline-delimited file.
    pub fn load(inline: Option<&str>, file: Option<&Path>) -> Result<Self> {
        let mut raw: Vec<String> = Vec::new();
        if let Some(list) = inline {
            raw.extend(list.split(',').map(str::to_owned));
        }
        if let Some(path) = file {
            let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
            let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
            raw.extend(content.lines().map(str::to_owned));
            debug!("read keyword file {}", path.display());
        }
        Self::from_terms(raw)
    }

    pub fn from_terms<I, S>(terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let keywords: Vec<Keyword> = terms
            .into_iter()
            .filter_map(|t| Keyword::new(t.as_ref()))
            .filter(|k| seen.insert(k.normalized.clone()))
            .collect();

        if keywords.is_empty() {
            return Err(Error::Config(
                "no keywords given: pass --keywords and/or --keywords-file with at least one non-empty entry"
                    .into(),
            ));
        }
        Ok(Self { keywords })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Keyword> {
        self.keywords.iter()
    }

    /// Never zero: an empty set is rejected when built.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.keywords.len()
    }
}

impl<'a> IntoIterator for &'a KeywordSet {
    type Item = &'a Keyword;
    type IntoIter = std::slice::Iter<'a, Keyword>;

    fn into_iter(self) -> Self::IntoIter {
        self.keywords.iter()
    }
}
