use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};
use thiserror::Error;

use crate::{mo, po};

/// Copyright/attribution string that overlays may never replace.
pub const RESERVED_KEY: &str = "IDS_RIGHTS_RESERVED";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("not a compiled catalog: bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported compiled catalog revision {0}")]
    UnsupportedRevision(u32),
    #[error("compiled catalog truncated at offset {0}")]
    Truncated(usize),
    #[error("string at offset {0} is not valid UTF-8")]
    Encoding(usize),
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogEntry {
    pub key: String,
    pub context: Option<String>,
    pub plural_key: Option<String>,
    pub value: String,
    pub plural_values: BTreeMap<usize, String>,
}

impl CatalogEntry {
    pub fn is_header(&self) -> bool {
        self.key.is_empty()
    }

    pub fn is_plural(&self) -> bool {
        self.plural_key.is_some()
    }

    pub fn is_translated(&self) -> bool {
        if self.is_plural() {
            !self.plural_values.is_empty() && self.plural_values.values().all(|v| !v.is_empty())
        } else {
            !self.value.is_empty()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Loads a `.po` file when the extension says so, otherwise a `.mo` file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let bytes = std::fs::read(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let is_source = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("po"));
        if is_source {
            po::parse(&bytes)
        } else {
            mo::parse(&bytes)
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [CatalogEntry] {
        &mut self.entries
    }

    pub fn into_entries(self) -> Vec<CatalogEntry> {
        self.entries
    }

    pub fn push(&mut self, entry: CatalogEntry) {
        self.entries.push(entry);
    }

    pub fn keys(&self) -> HashSet<&str> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_header())
            .map(|entry| entry.key.as_str())
            .collect()
    }
}

#[cfg(test)]
impl CatalogEntry {
    pub fn singular(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn plural(
        key: impl Into<String>,
        plural_key: impl Into<String>,
        forms: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            key: key.into(),
            plural_key: Some(plural_key.into()),
            plural_values: forms
                .into_iter()
                .enumerate()
                .map(|(index, form)| (index, form.into()))
                .collect(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
impl Catalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&CatalogEntry> {
        if key.is_empty() {
            return None;
        }
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn header(&self) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.is_header())
    }
}
