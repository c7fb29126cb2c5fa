use crate::catalog::Catalog;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    Single(String),
    List(Vec<String>),
}

/// Substitution tables accumulated across every word overlay of one merge.
#[derive(Debug, Default)]
pub struct Substitutions {
    exact: HashMap<String, Replacement>,
    substrings: Vec<(String, String)>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct WordOverlay {
    pub replace: Vec<(String, Replacement)>,
    pub words: Vec<(String, String)>,
}

impl WordOverlay {
    /// Validates the JSON shape; only a non-object document is an error.
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let value: Value = serde_json::from_slice(bytes).map_err(|err| err.to_string())?;
        let Value::Object(root) = value else {
            return Err("word overlay must be a JSON object".to_string());
        };

        let mut overlay = WordOverlay::default();
        if let Some(Value::Object(replace)) = root.get("replace") {
            for (key, value) in replace {
                match value {
                    Value::String(text) => overlay
                        .replace
                        .push((key.clone(), Replacement::Single(text.clone()))),
                    Value::Array(items) => {
                        let list: Option<Vec<String>> = items
                            .iter()
                            .map(|item| item.as_str().map(str::to_string))
                            .collect();
                        match list {
                            Some(list) => overlay.replace.push((key.clone(), Replacement::List(list))),
                            None => debug!(key = %key, "ignoring replace list with non-string items"),
                        }
                    }
                    _ => debug!(key = %key, "ignoring replace value of unsupported type"),
                }
            }
        }
        if let Some(Value::Object(words)) = root.get("words") {
            for (needle, value) in words {
                match value.as_str() {
                    Some(text) if !needle.is_empty() => {
                        overlay.words.push((needle.clone(), text.to_string()))
                    }
                    _ => debug!(word = %needle, "ignoring word rule"),
                }
            }
        }
        Ok(overlay)
    }
}

impl Substitutions {
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.substrings.is_empty()
    }

    pub fn register(&mut self, overlay: WordOverlay) {
        for (key, replacement) in overlay.replace {
            self.exact.insert(key, replacement);
        }
        for (needle, replacement) in overlay.words {
            match self.substrings.iter_mut().find(|(existing, _)| *existing == needle) {
                Some(slot) => slot.1 = replacement,
                None => self.substrings.push((needle, replacement)),
            }
        }
    }

    /// Substring rules first, then the key-based exact rule.
    pub fn apply(&self, catalog: &mut Catalog) {
        if self.is_empty() {
            return;
        }
        for entry in catalog.entries_mut() {
            if entry.is_header() {
                continue;
            }
            if entry.is_plural() {
                for form in entry.plural_values.values_mut() {
                    self.replace_substrings(form);
                }
                match self.exact.get(&entry.key) {
                    Some(Replacement::Single(text)) => {
                        for form in entry.plural_values.values_mut() {
                            *form = text.clone();
                        }
                    }
                    Some(Replacement::List(list)) => {
                        for (index, text) in list.iter().enumerate() {
                            if let Some(form) = entry.plural_values.get_mut(&index) {
                                *form = text.clone();
                            }
                        }
                    }
                    None => {}
                }
            } else {
                self.replace_substrings(&mut entry.value);
                match self.exact.get(&entry.key) {
                    Some(Replacement::Single(text)) => entry.value = text.clone(),
                    Some(Replacement::List(list)) => {
                        if let Some(first) = list.first() {
                            entry.value = first.clone();
                        }
                    }
                    None => {}
                }
            }
        }
    }

    fn replace_substrings(&self, text: &mut String) {
        for (needle, replacement) in &self.substrings {
            if text.contains(needle.as_str()) {
                *text = text.replace(needle.as_str(), replacement);
            }
        }
    }
}

#[cfg(test)]
impl Substitutions {
    fn insert_exact(&mut self, key: impl Into<String>, replacement: Replacement) {
        self.exact.insert(key.into(), replacement);
    }

    fn insert_substring(&mut self, needle: impl Into<String>, replacement: impl Into<String>) {
        self.register(WordOverlay {
            replace: Vec::new(),
            words: vec![(needle.into(), replacement.into())],
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;

    #[test]
    fn malformed_values_are_skipped_individually() {
        let overlay = WordOverlay::parse(
            br#"{
                "replace": {"A": "x", "B": ["y", "z"], "C": 5, "D": ["ok", 1]},
                "words": {"World": "Earth", "n": null, "": "empty"},
                "unknown": true
            }"#,
        )
        .expect("parse");
        assert_eq!(
            overlay.replace,
            vec![
                ("A".to_string(), Replacement::Single("x".to_string())),
                (
                    "B".to_string(),
                    Replacement::List(vec!["y".to_string(), "z".to_string()])
                ),
            ]
        );
        assert_eq!(overlay.words, vec![("World".to_string(), "Earth".to_string())]);
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(WordOverlay::parse(b"[1, 2]").is_err());
        assert!(WordOverlay::parse(b"{ not json").is_err());
    }

    #[test]
    fn substring_rules_replace_every_occurrence() {
        let mut catalog = Catalog::from_entries(vec![
            CatalogEntry::singular("B", "Hello World, World"),
            CatalogEntry::singular("", "World header"),
        ]);
        let mut subs = Substitutions::default();
        subs.insert_substring("World", "Earth");
        subs.apply(&mut catalog);
        assert_eq!(catalog.get("B").map(|e| e.value.as_str()), Some("Hello Earth, Earth"));
        assert_eq!(catalog.header().map(|e| e.value.as_str()), Some("World header"));
    }

    #[test]
    fn exact_rules_override_substrings_and_fill_plural_forms() {
        let mut catalog = Catalog::from_entries(vec![
            CatalogEntry::plural("SHIP", "SHIPS", ["ship", "ships"]),
            CatalogEntry::plural("GUN", "GUNS", ["gun", "guns"]),
            CatalogEntry::singular("TITLE", "Old title"),
        ]);
        let mut subs = Substitutions::default();
        subs.insert_substring("ship", "boat");
        subs.insert_exact("GUN", Replacement::Single("cannon".to_string()));
        subs.insert_exact(
            "TITLE",
            Replacement::List(vec!["New title".to_string(), "unused".to_string()]),
        );
        subs.apply(&mut catalog);

        let ship = catalog.get("SHIP").expect("ship");
        assert_eq!(ship.plural_values.values().cloned().collect::<Vec<_>>(), ["boat", "boats"]);
        let gun = catalog.get("GUN").expect("gun");
        assert!(gun.plural_values.values().all(|v| v == "cannon"));
        assert_eq!(catalog.get("TITLE").map(|e| e.value.as_str()), Some("New title"));
    }

    #[test]
    fn list_rules_only_fill_existing_plural_forms() {
        let mut catalog = Catalog::from_entries(vec![
            CatalogEntry::plural("SHORT", "SHORTS", ["a", "b", "c"]),
            CatalogEntry::plural("LONG", "LONGS", ["a", "b"]),
        ]);
        let mut subs = Substitutions::default();
        subs.insert_exact("SHORT", Replacement::List(vec!["x".to_string()]));
        subs.insert_exact(
            "LONG",
            Replacement::List(vec!["x".to_string(), "y".to_string(), "z".to_string()]),
        );
        subs.apply(&mut catalog);

        let short = catalog.get("SHORT").expect("short");
        assert_eq!(short.plural_values.values().cloned().collect::<Vec<_>>(), ["x", "b", "c"]);
        let long = catalog.get("LONG").expect("long");
        assert_eq!(long.plural_values.values().cloned().collect::<Vec<_>>(), ["x", "y"]);
    }

    #[test]
    fn later_registrations_win() {
        let mut subs = Substitutions::default();
        subs.register(WordOverlay::parse(br#"{"replace": {"K": "first"}, "words": {"a": "1"}}"#).unwrap());
        subs.register(WordOverlay::parse(br#"{"replace": {"K": "second"}, "words": {"a": "2"}}"#).unwrap());
        let mut catalog = Catalog::from_entries(vec![
            CatalogEntry::singular("K", "k"),
            CatalogEntry::singular("L", "a"),
        ]);
        subs.apply(&mut catalog);
        assert_eq!(catalog.get("K").map(|e| e.value.as_str()), Some("second"));
        assert_eq!(catalog.get("L").map(|e| e.value.as_str()), Some("2"));
    }
}
