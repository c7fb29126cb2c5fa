//! Two-pass catalog merge.
//!
//! Pass 1 applies compiled and source overlays one at a time against the
//! base catalog. Pass 2 runs the accumulated word substitutions once.

use crate::{
    catalog::{Catalog, CatalogEntry, CatalogError, RESERVED_KEY},
    mods::{OverlayFile, OverlayKind},
    words::{Substitutions, WordOverlay},
};
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("{path}: {source}")]
    Catalog {
        path: PathBuf,
        #[source]
        source: CatalogError,
    },
    #[error("{path}: {message}")]
    Words { path: PathBuf, message: String },
    #[error("{path}: unrecognized overlay type")]
    Unrecognized { path: PathBuf },
}

pub struct MergeOutcome {
    pub catalog: Catalog,
    pub applied: usize,
    pub failures: Vec<OverlayError>,
}

/// Counts of what one entry overlay did to the base.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OverlayStats {
    pub replaced: usize,
    pub appended: usize,
}

pub fn merge(
    base: Catalog,
    overlays: &[OverlayFile],
    mut on_progress: impl FnMut(usize, usize),
) -> MergeOutcome {
    let mut catalog = base;
    let mut substitutions = Substitutions::default();
    let mut applied = 0;
    let mut failures = Vec::new();
    let total = overlays.len();

    for (index, overlay) in overlays.iter().enumerate() {
        match load_overlay(overlay, &mut substitutions) {
            Ok(Some(entries)) => {
                let stats = apply_entries(&mut catalog, entries);
                debug!(
                    overlay = %overlay.path.display(),
                    replaced = stats.replaced,
                    appended = stats.appended,
                    "applied overlay"
                );
                applied += 1;
            }
            Ok(None) => applied += 1,
            Err(err) => {
                warn!(error = %err, "overlay skipped");
                failures.push(err);
            }
        }
        on_progress(index + 1, total);
    }

    substitutions.apply(&mut catalog);

    MergeOutcome {
        catalog,
        applied,
        failures,
    }
}

/// Returns the overlay's entries, or `None` for word overlays, which are
/// folded into `substitutions` instead.
fn load_overlay(
    overlay: &OverlayFile,
    substitutions: &mut Substitutions,
) -> Result<Option<Catalog>, OverlayError> {
    match overlay.kind {
        OverlayKind::Compiled | OverlayKind::Source => Catalog::load(&overlay.path)
            .map(Some)
            .map_err(|source| OverlayError::Catalog {
                path: overlay.path.clone(),
                source,
            }),
        OverlayKind::Words => {
            let bytes = fs::read(&overlay.path).map_err(|err| OverlayError::Words {
                path: overlay.path.clone(),
                message: err.to_string(),
            })?;
            let words = WordOverlay::parse(&bytes).map_err(|message| OverlayError::Words {
                path: overlay.path.clone(),
                message,
            })?;
            substitutions.register(words);
            Ok(None)
        }
        OverlayKind::Unrecognized => Err(OverlayError::Unrecognized {
            path: overlay.path.clone(),
        }),
    }
}

/// Applies one overlay's entries to `catalog`. The lookup tables belong to
/// this overlay alone and are consumed as base entries match them.
pub fn apply_entries(catalog: &mut Catalog, overlay: Catalog) -> OverlayStats {
    let mut entries: Vec<Option<CatalogEntry>> = overlay
        .into_entries()
        .into_iter()
        .filter(|entry| !entry.is_header())
        .map(Some)
        .collect();

    let mut singular: HashMap<String, usize> = HashMap::new();
    let mut plural: HashMap<String, usize> = HashMap::new();
    for (index, entry) in entries.iter().enumerate() {
        let Some(entry) = entry else { continue };
        match &entry.plural_key {
            Some(plural_key) => plural.insert(plural_key.clone(), index),
            None => singular.insert(entry.key.clone(), index),
        };
    }

    let mut stats = OverlayStats::default();
    for base in catalog.entries_mut() {
        if singular.is_empty() && plural.is_empty() {
            break;
        }
        if base.is_header() {
            continue;
        }

        let plural_hit = base
            .plural_key
            .as_ref()
            .and_then(|plural_key| plural.remove(plural_key));
        if let Some(index) = plural_hit {
            if let Some(replacement) = entries[index].take() {
                base.plural_values = replacement.plural_values;
                stats.replaced += 1;
            }
            continue;
        }

        if let Some(index) = singular.remove(&base.key) {
            let replacement = entries[index].take();
            if base.key == RESERVED_KEY {
                continue;
            }
            if let Some(replacement) = replacement {
                base.value = replacement.value;
                stats.replaced += 1;
            }
        }
    }

    let pending: HashSet<usize> = singular.into_values().chain(plural.into_values()).collect();
    if pending.is_empty() {
        return stats;
    }
    let existing: HashSet<String> = catalog.keys().into_iter().map(str::to_string).collect();
    for (index, slot) in entries.into_iter().enumerate() {
        if !pending.contains(&index) {
            continue;
        }
        let Some(entry) = slot else { continue };
        if existing.contains(&entry.key) {
            continue;
        }
        catalog.push(entry);
        stats.appended += 1;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mo;
    use std::path::Path;

    fn value<'a>(catalog: &'a Catalog, key: &str) -> Option<&'a str> {
        catalog.get(key).map(|entry| entry.value.as_str())
    }

    fn write_mo(path: &Path, entries: Vec<CatalogEntry>) -> OverlayFile {
        mo::write(&Catalog::from_entries(entries), path).expect("write mo");
        OverlayFile::new(path.to_path_buf())
    }

    #[test]
    fn reserved_key_is_never_overwritten() {
        let mut base = Catalog::from_entries(vec![
            CatalogEntry::singular("A", "old"),
            CatalogEntry::singular(RESERVED_KEY, "keep"),
        ]);
        let overlay = Catalog::from_entries(vec![
            CatalogEntry::singular("A", "new"),
            CatalogEntry::singular(RESERVED_KEY, "hacked"),
        ]);
        apply_entries(&mut base, overlay);
        assert_eq!(
            base,
            Catalog::from_entries(vec![
                CatalogEntry::singular("A", "new"),
                CatalogEntry::singular(RESERVED_KEY, "keep"),
            ])
        );
    }

    #[test]
    fn new_keys_are_appended_once() {
        let mut base = Catalog::from_entries(vec![CatalogEntry::singular("A", "a")]);
        let overlay = Catalog::from_entries(vec![
            CatalogEntry::singular("", "header"),
            CatalogEntry::singular("NEW", "fresh"),
            CatalogEntry::plural("NEW_P", "NEW_PS", ["one", "many"]),
        ]);
        let stats = apply_entries(&mut base, overlay.clone());
        assert_eq!(stats, OverlayStats { replaced: 0, appended: 2 });
        let once = base.clone();

        apply_entries(&mut base, overlay);
        assert_eq!(base, once);
        assert_eq!(base.len(), 3);
        assert_eq!(value(&base, "NEW"), Some("fresh"));
        assert!(base.header().is_none());
    }

    #[test]
    fn plural_entries_match_on_plural_key() {
        let mut base = Catalog::from_entries(vec![
            CatalogEntry::plural("SHIP", "SHIPS", ["ship", "ships"]),
            CatalogEntry::singular("SHIPS_LABEL", "label"),
        ]);
        let overlay = Catalog::from_entries(vec![CatalogEntry::plural(
            "SHIP",
            "SHIPS",
            ["корабль", "корабли"],
        )]);
        let stats = apply_entries(&mut base, overlay);
        assert_eq!(stats.replaced, 1);
        let ship = base.get("SHIP").expect("ship");
        assert_eq!(ship.plural_values.get(&0).map(String::as_str), Some("корабль"));
        assert_eq!(value(&base, "SHIPS_LABEL"), Some("label"));
    }

    #[test]
    fn merge_runs_words_after_every_entry_overlay() {
        let temp = tempfile::tempdir().expect("tempdir");
        let words = temp.path().join("words.json");
        fs::write(&words, r#"{"words": {"World": "Earth"}, "replace": {"C": "exact"}}"#)
            .expect("write words");
        let overlays = vec![
            OverlayFile::new(words),
            write_mo(
                &temp.path().join("a.mo"),
                vec![
                    CatalogEntry::singular("B", "Hello World"),
                    CatalogEntry::singular("C", "from overlay"),
                ],
            ),
        ];
        let base = Catalog::from_entries(vec![
            CatalogEntry::singular("B", "Hi"),
            CatalogEntry::singular("C", "c"),
        ]);

        let mut ticks = Vec::new();
        let outcome = merge(base, &overlays, |done, total| ticks.push((done, total)));
        assert_eq!(outcome.applied, 2);
        assert!(outcome.failures.is_empty());
        assert_eq!(ticks, vec![(1, 2), (2, 2)]);
        assert_eq!(value(&outcome.catalog, "B"), Some("Hello Earth"));
        assert_eq!(value(&outcome.catalog, "C"), Some("exact"));
    }

    #[test]
    fn broken_overlays_are_skipped_without_aborting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let broken = temp.path().join("broken.mo");
        fs::write(&broken, b"not a catalog at all, just some text").expect("write");
        let bad_words = temp.path().join("bad.json");
        fs::write(&bad_words, b"[]").expect("write");
        let source = temp.path().join("fix.po");
        fs::write(&source, "msgid \"A\"\nmsgstr \"patched\"\n").expect("write");

        let overlays = vec![
            OverlayFile::new(broken),
            OverlayFile::new(bad_words),
            OverlayFile::new(source),
        ];
        let base = Catalog::from_entries(vec![CatalogEntry::singular("A", "a")]);
        let outcome = merge(base, &overlays, |_, _| {});
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(value(&outcome.catalog, "A"), Some("patched"));
    }

    #[test]
    fn later_overlays_replace_earlier_edits() {
        let temp = tempfile::tempdir().expect("tempdir");
        let overlays = vec![
            write_mo(&temp.path().join("1.mo"), vec![CatalogEntry::singular("A", "first")]),
            write_mo(&temp.path().join("2.mo"), vec![CatalogEntry::singular("A", "second")]),
        ];
        let base = Catalog::from_entries(vec![CatalogEntry::singular("A", "a")]);
        let outcome = merge(base, &overlays, |_, _| {});
        assert_eq!(value(&outcome.catalog, "A"), Some("second"));
    }
}
