//! Minimal `.po` source catalog reader.
//!
//! Handles `msgctxt`, `msgid`, `msgid_plural`, `msgstr`, `msgstr[N]` and
//! continuation strings. Comments, flags and obsolete (`#~`) entries are
//! skipped.

use crate::catalog::{Catalog, CatalogEntry, CatalogError};
use std::collections::BTreeMap;

#[derive(Clone, Copy)]
enum Field {
    Context,
    Id,
    Plural,
    Str,
    Form(usize),
}

#[derive(Default)]
struct Pending {
    context: Option<String>,
    id: Option<String>,
    plural: Option<String>,
    value: String,
    forms: BTreeMap<usize, String>,
    has_translation: bool,
}

impl Pending {
    fn take(&mut self) -> Option<CatalogEntry> {
        let pending = std::mem::take(self);
        let key = pending.id?;
        Some(CatalogEntry {
            key,
            context: pending.context,
            plural_key: pending.plural,
            value: pending.value,
            plural_values: pending.forms,
        })
    }

    fn push(&mut self, field: Field, text: String) {
        match field {
            Field::Context => self.context.get_or_insert_with(String::new).push_str(&text),
            Field::Id => self.id.get_or_insert_with(String::new).push_str(&text),
            Field::Plural => self.plural.get_or_insert_with(String::new).push_str(&text),
            Field::Str => self.value.push_str(&text),
            Field::Form(index) => self.forms.entry(index).or_default().push_str(&text),
        }
    }
}

pub fn parse(bytes: &[u8]) -> Result<Catalog, CatalogError> {
    let text = std::str::from_utf8(bytes).map_err(|err| CatalogError::Encoding(err.valid_up_to()))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut entries = Vec::new();
    let mut pending = Pending::default();
    let mut field: Option<Field> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('"') {
            let Some(current) = field else {
                return Err(syntax(line_no, "continuation string without a keyword"));
            };
            let text = unquote(line).ok_or_else(|| syntax(line_no, "unterminated string"))?;
            pending.push(current, text);
            continue;
        }

        let (keyword, rest) = line
            .split_once(|ch: char| ch.is_whitespace())
            .ok_or_else(|| syntax(line_no, "keyword without a string"))?;
        let next = parse_keyword(keyword).ok_or_else(|| {
            syntax(line_no, &format!("unknown keyword `{keyword}`"))
        })?;

        if matches!(next, Field::Context | Field::Id) && pending.has_translation {
            if let Some(entry) = pending.take() {
                entries.push(entry);
            }
        }
        if matches!(next, Field::Str | Field::Form(_)) {
            pending.has_translation = true;
        }

        let text = unquote(rest.trim()).ok_or_else(|| syntax(line_no, "unterminated string"))?;
        pending.push(next, text);
        field = Some(next);
    }

    if let Some(entry) = pending.take() {
        entries.push(entry);
    }
    Ok(Catalog::from_entries(entries))
}

fn parse_keyword(keyword: &str) -> Option<Field> {
    match keyword {
        "msgctxt" => Some(Field::Context),
        "msgid" => Some(Field::Id),
        "msgid_plural" => Some(Field::Plural),
        "msgstr" => Some(Field::Str),
        other => {
            let index = other.strip_prefix("msgstr[")?.strip_suffix(']')?;
            index.parse().ok().map(Field::Form)
        }
    }
}

fn unquote(raw: &str) -> Option<String> {
    let inner = raw.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{7}'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            other => out.push(other),
        }
    }
    Some(out)
}

fn syntax(line: usize, message: &str) -> CatalogError {
    CatalogError::Syntax {
        line,
        message: message.to_string(),
    }
}
