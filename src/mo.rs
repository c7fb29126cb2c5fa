//! GNU `.mo` compiled catalog reader and writer.
//!
//! Keys are stored as `msgctxt \x04 msgid [\0 msgid_plural]` and plural
//! translations as `\0`-joined forms. The writer emits little-endian files
//! without a hash table; gettext falls back to binary search, which is why
//! originals are written in byte order.

use crate::catalog::{Catalog, CatalogEntry, CatalogError};
use std::{collections::BTreeMap, fs, io, path::Path};

pub const MAGIC: u32 = 0x9504_12de;
const HEADER_LEN: usize = 28;
const CONTEXT_SEPARATOR: char = '\u{4}';

#[derive(Clone, Copy)]
enum ByteOrder {
    Little,
    Big,
}

struct Reader<'a> {
    bytes: &'a [u8],
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    fn u32_at(&self, offset: usize) -> Result<u32, CatalogError> {
        let end = offset.checked_add(4).ok_or(CatalogError::Truncated(offset))?;
        let raw: [u8; 4] = self
            .bytes
            .get(offset..end)
            .and_then(|slice| slice.try_into().ok())
            .ok_or(CatalogError::Truncated(offset))?;
        Ok(match self.order {
            ByteOrder::Little => u32::from_le_bytes(raw),
            ByteOrder::Big => u32::from_be_bytes(raw),
        })
    }

    fn string_at(&self, descriptor: usize) -> Result<&'a str, CatalogError> {
        let len = self.u32_at(descriptor)? as usize;
        let offset = self.u32_at(descriptor + 4)? as usize;
        let end = offset.checked_add(len).ok_or(CatalogError::Truncated(offset))?;
        let raw = self
            .bytes
            .get(offset..end)
            .ok_or(CatalogError::Truncated(offset))?;
        std::str::from_utf8(raw).map_err(|_| CatalogError::Encoding(offset))
    }
}

pub fn parse(bytes: &[u8]) -> Result<Catalog, CatalogError> {
    if bytes.len() < HEADER_LEN {
        return Err(CatalogError::Truncated(bytes.len()));
    }
    let mut reader = Reader {
        bytes,
        order: ByteOrder::Little,
    };
    let magic = reader.u32_at(0)?;
    if magic != MAGIC {
        reader.order = ByteOrder::Big;
        if reader.u32_at(0)? != MAGIC {
            return Err(CatalogError::BadMagic(magic));
        }
    }

    let revision = reader.u32_at(4)?;
    if revision >> 16 > 1 {
        return Err(CatalogError::UnsupportedRevision(revision));
    }

    let count = reader.u32_at(8)? as usize;
    let originals = reader.u32_at(12)? as usize;
    let translations = reader.u32_at(16)? as usize;

    for table in [originals, translations] {
        let end = count
            .checked_mul(8)
            .and_then(|size| size.checked_add(table))
            .ok_or(CatalogError::Truncated(table))?;
        if end > bytes.len() {
            return Err(CatalogError::Truncated(table));
        }
    }

    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let original = reader.string_at(originals + index * 8)?;
        let translation = reader.string_at(translations + index * 8)?;
        entries.push(decode_entry(original, translation));
    }
    Ok(Catalog::from_entries(entries))
}

fn decode_entry(original: &str, translation: &str) -> CatalogEntry {
    let (context, id) = match original.split_once(CONTEXT_SEPARATOR) {
        Some((context, id)) => (Some(context.to_string()), id),
        None => (None, original),
    };

    match id.split_once('\0') {
        Some((key, plural_key)) => CatalogEntry {
            key: key.to_string(),
            context,
            plural_key: Some(plural_key.to_string()),
            value: String::new(),
            plural_values: translation
                .split('\0')
                .enumerate()
                .map(|(index, form)| (index, form.to_string()))
                .collect::<BTreeMap<_, _>>(),
        },
        None => CatalogEntry {
            key: id.to_string(),
            context,
            plural_key: None,
            value: translation.to_string(),
            plural_values: BTreeMap::new(),
        },
    }
}

fn encode_entry(entry: &CatalogEntry) -> (String, String) {
    let mut original = String::new();
    if let Some(context) = &entry.context {
        original.push_str(context);
        original.push(CONTEXT_SEPARATOR);
    }
    original.push_str(&entry.key);
    let translation = match &entry.plural_key {
        Some(plural_key) => {
            original.push('\0');
            original.push_str(plural_key);
            entry
                .plural_values
                .values()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("\0")
        }
        None => entry.value.clone(),
    };
    (original, translation)
}

/// Serializes the header and every translated entry.
pub fn to_bytes(catalog: &Catalog) -> Vec<u8> {
    let mut pairs: Vec<(String, String)> = catalog
        .entries()
        .iter()
        .filter(|entry| entry.is_header() || entry.is_translated())
        .map(encode_entry)
        .collect();
    pairs.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    pairs.dedup_by(|a, b| a.0 == b.0);

    let count = pairs.len() as u32;
    let originals = HEADER_LEN as u32;
    let translations = originals + count * 8;
    let strings = translations + count * 8;

    let mut original_table = Vec::with_capacity(pairs.len() * 8);
    let mut translation_table = Vec::with_capacity(pairs.len() * 8);
    let mut data = Vec::new();

    for (original, _) in &pairs {
        original_table.extend_from_slice(&(original.len() as u32).to_le_bytes());
        original_table.extend_from_slice(&(strings + data.len() as u32).to_le_bytes());
        data.extend_from_slice(original.as_bytes());
        data.push(0);
    }
    for (_, translation) in &pairs {
        translation_table.extend_from_slice(&(translation.len() as u32).to_le_bytes());
        translation_table.extend_from_slice(&(strings + data.len() as u32).to_le_bytes());
        data.extend_from_slice(translation.as_bytes());
        data.push(0);
    }

    let mut out = Vec::with_capacity(strings as usize + data.len());
    for field in [MAGIC, 0, count, originals, translations, 0, strings] {
        out.extend_from_slice(&field.to_le_bytes());
    }
    out.extend_from_slice(&original_table);
    out.extend_from_slice(&translation_table);
    out.extend_from_slice(&data);
    out
}

pub fn write(catalog: &Catalog, path: &Path) -> io::Result<()> {
    let temp = path.with_extension("mo.tmp");
    fs::write(&temp, to_bytes(catalog))?;
    if path.exists() {
        let _ = fs::remove_file(path);
    }
    fs::rename(&temp, path)
}

/// Cheap validity probe used before reusing a cached download.
pub fn is_valid_file(path: &Path) -> bool {
    fs::read(path)
        .ok()
        .map(|bytes| parse(&bytes).is_ok())
        .unwrap_or(false)
}
