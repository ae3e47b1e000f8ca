//! Row reconciliation: offset maps, index tables and copy tables.
//!
//! Decoding resolves the physical record slots to ids first, decodes each
//! distinct record once, then materialises copies and offset-map aliases as
//! full rows. Encoding runs the same steps backwards: rows with identical
//! non-key values collapse into one canonical record plus copy entries.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;
use schema::{Row, Value};
use tracing::{trace, warn};

use crate::error::{corrupt, Error, Result};

/// One live or empty slot of an offset map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetEntry {
    pub offset: u32,
    pub len: u16,
}

impl OffsetEntry {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offset == 0 || self.len == 0
    }
}

/// A record located through an offset map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    pub id: i32,
    pub entry: OffsetEntry,
}

/// Result of resolving an offset map: the records to decode and the ids
/// that share a visible record's storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOffsets {
    pub records: Vec<RecordRef>,
    /// hidden id -> visible id
    pub aliases: BTreeMap<i32, i32>,
}

/// Reads a legacy offset map of `span` slots, one per id in `[min_id, max_id]`.
pub fn read_offset_map<R: Read>(r: &mut R, span: u64) -> io::Result<Vec<OffsetEntry>> {
    (0..span)
        .map(|_| {
            let offset = r.read_u32::<LittleEndian>()?;
            let len = r.read_u16::<LittleEndian>()?;
            Ok(OffsetEntry { offset, len })
        })
        .collect()
}

/// Reads a cache offset map of `count` `(id, offset, len)` entries.
/// Empty entries are dropped.
pub fn read_cache_offset_map<R: Read>(r: &mut R, count: u32) -> io::Result<Vec<RecordRef>> {
    let mut out = Vec::new();
    for _ in 0..count {
        let id = r.read_i32::<LittleEndian>()?;
        let offset = r.read_u32::<LittleEndian>()?;
        let len = r.read_u16::<LittleEndian>()?;
        let entry = OffsetEntry { offset, len };
        if !entry.is_empty() {
            out.push(RecordRef { id, entry });
        }
    }
    Ok(out)
}

/// Maps each live slot to `min_id + slot`.
///
/// Without a copy table, ids sharing an offset are aliases: the first
/// claimant keeps the record, later ones are reported in `aliases` and not
/// decoded again. With a copy table every slot is decoded on its own.
pub fn resolve_offset_map(entries: &[OffsetEntry], min_id: i32, dedupe: bool) -> ResolvedOffsets {
    let mut resolved = ResolvedOffsets::default();
    let mut first: HashMap<u32, i32> = HashMap::new();

    for (slot, entry) in entries.iter().enumerate() {
        if entry.is_empty() {
            continue;
        }
        let id = min_id.wrapping_add(slot as i32);
        if dedupe {
            if let Some(visible) = first.get(&entry.offset) {
                trace!(hidden = id, visible = *visible, offset = entry.offset, "offset map alias");
                resolved.aliases.insert(id, *visible);
                continue;
            }
            first.insert(entry.offset, id);
        }
        resolved.records.push(RecordRef { id, entry: *entry });
    }
    resolved
}

/// Writes one `(offset u32, len u16)` entry per id slot.
pub fn write_offset_map<W: Write>(w: &mut W, entries: &[OffsetEntry]) -> io::Result<()> {
    for e in entries {
        w.write_u32::<LittleEndian>(e.offset)?;
        w.write_u16::<LittleEndian>(e.len)?;
    }
    Ok(())
}

/// Writes one `(id i32, offset u32, len u16)` entry per record.
pub fn write_cache_offset_map<W: Write>(w: &mut W, records: &[RecordRef]) -> io::Result<()> {
    for r in records {
        w.write_i32::<LittleEndian>(r.id)?;
        w.write_u32::<LittleEndian>(r.entry.offset)?;
        w.write_u16::<LittleEndian>(r.entry.len)?;
    }
    Ok(())
}

// -------------------- Index and copy tables --------------------

/// Reads `count` little-endian ids.
pub fn read_ids<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<i32>> {
    (0..count).map(|_| r.read_i32::<LittleEndian>()).collect()
}

pub fn write_ids<W: Write>(w: &mut W, ids: &[i32]) -> io::Result<()> {
    for id in ids {
        w.write_i32::<LittleEndian>(*id)?;
    }
    Ok(())
}

/// `(alias, canonical)` pairs.
pub type CopyEntries = Vec<(i32, i32)>;

/// Reads `size` bytes of copy table.
pub fn read_copy_table<R: Read>(r: &mut R, size: u32) -> Result<CopyEntries> {
    if size % 8 != 0 {
        return Err(corrupt(format!("copy table of {size} bytes is not a multiple of 8")));
    }
    let mut out = Vec::new();
    for _ in 0..size / 8 {
        let alias = r.read_i32::<LittleEndian>()?;
        let canonical = r.read_i32::<LittleEndian>()?;
        out.push((alias, canonical));
    }
    Ok(out)
}

pub fn write_copy_table<W: Write>(w: &mut W, copies: &[(i32, i32)]) -> io::Result<()> {
    for (alias, canonical) in copies {
        w.write_i32::<LittleEndian>(*alias)?;
        w.write_i32::<LittleEndian>(*canonical)?;
    }
    Ok(())
}

// -------------------- Row sets --------------------

/// Rows keyed by id in insertion order; inserting an id twice is a
/// [`Error::DuplicateId`].
#[derive(Debug, Default)]
pub struct RowSet {
    rows: IndexMap<i32, Row>,
    key_column: usize,
}

impl RowSet {
    pub fn new(key_column: usize, capacity: usize) -> Self {
        Self {
            rows: IndexMap::with_capacity(capacity.min(1 << 16)),
            key_column,
        }
    }

    pub fn insert(&mut self, row: Row) -> Result<()> {
        if self.rows.contains_key(&row.id) {
            return Err(Error::DuplicateId { id: row.id });
        }
        self.rows.insert(row.id, row);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: i32) -> Option<&Row> {
        self.rows.get(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Inserts a copy of `source` under `id`.
    pub fn insert_copy(&mut self, id: i32, source: i32) -> Result<()> {
        let row = self
            .rows
            .get(&source)
            .ok_or_else(|| corrupt(format!("id {id} copies missing row {source}")))?;
        let copy = with_id(row, id, self.key_column);
        self.insert(copy)
    }

    /// Materialises every copy-table entry.
    pub fn expand_copies(&mut self, copies: &[(i32, i32)]) -> Result<()> {
        for (alias, canonical) in copies {
            self.insert_copy(*alias, *canonical)?;
        }
        Ok(())
    }

    /// Materialises offset-map aliases. A hidden id whose visible row is
    /// missing is dropped.
    pub fn expand_aliases(&mut self, aliases: &BTreeMap<i32, i32>) -> Result<()> {
        for (hidden, visible) in aliases {
            if !self.rows.contains_key(visible) {
                warn!(hidden, visible, "offset map alias points at a missing row");
                continue;
            }
            self.insert_copy(*hidden, *visible)?;
        }
        Ok(())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Row> {
        self.rows.values_mut()
    }

    pub fn sort_by_id(&mut self) {
        self.rows.sort_unstable_keys();
    }

    pub fn into_rows(self) -> IndexMap<i32, Row> {
        self.rows
    }
}

/// Clones `row` under a new id, rewriting its key column.
pub fn with_id(row: &Row, id: i32, key_column: usize) -> Row {
    let mut copy = row.clone();
    copy.id = id;
    if let Some(slot) = copy.values.get_mut(key_column) {
        *slot = key_value(slot, id);
    }
    copy
}

/// The key column value for `id`, keeping the column's type.
pub fn key_value(current: &Value, id: i32) -> Value {
    match current {
        Value::U32(_) => Value::U32(id as u32),
        _ => Value::I32(id),
    }
}

/// True when two rows hold the same values outside the key column.
pub fn same_content(a: &Row, b: &Row, key_column: usize) -> bool {
    a.values.len() == b.values.len()
        && a
            .values
            .iter()
            .zip(&b.values)
            .enumerate()
            .all(|(i, (x, y))| i == key_column || x == y)
}

/// Groups rows with identical non-key values.
///
/// Returns the canonical rows (first appearance of each distinct content,
/// in order) and `(alias, canonical)` pairs for the rest.
pub fn group_copies<'a, I>(rows: I, key_column: usize) -> (Vec<&'a Row>, CopyEntries)
where
    I: IntoIterator<Item = &'a Row>,
{
    let mut canonical: Vec<&Row> = Vec::new();
    let mut seen: HashMap<Vec<&Value>, i32> = HashMap::new();
    let mut copies = Vec::new();

    for row in rows {
        let content: Vec<&Value> = row
            .values
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != key_column)
            .map(|(_, v)| v)
            .collect();
        match seen.get(&content) {
            Some(first) => copies.push((row.id, *first)),
            None => {
                seen.insert(content, row.id);
                canonical.push(row);
            }
        }
    }
    (canonical, copies)
}
