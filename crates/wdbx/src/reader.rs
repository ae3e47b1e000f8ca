//! Decode pipeline.
//!
//! Decoding runs in two stages:
//!
//! 1. [`Sections::read`] walks the signature's section list and collects
//!    every body section as raw data. It needs no schema, which is what
//!    `read_header`-style inspection and string scanning build on.
//! 2. [`assemble`] maps records onto the schema, reconciles ids (index
//!    table, offset map, copy table) and merges relationship and common data.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::ops::Range;

use bitstream::{sign_extend, BitStream};
use byteorder::{LittleEndian, ReadBytesExt};
use schema::{Field, FieldType, Row, Schema, Value};
use stringblock::StringBlock;
use tracing::{debug, trace, warn};

use crate::column::{check_compression, ColumnDescriptor, ColumnMeta, CompressionKind};
use crate::common_data::{type_size, CommonData};
use crate::descriptor::{read_descriptors, FieldDescriptor};
use crate::error::{corrupt, mismatch, truncated, FormatError, Result};
use crate::format::{
    HeaderFlags, Signature, CACHE_OFFSET_ENTRY_BYTES, COLUMN_META_BYTES, OFFSET_ENTRY_BYTES,
};
use crate::header::TableHeader;
use crate::layout::{FieldMap, RowLayout};
use crate::options::DecodeOptions;
use crate::reconcile::{
    read_cache_offset_map, read_copy_table, read_ids, read_offset_map, resolve_offset_map,
    CopyEntries, ResolvedOffsets, RowSet,
};
use crate::relationship::Relationship;
use crate::table::{set_key, Table, TableLayout};
use crate::variant::{Family, Section, VariantSpec};

/// Every body section of one file, undecoded.
#[derive(Debug)]
pub(crate) struct Sections {
    pub header: TableHeader,
    pub spec: &'static VariantSpec,
    /// Effective flags: the header's, or the counterpart's for cache files.
    pub flags: HeaderFlags,
    pub sparse: bool,
    pub descriptors: Vec<FieldDescriptor>,
    pub columns: Vec<ColumnDescriptor>,
    /// Fixed-size record data, as a byte range of the input.
    pub records: Range<usize>,
    pub records_pos: u64,
    pub strings: StringBlock,
    pub offsets: ResolvedOffsets,
    pub index: Vec<i32>,
    pub copies: CopyEntries,
    pub relationship: Option<Relationship>,
    pub secondary_ids: BTreeMap<i32, i32>,
    pub common: Option<CommonData>,
    pub cache_table: Vec<u32>,
    pub wdb2_index_map: bool,
    pub unknown3: u32,
    pub counterpart_id_index: Option<u16>,
}

impl Sections {
    pub fn read(input: &[u8], opts: &DecodeOptions) -> Result<Self> {
        let mut cur = Cursor::new(input);
        let header = TableHeader::read_from(&mut cur)?;
        let sig = header.signature;
        let spec = VariantSpec::of(sig);
        let len = input.len() as u64;

        let counterpart = if sig.is_cache() {
            Some(
                opts.counterpart
                    .as_ref()
                    .ok_or(FormatError::MissingCounterpart(sig))?,
            )
        } else {
            None
        };
        let flags = counterpart.map_or(header.flags, |c| c.flags);
        let sparse =
            (sig.has_flags() || sig.is_cache()) && flags.contains(HeaderFlags::OFFSET_MAP);

        let mut s = Sections {
            spec,
            flags,
            sparse,
            descriptors: counterpart.map_or_else(Vec::new, |c| {
                c.field_bits
                    .iter()
                    .map(|bits| FieldDescriptor {
                        bits: *bits,
                        offset: 0,
                    })
                    .collect()
            }),
            columns: Vec::new(),
            records: 0..0,
            records_pos: 0,
            strings: StringBlock::empty(0),
            offsets: ResolvedOffsets::default(),
            index: Vec::new(),
            copies: Vec::new(),
            relationship: None,
            secondary_ids: BTreeMap::new(),
            common: None,
            cache_table: Vec::new(),
            wdb2_index_map: false,
            unknown3: 0,
            counterpart_id_index: counterpart.map(|c| c.id_index),
            header,
        };
        let h = s.header.clone();
        let span = h.id_span();
        let index_count = u64::from(h.record_count);
        let has_index = flags.contains(HeaderFlags::INDEX_MAP) && !(sig.is_cache() && sparse);
        let common_size = u64::from(h.common_data_table_size);
        let copy_size = u64::from(h.copy_table_size);

        for section in spec.sections {
            let start = cur.position();
            match *section {
                Section::Wdb2IndexMap => {
                    if h.has_wdb2_index_map() {
                        take(&mut cur, span * 6, "WDB2 index map")?;
                        s.wdb2_index_map = true;
                    }
                }
                Section::CacheOffsetMap => {
                    if sparse {
                        if h.string_block_size > 0 {
                            seek(&mut cur, u64::from(h.string_block_size), "cache offset map")?;
                        }
                        ensure(&cur, u64::from(h.record_count) * CACHE_OFFSET_ENTRY_BYTES, "cache offset map")?;
                        s.offsets.records = read_cache_offset_map(&mut cur, h.record_count)?;
                    }
                }
                Section::Descriptors => {
                    let count = if spec.extended_descriptors {
                        h.total_field_count
                    } else {
                        h.field_count
                    };
                    ensure(&cur, u64::from(count) * 4, "field descriptors")?;
                    s.descriptors = read_descriptors(&mut cur, count as usize)?;
                    if spec.extended_descriptors {
                        s.unknown3 = cur.read_u32::<LittleEndian>()?;
                    }
                }
                Section::ColumnMeta => {
                    let count = u64::from(h.column_meta_size) / COLUMN_META_BYTES;
                    ensure(&cur, count * COLUMN_META_BYTES, "column metadata")?;
                    for i in 0..count as usize {
                        let meta = ColumnMeta::read_from(&mut cur)?;
                        s.columns
                            .push(ColumnDescriptor::new(meta, s.descriptors.get(i)));
                    }
                }
                Section::PalletData => {
                    check_additional_data(&s.columns, |k| k.is_palette(), h.pallet_data_size, "pallet")?;
                    let mut block = take(&mut cur, u64::from(h.pallet_data_size), "pallet data")?;
                    for column in s.columns.iter_mut().filter(|c| c.kind().is_palette()) {
                        column.read_palette(&mut block)?;
                    }
                }
                Section::SparseData => {
                    check_additional_data(
                        &s.columns,
                        |k| k == CompressionKind::Sparse,
                        h.sparse_data_size,
                        "sparse",
                    )?;
                    let mut block = take(&mut cur, u64::from(h.sparse_data_size), "sparse data")?;
                    for column in s
                        .columns
                        .iter_mut()
                        .filter(|c| c.kind() == CompressionKind::Sparse)
                    {
                        column.read_sparse(&mut block)?;
                    }
                }
                Section::Records => {
                    if spec.relative_strings && h.record_data_offset > 0 {
                        seek(&mut cur, u64::from(h.record_data_offset), "record data")?;
                    }
                    s.records_pos = cur.position();
                    if sparse {
                        let end = match sig {
                            Signature::Wdb5 | Signature::Wdb6 => u64::from(h.string_block_size),
                            other if other.is_bit_packed() => u64::from(h.offset_map_offset),
                            _ => s
                                .offsets
                                .records
                                .iter()
                                .map(|r| u64::from(r.entry.offset) + u64::from(r.entry.len))
                                .max()
                                .map_or(s.records_pos, |e| e.max(s.records_pos)),
                        };
                        if end > len || end < s.records_pos {
                            return Err(truncated(format!("record data ends at {end}")));
                        }
                        cur.set_position(end);
                    } else {
                        let size = u64::from(h.record_count) * u64::from(h.record_size);
                        let start = cur.position();
                        take(&mut cur, size, "record data")?;
                        s.records = start as usize..(start + size) as usize;
                    }
                }
                Section::Strings => {
                    if !sparse {
                        let base = if spec.relative_strings { cur.position() } else { 0 };
                        let bytes = take(&mut cur, u64::from(h.string_block_size), "string block")?;
                        s.strings = StringBlock::new(bytes.to_vec(), base);
                    }
                }
                Section::OffsetMap => {
                    if sparse {
                        let pos = match sig {
                            Signature::Wdb5 | Signature::Wdb6 => u64::from(h.string_block_size),
                            _ => u64::from(h.offset_map_offset),
                        };
                        seek(&mut cur, pos, "offset map")?;
                        ensure(&cur, span * OFFSET_ENTRY_BYTES, "offset map")?;
                        let entries = read_offset_map(&mut cur, span)?;
                        s.offsets = resolve_offset_map(&entries, h.min_id, h.copy_table_size == 0);
                        if !s.offsets.aliases.is_empty() {
                            warn!(
                                aliases = s.offsets.aliases.len(),
                                "offset map shares records between ids"
                            );
                        }
                    }
                }
                Section::SecondaryIds => {
                    if flags.contains(HeaderFlags::RELATIONSHIP_DATA) {
                        ensure(&cur, span * 4, "secondary ids")?;
                        let ids = read_ids(&mut cur, span as usize)?;
                        s.secondary_ids = ids
                            .into_iter()
                            .enumerate()
                            .filter(|(_, v)| *v != 0)
                            .map(|(i, v)| (h.min_id.wrapping_add(i as i32), v))
                            .collect();
                    }
                }
                Section::IndexTable => {
                    if has_index {
                        let count = index_count;
                        if sig.is_bit_packed() && h.index_size > 0 && u64::from(h.index_size) != count * 4 {
                            return Err(corrupt(format!(
                                "index table of {} bytes for {count} records",
                                h.index_size
                            )));
                        }
                        if spec.tail_anchored {
                            let pos = anchor(len, &[common_size, copy_size, count * 4])?;
                            seek(&mut cur, pos, "index table")?;
                        }
                        ensure(&cur, count * 4, "index table")?;
                        s.index = read_ids(&mut cur, count as usize)?;
                    }
                }
                Section::CopyTable => {
                    if copy_size > 0 {
                        if spec.tail_anchored {
                            let pos = anchor(len, &[common_size, copy_size])?;
                            seek(&mut cur, pos, "copy table")?;
                        }
                        ensure(&cur, copy_size, "copy table")?;
                        s.copies = read_copy_table(&mut cur, h.copy_table_size)?;
                    }
                }
                Section::Relationship => {
                    if h.relationship_data_size > 0 {
                        let mut block =
                            take(&mut cur, u64::from(h.relationship_data_size), "relationship data")?;
                        s.relationship = Some(Relationship::read_from(&mut block)?);
                        if !block.is_empty() {
                            return Err(corrupt(format!(
                                "relationship data leaves {} of {} bytes unread",
                                block.len(),
                                h.relationship_data_size
                            )));
                        }
                    }
                }
                Section::CommonData => {
                    if common_size > 0 {
                        let pos = anchor(len, &[common_size])?;
                        seek(&mut cur, pos, "common data")?;
                        let mut block = take(&mut cur, common_size, "common data")?;
                        s.common = Some(CommonData::read_from(&mut block)?);
                    }
                }
                Section::CacheTable => {
                    if h.wch7_count > 0 {
                        let index_bytes = if has_index { index_count * 4 } else { 0 };
                        let table = u64::from(h.wch7_count) * 4;
                        let pos = anchor(len, &[index_bytes, table])?;
                        seek(&mut cur, pos, "cache table")?;
                        s.cache_table = (0..h.wch7_count)
                            .map(|_| cur.read_u32::<LittleEndian>())
                            .collect::<std::io::Result<_>>()?;
                    }
                }
            }
            debug!(
                signature = %sig,
                section = ?section,
                start,
                end = cur.position(),
                "read section"
            );
        }
        if cur.position() < len {
            warn!(
                signature = %sig,
                unused = len - cur.position(),
                "trailing bytes after the last section"
            );
        }
        Ok(s)
    }
}

/// The per-column payload sizes of one kind must add up to their section.
fn check_additional_data(
    columns: &[ColumnDescriptor],
    wanted: impl Fn(CompressionKind) -> bool,
    section_size: u32,
    what: &str,
) -> Result<()> {
    let declared: u64 = columns
        .iter()
        .filter(|c| wanted(c.kind()))
        .map(|c| u64::from(c.meta.additional_data_size))
        .sum();
    if declared != u64::from(section_size) {
        return Err(corrupt(format!(
            "{what} columns declare {declared} bytes, section holds {section_size}"
        )));
    }
    Ok(())
}

fn ensure(cur: &Cursor<&[u8]>, len: u64, what: &str) -> Result<()> {
    let available = (cur.get_ref().len() as u64).saturating_sub(cur.position());
    if len > available {
        return Err(truncated(format!(
            "{what} needs {len} bytes at {}, {available} left",
            cur.position()
        )));
    }
    Ok(())
}

fn take<'a>(cur: &mut Cursor<&'a [u8]>, len: u64, what: &str) -> Result<&'a [u8]> {
    ensure(cur, len, what)?;
    let data: &'a [u8] = *cur.get_ref();
    let start = cur.position() as usize;
    let end = start + len as usize;
    cur.set_position(end as u64);
    Ok(&data[start..end])
}

fn seek(cur: &mut Cursor<&[u8]>, pos: u64, what: &str) -> Result<()> {
    if pos > cur.get_ref().len() as u64 {
        return Err(truncated(format!("{what} at {pos} lies past the end of the file")));
    }
    cur.set_position(pos);
    Ok(())
}

/// Position of a section that ends where the trailing sections begin.
fn anchor(len: u64, tail: &[u64]) -> Result<u64> {
    let total: u64 = tail.iter().sum();
    len.checked_sub(total)
        .ok_or_else(|| truncated(format!("trailing tables need {total} bytes, file has {len}")))
}

// -------------------- Assembly --------------------

/// How one record's fields are decoded.
enum RecordCodec {
    Bytes(RowLayout),
    Packed,
}

pub(crate) fn assemble(s: Sections, input: &[u8], schema: &Schema) -> Result<Table> {
    let h = &s.header;
    let sig = h.signature;
    let spec = s.spec;

    let mut schema = schema.clone();
    if spec.family == Family::Packed
        && s.relationship.is_some()
        && schema.relationship_field().is_none()
    {
        debug!("adding a synthetic relationship column");
        schema.push_field(Field::new("RelationshipData", FieldType::UInt32).relationship())?;
    }

    let external_id = s.flags.contains(HeaderFlags::INDEX_MAP);
    let common_from = if sig == Signature::Wdb6 {
        let declared = s.descriptors.len() + usize::from(external_id);
        (schema.fields().len() > declared).then_some(declared)
    } else {
        None
    };
    let map = FieldMap::new(&schema, sig, s.flags, common_from)?;
    check_id_index(&s, &schema, &map)?;

    let codec = record_codec(&s, &schema, &map)?;
    let fields = schema.fields();
    let key_column = schema.key_column();
    let blank: Vec<Value> = schema.columns().iter().map(|c| Value::zero(c.ty)).collect();
    let relationship_column = map.relationship.map(|f| (schema.field_columns(f).start, fields[f].ty));

    let mut rows = RowSet::new(key_column, h.record_count as usize);
    let mut push = |ordinal: usize, mut values: Vec<Value>, id: i32| -> Result<()> {
        set_key(&schema, &mut values, id);
        if let (Some((column, ty)), Some(rel)) = (relationship_column, &s.relationship) {
            let key = rel.foreign_key(ordinal as u32);
            values[column] = Value::from_bits(ty, u64::from(key)).unwrap_or(Value::U32(key));
        }
        trace!(ordinal, id, "decoded row");
        rows.insert(Row::new(id, values))
    };

    if s.sparse {
        let RecordCodec::Bytes(layout) = &codec else {
            return Err(corrupt("offset-mapped records must be byte aligned"));
        };
        for (ordinal, rec) in s.offsets.records.iter().enumerate() {
            let start = rec.entry.offset as usize;
            let end = start + usize::from(rec.entry.len);
            let bytes = input
                .get(start..end)
                .ok_or_else(|| truncated(format!("record {} at {start}..{end}", rec.id)))?;
            let mut values = blank.clone();
            layout.decode(bytes, &s.strings, &mut values)?;
            push(ordinal, values, rec.id)?;
        }
    } else {
        let count = h.record_count as usize;
        let size = h.record_size as usize;
        if external_id && s.index.len() < count {
            return Err(corrupt(format!(
                "index table has {} ids for {count} records",
                s.index.len()
            )));
        }
        let data = &input[s.records.clone()];
        match &codec {
            RecordCodec::Bytes(layout) => {
                for i in 0..count {
                    let mut values = blank.clone();
                    layout.decode(&data[i * size..(i + 1) * size], &s.strings, &mut values)?;
                    let id = if external_id {
                        s.index[i]
                    } else {
                        key_of(&values[key_column])?
                    };
                    push(i, values, id)?;
                }
            }
            RecordCodec::Packed => {
                let mut stream = BitStream::from_bytes(data.to_vec());
                let ctx = PackedRow {
                    columns: &s.columns,
                    map: &map,
                    schema: &schema,
                    strings: &s.strings,
                    relative_strings: spec.relative_strings,
                    records_pos: s.records_pos,
                };
                for i in 0..count {
                    let mut values = blank.clone();
                    let row_start = (i * size) as u64 * 8;
                    let external = external_id.then(|| s.index[i]);
                    let id = ctx.decode(&mut stream, row_start, external, &mut values)?;
                    push(i, values, id)?;
                }
            }
        }
    }

    rows.expand_copies(&s.copies)?;
    rows.expand_aliases(&s.offsets.aliases)?;
    if !s.copies.is_empty() {
        rows.sort_by_id();
    }

    if let Some(from) = map.common_from {
        merge_common(&mut rows, &schema, from, s.common.as_ref(), &s.strings)?;
    }

    let layout = decoded_layout(&s, &schema, &map);
    debug!(
        signature = %sig,
        rows = rows.len(),
        copies = s.copies.len(),
        aliases = s.offsets.aliases.len(),
        "decoded table"
    );
    Ok(Table::from_parts(
        s.header,
        layout,
        schema,
        rows.into_rows(),
        s.offsets.aliases,
    ))
}

fn key_of(value: &Value) -> Result<i32> {
    match value {
        Value::I32(v) => Ok(*v),
        Value::U32(v) => Ok(*v as i32),
        other => Err(mismatch(format!("id column holds {other}"))),
    }
}

fn check_id_index(s: &Sections, schema: &Schema, map: &FieldMap) -> Result<()> {
    let sig = s.header.signature;
    if map.external_id || !(sig.has_flags() || sig.is_cache()) {
        return Ok(());
    }
    let stored = s.counterpart_id_index.unwrap_or(s.header.id_index);
    let expected = map.id_index(schema);
    if stored != expected {
        return Err(mismatch(format!(
            "file keeps ids in stored field {stored}, schema puts the key at {expected}"
        )));
    }
    Ok(())
}

fn record_codec(s: &Sections, schema: &Schema, map: &FieldMap) -> Result<RecordCodec> {
    let fields = schema.fields();
    match s.spec.family {
        Family::Legacy => {
            let layout = RowLayout::legacy(schema, map);
            if s.header.field_count as usize != layout.slots.len() {
                return Err(mismatch(format!(
                    "header declares {} fields, schema stores {}",
                    s.header.field_count,
                    layout.slots.len()
                )));
            }
            check_record_size(&layout, s)?;
            Ok(RecordCodec::Bytes(layout))
        }
        Family::Aligned => {
            if s.descriptors.len() != map.stored.len() {
                return Err(mismatch(format!(
                    "file stores {} fields, schema stores {}",
                    s.descriptors.len(),
                    map.stored.len()
                )));
            }
            let widths: Vec<usize> = s.descriptors.iter().map(FieldDescriptor::byte_len).collect();
            let layout = RowLayout::aligned(schema, map, &widths, s.sparse)?;
            check_record_size(&layout, s)?;
            Ok(RecordCodec::Bytes(layout))
        }
        Family::Packed => {
            if s.columns.len() != map.stored.len() {
                return Err(mismatch(format!(
                    "file stores {} columns, schema stores {}",
                    s.columns.len(),
                    map.stored.len()
                )));
            }
            for (column, f) in s.columns.iter().zip(&map.stored) {
                let field = &fields[*f];
                check_compression(field, column.kind())?;
                if column.array_size != field.array_size {
                    return Err(mismatch(format!(
                        "field {:?} declares {} elements, file stores {}",
                        field.name, field.array_size, column.array_size
                    )));
                }
                if field.ty == FieldType::String && column.element_bits != 32 {
                    return Err(mismatch(format!(
                        "string field {:?} stored in {} bits",
                        field.name, column.element_bits
                    )));
                }
            }
            if !s.sparse {
                return Ok(RecordCodec::Packed);
            }
            let mut widths = Vec::with_capacity(s.columns.len());
            for column in &s.columns {
                if column.kind() != CompressionKind::None || column.element_bits % 8 != 0 {
                    return Err(corrupt("offset-mapped records must use uncompressed whole-byte columns"));
                }
                widths.push(column.element_bits as usize / 8);
            }
            Ok(RecordCodec::Bytes(RowLayout::aligned(schema, map, &widths, true)?))
        }
    }
}

fn check_record_size(layout: &RowLayout, s: &Sections) -> Result<()> {
    if !s.sparse && layout.fixed_len() > s.header.record_size as usize {
        return Err(mismatch(format!(
            "schema needs {} bytes per record, file stores {}",
            layout.fixed_len(),
            s.header.record_size
        )));
    }
    Ok(())
}

struct PackedRow<'a> {
    columns: &'a [ColumnDescriptor],
    map: &'a FieldMap,
    schema: &'a Schema,
    strings: &'a StringBlock,
    relative_strings: bool,
    records_pos: u64,
}

impl PackedRow<'_> {
    /// Decodes the record starting at bit `row_start`; returns its id.
    fn decode(
        &self,
        stream: &mut BitStream,
        row_start: u64,
        external: Option<i32>,
        values: &mut [Value],
    ) -> Result<i32> {
        // Sparse lookups need the id before any other column.
        let id = match external {
            Some(id) => id,
            None => {
                let key = self.schema.key_field();
                let j = self
                    .map
                    .stored
                    .iter()
                    .position(|f| *f == key)
                    .ok_or_else(|| mismatch("the id field is not stored"))?;
                let column = &self.columns[j];
                stream.seek_bits(row_start + u64::from(column.meta.record_offset));
                let raw = column.decode(stream, 0)?;
                raw.first().copied().unwrap_or(0) as u32 as i32
            }
        };

        let fields = self.schema.fields();
        for (column, f) in self.columns.iter().zip(&self.map.stored) {
            let field = &fields[*f];
            let start = row_start + u64::from(column.meta.record_offset);
            stream.seek_bits(start);
            let elements = column.decode(stream, id)?;
            for (e, (slot, raw)) in self.schema.field_columns(*f).zip(elements).enumerate() {
                values[slot] = if field.ty == FieldType::String {
                    let stored = u64::from(raw as u32);
                    let offset = if self.relative_strings {
                        let field_pos = (start + e as u64 * u64::from(column.element_bits)) / 8;
                        self.records_pos + field_pos + stored
                    } else {
                        self.strings.base() + stored
                    };
                    Value::Str(self.strings.get(offset)?)
                } else {
                    numeric(field.ty, column, raw)?
                };
            }
        }
        Ok(id)
    }
}

fn numeric(ty: FieldType, column: &ColumnDescriptor, raw: u64) -> Result<Value> {
    let raw = if column.kind() == CompressionKind::None
        && ty.is_signed()
        && column.element_bits < ty.natural_bits()
    {
        sign_extend(raw, column.element_bits) as u64
    } else {
        raw
    };
    Value::from_bits(ty, raw).ok_or_else(|| mismatch(format!("{ty} is not numeric")))
}

/// One common-data field: where its value goes and where it comes from.
struct CommonSlot<'a> {
    column: usize,
    field: &'a Field,
    default: Value,
    lookup: HashMap<i32, u32>,
    size: usize,
}

fn merge_common(
    rows: &mut RowSet,
    schema: &Schema,
    from: usize,
    common: Option<&CommonData>,
    strings: &StringBlock,
) -> Result<()> {
    let fields = schema.fields();
    if let Some(common) = common {
        common.check_types(fields, from)?;
    }
    let mut slots = Vec::new();
    for (i, field) in fields.iter().enumerate().skip(from) {
        if field.array_size != 1 {
            return Err(mismatch(format!("common data field {:?} cannot be an array", field.name)));
        }
        let (lookup, size) = match common.and_then(|c| c.columns.get(i)) {
            Some(column) => (column.lookup(), type_size(column.type_tag)?),
            None => (HashMap::new(), field.ty.natural_size()),
        };
        slots.push(CommonSlot {
            column: schema.field_columns(i).start,
            field,
            default: field.default()?,
            lookup,
            size,
        });
    }

    for row in rows.iter_mut() {
        for slot in &slots {
            let ty = slot.field.ty;
            row.values[slot.column] = match slot.lookup.get(&row.id) {
                None => slot.default.clone(),
                Some(raw) if ty == FieldType::String => {
                    Value::Str(strings.get(strings.base() + u64::from(*raw))?)
                }
                Some(raw) => {
                    let bits = slot.size as u32 * 8;
                    let raw = if ty.is_signed() && bits < ty.natural_bits() {
                        sign_extend(u64::from(*raw), bits) as u64
                    } else {
                        u64::from(*raw)
                    };
                    Value::from_bits(ty, raw).ok_or_else(|| {
                        mismatch(format!("field {:?} is not numeric", slot.field.name))
                    })?
                }
            };
        }
    }
    Ok(())
}

fn decoded_layout(s: &Sections, schema: &Schema, map: &FieldMap) -> TableLayout {
    let h = &s.header;
    let mut layout = TableLayout::new(h.signature, schema);
    layout.flags = s.flags;
    layout.table_hash = h.table_hash;
    layout.layout_hash = h.layout_hash;
    layout.build = h.build;
    layout.timestamp = h.timestamp;
    layout.locale = h.locale;
    layout.section_count = h.section_count;
    layout.unknown1 = h.unknown1;
    layout.unknown2 = h.unknown2;
    layout.unknown3 = s.unknown3;
    layout.copy_table = !s.copies.is_empty();
    layout.common_data_from = map.common_from;
    layout.secondary_ids = s.secondary_ids.clone();
    layout.wch7_table = s.cache_table.clone();
    layout.wdb2_index_map = s.wdb2_index_map;

    match s.spec.family {
        Family::Legacy => {}
        Family::Aligned => {
            for (descriptor, f) in s.descriptors.iter().zip(&map.stored) {
                layout.field_bits[*f] = descriptor.bits;
            }
        }
        Family::Packed => {
            for (column, f) in s.columns.iter().zip(&map.stored) {
                let spec = &mut layout.compression[*f];
                spec.kind = column.kind();
                if column.kind() == CompressionKind::Sparse {
                    spec.sparse_default = column.meta.bit_offset;
                }
            }
        }
    }
    layout
}
