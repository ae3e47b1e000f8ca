//! Encode pipeline.
//!
//! Encoding derives everything the header states (counts, sizes, offsets,
//! id range) from the rows and the table's [`TableLayout`]; the decoded
//! header is never consulted. Sections are built in the signature's order,
//! positioned, and written back to back after the header.

use std::ops::Range;

use bitstream::BitStream;
use byteorder::{LittleEndian, WriteBytesExt};
use schema::{FieldType, Row, Schema, Value};
use stringblock::StringBlockWriter;
use tracing::{debug, trace};

use crate::column::{ColumnMeta, ColumnPlan, CompressionKind};
use crate::common_data::{type_tag, CommonColumn, CommonData, TYPE_32};
use crate::descriptor::FieldDescriptor;
use crate::error::{mismatch, Result};
use crate::format::{HeaderFlags, Signature, CACHE_OFFSET_ENTRY_BYTES, OFFSET_ENTRY_BYTES, WDB2_INDEX_MAP_BUILD};
use crate::header::{id_span, TableHeader};
use crate::layout::{FieldMap, RowLayout};
use crate::options::EncodeOptions;
use crate::reconcile::{
    group_copies, same_content, write_cache_offset_map, write_copy_table, write_ids,
    write_offset_map, OffsetEntry, RecordRef,
};
use crate::relationship::Relationship;
use crate::table::{Table, TableLayout};
use crate::variant::{Family, Section, VariantSpec};

/// Record data of one table plus what the header and the column tables
/// need to describe it.
#[derive(Debug, Default)]
struct Records {
    bytes: Vec<u8>,
    /// Fixed record size; zero for offset-mapped records.
    record_size: u32,
    /// `(id, start in bytes, len)` of every offset-mapped record.
    entries: Vec<(i32, usize, u16)>,
    descriptors: Vec<FieldDescriptor>,
    columns: Vec<ColumnPlan>,
    metas: Vec<ColumnMeta>,
    packed_data_offset: u32,
}

pub(crate) fn encode_table(table: &Table, opts: &EncodeOptions) -> Result<Vec<u8>> {
    let layout = table.layout();
    let schema = table.schema();
    let sig = layout.signature;
    let spec = VariantSpec::of(sig);
    layout.check(schema)?;
    let map = FieldMap::new(schema, sig, layout.flags, layout.common_data_from)?;

    let flags = if sig.has_flags() || sig.is_cache() {
        layout.flags
    } else {
        HeaderFlags::NONE
    };
    let sparse = flags.contains(HeaderFlags::OFFSET_MAP);
    let key_column = schema.key_column();

    let (mut min_id, mut max_id) = table
        .ids()
        .fold(None, |acc: Option<(i32, i32)>, id| {
            Some(acc.map_or((id, id), |(lo, hi)| (lo.min(id), hi.max(id))))
        })
        .unwrap_or((0, 0));
    let wdb2_index_map = sig == Signature::Wdb2
        && layout.wdb2_index_map
        && layout.build > WDB2_INDEX_MAP_BUILD
        && max_id != 0;
    if sig == Signature::Wdb2 && !wdb2_index_map {
        min_id = 0;
        max_id = 0;
    }
    let span = id_span(min_id, max_id);

    // Pick the physical records.
    let mut rows: Vec<&Row> = table.rows().collect();
    let mut shared: Vec<(i32, i32)> = Vec::new();
    if sparse && !sig.is_cache() {
        rows.sort_by_key(|r| r.id);
        let aliases = table.offset_aliases();
        rows.retain(|row| {
            let visible = aliases
                .get(&row.id)
                .filter(|v| !aliases.contains_key(*v))
                .and_then(|v| table.get(*v));
            match visible {
                Some(visible) if same_content(row, visible, key_column) => {
                    shared.push((row.id, visible.id));
                    false
                }
                _ => true,
            }
        });
    }
    let use_copies =
        sig.supports_copy_table() && !sparse && opts.copy_table.unwrap_or(layout.copy_table);
    let (written, copies) = if use_copies {
        group_copies(rows, key_column)
    } else {
        (rows, Vec::new())
    };

    let mut strings = if opts.raw_strings {
        StringBlockWriter::raw()
    } else {
        StringBlockWriter::new()
    };
    let mut records = match spec.family {
        Family::Legacy => encode_legacy(schema, &map, &written, &mut strings)?,
        Family::Aligned => encode_aligned(schema, layout, &map, &written, &mut strings, sparse)?,
        Family::Packed => encode_packed(
            schema,
            layout,
            &map,
            &written,
            &mut strings,
            sparse,
            spec.relative_strings,
        )?,
    };

    let relationship = map.relationship.map(|f| {
        let column = schema.field_columns(f).start;
        Relationship::from_records(
            written
                .iter()
                .map(|r| (r.id, r.values[column].to_bits().unwrap_or(0) as u32)),
        )
    });
    let common = match map.common_from {
        Some(from) => Some(common_data(table, from, &mut strings, sparse)?),
        None => None,
    };
    let write_index = map.external_id && !(sig.is_cache() && sparse);
    let ids: Vec<i32> = written.iter().map(|r| r.id).collect();

    // Bodies in file order; offset maps are filled in once positions are known.
    let mut parts: Vec<(Section, Vec<u8>)> = Vec::with_capacity(spec.sections.len());
    for section in spec.sections {
        let mut out = Vec::new();
        match *section {
            Section::Wdb2IndexMap => {
                if wdb2_index_map {
                    out = wdb2_index_map_bytes(schema, &written, min_id, span);
                }
            }
            Section::CacheOffsetMap => {
                if sparse {
                    out.resize(records.entries.len() * CACHE_OFFSET_ENTRY_BYTES as usize, 0);
                }
            }
            Section::Descriptors => {
                for d in &records.descriptors {
                    d.write_to(&mut out)?;
                }
                if spec.extended_descriptors {
                    out.write_u32::<LittleEndian>(layout.unknown3)?;
                }
            }
            Section::ColumnMeta => {
                for meta in &records.metas {
                    meta.write_to(&mut out)?;
                }
            }
            Section::PalletData => {
                for plan in records.columns.iter().filter(|p| p.kind.is_palette()) {
                    plan.write_palette(&mut out)?;
                }
            }
            Section::SparseData => {
                for plan in records.columns.iter().filter(|p| p.kind == CompressionKind::Sparse) {
                    plan.write_sparse(&mut out)?;
                }
            }
            Section::Records => out = std::mem::take(&mut records.bytes),
            Section::Strings => {
                if !sparse {
                    out = std::mem::take(&mut strings).into_bytes();
                }
            }
            Section::OffsetMap => {
                if sparse {
                    out.resize(span as usize * OFFSET_ENTRY_BYTES as usize, 0);
                }
            }
            Section::SecondaryIds => {
                if flags.contains(HeaderFlags::RELATIONSHIP_DATA) {
                    let secondary: Vec<i32> = (0..span)
                        .map(|i| {
                            let id = min_id.wrapping_add(i as i32);
                            layout.secondary_ids.get(&id).copied().unwrap_or(0)
                        })
                        .collect();
                    write_ids(&mut out, &secondary)?;
                }
            }
            Section::IndexTable => {
                if write_index {
                    write_ids(&mut out, &ids)?;
                }
            }
            Section::CopyTable => write_copy_table(&mut out, &copies)?,
            Section::Relationship => {
                if let Some(rel) = &relationship {
                    rel.write_to(&mut out)?;
                }
            }
            Section::CommonData => {
                if let Some(common) = &common {
                    common.write_to(&mut out)?;
                }
            }
            Section::CacheTable => {
                for v in &layout.wch7_table {
                    out.write_u32::<LittleEndian>(*v)?;
                }
            }
        }
        parts.push((*section, out));
    }

    let header_len = sig.header_len();
    let position = |section: Section| -> u64 {
        let mut pos = header_len;
        for (s, bytes) in &parts {
            if *s == section {
                break;
            }
            pos += bytes.len() as u64;
        }
        pos
    };
    let records_pos = position(Section::Records);
    let offset_map_pos = position(Section::OffsetMap);
    let strings_len = parts
        .iter()
        .find(|(s, _)| *s == Section::Strings)
        .map_or(0, |(_, bytes)| bytes.len() as u32);

    if sparse {
        let located: Vec<RecordRef> = records
            .entries
            .iter()
            .map(|(id, start, len)| RecordRef {
                id: *id,
                entry: OffsetEntry {
                    offset: (records_pos + *start as u64) as u32,
                    len: *len,
                },
            })
            .collect();
        for (section, out) in parts.iter_mut() {
            match section {
                Section::CacheOffsetMap => {
                    out.clear();
                    write_cache_offset_map(out, &located)?;
                }
                Section::OffsetMap => {
                    out.clear();
                    write_offset_map(out, &offset_slots(&located, &shared, min_id, span))?;
                }
                _ => {}
            }
        }
    }

    let mut h = TableHeader::new(sig);
    h.record_count = written.len() as u32;
    h.field_count = match spec.family {
        Family::Legacy => RowLayout::legacy(schema, &map).slots.len() as u32,
        _ => map.stored.len() as u32,
    };
    h.record_size = if sparse { 0 } else { records.record_size };
    h.string_block_size = match sig {
        Signature::Wdb5 | Signature::Wdb6 if sparse => offset_map_pos as u32,
        _ => strings_len,
    };
    h.table_hash = layout.table_hash;
    h.layout_hash = layout.layout_hash;
    h.build = layout.build;
    h.timestamp = layout.timestamp;
    h.min_id = min_id;
    h.max_id = max_id;
    h.locale = layout.locale;
    h.copy_table_size = (copies.len() * 8) as u32;
    h.flags = flags;
    h.id_index = map.id_index(schema);
    h.wch7_count = layout.wch7_table.len() as u32;
    match sig {
        Signature::Wdb6 => {
            h.total_field_count = schema.fields().len() as u32;
            h.common_data_table_size = common.as_ref().map_or(0, |c| c.byte_len() as u32);
        }
        Signature::Wdc1 | Signature::Wdc2 | Signature::Wdc3 => {
            h.total_field_count = map.stored.len() as u32;
            h.packed_data_offset = records.packed_data_offset;
            h.relationship_count = relationship.as_ref().map_or(0, |r| r.entries.len() as u32);
            h.column_meta_size = (records.metas.len() * 24) as u32;
            h.sparse_data_size = records
                .columns
                .iter()
                .filter(|p| p.kind == CompressionKind::Sparse)
                .map(ColumnPlan::additional_data_size)
                .sum();
            h.pallet_data_size = records
                .columns
                .iter()
                .filter(|p| p.kind.is_palette())
                .map(ColumnPlan::additional_data_size)
                .sum();
            h.relationship_data_size = relationship.as_ref().map_or(0, |r| r.byte_len() as u32);
            if sparse {
                h.offset_map_offset = offset_map_pos as u32;
            }
            if write_index && sig != Signature::Wdc3 {
                h.index_size = (ids.len() * 4) as u32;
            }
            if sig != Signature::Wdc1 {
                h.section_count = layout.section_count;
                h.unknown1 = layout.unknown1;
                h.unknown2 = layout.unknown2;
                h.record_data_offset = records_pos as u32;
                h.record_data_row_count = h.record_count;
                h.record_data_string_size = h.string_block_size;
            }
        }
        _ => {}
    }

    let body: usize = parts.iter().map(|(_, bytes)| bytes.len()).sum();
    let mut out = Vec::with_capacity(header_len as usize + body);
    h.write_to(&mut out)?;
    for (section, bytes) in &parts {
        trace!(section = ?section, at = out.len(), len = bytes.len(), "write section");
        out.extend_from_slice(bytes);
    }
    debug!(
        signature = %sig,
        records = written.len(),
        copies = copies.len(),
        shared = shared.len(),
        bytes = out.len(),
        "encoded table"
    );
    Ok(out)
}

fn encode_legacy(
    schema: &Schema,
    map: &FieldMap,
    written: &[&Row],
    strings: &mut StringBlockWriter,
) -> Result<Records> {
    let row_layout = RowLayout::legacy(schema, map);
    let mut records = Records {
        record_size: row_layout.fixed_len() as u32,
        ..Records::default()
    };
    for row in written {
        row_layout.encode(&row.values, strings, &mut records.bytes)?;
    }
    Ok(records)
}

fn encode_aligned(
    schema: &Schema,
    layout: &TableLayout,
    map: &FieldMap,
    written: &[&Row],
    strings: &mut StringBlockWriter,
    sparse: bool,
) -> Result<Records> {
    let fields = schema.fields();
    let widths: Vec<usize> = map
        .stored
        .iter()
        .map(|f| {
            FieldDescriptor {
                bits: layout.field_bits[*f],
                offset: 0,
            }
            .byte_len()
        })
        .collect();
    let row_layout = RowLayout::aligned(schema, map, &widths, sparse)?;

    let mut records = Records::default();
    let mut offset = 0usize;
    for (f, width) in map.stored.iter().zip(&widths) {
        let at = u16::try_from(offset).map_err(|_| mismatch("record layout exceeds 65535 bytes"))?;
        records.descriptors.push(FieldDescriptor {
            bits: layout.field_bits[*f],
            offset: at,
        });
        offset += width * fields[*f].array_size;
    }

    if sparse {
        let padding = match layout.signature {
            Signature::Wdb5 | Signature::Wdb6 => 2,
            _ => 0,
        };
        for row in written {
            let start = records.bytes.len();
            row_layout.encode(&row.values, strings, &mut records.bytes)?;
            let len = entry_len(records.bytes.len() - start)?;
            records.entries.push((row.id, start, len));
            records.bytes.resize(records.bytes.len() + padding, 0);
        }
    } else {
        records.record_size = row_layout.fixed_len() as u32;
        for row in written {
            row_layout.encode(&row.values, strings, &mut records.bytes)?;
        }
    }
    Ok(records)
}

fn encode_packed(
    schema: &Schema,
    layout: &TableLayout,
    map: &FieldMap,
    written: &[&Row],
    strings: &mut StringBlockWriter,
    sparse: bool,
    relative_strings: bool,
) -> Result<Records> {
    let fields = schema.fields();
    let mut plans: Vec<ColumnPlan> = map
        .stored
        .iter()
        .map(|f| {
            let spec = layout.compression[*f];
            ColumnPlan::new(&fields[*f], spec.kind, spec.sparse_default)
        })
        .collect();
    if sparse && plans.iter().any(|p| p.kind != CompressionKind::None) {
        return Err(mismatch("offset-mapped tables cannot compress columns"));
    }

    // Pass 1: widths, palettes and sparse overrides.
    for row in written {
        for (plan, f) in plans.iter_mut().zip(&map.stored) {
            let columns = schema.field_columns(*f);
            match plan.kind {
                CompressionKind::None => {}
                CompressionKind::Sparse => plan.observe_sparse(row.id, &row.values[columns.start]),
                _ => plan.observe(&numeric_elements(&row.values, columns)?),
            }
        }
    }

    let mut bits = 0u32;
    for plan in &mut plans {
        plan.record_offset = bits;
        bits += plan.record_bits();
    }
    let record_size = bits.div_ceil(8);
    let packed_data_offset = plans
        .iter()
        .find(|p| p.kind != CompressionKind::None)
        .map_or(record_size, |p| p.record_offset / 8);

    let mut records = Records {
        packed_data_offset,
        ..Records::default()
    };
    for plan in &plans {
        let meta = plan.meta(packed_data_offset * 8)?;
        records
            .descriptors
            .push(FieldDescriptor::for_width(plan.element_bits, meta.record_offset / 8));
        records.metas.push(meta);
    }

    if sparse {
        let widths: Vec<usize> = plans.iter().map(|p| p.element_bits as usize / 8).collect();
        let row_layout = RowLayout::aligned(schema, map, &widths, true)?;
        for row in written {
            let start = records.bytes.len();
            row_layout.encode(&row.values, strings, &mut records.bytes)?;
            let len = records.bytes.len() - start;
            records.entries.push((row.id, start, entry_len(len)?));
            records.bytes.resize(start + len.div_ceil(8) * 8, 0);
        }
        records.columns = plans;
        return Ok(records);
    }

    // Pass 2: pack every record.
    let size = record_size as usize;
    let data_len = (written.len() * size) as u64;
    let mut stream = BitStream::with_capacity(data_len as usize);
    for (i, row) in written.iter().enumerate() {
        let row_start = (i * size) as u64 * 8;
        for (plan, f) in plans.iter().zip(&map.stored) {
            let start = row_start + u64::from(plan.record_offset);
            stream.seek_bits(start);
            let columns = schema.field_columns(*f);
            let elements = if plan.ty == FieldType::String {
                let mut out = Vec::with_capacity(columns.len());
                for (e, column) in columns.enumerate() {
                    let text = row.values[column].as_str().unwrap_or_default();
                    let offset = u64::from(strings.intern(text)?);
                    out.push(if relative_strings {
                        // Relative to the field's own byte position.
                        let field_pos = (start + e as u64 * u64::from(plan.element_bits)) / 8;
                        u64::from((offset + data_len - field_pos) as u32)
                    } else {
                        offset
                    });
                }
                out
            } else {
                numeric_elements(&row.values, columns)?
            };
            plan.encode(&mut stream, &elements)?;
        }
        stream.pad_to((i + 1) * size)?;
    }
    records.record_size = record_size;
    records.bytes = stream.into_bytes();
    records.columns = plans;
    Ok(records)
}

fn numeric_elements(values: &[Value], columns: Range<usize>) -> Result<Vec<u64>> {
    columns
        .map(|c| {
            values[c]
                .to_bits()
                .ok_or_else(|| mismatch(format!("column {c} holds {}, expected a number", values[c])))
        })
        .collect()
}

fn entry_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| mismatch(format!("record of {len} bytes exceeds 65535 bytes")))
}

/// One slot per id in range; ids sharing a record point at its entry.
fn offset_slots(located: &[RecordRef], shared: &[(i32, i32)], min_id: i32, span: u64) -> Vec<OffsetEntry> {
    let mut slots = vec![OffsetEntry::default(); span as usize];
    let slot = |id: i32| (i64::from(id) - i64::from(min_id)) as usize;
    for rec in located {
        slots[slot(rec.id)] = rec.entry;
    }
    for (hidden, visible) in shared {
        slots[slot(*hidden)] = slots[slot(*visible)];
    }
    slots
}

/// WDB2 id index map: per id in range, the record index and the bytes its
/// strings take in the block, saturating at `u16::MAX`.
fn wdb2_index_map_bytes(schema: &Schema, written: &[&Row], min_id: i32, span: u64) -> Vec<u8> {
    let span = span as usize;
    let mut index = vec![0u32; span];
    let mut lengths = vec![0u16; span];
    let string_columns: Vec<usize> = schema
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.ty == FieldType::String)
        .map(|(i, _)| i)
        .collect();
    for (i, row) in written.iter().enumerate() {
        let slot = (i64::from(row.id) - i64::from(min_id)) as usize;
        index[slot] = i as u32;
        lengths[slot] = string_columns
            .iter()
            .filter_map(|c| row.values[*c].as_str())
            .filter(|s| !s.is_empty())
            .map(|s| u16::try_from(s.len() + 1).unwrap_or(u16::MAX))
            .fold(0u16, u16::saturating_add);
    }
    let mut out = Vec::with_capacity(span * 6);
    out.extend(index.iter().flat_map(|v| v.to_le_bytes()));
    out.extend(lengths.iter().flat_map(|v| v.to_le_bytes()));
    out
}

/// Builds the WDB6 common data table: one column per schema field, entries
/// only where a row differs from the field's default.
fn common_data(
    table: &Table,
    from: usize,
    strings: &mut StringBlockWriter,
    sparse: bool,
) -> Result<CommonData> {
    let schema = table.schema();
    let mut columns = Vec::with_capacity(schema.fields().len());
    for (i, field) in schema.fields().iter().enumerate() {
        if i < from {
            columns.push(CommonColumn {
                type_tag: type_tag(field.ty).unwrap_or(TYPE_32),
                entries: Vec::new(),
            });
            continue;
        }
        let tag = type_tag(field.ty).ok_or_else(|| {
            mismatch(format!("field {:?}: {} cannot live in common data", field.name, field.ty))
        })?;
        if field.array_size != 1 {
            return Err(mismatch(format!("common data field {:?} cannot be an array", field.name)));
        }
        if sparse && field.ty == FieldType::String {
            return Err(mismatch(format!(
                "common data field {:?}: offset-mapped tables have no string block",
                field.name
            )));
        }
        let default = field.default()?;
        let column = schema.field_columns(i).start;
        let mut entries = Vec::new();
        for row in table.rows() {
            let value = &row.values[column];
            if *value == default {
                continue;
            }
            let raw = match value {
                Value::Str(text) => strings.intern(text)?,
                other => other.to_bits().unwrap_or(0) as u32,
            };
            entries.push((row.id, raw));
        }
        columns.push(CommonColumn { type_tag: tag, entries });
    }
    Ok(CommonData { columns })
}
