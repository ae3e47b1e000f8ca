//! In-memory tables.
//!
//! A [`Table`] owns its schema, its rows keyed by id, and a [`TableLayout`]:
//! the storage choices (signature, flags, per-field widths and compression,
//! copy-table policy, opaque header values) that encoding needs to reproduce
//! the file. The decode-time [`TableHeader`] is kept read-only for
//! inspection; encoding never consults it.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use schema::{Field, FieldType, Row, Schema, Value};

use crate::column::{check_compression, CompressionKind};
use crate::descriptor::bits_for_width;
use crate::error::{mismatch, Result};
use crate::format::{HeaderFlags, Signature};
use crate::header::TableHeader;
use crate::layout::FieldMap;
use crate::reconcile::key_value;

/// Compression choice for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub kind: CompressionKind,
    /// Value of a sparse column for ids without an override, as a 4-byte pattern.
    pub sparse_default: i32,
}

/// The parts of a WDB5 table a client cache file borrows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheCounterpart {
    pub flags: HeaderFlags,
    pub id_index: u16,
    /// Descriptor bits of each stored field.
    pub field_bits: Vec<i16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub signature: Signature,
    pub flags: HeaderFlags,
    pub table_hash: u32,
    pub layout_hash: u32,
    pub build: i32,
    pub timestamp: u32,
    pub locale: i32,
    pub section_count: u32,
    pub unknown1: u32,
    pub unknown2: u32,
    pub unknown3: u32,
    /// Collapse rows with identical content into a copy table.
    pub copy_table: bool,
    /// Descriptor bits per schema field (byte-aligned generations).
    pub field_bits: Vec<i16>,
    /// Compression per schema field (bit-packed generations).
    pub compression: Vec<ColumnSpec>,
    /// First schema field stored in the WDB6 common data table.
    pub common_data_from: Option<usize>,
    pub secondary_ids: BTreeMap<i32, i32>,
    pub wch7_table: Vec<u32>,
    /// Emit the WDB2 id index map and string lengths.
    pub wdb2_index_map: bool,
}

impl TableLayout {
    /// Natural widths and no compression for every field.
    pub fn new(signature: Signature, schema: &Schema) -> Self {
        let mut layout = Self {
            signature,
            flags: HeaderFlags::NONE,
            table_hash: 0,
            layout_hash: 0,
            build: 0,
            timestamp: 0,
            locale: 0,
            section_count: u32::from(matches!(signature, Signature::Wdc2 | Signature::Wdc3)),
            unknown1: 0,
            unknown2: 0,
            unknown3: 0,
            copy_table: false,
            field_bits: Vec::new(),
            compression: Vec::new(),
            common_data_from: None,
            secondary_ids: BTreeMap::new(),
            wch7_table: Vec::new(),
            wdb2_index_map: false,
        };
        for field in schema.fields() {
            layout.push_field(field);
        }
        layout
    }

    pub(crate) fn push_field(&mut self, field: &Field) {
        let bits = match field.ty {
            FieldType::Loc => 0,
            ty => bits_for_width(ty.natural_bits()),
        };
        self.field_bits.push(bits);
        self.compression.push(ColumnSpec {
            kind: CompressionKind::None,
            sparse_default: default_pattern(field),
        });
    }

    /// Rejects layouts the writer cannot honour for `schema`.
    pub fn check(&self, schema: &Schema) -> Result<()> {
        let n = schema.fields().len();
        if self.field_bits.len() != n || self.compression.len() != n {
            return Err(mismatch(format!(
                "layout describes {} fields, schema has {n}",
                self.field_bits.len()
            )));
        }
        let packed = self.signature.is_bit_packed();
        for (field, spec) in schema.fields().iter().zip(&self.compression) {
            if !packed && spec.kind != CompressionKind::None {
                return Err(mismatch(format!(
                    "field {:?}: {} tables do not compress columns",
                    field.name, self.signature
                )));
            }
            if field.ty == FieldType::Loc && !matches!(self.signature, Signature::Wdbc | Signature::Wdb2) {
                return Err(mismatch(format!(
                    "field {:?}: loc fields are only stored by WDBC and WDB2",
                    field.name
                )));
            }
            if packed {
                check_compression(field, spec.kind)?;
            }
        }
        let key = schema.key_field();
        if matches!(
            self.compression[key].kind,
            CompressionKind::Sparse | CompressionKind::Pallet | CompressionKind::PalletArray
        ) {
            return Err(mismatch("the id field cannot use sparse or pallet compression"));
        }
        Ok(())
    }
}

fn default_pattern(field: &Field) -> i32 {
    field
        .default()
        .ok()
        .and_then(|v| v.to_bits())
        .map_or(0, |bits| bits as u32 as i32)
}

// -------------------- Table --------------------

#[derive(Debug, Clone)]
pub struct Table {
    header: TableHeader,
    layout: TableLayout,
    schema: Schema,
    rows: IndexMap<i32, Row>,
    offset_aliases: BTreeMap<i32, i32>,
}

impl Table {
    /// Starts a new, empty table.
    pub fn builder(schema: Schema, signature: Signature) -> TableBuilder {
        TableBuilder::new(schema, signature)
    }

    pub(crate) fn from_parts(
        header: TableHeader,
        layout: TableLayout,
        schema: Schema,
        rows: IndexMap<i32, Row>,
        offset_aliases: BTreeMap<i32, i32>,
    ) -> Self {
        Self {
            header,
            layout,
            schema,
            rows,
            offset_aliases,
        }
    }

    /// The header as decoded. Tables created by [`TableBuilder`] carry a
    /// zeroed header for their signature.
    #[must_use]
    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    #[must_use]
    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    /// Storage choices used by the next encode.
    pub fn layout_mut(&mut self) -> &mut TableLayout {
        &mut self.layout
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn signature(&self) -> Signature {
        self.layout.signature
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in table order.
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.rows.keys().copied()
    }

    #[must_use]
    pub fn get(&self, id: i32) -> Option<&Row> {
        self.rows.get(&id)
    }

    /// Typed value of `column` (by name) for row `id`.
    #[must_use]
    pub fn value(&self, id: i32, column: &str) -> Option<&Value> {
        let index = self
            .schema
            .columns()
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))?;
        self.rows.get(&id)?.values.get(index)
    }

    /// Inserts or replaces a row. The id is read from the key column.
    pub fn insert(&mut self, values: Vec<Value>) -> Result<i32> {
        let id = check_row(&self.schema, &values)?;
        self.rows.insert(id, Row::new(id, values));
        Ok(id)
    }

    /// Removes a row, keeping the order of the others.
    pub fn remove(&mut self, id: i32) -> Option<Row> {
        self.offset_aliases.retain(|hidden, visible| *hidden != id && *visible != id);
        self.rows.shift_remove(&id)
    }

    /// Ids that shared another row's storage in an offset-mapped file,
    /// as hidden id -> visible id.
    #[must_use]
    pub fn offset_aliases(&self) -> &BTreeMap<i32, i32> {
        &self.offset_aliases
    }

    /// The layout a cache file of this table needs to be decoded.
    pub fn counterpart(&self) -> Result<CacheCounterpart> {
        let map = FieldMap::new(
            &self.schema,
            self.layout.signature,
            self.layout.flags,
            self.layout.common_data_from,
        )?;
        Ok(CacheCounterpart {
            flags: self.layout.flags,
            id_index: map.id_index(&self.schema),
            field_bits: map.stored.iter().map(|f| self.layout.field_bits[*f]).collect(),
        })
    }
}

/// Validates a row against `schema` and returns its id.
pub(crate) fn check_row(schema: &Schema, values: &[Value]) -> Result<i32> {
    let columns = schema.columns();
    if values.len() != columns.len() {
        return Err(mismatch(format!(
            "row has {} values, schema has {} columns",
            values.len(),
            columns.len()
        )));
    }
    for (value, column) in values.iter().zip(columns) {
        if value.ty() != column.ty {
            return Err(mismatch(format!(
                "column {:?} expects {}, got {value}",
                column.name, column.ty
            )));
        }
    }
    match &values[schema.key_column()] {
        Value::I32(v) => Ok(*v),
        Value::U32(v) => Ok(*v as i32),
        other => Err(mismatch(format!("id column holds {other}"))),
    }
}

// -------------------- Builder --------------------

/// Creates tables from scratch.
///
/// ```ignore
/// let table = Table::builder(schema, Signature::Wdc3)
///     .flags(HeaderFlags::INDEX_MAP)
///     .compression("Level", CompressionKind::Immediate)
///     .copy_table(true)
///     .build()?;
/// ```
#[derive(Debug)]
pub struct TableBuilder {
    schema: Schema,
    layout: TableLayout,
    compression: Vec<(String, CompressionKind)>,
    sparse_defaults: Vec<(String, i32)>,
    field_widths: Vec<(String, u32)>,
    common_data_from: Option<String>,
    rows: Vec<Vec<Value>>,
}

impl TableBuilder {
    pub fn new(schema: Schema, signature: Signature) -> Self {
        let layout = TableLayout::new(signature, &schema);
        Self {
            schema,
            layout,
            compression: Vec::new(),
            sparse_defaults: Vec::new(),
            field_widths: Vec::new(),
            common_data_from: None,
            rows: Vec::new(),
        }
    }

    /// Header flags to encode with, e.g. `OFFSET_MAP` or `INDEX_MAP`.
    #[must_use]
    pub fn flags(mut self, flags: HeaderFlags) -> Self {
        self.layout.flags = flags;
        self
    }

    #[must_use]
    pub fn compression(mut self, field: impl Into<String>, kind: CompressionKind) -> Self {
        self.compression.push((field.into(), kind));
        self
    }

    /// Overrides the sparse default, which otherwise comes from the field's declared default.
    #[must_use]
    pub fn sparse_default(mut self, field: impl Into<String>, value: i32) -> Self {
        self.sparse_defaults.push((field.into(), value));
        self
    }

    /// Stores `field` in `bits` bits per element (byte-aligned generations).
    #[must_use]
    pub fn field_width(mut self, field: impl Into<String>, bits: u32) -> Self {
        self.field_widths.push((field.into(), bits));
        self
    }

    /// Collapses rows that differ only in their id into copy-table entries.
    #[must_use]
    pub fn copy_table(mut self, enabled: bool) -> Self {
        self.layout.copy_table = enabled;
        self
    }

    /// Moves `field` and every later field into the WDB6 common data table.
    #[must_use]
    pub fn common_data_from(mut self, field: impl Into<String>) -> Self {
        self.common_data_from = Some(field.into());
        self
    }

    #[must_use]
    pub fn hashes(mut self, table_hash: u32, layout_hash: u32) -> Self {
        self.layout.table_hash = table_hash;
        self.layout.layout_hash = layout_hash;
        self
    }

    #[must_use]
    pub fn build_number(mut self, build: i32) -> Self {
        self.layout.build = build;
        self
    }

    #[must_use]
    pub fn locale(mut self, locale: i32) -> Self {
        self.layout.locale = locale;
        self
    }

    #[must_use]
    pub fn wdb2_index_map(mut self, enabled: bool) -> Self {
        self.layout.wdb2_index_map = enabled;
        self
    }

    /// Appends a row, key column included. Checked by [`TableBuilder::build`].
    #[must_use]
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    pub fn build(self) -> Result<Table> {
        let TableBuilder {
            schema,
            mut layout,
            compression,
            sparse_defaults,
            field_widths,
            common_data_from,
            rows,
        } = self;

        for (name, kind) in compression {
            let index = schema.field_index(&name)?;
            layout.compression[index].kind = kind;
        }
        for (name, value) in sparse_defaults {
            let index = schema.field_index(&name)?;
            layout.compression[index].sparse_default = value;
        }
        for (name, bits) in field_widths {
            let index = schema.field_index(&name)?;
            layout.field_bits[index] = bits_for_width(bits);
        }
        if let Some(name) = common_data_from {
            if layout.signature != Signature::Wdb6 {
                return Err(mismatch(format!(
                    "{} tables have no common data table",
                    layout.signature
                )));
            }
            layout.common_data_from = Some(schema.field_index(&name)?);
        }
        layout.check(&schema)?;

        let header = TableHeader::new(layout.signature);
        let mut table = Table::from_parts(header, layout, schema, IndexMap::new(), BTreeMap::new());
        for values in rows {
            let id = check_row(&table.schema, &values)?;
            if table.rows.contains_key(&id) {
                return Err(crate::error::Error::DuplicateId { id });
            }
            table.rows.insert(id, Row::new(id, values));
        }
        Ok(table)
    }
}

/// Replaces the key column of `values` so it holds `id`.
pub(crate) fn set_key(schema: &Schema, values: &mut [Value], id: i32) {
    let key = schema.key_column();
    if let Some(slot) = values.get_mut(key) {
        *slot = key_value(slot, id);
    }
}
