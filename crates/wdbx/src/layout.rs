//! Mapping between schema fields and what a record physically stores, and
//! the byte-aligned record codec used by every generation that is not
//! bit-packed (plus offset-mapped bit-packed tables, whose records are
//! byte-aligned too).

use bitstream::sign_extend;
use schema::{FieldType, Schema, Value};
use stringblock::{StringBlock, StringBlockWriter};

use crate::error::{corrupt, mismatch, Result};
use crate::format::{HeaderFlags, Signature};

/// Which schema fields live inside the records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    /// Stored schema field indices in record order.
    pub stored: Vec<usize>,
    /// The id comes from an index table or offset map instead of the record.
    pub external_id: bool,
    /// Relationship field of bit-packed tables, filled from the relationship block.
    pub relationship: Option<usize>,
    /// First field taken from the common data table.
    pub common_from: Option<usize>,
}

impl FieldMap {
    pub fn new(
        schema: &Schema,
        signature: Signature,
        flags: HeaderFlags,
        common_from: Option<usize>,
    ) -> Result<Self> {
        let fields = schema.fields();
        let key = schema.key_field();
        let external_id = (signature.has_flags() || signature.is_cache())
            && flags.contains(HeaderFlags::INDEX_MAP);
        if external_id && key != 0 {
            return Err(mismatch(format!(
                "tables with an index table need the id as field 0, got field {key}"
            )));
        }

        let relationship = if signature.is_bit_packed() {
            schema.relationship_field()
        } else {
            None
        };
        if let Some(rel) = relationship {
            if rel + 1 != fields.len() {
                return Err(mismatch("the relationship field must be the last field"));
            }
            if rel == key || !fields[rel].ty.is_small_numeric() || fields[rel].array_size != 1 {
                return Err(mismatch(format!(
                    "relationship field {:?} must be a scalar numeric field of at most 4 bytes",
                    fields[rel].name
                )));
            }
        }

        let common_from = if signature == Signature::Wdb6 {
            common_from
        } else {
            None
        };
        if let Some(from) = common_from {
            if from <= key || from > fields.len() {
                return Err(mismatch(format!("common data cannot start at field {from}")));
            }
        }
        let end = common_from.unwrap_or(fields.len());

        let stored = (0..end)
            .filter(|i| !(external_id && *i == key) && Some(*i) != relationship)
            .collect();
        Ok(Self {
            stored,
            external_id,
            relationship,
            common_from,
        })
    }

    /// Position of the key among stored fields, zero when the id is external.
    #[must_use]
    pub fn id_index(&self, schema: &Schema) -> u16 {
        if self.external_id {
            return 0;
        }
        let key = schema.key_field();
        self.stored.iter().position(|f| *f == key).unwrap_or(0) as u16
    }
}

// -------------------- Byte-aligned records --------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// A little-endian value of this many bytes.
    Fixed(usize),
    /// A 4-byte offset into the string block.
    StringRef,
    /// A NUL-terminated string stored in the record.
    InlineString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub column: usize,
    pub ty: FieldType,
    pub cell: Cell,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowLayout {
    pub slots: Vec<Slot>,
}

impl RowLayout {
    /// Every stored column at its natural size, strings in the block.
    pub fn legacy(schema: &Schema, map: &FieldMap) -> Self {
        let columns = schema.columns();
        let slots = map
            .stored
            .iter()
            .flat_map(|f| schema.field_columns(*f))
            .map(|column| {
                let ty = columns[column].ty;
                let cell = if ty.is_string() {
                    Cell::StringRef
                } else {
                    Cell::Fixed(ty.natural_size())
                };
                Slot { column, ty, cell }
            })
            .collect();
        Self { slots }
    }

    /// Stored fields at the element widths (in bytes) given per stored field.
    /// `inline` selects in-record strings.
    pub fn aligned(schema: &Schema, map: &FieldMap, widths: &[usize], inline: bool) -> Result<Self> {
        if widths.len() != map.stored.len() {
            return Err(mismatch(format!(
                "{} stored fields but {} field widths",
                map.stored.len(),
                widths.len()
            )));
        }
        let mut slots = Vec::new();
        for (f, width) in map.stored.iter().zip(widths) {
            let field = &schema.fields()[*f];
            let cell = match field.ty {
                FieldType::Loc => {
                    return Err(mismatch(format!(
                        "field {:?}: loc fields are only stored by WDBC and WDB2",
                        field.name
                    )))
                }
                FieldType::String if inline => Cell::InlineString,
                FieldType::String if *width == 4 => Cell::StringRef,
                FieldType::Float if *width == 4 => Cell::Fixed(4),
                ty if !ty.is_string() && ty != FieldType::Float && (1..=ty.natural_size()).contains(width) => {
                    Cell::Fixed(*width)
                }
                ty => {
                    return Err(mismatch(format!(
                        "field {:?}: {ty} cannot be stored in {width} bytes",
                        field.name
                    )))
                }
            };
            for column in schema.field_columns(*f) {
                slots.push(Slot {
                    column,
                    ty: field.ty,
                    cell,
                });
            }
        }
        Ok(Self { slots })
    }

    /// Byte length of a record without inline strings.
    #[must_use]
    pub fn fixed_len(&self) -> usize {
        self.slots
            .iter()
            .map(|s| match s.cell {
                Cell::Fixed(n) => n,
                Cell::StringRef => 4,
                Cell::InlineString => 0,
            })
            .sum()
    }

    /// Decodes `record` into `values`; returns the bytes consumed.
    pub fn decode(&self, record: &[u8], strings: &StringBlock, values: &mut [Value]) -> Result<usize> {
        let mut pos = 0usize;
        for slot in &self.slots {
            let value = match slot.cell {
                Cell::Fixed(n) => {
                    let raw = le_bytes(record, pos, n)?;
                    pos += n;
                    let raw = if slot.ty.is_signed() && n < slot.ty.natural_size() {
                        sign_extend(raw, n as u32 * 8) as u64
                    } else {
                        raw
                    };
                    Value::from_bits(slot.ty, raw)
                        .ok_or_else(|| corrupt(format!("column {} is not numeric", slot.column)))?
                }
                Cell::StringRef => {
                    let offset = le_bytes(record, pos, 4)?;
                    pos += 4;
                    Value::Str(strings.get(strings.base() + offset)?)
                }
                Cell::InlineString => {
                    let tail = record.get(pos..).unwrap_or_default();
                    let nul = tail
                        .iter()
                        .position(|b| *b == 0)
                        .ok_or_else(|| corrupt(format!("inline string at byte {pos} is unterminated")))?;
                    pos += nul + 1;
                    Value::Str(String::from_utf8_lossy(&tail[..nul]).into_owned())
                }
            };
            values[slot.column] = value;
        }
        Ok(pos)
    }

    /// Appends one record to `out`, interning referenced strings.
    pub fn encode(&self, values: &[Value], strings: &mut StringBlockWriter, out: &mut Vec<u8>) -> Result<()> {
        for slot in &self.slots {
            let value = &values[slot.column];
            match slot.cell {
                Cell::Fixed(n) => {
                    let bits = fit(value, slot.ty, n)?;
                    out.extend_from_slice(&bits.to_le_bytes()[..n]);
                }
                Cell::StringRef => {
                    let offset = strings.intern(value.as_str().unwrap_or_default())?;
                    out.extend_from_slice(&offset.to_le_bytes());
                }
                Cell::InlineString => {
                    out.extend_from_slice(value.as_str().unwrap_or_default().as_bytes());
                    out.push(0);
                }
            }
        }
        Ok(())
    }
}

fn le_bytes(record: &[u8], pos: usize, n: usize) -> Result<u64> {
    let bytes = record
        .get(pos..pos + n)
        .ok_or_else(|| corrupt(format!("record of {} bytes ends inside a field at {pos}", record.len())))?;
    Ok(bytes
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Bit pattern of `value` checked to survive truncation to `bytes` bytes.
pub(crate) fn fit(value: &Value, ty: FieldType, bytes: usize) -> Result<u64> {
    let bits = value
        .to_bits()
        .ok_or_else(|| mismatch(format!("expected a {ty} value, got {value}")))?;
    let width = bytes as u32 * 8;
    if width >= ty.natural_bits() {
        return Ok(bits);
    }
    let natural = ty.natural_bits();
    let fits = if ty.is_signed() {
        sign_extend(bits, width) == sign_extend(bits, natural)
    } else {
        bits >> width == 0
    };
    if !fits {
        return Err(mismatch(format!("{value} does not fit in {width} bits")));
    }
    Ok(bits & ((1u64 << width) - 1))
}
