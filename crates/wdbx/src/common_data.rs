//! WDB6 common data table.
//!
//! ```text
//! column_count:u32
//! per column: count:i32 | type:u8 | count × (id:i32, value[type size])
//! ```
//!
//! Column `i` belongs to schema field `i`. Only fields from the table's
//! common-data boundary onwards take their values from here; an id without
//! an entry takes the field's declared default.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use schema::FieldType;

use crate::error::{corrupt, mismatch, Result};

pub const TYPE_STRING: u8 = 0;
pub const TYPE_16: u8 = 1;
pub const TYPE_8: u8 = 2;
pub const TYPE_FLOAT: u8 = 3;
pub const TYPE_32: u8 = 4;

/// Value sizes indexed by type tag.
const TYPE_SIZES: [usize; 5] = [4, 2, 1, 4, 4];

#[must_use]
pub fn type_tag(ty: FieldType) -> Option<u8> {
    match ty {
        FieldType::String => Some(TYPE_STRING),
        FieldType::Int16 | FieldType::UInt16 => Some(TYPE_16),
        FieldType::Int8 | FieldType::UInt8 => Some(TYPE_8),
        FieldType::Float => Some(TYPE_FLOAT),
        FieldType::Int32 | FieldType::UInt32 => Some(TYPE_32),
        FieldType::Int64 | FieldType::UInt64 | FieldType::Loc => None,
    }
}

pub fn type_size(tag: u8) -> Result<usize> {
    TYPE_SIZES
        .get(tag as usize)
        .copied()
        .ok_or_else(|| corrupt(format!("unknown common data type {tag}")))
}

fn stored_size(tag: u8) -> usize {
    TYPE_SIZES.get(tag as usize).copied().unwrap_or(4)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonColumn {
    pub type_tag: u8,
    /// Entries in file order as `(id, raw value)`; strings hold a block offset.
    pub entries: Vec<(i32, u32)>,
}

impl CommonColumn {
    #[must_use]
    pub fn lookup(&self) -> HashMap<i32, u32> {
        self.entries.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonData {
    pub columns: Vec<CommonColumn>,
}

impl CommonData {
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let column_count = r.read_u32::<LittleEndian>()?;
        let mut columns = Vec::new();
        for _ in 0..column_count {
            let count = r.read_i32::<LittleEndian>()?;
            let type_tag = r.read_u8()?;
            let size = type_size(type_tag)?;
            if count < 0 {
                return Err(corrupt(format!("negative common data count {count}")));
            }
            let mut entries = Vec::new();
            for _ in 0..count {
                let id = r.read_i32::<LittleEndian>()?;
                let mut raw = [0u8; 4];
                r.read_exact(&mut raw[..size])?;
                entries.push((id, u32::from_le_bytes(raw)));
            }
            columns.push(CommonColumn { type_tag, entries });
        }
        Ok(Self { columns })
    }

    /// Checks that every overriding column matches its field's type.
    pub fn check_types(&self, fields: &[schema::Field], from: usize) -> Result<()> {
        if self.columns.len() > fields.len() {
            return Err(mismatch(format!(
                "common data has {} columns but the schema declares {} fields",
                self.columns.len(),
                fields.len()
            )));
        }
        for (i, column) in self.columns.iter().enumerate().skip(from) {
            let field = &fields[i];
            if type_tag(field.ty) != Some(column.type_tag) {
                return Err(mismatch(format!(
                    "common data column {i} has type {} but field {:?} is {}",
                    column.type_tag, field.name, field.ty
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn byte_len(&self) -> u64 {
        4 + self
            .columns
            .iter()
            .map(|c| 5 + c.entries.len() as u64 * (4 + stored_size(c.type_tag) as u64))
            .sum::<u64>()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.columns.len() as u32)?;
        for column in &self.columns {
            let size = stored_size(column.type_tag);
            w.write_i32::<LittleEndian>(column.entries.len() as i32)?;
            w.write_u8(column.type_tag)?;
            for (id, raw) in &column.entries {
                w.write_i32::<LittleEndian>(*id)?;
                w.write_all(&raw.to_le_bytes()[..size])?;
            }
        }
        Ok(())
    }
}
