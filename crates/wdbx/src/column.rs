//! Column metadata and the per-column compression codec used by the
//! bit-packed generations.
//!
//! ## Metadata entry (24 bytes)
//!
//! ```text
//! record_offset:u16 (bits) | size:u16 (bits) | additional_data_size:u32
//! compression:u32 | bit_offset:i32 | bit_width:i32 | cardinality:i32
//! ```
//!
//! ## Compression kinds
//!
//! | Kind              | In the record            | Outside the record            |
//! |-------------------|--------------------------|-------------------------------|
//! | `None`            | `array × element_bits`   | -                             |
//! | `Immediate`       | `bit_width` unsigned     | -                             |
//! | `SignedImmediate` | `bit_width` two's compl. | -                             |
//! | `Sparse`          | nothing                  | `(id, value[4])` overrides    |
//! | `Pallet`          | `bit_width` index        | palette of `value[4]`         |
//! | `PalletArray`     | `bit_width` index        | palette of `value[4] × card.` |
//!
//! A sparse column's default value lives in the `bit_offset` slot.
//!
//! Values travel through the codec as raw bit patterns (`u64`), zero
//! extended from the column type's natural width; palette and sparse
//! payloads hold the low four bytes of each pattern.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use bitstream::{sign_extend, signed_width, unsigned_width, BitStream};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use schema::{Field, FieldType, Value};

use crate::descriptor::FieldDescriptor;
use crate::error::{corrupt, mismatch, FormatError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CompressionKind {
    #[default]
    None,
    Immediate,
    Sparse,
    Pallet,
    PalletArray,
    SignedImmediate,
}

impl CompressionKind {
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            CompressionKind::None => 0,
            CompressionKind::Immediate => 1,
            CompressionKind::Sparse => 2,
            CompressionKind::Pallet => 3,
            CompressionKind::PalletArray => 4,
            CompressionKind::SignedImmediate => 5,
        }
    }

    #[must_use]
    pub fn is_palette(self) -> bool {
        matches!(self, CompressionKind::Pallet | CompressionKind::PalletArray)
    }
}

impl TryFrom<u32> for CompressionKind {
    type Error = FormatError;

    fn try_from(code: u32) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(CompressionKind::None),
            1 => Ok(CompressionKind::Immediate),
            2 => Ok(CompressionKind::Sparse),
            3 => Ok(CompressionKind::Pallet),
            4 => Ok(CompressionKind::PalletArray),
            5 => Ok(CompressionKind::SignedImmediate),
            other => Err(FormatError::UnknownCompression(other)),
        }
    }
}

/// Rejects field/compression combinations the codec cannot represent.
pub fn check_compression(field: &Field, kind: CompressionKind) -> Result<()> {
    match kind {
        CompressionKind::None => {
            if field.ty == FieldType::Loc {
                return Err(mismatch(format!(
                    "field {:?}: loc fields are only stored by WDBC and WDB2",
                    field.name
                )));
            }
        }
        _ => {
            if !field.ty.is_small_numeric() {
                return Err(mismatch(format!(
                    "field {:?}: {:?} compression needs a numeric type of at most 4 bytes, got {}",
                    field.name, kind, field.ty
                )));
            }
            if kind != CompressionKind::PalletArray && field.array_size != 1 {
                return Err(mismatch(format!(
                    "field {:?}: {:?} compression cannot hold an array",
                    field.name, kind
                )));
            }
        }
    }
    Ok(())
}

// -------------------- On-disk metadata --------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Bit offset of the column inside a packed record.
    pub record_offset: u16,
    /// Bits the column takes in a record.
    pub size: u16,
    /// Bytes of palette or sparse data owned by the column.
    pub additional_data_size: u32,
    pub kind: CompressionKind,
    /// Offset from the start of packed data for compressed kinds; the default value for `Sparse`.
    pub bit_offset: i32,
    /// Width of a stored value or palette index.
    pub bit_width: i32,
    /// Elements per palette entry for `PalletArray`.
    pub cardinality: i32,
}

impl ColumnMeta {
    pub fn read_from<R: Read>(r: &mut R) -> crate::error::Result<Self> {
        let record_offset = r.read_u16::<LittleEndian>()?;
        let size = r.read_u16::<LittleEndian>()?;
        let additional_data_size = r.read_u32::<LittleEndian>()?;
        let kind = CompressionKind::try_from(r.read_u32::<LittleEndian>()?)?;
        let bit_offset = r.read_i32::<LittleEndian>()?;
        let bit_width = r.read_i32::<LittleEndian>()?;
        let cardinality = r.read_i32::<LittleEndian>()?;
        Ok(Self {
            record_offset,
            size,
            additional_data_size,
            kind,
            bit_offset,
            bit_width,
            cardinality,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LittleEndian>(self.record_offset)?;
        w.write_u16::<LittleEndian>(self.size)?;
        w.write_u32::<LittleEndian>(self.additional_data_size)?;
        w.write_u32::<LittleEndian>(self.kind.code())?;
        w.write_i32::<LittleEndian>(self.bit_offset)?;
        w.write_i32::<LittleEndian>(self.bit_width)?;
        w.write_i32::<LittleEndian>(self.cardinality)
    }
}

// -------------------- Decode side --------------------

/// A decoded column: its metadata plus any palette or sparse payload.
#[derive(Debug, Clone, Default)]
pub struct ColumnDescriptor {
    pub meta: ColumnMeta,
    pub array_size: usize,
    /// Width of one element of a `None` column.
    pub element_bits: u32,
    pub palette: Vec<Vec<u8>>,
    pub sparse: HashMap<i32, [u8; 4]>,
}

impl ColumnDescriptor {
    pub fn new(meta: ColumnMeta, descriptor: Option<&FieldDescriptor>) -> Self {
        let element_bits = descriptor.map_or(32, FieldDescriptor::bit_width);
        let array_size = match meta.kind {
            CompressionKind::None if element_bits > 0 => {
                (u32::from(meta.size) / element_bits).max(1) as usize
            }
            CompressionKind::PalletArray => meta.cardinality.max(1) as usize,
            _ => 1,
        };
        Self {
            meta,
            array_size,
            element_bits,
            palette: Vec::new(),
            sparse: HashMap::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> CompressionKind {
        self.meta.kind
    }

    /// Byte length of one palette entry.
    #[must_use]
    pub fn palette_entry_len(&self) -> usize {
        4 * self.meta.cardinality.max(1) as usize
    }

    /// The value a sparse column takes for ids without an override.
    #[must_use]
    pub fn sparse_default(&self) -> [u8; 4] {
        self.meta.bit_offset.to_le_bytes()
    }

    /// Reads this column's palette block (`additional_data_size` bytes).
    pub fn read_palette<R: Read>(&mut self, r: &mut R) -> Result<()> {
        let entry_len = self.palette_entry_len();
        let total = self.meta.additional_data_size as usize;
        if total % entry_len != 0 {
            return Err(corrupt(format!(
                "palette of {total} bytes is not a multiple of {entry_len}"
            )));
        }
        self.palette = (0..total / entry_len)
            .map(|_| {
                let mut entry = vec![0u8; entry_len];
                r.read_exact(&mut entry).map(|_| entry)
            })
            .collect::<io::Result<_>>()?;
        Ok(())
    }

    /// Reads this column's sparse overrides. A repeated id keeps the last value.
    pub fn read_sparse<R: Read>(&mut self, r: &mut R) -> Result<()> {
        let total = self.meta.additional_data_size as usize;
        if total % 8 != 0 {
            return Err(corrupt(format!(
                "sparse block of {total} bytes is not a multiple of 8"
            )));
        }
        for _ in 0..total / 8 {
            let id = r.read_i32::<LittleEndian>()?;
            let mut value = [0u8; 4];
            r.read_exact(&mut value)?;
            self.sparse.insert(id, value);
        }
        Ok(())
    }

    /// Decodes one row's elements as raw bit patterns. The stream must sit
    /// at the column's first bit; `id` is only consulted by sparse columns.
    pub fn decode(&self, stream: &mut BitStream, id: i32) -> Result<Vec<u64>> {
        let width = self.meta.bit_width.max(0) as u32;
        let values = match self.meta.kind {
            CompressionKind::None => (0..self.array_size)
                .map(|_| stream.read_bits(self.element_bits))
                .collect::<std::result::Result<Vec<_>, _>>()?,
            CompressionKind::Immediate => vec![stream.read_bits(width)?],
            CompressionKind::SignedImmediate => vec![stream.read_signed(width)? as u64],
            CompressionKind::Sparse => {
                let bytes = self.sparse.get(&id).copied().unwrap_or_else(|| self.sparse_default());
                vec![u64::from(u32::from_le_bytes(bytes))]
            }
            CompressionKind::Pallet | CompressionKind::PalletArray => {
                let index = stream.read_bits(width)? as usize;
                let entry = self.palette.get(index).ok_or_else(|| {
                    corrupt(format!(
                        "palette index {index} out of range ({} entries)",
                        self.palette.len()
                    ))
                })?;
                entry
                    .chunks_exact(4)
                    .take(self.array_size)
                    .map(|c| u64::from(u32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                    .collect()
            }
        };
        Ok(values)
    }
}

// -------------------- Encode side --------------------

/// Write-time state for one stored column, built from the rows being encoded.
#[derive(Debug, Clone)]
pub struct ColumnPlan {
    pub ty: FieldType,
    pub kind: CompressionKind,
    pub array_size: usize,
    pub element_bits: u32,
    pub bit_width: u32,
    /// Offset of the column inside a record, in bits.
    pub record_offset: u32,
    pub default: i32,
    pub palette: Vec<Vec<u8>>,
    lookup: HashMap<Vec<u8>, u32>,
    pub sparse: Vec<(i32, [u8; 4])>,
}

impl ColumnPlan {
    pub fn new(field: &Field, kind: CompressionKind, default: i32) -> Self {
        let bit_width = match kind {
            CompressionKind::Sparse => field.ty.natural_bits(),
            _ => 1,
        };
        Self {
            ty: field.ty,
            kind,
            array_size: field.array_size,
            element_bits: field.ty.natural_bits(),
            bit_width,
            record_offset: 0,
            default,
            palette: Vec::new(),
            lookup: HashMap::new(),
            sparse: Vec::new(),
        }
    }

    /// Accounts for one stored row's elements, widening immediates and
    /// growing the palette.
    pub fn observe(&mut self, elements: &[u64]) {
        match self.kind {
            CompressionKind::Immediate => {
                for v in elements {
                    self.bit_width = self.bit_width.max(unsigned_width(*v));
                }
            }
            CompressionKind::SignedImmediate => {
                let natural = self.ty.natural_bits();
                for v in elements {
                    self.bit_width = self.bit_width.max(signed_width(sign_extend(*v, natural)));
                }
            }
            CompressionKind::Pallet | CompressionKind::PalletArray => {
                let entry = palette_entry(elements);
                if !self.lookup.contains_key(&entry) {
                    self.lookup.insert(entry.clone(), self.palette.len() as u32);
                    self.palette.push(entry);
                }
                self.bit_width = unsigned_width(self.palette.len().saturating_sub(1) as u64);
            }
            CompressionKind::None | CompressionKind::Sparse => {}
        }
    }

    /// Records a sparse override for `id` unless `value` equals the default.
    pub fn observe_sparse(&mut self, id: i32, value: &Value) {
        let default = Value::from_bits(self.ty, u64::from(self.default as u32));
        if default.as_ref() == Some(value) {
            return;
        }
        let bits = value.to_bits().unwrap_or(0) as u32;
        self.sparse.push((id, bits.to_le_bytes()));
    }

    /// Bits the column occupies inside each record.
    #[must_use]
    pub fn record_bits(&self) -> u32 {
        match self.kind {
            CompressionKind::None => self.element_bits * self.array_size as u32,
            CompressionKind::Sparse => 0,
            _ => self.bit_width,
        }
    }

    /// Writes one row's elements at the stream cursor.
    pub fn encode(&self, stream: &mut BitStream, elements: &[u64]) -> Result<()> {
        match self.kind {
            CompressionKind::None => {
                for v in elements {
                    stream.write_bits(*v, self.element_bits)?;
                }
            }
            CompressionKind::Immediate | CompressionKind::SignedImmediate => {
                stream.write_bits(elements.first().copied().unwrap_or(0), self.bit_width)?;
            }
            CompressionKind::Sparse => {}
            CompressionKind::Pallet | CompressionKind::PalletArray => {
                let entry = palette_entry(elements);
                let index = self.lookup.get(&entry).copied().ok_or_else(|| {
                    corrupt("value was not observed before encoding its palette index")
                })?;
                stream.write_bits(u64::from(index), self.bit_width)?;
            }
        }
        Ok(())
    }

    /// Bytes of pallet or sparse payload written after the column metadata.
    #[must_use]
    pub fn additional_data_size(&self) -> u32 {
        match self.kind {
            CompressionKind::Pallet | CompressionKind::PalletArray => {
                self.palette.iter().map(|e| e.len() as u32).sum()
            }
            CompressionKind::Sparse => self.sparse.len() as u32 * 8,
            _ => 0,
        }
    }

    /// Metadata for this column; `packed_start` is the first packed bit of a record.
    pub fn meta(&self, packed_start: u32) -> Result<ColumnMeta> {
        let record_offset = u16::try_from(self.record_offset)
            .map_err(|_| mismatch("record layout exceeds 65535 bits"))?;
        let size = u16::try_from(self.record_bits())
            .map_err(|_| mismatch("column exceeds 65535 bits"))?;
        let bit_offset = match self.kind {
            CompressionKind::None => 0,
            CompressionKind::Sparse => self.default,
            _ => self.record_offset as i32 - packed_start as i32,
        };
        let bit_width = match self.kind {
            CompressionKind::None => self.element_bits,
            _ => self.bit_width,
        };
        let cardinality = match self.kind {
            CompressionKind::PalletArray => self.array_size as i32,
            _ => 0,
        };
        Ok(ColumnMeta {
            record_offset,
            size,
            additional_data_size: self.additional_data_size(),
            kind: self.kind,
            bit_offset,
            bit_width: bit_width as i32,
            cardinality,
        })
    }

    /// Writes every palette entry in first-seen order.
    pub fn write_palette<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for entry in &self.palette {
            w.write_all(entry)?;
        }
        Ok(())
    }

    /// Writes the `(id, value)` overrides in row order.
    pub fn write_sparse<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for (id, value) in &self.sparse {
            w.write_i32::<LittleEndian>(*id)?;
            w.write_all(value)?;
        }
        Ok(())
    }
}

fn palette_entry(elements: &[u64]) -> Vec<u8> {
    elements
        .iter()
        .flat_map(|v| (*v as u32).to_le_bytes())
        .collect()
}
