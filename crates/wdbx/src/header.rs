//! Header envelope.
//!
//! [`TableHeader`] is a flat value holding every header field any signature
//! defines. Fields a signature does not store stay zero. Decoding produces
//! one instance which the table keeps read-only; encoding derives a fresh
//! instance from the rows (see `writer`).
//!
//! ## Field blocks
//!
//! ```text
//! base   signature[4] record_count field_count record_size string_block_size
//! WCH7/8 signature[4] record_count field_count record_size wch7_count string_block_size
//!
//! WDB2   table_hash build timestamp min_id max_id locale copy_table_size
//! WDB5   table_hash layout_hash min_id max_id locale copy_table_size flags:u16 id_index:u16
//! WDB6   <WDB5> total_field_count common_data_table_size
//! WDC1   <WDB5> total_field_count packed_data_offset relationship_count
//!        offset_map_offset index_size column_meta_size sparse_data_size
//!        pallet_data_size relationship_data_size
//! WDC2/3 table_hash layout_hash min_id max_id locale flags:u16 id_index:u16
//!        total_field_count packed_data_offset relationship_count
//!        column_meta_size sparse_data_size pallet_data_size section_count
//!        unknown1 unknown2 record_data_offset record_data_row_count
//!        record_data_string_size copy_table_size offset_map_offset
//!        index_size relationship_data_size
//! WCH*   table_hash layout_hash build timestamp min_id max_id locale
//! ```

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FormatError, Result};
use crate::format::{HeaderFlags, Signature, WDB2_INDEX_MAP_BUILD};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableHeader {
    pub signature: Signature,
    pub record_count: u32,
    pub field_count: u32,
    pub record_size: u32,
    pub string_block_size: u32,
    pub table_hash: u32,
    pub layout_hash: u32,
    pub build: i32,
    pub timestamp: u32,
    pub min_id: i32,
    pub max_id: i32,
    pub locale: i32,
    pub copy_table_size: u32,
    pub flags: HeaderFlags,
    pub id_index: u16,
    pub total_field_count: u32,
    pub common_data_table_size: u32,
    pub packed_data_offset: u32,
    pub relationship_count: u32,
    pub offset_map_offset: u32,
    pub index_size: u32,
    pub column_meta_size: u32,
    pub sparse_data_size: u32,
    pub pallet_data_size: u32,
    pub relationship_data_size: u32,
    pub section_count: u32,
    pub unknown1: u32,
    pub unknown2: u32,
    pub record_data_offset: u32,
    pub record_data_row_count: u32,
    pub record_data_string_size: u32,
    pub wch7_count: u32,
}

impl TableHeader {
    /// An all-zero header for `signature`.
    pub fn new(signature: Signature) -> Self {
        Self {
            signature,
            ..Self::default()
        }
    }

    /// Reads the signature and the field block it selects.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        let signature = Signature::from_magic(u32::from_le_bytes(magic)).ok_or_else(|| {
            FormatError::UnknownSignature(String::from_utf8_lossy(&magic).into_owned())
        })?;

        let mut h = TableHeader::new(signature);
        h.record_count = r.read_u32::<LittleEndian>()?;
        h.field_count = r.read_u32::<LittleEndian>()?;
        h.record_size = r.read_u32::<LittleEndian>()?;
        if matches!(signature, Signature::Wch7 | Signature::Wch8) {
            h.wch7_count = r.read_u32::<LittleEndian>()?;
        }
        h.string_block_size = r.read_u32::<LittleEndian>()?;

        match signature {
            Signature::Wdbc => {}
            Signature::Wdb2 => {
                h.table_hash = r.read_u32::<LittleEndian>()?;
                h.build = r.read_i32::<LittleEndian>()?;
                h.timestamp = r.read_u32::<LittleEndian>()?;
                h.min_id = r.read_i32::<LittleEndian>()?;
                h.max_id = r.read_i32::<LittleEndian>()?;
                h.locale = r.read_i32::<LittleEndian>()?;
                h.copy_table_size = r.read_u32::<LittleEndian>()?;
            }
            Signature::Wdb5 | Signature::Wdb6 | Signature::Wdc1 => {
                h.table_hash = r.read_u32::<LittleEndian>()?;
                h.layout_hash = r.read_u32::<LittleEndian>()?;
                h.min_id = r.read_i32::<LittleEndian>()?;
                h.max_id = r.read_i32::<LittleEndian>()?;
                h.locale = r.read_i32::<LittleEndian>()?;
                h.copy_table_size = r.read_u32::<LittleEndian>()?;
                h.flags = HeaderFlags::from_bits(r.read_u16::<LittleEndian>()?);
                h.id_index = r.read_u16::<LittleEndian>()?;
                if signature == Signature::Wdb6 {
                    h.total_field_count = r.read_u32::<LittleEndian>()?;
                    h.common_data_table_size = r.read_u32::<LittleEndian>()?;
                }
                if signature == Signature::Wdc1 {
                    h.total_field_count = r.read_u32::<LittleEndian>()?;
                    h.packed_data_offset = r.read_u32::<LittleEndian>()?;
                    h.relationship_count = r.read_u32::<LittleEndian>()?;
                    h.offset_map_offset = r.read_u32::<LittleEndian>()?;
                    h.index_size = r.read_u32::<LittleEndian>()?;
                    h.column_meta_size = r.read_u32::<LittleEndian>()?;
                    h.sparse_data_size = r.read_u32::<LittleEndian>()?;
                    h.pallet_data_size = r.read_u32::<LittleEndian>()?;
                    h.relationship_data_size = r.read_u32::<LittleEndian>()?;
                }
            }
            Signature::Wdc2 | Signature::Wdc3 => {
                h.table_hash = r.read_u32::<LittleEndian>()?;
                h.layout_hash = r.read_u32::<LittleEndian>()?;
                h.min_id = r.read_i32::<LittleEndian>()?;
                h.max_id = r.read_i32::<LittleEndian>()?;
                h.locale = r.read_i32::<LittleEndian>()?;
                h.flags = HeaderFlags::from_bits(r.read_u16::<LittleEndian>()?);
                h.id_index = r.read_u16::<LittleEndian>()?;
                h.total_field_count = r.read_u32::<LittleEndian>()?;
                h.packed_data_offset = r.read_u32::<LittleEndian>()?;
                h.relationship_count = r.read_u32::<LittleEndian>()?;
                h.column_meta_size = r.read_u32::<LittleEndian>()?;
                h.sparse_data_size = r.read_u32::<LittleEndian>()?;
                h.pallet_data_size = r.read_u32::<LittleEndian>()?;
                h.section_count = r.read_u32::<LittleEndian>()?;
                h.unknown1 = r.read_u32::<LittleEndian>()?;
                h.unknown2 = r.read_u32::<LittleEndian>()?;
                h.record_data_offset = r.read_u32::<LittleEndian>()?;
                h.record_data_row_count = r.read_u32::<LittleEndian>()?;
                h.record_data_string_size = r.read_u32::<LittleEndian>()?;
                h.copy_table_size = r.read_u32::<LittleEndian>()?;
                h.offset_map_offset = r.read_u32::<LittleEndian>()?;
                h.index_size = r.read_u32::<LittleEndian>()?;
                h.relationship_data_size = r.read_u32::<LittleEndian>()?;
            }
            Signature::Wch5 | Signature::Wch7 | Signature::Wch8 => {
                h.table_hash = r.read_u32::<LittleEndian>()?;
                h.layout_hash = r.read_u32::<LittleEndian>()?;
                h.build = r.read_i32::<LittleEndian>()?;
                h.timestamp = r.read_u32::<LittleEndian>()?;
                h.min_id = r.read_i32::<LittleEndian>()?;
                h.max_id = r.read_i32::<LittleEndian>()?;
                h.locale = r.read_i32::<LittleEndian>()?;
            }
        }

        // An index table supplies ids externally, so the id slot is the placeholder.
        if h.signature.has_flags() && h.flags.contains(HeaderFlags::INDEX_MAP) {
            h.id_index = 0;
        }
        Ok(h)
    }

    /// Writes the signature and its field block. Exactly
    /// [`Signature::header_len`] bytes are produced.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.signature.magic())?;
        w.write_u32::<LittleEndian>(self.record_count)?;
        w.write_u32::<LittleEndian>(self.field_count)?;
        w.write_u32::<LittleEndian>(self.record_size)?;
        if matches!(self.signature, Signature::Wch7 | Signature::Wch8) {
            w.write_u32::<LittleEndian>(self.wch7_count)?;
        }
        w.write_u32::<LittleEndian>(self.string_block_size)?;

        match self.signature {
            Signature::Wdbc => {}
            Signature::Wdb2 => {
                w.write_u32::<LittleEndian>(self.table_hash)?;
                w.write_i32::<LittleEndian>(self.build)?;
                w.write_u32::<LittleEndian>(self.timestamp)?;
                w.write_i32::<LittleEndian>(self.min_id)?;
                w.write_i32::<LittleEndian>(self.max_id)?;
                w.write_i32::<LittleEndian>(self.locale)?;
                w.write_u32::<LittleEndian>(self.copy_table_size)?;
            }
            Signature::Wdb5 | Signature::Wdb6 | Signature::Wdc1 => {
                w.write_u32::<LittleEndian>(self.table_hash)?;
                w.write_u32::<LittleEndian>(self.layout_hash)?;
                w.write_i32::<LittleEndian>(self.min_id)?;
                w.write_i32::<LittleEndian>(self.max_id)?;
                w.write_i32::<LittleEndian>(self.locale)?;
                w.write_u32::<LittleEndian>(self.copy_table_size)?;
                w.write_u16::<LittleEndian>(self.flags.bits())?;
                w.write_u16::<LittleEndian>(self.id_index)?;
                if self.signature == Signature::Wdb6 {
                    w.write_u32::<LittleEndian>(self.total_field_count)?;
                    w.write_u32::<LittleEndian>(self.common_data_table_size)?;
                }
                if self.signature == Signature::Wdc1 {
                    w.write_u32::<LittleEndian>(self.total_field_count)?;
                    w.write_u32::<LittleEndian>(self.packed_data_offset)?;
                    w.write_u32::<LittleEndian>(self.relationship_count)?;
                    w.write_u32::<LittleEndian>(self.offset_map_offset)?;
                    w.write_u32::<LittleEndian>(self.index_size)?;
                    w.write_u32::<LittleEndian>(self.column_meta_size)?;
                    w.write_u32::<LittleEndian>(self.sparse_data_size)?;
                    w.write_u32::<LittleEndian>(self.pallet_data_size)?;
                    w.write_u32::<LittleEndian>(self.relationship_data_size)?;
                }
            }
            Signature::Wdc2 | Signature::Wdc3 => {
                w.write_u32::<LittleEndian>(self.table_hash)?;
                w.write_u32::<LittleEndian>(self.layout_hash)?;
                w.write_i32::<LittleEndian>(self.min_id)?;
                w.write_i32::<LittleEndian>(self.max_id)?;
                w.write_i32::<LittleEndian>(self.locale)?;
                w.write_u16::<LittleEndian>(self.flags.bits())?;
                w.write_u16::<LittleEndian>(self.id_index)?;
                w.write_u32::<LittleEndian>(self.total_field_count)?;
                w.write_u32::<LittleEndian>(self.packed_data_offset)?;
                w.write_u32::<LittleEndian>(self.relationship_count)?;
                w.write_u32::<LittleEndian>(self.column_meta_size)?;
                w.write_u32::<LittleEndian>(self.sparse_data_size)?;
                w.write_u32::<LittleEndian>(self.pallet_data_size)?;
                w.write_u32::<LittleEndian>(self.section_count)?;
                w.write_u32::<LittleEndian>(self.unknown1)?;
                w.write_u32::<LittleEndian>(self.unknown2)?;
                w.write_u32::<LittleEndian>(self.record_data_offset)?;
                w.write_u32::<LittleEndian>(self.record_data_row_count)?;
                w.write_u32::<LittleEndian>(self.record_data_string_size)?;
                w.write_u32::<LittleEndian>(self.copy_table_size)?;
                w.write_u32::<LittleEndian>(self.offset_map_offset)?;
                w.write_u32::<LittleEndian>(self.index_size)?;
                w.write_u32::<LittleEndian>(self.relationship_data_size)?;
            }
            Signature::Wch5 | Signature::Wch7 | Signature::Wch8 => {
                w.write_u32::<LittleEndian>(self.table_hash)?;
                w.write_u32::<LittleEndian>(self.layout_hash)?;
                w.write_i32::<LittleEndian>(self.build)?;
                w.write_u32::<LittleEndian>(self.timestamp)?;
                w.write_i32::<LittleEndian>(self.min_id)?;
                w.write_i32::<LittleEndian>(self.max_id)?;
                w.write_i32::<LittleEndian>(self.locale)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn has_offset_map(&self) -> bool {
        self.flags.contains(HeaderFlags::OFFSET_MAP)
    }

    #[must_use]
    pub fn has_index_table(&self) -> bool {
        self.flags.contains(HeaderFlags::INDEX_MAP)
    }

    /// Number of id slots covered by `[min_id, max_id]`, zero when the range is empty.
    #[must_use]
    pub fn id_span(&self) -> u64 {
        id_span(self.min_id, self.max_id)
    }

    /// WDB2 tables with a populated id range carry an index map and string
    /// lengths between header and records.
    #[must_use]
    pub fn has_wdb2_index_map(&self) -> bool {
        self.signature == Signature::Wdb2 && self.max_id != 0 && self.build > WDB2_INDEX_MAP_BUILD
    }
}

pub(crate) fn id_span(min_id: i32, max_id: i32) -> u64 {
    if max_id < min_id {
        0
    } else {
        (i64::from(max_id) - i64::from(min_id) + 1) as u64
    }
}
