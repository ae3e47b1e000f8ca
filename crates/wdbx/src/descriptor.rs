//! Field descriptors: the pre-compression width and byte offset of each
//! stored field.
//!
//! On disk a descriptor is `bits: i16 | offset: u16`, where `bits` counts
//! down from 32: `0` is a 32-bit field, `16` a 16-bit field, `24` an 8-bit
//! field and `-32` a 64-bit field.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub bits: i16,
    pub offset: u16,
}

impl FieldDescriptor {
    /// A descriptor for a field `width` bits wide at byte `offset`.
    #[must_use]
    pub fn for_width(width: u32, offset: u16) -> Self {
        Self {
            bits: bits_for_width(width),
            offset,
        }
    }

    /// Width of one element in bits.
    #[must_use]
    pub fn bit_width(&self) -> u32 {
        let size = 32 - i32::from(self.bits);
        if size < 0 {
            (-size + 32) as u32
        } else {
            size as u32
        }
    }

    /// Width of one element in whole bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        (self.bit_width() / 8) as usize
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let bits = r.read_i16::<LittleEndian>()?;
        let offset = r.read_u16::<LittleEndian>()?;
        Ok(Self { bits, offset })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_i16::<LittleEndian>(self.bits)?;
        w.write_u16::<LittleEndian>(self.offset)
    }
}

/// Inverse of [`FieldDescriptor::bit_width`].
#[must_use]
pub fn bits_for_width(width: u32) -> i16 {
    (32 - width as i32) as i16
}

pub fn read_descriptors<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<FieldDescriptor>> {
    (0..count).map(|_| FieldDescriptor::read_from(r)).collect()
}
