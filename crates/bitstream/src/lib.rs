//! # Bit Stream
//!
//! A bit-addressable cursor over a byte buffer, used by the table codec to
//! read and write record fields that are packed at arbitrary bit widths.
//!
//! ## Bit order
//!
//! Bits are consumed least-significant first within each byte, and a value
//! spanning several bytes is assembled little-endian:
//!
//! ```text
//!  byte 0          byte 1
//! ┌───────────────┬───────────────┐
//! │ 7 6 5 4 3 2 1 0 │ 7 6 5 4 3 2 1 0 │
//! └───────────────┴───────────────┘
//!        ▲ a 5-bit value starting at bit 3 of byte 0 occupies
//!          bits 3..8 of byte 0 (value bits 0..5)
//! ```
//!
//! ## Modes
//!
//! | Constructor              | Reads | Writes                              |
//! |--------------------------|-------|-------------------------------------|
//! | [`BitStream::from_bytes`] | yes   | only inside the existing buffer     |
//! | [`BitStream::new`]        | yes   | grow the buffer on demand            |
//!
//! Every read or write that would cross the end of a fixed buffer fails with
//! [`BitStreamError::OutOfBounds`] and leaves the cursor untouched.
//!
//! A stream is owned by exactly one decode or encode pass.

use std::fmt;
use std::io::{self, Write};

use thiserror::Error;

/// Largest value width a single read or write may carry.
pub const MAX_BITS: u32 = 64;

/// Errors raised by [`BitStream`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BitStreamError {
    /// The operation would cross the end of the buffer.
    #[error("access of {bits} bits at bit {position} overruns a {len}-byte buffer")]
    OutOfBounds { position: u64, bits: u64, len: usize },

    /// More than [`MAX_BITS`] bits were requested at once.
    #[error("bit width {0} exceeds {MAX_BITS}")]
    WidthTooLarge(u32),

    /// A seek targeted a sub-byte position outside `0..8`.
    #[error("bit position {0} is not within a byte")]
    InvalidBitPosition(u8),
}

pub struct BitStream {
    buf: Vec<u8>,
    offset: usize,
    bit: u8,
    growable: bool,
}

impl BitStream {
    /// Creates an empty, growable stream for encoding.
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            offset: 0,
            bit: 0,
            growable: true,
        }
    }

    /// Creates a growable stream with `capacity` bytes reserved.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            offset: 0,
            bit: 0,
            growable: true,
        }
    }

    /// Wraps an existing buffer. The stream never grows past `bytes.len()`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buf: bytes,
            offset: 0,
            bit: 0,
            growable: false,
        }
    }

    /// Current byte offset.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Current sub-byte bit position (`0..8`).
    #[must_use]
    pub fn bit_position(&self) -> u8 {
        self.bit
    }

    /// Absolute cursor position in bits.
    #[must_use]
    pub fn position_bits(&self) -> u64 {
        self.offset as u64 * 8 + u64::from(self.bit)
    }

    /// Written (or wrapped) extent in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Moves the cursor to `offset` bytes plus `bit` bits.
    pub fn seek(&mut self, offset: usize, bit: u8) -> Result<(), BitStreamError> {
        if bit >= 8 {
            return Err(BitStreamError::InvalidBitPosition(bit));
        }
        self.offset = offset;
        self.bit = bit;
        Ok(())
    }

    /// Moves the cursor to an absolute bit position.
    pub fn seek_bits(&mut self, position: u64) {
        self.offset = (position / 8) as usize;
        self.bit = (position % 8) as u8;
    }

    /// Advances to the start of the next byte unless already aligned.
    pub fn seek_next_offset(&mut self) {
        if self.bit != 0 {
            self.offset += 1;
            self.bit = 0;
        }
    }

    /// Reads `bits` bits as an unsigned value.
    pub fn read_bits(&mut self, bits: u32) -> Result<u64, BitStreamError> {
        self.check_width(bits)?;
        self.check_bounds(u64::from(bits))?;

        let mut value = 0u64;
        let mut done = 0u32;
        while done < bits {
            let avail = 8 - u32::from(self.bit);
            let take = avail.min(bits - done);
            let chunk = (self.buf[self.offset] >> self.bit) & low_mask(take);
            value |= u64::from(chunk) << done;
            done += take;
            self.advance(take);
        }
        Ok(value)
    }

    /// Reads `bits` bits and sign-extends the result from bit `bits - 1`.
    pub fn read_signed(&mut self, bits: u32) -> Result<i64, BitStreamError> {
        let raw = self.read_bits(bits)?;
        Ok(sign_extend(raw, bits))
    }

    pub fn read_u32(&mut self, bits: u32) -> Result<u32, BitStreamError> {
        self.read_bits(bits.min(32)).map(|v| v as u32)
    }

    /// Writes the low `bits` bits of `value`.
    pub fn write_bits(&mut self, value: u64, bits: u32) -> Result<(), BitStreamError> {
        self.check_width(bits)?;
        self.reserve_bits(u64::from(bits))?;

        let mut done = 0u32;
        while done < bits {
            let avail = 8 - u32::from(self.bit);
            let take = avail.min(bits - done);
            let chunk = ((value >> done) as u8) & low_mask(take);
            let slot = &mut self.buf[self.offset];
            *slot &= !(low_mask(take) << self.bit);
            *slot |= chunk << self.bit;
            done += take;
            self.advance(take);
        }
        Ok(())
    }

    /// Reads `len` whole bytes starting at the cursor (which need not be aligned).
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, BitStreamError> {
        self.check_bounds(len as u64 * 8)?;
        if self.bit == 0 {
            let out = self.buf[self.offset..self.offset + len].to_vec();
            self.offset += len;
            return Ok(out);
        }
        (0..len).map(|_| self.read_bits(8).map(|b| b as u8)).collect()
    }

    /// Writes `bytes` starting at the cursor.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BitStreamError> {
        if self.bit == 0 {
            self.reserve_bits(bytes.len() as u64 * 8)?;
            self.buf[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
            self.offset += bytes.len();
            return Ok(());
        }
        for b in bytes {
            self.write_bits(u64::from(*b), 8)?;
        }
        Ok(())
    }

    /// Writes zero bytes until the stream is `len` bytes long.
    ///
    /// Aligns the cursor first, then moves it to `len` if it is behind.
    pub fn pad_to(&mut self, len: usize) -> Result<(), BitStreamError> {
        self.seek_next_offset();
        if len > self.buf.len() {
            if !self.growable {
                return Err(self.overrun((len - self.buf.len()) as u64 * 8));
            }
            self.buf.resize(len, 0);
        }
        if self.offset < len {
            self.offset = len;
        }
        Ok(())
    }

    /// Copies the written extent to `out`.
    pub fn copy_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.buf)
    }

    // ---- Internal helpers ----

    fn advance(&mut self, bits: u32) {
        let pos = u32::from(self.bit) + bits;
        self.offset += (pos / 8) as usize;
        self.bit = (pos % 8) as u8;
    }

    fn check_width(&self, bits: u32) -> Result<(), BitStreamError> {
        if bits > MAX_BITS {
            return Err(BitStreamError::WidthTooLarge(bits));
        }
        Ok(())
    }

    fn check_bounds(&self, bits: u64) -> Result<(), BitStreamError> {
        if self.position_bits() + bits > self.buf.len() as u64 * 8 {
            return Err(self.overrun(bits));
        }
        Ok(())
    }

    fn reserve_bits(&mut self, bits: u64) -> Result<(), BitStreamError> {
        let end_bits = self.position_bits() + bits;
        let end = end_bits.div_ceil(8) as usize;
        if end > self.buf.len() {
            if !self.growable {
                return Err(self.overrun(bits));
            }
            self.buf.resize(end, 0);
        }
        Ok(())
    }

    fn overrun(&self, bits: u64) -> BitStreamError {
        BitStreamError::OutOfBounds {
            position: self.position_bits(),
            bits,
            len: self.buf.len(),
        }
    }
}

impl Default for BitStream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BitStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitStream")
            .field("len", &self.buf.len())
            .field("offset", &self.offset)
            .field("bit", &self.bit)
            .field("growable", &self.growable)
            .finish()
    }
}

/// Sign-extends the low `bits` bits of `raw`.
#[must_use]
pub fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits == 0 {
        return 0;
    }
    if bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/// Number of bits needed to hold `value` as an unsigned number (at least 1).
#[must_use]
pub fn unsigned_width(value: u64) -> u32 {
    (64 - value.leading_zeros()).max(1)
}

/// Number of bits needed to hold `value` in two's complement (at least 1).
#[must_use]
pub fn signed_width(value: i64) -> u32 {
    let magnitude = (if value < 0 { !value } else { value }) as u64;
    65 - magnitude.leading_zeros().min(64)
}

fn low_mask(bits: u32) -> u8 {
    if bits >= 8 {
        0xFF
    } else {
        (1u8 << bits) - 1
    }
}
