//! # String Block
//!
//! Tables keep their text in one block of NUL-terminated UTF-8 strings and
//! store offsets into it in place of the strings themselves.
//!
//! ```text
//! offset:  0    1  2  3  4    5  6  7    8
//!        ┌────┬──┬──┬──┬────┬──┬──┬────┐
//!        │ \0 │ f│ o│ o│ \0 │ b│ a│ \0 │ ...
//!        └────┴──┴──┴──┴────┴──┴──┴────┘
//!          ▲ seed byte: offset 0 is always ""
//! ```
//!
//! Some table generations address the block relative to its own start,
//! others by absolute file position. [`StringBlock`] covers both by carrying
//! a `base` that is added to every offset it reports or accepts.
//!
//! [`StringBlockWriter`] interns strings so repeated text is stored once,
//! unless it was created in raw mode.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StringBlockError {
    #[error("string offset {offset} outside block [{base}, {end})")]
    OffsetOutOfRange { offset: u64, base: u64, end: u64 },

    #[error("string at offset {0} is not NUL-terminated")]
    Unterminated(u64),

    #[error("string block grew past u32 offsets")]
    Overflow,
}

/// A decoded string block.
#[derive(Clone, PartialEq, Eq)]
pub struct StringBlock {
    base: u64,
    bytes: Vec<u8>,
}

impl StringBlock {
    /// Wraps raw block bytes; `base` is added to every offset.
    pub fn new(bytes: Vec<u8>, base: u64) -> Self {
        Self { base, bytes }
    }

    /// An empty block, so lookups of offset `base` still resolve to "".
    pub fn empty(base: u64) -> Self {
        Self {
            base,
            bytes: Vec::new(),
        }
    }

    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Resolves the string starting at `offset`.
    ///
    /// Offsets may point into the middle of a stored string (suffix sharing);
    /// the text up to the next NUL is returned. An offset equal to `base` on
    /// an empty block yields "".
    pub fn get(&self, offset: u64) -> Result<String, StringBlockError> {
        let end = self.base + self.bytes.len() as u64;
        if offset < self.base || (offset >= end && !(self.bytes.is_empty() && offset == self.base)) {
            return Err(StringBlockError::OffsetOutOfRange {
                offset,
                base: self.base,
                end,
            });
        }
        let start = (offset - self.base) as usize;
        let tail = &self.bytes[start.min(self.bytes.len())..];
        if tail.is_empty() {
            return Ok(String::new());
        }
        let nul = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or(StringBlockError::Unterminated(offset))?;
        Ok(String::from_utf8_lossy(&tail[..nul]).into_owned())
    }

    /// Splits the block into `(offset, string)` pairs, one per NUL-terminated run.
    pub fn entries(&self) -> BTreeMap<u64, String> {
        let mut out = BTreeMap::new();
        let mut start = 0usize;
        for (i, b) in self.bytes.iter().enumerate() {
            if *b == 0 {
                let text = String::from_utf8_lossy(&self.bytes[start..i]).into_owned();
                out.insert(self.base + start as u64, text);
                start = i + 1;
            }
        }
        out
    }
}

impl fmt::Debug for StringBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringBlock")
            .field("base", &self.base)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Builds a string block for encoding.
pub struct StringBlockWriter {
    bytes: Vec<u8>,
    seen: HashMap<String, u32>,
    raw: bool,
}

impl StringBlockWriter {
    /// A deduplicating writer seeded with the empty string at offset 0.
    pub fn new() -> Self {
        Self {
            bytes: vec![0],
            seen: HashMap::new(),
            raw: false,
        }
    }

    /// A writer that appends every string, even repeats.
    pub fn raw() -> Self {
        Self {
            raw: true,
            ..Self::new()
        }
    }

    /// Stores `text` and returns its offset from the block start.
    ///
    /// The empty string always maps to the seed byte at offset 0.
    pub fn intern(&mut self, text: &str) -> Result<u32, StringBlockError> {
        if text.is_empty() {
            return Ok(0);
        }
        if !self.raw {
            if let Some(offset) = self.seen.get(text) {
                return Ok(*offset);
            }
        }
        let offset = u32::try_from(self.bytes.len()).map_err(|_| StringBlockError::Overflow)?;
        self.bytes.extend_from_slice(text.as_bytes());
        self.bytes.push(0);
        if !self.raw {
            self.seen.insert(text.to_owned(), offset);
        }
        Ok(offset)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.len() <= 1
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Default for StringBlockWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
