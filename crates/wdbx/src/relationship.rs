//! Relationship block of the bit-packed generations.
//!
//! ```text
//! count:u32 | min_id:u32 | max_id:u32 | count × (foreign_key[4], ordinal:u32)
//! ```
//!
//! `ordinal` is the physical record index. A row whose ordinal has no
//! entry gets a zero foreign key.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationship {
    pub min_id: u32,
    pub max_id: u32,
    /// ordinal -> foreign key
    pub entries: BTreeMap<u32, [u8; 4]>,
}

impl Relationship {
    /// Reads the block. A repeated ordinal keeps its first foreign key.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let count = r.read_u32::<LittleEndian>()?;
        let min_id = r.read_u32::<LittleEndian>()?;
        let max_id = r.read_u32::<LittleEndian>()?;

        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let mut key = [0u8; 4];
            r.read_exact(&mut key)?;
            let ordinal = r.read_u32::<LittleEndian>()?;
            if entries.contains_key(&ordinal) {
                warn!(ordinal, "duplicate relationship ordinal ignored");
                continue;
            }
            entries.insert(ordinal, key);
        }
        Ok(Self {
            min_id,
            max_id,
            entries,
        })
    }

    /// Foreign key for record `ordinal`, zero when absent.
    #[must_use]
    pub fn foreign_key(&self, ordinal: u32) -> u32 {
        self.entries
            .get(&ordinal)
            .map_or(0, |k| u32::from_le_bytes(*k))
    }

    /// Builds a block from per-record `(id, foreign_key)` pairs in physical
    /// order. Zero keys are not stored.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (i32, u32)>,
    {
        let mut rel = Relationship::default();
        let mut bounds: Option<(i32, i32)> = None;
        for (ordinal, (id, key)) in records.into_iter().enumerate() {
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(id), hi.max(id)),
                None => (id, id),
            });
            if key != 0 {
                rel.entries.insert(ordinal as u32, key.to_le_bytes());
            }
        }
        if let Some((lo, hi)) = bounds {
            rel.min_id = lo as u32;
            rel.max_id = hi as u32;
        }
        rel
    }

    #[must_use]
    pub fn byte_len(&self) -> u64 {
        12 + self.entries.len() as u64 * 8
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        w.write_u32::<LittleEndian>(self.min_id)?;
        w.write_u32::<LittleEndian>(self.max_id)?;
        for (ordinal, key) in &self.entries {
            w.write_all(key)?;
            w.write_u32::<LittleEndian>(*ordinal)?;
        }
        Ok(())
    }
}
