//! Signature constants, header sizes and header flags.
//!
//! Every table file starts with a 4-byte ASCII signature. Read as a
//! little-endian `u32` the signature `WDBC` is `0x4342_4457`.
//!
//! | Signature | Magic         | Header | Generation                          |
//! |-----------|---------------|--------|-------------------------------------|
//! | `WDBC`    | `0x4342_4457` | 20 B   | fixed records + string block         |
//! | `WDB2`    | `0x3242_4457` | 48 B   | + hashes, build, id range            |
//! | `WDB5`    | `0x3542_4457` | 48 B   | + field descriptors, flags, tables   |
//! | `WDB6`    | `0x3642_4457` | 56 B   | + common data table                  |
//! | `WDC1`    | `0x3143_4457` | 84 B   | bit-packed, column compression       |
//! | `WDC2`    | `0x3243_4457` | 108 B  | record data after column tables      |
//! | `WDC3`    | `0x3343_4457` | 108 B  | descriptor count = total field count |
//! | `WCH5`    | `0x3548_4357` | 48 B   | client cache of a WDB5 table         |
//! | `WCH7`    | `0x3748_4357` | 52 B   | + opaque cache table                 |
//! | `WCH8`    | `0x3848_4357` | 52 B   | as WCH7                              |

use std::fmt;

pub const WDBC_MAGIC: u32 = 0x4342_4457;
pub const WDB2_MAGIC: u32 = 0x3242_4457;
pub const WDB5_MAGIC: u32 = 0x3542_4457;
pub const WDB6_MAGIC: u32 = 0x3642_4457;
pub const WDC1_MAGIC: u32 = 0x3143_4457;
pub const WDC2_MAGIC: u32 = 0x3243_4457;
pub const WDC3_MAGIC: u32 = 0x3343_4457;
pub const WCH5_MAGIC: u32 = 0x3548_4357;
pub const WCH7_MAGIC: u32 = 0x3748_4357;
pub const WCH8_MAGIC: u32 = 0x3848_4357;

/// Size of the base header: signature + record/field counts + record and
/// string block sizes.
pub const BASE_HEADER_BYTES: u64 = 20;

/// Size of one field descriptor: bits (i16) + offset (u16).
pub const FIELD_DESCRIPTOR_BYTES: u64 = 4;

/// Size of one column metadata entry.
pub const COLUMN_META_BYTES: u64 = 24;

/// Size of one legacy offset map entry: offset (i32) + length (u16).
pub const OFFSET_ENTRY_BYTES: u64 = 6;

/// Size of one cache offset map entry: id (i32) + offset (i32) + length (u16).
pub const CACHE_OFFSET_ENTRY_BYTES: u64 = 10;

/// WDB2 tables newer than this build carry an id index map after the header.
pub const WDB2_INDEX_MAP_BUILD: i32 = 12880;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Signature {
    #[default]
    Wdbc,
    Wdb2,
    Wdb5,
    Wdb6,
    Wdc1,
    Wdc2,
    Wdc3,
    Wch5,
    Wch7,
    Wch8,
}

impl Signature {
    pub const ALL: [Signature; 10] = [
        Signature::Wdbc,
        Signature::Wdb2,
        Signature::Wdb5,
        Signature::Wdb6,
        Signature::Wdc1,
        Signature::Wdc2,
        Signature::Wdc3,
        Signature::Wch5,
        Signature::Wch7,
        Signature::Wch8,
    ];

    #[must_use]
    pub fn from_magic(magic: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.magic() == magic)
    }

    #[must_use]
    pub fn magic(self) -> u32 {
        match self {
            Signature::Wdbc => WDBC_MAGIC,
            Signature::Wdb2 => WDB2_MAGIC,
            Signature::Wdb5 => WDB5_MAGIC,
            Signature::Wdb6 => WDB6_MAGIC,
            Signature::Wdc1 => WDC1_MAGIC,
            Signature::Wdc2 => WDC2_MAGIC,
            Signature::Wdc3 => WDC3_MAGIC,
            Signature::Wch5 => WCH5_MAGIC,
            Signature::Wch7 => WCH7_MAGIC,
            Signature::Wch8 => WCH8_MAGIC,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Signature::Wdbc => "WDBC",
            Signature::Wdb2 => "WDB2",
            Signature::Wdb5 => "WDB5",
            Signature::Wdb6 => "WDB6",
            Signature::Wdc1 => "WDC1",
            Signature::Wdc2 => "WDC2",
            Signature::Wdc3 => "WDC3",
            Signature::Wch5 => "WCH5",
            Signature::Wch7 => "WCH7",
            Signature::Wch8 => "WCH8",
        }
    }

    /// Total header length in bytes, excluding descriptor tables.
    #[must_use]
    pub fn header_len(self) -> u64 {
        match self {
            Signature::Wdbc => BASE_HEADER_BYTES,
            Signature::Wdb2 | Signature::Wdb5 | Signature::Wch5 => 48,
            Signature::Wch7 | Signature::Wch8 => 52,
            Signature::Wdb6 => 56,
            Signature::Wdc1 => 84,
            Signature::Wdc2 | Signature::Wdc3 => 108,
        }
    }

    /// Bit-packed generations with per-column compression.
    #[must_use]
    pub fn is_bit_packed(self) -> bool {
        matches!(self, Signature::Wdc1 | Signature::Wdc2 | Signature::Wdc3)
    }

    /// Client cache files that borrow their layout from a counterpart table.
    #[must_use]
    pub fn is_cache(self) -> bool {
        matches!(self, Signature::Wch5 | Signature::Wch7 | Signature::Wch8)
    }

    /// Generations whose header carries flags and an id index.
    #[must_use]
    pub fn has_flags(self) -> bool {
        matches!(
            self,
            Signature::Wdb5 | Signature::Wdb6 | Signature::Wdc1 | Signature::Wdc2 | Signature::Wdc3
        )
    }

    #[must_use]
    pub fn supports_copy_table(self) -> bool {
        self.has_flags()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header flag bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HeaderFlags(u16);

impl HeaderFlags {
    pub const NONE: HeaderFlags = HeaderFlags(0);
    /// Records are variable length and addressed through an offset map.
    pub const OFFSET_MAP: HeaderFlags = HeaderFlags(0x1);
    pub const RELATIONSHIP_DATA: HeaderFlags = HeaderFlags(0x2);
    /// Ids come from a separate index table instead of the record itself.
    pub const INDEX_MAP: HeaderFlags = HeaderFlags(0x4);
    pub const UNKNOWN: HeaderFlags = HeaderFlags(0x8);
    pub const COMPRESSED: HeaderFlags = HeaderFlags(0x10);

    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        HeaderFlags(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: HeaderFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: HeaderFlags) -> Self {
        HeaderFlags(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: HeaderFlags) -> Self {
        HeaderFlags(self.0 & !other.0)
    }
}

impl std::ops::BitOr for HeaderFlags {
    type Output = HeaderFlags;

    fn bitor(self, rhs: HeaderFlags) -> HeaderFlags {
        self.union(rhs)
    }
}

impl fmt::Debug for HeaderFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(HeaderFlags, &str); 5] = [
            (HeaderFlags::OFFSET_MAP, "OFFSET_MAP"),
            (HeaderFlags::RELATIONSHIP_DATA, "RELATIONSHIP_DATA"),
            (HeaderFlags::INDEX_MAP, "INDEX_MAP"),
            (HeaderFlags::UNKNOWN, "UNKNOWN"),
            (HeaderFlags::COMPRESSED, "COMPRESSED"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "HeaderFlags({:#x}", self.0)?;
        if !set.is_empty() {
            write!(f, " {}", set.join(" | "))?;
        }
        f.write_str(")")
    }
}
