//! Per-signature pipelines.
//!
//! Each signature is plain data: the ordered sections that follow its header
//! plus a few switches. The reader and writer walk [`VariantSpec::sections`]
//! in order; a section whose presence conditions are not met is skipped.

use crate::format::Signature;

/// A body section. Presence is decided by header sizes and flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// WDB2 id index map and string lengths.
    Wdb2IndexMap,
    /// Cache `(id, offset, len)` entries for offset-mapped tables.
    CacheOffsetMap,
    Descriptors,
    ColumnMeta,
    PalletData,
    SparseData,
    Records,
    Strings,
    OffsetMap,
    /// One `i32` per id in range, present with the relationship-data flag.
    SecondaryIds,
    IndexTable,
    CopyTable,
    Relationship,
    CommonData,
    /// Opaque `u32` table of WCH7 and WCH8.
    CacheTable,
}

/// How a record's fields are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Schema-sized fields, no descriptors.
    Legacy,
    /// Byte-aligned fields sized by field descriptors.
    Aligned,
    /// Bit-packed columns with per-column compression.
    Packed,
}

#[derive(Debug)]
pub struct VariantSpec {
    pub signature: Signature,
    pub family: Family,
    pub sections: &'static [Section],
    /// String fields hold offsets relative to their own position.
    pub relative_strings: bool,
    /// Index, copy and common data tables are located from the end of the file.
    pub tail_anchored: bool,
    /// Descriptor count is the total field count, followed by a `u32`.
    pub extended_descriptors: bool,
}

use Section::*;

const LEGACY: &[Section] = &[Records, Strings];
const WDB2: &[Section] = &[Wdb2IndexMap, Records, Strings];
const WDB5: &[Section] = &[Descriptors, Records, Strings, OffsetMap, SecondaryIds, IndexTable, CopyTable];
const WDB6: &[Section] = &[
    Descriptors, Records, Strings, OffsetMap, SecondaryIds, IndexTable, CopyTable, CommonData,
];
const WDC1: &[Section] = &[
    Descriptors, Records, Strings, OffsetMap, IndexTable, CopyTable, ColumnMeta, PalletData,
    SparseData, Relationship,
];
const WDC2: &[Section] = &[
    Descriptors, ColumnMeta, PalletData, SparseData, Records, Strings, OffsetMap, IndexTable,
    CopyTable, Relationship,
];
const WCH5: &[Section] = &[CacheOffsetMap, Records, Strings, IndexTable];
const WCH7: &[Section] = &[CacheOffsetMap, Records, Strings, CacheTable, IndexTable];

static SPECS: [VariantSpec; 10] = [
    VariantSpec {
        signature: Signature::Wdbc,
        family: Family::Legacy,
        sections: LEGACY,
        relative_strings: false,
        tail_anchored: false,
        extended_descriptors: false,
    },
    VariantSpec {
        signature: Signature::Wdb2,
        family: Family::Legacy,
        sections: WDB2,
        relative_strings: false,
        tail_anchored: false,
        extended_descriptors: false,
    },
    VariantSpec {
        signature: Signature::Wdb5,
        family: Family::Aligned,
        sections: WDB5,
        relative_strings: false,
        tail_anchored: true,
        extended_descriptors: false,
    },
    VariantSpec {
        signature: Signature::Wdb6,
        family: Family::Aligned,
        sections: WDB6,
        relative_strings: false,
        tail_anchored: true,
        extended_descriptors: false,
    },
    VariantSpec {
        signature: Signature::Wdc1,
        family: Family::Packed,
        sections: WDC1,
        relative_strings: false,
        tail_anchored: false,
        extended_descriptors: false,
    },
    VariantSpec {
        signature: Signature::Wdc2,
        family: Family::Packed,
        sections: WDC2,
        relative_strings: true,
        tail_anchored: false,
        extended_descriptors: false,
    },
    VariantSpec {
        signature: Signature::Wdc3,
        family: Family::Packed,
        sections: WDC2,
        relative_strings: true,
        tail_anchored: false,
        extended_descriptors: true,
    },
    VariantSpec {
        signature: Signature::Wch5,
        family: Family::Aligned,
        sections: WCH5,
        relative_strings: false,
        tail_anchored: true,
        extended_descriptors: false,
    },
    VariantSpec {
        signature: Signature::Wch7,
        family: Family::Aligned,
        sections: WCH7,
        relative_strings: false,
        tail_anchored: true,
        extended_descriptors: false,
    },
    VariantSpec {
        signature: Signature::Wch8,
        family: Family::Aligned,
        sections: WCH7,
        relative_strings: false,
        tail_anchored: true,
        extended_descriptors: false,
    },
];

impl VariantSpec {
    #[must_use]
    pub fn of(signature: Signature) -> &'static VariantSpec {
        let index = Signature::ALL
            .iter()
            .position(|s| *s == signature)
            .unwrap_or_default();
        &SPECS[index]
    }

    #[must_use]
    pub fn has(&self, section: Section) -> bool {
        self.sections.contains(&section)
    }
}
