use crate::descriptor::{bits_for_width, FieldDescriptor};
use crate::variant::{Family, Section, VariantSpec};
use crate::*;
use anyhow::Result;

fn populated(signature: Signature) -> TableHeader {
    TableHeader {
        signature,
        record_count: 10,
        field_count: 4,
        record_size: 16,
        string_block_size: 33,
        ..TableHeader::default()
    }
}

// -------------------- Signatures --------------------

#[test]
fn magic_and_names_agree() {
    for sig in Signature::ALL {
        assert_eq!(Signature::from_magic(sig.magic()), Some(sig));
        assert_eq!(&sig.magic().to_le_bytes(), sig.as_str().as_bytes());
        assert_eq!(sig.to_string(), sig.as_str());
    }
    assert_eq!(Signature::from_magic(u32::from_le_bytes(*b"WDBZ")), None);
}

#[test]
fn header_lengths_per_signature() -> Result<()> {
    let expected = [
        (Signature::Wdbc, 20),
        (Signature::Wdb2, 48),
        (Signature::Wdb5, 48),
        (Signature::Wdb6, 56),
        (Signature::Wdc1, 84),
        (Signature::Wdc2, 108),
        (Signature::Wdc3, 108),
        (Signature::Wch5, 48),
        (Signature::Wch7, 52),
        (Signature::Wch8, 52),
    ];
    for (sig, len) in expected {
        assert_eq!(sig.header_len(), len);
        let mut bytes = Vec::new();
        populated(sig).write_to(&mut bytes)?;
        assert_eq!(bytes.len() as u64, len, "{sig}");
    }
    Ok(())
}

// -------------------- Read / write --------------------

#[test]
fn base_block_survives_every_signature() -> Result<()> {
    for sig in Signature::ALL {
        let header = populated(sig);
        let mut bytes = Vec::new();
        header.write_to(&mut bytes)?;
        let back = TableHeader::read_from(&mut bytes.as_slice())?;
        assert_eq!(back, header, "{sig}");
    }
    Ok(())
}

#[test]
fn wdc3_header_roundtrips_every_field() -> Result<()> {
    let header = TableHeader {
        signature: Signature::Wdc3,
        record_count: 1,
        field_count: 2,
        record_size: 3,
        string_block_size: 4,
        table_hash: 5,
        layout_hash: 6,
        min_id: -7,
        max_id: 8,
        locale: 9,
        flags: HeaderFlags::OFFSET_MAP | HeaderFlags::RELATIONSHIP_DATA,
        id_index: 1,
        total_field_count: 11,
        packed_data_offset: 12,
        relationship_count: 13,
        column_meta_size: 14,
        sparse_data_size: 15,
        pallet_data_size: 16,
        section_count: 17,
        unknown1: 18,
        unknown2: 19,
        record_data_offset: 20,
        record_data_row_count: 21,
        record_data_string_size: 22,
        copy_table_size: 23,
        offset_map_offset: 24,
        index_size: 25,
        relationship_data_size: 26,
        ..TableHeader::default()
    };
    let mut bytes = Vec::new();
    header.write_to(&mut bytes)?;
    assert_eq!(TableHeader::read_from(&mut bytes.as_slice())?, header);
    Ok(())
}

#[test]
fn wch7_count_sits_before_the_string_block_size() -> Result<()> {
    let header = TableHeader {
        wch7_count: 3,
        build: 22_000,
        timestamp: 1_500_000_000,
        ..populated(Signature::Wch7)
    };
    let mut bytes = Vec::new();
    header.write_to(&mut bytes)?;
    assert_eq!(bytes[16..20], 3u32.to_le_bytes());
    assert_eq!(bytes[20..24], 33u32.to_le_bytes());
    assert_eq!(TableHeader::read_from(&mut bytes.as_slice())?, header);
    Ok(())
}

#[test]
fn index_map_forces_id_index_to_zero() -> Result<()> {
    let header = TableHeader {
        flags: HeaderFlags::INDEX_MAP,
        id_index: 3,
        ..populated(Signature::Wdb5)
    };
    let mut bytes = Vec::new();
    header.write_to(&mut bytes)?;
    let back = TableHeader::read_from(&mut bytes.as_slice())?;
    assert_eq!(back.id_index, 0);
    assert!(back.has_index_table());
    assert!(!back.has_offset_map());
    Ok(())
}

#[test]
fn id_span_counts_inclusive_range() {
    let mut header = TableHeader::new(Signature::Wdb5);
    assert_eq!(header.id_span(), 1);
    header.min_id = 10;
    header.max_id = 9;
    assert_eq!(header.id_span(), 0);
    header.min_id = -2;
    header.max_id = 2;
    assert_eq!(header.id_span(), 5);
}

#[test]
fn flags_debug_names_set_bits() {
    let flags = HeaderFlags::OFFSET_MAP | HeaderFlags::INDEX_MAP;
    assert_eq!(format!("{flags:?}"), "HeaderFlags(0x5 OFFSET_MAP | INDEX_MAP)");
    assert_eq!(format!("{:?}", HeaderFlags::NONE), "HeaderFlags(0x0)");
    assert_eq!(flags.without(HeaderFlags::OFFSET_MAP), HeaderFlags::INDEX_MAP);
}

// -------------------- Descriptors --------------------

#[test]
fn descriptor_bits_count_down_from_32() {
    for (bits, width) in [(0i16, 32u32), (16, 16), (24, 8), (8, 24), (-32, 64)] {
        let d = FieldDescriptor { bits, offset: 0 };
        assert_eq!(d.bit_width(), width);
        assert_eq!(bits_for_width(width), bits);
    }
    assert_eq!(FieldDescriptor::for_width(16, 6).byte_len(), 2);
}

// -------------------- Variants --------------------

#[test]
fn variants_order_their_sections() {
    let wdc2 = VariantSpec::of(Signature::Wdc2);
    assert_eq!(wdc2.family, Family::Packed);
    assert!(wdc2.relative_strings);
    let records = wdc2.sections.iter().position(|s| *s == Section::Records);
    let meta = wdc2.sections.iter().position(|s| *s == Section::ColumnMeta);
    assert!(meta < records, "WDC2 column tables precede record data");

    let wdc1 = VariantSpec::of(Signature::Wdc1);
    let records = wdc1.sections.iter().position(|s| *s == Section::Records);
    let meta = wdc1.sections.iter().position(|s| *s == Section::ColumnMeta);
    assert!(records < meta);
    assert!(!wdc1.relative_strings);

    assert!(VariantSpec::of(Signature::Wdb6).has(Section::CommonData));
    assert!(!VariantSpec::of(Signature::Wdb5).has(Section::CommonData));
    assert!(VariantSpec::of(Signature::Wch7).has(Section::CacheTable));
    assert!(!VariantSpec::of(Signature::Wch5).has(Section::CacheTable));
    assert!(VariantSpec::of(Signature::Wdc3).extended_descriptors);
    assert_eq!(VariantSpec::of(Signature::Wdbc).family, Family::Legacy);
    assert!(VariantSpec::of(Signature::Wdb5).tail_anchored);
}
