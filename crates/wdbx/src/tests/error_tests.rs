use super::helpers::*;
use crate::*;
use anyhow::Result;

fn id_only_schema() -> Schema {
    Schema::new("Ids", vec![Field::new("ID", FieldType::Int32)]).unwrap()
}

fn decode_default(bytes: &[u8], schema: &Schema) -> crate::Result<Table> {
    decode_bytes(bytes, schema, &DecodeOptions::default())
}

// -------------------- Format errors --------------------

#[test]
fn unknown_signature_is_named() {
    let mut bytes = b"WDBZ".to_vec();
    bytes.resize(64, 0);
    let err = decode_default(&bytes, &id_only_schema()).unwrap_err();
    match err {
        Error::Format(FormatError::UnknownSignature(sig)) => assert_eq!(sig, "WDBZ"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_compression_kind_is_rejected() -> Result<()> {
    let schema = Schema::new(
        "Levels",
        vec![
            Field::new("ID", FieldType::Int32),
            Field::new("Level", FieldType::UInt16),
        ],
    )?;
    let table = Table::builder(schema.clone(), Signature::Wdc3)
        .compression("Level", CompressionKind::Immediate)
        .row(vec![Value::I32(1), Value::U16(10)])
        .build()?;
    let mut bytes = encode_to_vec(&table, &EncodeOptions::default())?;

    // Header, two descriptors, the extra u32, then column metadata.
    let meta = 108 + 2 * 4 + 4;
    assert_eq!(read_u32(&bytes, meta + 8), CompressionKind::None.code());
    assert_eq!(read_u32(&bytes, meta + 24 + 8), CompressionKind::Immediate.code());
    write_u32(&mut bytes, meta + 8, 9);

    let err = decode_default(&bytes, &schema).unwrap_err();
    assert!(matches!(err, Error::Format(FormatError::UnknownCompression(9))));
    Ok(())
}

#[test]
fn truncated_streams_are_reported() -> Result<()> {
    let table = sample_items(item_schema(), Signature::Wdbc).build()?;
    let bytes = encode_to_vec(&table, &EncodeOptions::default())?;

    for cut in [10, 20, 30, bytes.len() - 3] {
        let err = decode_default(&bytes[..cut], table.schema()).unwrap_err();
        assert!(
            matches!(err, Error::Format(FormatError::Truncated(_))),
            "cut at {cut}: {err}"
        );
    }
    Ok(())
}

#[test]
fn truncated_tail_tables_are_reported() -> Result<()> {
    let table = sample_items(item_schema(), Signature::Wdb5)
        .flags(HeaderFlags::OFFSET_MAP)
        .build()?;
    let bytes = encode_to_vec(&table, &EncodeOptions::default())?;
    let err = decode_default(&bytes[..bytes.len() - 4], table.schema()).unwrap_err();
    assert!(err.is_format(), "{err}");
    Ok(())
}

#[test]
fn missing_cache_counterpart() -> Result<()> {
    let table = sample_items(item_schema(), Signature::Wch5).build()?;
    let bytes = encode_to_vec(&table, &EncodeOptions::default())?;
    let err = decode_default(&bytes, table.schema()).unwrap_err();
    assert!(matches!(
        err,
        Error::Format(FormatError::MissingCounterpart(Signature::Wch5))
    ));
    Ok(())
}

#[test]
fn oversized_inputs_are_rejected_before_parsing() -> Result<()> {
    let table = sample_items(item_schema(), Signature::Wdbc).build()?;
    let bytes = encode_to_vec(&table, &EncodeOptions::default())?;
    let opts = DecodeOptions {
        max_input_bytes: 64,
        ..DecodeOptions::default()
    };
    let err = decode_with(bytes.as_slice(), table.schema(), &opts).unwrap_err();
    assert!(err.is_format());

    let err = decode_bytes(&bytes, table.schema(), &opts).unwrap_err();
    assert!(err.is_format());
    Ok(())
}

#[test]
fn copy_of_a_missing_row_is_corrupt() -> Result<()> {
    let table = Table::builder(id_only_schema(), Signature::Wdb5)
        .copy_table(true)
        .row(vec![Value::I32(1)])
        .row(vec![Value::I32(2)])
        .build()?;
    let mut bytes = encode_to_vec(&table, &EncodeOptions::default())?;
    assert_eq!(read_header(bytes.as_slice())?.copy_table_size, 8);

    // The copy table is the last section: (alias, canonical).
    let canonical = bytes.len() - 4;
    assert_eq!(read_u32(&bytes, canonical), 1);
    write_u32(&mut bytes, canonical, 99);
    let err = decode_default(&bytes, table.schema()).unwrap_err();
    assert!(err.is_format(), "{err}");
    Ok(())
}

// -------------------- Id constraints --------------------

#[test]
fn duplicate_ids_without_copy_entries() -> Result<()> {
    let mut bytes = Vec::new();
    let header = TableHeader {
        record_count: 2,
        field_count: 1,
        record_size: 4,
        string_block_size: 1,
        ..TableHeader::new(Signature::Wdbc)
    };
    header.write_to(&mut bytes)?;
    bytes.extend_from_slice(&1i32.to_le_bytes());
    bytes.extend_from_slice(&1i32.to_le_bytes());
    bytes.push(0);

    let err = decode_default(&bytes, &id_only_schema()).unwrap_err();
    assert!(matches!(err, Error::DuplicateId { id: 1 }));
    Ok(())
}

#[test]
fn duplicate_index_table_ids() -> Result<()> {
    let table = Table::builder(item_schema(), Signature::Wdb5)
        .flags(HeaderFlags::INDEX_MAP)
        .row(item_row(5, 0, 0, "a"))
        .row(item_row(6, 0, 0, "b"))
        .build()?;
    let mut bytes = encode_to_vec(&table, &EncodeOptions::default())?;
    // The index table closes the file.
    let last = bytes.len() - 4;
    assert_eq!(read_u32(&bytes, last), 6);
    write_u32(&mut bytes, last, 5);

    let err = decode_default(&bytes, table.schema()).unwrap_err();
    assert!(matches!(err, Error::DuplicateId { id: 5 }));
    Ok(())
}

// -------------------- Schema mismatches --------------------

#[test]
fn field_count_disagreement() -> Result<()> {
    let table = sample_items(item_schema(), Signature::Wdbc).build()?;
    let bytes = encode_to_vec(&table, &EncodeOptions::default())?;
    let err = decode_default(&bytes, &id_only_schema()).unwrap_err();
    assert!(err.is_schema_mismatch(), "{err}");

    for sig in [Signature::Wdb5, Signature::Wdc3] {
        let table = sample_items(item_schema(), sig).build()?;
        let bytes = encode_to_vec(&table, &EncodeOptions::default())?;
        let err = decode_default(&bytes, &id_only_schema()).unwrap_err();
        assert!(err.is_schema_mismatch(), "{sig}: {err}");
    }
    Ok(())
}

#[test]
fn key_position_disagreement() -> Result<()> {
    let schema = Schema::new(
        "Pair",
        vec![
            Field::new("ID", FieldType::Int32),
            Field::new("Other", FieldType::Int32),
        ],
    )?;
    let table = Table::builder(schema, Signature::Wdb5)
        .row(vec![Value::I32(1), Value::I32(2)])
        .build()?;
    let bytes = encode_to_vec(&table, &EncodeOptions::default())?;

    let swapped = Schema::new(
        "Pair",
        vec![
            Field::new("ID", FieldType::Int32),
            Field::new("Other", FieldType::Int32).key(),
        ],
    )?;
    let err = decode_default(&bytes, &swapped).unwrap_err();
    assert!(err.is_schema_mismatch(), "{err}");
    Ok(())
}

#[test]
fn values_too_wide_for_their_field_fail_to_encode() -> Result<()> {
    let table = sample_items(item_schema(), Signature::Wdb5)
        .field_width("Stats", 8)
        .build()?;
    let err = encode_to_vec(&table, &EncodeOptions::default()).unwrap_err();
    assert!(err.is_schema_mismatch());
    Ok(())
}

#[test]
fn offset_mapped_common_strings_fail_to_encode() -> Result<()> {
    let schema = Schema::new(
        "Quest",
        vec![
            Field::new("ID", FieldType::Int32),
            Field::new("Title", FieldType::String).default_value("none"),
        ],
    )?;
    let table = Table::builder(schema, Signature::Wdb6)
        .flags(HeaderFlags::OFFSET_MAP)
        .common_data_from("Title")
        .row(vec![Value::I32(1), Value::Str("Kill ten boars".into())])
        .build()?;
    let err = encode_to_vec(&table, &EncodeOptions::default()).unwrap_err();
    assert!(err.is_schema_mismatch());
    Ok(())
}

// -------------------- Section sizes --------------------

fn bundle_schema() -> Schema {
    Schema::new(
        "Bundle",
        vec![
            Field::new("ID", FieldType::Int32),
            Field::new("Flags", FieldType::Int32),
            Field::new("Rgb", FieldType::UInt8).array(3),
            Field::new("ParentID", FieldType::UInt32).relationship(),
        ],
    )
    .unwrap()
}

fn bundle_bytes(sig: Signature) -> Result<Vec<u8>> {
    let rgb = |r: u8, g: u8, b: u8| [Value::U8(r), Value::U8(g), Value::U8(b)];
    let mut builder = Table::builder(bundle_schema(), sig)
        .flags(HeaderFlags::INDEX_MAP)
        .compression("Flags", CompressionKind::Sparse)
        .compression("Rgb", CompressionKind::PalletArray);
    for (id, flags, color, parent) in [
        (1, 0, rgb(255, 0, 0), 7u32),
        (2, 9, rgb(0, 255, 0), 0),
        (3, 0, rgb(255, 0, 0), 8),
    ] {
        let mut row = vec![Value::I32(id), Value::I32(flags)];
        row.extend(color);
        row.push(Value::U32(parent));
        builder = builder.row(row);
    }
    Ok(encode_to_vec(&builder.build()?, &EncodeOptions::default())?)
}

/// Start of column `i`'s metadata: header, three descriptors, the extra u32.
fn meta_pos(i: usize) -> usize {
    108 + 3 * 4 + 4 + 24 * i
}

#[test]
fn section_sizes_must_agree_with_column_metadata() -> Result<()> {
    let bytes = bundle_bytes(Signature::Wdc3)?;
    let schema = bundle_schema();
    assert_eq!(decode_default(&bytes, &schema)?.len(), 3);
    assert_eq!(read_u32(&bytes, meta_pos(1) + 4), 8, "one sparse override");
    assert_eq!(read_u32(&bytes, meta_pos(2) + 4), 2 * 12, "two rgb tuples");
    assert_eq!(read_u32(&bytes, meta_pos(2) + 20), 3);

    let mut patches: Vec<(&str, usize, u32)> = vec![
        ("sparse size far past the file", meta_pos(1) + 4, 0xFFFF_FFF8),
        ("sparse size not a whole pair", meta_pos(1) + 4, 12),
        ("pallet size short of its section", meta_pos(2) + 4, 12),
        ("pallet tuple width", meta_pos(2) + 20, 5),
        ("index table without its records", 100, 4),
    ];
    patches.push(("relationship block cut short", 104, 20));
    patches.push(("relationship block past the file", 104, 0x7FFF_FFFF));

    for (what, pos, value) in patches {
        let mut broken = bytes.clone();
        write_u32(&mut broken, pos, value);
        let err = decode_default(&broken, &schema).unwrap_err();
        assert!(err.is_format(), "{what}: {err}");
    }
    Ok(())
}

#[test]
fn oversized_sparse_metadata_fails_without_allocating() -> Result<()> {
    let mut bytes = bundle_bytes(Signature::Wdc3)?;
    write_u32(&mut bytes, meta_pos(1) + 4, 0xFFFF_FFF8);
    let err = decode_default(&bytes, &bundle_schema()).unwrap_err();
    assert!(matches!(err, Error::Format(FormatError::Corrupt(_))), "{err}");

    // The schema-free string scan walks the same sections.
    assert!(scan_strings(&bytes, &DecodeOptions::default()).unwrap_err().is_format());
    Ok(())
}

#[test]
fn index_size_must_cover_every_record() -> Result<()> {
    let bytes = bundle_bytes(Signature::Wdc2)?;
    assert_eq!(read_u32(&bytes, 100), 3 * 4);

    let mut broken = bytes.clone();
    write_u32(&mut broken, 100, 2 * 4);
    let err = decode_default(&broken, &bundle_schema()).unwrap_err();
    assert!(err.is_format(), "{err}");
    Ok(())
}

#[test]
fn relationship_block_must_be_consumed_exactly() -> Result<()> {
    let mut bytes = bundle_bytes(Signature::Wdc3)?;
    assert_eq!(read_u32(&bytes, 104), 12 + 2 * 8);

    // The relationship block closes the file; grow it by one unread entry.
    bytes.extend_from_slice(&[0u8; 8]);
    write_u32(&mut bytes, 104, 12 + 3 * 8);
    let err = decode_default(&bytes, &bundle_schema()).unwrap_err();
    assert!(matches!(err, Error::Format(FormatError::Corrupt(_))), "{err}");
    Ok(())
}
