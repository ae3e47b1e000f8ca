use super::helpers::*;
use crate::*;
use anyhow::Result;

// -------------------- Builder --------------------

#[test]
fn builder_keeps_row_order_and_layout() -> Result<()> {
    let table = sample_items(item_schema(), Signature::Wdc3)
        .flags(HeaderFlags::INDEX_MAP)
        .compression("Level", CompressionKind::Immediate)
        .hashes(1, 2)
        .build()?;

    assert_eq!(table.len(), 4);
    assert_eq!(table.ids().collect::<Vec<_>>(), vec![3, 7, 12, 40]);
    assert_eq!(table.layout().flags, HeaderFlags::INDEX_MAP);
    assert_eq!(table.layout().compression[2].kind, CompressionKind::Immediate);
    assert_eq!(table.layout().section_count, 1);
    assert_eq!(table.header().signature, Signature::Wdc3);
    assert_eq!(table.header().record_count, 0);
    Ok(())
}

#[test]
fn builder_rejects_duplicate_ids() {
    let err = sample_items(item_schema(), Signature::Wdbc)
        .row(item_row(7, 0, 0, "again"))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateId { id: 7 }));
}

#[test]
fn builder_rejects_rows_that_do_not_fit_the_schema() {
    let err = Table::builder(item_schema(), Signature::Wdbc)
        .row(vec![Value::I32(1)])
        .build()
        .unwrap_err();
    assert!(err.is_schema_mismatch());

    let mut row = item_row(1, 0, 0, "x");
    row[2] = Value::U32(5);
    let err = Table::builder(item_schema(), Signature::Wdbc)
        .row(row)
        .build()
        .unwrap_err();
    assert!(err.is_schema_mismatch());
}

#[test]
fn compression_needs_a_bit_packed_signature() {
    let err = sample_items(item_schema(), Signature::Wdb5)
        .compression("Level", CompressionKind::Immediate)
        .build()
        .unwrap_err();
    assert!(err.is_schema_mismatch());
}

#[test]
fn compression_must_suit_the_field() {
    for (field, kind) in [
        ("Name", CompressionKind::Pallet),
        ("Name", CompressionKind::SignedImmediate),
        ("Stats", CompressionKind::Immediate),
        ("ID", CompressionKind::Sparse),
    ] {
        let err = sample_items(item_schema(), Signature::Wdc3)
            .compression(field, kind)
            .build()
            .unwrap_err();
        assert!(err.is_schema_mismatch(), "{field} {kind:?}");
    }
    assert!(sample_items(item_schema(), Signature::Wdc3)
        .compression("Stats", CompressionKind::PalletArray)
        .build()
        .is_ok());
}

#[test]
fn loc_fields_are_legacy_only() -> Result<()> {
    let schema = Schema::new(
        "Area",
        vec![Field::new("ID", FieldType::Int32), Field::new("Name", FieldType::Loc)],
    )?;
    assert!(Table::builder(schema.clone(), Signature::Wdbc).build().is_ok());
    assert!(Table::builder(schema, Signature::Wdb5)
        .build()
        .unwrap_err()
        .is_schema_mismatch());
    Ok(())
}

#[test]
fn common_data_needs_wdb6() {
    let err = sample_items(item_schema(), Signature::Wdb5)
        .common_data_from("Scale")
        .build()
        .unwrap_err();
    assert!(err.is_schema_mismatch());
}

#[test]
fn unknown_fields_are_rejected() {
    let err = sample_items(item_schema(), Signature::Wdc3)
        .compression("Durability", CompressionKind::Immediate)
        .build()
        .unwrap_err();
    assert!(err.is_schema_mismatch());
}

#[test]
fn sparse_default_comes_from_the_field_default() -> Result<()> {
    let schema = Schema::new(
        "Creature",
        vec![
            Field::new("ID", FieldType::Int32),
            Field::new("Faction", FieldType::Int32).default_value("35"),
        ],
    )?;
    let table = Table::builder(schema.clone(), Signature::Wdc2)
        .compression("Faction", CompressionKind::Sparse)
        .build()?;
    assert_eq!(table.layout().compression[1].sparse_default, 35);

    let table = Table::builder(schema, Signature::Wdc2)
        .compression("Faction", CompressionKind::Sparse)
        .sparse_default("Faction", -1)
        .build()?;
    assert_eq!(table.layout().compression[1].sparse_default, -1);
    Ok(())
}

// -------------------- Rows --------------------

#[test]
fn insert_replaces_in_place() -> Result<()> {
    let mut table = sample_items(item_schema(), Signature::Wdb5).build()?;
    let id = table.insert(item_row(7, 1, 2, "Wool Cloth"))?;
    assert_eq!(id, 7);
    assert_eq!(table.len(), 4);
    assert_eq!(table.ids().collect::<Vec<_>>(), vec![3, 7, 12, 40]);
    assert_eq!(table.value(7, "name").and_then(Value::as_str), Some("Wool Cloth"));

    table.insert(item_row(1, 1, 2, "Silk Cloth"))?;
    assert_eq!(table.ids().last(), Some(1));
    Ok(())
}

#[test]
fn remove_keeps_order_and_drops_aliases() -> Result<()> {
    let table = sample_items(item_schema(), Signature::Wdb5)
        .flags(HeaderFlags::OFFSET_MAP)
        .build()?;
    let mut bytes = encode_to_vec(&table, &EncodeOptions::default())?;
    alias_second_slot(&mut bytes, 3);

    let mut decoded = decode_bytes(&bytes, table.schema(), &DecodeOptions::default())?;
    assert_eq!(decoded.offset_aliases().get(&4), Some(&3));

    let removed = decoded.remove(3).unwrap();
    assert_eq!(removed.id, 3);
    assert!(decoded.offset_aliases().is_empty());
    assert_eq!(decoded.ids().collect::<Vec<_>>(), vec![7, 12, 40, 4]);
    assert!(decoded.remove(3).is_none());
    Ok(())
}

/// Points the offset-map slot after `min_id` at the same record as `min_id`.
fn alias_second_slot(bytes: &mut [u8], min_id: i32) {
    let header = read_header(&bytes[..]).unwrap();
    assert_eq!(header.min_id, min_id);
    let map = header.string_block_size as usize;
    let first: [u8; 6] = bytes[map..map + 6].try_into().unwrap();
    bytes[map + 6..map + 12].copy_from_slice(&first);
}

#[test]
fn value_looks_up_array_columns_by_name() -> Result<()> {
    let table = sample_items(item_schema(), Signature::Wdbc).build()?;
    assert_eq!(table.value(12, "Stats_0"), Some(&Value::I32(120)));
    assert_eq!(table.value(12, "Stats_1"), Some(&Value::I32(-12)));
    assert_eq!(table.value(12, "Stats"), None);
    assert_eq!(table.value(13, "Name"), None);
    Ok(())
}

#[test]
fn counterpart_describes_stored_fields() -> Result<()> {
    let table = sample_items(item_schema(), Signature::Wdb5)
        .flags(HeaderFlags::INDEX_MAP)
        .field_width("Stats", 16)
        .build()?;
    let counterpart = table.counterpart()?;
    assert_eq!(counterpart.flags, HeaderFlags::INDEX_MAP);
    assert_eq!(counterpart.id_index, 0);
    assert_eq!(counterpart.field_bits, vec![24, 16, 0, 0, 16]);
    Ok(())
}

#[test]
fn layout_check_catches_stale_layouts() -> Result<()> {
    let mut table = sample_items(item_schema(), Signature::Wdc1).build()?;
    table.layout_mut().compression.pop();
    let err = encode_to_vec(&table, &EncodeOptions::default()).unwrap_err();
    assert!(err.is_schema_mismatch());
    Ok(())
}
