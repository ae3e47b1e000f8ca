use crate::column::{ColumnDescriptor, ColumnMeta, ColumnPlan, CompressionKind};
use crate::descriptor::FieldDescriptor;
use crate::error::FormatError;
use anyhow::Result;
use bitstream::BitStream;
use schema::{Field, FieldType, Value};

fn bits_of(values: &[Value]) -> Vec<u64> {
    values.iter().map(|v| v.to_bits().unwrap()).collect()
}

/// Packs `rows` through `plan` one record after another, then decodes each
/// record through the descriptor rebuilt from the plan's metadata.
fn pack_and_unpack(mut plan: ColumnPlan, rows: &[(i32, Vec<Value>)]) -> Result<Vec<Vec<Value>>> {
    for (id, values) in rows {
        match plan.kind {
            CompressionKind::Sparse => plan.observe_sparse(*id, &values[0]),
            _ => plan.observe(&bits_of(values)),
        }
    }
    let record_bits = u64::from(plan.record_bits());

    let mut stream = BitStream::new();
    for (i, (_, values)) in rows.iter().enumerate() {
        stream.seek_bits(i as u64 * record_bits);
        plan.encode(&mut stream, &bits_of(values))?;
    }
    let bytes = stream.into_bytes();

    let meta = plan.meta(0)?;
    let mut desc = ColumnDescriptor::new(meta, Some(&FieldDescriptor::for_width(plan.element_bits, 0)));
    desc.palette = plan.palette.clone();
    desc.sparse = plan.sparse.iter().copied().collect();

    let mut reader = BitStream::from_bytes(bytes);
    let mut out = Vec::new();
    for (i, (id, _)) in rows.iter().enumerate() {
        reader.seek_bits(i as u64 * record_bits);
        let raw = desc.decode(&mut reader, *id)?;
        out.push(raw.into_iter().map(|b| Value::from_bits(plan.ty, b).unwrap()).collect());
    }
    Ok(out)
}

fn scalar_rows(values: &[Value]) -> Vec<(i32, Vec<Value>)> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (i as i32 + 1, vec![v.clone()]))
        .collect()
}

fn expected(rows: &[(i32, Vec<Value>)]) -> Vec<Vec<Value>> {
    rows.iter().map(|(_, v)| v.clone()).collect()
}

// -------------------- Compression kinds --------------------

#[test]
fn compression_codes_roundtrip() {
    for code in 0..=5u32 {
        let kind = CompressionKind::try_from(code).unwrap();
        assert_eq!(kind.code(), code);
    }
    assert!(matches!(
        CompressionKind::try_from(6u32),
        Err(FormatError::UnknownCompression(6))
    ));
}

#[test]
fn column_meta_roundtrips_on_disk() -> Result<()> {
    let meta = ColumnMeta {
        record_offset: 37,
        size: 11,
        additional_data_size: 16,
        kind: CompressionKind::SignedImmediate,
        bit_offset: 5,
        bit_width: 11,
        cardinality: 0,
    };
    let mut bytes = Vec::new();
    meta.write_to(&mut bytes)?;
    assert_eq!(bytes.len(), 24);
    assert_eq!(ColumnMeta::read_from(&mut bytes.as_slice())?, meta);
    Ok(())
}

// -------------------- Inverse laws --------------------

#[test]
fn none_columns_keep_full_width() -> Result<()> {
    let field = Field::new("Stats", FieldType::Int32).array(2);
    let plan = ColumnPlan::new(&field, CompressionKind::None, 0);
    let rows = vec![
        (1, vec![Value::I32(i32::MIN), Value::I32(-1)]),
        (2, vec![Value::I32(0), Value::I32(i32::MAX)]),
    ];
    assert_eq!(pack_and_unpack(plan, &rows)?, expected(&rows));
    Ok(())
}

#[test]
fn immediate_width_covers_the_largest_value() -> Result<()> {
    let field = Field::new("Level", FieldType::UInt32);
    let mut plan = ColumnPlan::new(&field, CompressionKind::Immediate, 0);
    plan.observe(&[0]);
    plan.observe(&[0x1_FFFF]);
    assert_eq!(plan.bit_width, 17);

    let plan = ColumnPlan::new(&field, CompressionKind::Immediate, 0);
    let rows = scalar_rows(&[Value::U32(0), Value::U32(0x1_FFFF), Value::U32(255)]);
    assert_eq!(pack_and_unpack(plan, &rows)?, expected(&rows));
    Ok(())
}

#[test]
fn signed_immediate_keeps_negative_values() -> Result<()> {
    let field = Field::new("Offset", FieldType::Int32);
    let mut plan = ColumnPlan::new(&field, CompressionKind::SignedImmediate, 0);
    plan.observe(&[Value::I32(-1000).to_bits().unwrap()]);
    plan.observe(&[Value::I32(1000).to_bits().unwrap()]);
    assert_eq!(plan.bit_width, 11);

    let plan = ColumnPlan::new(&field, CompressionKind::SignedImmediate, 0);
    let rows = scalar_rows(&[Value::I32(-1000), Value::I32(1000), Value::I32(0), Value::I32(-1)]);
    assert_eq!(pack_and_unpack(plan, &rows)?, expected(&rows));

    let narrow = Field::new("Delta", FieldType::Int16);
    let plan = ColumnPlan::new(&narrow, CompressionKind::SignedImmediate, 0);
    let rows = scalar_rows(&[Value::I16(i16::MIN), Value::I16(7)]);
    assert_eq!(pack_and_unpack(plan, &rows)?, expected(&rows));
    Ok(())
}

#[test]
fn pallet_stores_distinct_values_once() -> Result<()> {
    let field = Field::new("Color", FieldType::UInt32);
    let mut plan = ColumnPlan::new(&field, CompressionKind::Pallet, 0);
    for v in [0xAAu64, 0xBB, 0xAA] {
        plan.observe(&[v]);
    }
    assert_eq!(plan.palette.len(), 2);
    assert_eq!(plan.bit_width, 1);
    assert_eq!(plan.additional_data_size(), 8);

    let mut stream = BitStream::new();
    for (i, v) in [0xAAu64, 0xBB, 0xAA].iter().enumerate() {
        stream.seek_bits(i as u64);
        plan.encode(&mut stream, &[*v])?;
    }
    // Indices 0, 1, 0 in the low three bits.
    assert_eq!(stream.into_bytes(), vec![0b010]);

    let plan = ColumnPlan::new(&field, CompressionKind::Pallet, 0);
    let rows = scalar_rows(&[Value::U32(0xAA), Value::U32(0xBB), Value::U32(0xAA)]);
    assert_eq!(pack_and_unpack(plan, &rows)?, expected(&rows));
    Ok(())
}

#[test]
fn pallet_array_stores_whole_tuples() -> Result<()> {
    let field = Field::new("Rgb", FieldType::UInt8).array(3);
    let plan = ColumnPlan::new(&field, CompressionKind::PalletArray, 0);
    let rgb = |r: u8, g: u8, b: u8| vec![Value::U8(r), Value::U8(g), Value::U8(b)];
    let rows = vec![
        (1, rgb(255, 0, 0)),
        (2, rgb(0, 255, 0)),
        (3, rgb(255, 0, 0)),
        (4, rgb(0, 0, 255)),
    ];

    let mut probe = ColumnPlan::new(&field, CompressionKind::PalletArray, 0);
    for (_, values) in &rows {
        probe.observe(&bits_of(values));
    }
    let meta = probe.meta(0)?;
    assert_eq!(meta.cardinality, 3);
    assert_eq!(meta.bit_width, 2);
    assert_eq!(meta.additional_data_size, 3 * 12);

    assert_eq!(pack_and_unpack(plan, &rows)?, expected(&rows));
    Ok(())
}

#[test]
fn sparse_columns_fall_back_to_their_default() -> Result<()> {
    let field = Field::new("Flags", FieldType::Int32);
    let plan = ColumnPlan::new(&field, CompressionKind::Sparse, 5);
    let rows = scalar_rows(&[Value::I32(5), Value::I32(-9), Value::I32(5), Value::I32(0)]);

    let mut probe = plan.clone();
    for (id, values) in &rows {
        probe.observe_sparse(*id, &values[0]);
    }
    assert_eq!(probe.record_bits(), 0);
    assert_eq!(probe.sparse.len(), 2, "only ids 2 and 4 differ from the default");
    assert_eq!(probe.meta(0)?.bit_offset, 5);

    assert_eq!(pack_and_unpack(plan, &rows)?, expected(&rows));
    Ok(())
}

#[test]
fn palette_index_out_of_range_is_corrupt() {
    let meta = ColumnMeta {
        kind: CompressionKind::Pallet,
        bit_width: 2,
        size: 2,
        ..ColumnMeta::default()
    };
    let mut desc = ColumnDescriptor::new(meta, None);
    desc.palette = vec![vec![1, 0, 0, 0]];
    let mut stream = BitStream::from_bytes(vec![0b11]);
    let err = desc.decode(&mut stream, 1).unwrap_err();
    assert!(err.is_format());
}
