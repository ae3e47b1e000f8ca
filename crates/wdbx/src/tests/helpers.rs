use crate::*;

pub fn init_for_tests() {
    use std::sync::Once;
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wdbx=debug"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

/// Id, a signed byte, a 16-bit unsigned, a float, a string and a 2-element array.
pub fn item_schema() -> Schema {
    Schema::new(
        "Item",
        vec![
            Field::new("ID", FieldType::Int32).key(),
            Field::new("Quality", FieldType::Int8),
            Field::new("Level", FieldType::UInt16),
            Field::new("Scale", FieldType::Float),
            Field::new("Name", FieldType::String),
            Field::new("Stats", FieldType::Int32).array(2),
        ],
    )
    .unwrap()
}

pub fn item_row(id: i32, quality: i8, level: u16, name: &str) -> Vec<Value> {
    vec![
        Value::I32(id),
        Value::I8(quality),
        Value::U16(level),
        Value::F32(level as f32 / 4.0),
        Value::Str(name.to_string()),
        Value::I32(id * 10),
        Value::I32(-id),
    ]
}

pub fn sample_items(schema: Schema, signature: Signature) -> TableBuilder {
    Table::builder(schema, signature)
        .row(item_row(3, -2, 60, "Hearthstone"))
        .row(item_row(7, 4, 1, "Linen Cloth"))
        .row(item_row(12, 0, 300, ""))
        .row(item_row(40, 127, 65535, "Linen Cloth"))
}

pub fn roundtrip(table: &Table) -> Result<Table> {
    roundtrip_with(table, &DecodeOptions::default())
}

pub fn roundtrip_with(table: &Table, opts: &DecodeOptions) -> Result<Table> {
    let bytes = encode_to_vec(table, &EncodeOptions::default())?;
    decode_bytes(&bytes, table.schema(), opts)
}

/// Rows as `(id, values)` sorted by id.
pub fn sorted_rows(table: &Table) -> Vec<(i32, Vec<Value>)> {
    let mut rows: Vec<_> = table.rows().map(|r| (r.id, r.values.clone())).collect();
    rows.sort_by_key(|(id, _)| *id);
    rows
}

pub fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

pub fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
