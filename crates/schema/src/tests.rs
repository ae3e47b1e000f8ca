use super::*;
use anyhow::Result;

fn spell_schema() -> Result<Schema> {
    Ok(Schema::new(
        "Spell",
        vec![
            Field::new("ID", FieldType::Int32).key(),
            Field::new("Name", FieldType::String),
            Field::new("Effects", FieldType::UInt16).array(3),
            Field::new("Speed", FieldType::Float).default_value("1.5"),
        ],
    )?)
}

// -------------------- Types --------------------

#[test]
fn type_names_parse_case_insensitively() -> Result<()> {
    assert_eq!("Int32".parse::<FieldType>()?, FieldType::Int32);
    assert_eq!("ushort".parse::<FieldType>()?, FieldType::UInt16);
    assert_eq!("single".parse::<FieldType>()?, FieldType::Float);
    assert_eq!("LOC".parse::<FieldType>()?, FieldType::Loc);
    assert_eq!(
        "decimal".parse::<FieldType>(),
        Err(SchemaError::UnknownType("decimal".into()))
    );
    Ok(())
}

#[test]
fn natural_sizes() {
    assert_eq!(FieldType::UInt8.natural_size(), 1);
    assert_eq!(FieldType::Int16.natural_size(), 2);
    assert_eq!(FieldType::String.natural_size(), 4);
    assert_eq!(FieldType::UInt64.natural_bits(), 64);
    assert_eq!(FieldType::Loc.natural_size(), 68);
    assert!(FieldType::Float.is_small_numeric());
    assert!(!FieldType::Int64.is_small_numeric());
}

// -------------------- Values --------------------

#[test]
fn bits_round_trip_through_every_numeric_type() {
    let samples = [
        Value::I8(-5),
        Value::U8(250),
        Value::I16(-30000),
        Value::U16(65535),
        Value::I32(i32::MIN),
        Value::U32(u32::MAX),
        Value::I64(-1),
        Value::U64(u64::MAX),
        Value::F32(-0.25),
    ];
    for v in samples {
        let bits = v.to_bits().unwrap();
        assert_eq!(Value::from_bits(v.ty(), bits), Some(v));
    }
}

#[test]
fn signed_bits_are_zero_extended() {
    assert_eq!(Value::I8(-1).to_bits(), Some(0xFF));
    assert_eq!(Value::I32(-1).to_bits(), Some(0xFFFF_FFFF));
}

#[test]
fn float_equality_is_bitwise() {
    assert_eq!(Value::F32(f32::NAN), Value::F32(f32::NAN));
    assert_ne!(Value::F32(0.0), Value::F32(-0.0));
    assert_ne!(Value::I32(1), Value::U32(1));
}

#[test]
fn parse_defaults() {
    assert_eq!(Value::parse(FieldType::Int32, ""), Some(Value::I32(0)));
    assert_eq!(Value::parse(FieldType::UInt8, " 7 "), Some(Value::U8(7)));
    assert_eq!(Value::parse(FieldType::Float, "2.5"), Some(Value::F32(2.5)));
    assert_eq!(Value::parse(FieldType::String, "x"), Some(Value::Str("x".into())));
    assert_eq!(Value::parse(FieldType::UInt8, "300"), None);
}

// -------------------- Schema --------------------

#[test]
fn columns_flatten_arrays() -> Result<()> {
    let schema = spell_schema()?;
    let names: Vec<&str> = schema.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["ID", "Name", "Effects_0", "Effects_1", "Effects_2", "Speed"]);
    assert_eq!(schema.field_columns(2), 2..5);
    assert_eq!(schema.key_column(), 0);
    Ok(())
}

#[test]
fn loc_expands_to_locales_and_mask() -> Result<()> {
    let schema = Schema::new(
        "Area",
        vec![
            Field::new("ID", FieldType::UInt32),
            Field::new("Title", FieldType::Loc),
        ],
    )?;
    assert_eq!(schema.columns().len(), 1 + 17);
    assert_eq!(schema.columns()[1].name, "Title_enUS");
    assert_eq!(schema.columns()[17].name, "Title_mask");
    assert_eq!(schema.columns()[17].ty, FieldType::UInt32);
    Ok(())
}

#[test]
fn key_defaults_to_first_field() -> Result<()> {
    let schema = Schema::new(
        "T",
        vec![
            Field::new("Name", FieldType::String),
            Field::new("ID", FieldType::Int32).key(),
        ],
    )?;
    assert_eq!(schema.key_field(), 1);
    assert_eq!(schema.key_column(), 1);

    let unmarked = Schema::new("T", vec![Field::new("A", FieldType::UInt32)])?;
    assert_eq!(unmarked.key_field(), 0);
    Ok(())
}

#[test]
fn invalid_schemas_are_rejected() {
    assert_eq!(Schema::new("T", vec![]), Err(SchemaError::NoFields));
    assert!(matches!(
        Schema::new("T", vec![Field::new("ID", FieldType::String)]),
        Err(SchemaError::BadKey(_))
    ));
    assert!(matches!(
        Schema::new(
            "T",
            vec![Field::new("ID", FieldType::Int32), Field::new("id", FieldType::Int8)]
        ),
        Err(SchemaError::DuplicateField(_))
    ));
    assert!(matches!(
        Schema::new(
            "T",
            vec![
                Field::new("ID", FieldType::Int32),
                Field::new("X", FieldType::UInt8).default_value("-1")
            ]
        ),
        Err(SchemaError::InvalidDefault { .. })
    ));
    assert!(matches!(
        Schema::new(
            "T",
            vec![Field::new("ID", FieldType::Int32), Field::new("X", FieldType::UInt8).array(0)]
        ),
        Err(SchemaError::EmptyArray(_))
    ));
}

#[test]
fn push_field_extends_columns() -> Result<()> {
    let mut schema = spell_schema()?;
    schema.push_field(Field::new("RelationshipData", FieldType::UInt32).relationship())?;
    assert_eq!(schema.relationship_field(), Some(4));
    assert_eq!(schema.columns().last().map(|c| c.name.as_str()), Some("RelationshipData"));
    assert!(schema.push_field(Field::new("name", FieldType::Int8)).is_err());
    Ok(())
}

#[test]
fn field_default_uses_declared_text() -> Result<()> {
    let schema = spell_schema()?;
    assert_eq!(schema.fields()[3].default()?, Value::F32(1.5));
    assert_eq!(schema.fields()[2].default()?, Value::U16(0));
    Ok(())
}
