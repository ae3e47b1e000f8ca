//! # Schema
//!
//! The table description handed to the codec before decoding: field names,
//! declared types, array sizes, which field is the id, optional defaults and
//! the relationship marker. The codec never infers any of this from data.
//!
//! A schema *field* may span several *columns*: arrays expand to one column
//! per element and the legacy localised-string type `loc` expands to sixteen
//! string columns plus a mask. Rows store one [`Value`] per column.
//!
//! ```text
//! Field  ID:int32 | Name:string | Flags:uint32[2] | Title:loc
//! Column 0          1             2        3        4 .. 19, 20 (mask)
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::str::FromStr;

use thiserror::Error;

/// Locale suffixes used when expanding a `loc` field.
pub const LOCALES: [&str; 16] = [
    "enUS", "koKR", "frFR", "deDE", "zhCN", "zhTW", "esES", "esMX", "ruRU", "jaJP", "ptPT",
    "itIT", "unk12", "unk13", "unk14", "unk15",
];

/// Errors raised while building a schema or parsing values against it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema has no fields")]
    NoFields,

    #[error("duplicate field name {0:?}")]
    DuplicateField(String),

    #[error("unknown field type {0:?}")]
    UnknownType(String),

    #[error("field {0:?} has array size 0")]
    EmptyArray(String),

    #[error("key field {0:?} must be a scalar int32 or uint32")]
    BadKey(String),

    #[error("no field named {0:?}")]
    NoSuchField(String),

    #[error("default {value:?} is not a valid {ty} for field {field:?}")]
    InvalidDefault {
        field: String,
        ty: FieldType,
        value: String,
    },
}

// -------------------- Types --------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    String,
    /// Sixteen localised strings followed by a `u32` mask.
    Loc,
}

impl FieldType {
    /// Bytes one element occupies in an uncompressed record. Strings are a
    /// 4-byte block offset.
    #[must_use]
    pub fn natural_size(self) -> usize {
        match self {
            FieldType::Int8 | FieldType::UInt8 => 1,
            FieldType::Int16 | FieldType::UInt16 => 2,
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float | FieldType::String => 4,
            FieldType::Int64 | FieldType::UInt64 => 8,
            FieldType::Loc => 4 * (LOCALES.len() + 1),
        }
    }

    #[must_use]
    pub fn natural_bits(self) -> u32 {
        self.natural_size() as u32 * 8
    }

    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64
        )
    }

    #[must_use]
    pub fn is_string(self) -> bool {
        matches!(self, FieldType::String | FieldType::Loc)
    }

    /// Numeric types (including `Float`) that fit in 4 bytes.
    #[must_use]
    pub fn is_small_numeric(self) -> bool {
        !self.is_string() && self.natural_size() <= 4
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.to_ascii_lowercase().as_str() {
            "sbyte" | "int8" => FieldType::Int8,
            "byte" | "uint8" => FieldType::UInt8,
            "short" | "int16" => FieldType::Int16,
            "ushort" | "uint16" => FieldType::UInt16,
            "int" | "int32" => FieldType::Int32,
            "uint" | "uint32" => FieldType::UInt32,
            "long" | "int64" => FieldType::Int64,
            "ulong" | "uint64" => FieldType::UInt64,
            "float" | "single" => FieldType::Float,
            "string" => FieldType::String,
            "loc" => FieldType::Loc,
            _ => return Err(SchemaError::UnknownType(s.to_string())),
        };
        Ok(ty)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Int8 => "int8",
            FieldType::UInt8 => "uint8",
            FieldType::Int16 => "int16",
            FieldType::UInt16 => "uint16",
            FieldType::Int32 => "int32",
            FieldType::UInt32 => "uint32",
            FieldType::Int64 => "int64",
            FieldType::UInt64 => "uint64",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Loc => "loc",
        };
        f.write_str(name)
    }
}

// -------------------- Values --------------------

/// A typed cell. Floats compare and hash by bit pattern so rows can be
/// grouped by content.
#[derive(Debug, Clone)]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    Str(String),
}

impl Value {
    #[must_use]
    pub fn ty(&self) -> FieldType {
        match self {
            Value::I8(_) => FieldType::Int8,
            Value::U8(_) => FieldType::UInt8,
            Value::I16(_) => FieldType::Int16,
            Value::U16(_) => FieldType::UInt16,
            Value::I32(_) => FieldType::Int32,
            Value::U32(_) => FieldType::UInt32,
            Value::I64(_) => FieldType::Int64,
            Value::U64(_) => FieldType::UInt64,
            Value::F32(_) => FieldType::Float,
            Value::Str(_) => FieldType::String,
        }
    }

    /// The zero value of a column type.
    #[must_use]
    pub fn zero(ty: FieldType) -> Value {
        match ty {
            FieldType::String | FieldType::Loc => Value::Str(String::new()),
            _ => Value::from_bits(ty, 0).unwrap_or(Value::U32(0)),
        }
    }

    /// Little-endian bit pattern of a numeric value, zero-extended to 64 bits.
    #[must_use]
    pub fn to_bits(&self) -> Option<u64> {
        let bits = match self {
            Value::I8(v) => u64::from(*v as u8),
            Value::U8(v) => u64::from(*v),
            Value::I16(v) => u64::from(*v as u16),
            Value::U16(v) => u64::from(*v),
            Value::I32(v) => u64::from(*v as u32),
            Value::U32(v) => u64::from(*v),
            Value::I64(v) => *v as u64,
            Value::U64(v) => *v,
            Value::F32(v) => u64::from(v.to_bits()),
            Value::Str(_) => return None,
        };
        Some(bits)
    }

    /// Rebuilds a numeric value from its bit pattern, truncating to the type.
    #[must_use]
    pub fn from_bits(ty: FieldType, bits: u64) -> Option<Value> {
        let v = match ty {
            FieldType::Int8 => Value::I8(bits as u8 as i8),
            FieldType::UInt8 => Value::U8(bits as u8),
            FieldType::Int16 => Value::I16(bits as u16 as i16),
            FieldType::UInt16 => Value::U16(bits as u16),
            FieldType::Int32 => Value::I32(bits as u32 as i32),
            FieldType::UInt32 => Value::U32(bits as u32),
            FieldType::Int64 => Value::I64(bits as i64),
            FieldType::UInt64 => Value::U64(bits),
            FieldType::Float => Value::F32(f32::from_bits(bits as u32)),
            FieldType::String | FieldType::Loc => return None,
        };
        Some(v)
    }

    /// Integer view, used for ids.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(i64::from(*v)),
            Value::U8(v) => Some(i64::from(*v)),
            Value::I16(v) => Some(i64::from(*v)),
            Value::U16(v) => Some(i64::from(*v)),
            Value::I32(v) => Some(i64::from(*v)),
            Value::U32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            Value::U64(v) => i64::try_from(*v).ok(),
            Value::F32(_) | Value::Str(_) => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Parses `text` as a value of `ty`. An empty string parses as zero.
    pub fn parse(ty: FieldType, text: &str) -> Option<Value> {
        if ty.is_string() {
            return Some(Value::Str(text.to_string()));
        }
        let text = if text.trim().is_empty() { "0" } else { text.trim() };
        let v = match ty {
            FieldType::Int8 => Value::I8(text.parse().ok()?),
            FieldType::UInt8 => Value::U8(text.parse().ok()?),
            FieldType::Int16 => Value::I16(text.parse().ok()?),
            FieldType::UInt16 => Value::U16(text.parse().ok()?),
            FieldType::Int32 => Value::I32(text.parse().ok()?),
            FieldType::UInt32 => Value::U32(text.parse().ok()?),
            FieldType::Int64 => Value::I64(text.parse().ok()?),
            FieldType::UInt64 => Value::U64(text.parse().ok()?),
            FieldType::Float => Value::F32(text.parse().ok()?),
            FieldType::String | FieldType::Loc => return None,
        };
        Some(v)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Str(_), _) | (_, Value::Str(_)) => false,
            _ => self.ty() == other.ty() && self.to_bits() == other.to_bits(),
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty().hash(state);
        match self {
            Value::Str(s) => s.hash(state),
            other => other.to_bits().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I8(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// One logical record: its id and one value per schema column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: i32,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(id: i32, values: Vec<Value>) -> Self {
        Self { id, values }
    }
}

// -------------------- Fields --------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub array_size: usize,
    pub default: Option<String>,
    pub is_key: bool,
    pub relationship: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            array_size: 1,
            default: None,
            is_key: false,
            relationship: false,
        }
    }

    #[must_use]
    pub fn array(mut self, size: usize) -> Self {
        self.array_size = size;
        self
    }

    #[must_use]
    pub fn default_value(mut self, text: impl Into<String>) -> Self {
        self.default = Some(text.into());
        self
    }

    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Marks the field that carries relationship data.
    #[must_use]
    pub fn relationship(mut self) -> Self {
        self.relationship = true;
        self
    }

    /// Number of columns this field expands to.
    #[must_use]
    pub fn column_count(&self) -> usize {
        match self.ty {
            FieldType::Loc => (LOCALES.len() + 1) * self.array_size,
            _ => self.array_size,
        }
    }

    /// The declared default, or zero when none is declared.
    pub fn default(&self) -> Result<Value, SchemaError> {
        let text = self.default.as_deref().unwrap_or("");
        let ty = match self.ty {
            FieldType::Loc => FieldType::String,
            ty => ty,
        };
        Value::parse(ty, text).ok_or_else(|| SchemaError::InvalidDefault {
            field: self.name.clone(),
            ty: self.ty,
            value: text.to_string(),
        })
    }
}

/// A flattened schema column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: FieldType,
    pub field: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    fields: Vec<Field>,
    key: usize,
    columns: Vec<Column>,
    starts: Vec<usize>,
}

impl Schema {
    /// Builds a schema. The key is the field marked with [`Field::key`], or
    /// the first field when none is marked.
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::NoFields);
        }
        for (i, f) in fields.iter().enumerate() {
            if f.array_size == 0 {
                return Err(SchemaError::EmptyArray(f.name.clone()));
            }
            if fields[..i].iter().any(|o| o.name.eq_ignore_ascii_case(&f.name)) {
                return Err(SchemaError::DuplicateField(f.name.clone()));
            }
            f.default()?;
        }
        let key = fields.iter().position(|f| f.is_key).unwrap_or(0);
        let kf = &fields[key];
        if kf.array_size != 1 || !matches!(kf.ty, FieldType::Int32 | FieldType::UInt32) {
            return Err(SchemaError::BadKey(kf.name.clone()));
        }

        let mut schema = Self {
            name: name.into(),
            fields,
            key,
            columns: Vec::new(),
            starts: Vec::new(),
        };
        schema.rebuild_columns();
        Ok(schema)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn field_index(&self, name: &str) -> Result<usize, SchemaError> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| SchemaError::NoSuchField(name.to_string()))
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Index of the id field.
    #[must_use]
    pub fn key_field(&self) -> usize {
        self.key
    }

    /// Index of the id column.
    #[must_use]
    pub fn key_column(&self) -> usize {
        self.starts[self.key]
    }

    /// The relationship-marked field, if any.
    #[must_use]
    pub fn relationship_field(&self) -> Option<usize> {
        self.fields.iter().position(|f| f.relationship)
    }

    /// Columns belonging to field `index`.
    #[must_use]
    pub fn field_columns(&self, index: usize) -> Range<usize> {
        let start = self.starts[index];
        start..start + self.fields[index].column_count()
    }

    /// Appends a field (used for synthetic columns discovered while decoding).
    pub fn push_field(&mut self, field: Field) -> Result<(), SchemaError> {
        if self.fields.iter().any(|o| o.name.eq_ignore_ascii_case(&field.name)) {
            return Err(SchemaError::DuplicateField(field.name));
        }
        field.default()?;
        self.fields.push(field);
        self.rebuild_columns();
        Ok(())
    }

    fn rebuild_columns(&mut self) {
        self.columns.clear();
        self.starts.clear();
        for (index, f) in self.fields.iter().enumerate() {
            self.starts.push(self.columns.len());
            for element in 0..f.array_size {
                let base = if f.array_size > 1 {
                    format!("{}_{}", f.name, element)
                } else {
                    f.name.clone()
                };
                if f.ty == FieldType::Loc {
                    for locale in LOCALES {
                        self.columns.push(Column {
                            name: format!("{base}_{locale}"),
                            ty: FieldType::String,
                            field: index,
                        });
                    }
                    self.columns.push(Column {
                        name: format!("{base}_mask"),
                        ty: FieldType::UInt32,
                        field: index,
                    });
                } else {
                    self.columns.push(Column {
                        name: base,
                        ty: f.ty,
                        field: index,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
