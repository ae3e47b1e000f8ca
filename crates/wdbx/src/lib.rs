//! # WDBx - client database tables
//!
//! Decoding and encoding of the fixed-schema binary tables a game client
//! ships its static data in. One file holds one table: a header selected by
//! a 4-byte signature, fixed or variable length records, and a pool of
//! NUL-terminated strings, plus optional tables that reconcile ids.
//!
//! The file does not describe its own columns. Every operation takes a
//! caller-supplied [`Schema`](schema::Schema) naming the fields, their
//! types and array sizes.
//!
//! ## Body sections per signature
//!
//! | Signature        | Sections after the header                                        |
//! |------------------|------------------------------------------------------------------|
//! | `WDBC`           | records, strings                                                 |
//! | `WDB2`           | [id index map], records, strings                                 |
//! | `WDB5`           | descriptors, records, strings / offset map, [secondary ids], [index], [copy] |
//! | `WDB6`           | as `WDB5`, then [common data]                                    |
//! | `WDC1`           | descriptors, records, strings / offset map, [index], [copy], column meta, pallet, sparse, [relationship] |
//! | `WDC2`, `WDC3`   | descriptors, column meta, pallet, sparse, records, strings / offset map, [index], [copy], [relationship] |
//! | `WCH5`           | [cache offset map], records, strings, [index]                     |
//! | `WCH7`, `WCH8`   | [cache offset map], records, strings, cache table, [index]        |
//!
//! Sections in brackets are present only when the header says so.
//! `WDB5`, `WDB6` and the cache files locate their trailing tables from the
//! end of the file.
//!
//! ## Round trips
//!
//! [`decode`] followed by [`encode`] reproduces the rows of every table and
//! re-derives every size and offset in the header. Storage choices that
//! cannot be recovered from the rows alone (field widths, compression,
//! hashes, flags) travel with the table in its [`TableLayout`].
//!
//! ```ignore
//! let schema = Schema::new("Item", fields)?;
//! let table = wdbx::read_file("Item.db2", &schema, &DecodeOptions::default())?;
//! wdbx::write_file("Item.out.db2", &table, &EncodeOptions::default())?;
//! ```

mod column;
mod common_data;
mod descriptor;
mod error;
mod format;
mod header;
mod layout;
mod options;
mod reader;
mod reconcile;
mod relationship;
mod table;
mod variant;
mod writer;

use std::fs::{rename, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use stringblock::StringBlock;
use tracing::debug;

pub use column::{ColumnMeta, CompressionKind};
pub use descriptor::FieldDescriptor;
pub use error::{Error, FormatError, Result};
pub use format::{HeaderFlags, Signature};
pub use header::TableHeader;
pub use schema::{Field, FieldType, Row, Schema, SchemaError, Value};
pub use options::{DecodeOptions, EncodeOptions, DEFAULT_MAX_INPUT_BYTES};
pub use table::{CacheCounterpart, ColumnSpec, Table, TableBuilder, TableLayout};

/// Decodes one table with default options.
pub fn decode<R: Read>(reader: R, schema: &Schema) -> Result<Table> {
    decode_with(reader, schema, &DecodeOptions::default())
}

/// Decodes one table. The whole stream is buffered first; streams longer
/// than [`DecodeOptions::max_input_bytes`] are rejected.
pub fn decode_with<R: Read>(reader: R, schema: &Schema, opts: &DecodeOptions) -> Result<Table> {
    let input = read_bounded(reader, opts.max_input_bytes)?;
    decode_bytes(&input, schema, opts)
}

/// Decodes one table held in memory.
pub fn decode_bytes(input: &[u8], schema: &Schema, opts: &DecodeOptions) -> Result<Table> {
    check_input_len(input, opts)?;
    let sections = reader::Sections::read(input, opts)?;
    reader::assemble(sections, input, schema)
}

/// Encodes `table` with default options.
pub fn encode<W: Write>(table: &Table, writer: W) -> Result<()> {
    encode_with(table, writer, &EncodeOptions::default())
}

pub fn encode_with<W: Write>(table: &Table, mut writer: W, opts: &EncodeOptions) -> Result<()> {
    let bytes = writer::encode_table(table, opts)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Encodes `table` into a fresh buffer.
pub fn encode_to_vec(table: &Table, opts: &EncodeOptions) -> Result<Vec<u8>> {
    writer::encode_table(table, opts)
}

/// Reads only the header.
pub fn read_header<R: Read>(mut reader: R) -> Result<TableHeader> {
    TableHeader::read_from(&mut reader)
}

/// Returns the string block of a table without decoding its records.
///
/// Offset-mapped tables keep their strings inside the records and yield an
/// empty block.
pub fn scan_strings(input: &[u8], opts: &DecodeOptions) -> Result<StringBlock> {
    check_input_len(input, opts)?;
    let sections = reader::Sections::read(input, opts)?;
    Ok(sections.strings)
}

/// Decodes the table stored at `path`.
pub fn read_file(path: impl AsRef<Path>, schema: &Schema, opts: &DecodeOptions) -> Result<Table> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let table = decode_with(file, schema, opts)?;
    debug!(path = %path.display(), rows = table.len(), "read table");
    Ok(table)
}

/// Writes `table` to `path`.
///
/// The table is encoded in memory, written to `<path>.tmp`, synced, then
/// renamed over `path`; a failed encode leaves any existing file untouched.
pub fn write_file(path: impl AsRef<Path>, table: &Table, opts: &EncodeOptions) -> Result<()> {
    let path = path.as_ref();
    let bytes = writer::encode_table(table, opts)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(tmp_path)?;
    if let Err(e) = file.write_all(&bytes).and_then(|()| file.sync_all()) {
        drop(file);
        let _ = std::fs::remove_file(tmp_path);
        return Err(e.into());
    }
    drop(file);
    rename(tmp_path, path)?;

    // Make the rename durable.
    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    debug!(path = %path.display(), bytes = bytes.len(), "wrote table");
    Ok(())
}

fn check_input_len(input: &[u8], opts: &DecodeOptions) -> Result<()> {
    if input.len() as u64 > opts.max_input_bytes {
        return Err(error::corrupt(format!(
            "input of {} bytes exceeds the {} byte limit",
            input.len(),
            opts.max_input_bytes
        )));
    }
    Ok(())
}

fn read_bounded<R: Read>(reader: R, limit: u64) -> Result<Vec<u8>> {
    let mut input = Vec::new();
    reader.take(limit.saturating_add(1)).read_to_end(&mut input)?;
    if input.len() as u64 > limit {
        return Err(error::corrupt(format!("input exceeds the {limit} byte limit")));
    }
    Ok(input)
}

#[cfg(test)]
mod tests;
