//! # CLI - WDBx table inspector
//!
//! A REPL-style shell for looking inside client database tables without a
//! schema. Reads commands from stdin and prints results to stdout; logs go to
//! stderr. Works interactively or with commands piped in.
//!
//! ## Commands
//!
//! ```text
//! INFO path          Print the header of a table file
//! STRINGS path       List the string block as offset / text pairs
//! EXIT / QUIT        Leave the shell
//! ```
//!
//! ## Configuration
//!
//! ```text
//! WDBX_LOG           tracing filter directive    (default: "warn")
//! WDBX_MAX_INPUT_MB  largest file STRINGS reads  (default: 1024)
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p wdbx-cli
//! > INFO Spell.db2
//! signature          WDC3
//! records            3
//! ...
//! > EXIT
//! bye
//! ```

use std::fmt::Write as _;
use std::io::{self, BufRead, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wdbx::{DecodeOptions, TableHeader};

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_new(env_or("WDBX_LOG", "warn"))
        .context("WDBX_LOG is not a valid filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

/// Renders the header of the table at `path`, one `name value` line per field.
fn info(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file.metadata()?.len();
    let header = wdbx::read_header(io::BufReader::new(file))?;
    Ok(render_header(&header, len))
}

fn render_header(h: &TableHeader, file_len: u64) -> String {
    let mut out = String::new();
    let mut line = |name: &str, value: String| {
        let _ = writeln!(out, "{name:<18} {value}");
    };
    line("signature", h.signature.to_string());
    line("file bytes", file_len.to_string());
    line("records", h.record_count.to_string());
    line("fields", h.field_count.to_string());
    line("record size", h.record_size.to_string());
    line("string block", h.string_block_size.to_string());
    if h.signature.has_flags() || h.signature.is_cache() {
        line("flags", format!("{:?}", h.flags));
    }
    if h.signature.header_len() > 20 {
        line("table hash", format!("{:#010x}", h.table_hash));
        line("build", h.build.to_string());
        line("id range", format!("{}..={}", h.min_id, h.max_id));
        line("locale", h.locale.to_string());
    }
    if h.copy_table_size > 0 {
        line("copy table", h.copy_table_size.to_string());
    }
    if h.common_data_table_size > 0 {
        line("common data", h.common_data_table_size.to_string());
    }
    if h.relationship_data_size > 0 {
        line("relationship", h.relationship_data_size.to_string());
    }
    if h.pallet_data_size > 0 || h.sparse_data_size > 0 {
        line("pallet data", h.pallet_data_size.to_string());
        line("sparse data", h.sparse_data_size.to_string());
    }
    out
}

/// Renders the string block of the table at `path`. Files over
/// `opts.max_input_bytes` are refused before any of them is read.
fn strings(path: &Path, opts: &DecodeOptions) -> Result<String> {
    let file = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file.metadata()?.len();
    if len > opts.max_input_bytes {
        bail!(
            "{} is {len} bytes, over the {} byte input limit",
            path.display(),
            opts.max_input_bytes
        );
    }
    let mut input = Vec::with_capacity(len as usize);
    file.take(opts.max_input_bytes.saturating_add(1))
        .read_to_end(&mut input)
        .with_context(|| format!("read {}", path.display()))?;
    let block = wdbx::scan_strings(&input, opts)?;
    let entries = block.entries();

    let mut out = String::new();
    for (offset, text) in &entries {
        let _ = writeln!(out, "{offset:>8}  {text:?}");
    }
    let _ = writeln!(out, "({} strings)", entries.len());
    Ok(out)
}

fn main() -> Result<()> {
    init_logging()?;

    let max_mb: u64 = env_or("WDBX_MAX_INPUT_MB", "1024").parse().unwrap_or(1024);
    let opts = DecodeOptions {
        max_input_bytes: max_mb.saturating_mul(1024 * 1024),
        ..DecodeOptions::default()
    };
    debug!(max_mb, "wdbx shell started");

    println!("Commands: INFO path | STRINGS path | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        let (cmd, arg) = match line.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };
        if !cmd.is_empty() {
            match cmd.to_uppercase().as_str() {
                "INFO" | "STRINGS" if arg.is_empty() => {
                    println!("ERR usage: {} path", cmd.to_uppercase());
                }
                "INFO" => match info(Path::new(arg)) {
                    Ok(text) => print!("{text}"),
                    Err(e) => println!("ERR info failed: {e:#}"),
                },
                "STRINGS" => match strings(Path::new(arg), &opts) {
                    Ok(text) => print!("{text}"),
                    Err(e) => println!("ERR strings failed: {e:#}"),
                },
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => {
                    println!("unknown command: {}", other);
                }
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    Ok(())
}
