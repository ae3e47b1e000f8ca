use super::*;
use anyhow::Result;

// -------------------- Writer --------------------

#[test]
fn writer_seeds_empty_string() {
    let w = StringBlockWriter::new();
    assert_eq!(w.as_bytes(), &[0]);
    assert!(w.is_empty());
}

#[test]
fn intern_deduplicates_to_first_offset() -> Result<()> {
    let mut w = StringBlockWriter::new();
    let a = w.intern("alpha")?;
    let b = w.intern("beta")?;
    let again = w.intern("alpha")?;
    assert_eq!(a, 1);
    assert_eq!(b, 7);
    assert_eq!(again, a);
    assert_eq!(w.as_bytes(), b"\0alpha\0beta\0");
    Ok(())
}

#[test]
fn raw_mode_appends_repeats() -> Result<()> {
    let mut w = StringBlockWriter::raw();
    let a = w.intern("x")?;
    let b = w.intern("x")?;
    assert_ne!(a, b);
    assert_eq!(w.as_bytes(), b"\0x\0x\0");
    Ok(())
}

#[test]
fn empty_string_is_offset_zero() -> Result<()> {
    let mut w = StringBlockWriter::new();
    w.intern("abc")?;
    assert_eq!(w.intern("")?, 0);
    assert_eq!(w.len(), 5);
    Ok(())
}

// -------------------- Reader --------------------

#[test]
fn get_resolves_relative_offsets() -> Result<()> {
    let block = StringBlock::new(b"\0alpha\0beta\0".to_vec(), 0);
    assert_eq!(block.get(0)?, "");
    assert_eq!(block.get(1)?, "alpha");
    assert_eq!(block.get(7)?, "beta");
    // suffix sharing
    assert_eq!(block.get(3)?, "pha");
    Ok(())
}

#[test]
fn get_resolves_absolute_offsets() -> Result<()> {
    let block = StringBlock::new(b"\0name\0".to_vec(), 400);
    assert_eq!(block.get(400)?, "");
    assert_eq!(block.get(401)?, "name");
    assert!(matches!(
        block.get(1),
        Err(StringBlockError::OffsetOutOfRange { offset: 1, base: 400, end: 406 })
    ));
    Ok(())
}

#[test]
fn offset_past_end_is_an_error() {
    let block = StringBlock::new(b"\0a\0".to_vec(), 0);
    assert!(block.get(3).is_err());
}

#[test]
fn unterminated_tail_is_an_error() {
    let block = StringBlock::new(b"\0abc".to_vec(), 0);
    assert_eq!(block.get(1), Err(StringBlockError::Unterminated(1)));
}

#[test]
fn empty_block_resolves_base_to_empty_string() -> Result<()> {
    let block = StringBlock::empty(96);
    assert_eq!(block.get(96)?, "");
    assert!(block.get(97).is_err());
    Ok(())
}

#[test]
fn entries_lists_every_run_with_base() {
    let block = StringBlock::new("\0héllo\0\0z\0".as_bytes().to_vec(), 10);
    let entries: Vec<(u64, String)> = block.entries().into_iter().collect();
    assert_eq!(
        entries,
        vec![
            (10, String::new()),
            (11, "héllo".to_string()),
            (18, String::new()),
            (19, "z".to_string()),
        ]
    );
}

#[test]
fn writer_output_reads_back() -> Result<()> {
    let mut w = StringBlockWriter::new();
    let offsets: Vec<u32> = ["one", "two", "one", "three"]
        .iter()
        .map(|s| w.intern(s))
        .collect::<Result<_, _>>()?;
    let block = StringBlock::new(w.into_bytes(), 0);
    let texts: Vec<String> = offsets
        .iter()
        .map(|o| block.get(u64::from(*o)))
        .collect::<Result<_, _>>()?;
    assert_eq!(texts, vec!["one", "two", "one", "three"]);
    Ok(())
}
