use crate::table::CacheCounterpart;

/// Largest input `decode` accepts unless told otherwise (1 GiB).
pub const DEFAULT_MAX_INPUT_BYTES: u64 = 1 << 30;

#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Layout of the table a cache file (`WCH*`) belongs to.
    pub counterpart: Option<CacheCounterpart>,
    /// Inputs longer than this are rejected before any parsing.
    pub max_input_bytes: u64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            counterpart: None,
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
        }
    }
}

impl DecodeOptions {
    #[must_use]
    pub fn with_counterpart(mut self, counterpart: CacheCounterpart) -> Self {
        self.counterpart = Some(counterpart);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Overrides the table's own copy-table policy.
    pub copy_table: Option<bool>,
    /// Store every string occurrence instead of interning.
    pub raw_strings: bool,
}
