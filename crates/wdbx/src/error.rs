//! Error taxonomy for decode and encode passes.
//!
//! Every error is scoped to the single file being processed. Callers can
//! tell format damage, id constraint violations and schema disagreements
//! apart without parsing messages.

use std::io;

use bitstream::BitStreamError;
use schema::SchemaError;
use stringblock::StringBlockError;
use thiserror::Error;

use crate::format::Signature;

/// The stream does not follow the layout its signature promises.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unrecognised signature {0:?}")]
    UnknownSignature(String),

    #[error("unknown compression kind {0}")]
    UnknownCompression(u32),

    #[error("stream truncated: {0}")]
    Truncated(String),

    #[error("corrupt table: {0}")]
    Corrupt(String),

    #[error("{0} tables can only be decoded with their counterpart layout")]
    MissingCounterpart(Signature),

    #[error("record data: {0}")]
    BitStream(#[from] BitStreamError),

    #[error("string block: {0}")]
    Strings(#[from] StringBlockError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Two rows claimed the same id without a copy-table entry relating them.
    #[error("duplicate id {id}")]
    DuplicateId { id: i32 },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("io error: {0}")]
    Io(io::Error),
}

impl Error {
    #[must_use]
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Format(_))
    }

    #[must_use]
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, Error::SchemaMismatch(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::Format(FormatError::Truncated(e.to_string()))
        } else {
            Error::Io(e)
        }
    }
}

impl From<BitStreamError> for Error {
    fn from(e: BitStreamError) -> Self {
        Error::Format(FormatError::BitStream(e))
    }
}

impl From<StringBlockError> for Error {
    fn from(e: StringBlockError) -> Self {
        Error::Format(FormatError::Strings(e))
    }
}

impl From<SchemaError> for Error {
    fn from(e: SchemaError) -> Self {
        Error::SchemaMismatch(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn corrupt(msg: impl Into<String>) -> Error {
    Error::Format(FormatError::Corrupt(msg.into()))
}

pub(crate) fn truncated(msg: impl Into<String>) -> Error {
    Error::Format(FormatError::Truncated(msg.into()))
}

pub(crate) fn mismatch(msg: impl Into<String>) -> Error {
    Error::SchemaMismatch(msg.into())
}
