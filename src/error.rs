//! Error types for the whole crate.
//!
//! Anything that makes the file undecodable is a [`FormatError`] and aborts
//! the load. A pointer whose target block was simply not exported into the
//! file is *not* an error; resolution degrades to "no data" (see
//! [`PointerValue::resolve`](crate::runtime::PointerValue::resolve)).

use crate::runtime::LoadState;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FormatError>;

/// A structural problem with the byte stream, the embedded DNA, or a field
/// access. Every variant that originates in the stream carries the offending
/// byte position.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("not a blend file: the stream does not start with the expected magic")]
    BadMagic,

    #[error("compressed blend files are not supported, decompress the stream first")]
    CompressedNotSupported,

    #[error("unknown pointer-size flag {flag:#04x} at position {position}")]
    UnknownPointerSizeFlag { flag: u8, position: u64 },

    #[error("unknown endianness flag {flag:#04x} at position {position}")]
    UnknownEndiannessFlag { flag: u8, position: u64 },

    #[error("read of {wanted} bytes at position {position} crosses the end of the stream ({len} bytes)")]
    OutOfBounds {
        position: u64,
        wanted: usize,
        len: u64,
    },

    #[error("seek to position {position} is past the end of the stream ({len} bytes)")]
    BadSeek { position: u64, len: u64 },

    /// Two blocks recorded the same export-time address, which would make
    /// every pointer to that address ambiguous.
    #[error("two blocks share the address {address:#x}, second header at position {position}")]
    DuplicateBlockAddress { address: u64, position: u64 },

    /// The terminal block was reached without a DNA block. Without the
    /// embedded schema no other block can ever be decoded.
    #[error("the file has no DNA block")]
    MissingDnaBlock,

    #[error("block {code:?} at position {position} has DNA index {index}, but the DNA catalog only holds {known} structures")]
    InvalidDnaIndex {
        code: String,
        position: u64,
        index: usize,
        known: usize,
    },

    #[error("block {code:?} at position {position} holds {size} payload bytes but its element count needs {needed}")]
    TruncatedBlock {
        code: String,
        position: u64,
        size: usize,
        needed: usize,
    },

    #[error("the DNA catalog is corrupt: {reason}")]
    DnaCorrupt { reason: String },

    #[error("type {name:?} is neither a structure nor a primitive in this file's DNA")]
    UnknownDnaType { name: String },

    #[error("DNA field name {name:?} could not be parsed")]
    BadFieldName { name: String },

    #[error("structure {type_name:?} has no field {field:?}")]
    FieldNotFound { type_name: String, field: String },

    #[error("field {field:?} of {type_name:?} is not a {expected}")]
    FieldTypeMismatch {
        type_name: String,
        field: String,
        expected: &'static str,
    },

    #[error("the load context is closed")]
    ContextClosed,

    #[error("the load was cancelled")]
    Cancelled,
}

/// The single failure surface of a whole-file load: the file identity, the
/// load stage that was active, the stream position and the underlying cause.
#[derive(Debug, Error)]
#[error("failed to load {file} at byte {position} ({}): {source}", .stage.describe())]
pub struct LoadError {
    pub file: String,
    pub stage: LoadState,
    pub position: u64,
    #[source]
    pub source: FormatError,
}
