use thiserror::Error;

pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;

/// Data-driven failures while reading fields out of a record payload.
///
/// These are always attributable to the bytes being decoded (never to the caller), and are
/// contained to the record they originate in.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("buffer too small for {what} at offset {offset} (need {need} bytes, have {have})")]
    Truncated {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("invalid UTF-16 string for {what} at offset {offset}")]
    InvalidUtf16String { what: &'static str, offset: u64 },

    #[error("invalid UTF-8 string for {what} at offset {offset}: {source}")]
    InvalidUtf8String {
        what: &'static str,
        offset: u64,
        source: std::str::Utf8Error,
    },

    #[error("varint for {what} at offset {offset} does not fit in 64 bits")]
    VarintOverflow { what: &'static str, offset: u64 },

    #[error("length {length} for {what} at offset {offset} is not a valid byte count")]
    InvalidLength {
        what: &'static str,
        offset: u64,
        length: i64,
    },

    #[error(
        "trailing length of {what} claims {length} bytes, but the field starts at offset {offset} and the tail is at {tail}"
    )]
    MisplacedSuffixedString {
        what: &'static str,
        offset: u64,
        tail: u64,
        length: usize,
    },

    #[error("declared payload length {declared} exceeds the {available} bytes supplied")]
    PayloadLengthMismatch { declared: u32, available: usize },

    #[error("invalid FILETIME value {filetime}")]
    InvalidFileTime { filetime: u64 },
}

impl DeserializationError {
    /// Offset within the bound payload at which the failure was detected, if known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            DeserializationError::Truncated { offset, .. }
            | DeserializationError::InvalidUtf16String { offset, .. }
            | DeserializationError::InvalidUtf8String { offset, .. }
            | DeserializationError::VarintOverflow { offset, .. }
            | DeserializationError::InvalidLength { offset, .. }
            | DeserializationError::MisplacedSuffixedString { offset, .. } => Some(*offset),
            DeserializationError::PayloadLengthMismatch { .. }
            | DeserializationError::InvalidFileTime { .. } => None,
        }
    }
}
