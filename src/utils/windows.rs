use jiff::Timestamp;

use crate::err::{DeserializationError, DeserializationResult};

const WINDOWS_TO_UNIX_SECS: i64 = 11_644_473_600;

/// Convert a Windows FILETIME (100ns ticks since 1601-01-01) into a `Timestamp`.
#[inline]
pub(crate) fn filetime_to_timestamp(filetime: u64) -> DeserializationResult<Timestamp> {
    let secs = (filetime / 10_000_000) as i64 - WINDOWS_TO_UNIX_SECS;
    let nanos = ((filetime % 10_000_000) * 100) as i32;
    Timestamp::new(secs, nanos).map_err(|_| DeserializationError::InvalidFileTime { filetime })
}
