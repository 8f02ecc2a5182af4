//! Offset arithmetic over an event payload.
//!
//! Every read takes the offset where a field starts and returns the decoded value together with
//! the offset immediately following the field. Nothing is cached here: field widths depend on the
//! data (a preceding string shifts every later field), so callers chain reads left-to-right.
//!
//! All reads are little-endian and bounds-checked; running off the end of the payload yields
//! `DeserializationError::Truncated` instead of touching adjacent memory.

use log::trace;

use crate::err::{DeserializationError, DeserializationResult};
use crate::guid::Guid;
use crate::utils::{bytes, decode_utf16le_bytes_z, find_utf16le_nul};

/// Width of pointer-sized fields, taken from the process that produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerSize {
    Four,
    #[default]
    Eight,
}

impl PointerSize {
    pub fn width(self) -> usize {
        match self {
            PointerSize::Four => 4,
            PointerSize::Eight => 8,
        }
    }

    pub fn from_width(width: usize) -> Option<PointerSize> {
        match width {
            4 => Some(PointerSize::Four),
            8 => Some(PointerSize::Eight),
            _ => None,
        }
    }
}

/// A decoded field value and the offset right after the field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decoded<T> {
    pub value: T,
    pub next: usize,
}

impl<T> Decoded<T> {
    pub fn new(value: T, next: usize) -> Self {
        Decoded { value, next }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decoded<U> {
        Decoded {
            value: f(self.value),
            next: self.next,
        }
    }
}

/// Maximum number of bytes a 64-bit varint can occupy.
pub const MAX_VAR_UINT_LEN: usize = 10;

/// Stateless field reader over one payload.
#[derive(Debug, Clone, Copy)]
pub struct FieldCursor<'a> {
    buf: &'a [u8],
    pointer_size: PointerSize,
}

impl<'a> FieldCursor<'a> {
    pub fn new(buf: &'a [u8], pointer_size: PointerSize) -> Self {
        FieldCursor { buf, pointer_size }
    }

    #[inline]
    pub fn buf(&self) -> &'a [u8] {
        self.buf
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn pointer_size(&self) -> PointerSize {
        self.pointer_size
    }

    fixed_width_readers! {
        u8_at => u8,
        i8_at => i8,
        u16_at => u16,
        i16_at => i16,
        u32_at => u32,
        i32_at => i32,
        u64_at => u64,
        i64_at => i64,
        f32_at => f32,
        f64_at => f64,
    }

    /// Win32 `BOOL`: four bytes, any non-zero value is true.
    pub fn bool32_at(&self, offset: usize, what: &'static str) -> DeserializationResult<Decoded<bool>> {
        Ok(self.u32_at(offset, what)?.map(|v| v != 0))
    }

    pub fn guid_at(&self, offset: usize, what: &'static str) -> DeserializationResult<Decoded<Guid>> {
        let raw = bytes::slice_r(self.buf, offset, 16, what)?;
        let guid = Guid::from_buffer(raw).ok_or_else(|| {
            bytes::truncated(what, offset, 16, self.buf.len())
        })?;
        Ok(Decoded::new(guid, offset + 16))
    }

    /// A pointer-sized field, widened to `u64`.
    pub fn pointer_at(&self, offset: usize, what: &'static str) -> DeserializationResult<Decoded<u64>> {
        match self.pointer_size {
            PointerSize::Four => Ok(self.u32_at(offset, what)?.map(u64::from)),
            PointerSize::Eight => self.u64_at(offset, what),
        }
    }

    /// Offset right after the NUL terminator of a UTF-16LE string starting at `offset`.
    pub fn utf16z_end(&self, offset: usize, what: &'static str) -> DeserializationResult<usize> {
        match find_utf16le_nul(self.buf, offset) {
            Some(nul) => Ok(nul + 2),
            None => Err(DeserializationError::Truncated {
                what,
                offset: offset as u64,
                need: self.buf.len().saturating_sub(offset) + 2,
                have: self.buf.len().saturating_sub(offset),
            }),
        }
    }

    /// A NUL-terminated UTF-16LE string.
    pub fn utf16z_at(&self, offset: usize, what: &'static str) -> DeserializationResult<Decoded<String>> {
        let next = self.utf16z_end(offset, what)?;
        let raw = &self.buf[offset..next - 2];
        let value = decode_utf16le_bytes_z(raw).map_err(|_| DeserializationError::InvalidUtf16String {
            what,
            offset: offset as u64,
        })?;
        trace!("{what}: utf16 string of {} bytes at {offset}", raw.len());
        Ok(Decoded::new(value, next))
    }

    /// A UTF-8 string laid out as `[u16 byte length][bytes]`.
    pub fn utf8_prefixed_at(
        &self,
        offset: usize,
        what: &'static str,
    ) -> DeserializationResult<Decoded<&'a str>> {
        let len = self.u16_at(offset, what)?;
        let raw = bytes::slice_r(self.buf, len.next, usize::from(len.value), what)?;
        let value = std::str::from_utf8(raw).map_err(|source| {
            DeserializationError::InvalidUtf8String {
                what,
                offset: offset as u64,
                source,
            }
        })?;
        Ok(Decoded::new(value, len.next + raw.len()))
    }

    /// A UTF-8 string laid out as `[bytes][u16 byte length]` at the tail of the payload.
    ///
    /// The field must start exactly at `offset`, so the trailing length has to account for every
    /// byte between `offset` and the length itself. The next offset is the end of the payload.
    pub fn utf8_suffixed_at(
        &self,
        offset: usize,
        what: &'static str,
    ) -> DeserializationResult<Decoded<&'a str>> {
        let tail = self
            .buf
            .len()
            .checked_sub(2)
            .filter(|&tail| tail >= offset)
            .ok_or_else(|| bytes::truncated(what, offset, 2, self.buf.len()))?;
        let len = usize::from(bytes::read_u16_le_r(self.buf, tail, what)?);

        if tail - offset != len {
            return Err(DeserializationError::MisplacedSuffixedString {
                what,
                offset: offset as u64,
                tail: tail as u64,
                length: len,
            });
        }

        let value = std::str::from_utf8(&self.buf[offset..tail]).map_err(|source| {
            DeserializationError::InvalidUtf8String {
                what,
                offset: offset as u64,
                source,
            }
        })?;
        Ok(Decoded::new(value, self.buf.len()))
    }

    /// A little-endian base-128 varint (7 payload bits per byte, top bit = more bytes follow).
    pub fn var_uint_at(&self, offset: usize, what: &'static str) -> DeserializationResult<Decoded<u64>> {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        let mut pos = offset;

        loop {
            let byte = bytes::read_u8(self.buf, pos)
                .ok_or_else(|| bytes::truncated(what, pos, 1, self.buf.len()))?;
            pos += 1;

            let payload = u64::from(byte & 0x7F);
            // The tenth byte may only carry the single remaining bit.
            if shift == 63 && payload > 1 {
                return Err(DeserializationError::VarintOverflow {
                    what,
                    offset: offset as u64,
                });
            }
            result |= payload << shift;

            if byte & 0x80 == 0 {
                return Ok(Decoded::new(result, pos));
            }

            shift += 7;
            if shift > 63 {
                return Err(DeserializationError::VarintOverflow {
                    what,
                    offset: offset as u64,
                });
            }
        }
    }

    /// `len` raw bytes starting at `offset`, borrowed from the payload.
    pub fn bytes_at(
        &self,
        offset: usize,
        len: usize,
        what: &'static str,
    ) -> DeserializationResult<Decoded<&'a [u8]>> {
        let raw = bytes::slice_r(self.buf, offset, len, what)?;
        Ok(Decoded::new(raw, offset + len))
    }

    /// Everything from `offset` to the end of the payload.
    pub fn rest_at(&self, offset: usize, what: &'static str) -> DeserializationResult<Decoded<&'a [u8]>> {
        let raw = self
            .buf
            .get(offset..)
            .ok_or_else(|| bytes::truncated(what, offset, 0, self.buf.len()))?;
        Ok(Decoded::new(raw, self.buf.len()))
    }
}

/// Append the minimal varint encoding of `value` to `out`.
pub fn encode_var_uint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Number of bytes the minimal varint encoding of `value` occupies.
pub fn var_uint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}
