//! Compressed, UTF-16 encoded XML payload fields.
//!
//! ```text
//! [u32 state][u32 uncompressed size][LZNT1 stream of UTF-16LE XML...]
//! ```
//!
//! Decoding never fails outright: anything that cannot be decompressed or validated yields an
//! empty string, and XML that cannot be tokenized is returned as-is.

use log::{debug, warn};
use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;

use crate::codecs::lznt1;
use crate::err::DeserializationResult;
use crate::utils::bytes::read_u32_le_r;
use crate::utils::{decode_utf16le_bytes_lossy_z, encode_utf16le};

/// Declared sizes above this are not decompressed at all.
pub const MAX_UNCOMPRESSED_XML_SIZE: usize = 64 * 1024;

const HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum PrettyPrintError {
    #[error("malformed XML near offset {position}")]
    Xml {
        position: usize,
        #[source]
        source: quick_xml::Error,
    },

    #[error("reader position {position} is not addressable")]
    Position { position: u64 },
}

/// Decode a whole field, starting at its `state` word.
pub fn decode_compressed_xml(field: &[u8]) -> DeserializationResult<String> {
    let _state = read_u32_le_r(field, 0, "State")?;
    let size = read_u32_le_r(field, 4, "UncompressedSize")?;
    Ok(decode_xml_body(size as usize, &field[HEADER_LEN..]))
}

/// Decompress and pretty-print `body`, which must inflate to exactly `uncompressed_size` bytes.
pub fn decode_xml_body(uncompressed_size: usize, body: &[u8]) -> String {
    match decompress_xml(uncompressed_size, body) {
        Some(xml) => pretty_print(&xml),
        None => String::new(),
    }
}

/// The raw XML text, or `None` when the body is oversized or corrupt.
pub fn decompress_xml(uncompressed_size: usize, body: &[u8]) -> Option<String> {
    if uncompressed_size > MAX_UNCOMPRESSED_XML_SIZE {
        debug!(
            "skipping compressed XML: declared size {} exceeds {}",
            uncompressed_size, MAX_UNCOMPRESSED_XML_SIZE
        );
        return None;
    }

    let raw = match lznt1::decompress(body, uncompressed_size) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("failed to decompress XML field: {}", e);
            return None;
        }
    };

    if raw.len() != uncompressed_size {
        warn!(
            "decompressed XML is {} bytes, header declared {}",
            raw.len(),
            uncompressed_size
        );
        return None;
    }

    Some(decode_utf16le_bytes_lossy_z(&raw))
}

/// Producer side of the field: `[state][size][LZNT1(UTF-16LE(xml))]`.
pub fn encode_compressed_xml(xml: &str, state: u32) -> Vec<u8> {
    let mut utf16 = Vec::with_capacity(xml.len() * 2);
    encode_utf16le(xml, &mut utf16);

    let compressed = lznt1::compress(&utf16);
    let mut field = Vec::with_capacity(HEADER_LEN + compressed.len());
    field.extend_from_slice(&state.to_le_bytes());
    field.extend_from_slice(&(utf16.len() as u32).to_le_bytes());
    field.extend_from_slice(&compressed);
    field
}

/// Indent `xml` one space per nesting level, falling back to the input when it does not parse.
pub fn pretty_print(xml: &str) -> String {
    match try_pretty_print(xml) {
        Ok(pretty) => pretty,
        Err(e) => {
            debug!("leaving XML unformatted: {}", e);
            xml.to_string()
        }
    }
}

/// Every element tag except the first starts on a new line; a closing tag does only when its
/// element contained other elements. Text, comments and declarations are copied verbatim.
pub fn try_pretty_print(xml: &str) -> Result<String, PrettyPrintError> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::with_capacity(xml.len() + xml.len() / 4);
    // One entry per open element: whether it has child elements so far.
    let mut open: Vec<bool> = Vec::new();
    let mut seen_element = false;

    loop {
        let start = position(&reader)?;
        let event = reader
            .read_event()
            .map_err(|source| PrettyPrintError::Xml {
                position: start,
                source,
            })?;
        let end = position(&reader)?;
        let raw = xml.get(start..end).ok_or(PrettyPrintError::Position {
            position: end as u64,
        })?;

        match event {
            Event::Start(_) | Event::Empty(_) => {
                if seen_element {
                    push_indent(&mut out, open.len());
                }
                seen_element = true;
                if let Some(parent) = open.last_mut() {
                    *parent = true;
                }
                out.push_str(raw);
                if matches!(event, Event::Start(_)) {
                    open.push(false);
                }
            }
            Event::End(_) => {
                let had_children = open.pop().unwrap_or(false);
                if had_children {
                    push_indent(&mut out, open.len());
                }
                out.push_str(raw);
            }
            Event::Eof => break,
            _ => out.push_str(raw),
        }
    }

    Ok(out)
}

fn position(reader: &Reader<&[u8]>) -> Result<usize, PrettyPrintError> {
    let position = reader.buffer_position();
    usize::try_from(position).map_err(|_| PrettyPrintError::Position {
        position: position as u64,
    })
}

fn push_indent(out: &mut String, depth: usize) {
    out.push('\n');
    out.extend(std::iter::repeat_n(' ', depth));
}
