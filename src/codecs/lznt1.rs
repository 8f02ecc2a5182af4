//! LZNT1, the chunked LZ77 variant used by `RtlCompressBuffer(COMPRESSION_FORMAT_LZNT1)`.
//!
//! A stream is a sequence of chunks, each covering at most 4096 bytes of output:
//!
//! ```text
//! [u16 header][data]
//!   header & 0x0FFF  = data length - 1
//!   header & 0x7000  = 0x3000 signature
//!   header & 0x8000  = data is compressed (otherwise copied verbatim)
//! ```
//!
//! Compressed data is a run of flag bytes, each governing up to 8 tokens (LSB first). A clear bit
//! is a literal byte, a set bit is a little-endian `u16` back-reference whose split between
//! displacement and length depends on how far into the current chunk the output is.

use thiserror::Error;

pub const CHUNK_SIZE: usize = 4096;

const CHUNK_SIGNATURE: u16 = 0x3000;
const CHUNK_COMPRESSED: u16 = 0x8000;
const CHUNK_SIZE_MASK: u16 = 0x0FFF;

const MIN_MATCH: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Lznt1Error {
    #[error("truncated chunk header at offset {offset}")]
    TruncatedHeader { offset: usize },

    #[error("chunk at offset {offset} declares {declared} bytes, only {available} available")]
    TruncatedChunk {
        offset: usize,
        declared: usize,
        available: usize,
    },

    #[error("back-reference at offset {offset} reaches {displacement} bytes back, only {available} decoded in this chunk")]
    InvalidBackReference {
        offset: usize,
        displacement: usize,
        available: usize,
    },

    #[error("chunk at offset {offset} decodes to more than {} bytes", CHUNK_SIZE)]
    ChunkOverflow { offset: usize },

    #[error("decompressed output exceeds the {limit} byte limit")]
    OutputLimitExceeded { limit: usize },
}

/// Number of bits of a back-reference token that encode the match length, given how many bytes
/// of the current chunk have already been produced.
fn length_bits_for(position: usize) -> u32 {
    let mut bits = 12;
    let mut p = position.saturating_sub(1);
    while p >= 0x10 {
        p >>= 1;
        bits -= 1;
    }
    bits
}

/// Decompress `input`, refusing to produce more than `limit` bytes.
pub fn decompress(input: &[u8], limit: usize) -> Result<Vec<u8>, Lznt1Error> {
    let mut out = Vec::with_capacity(limit.min(input.len().saturating_mul(4)));
    let mut offset = 0;

    while offset < input.len() {
        let header_bytes = input
            .get(offset..offset + 2)
            .ok_or(Lznt1Error::TruncatedHeader { offset })?;
        let header = u16::from_le_bytes([header_bytes[0], header_bytes[1]]);
        if header == 0 {
            break;
        }

        let declared = usize::from(header & CHUNK_SIZE_MASK) + 1;
        let data_start = offset + 2;
        let data = input
            .get(data_start..data_start + declared)
            .ok_or(Lznt1Error::TruncatedChunk {
                offset,
                declared,
                available: input.len() - data_start,
            })?;

        if header & CHUNK_COMPRESSED != 0 {
            decompress_chunk(data, data_start, &mut out, limit)?;
        } else {
            if out.len() + data.len() > limit {
                return Err(Lznt1Error::OutputLimitExceeded { limit });
            }
            out.extend_from_slice(data);
        }

        offset = data_start + declared;
    }

    Ok(out)
}

fn decompress_chunk(
    data: &[u8],
    base_offset: usize,
    out: &mut Vec<u8>,
    limit: usize,
) -> Result<(), Lznt1Error> {
    let chunk_start = out.len();
    let mut i = 0;

    while i < data.len() {
        let flags = data[i];
        i += 1;

        for bit in 0..8 {
            if i >= data.len() {
                break;
            }

            if flags & (1 << bit) == 0 {
                if out.len() - chunk_start >= CHUNK_SIZE {
                    return Err(Lznt1Error::ChunkOverflow { offset: base_offset + i });
                }
                if out.len() >= limit {
                    return Err(Lznt1Error::OutputLimitExceeded { limit });
                }
                out.push(data[i]);
                i += 1;
                continue;
            }

            let token_bytes = data.get(i..i + 2).ok_or(Lznt1Error::TruncatedChunk {
                offset: base_offset + i,
                declared: 2,
                available: data.len() - i,
            })?;
            let token = u16::from_le_bytes([token_bytes[0], token_bytes[1]]);

            let produced = out.len() - chunk_start;
            let length_bits = length_bits_for(produced);
            let length_mask = (1u16 << length_bits) - 1;
            let displacement = usize::from(token >> length_bits) + 1;
            let length = usize::from(token & length_mask) + MIN_MATCH;

            if displacement > produced {
                return Err(Lznt1Error::InvalidBackReference {
                    offset: base_offset + i,
                    displacement,
                    available: produced,
                });
            }
            if produced + length > CHUNK_SIZE {
                return Err(Lznt1Error::ChunkOverflow { offset: base_offset + i });
            }
            if out.len() + length > limit {
                return Err(Lznt1Error::OutputLimitExceeded { limit });
            }

            // Source and destination may overlap, so this has to go byte by byte.
            let from = out.len() - displacement;
            for k in 0..length {
                let b = out[from + k];
                out.push(b);
            }
            i += 2;
        }
    }

    Ok(())
}

/// Compress `input` into an LZNT1 stream.
///
/// Uses a greedy longest-match search per chunk; chunks that do not shrink are stored verbatim.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 2 + 16);

    for block in input.chunks(CHUNK_SIZE) {
        let body = compress_chunk(block);
        if body.len() < block.len() {
            push_chunk(&mut out, &body, true);
        } else {
            push_chunk(&mut out, block, false);
        }
    }

    out
}

fn push_chunk(out: &mut Vec<u8>, data: &[u8], compressed: bool) {
    // `data` is never empty and never longer than a chunk (compressed bodies are shorter than
    // their block by construction), so the size always fits the 12-bit field.
    let mut header = CHUNK_SIGNATURE | ((data.len() - 1) as u16 & CHUNK_SIZE_MASK);
    if compressed {
        header |= CHUNK_COMPRESSED;
    }
    out.extend_from_slice(&header.to_le_bytes());
    out.extend_from_slice(data);
}

fn compress_chunk(block: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(block.len());
    let mut pos = 0;

    while pos < block.len() {
        let flags_at = body.len();
        body.push(0u8);

        for bit in 0..8 {
            if pos >= block.len() {
                break;
            }

            let length_bits = length_bits_for(pos);
            let max_length = (1usize << length_bits) - 1 + MIN_MATCH;
            let max_displacement = 1usize << (16 - length_bits);

            let (best_len, best_disp) = longest_match(block, pos, max_displacement, max_length);
            if best_len >= MIN_MATCH {
                let token = (((best_disp - 1) << length_bits) | (best_len - MIN_MATCH)) as u16;
                body.extend_from_slice(&token.to_le_bytes());
                body[flags_at] |= 1 << bit;
                pos += best_len;
            } else {
                body.push(block[pos]);
                pos += 1;
            }
        }
    }

    body
}

fn longest_match(
    block: &[u8],
    pos: usize,
    max_displacement: usize,
    max_length: usize,
) -> (usize, usize) {
    let remaining = (block.len() - pos).min(max_length);
    let window = pos.min(max_displacement);
    let mut best = (0, 0);

    for displacement in 1..=window {
        let from = pos - displacement;
        let mut len = 0;
        while len < remaining && block[from + len] == block[pos + len] {
            len += 1;
        }
        if len > best.0 {
            best = (len, displacement);
            if len == remaining {
                break;
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_length_bits_shrink_as_the_chunk_fills() {
        assert_eq!(length_bits_for(0), 12);
        assert_eq!(length_bits_for(16), 12);
        assert_eq!(length_bits_for(17), 11);
        assert_eq!(length_bits_for(33), 10);
        assert_eq!(length_bits_for(4096), 4);
    }

    #[test]
    fn test_uncompressed_chunk() {
        let stream = [0x02, 0x30, b'a', b'b', b'c'];
        assert_eq!(decompress(&stream, 100).unwrap(), b"abc");
    }

    #[test]
    fn test_overlapping_back_reference() {
        // 'a' literal, then a back-reference of displacement 1 and length 7.
        let token: u16 = 4; // displacement 1, length 4 + 3
        let mut data = vec![0b10, b'a'];
        data.extend_from_slice(&token.to_le_bytes());
        let mut stream = (0xB000u16 | (data.len() as u16 - 1)).to_le_bytes().to_vec();
        stream.extend_from_slice(&data);

        assert_eq!(decompress(&stream, 100).unwrap(), b"aaaaaaaa");
    }

    #[test]
    fn test_terminator_ends_the_stream() {
        let stream = [0x00, 0x30, b'x', 0x00, 0x00, 0xFF, 0xFF];
        assert_eq!(decompress(&stream, 100).unwrap(), b"x");
    }

    #[test]
    fn test_errors() {
        assert_eq!(decompress(&[0x01], 10), Err(Lznt1Error::TruncatedHeader { offset: 0 }));
        assert!(matches!(
            decompress(&[0x05, 0x30, b'a'], 10),
            Err(Lznt1Error::TruncatedChunk { declared: 6, .. })
        ));
        // Back-reference with nothing decoded yet.
        assert!(matches!(
            decompress(&[0x02, 0xB0, 0x01, 0x00, 0x00], 10),
            Err(Lznt1Error::InvalidBackReference { .. })
        ));
        assert_eq!(
            decompress(&[0x02, 0x30, b'a', b'b', b'c'], 2),
            Err(Lznt1Error::OutputLimitExceeded { limit: 2 })
        );
    }

    #[test]
    fn test_chunk_cannot_decode_past_its_size() {
        // 'a', then a 4098-byte match, then another match.
        let data = [0b110, b'a', 0xFF, 0x0F, 0x0F, 0x00];
        let mut stream = (0xB000u16 | (data.len() as u16 - 1)).to_le_bytes().to_vec();
        stream.extend_from_slice(&data);

        assert_eq!(
            decompress(&stream, 10_000),
            Err(Lznt1Error::ChunkOverflow { offset: 4 })
        );

        // A match that ends exactly at the chunk boundary is fine.
        let data = [0b10, b'a', 0xFC, 0x0F];
        let mut stream = (0xB000u16 | (data.len() as u16 - 1)).to_le_bytes().to_vec();
        stream.extend_from_slice(&data);
        assert_eq!(decompress(&stream, 10_000).unwrap(), vec![b'a'; CHUNK_SIZE]);
    }

    #[test]
    fn test_compress_round_trips_and_shrinks_repetitive_input() {
        let input: Vec<u8> = b"<Node Value=\"1\"/>".repeat(600);
        let compressed = compress(&input);
        assert!(compressed.len() < input.len() / 4);
        assert_eq!(decompress(&compressed, input.len()).unwrap(), input);
    }

    #[test]
    fn test_incompressible_chunks_are_stored_verbatim() {
        let input: Vec<u8> = (0..=255u8).collect();
        let compressed = compress(&input);
        assert_eq!(compressed.len(), input.len() + 2);
        assert_eq!(compressed[1] & 0x80, 0);
        assert_eq!(decompress(&compressed, 256).unwrap(), input);
    }
}
