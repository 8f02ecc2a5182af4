#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Utf16LeDecodeError {
    OddLength,
    InvalidData,
}

/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16le_bytes_z(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    if !bytes.len().is_multiple_of(2) {
        return Err(Utf16LeDecodeError::OddLength);
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    decode_utf16_units_z(&units)
}

/// Decode UTF-16 code units until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16_units_z(units: &[u16]) -> Result<String, Utf16LeDecodeError> {
    let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
    let slice = &units[..end];

    // Pure ASCII needs no surrogate handling.
    if slice.iter().all(|&c| c <= 0x7F) {
        return Ok(slice.iter().map(|&c| char::from(c as u8)).collect());
    }

    String::from_utf16(slice).map_err(|_| Utf16LeDecodeError::InvalidData)
}

/// Decode UTF-16LE bytes until the first NUL, replacing invalid sequences.
///
/// A trailing odd byte is ignored.
pub(crate) fn decode_utf16le_bytes_lossy_z(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .take_while(|&c| c != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Position of the first NUL code unit at or after `offset`, in bytes.
pub(crate) fn find_utf16le_nul(buf: &[u8], offset: usize) -> Option<usize> {
    let tail = buf.get(offset..)?;
    tail.chunks_exact(2)
        .position(|chunk| chunk[0] == 0 && chunk[1] == 0)
        .map(|units| offset + units * 2)
}

/// Encode `s` as UTF-16LE, without a terminator.
pub(crate) fn encode_utf16le(s: &str, out: &mut Vec<u8>) {
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        encode_utf16le(s, &mut out);
        out
    }

    #[test]
    fn test_decodes_until_nul() {
        let mut bytes = utf16("abc");
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&utf16("ignored"));
        assert_eq!(decode_utf16le_bytes_z(&bytes).unwrap(), "abc");
    }

    #[test]
    fn test_decodes_non_ascii() {
        let bytes = utf16("Grüße 🦀");
        assert_eq!(decode_utf16le_bytes_z(&bytes).unwrap(), "Grüße 🦀");
    }

    #[test]
    fn test_rejects_odd_length_and_lone_surrogates() {
        assert_eq!(
            decode_utf16le_bytes_z(&[0x41]),
            Err(Utf16LeDecodeError::OddLength)
        );
        assert_eq!(
            decode_utf16le_bytes_z(&[0x00, 0xD8]),
            Err(Utf16LeDecodeError::InvalidData)
        );
        assert_eq!(decode_utf16le_bytes_lossy_z(&[0x00, 0xD8, 0x41]), "\u{FFFD}");
    }

    #[test]
    fn test_find_nul_is_code_unit_aligned() {
        // 0x0100 followed by 0x0000: the zero byte at index 1 must not be mistaken for a terminator.
        let buf = [0x00, 0x01, 0x00, 0x00];
        assert_eq!(find_utf16le_nul(&buf, 0), Some(2));
        assert_eq!(find_utf16le_nul(&buf, 4), None);
        assert_eq!(find_utf16le_nul(&buf, 5), None);
    }
}
