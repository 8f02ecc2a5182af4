pub(crate) mod bytes;
mod utf16;
mod windows;

pub(crate) use self::utf16::{
    decode_utf16le_bytes_lossy_z, decode_utf16le_bytes_z, encode_utf16le,
    find_utf16le_nul,
};
pub(crate) use self::windows::filetime_to_timestamp;
