//! Payload-specific transforms applied on top of the field cursor.

pub mod lznt1;
pub mod symbol_metadata;
pub mod xml_text;

pub use self::symbol_metadata::{ElfSymbolMetadata, PeSymbolMetadata, SymbolMetadata};
pub use self::xml_text::{MAX_UNCOMPRESSED_XML_SIZE, decode_compressed_xml, pretty_print};
