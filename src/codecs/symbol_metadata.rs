//! Symbol metadata attached to module mappings, carried as a JSON object whose `type` member
//! selects the schema.

use log::debug;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::guid::Guid;

#[derive(Debug, Error)]
pub enum SymbolMetadataError {
    #[error("invalid symbol metadata JSON")]
    Json(#[from] serde_json::Error),

    #[error("symbol metadata has no string `type` member")]
    MissingType,

    #[error("unsupported symbol metadata type `{0}`")]
    UnsupportedType(String),
}

/// Debug information for a PE image, and its perfmap if one was generated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PeSymbolMetadata {
    #[serde(rename = "name")]
    pub pdb_name: Option<String>,
    #[serde(rename = "date_time")]
    pub time_date_stamp: Option<i64>,
    #[serde(rename = "age")]
    pub pdb_age: Option<u32>,
    #[serde(rename = "signature")]
    pub pdb_signature: Option<Guid>,
    pub perfmap_signature: Option<Guid>,
    pub perfmap_version: Option<u32>,
    pub perfmap_name: Option<String>,
    pub text_offset: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ElfSymbolMetadata {
    pub debug_link: Option<String>,
    pub build_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolMetadata {
    Pe(PeSymbolMetadata),
    Elf(ElfSymbolMetadata),
}

impl SymbolMetadata {
    /// Parse `json`, yielding `None` for malformed JSON and unknown `type` values.
    pub fn parse(json: &str) -> Option<SymbolMetadata> {
        match Self::try_parse(json) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                debug!("ignoring symbol metadata: {}", e);
                None
            }
        }
    }

    pub fn try_parse(json: &str) -> Result<SymbolMetadata, SymbolMetadataError> {
        let value: Value = serde_json::from_str(json)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(SymbolMetadataError::MissingType)?;

        if kind.eq_ignore_ascii_case("PE") {
            Ok(SymbolMetadata::Pe(serde_json::from_value(value)?))
        } else if kind.eq_ignore_ascii_case("ELF") {
            Ok(SymbolMetadata::Elf(serde_json::from_value(value)?))
        } else {
            Err(SymbolMetadataError::UnsupportedType(kind.to_string()))
        }
    }

    pub fn as_pe(&self) -> Option<&PeSymbolMetadata> {
        match self {
            SymbolMetadata::Pe(pe) => Some(pe),
            SymbolMetadata::Elf(_) => None,
        }
    }

    pub fn as_elf(&self) -> Option<&ElfSymbolMetadata> {
        match self {
            SymbolMetadata::Elf(elf) => Some(elf),
            SymbolMetadata::Pe(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pe_metadata() {
        let json = r#"{"type":"PE","name":"a.pdb","date_time":1700000000,"age":3,
            "signature":"11111111-1111-1111-1111-111111111111","perfmap_version":1,
            "perfmap_signature":"{22222222-2222-2222-2222-222222222222}","perfmap_name":"a.ni.r2rmap",
            "text_offset":4096}"#;

        let pe = SymbolMetadata::parse(json).unwrap().as_pe().cloned().unwrap();
        assert_eq!(pe.pdb_name.as_deref(), Some("a.pdb"));
        assert_eq!(pe.pdb_age, Some(3));
        assert_eq!(pe.time_date_stamp, Some(1_700_000_000));
        assert_eq!(
            pe.pdb_signature,
            Some(Guid::from_u128(0x11111111_1111_1111_1111_111111111111))
        );
        assert_eq!(
            pe.perfmap_signature,
            Some(Guid::from_u128(0x22222222_2222_2222_2222_222222222222))
        );
        assert_eq!(pe.perfmap_name.as_deref(), Some("a.ni.r2rmap"));
        assert_eq!(pe.text_offset, Some(4096));
    }

    #[test]
    fn test_type_is_case_insensitive() {
        let metadata = SymbolMetadata::parse(r#"{"type":"elf","debug_link":"x","build_id":"y"}"#);
        assert_eq!(
            metadata,
            Some(SymbolMetadata::Elf(ElfSymbolMetadata {
                debug_link: Some("x".to_string()),
                build_id: Some("y".to_string()),
            }))
        );
        assert!(matches!(
            SymbolMetadata::parse(r#"{"type":"pe"}"#),
            Some(SymbolMetadata::Pe(_))
        ));
    }

    #[test]
    fn test_unusable_metadata_is_absent() {
        assert_eq!(SymbolMetadata::parse(r#"{"type":"COFF"}"#), None);
        assert_eq!(SymbolMetadata::parse(r#"{"name":"a.pdb"}"#), None);
        assert_eq!(SymbolMetadata::parse(r#"{"type":"PE","age":"three"}"#), None);
        assert_eq!(SymbolMetadata::parse("{\"type\":"), None);

        assert!(matches!(
            SymbolMetadata::try_parse(r#"{"type":"COFF"}"#),
            Err(SymbolMetadataError::UnsupportedType(t)) if t == "COFF"
        ));
    }
}
