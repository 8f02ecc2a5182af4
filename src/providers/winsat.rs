//! Windows System Assessment Tool events.

use crate::guid::Guid;
use crate::template::{EventIdentity, EventTemplate, FieldDef, FieldKind};

pub const PROVIDER_NAME: &str = "Microsoft-Windows-WinSAT";
pub const PROVIDER_GUID: Guid = Guid::from_u128(0x8e3a4c21_5d0f_4b7e_a1c9_6f2d8b0e4a17);

pub const SYSTEM_CONFIG_ID: u16 = 1;

static SYSTEM_CONFIG_FIELDS: [FieldDef; 3] = [
    FieldDef::new("State", FieldKind::UInt32),
    FieldDef::new("UncompressedSize", FieldKind::UInt32),
    FieldDef::new("Xml", FieldKind::CompressedXml { size_field: 1 }),
];

pub fn templates() -> Vec<EventTemplate> {
    vec![EventTemplate::new(
        EventIdentity {
            provider_guid: PROVIDER_GUID,
            provider_name: PROVIDER_NAME,
            event_id: SYSTEM_CONFIG_ID,
            version: 0,
            task_id: 1,
            task_name: "SystemConfig",
            task_guid: Guid::from_u128(0x8e3a4c21_5d0f_4b7e_a1c9_6f2d8b0e4a18),
            opcode: 0,
            opcode_name: "",
        },
        &SYSTEM_CONFIG_FIELDS,
    )]
}

trace_data! {
    /// Hardware inventory captured by a WinSAT run, as indented XML.
    SystemConfigTraceData(PROVIDER_GUID, SYSTEM_CONFIG_ID) {
        state(0) -> u32;
        uncompressed_size(1) -> u32;
        /// Empty when the compressed document is oversized or corrupt.
        xml(2) -> String;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codecs::xml_text::encode_compressed_xml;
    use crate::record::RecordHeader;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_system_config_xml() {
        let template = templates().pop().unwrap();
        let payload = encode_compressed_xml("<SystemConfig><OS Build=\"19045\"/></SystemConfig>", 2);
        let header = RecordHeader::new(PROVIDER_GUID, SYSTEM_CONFIG_ID);
        let view = template.bind(&header, &payload);
        let config = SystemConfigTraceData::from_view(&view).unwrap();

        assert_eq!(config.state().unwrap(), 2);
        assert_eq!(
            config.xml().unwrap(),
            "<SystemConfig>\n <OS Build=\"19045\"/>\n</SystemConfig>"
        );
        assert_eq!(template.field_names(), &["State", "UncompressedSize", "Xml"]);
    }

    #[test]
    fn test_oversized_document_is_empty() {
        let template = templates().pop().unwrap();
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&70_000u32.to_le_bytes());
        payload.extend_from_slice(&[0xAB; 16]);

        let header = RecordHeader::new(PROVIDER_GUID, SYSTEM_CONFIG_ID);
        let view = template.bind(&header, &payload);
        assert_eq!(SystemConfigTraceData::from_view(&view).unwrap().xml().unwrap(), "");
    }
}
