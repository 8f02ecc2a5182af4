//! Process and module lifetime events of the cross-platform `Universal.System` provider.
//!
//! These payloads are compact: integers are varints and strings are UTF-8 with an explicit byte
//! length, so every offset after the first string depends on the record contents.

use crate::codecs::SymbolMetadata;
use crate::guid::Guid;
use crate::template::{EventIdentity, EventTemplate, FieldDef, FieldError, FieldKind};

pub const PROVIDER_NAME: &str = "Universal.System";
pub const PROVIDER_GUID: Guid = Guid::from_u128(0x3c5a2f6e_8b41_4d0a_9c57_1e2f6a0b7d94);

pub const EXISTING_PROCESS_ID: u16 = 1;
pub const PROCESS_CREATE_ID: u16 = 2;
pub const PROCESS_EXIT_ID: u16 = 3;
pub const PROCESS_MAPPING_ID: u16 = 4;
pub const PROCESS_MAPPING_SYMBOL_METADATA_ID: u16 = 5;

const PROCESS_TASK_GUID: Guid = Guid::from_u128(0x3c5a2f6e_8b41_4d0a_9c57_1e2f6a0b7d95);
const MAPPING_TASK_GUID: Guid = Guid::from_u128(0x3c5a2f6e_8b41_4d0a_9c57_1e2f6a0b7d96);

static PROCESS_FIELDS: [FieldDef; 4] = [
    FieldDef::new("ProcessId", FieldKind::VarUInt),
    FieldDef::new("NamespaceId", FieldKind::VarUInt),
    FieldDef::new("Name", FieldKind::Utf8Prefixed),
    FieldDef::new("CommandLine", FieldKind::Utf8Suffixed),
];

static PROCESS_EXIT_FIELDS: [FieldDef; 2] = [
    FieldDef::new("ProcessId", FieldKind::VarUInt),
    FieldDef::new("ExitCode", FieldKind::Int32),
];

static PROCESS_MAPPING_FIELDS: [FieldDef; 7] = [
    FieldDef::new("Id", FieldKind::VarUInt),
    FieldDef::new("ProcessId", FieldKind::VarUInt),
    FieldDef::new("StartAddress", FieldKind::VarUInt),
    FieldDef::new("EndAddress", FieldKind::VarUInt),
    FieldDef::new("FileOffset", FieldKind::VarUInt),
    FieldDef::new("FileName", FieldKind::Utf16Z),
    FieldDef::new("MetadataId", FieldKind::VarUInt),
];

static SYMBOL_METADATA_FIELDS: [FieldDef; 2] = [
    FieldDef::new("Id", FieldKind::VarUInt),
    FieldDef::new("SymbolMetadata", FieldKind::Utf8Prefixed),
];

fn identity(
    event_id: u16,
    task_id: u16,
    task_name: &'static str,
    task_guid: Guid,
    opcode: u8,
    opcode_name: &'static str,
) -> EventIdentity {
    EventIdentity {
        provider_guid: PROVIDER_GUID,
        provider_name: PROVIDER_NAME,
        event_id,
        version: 0,
        task_id,
        task_name,
        task_guid,
        opcode,
        opcode_name,
    }
}

pub fn templates() -> Vec<EventTemplate> {
    let process = |event_id, opcode, opcode_name| {
        identity(event_id, 1, "Process", PROCESS_TASK_GUID, opcode, opcode_name)
    };
    let mapping = |event_id, opcode, opcode_name| {
        identity(event_id, 2, "ProcessMapping", MAPPING_TASK_GUID, opcode, opcode_name)
    };

    vec![
        EventTemplate::new(process(EXISTING_PROCESS_ID, 11, "Existing"), &PROCESS_FIELDS),
        EventTemplate::new(process(PROCESS_CREATE_ID, 1, "Create"), &PROCESS_FIELDS),
        EventTemplate::new(process(PROCESS_EXIT_ID, 2, "Exit"), &PROCESS_EXIT_FIELDS),
        EventTemplate::new(mapping(PROCESS_MAPPING_ID, 10, "Map"), &PROCESS_MAPPING_FIELDS),
        EventTemplate::new(
            mapping(PROCESS_MAPPING_SYMBOL_METADATA_ID, 12, "SymbolMetadata"),
            &SYMBOL_METADATA_FIELDS,
        ),
    ]
}

trace_data! {
    ExistingProcessTraceData(PROVIDER_GUID, EXISTING_PROCESS_ID) {
        process_id(0) -> u64;
        namespace_id(1) -> u64;
        name(2) -> String;
        command_line(3) -> String;
    }
}

trace_data! {
    ProcessCreateTraceData(PROVIDER_GUID, PROCESS_CREATE_ID) {
        process_id(0) -> u64;
        namespace_id(1) -> u64;
        name(2) -> String;
        command_line(3) -> String;
    }
}

trace_data! {
    ProcessExitTraceData(PROVIDER_GUID, PROCESS_EXIT_ID) {
        process_id(0) -> u64;
        exit_code(1) -> i32;
    }
}

trace_data! {
    ProcessMappingTraceData(PROVIDER_GUID, PROCESS_MAPPING_ID) {
        id(0) -> u64;
        process_id(1) -> u64;
        start_address(2) -> u64;
        end_address(3) -> u64;
        file_offset(4) -> u64;
        file_name(5) -> String;
        metadata_id(6) -> u64;
    }
}

trace_data! {
    ProcessMappingSymbolMetadataTraceData(PROVIDER_GUID, PROCESS_MAPPING_SYMBOL_METADATA_ID) {
        id(0) -> u64;
        symbol_metadata_json(1) -> String;
    }
}

impl ProcessMappingSymbolMetadataTraceData<'_, '_> {
    /// The parsed metadata; unsupported or malformed JSON is `None`.
    pub fn symbol_metadata(&self) -> Result<Option<SymbolMetadata>, FieldError> {
        let json = self.symbol_metadata_json()?;
        Ok(SymbolMetadata::parse(&json))
    }
}
