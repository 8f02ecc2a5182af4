//! Garbage collector events of the .NET runtime provider.
//!
//! Newer runtimes report several GC events through a single `GCDynamicEvent` envelope; the
//! concrete types below are selected by its `name` field and carry synthetic event ids so that
//! each has its own subscription slot.

use crate::guid::Guid;
use crate::template::{EventIdentity, EventTemplate, FieldDef, FieldError, FieldKind};

pub const PROVIDER_NAME: &str = "Microsoft-Windows-DotNETRuntime";
pub const PROVIDER_GUID: Guid = Guid::from_u128(0xe13c0d23_ccbc_4e12_931b_d9cc2eee27e4);
pub const GC_TASK_GUID: Guid = Guid::from_u128(0x044973cd_251f_4dff_a3e9_9d6307286b05);
const GC_TASK_ID: u16 = 1;

pub const SET_GC_HANDLE_ID: u16 = 30;
pub const DYNAMIC_EVENT_ID: u16 = 39;
pub const COMMITTED_USAGE_ID: u16 = 0xFF01;
pub const HEAP_COUNT_TUNING_ID: u16 = 0xFF02;
pub const HEAP_COUNT_SAMPLE_ID: u16 = 0xFF03;

const SET_GC_HANDLE_OPCODE: u8 = 33;
const DYNAMIC_EVENT_OPCODE: u8 = 41;

static DYNAMIC_EVENT_FIELDS: [FieldDef; 4] = [
    FieldDef::new("name", FieldKind::Utf16Z),
    FieldDef::new("dataSize", FieldKind::Int32),
    FieldDef::new("data", FieldKind::Binary { length_field: 1 }),
    FieldDef::new("instanceId", FieldKind::Int16),
];

static COMMITTED_USAGE_FIELDS: [FieldDef; 6] = [
    FieldDef::new("Version", FieldKind::Int16),
    FieldDef::new("TotalCommittedInUse", FieldKind::Int64),
    FieldDef::new("TotalCommittedInGlobalDecommit", FieldKind::Int64),
    FieldDef::new("TotalCommittedInFree", FieldKind::Int64),
    FieldDef::new("TotalCommittedInGlobalFree", FieldKind::Int64),
    FieldDef::new("TotalBookkeepingCommitted", FieldKind::Int64),
];

static HEAP_COUNT_TUNING_FIELDS: [FieldDef; 9] = [
    FieldDef::new("Version", FieldKind::Int16),
    FieldDef::new("NewHeapCount", FieldKind::Int16),
    FieldDef::new("GCIndex", FieldKind::Int64),
    FieldDef::new("MedianThroughputCostPercent", FieldKind::Real32),
    FieldDef::new("SmoothedMedianThroughputCostPercent", FieldKind::Real32),
    FieldDef::new("ThroughputCostPercentReductionPerStepUp", FieldKind::Real32),
    FieldDef::new("ThroughputCostPercentIncreasePerStepDown", FieldKind::Real32),
    FieldDef::new("SpaceCostPercentIncreasePerStepUp", FieldKind::Real32),
    FieldDef::new("SpaceCostPercentDecreasePerStepDown", FieldKind::Real32),
];

static HEAP_COUNT_SAMPLE_FIELDS: [FieldDef; 5] = [
    FieldDef::new("Version", FieldKind::Int16),
    FieldDef::new("GCIndex", FieldKind::Int64),
    FieldDef::new("ElapsedTimeBetweenGCsMSec", FieldKind::Int64),
    FieldDef::new("GCPauseTimeMSec", FieldKind::Int64),
    FieldDef::new("MslWaitTimeMSec", FieldKind::Int64),
];

static SET_GC_HANDLE_FIELDS: [FieldDef; 6] = [
    FieldDef::new("HandleID", FieldKind::Pointer),
    FieldDef::new("ObjectID", FieldKind::Pointer),
    FieldDef::new("Kind", FieldKind::UInt32),
    FieldDef::new("Generation", FieldKind::UInt32),
    FieldDef::new("AppDomainID", FieldKind::UInt64),
    FieldDef::new("ClrInstanceID", FieldKind::UInt16),
];

fn identity(event_id: u16, opcode: u8, opcode_name: &'static str) -> EventIdentity {
    EventIdentity {
        provider_guid: PROVIDER_GUID,
        provider_name: PROVIDER_NAME,
        event_id,
        version: 0,
        task_id: GC_TASK_ID,
        task_name: "GC",
        task_guid: GC_TASK_GUID,
        opcode,
        opcode_name,
    }
}

pub fn templates() -> Vec<EventTemplate> {
    vec![
        EventTemplate::new(
            identity(DYNAMIC_EVENT_ID, DYNAMIC_EVENT_OPCODE, "DynamicEvent"),
            &DYNAMIC_EVENT_FIELDS,
        )
        .envelope(),
        EventTemplate::new(
            identity(COMMITTED_USAGE_ID, DYNAMIC_EVENT_OPCODE, "CommittedUsage"),
            &COMMITTED_USAGE_FIELDS,
        )
        .dynamic("CommittedUsage"),
        EventTemplate::new(
            identity(HEAP_COUNT_TUNING_ID, DYNAMIC_EVENT_OPCODE, "HeapCountTuning"),
            &HEAP_COUNT_TUNING_FIELDS,
        )
        .dynamic("HeapCountTuning"),
        EventTemplate::new(
            identity(HEAP_COUNT_SAMPLE_ID, DYNAMIC_EVENT_OPCODE, "HeapCountSample"),
            &HEAP_COUNT_SAMPLE_FIELDS,
        )
        .dynamic("HeapCountSample"),
        EventTemplate::new(
            identity(SET_GC_HANDLE_ID, SET_GC_HANDLE_OPCODE, "SetGCHandle"),
            &SET_GC_HANDLE_FIELDS,
        ),
    ]
}

trace_data! {
    /// `GCDynamicEvent` whose name matched no known type.
    GcDynamicTraceData(PROVIDER_GUID, DYNAMIC_EVENT_ID) {
        name(0) -> String;
        data_size(1) -> i32;
        instance_id(3) -> i16;
    }
}

impl<'r> GcDynamicTraceData<'_, 'r> {
    /// The opaque payload the runtime could not describe.
    pub fn data(&self) -> Result<&'r [u8], FieldError> {
        self.view().get(2)
    }
}

trace_data! {
    CommittedUsageTraceData(PROVIDER_GUID, COMMITTED_USAGE_ID) {
        version(0) -> i16;
        total_committed_in_use(1) -> i64;
        total_committed_in_global_decommit(2) -> i64;
        total_committed_in_free(3) -> i64;
        total_committed_in_global_free(4) -> i64;
        total_bookkeeping_committed(5) -> i64;
    }
}

trace_data! {
    HeapCountTuningTraceData(PROVIDER_GUID, HEAP_COUNT_TUNING_ID) {
        version(0) -> i16;
        new_heap_count(1) -> i16;
        gc_index(2) -> i64;
        median_throughput_cost_percent(3) -> f32;
        smoothed_median_throughput_cost_percent(4) -> f32;
        throughput_cost_percent_reduction_per_step_up(5) -> f32;
        throughput_cost_percent_increase_per_step_down(6) -> f32;
        space_cost_percent_increase_per_step_up(7) -> f32;
        space_cost_percent_decrease_per_step_down(8) -> f32;
    }
}

trace_data! {
    HeapCountSampleTraceData(PROVIDER_GUID, HEAP_COUNT_SAMPLE_ID) {
        version(0) -> i16;
        gc_index(1) -> i64;
        elapsed_time_between_gcs_msec(2) -> i64;
        gc_pause_time_msec(3) -> i64;
        msl_wait_time_msec(4) -> i64;
    }
}

trace_data! {
    SetGcHandleTraceData(PROVIDER_GUID, SET_GC_HANDLE_ID) {
        handle_id(0) -> u64;
        object_id(1) -> u64;
        kind(2) -> u32;
        generation(3) -> u32;
        app_domain_id(4) -> u64;
        clr_instance_id(5) -> u16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_cursor::PointerSize;
    use crate::record::RecordHeader;

    #[test]
    fn test_committed_usage_offsets() {
        let template = templates().swap_remove(1);
        let mut payload = 1i16.to_le_bytes().to_vec();
        for v in [10i64, 20, 30, 40, 50] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        let header = RecordHeader::new(PROVIDER_GUID, COMMITTED_USAGE_ID);
        let view = template.bind(&header, &payload);

        let offsets: Vec<usize> = (0..6).map(|i| view.field_offset(i).unwrap()).collect();
        assert_eq!(offsets, vec![0, 2, 10, 18, 26, 34]);

        let usage = CommittedUsageTraceData::from_view(&view).unwrap();
        assert_eq!(usage.version().unwrap(), 1);
        assert_eq!(usage.total_committed_in_global_free().unwrap(), 40);
        assert_eq!(usage.total_bookkeeping_committed().unwrap(), 50);
        assert!(HeapCountSampleTraceData::from_view(&view).is_none());
    }

    #[test]
    fn test_set_gc_handle_on_32_bit_process() {
        let template = templates().pop().unwrap();
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x1000u32.to_le_bytes());
        payload.extend_from_slice(&0x2000u32.to_le_bytes());
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&9u64.to_le_bytes());
        payload.extend_from_slice(&3u16.to_le_bytes());

        let header = RecordHeader::new(PROVIDER_GUID, SET_GC_HANDLE_ID)
            .with_pointer_size(PointerSize::Four);
        let view = template.bind(&header, &payload);
        let handle = SetGcHandleTraceData::from_view(&view).unwrap();

        assert_eq!(handle.object_id().unwrap(), 0x2000);
        assert_eq!(handle.app_domain_id().unwrap(), 9);
        assert_eq!(handle.clr_instance_id().unwrap(), 3);
        assert_eq!(view.resolve_layout().unwrap(), payload.len());
    }
}
