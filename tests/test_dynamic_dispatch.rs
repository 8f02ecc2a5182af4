mod fixtures;

use std::sync::{Arc, Mutex};

use etwpayload::providers::gc::{
    self, CommittedUsageTraceData, GcDynamicTraceData, HeapCountSampleTraceData,
};
use etwpayload::{
    DecodeOutcome, DynamicDispatcher, EventDecoder, EventView, FieldError, RawRecord,
    RecordHeader, ResolvedEvent,
};
use fixtures::*;
use pretty_assertions::assert_eq;

#[test]
fn test_discriminator_matches_case_insensitively() {
    ensure_env_logger_initialized();
    let registry = builtin_registry();
    let dispatcher = DynamicDispatcher::from_registry(&registry);
    let envelope = registry
        .lookup(gc::PROVIDER_GUID, gc::DYNAMIC_EVENT_ID)
        .unwrap();

    let header = RecordHeader::new(gc::PROVIDER_GUID, gc::DYNAMIC_EVENT_ID);
    let payload = gc_dynamic_envelope("committedusage", &committed_usage_data([1, 2, 3, 4, 5]));

    let resolved = dispatcher.resolve(envelope.bind(&header, &payload)).unwrap();
    let ResolvedEvent::Concrete(view) = resolved else {
        panic!("expected a concrete event");
    };

    let identity = view.identity();
    assert_eq!(identity.event_id, gc::COMMITTED_USAGE_ID);
    assert_eq!(identity.event_name(), "GC/CommittedUsage");
    assert_eq!(
        view.field_names(),
        &[
            "Version",
            "TotalCommittedInUse",
            "TotalCommittedInGlobalDecommit",
            "TotalCommittedInFree",
            "TotalCommittedInGlobalFree",
            "TotalBookkeepingCommitted",
        ]
    );

    let usage = CommittedUsageTraceData::from_view(&view).unwrap();
    assert_eq!(usage.total_committed_in_use().unwrap(), 1);
    assert_eq!(usage.total_bookkeeping_committed().unwrap(), 5);
}

#[test]
fn test_unmatched_discriminator_keeps_the_envelope_schema() {
    ensure_env_logger_initialized();
    let registry = builtin_registry();
    let dispatcher = DynamicDispatcher::from_registry(&registry);
    let envelope = registry
        .lookup(gc::PROVIDER_GUID, gc::DYNAMIC_EVENT_ID)
        .unwrap();

    let header = RecordHeader::new(gc::PROVIDER_GUID, gc::DYNAMIC_EVENT_ID);
    let payload = gc_dynamic_envelope("bogus", &[0xDE, 0xAD]);

    let resolved = dispatcher.resolve(envelope.bind(&header, &payload)).unwrap();
    assert!(resolved.is_fallback());

    let view = resolved.into_view();
    assert_eq!(view.field_names(), &["name", "dataSize", "data", "instanceId"]);
    assert!(matches!(
        view.field_value(4),
        Err(FieldError::InvalidFieldIndex { index: 4, count: 4, .. })
    ));

    let fallback = GcDynamicTraceData::from_view(&view).unwrap();
    assert_eq!(fallback.name().unwrap(), "bogus");
    assert_eq!(fallback.data().unwrap(), &[0xDE, 0xAD]);
    assert_eq!(fallback.instance_id().unwrap(), 0);
}

#[test]
fn test_each_dynamic_type_has_its_own_subscriber() {
    ensure_env_logger_initialized();
    let registry = builtin_registry();
    let mut decoder = EventDecoder::new(Arc::clone(&registry));

    let usage_log = Arc::new(Mutex::new(Vec::new()));
    let sample_log = Arc::new(Mutex::new(Vec::new()));
    let concrete = |id| {
        registry
            .dynamic_templates()
            .find(|t| t.identity().event_id == id)
            .cloned()
            .unwrap()
    };
    decoder.subscriptions().subscribe(
        &concrete(gc::COMMITTED_USAGE_ID),
        recording_callback(&usage_log),
    );

    let sample_seen = Arc::clone(&sample_log);
    decoder.subscriptions().subscribe(
        &concrete(gc::HEAP_COUNT_SAMPLE_ID),
        Arc::new(move |view: &EventView<'_>| {
            let sample = HeapCountSampleTraceData::from_view(view).unwrap();
            sample_seen
                .lock()
                .unwrap()
                .push(sample.gc_pause_time_msec().unwrap().to_string());
        }),
    );

    let header = RecordHeader::new(gc::PROVIDER_GUID, gc::DYNAMIC_EVENT_ID).with_process(10, 20);
    let usage = gc_dynamic_envelope("CommittedUsage", &committed_usage_data([5, 4, 3, 2, 1]));
    let sample = gc_dynamic_envelope(
        "HEAPCOUNTSAMPLE",
        &PayloadBuilder::new().i16(1).i64(7).i64(100).i64(12).i64(0).build(),
    );
    let tuning = gc_dynamic_envelope("HeapCountTuning", &PayloadBuilder::new().i16(1).build());

    assert_eq!(
        decoder.decode(&RawRecord::new(&header, &usage)).unwrap(),
        DecodeOutcome::Dispatched
    );
    assert_eq!(
        decoder.decode(&RawRecord::new(&header, &sample)).unwrap(),
        DecodeOutcome::Dispatched
    );
    // Truncated concrete payload: rejected before any subscriber could see it.
    assert!(
        decoder
            .decode(&RawRecord::new(&header, &tuning))
            .unwrap_err()
            .is_malformed_record()
    );

    let usage_log = usage_log.lock().unwrap();
    assert_eq!(usage_log.len(), 1);
    assert!(usage_log[0].contains("EventName=\"GC/CommittedUsage\""));
    assert!(usage_log[0].contains("PID=\"10\" TID=\"20\""));
    assert!(usage_log[0].contains("TotalCommittedInUse=\"5\""));
    assert_eq!(*sample_log.lock().unwrap(), vec!["12".to_string()]);
}

#[test]
fn test_envelope_subscriber_only_sees_unrecognized_events() {
    ensure_env_logger_initialized();
    let registry = builtin_registry();
    let mut decoder = EventDecoder::new(Arc::clone(&registry));

    let log = Arc::new(Mutex::new(Vec::new()));
    let envelope = registry
        .lookup(gc::PROVIDER_GUID, gc::DYNAMIC_EVENT_ID)
        .unwrap();
    decoder
        .subscriptions()
        .subscribe(envelope, recording_callback(&log));

    let header = RecordHeader::new(gc::PROVIDER_GUID, gc::DYNAMIC_EVENT_ID);
    let known = gc_dynamic_envelope("CommittedUsage", &committed_usage_data([0; 5]));
    let unknown = gc_dynamic_envelope("SomethingNew", &[1, 2, 3]);

    let stats = decoder
        .process([
            RawRecord::new(&header, &known),
            RawRecord::new(&header, &unknown),
        ])
        .unwrap();

    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.unsubscribed, 1);
    assert_eq!(stats.unrecognized_dynamic, 1);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("name=\"SomethingNew\""));
    assert!(log[0].contains("data=\"0x010203\""));
}
