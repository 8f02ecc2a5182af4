mod fixtures;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use etwpayload::providers::universal::{self, ExistingProcessTraceData};
use etwpayload::{
    Callback, DecodeOutcome, DecoderSettings, EventDecoder, EventView, RawRecord, RecordHeader,
    SubscriptionRegistry,
};
use fixtures::*;
use jiff::Timestamp;
use pretty_assertions::assert_eq;

fn existing_process(pid: u64, name: &str, command_line: &str) -> Vec<u8> {
    PayloadBuilder::new()
        .var_uint(pid)
        .var_uint(0)
        .utf8_prefixed(name)
        .utf8_suffixed(command_line)
        .build()
}

#[test]
fn test_last_subscriber_wins() {
    ensure_env_logger_initialized();
    let registry = builtin_registry();
    let template = registry
        .lookup(universal::PROVIDER_GUID, universal::EXISTING_PROCESS_ID)
        .unwrap();
    let mut decoder = EventDecoder::new(Arc::clone(&registry));

    let first_log = Arc::new(Mutex::new(Vec::new()));
    let second_log = Arc::new(Mutex::new(Vec::new()));
    let first = recording_callback(&first_log);
    let second = recording_callback(&second_log);

    decoder.subscriptions().subscribe(template, first.clone());
    let replaced = decoder.subscriptions().subscribe(template, second.clone());
    assert!(Arc::ptr_eq(&replaced.unwrap(), &first));

    let header = RecordHeader::new(universal::PROVIDER_GUID, universal::EXISTING_PROCESS_ID);
    let payload = existing_process(1, "init", "/sbin/init splash");
    decoder.decode(&RawRecord::new(&header, &payload)).unwrap();

    assert!(first_log.lock().unwrap().is_empty());
    assert_eq!(second_log.lock().unwrap().len(), 1);

    // Removing a callback that is not installed leaves the slot alone.
    assert!(!decoder.subscriptions().unsubscribe(template, &first));
    decoder.decode(&RawRecord::new(&header, &payload)).unwrap();
    assert_eq!(second_log.lock().unwrap().len(), 2);

    assert!(decoder.subscriptions().unsubscribe(template, &second));
    assert_eq!(
        decoder.decode(&RawRecord::new(&header, &payload)).unwrap(),
        DecodeOutcome::NoSubscriber
    );
}

#[test]
fn test_unsubscribing_during_dispatch_applies_to_next_record() {
    ensure_env_logger_initialized();
    let registry = builtin_registry();
    let template = Arc::clone(
        registry
            .lookup(universal::PROVIDER_GUID, universal::EXISTING_PROCESS_ID)
            .unwrap(),
    );
    let mut decoder = EventDecoder::new(Arc::clone(&registry));

    let hits = Arc::new(AtomicUsize::new(0));
    let me: Arc<Mutex<Option<Callback>>> = Arc::new(Mutex::new(None));
    let callback: Callback = {
        let subscriptions = decoder.subscriptions().clone();
        let template = Arc::clone(&template);
        let hits = Arc::clone(&hits);
        let me = Arc::clone(&me);
        Arc::new(move |view: &EventView<'_>| {
            hits.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = me.lock().unwrap().take() {
                assert!(subscriptions.unsubscribe(&template, &me));
            }
            // The record being dispatched is still fully readable.
            let process = ExistingProcessTraceData::from_view(view).unwrap();
            assert_eq!(process.name().unwrap(), "sh");
        })
    };
    *me.lock().unwrap() = Some(callback.clone());
    decoder.subscriptions().subscribe(&template, callback);

    let header = RecordHeader::new(universal::PROVIDER_GUID, universal::EXISTING_PROCESS_ID);
    let payload = existing_process(7, "sh", "sh -c true");
    let stats = decoder
        .process([
            RawRecord::new(&header, &payload),
            RawRecord::new(&header, &payload),
        ])
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.unsubscribed, 1);
}

#[test]
fn test_render_uses_session_relative_time() {
    ensure_env_logger_initialized();
    let registry = builtin_registry();
    let template = registry
        .lookup(universal::PROVIDER_GUID, universal::EXISTING_PROCESS_ID)
        .unwrap();

    let start: Timestamp = "2024-01-01T00:00:00Z".parse().unwrap();
    let mut decoder = EventDecoder::new(Arc::clone(&registry))
        .with_configuration(DecoderSettings::new().session_start(start));
    let log = Arc::new(Mutex::new(Vec::new()));
    decoder
        .subscriptions()
        .subscribe(template, recording_callback(&log));

    let header = RecordHeader::new(universal::PROVIDER_GUID, universal::EXISTING_PROCESS_ID)
        .with_timestamp("2024-01-01T00:00:01.5Z".parse().unwrap())
        .with_process(7, 7);
    let payload = existing_process(7, "a&b", "x \"y\"");
    decoder.decode(&RawRecord::new(&header, &payload)).unwrap();

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &["<Event MSec=\"1500.0000\" PID=\"7\" TID=\"7\" EventName=\"Process/Existing\" \
           ProviderName=\"Universal.System\" ProcessId=\"7\" NamespaceId=\"0\" Name=\"a&amp;b\" \
           CommandLine=\"x &quot;y&quot;\"/>"
            .to_string()]
    );
}

#[cfg(feature = "multithreading")]
#[test]
fn test_parallel_streams_use_private_decoders() {
    use etwpayload::{OwnedRecord, decode_streams_parallel};

    ensure_env_logger_initialized();
    let registry = builtin_registry();
    let template = Arc::clone(
        registry
            .lookup(universal::PROVIDER_GUID, universal::EXISTING_PROCESS_ID)
            .unwrap(),
    );

    let header = RecordHeader::new(universal::PROVIDER_GUID, universal::EXISTING_PROCESS_ID);
    let streams: Vec<Vec<OwnedRecord>> = (0..4u64)
        .map(|stream| {
            (0..=stream)
                .map(|pid| {
                    OwnedRecord::new(header.clone(), existing_process(pid, "p", "p --flag"))
                })
                .collect()
        })
        .collect();

    let total = Arc::new(AtomicUsize::new(0));
    let stats = decode_streams_parallel(
        Arc::clone(&registry),
        &DecoderSettings::new().num_threads(2),
        &streams,
        |_index| {
            let subscriptions = SubscriptionRegistry::new();
            let total = Arc::clone(&total);
            subscriptions.subscribe(
                &template,
                Arc::new(move |_view: &EventView<'_>| {
                    total.fetch_add(1, Ordering::SeqCst);
                }),
            );
            subscriptions
        },
    )
    .unwrap();

    assert_eq!(
        stats.iter().map(|s| s.dispatched).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert_eq!(total.load(Ordering::SeqCst), 10);
}
