use std::mem;
use std::sync::Arc;

use jiff::Timestamp;
use log::{debug, trace, warn};
use thiserror::Error;

use crate::dynamic::DynamicDispatcher;
use crate::err::DeserializationError;
use crate::guid::Guid;
use crate::record::{RawRecord, RecordHeader};
#[cfg(feature = "multithreading")]
use crate::record::OwnedRecord;
use crate::registry::{SubscriptionRegistry, TemplateRegistry};
use crate::template::{EventTemplate, EventView, FieldError};

pub type Result<T> = std::result::Result<T, DecodeError>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed `{event}` record (provider {provider}, event id {event_id})")]
    MalformedRecord {
        event: String,
        provider: Guid,
        event_id: u16,
        #[source]
        source: DeserializationError,
    },

    /// Misuse of the decoding API rather than bad input.
    #[error(transparent)]
    Field(FieldError),

    #[cfg(feature = "multithreading")]
    #[error("failed to build the decoding thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl DecodeError {
    fn from_field_error(template: &EventTemplate, header: &RecordHeader, err: FieldError) -> Self {
        match err {
            FieldError::Malformed(source) => DecodeError::MalformedRecord {
                event: template.identity().event_name(),
                provider: header.provider_guid,
                event_id: header.event_id,
                source,
            },
            other => DecodeError::Field(other),
        }
    }

    /// Whether only the offending record is affected.
    pub fn is_malformed_record(&self) -> bool {
        matches!(self, DecodeError::MalformedRecord { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecoderSettings {
    /// Resolve every field offset before dispatch, so truncated payloads never reach subscribers.
    validate_layout: bool,
    /// Threads used by `decode_streams_parallel`; 0 lets rayon decide.
    num_threads: usize,
    /// Reference point for `MSec` in rendered events.
    session_start: Option<Timestamp>,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        DecoderSettings {
            validate_layout: true,
            num_threads: 0,
            session_start: None,
        }
    }
}

impl DecoderSettings {
    pub fn new() -> Self {
        DecoderSettings::default()
    }

    pub fn validate_layout(mut self, validate_layout: bool) -> Self {
        self.validate_layout = validate_layout;
        self
    }

    /// Sets the number of worker threads for parallel stream decoding.
    /// `0` will let rayon decide; without the `multithreading` feature this is ignored.
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn session_start(mut self, session_start: Timestamp) -> Self {
        self.session_start = Some(session_start);
        self
    }

    pub fn should_validate_layout(&self) -> bool {
        self.validate_layout
    }

    pub fn get_num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn get_session_start(&self) -> Option<Timestamp> {
        self.session_start
    }
}

/// Per-decoder counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    pub records: u64,
    pub dispatched: u64,
    /// Decoded, but nobody was subscribed.
    pub unsubscribed: u64,
    /// No template for the record's provider and event id.
    pub unregistered: u64,
    /// Envelopes whose discriminator matched no concrete type.
    pub unrecognized_dynamic: u64,
    pub malformed: u64,
}

impl DecodeStats {
    fn since(&self, earlier: &DecodeStats) -> DecodeStats {
        DecodeStats {
            records: self.records - earlier.records,
            dispatched: self.dispatched - earlier.dispatched,
            unsubscribed: self.unsubscribed - earlier.unsubscribed,
            unregistered: self.unregistered - earlier.unregistered,
            unrecognized_dynamic: self.unrecognized_dynamic - earlier.unrecognized_dynamic,
            malformed: self.malformed - earlier.malformed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    Dispatched,
    NoSubscriber,
    Unregistered,
}

struct Dispatched {
    outcome: DecodeOutcome,
    fallback: bool,
    scratch: Vec<usize>,
}

/// Decodes one stream of records, one at a time, and hands each to its subscriber.
pub struct EventDecoder {
    registry: Arc<TemplateRegistry>,
    dispatcher: DynamicDispatcher,
    subscriptions: SubscriptionRegistry,
    settings: DecoderSettings,
    /// Offset table shared by consecutive bindings.
    scratch: Vec<usize>,
    stats: DecodeStats,
}

impl EventDecoder {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        let dispatcher = DynamicDispatcher::from_registry(&registry);
        EventDecoder {
            registry,
            dispatcher,
            subscriptions: SubscriptionRegistry::new(),
            settings: DecoderSettings::default(),
            scratch: Vec::new(),
            stats: DecodeStats::default(),
        }
    }

    pub fn with_configuration(mut self, settings: DecoderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: SubscriptionRegistry) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &DecoderSettings {
        &self.settings
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Decode `record` and invoke its subscriber, if any.
    ///
    /// Envelopes are resolved before the subscriber lookup, so subscribers of a concrete dynamic
    /// type see that type and never the envelope.
    pub fn decode(&mut self, record: &RawRecord<'_>) -> Result<DecodeOutcome> {
        self.stats.records += 1;
        let header = record.header;

        let Some(template) = self.registry.lookup(header.provider_guid, header.event_id) else {
            trace!(
                "no template for event {} of provider {}",
                header.event_id, header.provider_guid
            );
            self.stats.unregistered += 1;
            return Ok(DecodeOutcome::Unregistered);
        };

        let result = record
            .payload()
            .map_err(FieldError::from)
            .and_then(|payload| {
                let view = EventView::with_scratch(
                    template,
                    header,
                    payload,
                    mem::take(&mut self.scratch),
                )
                .with_session_start(self.settings.session_start);
                Self::resolve_and_dispatch(
                    &self.dispatcher,
                    &self.subscriptions,
                    self.settings.validate_layout,
                    view,
                )
            });

        match result {
            Ok(dispatched) => {
                self.scratch = dispatched.scratch;
                if dispatched.fallback {
                    self.stats.unrecognized_dynamic += 1;
                }
                match dispatched.outcome {
                    DecodeOutcome::Dispatched => self.stats.dispatched += 1,
                    _ => self.stats.unsubscribed += 1,
                }
                Ok(dispatched.outcome)
            }
            Err(err) => {
                let err = DecodeError::from_field_error(template, header, err);
                if err.is_malformed_record() {
                    self.stats.malformed += 1;
                }
                Err(err)
            }
        }
    }

    fn resolve_and_dispatch(
        dispatcher: &DynamicDispatcher,
        subscriptions: &SubscriptionRegistry,
        validate_layout: bool,
        view: EventView<'_>,
    ) -> std::result::Result<Dispatched, FieldError> {
        let (view, fallback) = if view.template().is_envelope() {
            let resolved = dispatcher.resolve(view)?;
            let fallback = resolved.is_fallback();
            (resolved.into_view(), fallback)
        } else {
            (view, false)
        };

        if validate_layout {
            view.resolve_layout()?;
        }

        let outcome = if subscriptions.dispatch(&view) {
            DecodeOutcome::Dispatched
        } else {
            DecodeOutcome::NoSubscriber
        };

        Ok(Dispatched {
            outcome,
            fallback,
            scratch: view.into_scratch(),
        })
    }

    /// Decode a whole stream. Malformed records are logged and skipped; only API misuse stops the
    /// stream. Returns the counters for this call.
    pub fn process<'a, I>(&mut self, records: I) -> Result<DecodeStats>
    where
        I: IntoIterator<Item = RawRecord<'a>>,
    {
        let before = self.stats;
        for record in records {
            match self.decode(&record) {
                Ok(_) => {}
                Err(DecodeError::MalformedRecord { event, source, .. }) => {
                    warn!("skipping malformed `{}` record: {}", event, source);
                }
                Err(e) => return Err(e),
            }
        }

        let stats = self.stats.since(&before);
        debug!("processed stream: {:?}", stats);
        Ok(stats)
    }
}

/// Decode independent streams concurrently, one private decoder per stream.
///
/// `make_subscriptions` is called with each stream's index to provide its subscribers.
#[cfg(feature = "multithreading")]
pub fn decode_streams_parallel<F>(
    registry: Arc<TemplateRegistry>,
    settings: &DecoderSettings,
    streams: &[Vec<OwnedRecord>],
    make_subscriptions: F,
) -> Result<Vec<DecodeStats>>
where
    F: Fn(usize) -> SubscriptionRegistry + Sync,
{
    use rayon::prelude::*;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.get_num_threads())
        .build()?;

    pool.install(|| {
        streams
            .par_iter()
            .enumerate()
            .map(|(index, stream)| {
                let mut decoder = EventDecoder::new(Arc::clone(&registry))
                    .with_configuration(settings.clone())
                    .with_subscriptions(make_subscriptions(index));
                decoder.process(stream.iter().map(OwnedRecord::as_raw))
            })
            .collect()
    })
}
