#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]

//! Decoding of ETW/EventPipe event payloads.
//!
//! Records come from an external capture source as a `RecordHeader` plus payload bytes. The
//! `EventDecoder` finds the registered `EventTemplate` for each record, resolves discriminator
//! envelopes into their concrete types, and invokes the subscriber registered for the resulting
//! type with a lazily-decoded `EventView`.
//!
//! ```
//! use std::sync::Arc;
//! use etwpayload::{EventDecoder, RawRecord, RecordHeader, TemplateRegistry};
//! use etwpayload::providers::universal::{self, ProcessExitTraceData};
//!
//! let registry = Arc::new(TemplateRegistry::with_builtin_providers().unwrap());
//! let mut decoder = EventDecoder::new(Arc::clone(&registry));
//!
//! let template = registry.lookup(universal::PROVIDER_GUID, universal::PROCESS_EXIT_ID).unwrap();
//! decoder.subscriptions().subscribe(
//!     template,
//!     Arc::new(|view: &etwpayload::EventView<'_>| {
//!         let exit = ProcessExitTraceData::from_view(view).unwrap();
//!         assert_eq!(exit.exit_code().unwrap(), -1);
//!     }),
//! );
//!
//! let header = RecordHeader::new(universal::PROVIDER_GUID, universal::PROCESS_EXIT_ID);
//! let payload = [0x2A, 0xFF, 0xFF, 0xFF, 0xFF];
//! decoder.decode(&RawRecord::new(&header, &payload)).unwrap();
//! ```

#[macro_use]
mod macros;

pub mod codecs;
pub mod decoder;
pub mod dynamic;
pub mod err;
pub mod field_cursor;
pub mod guid;
pub mod providers;
pub mod record;
pub mod registry;
pub mod template;
pub mod value;

mod utils;

pub use crate::decoder::{
    DecodeError, DecodeOutcome, DecodeStats, DecoderSettings, EventDecoder, Result,
};
#[cfg(feature = "multithreading")]
pub use crate::decoder::decode_streams_parallel;
pub use crate::dynamic::{DynamicDispatcher, ResolvedEvent};
pub use crate::err::{DeserializationError, DeserializationResult};
pub use crate::field_cursor::{Decoded, FieldCursor, PointerSize, encode_var_uint, var_uint_len};
pub use crate::guid::Guid;
pub use crate::record::{OwnedRecord, RawRecord, RecordHeader};
pub use crate::registry::{
    Callback, RegistryError, SubscriptionKey, SubscriptionRegistry, TemplateRegistry,
};
pub use crate::template::{
    EventIdentity, EventTemplate, EventView, FieldDef, FieldError, FieldKind, SchemaError,
    TemplateKind,
};
pub use crate::value::{FieldValue, FromFieldValue};

#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
