//! Resolution of discriminator envelopes into concrete event types.
//!
//! Some events only exist on the wire as a generic envelope:
//!
//! ```text
//! name       UTF-16 NUL-terminated discriminator
//! dataSize   int32
//! data       dataSize bytes, the concrete payload
//! instanceId int16
//! ```
//!
//! The dispatcher picks the concrete template whose discriminator matches `name` (ignoring ASCII
//! case) and rebinds it to the `data` bytes. Unknown names keep the envelope view.

use std::borrow::Cow;
use std::sync::Arc;

use log::{debug, trace};

use crate::registry::{FastMap, TemplateRegistry};
use crate::template::{EventTemplate, EventView, FieldError};

pub const ENVELOPE_NAME_FIELD: &str = "name";
pub const ENVELOPE_DATA_FIELD: &str = "data";

/// Outcome of resolving an envelope. Resolution consumes the envelope view, so it happens at most
/// once per record.
#[derive(Debug)]
pub enum ResolvedEvent<'r> {
    /// Bound to the concrete template selected by the discriminator.
    Concrete(EventView<'r>),
    /// The discriminator matched nothing; the envelope's own fields are all there is.
    Fallback(EventView<'r>),
}

impl<'r> ResolvedEvent<'r> {
    pub fn view(&self) -> &EventView<'r> {
        match self {
            ResolvedEvent::Concrete(view) | ResolvedEvent::Fallback(view) => view,
        }
    }

    pub fn into_view(self) -> EventView<'r> {
        match self {
            ResolvedEvent::Concrete(view) | ResolvedEvent::Fallback(view) => view,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ResolvedEvent::Fallback(_))
    }
}

/// Discriminator to concrete template mapping, fixed once built.
#[derive(Debug, Default, Clone)]
pub struct DynamicDispatcher {
    by_discriminator: FastMap<String, Arc<EventTemplate>>,
}

impl DynamicDispatcher {
    pub fn from_registry(registry: &TemplateRegistry) -> Self {
        let mut by_discriminator = FastMap::default();
        for template in registry.dynamic_templates() {
            if let Some(discriminator) = template.discriminator() {
                by_discriminator.insert(discriminator.to_ascii_lowercase(), Arc::clone(template));
            }
        }
        debug!("dynamic dispatcher knows {} concrete types", by_discriminator.len());
        DynamicDispatcher { by_discriminator }
    }

    pub fn lookup(&self, discriminator: &str) -> Option<&Arc<EventTemplate>> {
        self.by_discriminator
            .get(discriminator.to_ascii_lowercase().as_str())
    }

    pub fn len(&self) -> usize {
        self.by_discriminator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_discriminator.is_empty()
    }

    /// Resolve `envelope` to its concrete type.
    ///
    /// The concrete view reuses the envelope's offset table and sees only the `data` bytes. Failing
    /// to read the discriminator or the data slice is a malformed record, not a fallback.
    pub fn resolve<'r>(&'r self, envelope: EventView<'r>) -> Result<ResolvedEvent<'r>, FieldError> {
        let template = envelope.template();
        if !template.is_envelope() {
            return Err(FieldError::NotAnEnvelope {
                event: template.identity().event_name(),
            });
        }

        let name: Cow<'r, str> = envelope.get(field_index(template, ENVELOPE_NAME_FIELD)?)?;
        let Some(concrete) = self.lookup(&name) else {
            trace!("unrecognized dynamic event `{}`", name);
            return Ok(ResolvedEvent::Fallback(envelope));
        };

        let data: &'r [u8] = envelope.get(field_index(template, ENVELOPE_DATA_FIELD)?)?;
        trace!(
            "`{}` resolved to `{}` ({} bytes)",
            name,
            concrete.identity().event_name(),
            data.len()
        );

        let header = envelope.header();
        let session_start = envelope.session_start();
        let scratch = envelope.into_scratch();
        let view = EventView::with_scratch(concrete, header, data, scratch)
            .with_session_start(session_start);
        Ok(ResolvedEvent::Concrete(view))
    }
}

fn field_index(template: &EventTemplate, name: &str) -> Result<usize, FieldError> {
    template
        .field_index(name)
        .ok_or_else(|| FieldError::UnknownFieldName {
            event: template.identity().event_name(),
            name: name.to_string(),
        })
}
