//! Template registration and single-slot subscriptions.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use hashbrown::HashMap;
use log::{debug, trace};
use thiserror::Error;

use crate::guid::Guid;
use crate::template::{EventTemplate, EventView, SchemaError};

pub(crate) type FastMap<K, V> = HashMap<K, V, ahash::RandomState>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    InvalidSchema(#[from] SchemaError),

    #[error("an event with id {event_id} is already registered for provider {provider}")]
    DuplicateEvent { provider: Guid, event_id: u16 },

    #[error("discriminator `{discriminator}` is already registered (matching is case-insensitive)")]
    DuplicateDiscriminator { discriminator: String },

    #[error("subscription key (event id {event_id}, task {task_guid}) is already taken by `{existing}`")]
    DuplicateSubscriptionKey {
        event_id: u16,
        task_guid: Guid,
        existing: String,
    },
}

/// Every logical event type known to a decoder.
///
/// Built once before decoding starts, then shared read-only (typically behind an `Arc`).
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<Arc<EventTemplate>>,
    /// Wire lookup; dynamic templates never appear on the wire and are not indexed here.
    by_event: FastMap<(Guid, u16), usize>,
    /// Registration-ordered snapshot handed out by `templates`, rebuilt after each registration.
    snapshot: OnceLock<Arc<[Arc<EventTemplate>]>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        TemplateRegistry::default()
    }

    /// A registry preloaded with every built-in provider.
    pub fn with_builtin_providers() -> Result<Self, RegistryError> {
        let mut registry = TemplateRegistry::new();
        for template in crate::providers::builtin_templates() {
            registry.register(template)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, template: EventTemplate) -> Result<Arc<EventTemplate>, RegistryError> {
        template.validate_schema()?;

        let identity = template.identity();
        let wire_key = (identity.provider_guid, identity.event_id);
        let is_dynamic = template.discriminator().is_some();

        if !is_dynamic && self.by_event.contains_key(&wire_key) {
            return Err(RegistryError::DuplicateEvent {
                provider: identity.provider_guid,
                event_id: identity.event_id,
            });
        }

        if let Some(discriminator) = template.discriminator() {
            let clash = self
                .templates
                .iter()
                .filter_map(|t| t.discriminator())
                .any(|d| d.eq_ignore_ascii_case(discriminator));
            if clash {
                return Err(RegistryError::DuplicateDiscriminator {
                    discriminator: discriminator.to_string(),
                });
            }
        }

        let key = template.subscription_key();
        if let Some(existing) = self.templates.iter().find(|t| t.subscription_key() == key) {
            return Err(RegistryError::DuplicateSubscriptionKey {
                event_id: key.event_id,
                task_guid: key.task_guid,
                existing: existing.identity().event_name(),
            });
        }

        debug!(
            "registered `{}` ({}, event {})",
            identity.event_name(),
            identity.provider_name,
            identity.event_id
        );

        let template = Arc::new(template);
        if !is_dynamic {
            self.by_event.insert(wire_key, self.templates.len());
        }
        self.templates.push(Arc::clone(&template));
        self.snapshot = OnceLock::new();
        Ok(template)
    }

    /// The wire-level template for `(provider, event_id)`.
    pub fn lookup(&self, provider: Guid, event_id: u16) -> Option<&Arc<EventTemplate>> {
        self.by_event
            .get(&(provider, event_id))
            .map(|&index| &self.templates[index])
    }

    /// All registered templates, in registration order.
    pub fn templates(&self) -> Arc<[Arc<EventTemplate>]> {
        Arc::clone(self.snapshot.get_or_init(|| {
            trace!("building template snapshot ({} entries)", self.templates.len());
            self.templates.iter().cloned().collect()
        }))
    }

    /// Templates matching `filter`, e.g. to advertise available event types.
    pub fn enumerate<F>(&self, mut filter: F) -> Vec<Arc<EventTemplate>>
    where
        F: FnMut(&EventTemplate) -> bool,
    {
        self.templates()
            .iter()
            .filter(|t| filter(t))
            .cloned()
            .collect()
    }

    /// Concrete templates selected through an envelope's discriminator.
    pub fn dynamic_templates(&self) -> impl Iterator<Item = &Arc<EventTemplate>> {
        self.templates.iter().filter(|t| t.discriminator().is_some())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Subscriptions are keyed on event id and task GUID, which together identify a logical type
/// within a provider even when the wire carries a generic envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub event_id: u16,
    pub task_guid: Guid,
}

pub type Callback = Arc<dyn Fn(&EventView<'_>) + Send + Sync>;

/// At most one callback per logical event type.
///
/// Cloning yields another handle to the same slots, so a callback can hold one and modify its own
/// subscription; such changes apply from the next dispatched record on.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    slots: Arc<Mutex<FastMap<SubscriptionKey, Callback>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        SubscriptionRegistry::default()
    }

    /// Install `callback` for `template`, returning the callback it replaced.
    pub fn subscribe(&self, template: &EventTemplate, callback: Callback) -> Option<Callback> {
        let key = template.subscription_key();
        trace!("subscribing to `{}`", template.identity().event_name());
        self.lock().insert(key, callback)
    }

    /// Clear the slot for `template`, but only if `callback` is the one installed there.
    pub fn unsubscribe(&self, template: &EventTemplate, callback: &Callback) -> bool {
        let key = template.subscription_key();
        let mut slots = self.lock();
        match slots.get(&key) {
            Some(installed) if std::ptr::addr_eq(Arc::as_ptr(installed), Arc::as_ptr(callback)) => {
                slots.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn is_subscribed(&self, template: &EventTemplate) -> bool {
        self.lock().contains_key(&template.subscription_key())
    }

    /// Invoke the callback installed for the view's logical type, if any.
    pub fn dispatch(&self, view: &EventView<'_>) -> bool {
        let callback = self
            .lock()
            .get(&view.template().subscription_key())
            .cloned();

        match callback {
            Some(callback) => {
                callback(view);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FastMap<SubscriptionKey, Callback>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}
