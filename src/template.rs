//! Logical event types and payload views bound to a single record.
//!
//! An `EventTemplate` is immutable metadata: identity plus an ordered field schema. Binding it to
//! a record payload yields an `EventView`, which resolves field offsets strictly left-to-right and
//! memoizes them for the lifetime of that binding only.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt::Write;

use jiff::Timestamp;
use log::trace;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codecs::xml_text;
use crate::err::DeserializationError;
use crate::field_cursor::{Decoded, FieldCursor};
use crate::guid::Guid;
use crate::record::RecordHeader;
use crate::registry::SubscriptionKey;
use crate::value::{FieldValue, FromFieldValue};

/// Wire encoding of a single payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Real32,
    Real64,
    /// Four byte Win32 `BOOL`.
    Bool32,
    Guid,
    /// 4 or 8 bytes, depending on the bitness of the emitting process.
    Pointer,
    VarUInt,
    /// NUL-terminated UTF-16LE.
    Utf16Z,
    /// `[u16 byte length][UTF-8 bytes]`.
    Utf8Prefixed,
    /// `[UTF-8 bytes][u16 byte length]`, occupying the tail of the payload.
    Utf8Suffixed,
    /// Raw bytes whose length is the value of an earlier integral field.
    Binary { length_field: usize },
    /// LZNT1 compressed UTF-16 XML spanning the rest of the payload; the uncompressed size is the
    /// value of an earlier integral field.
    CompressedXml { size_field: usize },
}

impl FieldKind {
    fn is_integral(self) -> bool {
        matches!(
            self,
            FieldKind::Int8
                | FieldKind::UInt8
                | FieldKind::Int16
                | FieldKind::UInt16
                | FieldKind::Int32
                | FieldKind::UInt32
                | FieldKind::Int64
                | FieldKind::UInt64
                | FieldKind::VarUInt
        )
    }

    /// Kinds that consume the remainder of the payload.
    fn is_tail(self) -> bool {
        matches!(
            self,
            FieldKind::Utf8Suffixed | FieldKind::CompressedXml { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDef {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        FieldDef { name, kind }
    }
}

/// Externally-visible identity of a logical event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventIdentity {
    pub provider_guid: Guid,
    pub provider_name: &'static str,
    pub event_id: u16,
    pub version: u8,
    pub task_id: u16,
    pub task_name: &'static str,
    pub task_guid: Guid,
    pub opcode: u8,
    pub opcode_name: &'static str,
}

impl EventIdentity {
    /// `Task/Opcode`, the conventional display name of an event.
    pub fn event_name(&self) -> String {
        if self.opcode_name.is_empty() {
            self.task_name.to_string()
        } else {
            format!("{}/{}", self.task_name, self.opcode_name)
        }
    }
}

/// How records of a template reach subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Decoded directly from its wire declaration.
    Plain,
    /// A generic wire event whose payload names the concrete type it carries.
    Envelope,
    /// Never seen on the wire; selected by an envelope's discriminator.
    Dynamic { discriminator: &'static str },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("`{event}`: field `{field}` takes its length from field #{length_field}, which does not precede it")]
    LengthFieldNotBefore {
        event: String,
        field: &'static str,
        length_field: usize,
    },

    #[error("`{event}`: field `{field}` takes its length from `{length_field}`, which is not an integer")]
    LengthFieldNotIntegral {
        event: String,
        field: &'static str,
        length_field: &'static str,
    },

    #[error("`{event}`: field `{field}` consumes the rest of the payload and must be the last field")]
    TailFieldNotLast { event: String, field: &'static str },

    #[error("`{event}`: duplicate field name `{field}`")]
    DuplicateFieldName { event: String, field: &'static str },
}

/// Failure to produce a field value.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("field index {index} is outside the schema of `{event}` ({count} fields)")]
    InvalidFieldIndex {
        event: String,
        index: usize,
        count: usize,
    },

    #[error("`{event}` has no field named `{name}`")]
    UnknownFieldName { event: String, name: String },

    #[error("field `{field}` of `{event}` is not {expected}")]
    TypeMismatch {
        event: String,
        field: &'static str,
        expected: &'static str,
    },

    #[error("`{event}` is not a discriminator envelope")]
    NotAnEnvelope { event: String },

    #[error(transparent)]
    InvalidSchema(#[from] SchemaError),

    #[error(transparent)]
    Malformed(#[from] DeserializationError),
}

impl FieldError {
    /// Errors caused by the calling code rather than by the record bytes.
    pub fn is_programming_error(&self) -> bool {
        !matches!(self, FieldError::Malformed(_))
    }
}

/// Immutable metadata and field schema for one logical event type.
#[derive(Debug)]
pub struct EventTemplate {
    identity: EventIdentity,
    kind: TemplateKind,
    fields: &'static [FieldDef],
    names: Vec<&'static str>,
}

impl EventTemplate {
    pub fn new(identity: EventIdentity, fields: &'static [FieldDef]) -> Self {
        EventTemplate {
            identity,
            kind: TemplateKind::Plain,
            fields,
            names: fields.iter().map(|f| f.name).collect(),
        }
    }

    /// Mark this template as a discriminator envelope.
    pub fn envelope(mut self) -> Self {
        self.kind = TemplateKind::Envelope;
        self
    }

    /// Mark this template as a concrete type selected by `discriminator`.
    pub fn dynamic(mut self, discriminator: &'static str) -> Self {
        self.kind = TemplateKind::Dynamic { discriminator };
        self
    }

    pub fn identity(&self) -> &EventIdentity {
        &self.identity
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn is_envelope(&self) -> bool {
        self.kind == TemplateKind::Envelope
    }

    pub fn discriminator(&self) -> Option<&'static str> {
        match self.kind {
            TemplateKind::Dynamic { discriminator } => Some(discriminator),
            _ => None,
        }
    }

    pub fn fields(&self) -> &'static [FieldDef] {
        self.fields
    }

    /// Field names in schema order.
    pub fn field_names(&self) -> &[&'static str] {
        &self.names
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|&n| n == name)
    }

    pub fn subscription_key(&self) -> SubscriptionKey {
        SubscriptionKey {
            event_id: self.identity.event_id,
            task_guid: self.identity.task_guid,
        }
    }

    /// Bind this template to a payload.
    pub fn bind<'r>(&'r self, header: &'r RecordHeader, payload: &'r [u8]) -> EventView<'r> {
        EventView::with_scratch(self, header, payload, Vec::new())
    }

    pub(crate) fn validate_schema(&self) -> Result<(), SchemaError> {
        let event = || self.identity.event_name();

        for (index, field) in self.fields.iter().enumerate() {
            if self.fields[..index].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateFieldName {
                    event: event(),
                    field: field.name,
                });
            }

            if field.kind.is_tail() && index + 1 != self.fields.len() {
                return Err(SchemaError::TailFieldNotLast {
                    event: event(),
                    field: field.name,
                });
            }

            if let FieldKind::Binary { length_field } | FieldKind::CompressedXml { size_field: length_field } =
                field.kind
            {
                if length_field >= index {
                    return Err(SchemaError::LengthFieldNotBefore {
                        event: event(),
                        field: field.name,
                        length_field,
                    });
                }
                let source = self.fields[length_field];
                if !source.kind.is_integral() {
                    return Err(SchemaError::LengthFieldNotIntegral {
                        event: event(),
                        field: field.name,
                        length_field: source.name,
                    });
                }
            }
        }

        Ok(())
    }
}

/// A template bound to exactly one record payload.
///
/// Field offsets are resolved on demand, left-to-right, and memoized for this binding. Creating a
/// view for another record starts from an empty offset table.
pub struct EventView<'r> {
    template: &'r EventTemplate,
    header: &'r RecordHeader,
    cursor: FieldCursor<'r>,
    /// `ends[k]` is the offset right after field `k`.
    ends: RefCell<Vec<usize>>,
    session_start: Option<Timestamp>,
}

impl<'r> EventView<'r> {
    /// Bind `template` to `payload`, reusing `scratch` for the offset table.
    pub(crate) fn with_scratch(
        template: &'r EventTemplate,
        header: &'r RecordHeader,
        payload: &'r [u8],
        mut scratch: Vec<usize>,
    ) -> Self {
        scratch.clear();
        EventView {
            template,
            header,
            cursor: FieldCursor::new(payload, header.pointer_size),
            ends: RefCell::new(scratch),
            session_start: None,
        }
    }

    /// Give back the offset table so the next binding can reuse its allocation.
    pub(crate) fn into_scratch(self) -> Vec<usize> {
        self.ends.into_inner()
    }

    /// Render `MSec` relative to `start` instead of absolute timestamps.
    pub fn with_session_start(mut self, start: Option<Timestamp>) -> Self {
        self.session_start = start;
        self
    }

    pub fn session_start(&self) -> Option<Timestamp> {
        self.session_start
    }

    pub fn template(&self) -> &'r EventTemplate {
        self.template
    }

    pub fn identity(&self) -> &'r EventIdentity {
        &self.template.identity
    }

    pub fn header(&self) -> &'r RecordHeader {
        self.header
    }

    /// The bytes this view is bound to.
    pub fn payload(&self) -> &'r [u8] {
        self.cursor.buf()
    }

    pub fn field_names(&self) -> &'r [&'static str] {
        &self.template.names
    }

    /// Milliseconds since the session start, when one was supplied.
    pub fn time_stamp_relative_msec(&self) -> Option<f64> {
        let start = self.session_start?;
        let nanos = self.header.timestamp.as_nanosecond() - start.as_nanosecond();
        Some(nanos as f64 / 1_000_000.0)
    }

    /// Offset at which field `index` starts.
    pub fn field_offset(&self, index: usize) -> Result<usize, FieldError> {
        self.check_index(index)?;
        self.start_of(index)
    }

    pub fn field_value(&self, index: usize) -> Result<FieldValue<'r>, FieldError> {
        self.check_index(index)?;
        let start = self.start_of(index)?;
        let decoded = self.decode_at(index, start)?;

        let mut ends = self.ends.borrow_mut();
        if ends.len() == index {
            ends.push(decoded.next);
        }
        Ok(decoded.value)
    }

    pub fn field_by_name(&self, name: &str) -> Result<FieldValue<'r>, FieldError> {
        let index = self
            .template
            .field_index(name)
            .ok_or_else(|| FieldError::UnknownFieldName {
                event: self.identity().event_name(),
                name: name.to_string(),
            })?;
        self.field_value(index)
    }

    /// Typed access to field `index`.
    pub fn get<T: FromFieldValue<'r>>(&self, index: usize) -> Result<T, FieldError> {
        let value = self.field_value(index)?;
        T::from_field_value(value).ok_or_else(|| FieldError::TypeMismatch {
            event: self.identity().event_name(),
            field: self.template.fields[index].name,
            expected: T::EXPECTED,
        })
    }

    /// Resolve every field offset, returning the end of the last field.
    pub fn resolve_layout(&self) -> Result<usize, FieldError> {
        let count = self.template.fields.len();
        if count == 0 {
            return Ok(0);
        }
        let last_start = self.start_of(count - 1)?;

        let mut ends = self.ends.borrow_mut();
        if let Some(&end) = ends.get(count - 1) {
            return Ok(end);
        }
        let end = self.skip_field(count - 1, last_start, &ends)?;
        ends.push(end);
        Ok(end)
    }

    /// Canonical attribute-list rendering, e.g.
    /// `<Event MSec="1.0000" PID="4" TID="8" EventName="GC/CommittedUsage" Version="1" .../>`.
    pub fn render(&self) -> Result<String, FieldError> {
        let identity = self.identity();
        let mut out = String::with_capacity(64 + self.template.fields.len() * 24);

        match self.time_stamp_relative_msec() {
            Some(msec) => {
                write!(out, "<Event MSec=\"{:.4}\"", msec)
                    .expect("writing to a String cannot fail");
            }
            None => {
                write!(out, "<Event TimeStamp=\"{}\"", self.header.timestamp)
                    .expect("writing to a String cannot fail");
            }
        }
        write!(
            out,
            " PID=\"{}\" TID=\"{}\" EventName=\"{}\" ProviderName=\"{}\"",
            self.header.process_id,
            self.header.thread_id,
            quick_xml::escape::escape(identity.event_name().as_str()),
            quick_xml::escape::escape(identity.provider_name),
        )
        .expect("writing to a String cannot fail");

        for (index, name) in self.template.names.iter().enumerate() {
            let value = self.field_value(index)?.to_string();
            write!(
                out,
                " {}=\"{}\"",
                name,
                quick_xml::escape::escape(value.as_str())
            )
            .expect("writing to a String cannot fail");
        }
        out.push_str("/>");
        Ok(out)
    }

    /// Identity and fields as a JSON object.
    pub fn to_json_value(&self) -> Result<Value, FieldError> {
        let identity = self.identity();
        let mut fields = Map::new();
        for (index, name) in self.template.names.iter().enumerate() {
            fields.insert(name.to_string(), self.field_value(index)?.to_json());
        }

        let mut event = Map::new();
        event.insert("ProviderName".into(), Value::from(identity.provider_name));
        event.insert("EventName".into(), Value::from(identity.event_name()));
        event.insert("EventId".into(), Value::from(identity.event_id));
        event.insert("Timestamp".into(), Value::from(self.header.timestamp.to_string()));
        event.insert("ProcessId".into(), Value::from(self.header.process_id));
        event.insert("ThreadId".into(), Value::from(self.header.thread_id));
        event.insert("Fields".into(), Value::Object(fields));
        Ok(Value::Object(event))
    }

    fn check_index(&self, index: usize) -> Result<(), FieldError> {
        let count = self.template.fields.len();
        if index >= count {
            return Err(FieldError::InvalidFieldIndex {
                event: self.identity().event_name(),
                index,
                count,
            });
        }
        Ok(())
    }

    /// Start offset of field `index`, resolving every earlier field first.
    fn start_of(&self, index: usize) -> Result<usize, FieldError> {
        let mut ends = self.ends.borrow_mut();
        while ends.len() < index {
            let k = ends.len();
            let start = if k == 0 { 0 } else { ends[k - 1] };
            let end = self.skip_field(k, start, &ends)?;
            trace!(
                "{}: field `{}` spans {}..{}",
                self.template.identity.event_name(),
                self.template.fields[k].name,
                start,
                end
            );
            ends.push(end);
        }
        Ok(if index == 0 { 0 } else { ends[index - 1] })
    }

    /// End offset of field `index` starting at `start`, without materializing its value.
    ///
    /// `ends` must already cover every field before `index`.
    fn skip_field(&self, index: usize, start: usize, ends: &[usize]) -> Result<usize, FieldError> {
        let def = self.template.fields[index];
        let what = def.name;
        let c = &self.cursor;

        let end = match def.kind {
            FieldKind::Int8 | FieldKind::UInt8 => c.bytes_at(start, 1, what)?.next,
            FieldKind::Int16 | FieldKind::UInt16 => c.bytes_at(start, 2, what)?.next,
            FieldKind::Int32 | FieldKind::UInt32 | FieldKind::Real32 | FieldKind::Bool32 => {
                c.bytes_at(start, 4, what)?.next
            }
            FieldKind::Int64 | FieldKind::UInt64 | FieldKind::Real64 => {
                c.bytes_at(start, 8, what)?.next
            }
            FieldKind::Guid => c.bytes_at(start, 16, what)?.next,
            FieldKind::Pointer => c.pointer_at(start, what)?.next,
            FieldKind::VarUInt => c.var_uint_at(start, what)?.next,
            FieldKind::Utf16Z => c.utf16z_end(start, what)?,
            FieldKind::Utf8Prefixed => c.utf8_prefixed_at(start, what)?.next,
            FieldKind::Utf8Suffixed => c.utf8_suffixed_at(start, what)?.next,
            FieldKind::Binary { length_field } => {
                let length_start = if length_field == 0 {
                    0
                } else {
                    ends[length_field - 1]
                };
                let len = self.read_length(length_field, length_start)?;
                c.bytes_at(start, len, what)?.next
            }
            FieldKind::CompressedXml { .. } => c.rest_at(start, what)?.next,
        };
        Ok(end)
    }

    /// Value of field `length_field` interpreted as a byte count.
    fn read_length(&self, length_field: usize, start: usize) -> Result<usize, FieldError> {
        let def = self.template.fields[length_field];
        if !def.kind.is_integral() {
            return Err(SchemaError::LengthFieldNotIntegral {
                event: self.identity().event_name(),
                field: def.name,
                length_field: def.name,
            }
            .into());
        }

        let value = self.decode_at(length_field, start)?.value;
        value
            .as_u64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| {
                DeserializationError::InvalidLength {
                    what: def.name,
                    offset: start as u64,
                    length: value.as_i64().unwrap_or(i64::MAX),
                }
                .into()
            })
    }

    fn decode_at(&self, index: usize, start: usize) -> Result<Decoded<FieldValue<'r>>, FieldError> {
        let def = self.template.fields[index];
        let what = def.name;
        let c = &self.cursor;

        let decoded = match def.kind {
            FieldKind::Int8 => c.i8_at(start, what)?.map(FieldValue::Int8),
            FieldKind::UInt8 => c.u8_at(start, what)?.map(FieldValue::UInt8),
            FieldKind::Int16 => c.i16_at(start, what)?.map(FieldValue::Int16),
            FieldKind::UInt16 => c.u16_at(start, what)?.map(FieldValue::UInt16),
            FieldKind::Int32 => c.i32_at(start, what)?.map(FieldValue::Int32),
            FieldKind::UInt32 => c.u32_at(start, what)?.map(FieldValue::UInt32),
            FieldKind::Int64 => c.i64_at(start, what)?.map(FieldValue::Int64),
            FieldKind::UInt64 => c.u64_at(start, what)?.map(FieldValue::UInt64),
            FieldKind::Real32 => c.f32_at(start, what)?.map(FieldValue::Real32),
            FieldKind::Real64 => c.f64_at(start, what)?.map(FieldValue::Real64),
            FieldKind::Bool32 => c.bool32_at(start, what)?.map(FieldValue::Bool),
            FieldKind::Guid => c.guid_at(start, what)?.map(FieldValue::Guid),
            FieldKind::Pointer => c.pointer_at(start, what)?.map(FieldValue::Pointer),
            FieldKind::VarUInt => c.var_uint_at(start, what)?.map(FieldValue::VarUInt),
            FieldKind::Utf16Z => c
                .utf16z_at(start, what)?
                .map(|s| FieldValue::String(Cow::Owned(s))),
            FieldKind::Utf8Prefixed => c
                .utf8_prefixed_at(start, what)?
                .map(|s| FieldValue::String(Cow::Borrowed(s))),
            FieldKind::Utf8Suffixed => c
                .utf8_suffixed_at(start, what)?
                .map(|s| FieldValue::String(Cow::Borrowed(s))),
            FieldKind::Binary { length_field } => {
                let len = self.length_of(length_field)?;
                c.bytes_at(start, len, what)?.map(FieldValue::Binary)
            }
            FieldKind::CompressedXml { size_field } => {
                let size = self.length_of(size_field)?;
                c.rest_at(start, what)?
                    .map(|body| FieldValue::String(Cow::Owned(xml_text::decode_xml_body(size, body))))
            }
        };
        Ok(decoded)
    }

    fn length_of(&self, length_field: usize) -> Result<usize, FieldError> {
        let start = self.start_of(length_field)?;
        self.read_length(length_field, start)
    }
}

impl std::fmt::Debug for EventView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventView")
            .field("event", &self.template.identity.event_name())
            .field("payload_len", &self.cursor.len())
            .field("resolved_fields", &self.ends.borrow().len())
            .finish()
    }
}
