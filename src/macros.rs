/// Generates fixed-width little-endian readers on `FieldCursor`.
///
/// Each reader returns the decoded value together with the offset right after it, and captures
/// the offset/width nicely on truncation.
macro_rules! fixed_width_readers {
    ($($(#[$meta:meta])* $name:ident => $ty:ty),* $(,)?) => {
        $(
            $(#[$meta])*
            #[inline]
            pub fn $name(
                &self,
                offset: usize,
                what: &'static str,
            ) -> $crate::err::DeserializationResult<$crate::field_cursor::Decoded<$ty>> {
                const WIDTH: usize = ::std::mem::size_of::<$ty>();
                let raw = $crate::utils::bytes::read_array_r::<WIDTH>(self.buf, offset, what)?;
                Ok($crate::field_cursor::Decoded::new(
                    <$ty>::from_le_bytes(raw),
                    offset + WIDTH,
                ))
            }
        )*
    };
}

/// Implements `FromFieldValue` for scalar types that map onto a set of `FieldValue` variants.
macro_rules! from_field_value {
    ($ty:ty, $expected:literal, $($variant:ident),+) => {
        impl<'a> $crate::value::FromFieldValue<'a> for $ty {
            const EXPECTED: &'static str = $expected;

            fn from_field_value(value: $crate::value::FieldValue<'a>) -> Option<Self> {
                match value {
                    $($crate::value::FieldValue::$variant(v) => Some(v),)+
                    _ => None,
                }
            }
        }
    };
}

/// Declares a strongly-typed wrapper over an `EventView` for one logical event type.
///
/// The wrapper only binds to views whose identity matches `(provider guid, event id)`, and
/// exposes one accessor per schema field.
macro_rules! trace_data {
    (
        $(#[$meta:meta])*
        $name:ident($provider:expr, $event_id:expr) {
            $($(#[$fmeta:meta])* $getter:ident($index:expr) -> $ty:ty;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy)]
        pub struct $name<'v, 'r> {
            view: &'v $crate::template::EventView<'r>,
        }

        impl<'v, 'r> $name<'v, 'r> {
            /// Wrap `view` if it is bound to this logical type.
            pub fn from_view(view: &'v $crate::template::EventView<'r>) -> Option<Self> {
                let identity = view.identity();
                (identity.provider_guid == $provider && identity.event_id == $event_id)
                    .then_some($name { view })
            }

            pub fn view(&self) -> &'v $crate::template::EventView<'r> {
                self.view
            }

            $(
                $(#[$fmeta])*
                pub fn $getter(&self) -> Result<$ty, $crate::template::FieldError> {
                    self.view.get::<$ty>($index)
                }
            )*
        }
    };
}
