#![allow(dead_code)]
use std::sync::{Arc, Mutex, Once};

use byteorder::{LittleEndian, WriteBytesExt};
use etwpayload::{Callback, EventView, TemplateRegistry, encode_var_uint};

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

pub fn builtin_registry() -> Arc<TemplateRegistry> {
    Arc::new(TemplateRegistry::with_builtin_providers().expect("built-in providers register"))
}

/// Little-endian payload builder.
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    buf: Vec<u8>,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        PayloadBuilder::default()
    }

    pub fn i16(mut self, v: i16) -> Self {
        self.buf.write_i16::<LittleEndian>(v).unwrap();
        self
    }

    pub fn u16(mut self, v: u16) -> Self {
        self.buf.write_u16::<LittleEndian>(v).unwrap();
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.write_i32::<LittleEndian>(v).unwrap();
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buf.write_u32::<LittleEndian>(v).unwrap();
        self
    }

    pub fn i64(mut self, v: i64) -> Self {
        self.buf.write_i64::<LittleEndian>(v).unwrap();
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.buf.write_u64::<LittleEndian>(v).unwrap();
        self
    }

    pub fn f32(mut self, v: f32) -> Self {
        self.buf.write_f32::<LittleEndian>(v).unwrap();
        self
    }

    pub fn var_uint(mut self, v: u64) -> Self {
        encode_var_uint(v, &mut self.buf);
        self
    }

    pub fn utf16z(mut self, s: &str) -> Self {
        for unit in s.encode_utf16() {
            self.buf.write_u16::<LittleEndian>(unit).unwrap();
        }
        self.buf.write_u16::<LittleEndian>(0).unwrap();
        self
    }

    pub fn utf8_prefixed(mut self, s: &str) -> Self {
        self.buf.write_u16::<LittleEndian>(s.len() as u16).unwrap();
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn utf8_suffixed(mut self, s: &str) -> Self {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.write_u16::<LittleEndian>(s.len() as u16).unwrap();
        self
    }

    pub fn bytes(mut self, b: &[u8]) -> Self {
        self.buf.extend_from_slice(b);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// `GCDynamicEvent` wrapping `data` under `name`.
pub fn gc_dynamic_envelope(name: &str, data: &[u8]) -> Vec<u8> {
    PayloadBuilder::new()
        .utf16z(name)
        .i32(data.len() as i32)
        .bytes(data)
        .i16(0)
        .build()
}

pub fn committed_usage_data(values: [i64; 5]) -> Vec<u8> {
    let mut builder = PayloadBuilder::new().i16(1);
    for v in values {
        builder = builder.i64(v);
    }
    builder.build()
}

/// A callback that renders every event it sees into `log`.
pub fn recording_callback(log: &Arc<Mutex<Vec<String>>>) -> Callback {
    let log = Arc::clone(log);
    Arc::new(move |view: &EventView<'_>| {
        let rendered = view.render().expect("event renders");
        log.lock().unwrap().push(rendered);
    })
}
