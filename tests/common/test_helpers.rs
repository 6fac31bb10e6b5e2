#![allow(dead_code)]

use event_collator::Event;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

pub const T0: u64 = 1_700_000_000_000_000_000;
pub const MS: u64 = 1_000_000;
pub const SEC: u64 = 1_000_000_000;

/// A `process` sample like the ones a metrics shipper emits, stamped at `at_nanos`.
pub fn process_event(at_nanos: u64, unit: &str) -> Event {
    Event::from_value(json!({
        "@realtime_timestamp": at_nanos,
        "beat": { "hostname": "mar", "name": "my-shipper-1" },
        "proc": {
            "name": "test-1",
            "cmdline": "/sbin/launchd",
            "mem": { "rss": 11194368, "size": 2555572224u64 }
        },
        "journal": { "systemd_unit": unit },
        "message": "process sample",
        "type": "process"
    }))
    .expect("object")
}

pub fn event(value: Value) -> Event {
    Event::from_value(value).expect("object")
}

#[derive(Clone)]
pub struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Captured log output for the current thread.
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    _guard: tracing::subscriber::DefaultGuard,
}

impl LogCapture {
    pub fn start() -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .with_max_level(tracing::Level::TRACE)
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        Self { buffer, _guard: guard }
    }

    pub fn contents(&self) -> String {
        String::from_utf8(self.buffer.lock().unwrap().clone()).unwrap()
    }
}
