//! Chrome trace output, enabled with `-d trace`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Event<'a> {
    name: &'a str,
    start: Instant,
    end: Instant,
    tid: usize,
}

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_event(&mut self, event: &Event) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            event.tid,
            event.name,
            event.start.duration_since(self.start).as_micros(),
            event.end.duration_since(event.start).as_micros(),
        )
    }

    fn write(&mut self, event: &Event) -> std::io::Result<()> {
        self.write_event(event)?;
        writeln!(self.w, ",")
    }

    fn close(&mut self) -> std::io::Result<()> {
        let now = Instant::now();
        self.write_event(&Event {
            name: "main",
            start: self.start,
            end: now,
            tid: 0,
        })?;
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    if let Ok(mut slot) = TRACE.lock() {
        *slot = Some(trace);
    }
    Ok(())
}

pub fn enabled() -> bool {
    TRACE.lock().map_or(false, |t| t.is_some())
}

/// Record a span that has already happened, e.g. a command run on a worker.
pub fn complete(name: &str, tid: usize, start: Instant, end: Instant) {
    if let Ok(mut slot) = TRACE.lock() {
        if let Some(t) = slot.as_mut() {
            // Tracing is best effort; a failed write shouldn't fail the build.
            let _ = t.write(&Event {
                name,
                start,
                end,
                tid,
            });
        }
    }
}

#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if !enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    complete(name, 0, start, Instant::now());
    result
}

pub fn close() -> std::io::Result<()> {
    if let Ok(mut slot) = TRACE.lock() {
        if let Some(mut t) = slot.take() {
            return t.close();
        }
    }
    Ok(())
}
