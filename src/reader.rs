//! Drains child process pipes on worker threads, handing each line back to
//! the scheduler.

use crate::context::ContextId;
use crate::process::{Channel, Pipe};
use crate::scheduler::Completions;
use crate::thread_pool::ThreadPool;
use std::io::Read;
use std::sync::mpsc;

const CHUNK: usize = 4096;

/// Splits a byte stream into lines, tolerating CRLF endings.
#[derive(Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk, calling `f` for each complete line.
    pub fn push(&mut self, mut buf: &[u8], mut f: impl FnMut(String)) {
        while let Some(end) = buf.iter().position(|&c| c == b'\n') {
            self.partial.extend_from_slice(&buf[..end]);
            f(self.take());
            buf = &buf[end + 1..];
        }
        self.partial.extend_from_slice(buf);
    }

    /// A final unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> String {
        if self.partial.last() == Some(&b'\r') {
            self.partial.pop();
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        line
    }
}

pub struct Reader {
    pool: ThreadPool,
}

impl Default for Reader {
    fn default() -> Self {
        Reader::new()
    }
}

impl Reader {
    /// One thread per outstanding pipe, so no pipe waits on another.
    pub fn new() -> Self {
        Reader {
            pool: ThreadPool::new("reader", None),
        }
    }

    /// Read `pipe` to its end, queueing each line and then the end of the
    /// stream for the scheduler.  `done` is signalled once everything is
    /// queued.
    pub fn read(
        &self,
        mut pipe: Pipe,
        context: ContextId,
        channel: Channel,
        completions: Completions,
        done: mpsc::Sender<()>,
    ) {
        self.pool.execute(move || {
            let mut splitter = LineSplitter::default();
            let mut buf = [0u8; CHUNK];
            let error = loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break None,
                    Ok(n) => splitter.push(&buf[..n], |line| {
                        completions.push(move |s| s.push_output(context, channel, line));
                    }),
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(err) => break Some(err.to_string()),
                }
            };
            if let Some(line) = splitter.finish() {
                completions.push(move |s| s.push_output(context, channel, line));
            }
            completions.push(move |s| s.read_finished(context, channel, error));
            let _ = done.send(());
        });
    }
}
