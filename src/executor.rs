//! Runs external commands on a fixed pool of worker threads.  Workers never
//! touch the graph; results go back through the scheduler's completion
//! queue.

use crate::context::ContextId;
use crate::process::{Channel, Process, Spawn};
use crate::reader::Reader;
use crate::scheduler::Completions;
use crate::thread_pool::ThreadPool;
use crate::trace;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

pub struct Executor {
    pool: ThreadPool,
    reader: Arc<Reader>,
    /// Hands out fake thread ids so commands land on separate trace tracks.
    next_tid: Arc<AtomicUsize>,
}

/// Spawn the command, drain its pipes through the reader, and wait for both
/// the process and the reads, so every line is queued before the exit code.
fn run(
    spawn: Spawn,
    context: ContextId,
    reader: &Reader,
    completions: &Completions,
) -> anyhow::Result<i32> {
    let mut process = Process::spawn(spawn)?;
    process.resume()?;
    let (done, reads) = mpsc::channel();
    for channel in [Channel::Dependencies, Channel::Stdout, Channel::Stderr] {
        if let Some(pipe) = process.take_pipe(channel) {
            reader.read(pipe, context, channel, completions.clone(), done.clone());
        }
    }
    drop(done);
    let exit_code = process.wait()?;
    // Disconnects once every read has signalled.
    while reads.recv().is_ok() {}
    Ok(exit_code)
}

impl Executor {
    pub fn new(maximum_parallel_jobs: usize) -> Self {
        Executor {
            pool: ThreadPool::new("executor", Some(maximum_parallel_jobs)),
            reader: Arc::new(Reader::new()),
            next_tid: Arc::new(AtomicUsize::new(1)),
        }
    }

    /// Queue a command; its exit code, or the error that kept it from
    /// running, arrives through `execute_finished`.
    pub fn execute(&self, context: ContextId, spawn: Spawn, completions: Completions) {
        let reader = self.reader.clone();
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        self.pool.execute(move || {
            let start = Instant::now();
            let name = spawn.command.clone();
            let result = run(spawn, context, &reader, &completions);
            trace::complete(&name, tid, start, Instant::now());
            completions.push(move |s| s.execute_finished(context, result));
        });
    }

    pub fn threads(&self) -> usize {
        self.pool.threads()
    }
}
