//! The scheduler owns script execution.  It runs traversals over the graph,
//! resumes script tasks one at a time, and is the only consumer of the
//! results that worker threads produce.

use crate::context::{filter_slot, Context, ContextId};
use crate::densemap::DenseMap;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::fs::FileSystem;
use crate::graph::Graph;
use crate::job::{JobId, Order, Traversal};
use crate::process::{Channel, DependencyDiscovery, Discovery, Preload, Spawn};
use crate::progress::Progress;
use crate::target::TargetId;
use crate::task::{Filter, Loader, Resume, Step, Visitor};
use crate::trace;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};

/// Knobs threaded into the scheduler.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bound on concurrently running commands and in-flight visits.
    pub maximum_parallel_jobs: usize,
    /// Interception library that reports the files a command opens;
    /// without one implicit dependency discovery is off.
    pub dependency_library: Option<PathBuf>,
    /// Log why each target is outdated after binding.
    pub explain: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        Settings {
            maximum_parallel_jobs: 2 * cpus,
            dependency_library: None,
            explain: false,
        }
    }
}

type Completion = Box<dyn FnOnce(&mut Scheduler) + Send>;

/// The queue through which worker threads hand results to the scheduler.
#[derive(Clone, Default)]
pub struct Completions {
    queue: Arc<(Mutex<VecDeque<Completion>>, Condvar)>,
}

impl Completions {
    pub fn push(&self, f: impl FnOnce(&mut Scheduler) + Send + 'static) {
        let (queue, ready) = &*self.queue;
        queue.lock().unwrap().push_back(Box::new(f));
        ready.notify_one();
    }

    /// Take everything queued, blocking until something arrives if `block`.
    fn drain(&self, block: bool) -> VecDeque<Completion> {
        let (queue, ready) = &*self.queue;
        let mut queue = queue.lock().unwrap();
        while block && queue.is_empty() {
            queue = ready.wait(queue).unwrap();
        }
        std::mem::take(&mut *queue)
    }
}

/// A command for a context to run, with filters for the lines it writes.
pub struct Execution {
    pub spawn: Spawn,
    pub dependencies: Option<Box<dyn Filter>>,
    pub stdout: Option<Box<dyn Filter>>,
    pub stderr: Option<Box<dyn Filter>>,
}

impl Execution {
    pub fn new(spawn: Spawn) -> Self {
        Execution {
            spawn,
            dependencies: None,
            stdout: None,
            stderr: None,
        }
    }
}

/// Outcome of asking for a buildfile to be loaded.
#[derive(Debug, PartialEq, Eq)]
pub enum Loaded {
    /// The load ran to completion with this many errors.
    Completed(usize),
    /// The load is waiting on a command; the calling task must suspend and
    /// will be resumed with `Resume::Loaded`.
    Suspended,
}

pub struct Scheduler {
    graph: Graph,
    fs: Box<dyn FileSystem>,
    progress: Box<dyn Progress>,
    settings: Settings,
    loader: Option<Rc<dyn Loader>>,
    discovery: Box<dyn DependencyDiscovery>,

    contexts: DenseMap<ContextId, Option<Context>>,
    /// Contexts currently executing script, innermost last.
    active_contexts: Vec<ContextId>,
    traversal: Option<Traversal>,
    /// Contexts serving traversal jobs.
    active_visits: usize,

    completions: Completions,
    executor: Option<Executor>,
    /// Commands handed to the executor and not yet reported back.
    pending: usize,
    /// Commands run since creation.
    executed: usize,
    failures: usize,
}

impl Scheduler {
    pub fn new(
        graph: Graph,
        fs: Box<dyn FileSystem>,
        progress: Box<dyn Progress>,
        settings: Settings,
    ) -> Self {
        Scheduler {
            graph,
            fs,
            progress,
            settings,
            loader: None,
            discovery: Box::new(Preload),
            contexts: DenseMap::default(),
            active_contexts: Vec::new(),
            traversal: None,
            active_visits: 0,
            completions: Completions::default(),
            executor: None,
            pending: 0,
            executed: 0,
            failures: 0,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Finish outstanding commands and hand back the graph.
    pub fn into_graph(mut self) -> Graph {
        while self.pending > 0 {
            self.wait();
        }
        std::mem::take(&mut self.graph)
    }

    pub fn fs(&self) -> &dyn FileSystem {
        &*self.fs
    }

    pub fn progress(&self) -> &dyn Progress {
        &*self.progress
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn set_loader(&mut self, loader: Rc<dyn Loader>) {
        self.loader = Some(loader);
    }

    pub fn set_discovery(&mut self, discovery: Box<dyn DependencyDiscovery>) {
        self.discovery = discovery;
    }

    /// Errors reported since creation.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Commands run since creation.
    pub fn executed(&self) -> usize {
        self.executed
    }

    pub fn context(&self, id: ContextId) -> Option<&Context> {
        self.contexts.get(id)
    }

    pub fn context_mut(&mut self, id: ContextId) -> Option<&mut Context> {
        self.contexts.get_mut(id)
    }

    /// The target whose visit a context is serving.
    pub fn job_target(&self, id: ContextId) -> Option<TargetId> {
        let job = self.contexts.get(id)?.job?;
        Some(self.traversal.as_ref()?.job(job).target)
    }

    /// Working directory of a context, or the root without one.
    pub fn working_directory(&self, id: ContextId) -> TargetId {
        self.contexts
            .get(id)
            .map_or(self.graph.root(), |c| c.working_directory())
    }

    /// The chain of contexts `id` was reached through, innermost first.
    fn stack_context(&self, id: Option<ContextId>) -> Vec<String> {
        let mut frames = Vec::new();
        let mut next = id;
        while let Some(context) = next.and_then(|id| self.contexts.get(id)) {
            frames.push(context.name.clone());
            next = context.buildfile_calling_context;
        }
        frames
    }

    /// Report an error, counting it against `context` when there is one.
    pub fn error(&mut self, context: Option<ContextId>, msg: &str) {
        self.failures += 1;
        if let Some(c) = context.and_then(|id| self.contexts.get_mut(id)) {
            c.errors += 1;
        }
        let frames = self.stack_context(context);
        self.progress.error(msg, &frames);
    }

    fn add_context(&mut self, context: Context) -> ContextId {
        self.contexts.push(Some(context))
    }

    /// Resume a context's task.  Returns the context's error count if it
    /// finished (and was destroyed), None if it suspended.
    fn resume(&mut self, id: ContextId, resume: Resume) -> Option<usize> {
        let mut task = match self.contexts.get_mut(id) {
            Some(context) => {
                context.suspended = false;
                context.task.take()?
            }
            None => return None,
        };
        self.active_contexts.push(id);
        let step = task.resume(self, id, resume);
        self.active_contexts.pop();

        match step {
            Step::Completed => Some(self.destroy_context(id)),
            Step::Faulted(err) => {
                self.error(Some(id), &format!("{:#}", err));
                Some(self.destroy_context(id))
            }
            Step::Suspended => {
                let waiting = match self.contexts.get(id) {
                    Some(c) => c.pending_request || c.waiting_load,
                    None => false,
                };
                if !waiting {
                    self.error(Some(id), "suspended without a pending request");
                    return Some(self.destroy_context(id));
                }
                if let Some(context) = self.contexts.get_mut(id) {
                    context.task = Some(task);
                    context.suspended = true;
                }
                None
            }
        }
    }

    /// Tear down a finished or failed context: complete its job, and hand
    /// its errors to the load that created it, resuming that load if it
    /// was waiting.
    fn destroy_context(&mut self, id: ContextId) -> usize {
        let context = match self.contexts.take(id) {
            Some(context) => context,
            None => return 0,
        };
        let errors = context.errors;

        if let Some(job) = context.job {
            self.active_visits -= 1;
            let successful = errors == 0;
            if let Some(traversal) = self.traversal.as_mut() {
                traversal.complete(&mut self.graph, job, successful);
                if traversal.order() == Order::Preorder && successful && !context.prune() {
                    let cycles = traversal.expand(&mut self.graph, job);
                    self.report_cycles(&cycles);
                }
            }
        }

        if let Some(caller) = context.buildfile_calling_context {
            let resume = match self.contexts.get_mut(caller) {
                Some(c) => {
                    c.errors += errors;
                    let resume = c.waiting_load && c.suspended;
                    c.waiting_load = false;
                    resume
                }
                None => false,
            };
            if resume {
                self.resume(caller, Resume::Loaded(errors));
            }
        }
        errors
    }

    fn report_cycles(&mut self, cycles: &[(TargetId, TargetId)]) {
        for &(from, to) in cycles {
            let msg = format!(
                "cyclic dependency from {} to {}",
                self.graph.path(from),
                self.graph.path(to)
            );
            self.error(None, &msg);
        }
    }

    /// Process queued completions, blocking for one if commands are still
    /// outstanding.  Returns false when there was nothing to wait for.
    pub fn wait(&mut self) -> bool {
        let completions = self.completions.drain(self.pending > 0);
        if completions.is_empty() {
            return false;
        }
        for completion in completions {
            completion(self);
        }
        true
    }

    /// Run a command on behalf of a context, which should then suspend; it
    /// is resumed with `Resume::Executed` once the command exits and all of
    /// its output has been handled.
    pub fn execute(&mut self, id: ContextId, execution: Execution) -> Result<()> {
        let directory = self.working_directory(id);
        let context = self
            .contexts
            .get_mut(id)
            .ok_or(Error::UnknownContext)?;
        if context.pending_request {
            return Err(Error::Busy);
        }
        let Execution {
            mut spawn,
            mut dependencies,
            stdout,
            stderr,
        } = execution;

        if dependencies.is_some() {
            let enabled = match &self.settings.dependency_library {
                Some(library) => self.discovery.enable(&mut spawn, library) == Discovery::Enabled,
                None => false,
            };
            if !enabled {
                dependencies = None;
            }
        }
        context.pending_request = true;
        context.filters = [dependencies, stdout, stderr];

        if spawn.directory.is_none() {
            let path = self.graph.path(directory);
            if !path.is_empty() {
                spawn.directory = Some(path.to_string());
            }
        }
        for channel in [Channel::Stdout, Channel::Stderr] {
            if !spawn.wants(channel) {
                spawn.channels.push(channel);
            }
        }

        self.pending += 1;
        self.executed += 1;
        let maximum = self.settings.maximum_parallel_jobs;
        let executor = self.executor.get_or_insert_with(|| Executor::new(maximum));
        executor.execute(id, spawn, self.completions.clone());
        Ok(())
    }

    pub(crate) fn execute_finished(&mut self, id: ContextId, result: anyhow::Result<i32>) {
        self.pending -= 1;
        let exit_code = match result {
            Ok(exit_code) => exit_code,
            Err(err) => {
                if self.contexts.get(id).is_some() {
                    self.error(Some(id), &format!("{:#}", err));
                    self.destroy_context(id);
                }
                return;
            }
        };
        match self.contexts.get_mut(id) {
            Some(context) => {
                context.pending_request = false;
                context.filters = [None, None, None];
                context.set_exit_code(exit_code);
            }
            // The context went away while its command ran.
            None => return,
        }
        self.resume(id, Resume::Executed(exit_code));
    }

    fn take_filter(&mut self, id: ContextId, channel: Channel) -> Option<(usize, Box<dyn Filter>)> {
        let slot = filter_slot(channel)?;
        let filter = self.contexts.get_mut(id)?.filters[slot].take()?;
        Some((slot, filter))
    }

    fn restore_filter(&mut self, id: ContextId, slot: usize, filter: Box<dyn Filter>) {
        if let Some(context) = self.contexts.get_mut(id) {
            context.filters[slot] = Some(filter);
        }
    }

    pub(crate) fn push_output(&mut self, id: ContextId, channel: Channel, line: String) {
        if self.contexts.get(id).is_none() {
            return;
        }
        match self.take_filter(id, channel) {
            Some((slot, mut filter)) => {
                if let Err(err) = filter.line(self, id, &line) {
                    self.error(Some(id), &format!("{:#}", err));
                }
                self.restore_filter(id, slot, filter);
            }
            None => {
                if channel != Channel::Dependencies {
                    self.progress.output(&line);
                }
            }
        }
    }

    pub(crate) fn read_finished(&mut self, id: ContextId, channel: Channel, error: Option<String>) {
        if self.contexts.get(id).is_none() {
            return;
        }
        if let Some(error) = error {
            self.error(Some(id), &format!("reading {:?}: {}", channel, error));
        }
        if let Some((slot, mut filter)) = self.take_filter(id, channel) {
            if let Err(err) = filter.finish(self, id) {
                self.error(Some(id), &format!("{:#}", err));
            }
            self.restore_filter(id, slot, filter);
        }
    }

    /// Load a buildfile in a new context nested under `calling`, resolving
    /// `path` against the caller's working directory.
    pub fn buildfile(&mut self, calling: Option<ContextId>, path: &str) -> Result<Loaded> {
        let loader = match &self.loader {
            Some(loader) => loader.clone(),
            None => return Err(Error::NoLoader(path.to_string())),
        };
        let directory = calling.map(|c| self.working_directory(c));
        let target = self.graph.lookup(path, None, directory)?;
        let filename = self.graph.path(target).to_string();
        self.graph.target_mut(target).add_filename(filename.clone());
        if let Some(cache) = self.graph.cache_target() {
            self.graph.add_implicit_dependency(cache, target);
        }
        let branch = self.graph.target(target).parent().unwrap_or(self.graph.root());

        let task = loader.load(&self.graph, target);
        let mut context = Context::new(filename, branch, task);
        context.buildfile_calling_context = calling;
        let id = self.add_context(context);
        match self.resume(id, Resume::Start) {
            Some(errors) => Ok(Loaded::Completed(errors)),
            None => {
                if let Some(c) = calling.and_then(|c| self.contexts.get_mut(c)) {
                    c.waiting_load = true;
                }
                Ok(Loaded::Suspended)
            }
        }
    }

    /// Load the top-level buildfile and wait for it to finish.  Returns the
    /// number of errors.
    pub fn load(&mut self, path: &str) -> Result<usize> {
        let before = self.failures;
        let _ = trace::scope("load", || self.buildfile(None, path))?;
        while self.wait() {}
        Ok(self.failures - before)
    }

    /// Fail a traversal started from inside a script callback, counting
    /// the error against the callback's context.
    fn reject_nested_traversal(&mut self) -> Error {
        let top = self.active_contexts.last().copied();
        self.error(top, "a traversal is already in progress");
        Error::TraversalInProgress
    }

    /// Bind everything reachable from `target` before a traversal.
    fn bind(&mut self, target: TargetId) -> Result<()> {
        let fs = &*self.fs;
        let graph = &mut self.graph;
        let binding = trace::scope("bind", || graph.bind(fs, target))?;
        self.report_cycles(&binding.cycles);
        for (id, err) in &binding.errors {
            let msg = format!("{}: {}", self.graph.path(*id), err);
            self.error(None, &msg);
        }
        if self.settings.explain {
            let visited: Vec<TargetId> = self
                .graph
                .live_ids()
                .filter(|&id| self.graph.visited(id))
                .collect();
            for id in visited {
                if let Some(reason) = self.graph.explain(id) {
                    let msg = format!("explain {}: {}", self.graph.path(id), reason);
                    self.progress.log(&msg);
                }
            }
        }
        Ok(())
    }

    /// Visit every script-referenced target reachable from `target`,
    /// dependencies before dependents, after binding them all.  A target
    /// whose dependencies failed is skipped and fails in turn.  Returns the
    /// number of errors.
    pub fn postorder(&mut self, visitor: &dyn Visitor, target: TargetId) -> Result<usize> {
        if self.graph.traversal_in_progress() || self.traversal.is_some() {
            return Err(self.reject_nested_traversal());
        }
        let before = self.failures;
        self.bind(target)?;
        self.graph.begin_traversal()?;
        let (traversal, cycles) = Traversal::postorder(&mut self.graph, target);
        self.report_cycles(&cycles);
        self.traversal = Some(traversal);
        trace::scope("postorder", || self.run_traversal(visitor));
        self.traversal = None;
        self.graph.end_traversal();
        Ok(self.failures - before)
    }

    /// Visit script-referenced targets from `target` down, dependents
    /// before dependencies.  A visit that fails or sets prune stops the walk
    /// below it.  Returns the number of errors.
    pub fn preorder(&mut self, visitor: &dyn Visitor, target: Option<TargetId>) -> Result<usize> {
        if self.graph.traversal_in_progress() || self.traversal.is_some() {
            return Err(self.reject_nested_traversal());
        }
        let target = target.unwrap_or(self.graph.root());
        let before = self.failures;
        self.bind(target)?;
        self.graph.begin_traversal()?;
        self.traversal = Some(Traversal::preorder(&mut self.graph, target));
        trace::scope("preorder", || self.run_traversal(visitor));
        self.traversal = None;
        self.graph.end_traversal();
        Ok(self.failures - before)
    }

    fn run_traversal(&mut self, visitor: &dyn Visitor) {
        loop {
            while self.active_visits < self.settings.maximum_parallel_jobs.max(1) {
                let job = match self.traversal.as_mut().and_then(|t| t.pop_ready()) {
                    Some(job) => job,
                    None => break,
                };
                self.start_job(visitor, job);
            }
            match &self.traversal {
                Some(traversal) if !traversal.finished() => {}
                _ => break,
            }
            // Dispatch stops only at the visit limit or with nothing ready, so
            // nothing left to wait for means no job can make progress.
            if !self.wait() {
                self.error(None, "traversal stalled with targets left unvisited");
                break;
            }
        }
    }

    fn start_job(&mut self, visitor: &dyn Visitor, job: JobId) {
        let traversal = match self.traversal.as_mut() {
            Some(traversal) => traversal,
            None => return,
        };
        let target = traversal.job(job).target;
        let t = self.graph.target(target);
        let directory = match (t.referenced_by_script(), t.working_directory()) {
            (true, Some(directory)) => directory,
            _ => {
                traversal.complete(&mut self.graph, job, true);
                if traversal.order() == Order::Preorder {
                    let cycles = traversal.expand(&mut self.graph, job);
                    self.report_cycles(&cycles);
                }
                return;
            }
        };

        // Preorder visits dependents first, so only postorder has results to
        // check.
        if traversal.order() == Order::Postorder && !self.graph.buildable(target) {
            traversal.complete(&mut self.graph, job, false);
            let failed: Vec<&str> = self
                .graph
                .failed_dependencies(target)
                .into_iter()
                .map(|dep| self.graph.path(dep))
                .collect();
            let msg = format!(
                "{} not visited because dependencies failed: {}",
                self.graph.path(target),
                failed.join(", ")
            );
            self.error(None, &msg);
            return;
        }

        let task = visitor.visit(&self.graph, target);
        let mut context = Context::new(self.graph.path(target).to_string(), directory, task);
        context.job = Some(job);
        let id = self.add_context(context);
        self.active_visits += 1;
        self.resume(id, Resume::Start);
    }
}

impl Drop for Scheduler {
    /// Commands still running must finish before the graph goes away.
    fn drop(&mut self) {
        while self.pending > 0 {
            self.wait();
        }
    }
}
