//! The contract between the scheduler and the script layer.  A script entry
//! point is a Task the scheduler resumes until it completes; a Task that
//! asks for work to be done elsewhere suspends and is resumed with the
//! result.

use crate::context::ContextId;
use crate::graph::Graph;
use crate::scheduler::Scheduler;
use crate::target::TargetId;

/// What a Task is being resumed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// First entry.
    Start,
    /// A requested command exited with this code.
    Executed(i32),
    /// A nested buildfile load finished with this many errors.
    Loaded(usize),
}

/// How far a Task got before handing control back.
#[derive(Debug)]
pub enum Step {
    Completed,
    /// Waiting on a request made through the scheduler.
    Suspended,
    Faulted(anyhow::Error),
}

pub trait Task {
    fn resume(&mut self, scheduler: &mut Scheduler, context: ContextId, resume: Resume) -> Step;
}

/// Supplies the per-target callback of a traversal.
pub trait Visitor {
    fn visit(&self, graph: &Graph, target: TargetId) -> Box<dyn Task>;
}

/// Supplies the task that executes a buildfile.
pub trait Loader {
    fn load(&self, graph: &Graph, buildfile: TargetId) -> Box<dyn Task>;
}

/// Consumes lines read from a child process, on the scheduler's thread.
pub trait Filter {
    fn line(&mut self, scheduler: &mut Scheduler, context: ContextId, line: &str)
        -> anyhow::Result<()>;

    /// The stream ended.
    fn finish(&mut self, _scheduler: &mut Scheduler, _context: ContextId) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Adapts a closure into a Task that completes in one step.
pub struct FnTask<F>(pub F);

impl<F> Task for FnTask<F>
where
    F: FnMut(&mut Scheduler, ContextId) -> anyhow::Result<()>,
{
    fn resume(&mut self, scheduler: &mut Scheduler, context: ContextId, _resume: Resume) -> Step {
        match (self.0)(scheduler, context) {
            Ok(()) => Step::Completed,
            Err(err) => Step::Faulted(err),
        }
    }
}
