//! One suspendable frame of script execution.

use crate::densemap::dense_id;
use crate::job::JobId;
use crate::process::Channel;
use crate::target::TargetId;
use crate::task::{Filter, Task};

dense_id!(
    /// Handle to a live Context within the Scheduler.
    ContextId
);

pub(crate) fn filter_slot(channel: Channel) -> Option<usize> {
    match channel {
        Channel::Dependencies => Some(0),
        Channel::Stdout => Some(1),
        Channel::Stderr => Some(2),
        Channel::Stdin => None,
    }
}

pub struct Context {
    pub(crate) task: Option<Box<dyn Task>>,
    /// Working directory stack; the top is current and it is never empty.
    directories: Vec<TargetId>,
    pub(crate) job: Option<JobId>,
    /// The context whose buildfile load created this one.
    pub(crate) buildfile_calling_context: Option<ContextId>,
    exit_code: i32,
    prune: bool,
    pub(crate) errors: usize,
    /// Output filters for the outstanding command, by channel.
    pub(crate) filters: [Option<Box<dyn Filter>>; 3],
    /// A command has been requested and not yet reported back.
    pub(crate) pending_request: bool,
    /// A nested buildfile load is suspended on our behalf.
    pub(crate) waiting_load: bool,
    pub(crate) suspended: bool,
    /// How this context reads in diagnostics.
    pub(crate) name: String,
}

impl Context {
    pub(crate) fn new(name: String, directory: TargetId, task: Box<dyn Task>) -> Self {
        Context {
            task: Some(task),
            directories: vec![directory],
            job: None,
            buildfile_calling_context: None,
            exit_code: 0,
            prune: false,
            errors: 0,
            filters: [None, None, None],
            pending_request: false,
            waiting_load: false,
            suspended: false,
            name,
        }
    }

    pub fn working_directory(&self) -> TargetId {
        // The stack is never empty.
        self.directories[self.directories.len() - 1]
    }

    pub fn push_directory(&mut self, directory: TargetId) {
        self.directories.push(directory);
    }

    /// Pop back to the previous directory; the first one always stays.
    pub fn pop_directory(&mut self) {
        if self.directories.len() > 1 {
            self.directories.pop();
        }
    }

    pub fn job(&self) -> Option<JobId> {
        self.job
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub(crate) fn set_exit_code(&mut self, exit_code: i32) {
        self.exit_code = exit_code;
    }

    pub fn prune(&self) -> bool {
        self.prune
    }

    /// Ask a preorder traversal not to descend below this context's target.
    pub fn set_prune(&mut self, prune: bool) {
        self.prune = prune;
    }

    pub fn errors(&self) -> usize {
        self.errors
    }
}
