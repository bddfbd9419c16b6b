//! Jobs: the per-traversal records pairing a target with its place in the
//! visit order.

use crate::densemap::{dense_id, DenseMap};
use crate::graph::Graph;
use crate::target::TargetId;
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

dense_id!(
    /// Handle to a Job within the traversal that created it.
    JobId
);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Processing,
    Complete,
}

#[derive(Debug)]
pub struct Job {
    pub target: TargetId,
    pub height: i32,
    pub state: JobState,
    /// The job whose completion created this one, in preorder.
    pub parent: Option<JobId>,
    /// Dependency jobs not yet complete, in postorder.
    waiting: usize,
    dependents: Vec<JobId>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Order {
    Preorder,
    Postorder,
}

/// The jobs of one traversal along with the queue of those ready to run.
pub struct Traversal {
    order: Order,
    jobs: DenseMap<JobId, Job>,
    by_target: FxHashMap<TargetId, JobId>,
    /// Lowest height first, then first come first served.
    ready: BinaryHeap<Reverse<(i32, usize, JobId)>>,
    sequence: usize,
    remaining: usize,
}

struct Frame {
    target: TargetId,
    deps: Vec<TargetId>,
    next: usize,
}

impl Traversal {
    fn new(order: Order) -> Self {
        Traversal {
            order,
            jobs: DenseMap::default(),
            by_target: FxHashMap::default(),
            ready: BinaryHeap::new(),
            sequence: 0,
            remaining: 0,
        }
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn job(&self, id: JobId) -> &Job {
        &self.jobs[id]
    }

    pub fn job_for(&self, target: TargetId) -> Option<JobId> {
        self.by_target.get(&target).copied()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// True once every job has completed.
    pub fn finished(&self) -> bool {
        self.remaining == 0
    }

    fn add(&mut self, target: TargetId, height: i32, parent: Option<JobId>, waiting: usize) -> JobId {
        let id = self.jobs.push(Job {
            target,
            height,
            state: JobState::Waiting,
            parent,
            waiting,
            dependents: Vec::new(),
        });
        self.by_target.insert(target, id);
        self.remaining += 1;
        if waiting == 0 {
            self.make_ready(id);
        }
        id
    }

    fn make_ready(&mut self, id: JobId) {
        let height = match self.order {
            Order::Postorder => self.jobs[id].height,
            Order::Preorder => 0,
        };
        self.ready.push(Reverse((height, self.sequence, id)));
        self.sequence += 1;
    }

    /// Take the next job ready to run and mark it processing.
    pub fn pop_ready(&mut self) -> Option<JobId> {
        let Reverse((_, _, id)) = self.ready.pop()?;
        self.jobs[id].state = JobState::Processing;
        Some(id)
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Build the jobs for a postorder walk from `root`: one per reachable
    /// target, each ready once every dependency's job has completed.
    /// Heights grow from zero at the leaves.  A dependency still on the
    /// walk's stack closes a cycle; that edge is dropped and the dependency
    /// marked successful so the walk can't stall.  Returns the traversal and
    /// the cyclic edges found.
    pub fn postorder(graph: &mut Graph, root: TargetId) -> (Self, Vec<(TargetId, TargetId)>) {
        let mut traversal = Traversal::new(Order::Postorder);
        let mut cycles = Vec::new();
        let mut stack = Vec::new();

        let enter = |graph: &mut Graph, stack: &mut Vec<Frame>, id: TargetId| {
            graph.set_visited(id, true);
            let target = graph.target_mut(id);
            target.visiting = true;
            let deps = target.all_dependencies().collect();
            stack.push(Frame {
                target: id,
                deps,
                next: 0,
            });
        };
        enter(graph, &mut stack, root);

        while let Some(frame) = stack.last_mut() {
            if let Some(&dep) = frame.deps.get(frame.next) {
                frame.next += 1;
                let from = frame.target;
                if graph.target(dep).visiting {
                    cycles.push((from, dep));
                    graph.set_successful(dep, true);
                } else if !graph.visited(dep) {
                    enter(graph, &mut stack, dep);
                }
                continue;
            }

            let id = frame.target;
            let deps = std::mem::take(&mut frame.deps);
            stack.pop();
            let mut height = 0;
            let mut waiting = Vec::new();
            for dep in deps {
                if cycles.contains(&(id, dep)) {
                    continue;
                }
                if let Some(job) = traversal.job_for(dep) {
                    height = height.max(traversal.jobs[job].height + 1);
                    waiting.push(job);
                }
            }
            let target = graph.target_mut(id);
            target.visiting = false;
            target.postorder_height = height;
            let job = traversal.add(id, height, None, waiting.len());
            for dep in waiting {
                traversal.jobs[dep].dependents.push(job);
            }
        }
        (traversal, cycles)
    }

    /// Start a preorder walk at `root`; further jobs appear as completed
    /// jobs are expanded.
    pub fn preorder(graph: &mut Graph, root: TargetId) -> Self {
        let mut traversal = Traversal::new(Order::Preorder);
        graph.set_visited(root, true);
        traversal.add(root, 0, None, 0);
        traversal
    }

    /// Record a job as done and release the jobs waiting on it.
    pub fn complete(&mut self, graph: &mut Graph, id: JobId, successful: bool) {
        let job = &mut self.jobs[id];
        if job.state == JobState::Complete {
            return;
        }
        job.state = JobState::Complete;
        let target = job.target;
        let dependents = std::mem::take(&mut job.dependents);
        self.remaining -= 1;
        graph.set_successful(target, successful);
        for dependent in dependents {
            let job = &mut self.jobs[dependent];
            job.waiting -= 1;
            if job.waiting == 0 {
                self.make_ready(dependent);
            }
        }
    }

    fn ancestors(&self, id: JobId) -> impl Iterator<Item = JobId> + '_ {
        std::iter::successors(Some(id), move |&job| self.jobs[job].parent)
    }

    /// Queue the unvisited script-referenced dependencies of a completed
    /// preorder job.  A dependency already on this job's chain of parents
    /// closes a cycle: it's marked successful and reported instead.
    pub fn expand(&mut self, graph: &mut Graph, id: JobId) -> Vec<(TargetId, TargetId)> {
        let target = self.jobs[id].target;
        let depth = self.jobs[id].height + 1;
        let mut cycles = Vec::new();
        let deps: Vec<TargetId> = graph.target(target).all_dependencies().collect();
        for dep in deps {
            if !graph.target(dep).referenced_by_script() {
                continue;
            }
            if self.ancestors(id).any(|job| self.jobs[job].target == dep) {
                cycles.push((target, dep));
                graph.set_successful(dep, true);
                continue;
            }
            if graph.visited(dep) {
                continue;
            }
            graph.set_visited(dep, true);
            self.add(dep, depth, Some(id), 0);
        }
        cycles
    }
}
