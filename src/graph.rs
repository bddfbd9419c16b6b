//! The target graph: a path-addressed tree of targets owning each other by
//! parent/child links, cross-linked by dependency edges.

use crate::canon::{is_absolute, is_drive};
use crate::densemap::DenseMap;
use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::target::{DependencyKind, PrototypeId, Reason, Target, TargetId};

/// An opaque category of target, e.g. the rule that builds it.
#[derive(Debug)]
pub struct Prototype {
    pub name: String,
}

/// Hooks for the script layer to keep wrapper objects in step with targets.
pub trait TargetBindings {
    /// A target became visible to scripts.
    fn create_target_binding(&mut self, target: TargetId);
    /// A script-visible target's prototype changed.
    fn update_target_binding(&mut self, target: TargetId, prototype: Option<PrototypeId>);
    /// A target stopped being visible to scripts or was destroyed.
    fn destroy_target_binding(&mut self, target: TargetId);
}

/// Summary of a binding pass.
#[derive(Debug, Default)]
pub struct Binding {
    pub failures: usize,
    /// Dependency edges that closed a cycle, as (dependent, dependency).
    pub cycles: Vec<(TargetId, TargetId)>,
    /// Files that couldn't be examined.
    pub errors: Vec<(TargetId, std::io::Error)>,
}

struct Frame {
    target: TargetId,
    deps: Vec<TargetId>,
    next: usize,
}

pub struct Graph {
    targets: DenseMap<TargetId, Option<Target>>,
    root: TargetId,
    cache_target: Option<TargetId>,
    /// Path of the graph file this graph is persisted to, if any.
    filename: Option<String>,
    prototypes: DenseMap<PrototypeId, Prototype>,
    traversal_in_progress: bool,
    visited_revision: u64,
    successful_revision: u64,
    bindings: Option<Box<dyn TargetBindings>>,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Graph {
        let mut targets = DenseMap::default();
        let root = targets.push(Some(Target::new(String::new(), false, None)));
        Graph {
            targets,
            root,
            cache_target: None,
            filename: None,
            prototypes: DenseMap::default(),
            traversal_in_progress: false,
            // Targets start at revision zero, so nothing is visited initially.
            visited_revision: 1,
            successful_revision: 1,
            bindings: None,
        }
    }

    pub fn set_bindings(&mut self, bindings: Box<dyn TargetBindings>) {
        self.bindings = Some(bindings);
    }

    pub fn root(&self) -> TargetId {
        self.root
    }

    pub fn cache_target(&self) -> Option<TargetId> {
        self.cache_target
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub(crate) fn set_filename(&mut self, filename: Option<String>) {
        self.filename = filename;
    }

    pub fn add_prototype(&mut self, name: impl Into<String>) -> PrototypeId {
        self.prototypes.push(Prototype { name: name.into() })
    }

    pub fn prototype(&self, id: PrototypeId) -> &Prototype {
        &self.prototypes[id]
    }

    /// Access a target by handle.  Panics if the target has been destroyed.
    pub fn target(&self, id: TargetId) -> &Target {
        match self.targets.get(id) {
            Some(t) => t,
            None => panic!("destroyed target {:?}", id),
        }
    }

    pub fn target_mut(&mut self, id: TargetId) -> &mut Target {
        match self.targets.get_mut(id) {
            Some(t) => t,
            None => panic!("destroyed target {:?}", id),
        }
    }

    /// Access a target that may have been destroyed.
    pub fn get(&self, id: TargetId) -> Option<&Target> {
        self.targets.get(id)
    }

    /// Number of live targets, including the root.
    pub fn len(&self) -> usize {
        self.targets.occupied()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Full path of a target, computed on first use.
    pub fn path(&self, id: TargetId) -> &str {
        let target = self.target(id);
        target.path.get_or_init(|| {
            let parent = match target.parent {
                None => return String::new(),
                Some(parent) => parent,
            };
            let parent_path = self.path(parent);
            if parent_path.is_empty() && is_drive(target.id()) {
                target.id().to_string()
            } else {
                format!("{}/{}", parent_path, target.id())
            }
        })
    }

    /// Path of the directory holding a target, i.e. its parent's path.
    pub fn branch(&self, id: TargetId) -> &str {
        let target = self.target(id);
        target.branch.get_or_init(|| match target.parent {
            None => String::new(),
            Some(parent) => self.path(parent).to_string(),
        })
    }

    fn child(&self, parent: TargetId, id: &str) -> Option<TargetId> {
        self.target(parent).child_index.get(id).copied()
    }

    fn add_child(&mut self, parent: TargetId, id: String, anonymous: bool) -> TargetId {
        let child = self
            .targets
            .push(Some(Target::new(id.clone(), anonymous, Some(parent))));
        let p = self.target_mut(parent);
        p.children.push(child);
        p.child_index.insert(id, child);
        child
    }

    /// Create a fresh anonymous child of `parent`.
    pub fn anonymous_target(&mut self, parent: TargetId) -> TargetId {
        let p = self.target_mut(parent);
        let id = format!("$${}", p.anonymous_counter);
        p.anonymous_counter += 1;
        self.add_child(parent, id, true)
    }

    /// Find an existing target by path without creating anything.
    pub fn find(&self, path: &str, working_directory: Option<TargetId>) -> Option<TargetId> {
        let mut current = match working_directory {
            Some(wd) if !is_absolute(path) => wd,
            _ => self.root,
        };
        for (i, segment) in path.split(['/', '\\']).enumerate() {
            match segment {
                "" | "." => {}
                ".." => current = self.target(current).parent.unwrap_or(self.root),
                segment if i == 0 && is_drive(segment) => {
                    current = self.child(self.root, &segment.to_ascii_uppercase())?;
                }
                segment => current = self.child(current, segment)?,
            }
        }
        Some(current)
    }

    /// Find or create the target at `path`, resolved against
    /// `working_directory` when relative and against the root otherwise.
    ///
    /// An existing target without a prototype takes on the requested one
    /// along with the working directory.  Asking for a different prototype
    /// than the one a target already has is an error.  An empty path
    /// creates a fresh anonymous target.
    pub fn lookup(
        &mut self,
        path: &str,
        prototype: Option<PrototypeId>,
        working_directory: Option<TargetId>,
    ) -> Result<TargetId> {
        let base = working_directory.unwrap_or(self.root);
        let id = if path.is_empty() {
            self.anonymous_target(base)
        } else {
            let mut current = if is_absolute(path) { self.root } else { base };
            for (i, segment) in path.split(['/', '\\']).enumerate() {
                match segment {
                    "" | "." => {}
                    ".." => current = self.target(current).parent.unwrap_or(self.root),
                    segment => {
                        let segment = if i == 0 && is_drive(segment) {
                            current = self.root;
                            segment.to_ascii_uppercase()
                        } else {
                            segment.to_string()
                        };
                        current = match self.child(current, &segment) {
                            Some(child) => child,
                            None => self.add_child(current, segment, false),
                        };
                    }
                }
            }
            current
        };

        if let Some(requested) = prototype {
            match self.target(id).prototype {
                None => {
                    let target = self.target_mut(id);
                    target.prototype = Some(requested);
                    let referenced = target.referenced_by_script;
                    if referenced {
                        if let Some(bindings) = self.bindings.as_mut() {
                            bindings.update_target_binding(id, Some(requested));
                        }
                    }
                }
                Some(existing) if existing != requested => {
                    return Err(Error::PrototypeConflict {
                        path: self.path(id).to_string(),
                        existing: self.prototype(existing).name.clone(),
                        requested: self.prototype(requested).name.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        if working_directory.is_some() && self.target(id).working_directory.is_none() {
            self.target_mut(id).working_directory = working_directory;
        }
        Ok(id)
    }

    pub fn set_working_directory(&mut self, id: TargetId, working_directory: Option<TargetId>) {
        self.target_mut(id).working_directory = working_directory;
    }

    /// Mark a target as visible to scripts, notifying the bindings hooks.
    pub fn set_referenced_by_script(&mut self, id: TargetId, referenced: bool) {
        let target = self.target_mut(id);
        if target.referenced_by_script == referenced {
            return;
        }
        target.referenced_by_script = referenced;
        if let Some(bindings) = self.bindings.as_mut() {
            if referenced {
                bindings.create_target_binding(id);
            } else {
                bindings.destroy_target_binding(id);
            }
        }
    }

    /// Add `dep` as a dependency of `id`, moving it out of whichever list
    /// held it before.  Self-dependencies, anonymous implicit dependencies,
    /// and dependencies already of this kind are ignored.
    pub fn add_dependency(&mut self, id: TargetId, kind: DependencyKind, dep: TargetId) {
        if id == dep {
            return;
        }
        if kind == DependencyKind::Implicit && self.target(dep).anonymous() {
            return;
        }
        let target = self.target_mut(id);
        match target.dependency_kind(dep) {
            Some(existing) if existing == kind => return,
            Some(_) => {
                target.remove_dependency(dep);
            }
            None => {}
        }
        target.push_dependency(kind, dep);
    }

    pub fn add_explicit_dependency(&mut self, id: TargetId, dep: TargetId) {
        self.add_dependency(id, DependencyKind::Explicit, dep)
    }

    pub fn add_implicit_dependency(&mut self, id: TargetId, dep: TargetId) {
        self.add_dependency(id, DependencyKind::Implicit, dep)
    }

    pub fn add_ordering_dependency(&mut self, id: TargetId, dep: TargetId) {
        self.add_dependency(id, DependencyKind::Ordering, dep)
    }

    pub fn add_transitive_dependency(&mut self, id: TargetId, dep: TargetId) {
        self.add_dependency(id, DependencyKind::Transitive, dep)
    }

    pub fn remove_dependency(&mut self, id: TargetId, dep: TargetId) -> Option<DependencyKind> {
        self.target_mut(id).remove_dependency(dep)
    }

    pub fn clear_implicit_dependencies(&mut self, id: TargetId) {
        self.target_mut(id)
            .clear_dependencies(DependencyKind::Implicit);
    }

    pub fn traversal_in_progress(&self) -> bool {
        self.traversal_in_progress
    }

    /// Start a traversal, advancing the revisions so every target reads as
    /// unvisited and unsuccessful without touching each one.
    pub(crate) fn begin_traversal(&mut self) -> Result<()> {
        if self.traversal_in_progress {
            return Err(Error::TraversalInProgress);
        }
        self.traversal_in_progress = true;
        self.visited_revision += 1;
        self.successful_revision += 1;
        Ok(())
    }

    pub(crate) fn end_traversal(&mut self) {
        self.traversal_in_progress = false;
    }

    pub fn visited(&self, id: TargetId) -> bool {
        self.target(id).visited_revision == self.visited_revision
    }

    pub fn set_visited(&mut self, id: TargetId, visited: bool) {
        let revision = if visited { self.visited_revision } else { 0 };
        self.target_mut(id).visited_revision = revision;
    }

    pub fn successful(&self, id: TargetId) -> bool {
        self.target(id).successful_revision == self.successful_revision
    }

    pub fn set_successful(&mut self, id: TargetId, successful: bool) {
        let revision = if successful { self.successful_revision } else { 0 };
        self.target_mut(id).successful_revision = revision;
    }

    /// True if every dependency of any kind succeeded in this pass.
    pub fn buildable(&self, id: TargetId) -> bool {
        self.target(id)
            .all_dependencies()
            .all(|dep| self.successful(dep))
    }

    /// The dependencies that keep a target from being buildable.
    pub fn failed_dependencies(&self, id: TargetId) -> Vec<TargetId> {
        self.target(id)
            .all_dependencies()
            .filter(|&dep| !self.successful(dep))
            .collect()
    }

    fn enter_bind(&mut self, id: TargetId, stack: &mut Vec<Frame>) {
        self.set_visited(id, true);
        let target = self.target_mut(id);
        target.visiting = true;
        target.unbind();
        let deps = target.all_dependencies().collect();
        stack.push(Frame {
            target: id,
            deps,
            next: 0,
        });
    }

    /// Bind a single target whose dependencies are already bound.
    fn bind_target(&mut self, fs: &dyn FileSystem, id: TargetId) -> std::io::Result<()> {
        let result = self.target_mut(id).bind_to_file(fs);
        let deps: Vec<(TargetId, u64, bool)> = self
            .target(id)
            .binding_dependencies()
            .map(|dep| {
                let d = self.target(dep);
                (dep, d.timestamp(), d.outdated())
            })
            .collect();
        self.target_mut(id).bind_to_dependencies(deps.into_iter());
        result
    }

    /// Bind every target reachable from `id`, dependencies before dependents.
    ///
    /// A dependency found on the current path closes a cycle; the edge is
    /// treated as satisfied and counted as a failure, so a cyclic graph
    /// still binds completely.
    pub fn bind(&mut self, fs: &dyn FileSystem, id: TargetId) -> Result<Binding> {
        self.begin_traversal()?;
        let mut binding = Binding::default();
        let mut stack = Vec::new();
        self.enter_bind(id, &mut stack);
        while let Some(frame) = stack.last_mut() {
            if let Some(&dep) = frame.deps.get(frame.next) {
                frame.next += 1;
                let from = frame.target;
                if self.target(dep).visiting {
                    binding.failures += 1;
                    binding.cycles.push((from, dep));
                    self.set_successful(dep, true);
                    continue;
                }
                if self.visited(dep) {
                    continue;
                }
                self.enter_bind(dep, &mut stack);
            } else {
                let id = frame.target;
                stack.pop();
                if let Err(err) = self.bind_target(fs, id) {
                    binding.failures += 1;
                    binding.errors.push((id, err));
                }
                self.target_mut(id).visiting = false;
                self.set_successful(id, true);
            }
        }
        self.end_traversal();
        Ok(binding)
    }

    /// Describe why binding left a target outdated.
    pub fn explain(&self, id: TargetId) -> Option<String> {
        let target = self.target(id);
        if !target.outdated() {
            return None;
        }
        Some(match target.reason() {
            None => "marked outdated".to_string(),
            Some(Reason::NeverBuilt) => "never built".to_string(),
            Some(Reason::Missing(filename)) => format!("{} is missing", filename),
            Some(Reason::HashChanged) => "settings changed since last build".to_string(),
            Some(Reason::OutdatedDependency(dep)) => {
                format!("dependency {} is outdated", self.path(*dep))
            }
            Some(Reason::NewerDependency(dep)) => {
                format!("dependency {} is newer", self.path(*dep))
            }
        })
    }

    /// Strip script-declared state so buildfiles can be loaded again from
    /// scratch: explicit, ordering and transitive dependencies, prototypes,
    /// and script references go, anonymous targets are destroyed.  Persisted
    /// state (files, hashes, built flags, implicit dependencies) stays.
    pub fn clear(&mut self) {
        let mut doomed = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if self.target(id).anonymous() {
                self.collect_subtree(id, &mut doomed);
                continue;
            }
            self.set_referenced_by_script(id, false);
            let target = self.target_mut(id);
            target.clear_dependencies(DependencyKind::Explicit);
            target.clear_dependencies(DependencyKind::Ordering);
            target.clear_dependencies(DependencyKind::Transitive);
            target.prototype = None;
            target.working_directory = None;
            target.set_cleanable(false);
            target.unbind();
            stack.extend(target.children.iter().copied());
        }

        for &id in &doomed {
            if let Some(parent) = self.target(id).parent {
                if !self.target(parent).anonymous() {
                    let key = self.target(id).id().to_string();
                    let p = self.target_mut(parent);
                    p.children.retain(|&c| c != id);
                    p.child_index.remove(&key);
                }
            }
        }
        for &id in &doomed {
            if self.target(id).referenced_by_script {
                if let Some(bindings) = self.bindings.as_mut() {
                    bindings.destroy_target_binding(id);
                }
            }
        }
        for &id in &doomed {
            self.targets.take(id);
        }
        if !doomed.is_empty() {
            let live: Vec<TargetId> = self.live_ids().collect();
            for id in live {
                let targets = &self.targets;
                let dangling = self
                    .target(id)
                    .all_dependencies()
                    .any(|dep| targets.get(dep).is_none());
                if dangling {
                    let alive: Vec<TargetId> = self
                        .target(id)
                        .all_dependencies()
                        .filter(|&dep| self.targets.get(dep).is_some())
                        .collect();
                    self.target_mut(id)
                        .retain_dependencies(|dep| alive.contains(&dep));
                }
            }
        }
        self.prototypes.clear();
    }

    fn collect_subtree(&self, id: TargetId, out: &mut Vec<TargetId>) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.target(id).children.iter().copied());
        }
    }

    pub(crate) fn live_ids(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.targets
            .all_ids()
            .filter(move |&id| self.targets.get(id).is_some())
    }

    /// Re-link parents after a structural load and recreate the cache
    /// target from the stored graph filename.
    pub fn recover(&mut self) {
        let mut stack = vec![(self.root, None)];
        while let Some((id, parent)) = stack.pop() {
            let target = self.target_mut(id);
            target.parent = parent;
            target.path.take();
            target.branch.take();
            target.child_index.clear();
            let children = target.children.clone();
            for child in children {
                let key = self.target(child).id().to_string();
                self.target_mut(id).child_index.insert(key, child);
                stack.push((child, Some(id)));
            }
        }

        self.cache_target = None;
        if let Some(filename) = self.filename.clone() {
            if let Ok(cache) = self.lookup(&filename, None, None) {
                self.target_mut(cache).add_filename(filename);
                self.cache_target = Some(cache);
            }
        }
    }

    /// Drop every target and start over with an empty root.
    pub(crate) fn reset(&mut self) {
        let live: Vec<TargetId> = self.live_ids().collect();
        for id in live {
            if self.target(id).referenced_by_script {
                if let Some(bindings) = self.bindings.as_mut() {
                    bindings.destroy_target_binding(id);
                }
            }
        }
        self.targets.clear();
        self.root = self
            .targets
            .push(Some(Target::new(String::new(), false, None)));
        self.cache_target = None;
        self.prototypes.clear();
    }

    /// Empty the arena ahead of pushing a loaded tree; the caller sets
    /// the new root.
    pub(crate) fn clear_targets(&mut self) {
        self.targets.clear();
        self.cache_target = None;
    }

    pub(crate) fn push_target(&mut self, target: Target) -> TargetId {
        self.targets.push(Some(target))
    }

    pub(crate) fn set_root(&mut self, root: TargetId) {
        self.root = root;
    }
}
