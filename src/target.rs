//! A node in the build namespace: a file, a generated artifact, or a phony
//! marker, along with the state computed for it while binding.

use crate::densemap::dense_id;
use crate::fs::{FileSystem, MTime};
use rustc_hash::FxHashMap;
use std::cell::OnceCell;

dense_id!(
    /// Stable handle to a Target within its Graph.
    TargetId
);
dense_id!(
    /// Handle to a prototype (an opaque target category) owned by the Graph.
    PrototypeId
);

/// Timestamp used for a missing file, so that everything depending on it
/// is considered stale.
pub const LATEST: u64 = u64::MAX;
/// Last write time used for a missing file, so that any dependency is newer.
pub const EARLIEST: u64 = 0;

/// The four relations a target can have to another.  Only explicit and
/// implicit dependencies feed into the timestamp and outdated calculation;
/// ordering and transitive dependencies only constrain traversal order.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DependencyKind {
    Explicit,
    Implicit,
    Ordering,
    Transitive,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 4] = [
        DependencyKind::Explicit,
        DependencyKind::Implicit,
        DependencyKind::Ordering,
        DependencyKind::Transitive,
    ];

    /// Whether this kind of dependency participates in binding.
    pub fn binds(self) -> bool {
        matches!(self, DependencyKind::Explicit | DependencyKind::Implicit)
    }
}

/// Why binding marked a target outdated, kept for `-d explain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// A cleanable target without files that hasn't been built.
    NeverBuilt,
    /// One of the target's files doesn't exist.
    Missing(String),
    /// The settings hash differs from the one recorded at the last build.
    HashChanged,
    /// A binding dependency is itself outdated.
    OutdatedDependency(TargetId),
    /// A binding dependency is newer than the target's files.
    NewerDependency(TargetId),
}

#[derive(Debug)]
pub struct Target {
    id: String,
    anonymous: bool,
    pub(crate) path: OnceCell<String>,
    pub(crate) branch: OnceCell<String>,
    pub(crate) prototype: Option<PrototypeId>,

    timestamp: u64,
    last_write_time: u64,
    /// Values derived from the bound files alone, before folding in
    /// dependencies; binding dependencies restarts from these.
    file_timestamp: u64,
    file_outdated: bool,
    hash: u64,
    pending_hash: u64,
    outdated: bool,
    reason: Option<Reason>,
    changed: bool,
    pub(crate) bound_to_file: bool,
    pub(crate) bound_to_dependencies: bool,
    pub(crate) referenced_by_script: bool,
    cleanable: bool,
    built: bool,
    filenames: Vec<String>,

    pub(crate) parent: Option<TargetId>,
    pub(crate) children: Vec<TargetId>,
    pub(crate) child_index: FxHashMap<String, TargetId>,
    pub(crate) working_directory: Option<TargetId>,

    explicit: Vec<TargetId>,
    implicit: Vec<TargetId>,
    ordering: Vec<TargetId>,
    transitive: Vec<TargetId>,

    pub(crate) visiting: bool,
    pub(crate) visited_revision: u64,
    pub(crate) successful_revision: u64,
    pub(crate) postorder_height: i32,
    pub(crate) anonymous_counter: u32,
}

impl Target {
    pub(crate) fn new(id: String, anonymous: bool, parent: Option<TargetId>) -> Self {
        Target {
            id,
            anonymous,
            path: OnceCell::new(),
            branch: OnceCell::new(),
            prototype: None,
            timestamp: 0,
            last_write_time: 0,
            file_timestamp: 0,
            file_outdated: false,
            hash: 0,
            pending_hash: 0,
            outdated: false,
            reason: None,
            changed: false,
            bound_to_file: false,
            bound_to_dependencies: false,
            referenced_by_script: false,
            cleanable: false,
            built: false,
            filenames: Vec::new(),
            parent,
            children: Vec::new(),
            child_index: FxHashMap::default(),
            working_directory: None,
            explicit: Vec::new(),
            implicit: Vec::new(),
            ordering: Vec::new(),
            transitive: Vec::new(),
            visiting: false,
            visited_revision: 0,
            successful_revision: 0,
            postorder_height: -1,
            anonymous_counter: 0,
        }
    }

    /// The path segment naming this target within its parent.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Anonymous targets were created without an identifier and are named
    /// by their parent's counter.
    pub fn anonymous(&self) -> bool {
        self.anonymous
    }

    pub fn prototype(&self) -> Option<PrototypeId> {
        self.prototype
    }

    pub fn parent(&self) -> Option<TargetId> {
        self.parent
    }

    pub fn children(&self) -> &[TargetId] {
        &self.children
    }

    pub fn working_directory(&self) -> Option<TargetId> {
        self.working_directory
    }

    pub fn referenced_by_script(&self) -> bool {
        self.referenced_by_script
    }

    /// Newest write time across bound files and binding dependencies.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Oldest write time across bound files.
    pub fn last_write_time(&self) -> u64 {
        self.last_write_time
    }

    /// Whether the last write time moved since the previous binding.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Outdated status as of the last binding.  Provisional if
    /// `bound_to_dependencies()` is false.
    pub fn outdated(&self) -> bool {
        self.outdated
    }

    pub fn set_outdated(&mut self, outdated: bool) {
        self.outdated = outdated;
    }

    pub fn reason(&self) -> Option<&Reason> {
        self.reason.as_ref()
    }

    pub fn bound_to_file(&self) -> bool {
        self.bound_to_file
    }

    pub fn bound_to_dependencies(&self) -> bool {
        self.bound_to_dependencies
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn pending_hash(&self) -> u64 {
        self.pending_hash
    }

    /// Record the settings hash computed for this run; binding compares it
    /// with the hash recorded when the target was last built.
    pub fn set_pending_hash(&mut self, hash: u64) {
        self.pending_hash = hash;
    }

    pub fn cleanable(&self) -> bool {
        self.cleanable
    }

    pub fn set_cleanable(&mut self, cleanable: bool) {
        self.cleanable = cleanable;
    }

    pub fn built(&self) -> bool {
        self.built
    }

    /// Marking a target built commits the pending hash as its recorded hash;
    /// marking it unbuilt forgets the recorded hash so the next run rebuilds.
    pub fn set_built(&mut self, built: bool) {
        self.built = built;
        self.hash = if built { self.pending_hash } else { 0 };
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn filename(&self) -> Option<&str> {
        self.filenames.first().map(|f| f.as_str())
    }

    pub fn add_filename(&mut self, filename: impl Into<String>) {
        let filename = filename.into();
        if !self.filenames.contains(&filename) {
            self.filenames.push(filename);
            self.bound_to_file = false;
            self.bound_to_dependencies = false;
        }
    }

    pub fn clear_filenames(&mut self) {
        self.filenames.clear();
        self.bound_to_file = false;
        self.bound_to_dependencies = false;
    }

    pub fn postorder_height(&self) -> i32 {
        self.postorder_height
    }

    pub fn dependencies(&self, kind: DependencyKind) -> &[TargetId] {
        match kind {
            DependencyKind::Explicit => &self.explicit,
            DependencyKind::Implicit => &self.implicit,
            DependencyKind::Ordering => &self.ordering,
            DependencyKind::Transitive => &self.transitive,
        }
    }

    fn dependencies_mut(&mut self, kind: DependencyKind) -> &mut Vec<TargetId> {
        match kind {
            DependencyKind::Explicit => &mut self.explicit,
            DependencyKind::Implicit => &mut self.implicit,
            DependencyKind::Ordering => &mut self.ordering,
            DependencyKind::Transitive => &mut self.transitive,
        }
    }

    /// All dependencies in order: explicit, implicit, ordering, transitive.
    pub fn all_dependencies(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.explicit
            .iter()
            .chain(self.implicit.iter())
            .chain(self.ordering.iter())
            .chain(self.transitive.iter())
            .copied()
    }

    /// Dependencies that feed the timestamp and outdated calculation.
    pub fn binding_dependencies(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.explicit.iter().chain(self.implicit.iter()).copied()
    }

    /// Which list, if any, currently holds `dep`.
    pub fn dependency_kind(&self, dep: TargetId) -> Option<DependencyKind> {
        DependencyKind::ALL
            .into_iter()
            .find(|&kind| self.dependencies(kind).contains(&dep))
    }

    /// Remove `dep` from whichever list holds it.  Removing a binding
    /// dependency makes the outdated status provisional until rebound.
    pub(crate) fn remove_dependency(&mut self, dep: TargetId) -> Option<DependencyKind> {
        let kind = self.dependency_kind(dep)?;
        self.dependencies_mut(kind).retain(|&d| d != dep);
        if kind.binds() {
            self.bound_to_dependencies = false;
        }
        Some(kind)
    }

    /// Append `dep` to a list; callers have already removed it from others.
    pub(crate) fn push_dependency(&mut self, kind: DependencyKind, dep: TargetId) {
        self.dependencies_mut(kind).push(dep);
        if kind.binds() {
            self.bound_to_dependencies = false;
        }
    }

    pub(crate) fn clear_dependencies(&mut self, kind: DependencyKind) {
        if self.dependencies(kind).is_empty() {
            return;
        }
        self.dependencies_mut(kind).clear();
        if kind.binds() {
            self.bound_to_dependencies = false;
        }
    }

    /// Drop dependencies on targets that no longer exist.
    pub(crate) fn retain_dependencies(&mut self, mut keep: impl FnMut(TargetId) -> bool) {
        for kind in DependencyKind::ALL {
            let list = self.dependencies_mut(kind);
            let before = list.len();
            list.retain(|&d| keep(d));
            if list.len() != before && kind.binds() {
                self.bound_to_dependencies = false;
            }
        }
    }

    /// Restore persisted state when loading a graph file.
    pub(crate) fn restore(&mut self, last_write_time: u64, hash: u64, built: bool, filenames: Vec<String>) {
        self.last_write_time = last_write_time;
        self.hash = hash;
        self.built = built;
        self.filenames = filenames;
    }

    /// Forget the results of the last binding so the next one starts over.
    pub(crate) fn unbind(&mut self) {
        self.bound_to_file = false;
        self.bound_to_dependencies = false;
    }

    /// Compute timestamp and outdated status from the bound files alone.
    ///
    /// A target without files is never outdated by itself unless it is a
    /// cleanable target that has never been built.  With files, the newest
    /// write time is the timestamp and the oldest the last write time; a
    /// missing file makes the target outdated and pins both to sentinels.
    /// Returns the first error raised while statting, after treating that
    /// file as missing.
    pub(crate) fn bind_to_file(&mut self, fs: &dyn FileSystem) -> std::io::Result<()> {
        if self.bound_to_file {
            return Ok(());
        }
        self.bound_to_file = true;
        self.bound_to_dependencies = false;
        self.reason = None;

        let mut result = Ok(());
        if self.filenames.is_empty() {
            self.file_timestamp = 0;
            self.last_write_time = 0;
            self.changed = false;
            self.file_outdated = self.cleanable && !self.built;
            if self.file_outdated {
                self.reason = Some(Reason::NeverBuilt);
            }
        } else {
            let mut timestamp = 0;
            let mut last_write_time = LATEST;
            let mut missing = None;
            for filename in &self.filenames {
                let mtime = match fs.stat(filename) {
                    Ok(mtime) => mtime,
                    Err(err) => {
                        if result.is_ok() {
                            result = Err(err);
                        }
                        MTime::Missing
                    }
                };
                match mtime {
                    MTime::Stamp(t) => {
                        timestamp = timestamp.max(t);
                        last_write_time = last_write_time.min(t);
                    }
                    MTime::Missing => {
                        if missing.is_none() {
                            missing = Some(filename.clone());
                        }
                    }
                }
            }
            if let Some(filename) = missing {
                timestamp = LATEST;
                last_write_time = EARLIEST;
                self.file_outdated = true;
                self.reason = Some(Reason::Missing(filename));
            } else {
                self.file_outdated = false;
            }
            self.changed = last_write_time != self.last_write_time;
            self.file_timestamp = timestamp;
            self.last_write_time = last_write_time;
        }

        if self.pending_hash != self.hash {
            self.file_outdated = true;
            if self.reason.is_none() {
                self.reason = Some(Reason::HashChanged);
            }
        }
        self.timestamp = self.file_timestamp;
        self.outdated = self.file_outdated;
        result
    }

    /// Fold already-bound dependency state into this target.  `deps` yields
    /// (id, timestamp, outdated) for each binding dependency in order.
    pub(crate) fn bind_to_dependencies(&mut self, deps: impl Iterator<Item = (TargetId, u64, bool)>) {
        if self.bound_to_dependencies {
            return;
        }
        self.bound_to_dependencies = true;

        let mut timestamp = self.file_timestamp;
        let mut outdated = self.file_outdated;
        for (dep, dep_timestamp, dep_outdated) in deps {
            timestamp = timestamp.max(dep_timestamp);
            if dep_outdated && !outdated {
                outdated = true;
                self.reason = Some(Reason::OutdatedDependency(dep));
            }
            if !self.filenames.is_empty() && dep_timestamp > self.last_write_time && !outdated {
                outdated = true;
                self.reason = Some(Reason::NewerDependency(dep));
            }
        }
        self.timestamp = timestamp;
        self.outdated = outdated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Stamps(HashMap<&'static str, u64>);
    impl FileSystem for Stamps {
        fn read(&self, _path: &str) -> std::io::Result<Vec<u8>> {
            Err(std::io::ErrorKind::NotFound.into())
        }
        fn stat(&self, path: &str) -> std::io::Result<MTime> {
            Ok(match self.0.get(path) {
                Some(&t) => MTime::Stamp(t),
                None => MTime::Missing,
            })
        }
        fn is_directory(&self, _path: &str) -> bool {
            false
        }
        fn mkdir(&self, _path: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn remove(&self, _path: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn copy(&self, _from: &str, _to: &str) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn files_take_newest_and_oldest() {
        let fs = Stamps(HashMap::from([("a", 10), ("b", 20)]));
        let mut t = Target::new("t".into(), false, None);
        t.add_filename("a");
        t.add_filename("b");
        t.bind_to_file(&fs).unwrap();
        assert_eq!(t.timestamp(), 20);
        assert_eq!(t.last_write_time(), 10);
        assert!(!t.outdated());
        assert!(t.changed());
    }

    #[test]
    fn missing_file_pins_sentinels() {
        let fs = Stamps(HashMap::from([("a", 10)]));
        let mut t = Target::new("t".into(), false, None);
        t.add_filename("a");
        t.add_filename("gone");
        t.bind_to_file(&fs).unwrap();
        assert!(t.outdated());
        assert_eq!(t.timestamp(), LATEST);
        assert_eq!(t.last_write_time(), EARLIEST);
        assert_eq!(t.reason(), Some(&Reason::Missing("gone".into())));
    }

    #[test]
    fn unbuilt_cleanable_without_files_is_outdated() {
        let fs = Stamps(HashMap::new());
        let mut t = Target::new("t".into(), false, None);
        t.bind_to_file(&fs).unwrap();
        assert!(!t.outdated());

        t.unbind();
        t.set_cleanable(true);
        t.bind_to_file(&fs).unwrap();
        assert!(t.outdated());

        t.unbind();
        t.set_built(true);
        t.bind_to_file(&fs).unwrap();
        assert!(!t.outdated());
    }

    #[test]
    fn hash_change_outdates() {
        let fs = Stamps(HashMap::from([("a", 10)]));
        let mut t = Target::new("t".into(), false, None);
        t.add_filename("a");
        t.set_pending_hash(42);
        t.bind_to_file(&fs).unwrap();
        assert!(t.outdated());
        assert_eq!(t.reason(), Some(&Reason::HashChanged));

        t.set_built(true);
        assert_eq!(t.hash(), 42);
        t.unbind();
        t.bind_to_file(&fs).unwrap();
        assert!(!t.outdated());
    }

    #[test]
    fn newer_dependency_outdates_files_only() {
        let fs = Stamps(HashMap::from([("a", 10)]));
        let dep = TargetId::from(7);

        let mut t = Target::new("t".into(), false, None);
        t.add_filename("a");
        t.bind_to_file(&fs).unwrap();
        t.bind_to_dependencies([(dep, 11, false)].into_iter());
        assert!(t.outdated());
        assert_eq!(t.timestamp(), 11);
        assert_eq!(t.reason(), Some(&Reason::NewerDependency(dep)));

        // Without files, a newer dependency only raises the timestamp.
        let mut phony = Target::new("p".into(), false, None);
        phony.bind_to_file(&fs).unwrap();
        phony.bind_to_dependencies([(dep, 11, false)].into_iter());
        assert!(!phony.outdated());
        assert_eq!(phony.timestamp(), 11);
    }

    #[test]
    fn removing_binding_dependency_invalidates() {
        let mut t = Target::new("t".into(), false, None);
        let a = TargetId::from(1);
        let b = TargetId::from(2);
        t.push_dependency(DependencyKind::Explicit, a);
        t.push_dependency(DependencyKind::Ordering, b);
        t.bound_to_dependencies = true;
        assert_eq!(t.remove_dependency(b), Some(DependencyKind::Ordering));
        assert!(t.bound_to_dependencies());
        assert_eq!(t.remove_dependency(a), Some(DependencyKind::Explicit));
        assert!(!t.bound_to_dependencies());
        assert_eq!(t.remove_dependency(a), None);
    }
}
