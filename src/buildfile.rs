//! The buildfile front-end: loads declarative buildfiles into the graph and
//! supplies the visitors that build and clean what they declare.
//!
//! A `rule` registers a prototype; a `build` statement turns into a single
//! target named by its first output, with every output bound as one of its
//! files.  The evaluated command is hashed into the target's pending hash so
//! that editing a command rebuilds what it produces.

use crate::canon;
use crate::context::ContextId;
use crate::depfile;
use crate::eval::{Env, LazyVars, Vars};
use crate::graph::Graph;
use crate::hash::hash_settings;
use crate::parse::{Build, Parser, Rule, Statement};
use crate::process::Spawn;
use crate::scanner::Scanner;
use crate::scheduler::{Execution, Loaded, Scheduler};
use crate::target::{DependencyKind, PrototypeId, Reason, TargetId};
use crate::task::{Filter, Loader, Resume, Step, Task, Visitor};
use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// What a `build` statement asks for, kept until the target is visited.
#[derive(Debug, Clone, Default)]
pub struct BuildInfo {
    pub command: Option<String>,
    pub description: Option<String>,
    /// Absolute path of the dependency file the command writes.
    pub depfile: Option<String>,
    /// Absolute paths of every output.
    pub outputs: Vec<String>,
    /// Where the statement was, for messages.
    pub location: String,
}

struct RuleDef {
    prototype: PrototypeId,
    vars: LazyVars,
}

/// Everything learned from the buildfiles of one run.  All buildfiles share
/// a single scope: an `include` sees, and adds to, the includer's variables
/// and rules.
#[derive(Default)]
pub struct Buildfiles {
    vars: Vars,
    rules: FxHashMap<String, RuleDef>,
    builds: FxHashMap<TargetId, Rc<BuildInfo>>,
    /// Maps every declared output to the target that produces it.
    outputs: FxHashMap<String, TargetId>,
    defaults: Vec<TargetId>,
}

impl Buildfiles {
    pub fn new() -> Rc<RefCell<Buildfiles>> {
        Rc::new(RefCell::new(Buildfiles::default()))
    }

    pub fn defaults(&self) -> &[TargetId] {
        &self.defaults
    }

    pub fn build(&self, target: TargetId) -> Option<&Rc<BuildInfo>> {
        self.builds.get(&target)
    }

    /// Targets with a `build` statement, in no particular order.
    pub fn targets(&self) -> impl Iterator<Item = TargetId> + '_ {
        self.builds.keys().copied()
    }

    /// The target producing the file at the absolute `path`.
    pub fn output_path(&self, path: &str) -> Option<TargetId> {
        self.outputs.get(path).copied()
    }

    /// The target producing `path`, resolved against `working_directory`.
    pub fn output(&self, graph: &Graph, working_directory: TargetId, path: &str) -> Option<TargetId> {
        self.output_path(&canon::absolute(graph.path(working_directory), path))
    }

    fn add_rule(&mut self, graph: &mut Graph, rule: Rule) -> anyhow::Result<()> {
        if rule.name == "phony" || self.rules.contains_key(&rule.name) {
            bail!("duplicate rule {:?}", rule.name);
        }
        let prototype = graph.add_prototype(rule.name.clone());
        self.rules.insert(
            rule.name,
            RuleDef {
                prototype,
                vars: rule.vars,
            },
        );
        Ok(())
    }

    /// Resolve an input path to a target.  Inputs nobody builds are source
    /// files, bound to their own path.
    fn input(&self, graph: &mut Graph, working_directory: TargetId, path: &str) -> anyhow::Result<TargetId> {
        if let Some(id) = self.output(graph, working_directory, path) {
            return Ok(id);
        }
        let id = graph.lookup(path, None, Some(working_directory))?;
        bind_source(graph, id);
        Ok(id)
    }

    fn add_build(
        &mut self,
        graph: &mut Graph,
        working_directory: TargetId,
        location: String,
        build: Build,
    ) -> anyhow::Result<()> {
        let rule = match build.rule.as_str() {
            "phony" => None,
            name => match self.rules.get(name) {
                Some(rule) => Some(rule),
                None => bail!("unknown rule {:?}", name),
            },
        };
        let base = graph.path(working_directory).to_string();
        let outputs: Vec<String> = build
            .outs
            .iter()
            .map(|out| canon::absolute(&base, out))
            .collect();

        let target = graph.lookup(&build.outs[0], rule.map(|r| r.prototype), Some(working_directory))?;
        if self.builds.contains_key(&target) {
            bail!("multiple rules generate {}", graph.path(target));
        }
        for output in &outputs {
            if let Some(&other) = self.outputs.get(output) {
                if other != target {
                    bail!("multiple rules generate {}", output);
                }
            }
            self.outputs.insert(output.clone(), target);
        }
        graph.set_referenced_by_script(target, true);

        let mut ins = Vec::with_capacity(build.ins.len());
        for path in &build.ins {
            ins.push(self.input(graph, working_directory, path)?);
        }
        for (i, &dep) in ins.iter().enumerate() {
            if i < build.explicit_ins + build.implicit_ins {
                graph.add_explicit_dependency(target, dep);
            } else {
                graph.add_ordering_dependency(target, dep);
            }
        }

        let t = graph.target_mut(target);
        t.clear_filenames();
        let rule = match rule {
            Some(rule) => rule,
            None => {
                t.set_cleanable(false);
                self.builds.insert(
                    target,
                    Rc::new(BuildInfo {
                        location,
                        ..Default::default()
                    }),
                );
                return Ok(());
            }
        };
        for output in &outputs {
            t.add_filename(output.clone());
        }
        t.set_cleanable(true);

        let implicit = ImplicitVars {
            ins: build.explicit_ins(),
            outs: build.explicit_outs(),
        };
        let mut scope = Vars::new();
        for (key, val) in build.vars.keyvals() {
            scope.insert(key.clone(), val.evaluate(&[&implicit, &self.vars]));
        }
        let envs: [&dyn Env; 3] = [&implicit, &scope, &self.vars];
        let lookup = |key: &str| -> Option<String> {
            let val = match scope.get(key) {
                Some(val) => val.clone(),
                None => rule.vars.get(key)?.evaluate(&envs),
            };
            if val.is_empty() {
                None
            } else {
                Some(val)
            }
        };
        let command = lookup("command");
        let description = lookup("description");
        let depfile = lookup("depfile").map(|path| canon::absolute(&base, &path));

        t.set_pending_hash(hash_settings([
            command.as_deref().unwrap_or(""),
            depfile.as_deref().unwrap_or(""),
        ]));
        self.builds.insert(
            target,
            Rc::new(BuildInfo {
                command,
                description,
                depfile,
                outputs,
                location,
            }),
        );
        Ok(())
    }
}

/// A target referenced only as an input stands for the file at its path.
fn bind_source(graph: &mut Graph, id: TargetId) {
    let t = graph.target(id);
    if t.referenced_by_script() || !t.filenames().is_empty() {
        return;
    }
    let path = graph.path(id).to_string();
    graph.target_mut(id).add_filename(path);
}

/// `$in` and `$out` of a build statement.
struct ImplicitVars<'a> {
    ins: &'a [String],
    outs: &'a [String],
}

impl Env for ImplicitVars<'_> {
    fn get_var(&self, var: &str) -> Option<String> {
        match var {
            "in" => Some(self.ins.join(" ")),
            "out" => Some(self.outs.join(" ")),
            _ => None,
        }
    }
}

/// Executes buildfiles on behalf of the scheduler.
pub struct BuildfileLoader {
    state: Rc<RefCell<Buildfiles>>,
}

impl BuildfileLoader {
    pub fn new(state: Rc<RefCell<Buildfiles>>) -> Self {
        BuildfileLoader { state }
    }
}

impl Loader for BuildfileLoader {
    fn load(&self, graph: &Graph, buildfile: TargetId) -> Box<dyn Task> {
        Box::new(LoadTask {
            state: self.state.clone(),
            filename: graph.path(buildfile).to_string(),
            buf: None,
            ofs: 0,
            line: 1,
        })
    }
}

/// Parses one buildfile, statement by statement.  An `include` whose load
/// has to wait suspends the task; it picks up after the include when
/// resumed.
struct LoadTask {
    state: Rc<RefCell<Buildfiles>>,
    filename: String,
    buf: Option<Vec<u8>>,
    ofs: usize,
    line: usize,
}

impl LoadTask {
    fn run(&mut self, scheduler: &mut Scheduler, context: ContextId) -> anyhow::Result<Step> {
        if self.buf.is_none() {
            let mut buf = scheduler
                .fs()
                .read(&self.filename)
                .map_err(|err| anyhow!("read {}: {}", self.filename, err))?;
            buf.push(0);
            self.buf = Some(buf);
        }
        let buf = match &self.buf {
            Some(buf) => buf,
            None => return Ok(Step::Completed),
        };
        let working_directory = scheduler.working_directory(context);

        let mut parser = Parser::at(buf, self.ofs, self.line);
        loop {
            let statement = {
                let mut state = self.state.borrow_mut();
                parser.read(&mut state.vars)
            };
            let statement = match statement {
                Ok(Some(statement)) => statement,
                Ok(None) => return Ok(Step::Completed),
                Err(err) => bail!(parser.format_parse_error(&self.filename, err)),
            };
            match statement {
                Statement::Rule(rule) => {
                    self.state.borrow_mut().add_rule(scheduler.graph_mut(), rule)?
                }
                Statement::Build(build) => {
                    let location = format!("{}:{}", self.filename, build.line);
                    let result = self.state.borrow_mut().add_build(
                        scheduler.graph_mut(),
                        working_directory,
                        location.clone(),
                        build,
                    );
                    if let Err(err) = result {
                        scheduler.error(Some(context), &format!("{}: {:#}", location, err));
                    }
                }
                Statement::Default(paths) => {
                    let mut state = self.state.borrow_mut();
                    for path in paths {
                        let id = match state.output(scheduler.graph(), working_directory, &path) {
                            Some(id) => id,
                            None => scheduler
                                .graph_mut()
                                .lookup(&path, None, Some(working_directory))?,
                        };
                        state.defaults.push(id);
                    }
                }
                Statement::Include(path) => {
                    (self.ofs, self.line) = parser.position();
                    if scheduler.buildfile(Some(context), &path)? == Loaded::Suspended {
                        return Ok(Step::Suspended);
                    }
                }
            }
        }
    }
}

impl Task for LoadTask {
    fn resume(&mut self, scheduler: &mut Scheduler, context: ContextId, resume: Resume) -> Step {
        if let Resume::Executed(_) = resume {
            return Step::Faulted(anyhow!("buildfile load resumed with a command result"));
        }
        match self.run(scheduler, context) {
            Ok(step) => step,
            Err(err) => Step::Faulted(err),
        }
    }
}

/// Builds outdated targets by running their commands.
pub struct BuildVisitor {
    state: Rc<RefCell<Buildfiles>>,
}

impl BuildVisitor {
    pub fn new(state: Rc<RefCell<Buildfiles>>) -> Self {
        BuildVisitor { state }
    }
}

impl Visitor for BuildVisitor {
    fn visit(&self, _graph: &Graph, target: TargetId) -> Box<dyn Task> {
        Box::new(BuildTask {
            target,
            info: self.state.borrow().build(target).cloned(),
            state: self.state.clone(),
        })
    }
}

struct BuildTask {
    target: TargetId,
    info: Option<Rc<BuildInfo>>,
    state: Rc<RefCell<Buildfiles>>,
}

impl BuildTask {
    fn description(&self) -> &str {
        self.info
            .as_ref()
            .and_then(|info| info.description.as_deref())
            .unwrap_or("")
    }

    /// Fail if an explicit input is a source file that doesn't exist, since
    /// nothing will ever create it.
    fn check_inputs(&self, graph: &Graph) -> anyhow::Result<()> {
        let state = self.state.borrow();
        for &dep in graph.target(self.target).dependencies(DependencyKind::Explicit) {
            let t = graph.target(dep);
            if t.referenced_by_script() || state.build(dep).is_some() {
                continue;
            }
            if let Some(Reason::Missing(filename)) = t.reason() {
                bail!(
                    "{}, needed by {}, missing and no known rule to make it",
                    filename,
                    graph.path(self.target)
                );
            }
        }
        Ok(())
    }

    fn start(&mut self, scheduler: &mut Scheduler, context: ContextId) -> anyhow::Result<Step> {
        let info = match &self.info {
            Some(info) => info.clone(),
            None => return Ok(Step::Completed),
        };
        let command = match &info.command {
            Some(command) => command.clone(),
            None => return Ok(Step::Completed),
        };
        if !scheduler.graph().target(self.target).outdated() {
            return Ok(Step::Completed);
        }
        self.check_inputs(scheduler.graph())?;

        let graph = scheduler.graph_mut();
        graph.clear_implicit_dependencies(self.target);
        graph.target_mut(self.target).set_built(false);
        for output in &info.outputs {
            if let Some(dir) = std::path::Path::new(output).parent() {
                let dir = dir.to_string_lossy();
                if !dir.is_empty() {
                    scheduler
                        .fs()
                        .mkdir(&dir)
                        .map_err(|err| anyhow!("mkdir {}: {}", dir, err))?;
                }
            }
        }

        let path = scheduler.graph().path(self.target).to_string();
        scheduler
            .progress()
            .task_started(&path, self.description(), &command);
        let mut execution = Execution::new(Spawn::shell(command));
        execution.dependencies = Some(Box::new(DependencyFilter {
            target: self.target,
            outputs: info.outputs.clone(),
        }));
        scheduler.execute(context, execution)?;
        Ok(Step::Suspended)
    }

    fn finish(&mut self, scheduler: &mut Scheduler, context: ContextId, exit_code: i32) -> anyhow::Result<()> {
        let path = scheduler.graph().path(self.target).to_string();
        scheduler
            .progress()
            .task_finished(&path, self.description(), exit_code);
        if exit_code != 0 {
            bail!("{} failed with exit code {}", path, exit_code);
        }
        if let Some(depfile) = self.info.as_ref().and_then(|info| info.depfile.clone()) {
            self.read_depfile(scheduler, context, &depfile)?;
        }
        scheduler.graph_mut().target_mut(self.target).set_built(true);
        Ok(())
    }

    fn read_depfile(&self, scheduler: &mut Scheduler, context: ContextId, path: &str) -> anyhow::Result<()> {
        let mut buf = match scheduler.fs().read(path) {
            Ok(buf) => buf,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => bail!("read {}: {}", path, err),
        };
        buf.push(0);
        let mut scanner = Scanner::new(&buf);
        let deps = depfile::parse(&mut scanner)
            .map_err(|err| anyhow!(scanner.format_parse_error(path, err)))?;
        let working_directory = scheduler.working_directory(context);
        let outputs = self.info.as_ref().map_or(&[][..], |info| &info.outputs[..]);
        for dep in deps.deps {
            add_discovered(scheduler, working_directory, self.target, outputs, dep)?;
        }
        Ok(())
    }
}

impl Task for BuildTask {
    fn resume(&mut self, scheduler: &mut Scheduler, context: ContextId, resume: Resume) -> Step {
        let result = match resume {
            Resume::Start => self.start(scheduler, context),
            Resume::Executed(exit_code) => self
                .finish(scheduler, context, exit_code)
                .map(|()| Step::Completed),
            Resume::Loaded(_) => Err(anyhow!("build resumed by a buildfile load")),
        };
        match result {
            Ok(step) => step,
            Err(err) => Step::Faulted(err),
        }
    }
}

/// Record a file the command for `target` read as an implicit dependency.
/// Files the target already depends on, or produces, are skipped.
fn add_discovered(
    scheduler: &mut Scheduler,
    working_directory: TargetId,
    target: TargetId,
    outputs: &[String],
    path: &str,
) -> anyhow::Result<()> {
    let graph = scheduler.graph_mut();
    let absolute = canon::absolute(graph.path(working_directory), path);
    if outputs.contains(&absolute) {
        return Ok(());
    }
    let dep = graph.lookup(&absolute, None, None)?;
    if dep == target || graph.target(target).dependency_kind(dep).is_some() {
        return Ok(());
    }
    bind_source(graph, dep);
    graph.add_implicit_dependency(target, dep);
    Ok(())
}

/// Turns the paths reported on the dependencies channel into implicit
/// dependencies.
struct DependencyFilter {
    target: TargetId,
    outputs: Vec<String>,
}

impl Filter for DependencyFilter {
    fn line(&mut self, scheduler: &mut Scheduler, context: ContextId, line: &str) -> anyhow::Result<()> {
        let path = line.trim();
        if path.is_empty() {
            return Ok(());
        }
        let working_directory = scheduler.working_directory(context);
        add_discovered(scheduler, working_directory, self.target, &self.outputs, path)
    }
}

/// Removes the files of cleanable targets.
pub struct CleanVisitor {
    removed: Rc<Cell<usize>>,
}

impl CleanVisitor {
    pub fn new() -> Self {
        CleanVisitor {
            removed: Rc::new(Cell::new(0)),
        }
    }

    /// Files removed so far.
    pub fn removed(&self) -> usize {
        self.removed.get()
    }
}

impl Default for CleanVisitor {
    fn default() -> Self {
        CleanVisitor::new()
    }
}

impl Visitor for CleanVisitor {
    fn visit(&self, _graph: &Graph, target: TargetId) -> Box<dyn Task> {
        let removed = self.removed.clone();
        Box::new(crate::task::FnTask(
            move |scheduler: &mut Scheduler, _: ContextId| -> anyhow::Result<()> {
                let t = scheduler.graph().target(target);
                if !t.cleanable() {
                    return Ok(());
                }
                let filenames = t.filenames().to_vec();
                for filename in &filenames {
                    if scheduler.fs().exists(filename) {
                        scheduler
                            .fs()
                            .remove(filename)
                            .map_err(|err| anyhow!("remove {}: {}", filename, err))?;
                        removed.set(removed.get() + 1);
                    }
                }
                scheduler.graph_mut().target_mut(target).set_built(false);
                Ok(())
            },
        ))
    }
}
