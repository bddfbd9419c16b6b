use anyhow::{anyhow, bail};
use argh::FromArgs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::buildfile::{BuildVisitor, BuildfileLoader, Buildfiles, CleanVisitor};
use crate::error::Error;
use crate::fs::RealFileSystem;
use crate::graph::Graph;
use crate::progress::ConsoleProgress;
use crate::scheduler::{Scheduler, Settings};
use crate::target::TargetId;
use crate::{canon, trace};

/// Environment variable naming the dependency interception library.
pub const DEPENDENCY_LIBRARY_VARIABLE: &str = "SWEET_DEPENDENCY_LIBRARY";

#[derive(FromArgs)]
/// sweet: an incremental build orchestrator.
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    directory: Option<String>,

    /// input buildfile [default=build.sweet]
    #[argh(option, short = 'f', default = "String::from(\"build.sweet\")")]
    file: String,

    /// graph file recording previous builds [default=.sweet.graph]
    #[argh(option, default = "String::from(\".sweet.graph\")")]
    graph: String,

    /// parallelism [default=twice the available processors]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// debugging tools, "-d list" to list
    #[argh(option, short = 'd')]
    debug: Vec<String>,

    /// subcommands, "-t list" to list
    #[argh(option, short = 't')]
    tool: Option<String>,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// dependency interception library [default from $SWEET_DEPENDENCY_LIBRARY]
    #[argh(option)]
    inject: Option<PathBuf>,

    /// targets to build
    #[argh(positional)]
    targets: Vec<String>,
}

enum Tool {
    Build,
    Clean,
    Targets,
}

/// Load the graph file, discarding what was derived from buildfiles that
/// changed since it was written.
fn read_graph(path: &str) -> anyhow::Result<Graph> {
    let mut graph = Graph::new();
    match trace::scope("db::load", || graph.load_binary(Path::new(path))) {
        Ok(()) => {}
        Err(err @ Error::VersionInvalid { .. }) => {
            println!("sweet: warning: {}, starting over", err);
        }
        Err(err) => return Err(err.into()),
    }
    if let Some(cache) = graph.cache_target() {
        let binding = graph.bind(&RealFileSystem::new(), cache)?;
        if binding.failures > 0 || graph.target(cache).outdated() {
            graph.clear();
        }
    }
    Ok(graph)
}

/// Map target names from the command line to targets, falling back on the
/// buildfile's defaults.
fn resolve_targets(
    scheduler: &Scheduler,
    state: &Buildfiles,
    cwd: &str,
    names: &[String],
) -> anyhow::Result<Vec<TargetId>> {
    let mut targets = Vec::new();
    for name in names {
        let path = canon::absolute(cwd, name);
        let id = state
            .output_path(&path)
            .or_else(|| scheduler.graph().find(&path, None))
            .ok_or_else(|| Error::UnknownTarget(name.clone()))?;
        targets.push(id);
    }
    if targets.is_empty() {
        targets = state.defaults().to_vec();
    }
    if targets.is_empty() {
        bail!("no path specified and no default");
    }
    Ok(targets)
}

fn print_targets(scheduler: &Scheduler, state: &Buildfiles) {
    let graph = scheduler.graph();
    let mut lines: Vec<String> = state
        .targets()
        .map(|id| {
            let rule = match graph.target(id).prototype() {
                Some(prototype) => graph.prototype(prototype).name.as_str(),
                None => "phony",
            };
            format!("{}: {}", graph.path(id), rule)
        })
        .collect();
    lines.sort();
    for line in lines {
        println!("{}", line);
    }
}

fn run_impl() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();

    let mut settings = Settings::default();
    if let Some(jobs) = args.jobs {
        if jobs == 0 {
            bail!("invalid -j 0");
        }
        settings.maximum_parallel_jobs = jobs;
    }
    settings.dependency_library = args
        .inject
        .clone()
        .or_else(|| std::env::var_os(DEPENDENCY_LIBRARY_VARIABLE).map(PathBuf::from));

    for debug in &args.debug {
        match debug.as_str() {
            "list" => {
                println!("debug tools:");
                println!("  explain  print why each target is outdated");
                println!("  trace    generate json performance trace");
                return Ok(1);
            }
            "explain" => settings.explain = true,
            "trace" => trace::open("trace.json")?,
            _ => bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }

    let tool = match args.tool.as_deref() {
        None => Tool::Build,
        Some("list") => {
            println!("subcommands:");
            println!("  clean    remove the files of built targets");
            println!("  targets  list the targets the buildfiles declare");
            return Ok(1);
        }
        Some("clean") => Tool::Clean,
        Some("targets") => Tool::Targets,
        Some(tool) => bail!("unknown -t {:?}, use -t list to list", tool),
    };

    if let Some(dir) = &args.directory {
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }
    let cwd = std::env::current_dir()?.to_string_lossy().into_owned();
    let buildfile = canon::absolute(&cwd, &args.file);
    let graph_file = canon::absolute(&cwd, &args.graph);

    let graph = read_graph(&graph_file)?;
    let state = Buildfiles::new();
    let mut scheduler = Scheduler::new(
        graph,
        Box::new(RealFileSystem::new()),
        Box::new(ConsoleProgress::new(args.verbose)),
        settings,
    );
    scheduler.set_loader(Rc::new(BuildfileLoader::new(state.clone())));

    if scheduler.load(&buildfile)? > 0 {
        return Ok(1);
    }

    let failures = match tool {
        Tool::Targets => {
            print_targets(&scheduler, &state.borrow());
            return Ok(0);
        }
        Tool::Clean => {
            let targets = resolve_targets(&scheduler, &state.borrow(), &cwd, &args.targets)?;
            let visitor = CleanVisitor::new();
            let mut failures = 0;
            for target in targets {
                failures += scheduler.preorder(&visitor, Some(target))?;
            }
            if failures == 0 {
                println!("sweet: removed {} files", visitor.removed());
            }
            failures
        }
        Tool::Build => {
            let targets = resolve_targets(&scheduler, &state.borrow(), &cwd, &args.targets)?;
            let visitor = BuildVisitor::new(state.clone());
            let mut failures = 0;
            for target in targets {
                failures += scheduler.postorder(&visitor, target)?;
            }
            if failures == 0 {
                match scheduler.executed() {
                    // Special case: don't print numbers when no work done.
                    0 => println!("sweet: no work to do"),
                    n => println!("sweet: ran {} tasks, now up to date", n),
                }
            }
            failures
        }
    };

    let graph = scheduler.into_graph();
    trace::scope("db::save", || graph.save_binary(Path::new(&graph_file)))?;
    Ok(if failures > 0 { 1 } else { 0 })
}

pub fn run() -> anyhow::Result<i32> {
    let res = run_impl();
    trace::close();
    res
}
